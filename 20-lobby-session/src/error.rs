use thiserror::Error;

/// Failures reported by a [`crate::session::LobbySession`].
///
/// Errors are cloneable so they can be both returned from `start()` and
/// broadcast to every signal subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The transport failed to open, errored, or closed.
    #[error("connection error: {0}")]
    Connection(String),

    /// An inbound frame was malformed or carried an unknown `type`.
    #[error("protocol error in `{tag}` frame: {reason}")]
    Protocol { tag: String, reason: String },

    #[error("connection is not open; call start() first")]
    NotConnected,

    #[error("lobby snapshot is not available before the handshake completes")]
    NotReady,

    #[error("session has already been started")]
    AlreadyStarted,
}

impl SessionError {
    pub(crate) fn protocol(tag: impl Into<String>, reason: impl ToString) -> Self {
        Self::Protocol {
            tag: tag.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn connection(reason: impl ToString) -> Self {
        Self::Connection(reason.to_string())
    }
}

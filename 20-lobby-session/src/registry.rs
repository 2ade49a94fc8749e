//! External listeners, one per inbound packet kind.
//!
//! Registering a listener for a kind that already has one replaces it. The
//! returned [`Subscription`] only removes the registration it created, so a
//! stale handle cannot remove a newer listener.

use std::{
    any::Any,
    collections::HashMap,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use tracing::{debug, warn};

use crate::message::{InboundEvent, PacketKind, ServerToClient};

type Listener = Arc<dyn Fn(&ServerToClient) + Send + Sync>;

struct Registration {
    id: u64,
    listener: Listener,
}

#[derive(Default)]
pub(crate) struct SubscriberRegistry {
    listeners: Mutex<HashMap<PacketKind, Registration>>,
    next_id: AtomicU64,
}

impl SubscriberRegistry {
    pub(crate) fn register<E, F>(self: &Arc<Self>, listener: F) -> Subscription
    where
        E: InboundEvent,
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let listener: Listener = Arc::new(move |packet: &ServerToClient| {
            if let Some(event) = E::from_packet(packet) {
                listener(event);
            }
        });

        let replaced = self
            .lock()
            .insert(E::KIND, Registration { id, listener })
            .is_some();
        if replaced {
            debug!(kind = %E::KIND, "replaced existing listener");
        }

        Subscription {
            registry: Arc::downgrade(self),
            kind: E::KIND,
            id,
        }
    }

    /// Invokes the listener registered for the packet's kind, if any.
    ///
    /// The registry lock is released before the listener runs, so listeners
    /// may subscribe or unsubscribe from inside the callback. A panicking
    /// listener is logged and stays registered; it never unwinds into the
    /// caller.
    pub(crate) fn notify(&self, packet: &ServerToClient) -> bool {
        let listener = self
            .lock()
            .get(&packet.kind())
            .map(|registration| Arc::clone(&registration.listener));

        let Some(listener) = listener else {
            return false;
        };
        if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| listener(packet))) {
            warn!(
                kind = %packet.kind(),
                panic = panic_message(&*panic),
                "listener panicked"
            );
        }
        true
    }

    #[cfg(test)]
    pub(crate) fn is_registered(&self, kind: PacketKind) -> bool {
        self.lock().contains_key(&kind)
    }

    fn remove(&self, kind: PacketKind, id: u64) -> bool {
        let mut listeners = self.lock();
        match listeners.get(&kind) {
            Some(registration) if registration.id == id => {
                listeners.remove(&kind);
                true
            }
            _ => false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PacketKind, Registration>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic")
}

/// Handle returned by `subscribe`; call [`Subscription::unsubscribe`] to stop
/// receiving events. Dropping the handle leaves the listener registered.
#[derive(Debug)]
pub struct Subscription {
    registry: Weak<SubscriberRegistry>,
    kind: PacketKind,
    id: u64,
}

impl Subscription {
    pub fn kind(&self) -> PacketKind {
        self.kind
    }

    /// Removes the listener. Returns `false` when it had already been
    /// replaced by a newer registration or the session is gone.
    pub fn unsubscribe(self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => registry.remove(self.kind, self.id),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::{
        lobby::Challenge,
        message::{GameStartedPacket, LobbyPacket},
    };

    fn game_started(start_time: i64) -> ServerToClient {
        ServerToClient::GameStarted(GameStartedPacket {
            start_time,
            challenge: Challenge::default(),
        })
    }

    #[test]
    fn second_registration_replaces_the_first() {
        let registry = Arc::new(SubscriberRegistry::default());
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let first_counter = Arc::clone(&first);
        let stale = registry.register(move |_: &GameStartedPacket| {
            first_counter.fetch_add(1, Ordering::SeqCst);
        });
        let second_counter = Arc::clone(&second);
        let current = registry.register(move |_: &GameStartedPacket| {
            second_counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(registry.notify(&game_started(1)));
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);

        // The replaced handle must not remove the newer listener.
        assert!(!stale.unsubscribe());
        assert!(registry.is_registered(PacketKind::GameStarted));

        assert!(current.unsubscribe());
        assert!(!registry.notify(&game_started(2)));
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listeners_only_see_their_own_kind() {
        let registry = Arc::new(SubscriberRegistry::default());
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let _subscription = registry.register(move |_: &LobbyPacket| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!registry.notify(&game_started(1)));
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn listener_can_unsubscribe_itself() {
        let registry = Arc::new(SubscriberRegistry::default());
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let calls = Arc::new(AtomicUsize::new(0));

        let inner_slot = Arc::clone(&slot);
        let counter = Arc::clone(&calls);
        let subscription = registry.register(move |_: &GameStartedPacket| {
            counter.fetch_add(1, Ordering::SeqCst);
            if let Some(subscription) = inner_slot.lock().unwrap().take() {
                subscription.unsubscribe();
            }
        });
        *slot.lock().unwrap() = Some(subscription);

        registry.notify(&game_started(1));
        registry.notify(&game_started(2));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_listener_does_not_unwind_into_notify() {
        let registry = Arc::new(SubscriberRegistry::default());
        let _subscription = registry.register(|packet: &GameStartedPacket| {
            panic!("listener failed at {}", packet.start_time);
        });

        assert!(registry.notify(&game_started(1)));
        assert!(registry.notify(&game_started(2)));
        assert!(registry.is_registered(PacketKind::GameStarted));
    }

    #[test]
    fn unsubscribe_after_registry_dropped_is_a_no_op() {
        let registry = Arc::new(SubscriberRegistry::default());
        let subscription = registry.register(|_: &GameStartedPacket| {});
        drop(registry);
        assert!(!subscription.unsubscribe());
    }
}

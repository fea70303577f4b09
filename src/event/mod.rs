//! Contains the events and handler types used for monitoring the driver's activity.
//!
//! Each event category (command, SDAM, connection pool) is delivered through an
//! [`EventHandler`], which is either a caller-supplied callback or a broadcast channel. The
//! publisher never blocks: when a channel consumer falls behind, events are dropped and the
//! consumer observes how many it missed.

pub mod cmap;
pub mod command;
pub mod sdam;

use std::sync::Arc;

/// A destination for events. Either a user-provided callback invoked synchronously with each
/// event, or the sending half of a broadcast channel.
#[derive(Clone)]
pub struct EventHandler<T> {
    inner: EventHandlerInner<T>,
}

impl<T> std::fmt::Debug for EventHandler<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHandler").finish()
    }
}

#[derive(Clone)]
enum EventHandlerInner<T> {
    Callback(Arc<dyn Fn(T) + Sync + Send>),
    Broadcast(tokio::sync::broadcast::Sender<T>),
}

impl<T: Clone + Send + Sync + 'static> EventHandler<T> {
    /// Construct a new event handler with a callback.
    pub fn callback(f: impl Fn(T) + Send + Sync + 'static) -> Self {
        Self {
            inner: EventHandlerInner::Callback(Arc::new(f)),
        }
    }

    /// Construct a new event handler backed by a broadcast channel holding at most `capacity`
    /// undelivered events. Consumers that lag behind miss events; the channel reports how many
    /// were skipped via [`tokio::sync::broadcast::error::RecvError::Lagged`].
    pub fn broadcast(capacity: usize) -> (Self, tokio::sync::broadcast::Receiver<T>) {
        let (tx, rx) = tokio::sync::broadcast::channel(capacity);
        (
            Self {
                inner: EventHandlerInner::Broadcast(tx),
            },
            rx,
        )
    }

    pub(crate) fn handle(&self, event: T) {
        match &self.inner {
            EventHandlerInner::Callback(cb) => cb(event),
            // Sending fails when no receiver is listening, which is fine to ignore.
            EventHandlerInner::Broadcast(sender) => {
                let _ = sender.send(event);
            }
        }
    }
}

pub(crate) fn emit<T: Clone + Send + Sync + 'static>(
    handler: &Option<EventHandler<T>>,
    make_event: impl FnOnce() -> T,
) {
    if let Some(handler) = handler {
        handler.handle(make_event());
    }
}

#[cfg(test)]
mod test {
    use super::EventHandler;

    #[tokio::test]
    async fn broadcast_drops_on_lagging_consumer() {
        let (handler, mut rx) = EventHandler::<u32>::broadcast(2);
        for i in 0..5 {
            handler.handle(i);
        }

        // The two most recent events survive; the receiver learns how many it missed.
        match rx.recv().await {
            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => assert_eq!(n, 3),
            other => panic!("expected lag, got {:?}", other),
        }
        assert_eq!(rx.recv().await.unwrap(), 3);
        assert_eq!(rx.recv().await.unwrap(), 4);
    }

    #[test]
    fn callback_invoked_synchronously() {
        let count = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let count_clone = count.clone();
        let handler = EventHandler::callback(move |_: u32| {
            count_clone.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });
        handler.handle(1);
        handler.handle(2);
        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 2);
    }
}

//! # Channel Event Adapter
//!
//! Turns a pull-style `MessageChannel` into push-style delivery. Each `pump`
//! receives at most one item and fans it out to every registered message
//! handler. Handlers are isolated from each other: a failing handler is
//! reported to the error handlers and the remaining handlers still run.
//!
//! Registration may change at any time, including from inside a handler. A
//! pump iterates over the handler lists as they were when it started.

use crate::error::{BrokerResult, HandlerError};
use crate::messaging::channel::MessageChannel;
use parking_lot::RwLock;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, warn};

/// Identifies one registered handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler-{}", self.0)
    }
}

/// A message handler failure, as seen by error handlers
#[derive(Debug)]
pub struct HandlerFailure {
    pub handler_id: HandlerId,
    pub error: HandlerError,
}

impl fmt::Display for HandlerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.handler_id, self.error)
    }
}

/// Receiver of pushed items
pub trait Observer<T>: Send + Sync {
    fn on_next(&self, item: &T) -> Result<(), HandlerError>;
}

type MessageHandler<T> = Arc<dyn Fn(&T) -> Result<(), HandlerError> + Send + Sync>;
type ErrorHandler = Arc<dyn Fn(&HandlerFailure) -> Result<(), HandlerError> + Send + Sync>;

struct HandlerRegistry<T> {
    next_id: AtomicU64,
    message_handlers: RwLock<Vec<(HandlerId, MessageHandler<T>)>>,
    error_handlers: RwLock<Vec<(HandlerId, ErrorHandler)>>,
}

impl<T> HandlerRegistry<T> {
    fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            message_handlers: RwLock::new(Vec::new()),
            error_handlers: RwLock::new(Vec::new()),
        }
    }

    fn next_id(&self) -> HandlerId {
        HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn remove(&self, id: HandlerId) -> bool {
        let mut removed = false;
        self.message_handlers.write().retain(|(handler_id, _)| {
            let keep = *handler_id != id;
            removed |= !keep;
            keep
        });
        self.error_handlers.write().retain(|(handler_id, _)| {
            let keep = *handler_id != id;
            removed |= !keep;
            keep
        });
        removed
    }
}

/// Token for an observer registration; dropping it unsubscribes
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription<T> {
    registry: Weak<HandlerRegistry<T>>,
    id: HandlerId,
}

impl<T> Subscription<T> {
    pub fn id(&self) -> HandlerId {
        self.id
    }

    pub fn unsubscribe(self) {}
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
            debug!(handler_id = %self.id, "Subscription disposed");
        }
    }
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// Push-style fan-out over a `MessageChannel`
pub struct ChannelEventAdapter<T, C> {
    channel: C,
    registry: Arc<HandlerRegistry<T>>,
    _item: PhantomData<fn(T)>,
}

impl<T, C> ChannelEventAdapter<T, C>
where
    T: Send + 'static,
    C: MessageChannel<T>,
{
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            registry: Arc::new(HandlerRegistry::new()),
            _item: PhantomData,
        }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Register a handler invoked for every pumped item
    pub fn on_message<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&T) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let id = self.registry.next_id();
        self.registry
            .message_handlers
            .write()
            .push((id, Arc::new(handler)));
        id
    }

    /// Register a handler invoked for every message handler failure
    pub fn on_error<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&HandlerFailure) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let id = self.registry.next_id();
        self.registry
            .error_handlers
            .write()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a message or error handler; false when it was not registered
    pub fn remove_handler(&self, id: HandlerId) -> bool {
        self.registry.remove(id)
    }

    /// Registered message and error handlers
    pub fn handler_count(&self) -> (usize, usize) {
        (
            self.registry.message_handlers.read().len(),
            self.registry.error_handlers.read().len(),
        )
    }

    /// Forward every pumped item to `observer` until the subscription is dropped
    pub fn subscribe<O>(&self, observer: O) -> Subscription<T>
    where
        O: Observer<T> + 'static,
    {
        let id = self.on_message(move |item| observer.on_next(item));
        Subscription {
            registry: Arc::downgrade(&self.registry),
            id,
        }
    }

    /// Receive at most one item and fan it out
    ///
    /// Returns whether an item was received. Handler failures never fail the
    /// pump and never roll the receive back.
    pub async fn pump(&self, timeout: Duration) -> BrokerResult<bool> {
        let message_handlers = self.registry.message_handlers.read().clone();
        let error_handlers = self.registry.error_handlers.read().clone();

        self.channel
            .try_receive(timeout, move |item| {
                dispatch(&item, &message_handlers, &error_handlers);
                Ok(())
            })
            .await
    }
}

fn dispatch<T>(
    item: &T,
    message_handlers: &[(HandlerId, MessageHandler<T>)],
    error_handlers: &[(HandlerId, ErrorHandler)],
) {
    for (handler_id, handler) in message_handlers {
        if let Err(error) = handler(item) {
            warn!(handler_id = %handler_id, error = %error, "Message handler failed");
            let failure = HandlerFailure {
                handler_id: *handler_id,
                error,
            };
            for (error_handler_id, error_handler) in error_handlers {
                if let Err(e) = error_handler(&failure) {
                    debug!(
                        handler_id = %error_handler_id,
                        error = %e,
                        "Error handler failed, ignoring"
                    );
                }
            }
        }
    }
}

impl<T, C: fmt::Debug> fmt::Debug for ChannelEventAdapter<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelEventAdapter")
            .field("channel", &self.channel)
            .field("message_handlers", &self.registry.message_handlers.read().len())
            .field("error_handlers", &self.registry.error_handlers.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::InProcessChannel;
    use std::sync::atomic::AtomicUsize;

    fn adapter() -> ChannelEventAdapter<String, InProcessChannel<String>> {
        ChannelEventAdapter::new(InProcessChannel::new())
    }

    #[tokio::test]
    async fn test_pump_without_listeners() {
        let events = adapter();
        events.channel().send(String::new()).await.unwrap();
        assert!(events.pump(Duration::ZERO).await.unwrap());
        assert!(!events.pump(Duration::ZERO).await.unwrap());
    }

    #[tokio::test]
    async fn test_failing_handler_does_not_break_chain() {
        let events = adapter();
        let raised = Arc::new(AtomicUsize::new(0));
        let failures = Arc::new(AtomicUsize::new(0));

        let counter = raised.clone();
        events.on_message(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let failing = events.on_message(|_| Err("invalid operation".into()));
        let counter = raised.clone();
        events.on_message(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let failed = failures.clone();
        events.on_error(move |failure| {
            assert_eq!(failure.handler_id, failing);
            failed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        events.on_error(|_| Err("error handlers are isolated too".into()));

        events.channel().send("Helló World!".to_string()).await.unwrap();
        assert!(events.pump(Duration::ZERO).await.unwrap());
        assert_eq!(raised.load(Ordering::SeqCst), 2);
        assert_eq!(failures.load(Ordering::SeqCst), 1);
    }

    struct Collect(Arc<parking_lot::Mutex<Vec<String>>>);

    impl Observer<String> for Collect {
        fn on_next(&self, item: &String) -> Result<(), HandlerError> {
            self.0.lock().push(item.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_dropping_subscription_removes_only_that_handler() {
        let events = adapter();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let others = Arc::new(AtomicUsize::new(0));

        let counter = others.clone();
        events.on_message(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let subscription = events.subscribe(Collect(seen.clone()));
        assert_eq!(events.handler_count(), (2, 0));

        events.channel().send("first".to_string()).await.unwrap();
        events.pump(Duration::ZERO).await.unwrap();

        subscription.unsubscribe();
        assert_eq!(events.handler_count(), (1, 0));

        events.channel().send("second".to_string()).await.unwrap();
        events.pump(Duration::ZERO).await.unwrap();

        assert_eq!(*seen.lock(), vec!["first".to_string()]);
        assert_eq!(others.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_handler_registered_during_pump_waits_for_next_pump() {
        let events = Arc::new(adapter());
        let late_calls = Arc::new(AtomicUsize::new(0));

        let registrar = Arc::downgrade(&events);
        let counter = late_calls.clone();
        events.on_message(move |_| {
            if let Some(events) = registrar.upgrade() {
                let counter = counter.clone();
                events.on_message(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                });
            }
            Ok(())
        });

        events.channel().send("one".to_string()).await.unwrap();
        events.pump(Duration::ZERO).await.unwrap();
        assert_eq!(late_calls.load(Ordering::SeqCst), 0);

        events.channel().send("two".to_string()).await.unwrap();
        events.pump(Duration::ZERO).await.unwrap();
        assert_eq!(late_calls.load(Ordering::SeqCst), 1);
    }
}

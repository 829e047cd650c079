//! # Test Utilities
//!
//! Helpers shared by unit and integration tests: database URL discovery for the
//! PostgreSQL-backed tests, a fully provisioned in-memory broker, and an
//! in-process channel for exercising channel consumers without a store.

use crate::error::BrokerResult;
use crate::messaging::channel::MessageChannel;
use crate::messaging::ServiceBroker;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Database URL for PostgreSQL tests, if one is configured
///
/// `TEST_DATABASE_URL` wins over `DATABASE_URL`. Tests that need a database
/// skip themselves when this returns `None`.
pub fn get_test_database_url() -> Option<String> {
    env::var("TEST_DATABASE_URL")
        .or_else(|_| env::var("DATABASE_URL"))
        .ok()
}

/// In-memory broker with the broker feature enabled and the sink provisioned
pub async fn in_memory_broker() -> BrokerResult<ServiceBroker> {
    let broker = ServiceBroker::in_memory();
    broker.enable_broker().await?;
    broker.create_sink_service().await?;
    Ok(broker)
}

#[derive(Debug)]
struct InProcessState<T> {
    items: Mutex<VecDeque<T>>,
    arrived: Notify,
}

/// Process-local `MessageChannel` over a FIFO
///
/// Items are taken before the handler runs; a failing handler drops its item.
#[derive(Debug)]
pub struct InProcessChannel<T> {
    state: Arc<InProcessState<T>>,
}

impl<T> InProcessChannel<T> {
    pub fn new() -> Self {
        Self {
            state: Arc::new(InProcessState {
                items: Mutex::new(VecDeque::new()),
                arrived: Notify::new(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.state.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for InProcessChannel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for InProcessChannel<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

#[async_trait]
impl<T: Send + 'static> MessageChannel<T> for InProcessChannel<T> {
    async fn send(&self, item: T) -> BrokerResult<()> {
        self.state.items.lock().push_back(item);
        self.state.arrived.notify_one();
        Ok(())
    }

    async fn try_receive<F>(&self, timeout: Duration, handler: F) -> BrokerResult<bool>
    where
        F: FnOnce(T) -> BrokerResult<()> + Send,
    {
        let deadline = Instant::now() + timeout;
        let item = loop {
            let arrived = self.state.arrived.notified();
            tokio::pin!(arrived);
            arrived.as_mut().enable();

            if let Some(item) = self.state.items.lock().pop_front() {
                break item;
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            let _ = tokio::time::timeout_at(deadline, arrived).await;
        };

        handler(item)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_test_database_url_prefers_test_url() {
        if let Some(url) = get_test_database_url() {
            assert!(url.starts_with("postgres"));
        }
    }

    #[tokio::test]
    async fn test_in_process_channel_is_fifo() {
        let channel = InProcessChannel::new();
        channel.send(1).await.unwrap();
        channel.send(2).await.unwrap();

        let mut seen = Vec::new();
        while channel
            .try_receive(Duration::ZERO, |n| {
                seen.push(n);
                Ok(())
            })
            .await
            .unwrap()
        {}
        assert_eq!(seen, vec![1, 2]);
        assert!(channel.is_empty());
    }

    #[tokio::test]
    async fn test_in_process_channel_wakes_waiting_receiver() {
        let channel = InProcessChannel::new();
        let sender = channel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            sender.send("late".to_string()).await.unwrap();
        });

        let mut seen = None;
        assert!(channel
            .try_receive(Duration::from_secs(5), |s| {
                seen = Some(s);
                Ok(())
            })
            .await
            .unwrap());
        assert_eq!(seen.as_deref(), Some("late"));
    }

    #[tokio::test]
    async fn test_in_memory_broker_is_provisioned() {
        let broker = in_memory_broker().await.unwrap();
        assert!(broker.get_queues().await.unwrap().is_empty());
    }
}

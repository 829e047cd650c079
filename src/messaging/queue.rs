//! # Queue
//!
//! Receiving side of the broker. `try_receive` is the one place where a store
//! transaction spans user code: the message is claimed, the handler runs, and
//! whatever the handler buffered on its `Conversation` is applied before the
//! claim is committed. A failing handler rolls everything back and the message
//! becomes visible again.

use crate::error::BrokerResult;
use crate::messaging::conversation::Conversation;
use crate::messaging::statistics::QueueStatistics;
use crate::messaging::types::{ConversationHandle, MessageType, QueueMessage, Service};
use crate::store::QueueStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Named queue bound to a store
#[derive(Debug, Clone)]
pub struct Queue {
    store: Arc<dyn QueueStore>,
    name: String,
}

impl Queue {
    pub fn new(store: Arc<dyn QueueStore>, name: impl Into<String>) -> Self {
        Self {
            store,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bind a service to this queue, accepting conversations under `contract`
    pub async fn create_service(&self, name: &str, contract: &str) -> BrokerResult<Service> {
        self.store.create_service(name, &self.name, &[contract]).await?;
        Ok(Service::new(name))
    }

    /// Receive at most one message and hand it to `handler`
    ///
    /// Returns `Ok(false)` when nothing arrived within `timeout`, `Ok(true)`
    /// once the handler succeeded and its conversation operations were
    /// committed together with the receive. A handler error rolls the receive
    /// back and is returned unchanged. When `conversation` is set, only
    /// messages of that conversation are considered.
    pub async fn try_receive<F>(
        &self,
        timeout: Duration,
        conversation: Option<ConversationHandle>,
        handler: F,
    ) -> BrokerResult<bool>
    where
        F: FnOnce(&mut Conversation, &MessageType, &[u8]) -> BrokerResult<()> + Send,
    {
        let mut tx = self.store.begin().await?;

        let message = match tx.receive(&self.name, timeout, conversation).await {
            Ok(Some(message)) => message,
            Ok(None) => {
                tx.commit().await?;
                return Ok(false);
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(queue_name = %self.name, error = %rollback_err, "Rollback after failed receive also failed");
                }
                return Err(e);
            }
        };

        debug!(
            queue_name = %self.name,
            conversation = %message.conversation,
            message_type = %message.message_type,
            body_size = message.body.len(),
            "📥 Message received"
        );

        let mut buffered = Conversation::new(message.conversation);
        let outcome = match handler(&mut buffered, &message.message_type, &message.body) {
            Ok(()) => buffered.flush_into(tx.as_mut()).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => {
                tx.commit().await?;
                debug!(
                    queue_name = %self.name,
                    conversation = %message.conversation,
                    "✅ Receive committed"
                );
                Ok(true)
            }
            Err(e) => {
                warn!(
                    queue_name = %self.name,
                    conversation = %message.conversation,
                    message_type = %message.message_type,
                    error = %e,
                    "Receive rolled back, message stays on the queue"
                );
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(queue_name = %self.name, error = %rollback_err, "Rollback failed");
                }
                Err(e)
            }
        }
    }

    /// All pending messages, read outside any transaction
    pub async fn peek(&self) -> BrokerResult<Vec<QueueMessage>> {
        self.store.peek(&self.name).await
    }

    /// Pending message counts grouped by message type
    pub async fn statistics(&self) -> BrokerResult<QueueStatistics> {
        Ok(QueueStatistics::from_messages(&self.peek().await?))
    }

    pub(crate) fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }
}

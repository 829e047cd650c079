//! # Conversations
//!
//! A `Conversation` is a dialog handle plus an ordered buffer of operations.
//! Nothing a conversation records reaches the store until its owner flushes the
//! buffer: the receiving `Queue` flushes inside the receive transaction, and a
//! `ConversationEndpoint` flushes in a short transaction of its own on the send
//! path. A conversation therefore never commits anything by itself.

use crate::error::{BrokerError, BrokerResult};
use crate::messaging::types::{ConversationHandle, MessageType, Service};
use crate::store::{QueueStore, StoreTransaction};
use std::sync::Arc;
use tracing::{debug, warn};

/// Operation recorded on a conversation, applied when the owner flushes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationOperation {
    Send {
        message_type: MessageType,
        body: Vec<u8>,
    },
    End,
}

/// Dialog handle with buffered send and end operations
#[derive(Debug)]
pub struct Conversation {
    handle: ConversationHandle,
    pending: Vec<ConversationOperation>,
    ended: bool,
}

impl Conversation {
    pub(crate) fn new(handle: ConversationHandle) -> Self {
        Self {
            handle,
            pending: Vec::new(),
            ended: false,
        }
    }

    /// Stable identifier of this side of the dialog
    pub fn handle(&self) -> ConversationHandle {
        self.handle
    }

    /// Record a message to send on this conversation
    pub fn send(&mut self, message_type: &MessageType, body: impl Into<Vec<u8>>) {
        self.pending.push(ConversationOperation::Send {
            message_type: message_type.clone(),
            body: body.into(),
        });
    }

    /// Record the end of this side of the conversation
    pub fn end_conversation(&mut self) {
        if !self.ended {
            self.ended = true;
            self.pending.push(ConversationOperation::End);
        }
    }

    /// Whether an end has been recorded
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub fn pending_operations(&self) -> &[ConversationOperation] {
        &self.pending
    }

    /// Apply every buffered operation, in order, on an open transaction
    pub(crate) async fn flush_into(&mut self, tx: &mut dyn StoreTransaction) -> BrokerResult<()> {
        for operation in std::mem::take(&mut self.pending) {
            match operation {
                ConversationOperation::Send { message_type, body } => {
                    tx.send(self.handle, &message_type, &body).await?
                }
                ConversationOperation::End => tx.end_conversation(self.handle).await?,
            }
        }
        Ok(())
    }
}

/// Apply a conversation's buffered operations in a transaction of their own
pub(crate) async fn flush_conversation(
    store: &dyn QueueStore,
    conversation: &mut Conversation,
) -> BrokerResult<()> {
    if conversation.pending.is_empty() {
        return Ok(());
    }

    let mut tx = store.begin().await?;
    match conversation.flush_into(tx.as_mut()).await {
        Ok(()) => tx.commit().await,
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(
                    conversation = %conversation.handle,
                    error = %rollback_err,
                    "Rollback after failed conversation flush also failed"
                );
            }
            Err(e)
        }
    }
}

/// Factory for fresh conversations between two fixed services
#[derive(Debug, Clone)]
pub struct ConversationEndpoint {
    store: Arc<dyn QueueStore>,
    initiator: Service,
    target: Service,
    contract: String,
}

impl ConversationEndpoint {
    pub fn new(
        store: Arc<dyn QueueStore>,
        initiator: Service,
        target: Service,
        contract: impl Into<String>,
    ) -> Self {
        Self {
            store,
            initiator,
            target,
            contract: contract.into(),
        }
    }

    pub fn initiator(&self) -> &Service {
        &self.initiator
    }

    pub fn target(&self) -> &Service {
        &self.target
    }

    pub fn contract(&self) -> &str {
        &self.contract
    }

    /// Open a brand-new dialog; conversations are never reused
    pub async fn begin_conversation(&self) -> BrokerResult<Conversation> {
        let handle = self
            .store
            .begin_dialog(self.initiator.name(), self.target.name(), &self.contract)
            .await?;
        Ok(Conversation::new(handle))
    }

    /// Commit a conversation's buffered operations
    pub async fn flush(&self, conversation: &mut Conversation) -> BrokerResult<()> {
        flush_conversation(self.store.as_ref(), conversation).await
    }

    /// Send one message on a fresh conversation
    ///
    /// When the store rejects the send, the dialog opened for it is dropped
    /// without notifying the target, then the original error is returned.
    pub async fn send(
        &self,
        message_type: &MessageType,
        body: Vec<u8>,
    ) -> BrokerResult<ConversationHandle> {
        let mut conversation = self.begin_conversation().await?;
        conversation.send(message_type, body);

        if let Err(e) = self.flush(&mut conversation).await {
            self.abandon(conversation).await;
            return Err(e);
        }

        debug!(
            conversation = %conversation.handle(),
            message_type = %message_type,
            target = self.target.name(),
            "📤 Message sent"
        );
        Ok(conversation.handle())
    }

    async fn abandon(&self, conversation: Conversation) {
        if let Err(e) = self.store.abandon_dialog(conversation.handle()).await {
            warn!(
                conversation = %conversation.handle(),
                error = %e,
                "Failed to drop dialog after rejected send"
            );
        }
    }
}

impl From<&Conversation> for ConversationHandle {
    fn from(conversation: &Conversation) -> Self {
        conversation.handle()
    }
}

/// Fail fast when a handle no longer refers to an open endpoint
pub(crate) async fn ensure_open(
    store: &dyn QueueStore,
    handle: ConversationHandle,
) -> BrokerResult<()> {
    if store.conversation_exists(handle).await? {
        Ok(())
    } else {
        Err(BrokerError::conversation_not_found(handle))
    }
}

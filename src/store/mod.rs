//! # Transactional Queue Store
//!
//! The boundary between the broker layer and the store that owns durable
//! messages, dialogs, and contracts. The broker only ever talks to a store
//! through these two traits; `InMemoryStore` and `PostgresStore` implement them.
//!
//! A `StoreTransaction` is the unit of atomicity: a receive claims one message
//! and hides it from every other transaction until `commit` removes it or
//! `rollback` makes it visible again. Sends and conversation ends issued on the
//! same transaction take effect only on commit.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::InMemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;

use crate::error::BrokerResult;
use crate::messaging::types::{Contract, ConversationHandle, MessageType, QueueMessage, ReceivedMessage};
use async_trait::async_trait;
use std::fmt::Debug;
use std::time::Duration;

/// Catalog and non-transactional operations of a queue store
#[async_trait]
pub trait QueueStore: Send + Sync + Debug {
    /// One-time feature toggle on the containing store, idempotent
    async fn enable_broker(&self) -> BrokerResult<()>;

    /// Create a message type if it does not exist
    async fn create_message_type(&self, name: &str) -> BrokerResult<()>;

    /// Create a queue if it does not exist
    async fn create_queue(&self, name: &str) -> BrokerResult<()>;

    /// Drop every service bound to the queue, then the queue itself
    async fn delete_queue(&self, name: &str) -> BrokerResult<()>;

    /// Names of all queues, including reserved ones
    async fn queue_names(&self) -> BrokerResult<Vec<String>>;

    /// Create a contract if it does not exist
    async fn create_contract(&self, contract: &Contract) -> BrokerResult<()>;

    async fn contracts(&self) -> BrokerResult<Vec<Contract>>;

    async fn delete_contract(&self, name: &str) -> BrokerResult<()>;

    /// Create a service on a queue accepting the given contracts, idempotent
    async fn create_service(&self, name: &str, queue: &str, contracts: &[&str])
        -> BrokerResult<()>;

    /// Open a new dialog and return the initiator-side handle
    async fn begin_dialog(
        &self,
        from_service: &str,
        to_service: &str,
        contract: &str,
    ) -> BrokerResult<ConversationHandle>;

    /// Drop both endpoints of a dialog and their unread messages without
    /// notifying either side
    async fn abandon_dialog(&self, handle: ConversationHandle) -> BrokerResult<()>;

    /// Handle used by the other party of the same dialog, while it is open
    async fn paired_conversation(
        &self,
        handle: ConversationHandle,
    ) -> BrokerResult<Option<ConversationHandle>>;

    /// Whether the handle refers to an open conversation endpoint
    async fn conversation_exists(&self, handle: ConversationHandle) -> BrokerResult<bool>;

    /// All pending messages of a queue, read outside any transaction
    async fn peek(&self, queue: &str) -> BrokerResult<Vec<QueueMessage>>;

    /// Open a transaction the caller commits or rolls back
    async fn begin(&self) -> BrokerResult<Box<dyn StoreTransaction>>;

    /// Short name of the backend for logs
    fn store_type(&self) -> &'static str;
}

/// Operations executed under one store transaction
#[async_trait]
pub trait StoreTransaction: Send {
    /// Claim at most one message, waiting up to `timeout` for one to arrive
    async fn receive(
        &mut self,
        queue: &str,
        timeout: Duration,
        conversation: Option<ConversationHandle>,
    ) -> BrokerResult<Option<ReceivedMessage>>;

    /// Send on a conversation; rejected when the contract does not allow the type
    async fn send(
        &mut self,
        conversation: ConversationHandle,
        message_type: &MessageType,
        body: &[u8],
    ) -> BrokerResult<()>;

    /// End the local side of a conversation and notify the far side
    async fn end_conversation(&mut self, conversation: ConversationHandle) -> BrokerResult<()>;

    async fn commit(self: Box<Self>) -> BrokerResult<()>;

    async fn rollback(self: Box<Self>) -> BrokerResult<()>;
}

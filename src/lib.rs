#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Service Broker
//!
//! Conversation-based messaging channels over a transactional queue store.
//!
//! ## Overview
//!
//! A store supplies one primitive: receive a single message under a
//! transaction, waiting up to a timeout. This crate builds on it:
//!
//! - **Competing Consumers**: any number of receivers share a queue, each
//!   message is handled by exactly one of them
//! - **Atomic Receive**: replies and conversation ends recorded by a handler
//!   commit together with the receive, or not at all
//! - **Typed and Untyped Channels**: serde-based bodies with the message type
//!   carried next to the body
//! - **Request/Reply**: conversation-bound channels keep a dialog open across
//!   sends
//! - **Event Fan-out**: isolated multi-handler delivery over any channel
//! - **Queue Statistics**: pending counts per message type
//!
//! ## Module Organization
//!
//! - [`store`] - Store boundary with in-memory and PostgreSQL implementations
//! - [`messaging`] - Conversations, queues, channels, statistics and the broker facade
//! - [`events`] - Push-style adapter over channels
//! - [`config`] - Broker configuration
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use service_broker::{MessageChannel, ServiceBroker};
//! use std::time::Duration;
//!
//! # async fn example() -> service_broker::BrokerResult<()> {
//! let broker = ServiceBroker::in_memory();
//! broker.enable_broker().await?;
//!
//! let channel = broker.open_channel::<String>().await?;
//! channel.send("Hello World!".to_string()).await?;
//!
//! channel
//!     .try_receive(Duration::from_secs(1), |message| {
//!         println!("received {message}");
//!         Ok(())
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod logging;
pub mod messaging;
pub mod store;
pub mod test_utils;

pub use config::{BrokerConfig, StoreBackend};
pub use constants::{system, MessageDirection};
pub use error::{BrokerError, BrokerResult, HandlerError};
pub use events::{ChannelEventAdapter, HandlerFailure, HandlerId, Observer, Subscription};
pub use messaging::{
    Contract, Conversation, ConversationChannel, ConversationEndpoint, ConversationHandle,
    JsonMessageSerializer, MessageChannel, MessageSerializer, MessageType, Queue,
    QueueMessage, QueueStatistics, QueueStatisticsRow, ServiceBroker, Service, TypedChannel,
    UntypedChannel, UntypedChannelBuilder, UntypedMessage,
};
pub use store::{InMemoryStore, QueueStore, StoreTransaction};
#[cfg(feature = "postgres")]
pub use store::PostgresStore;

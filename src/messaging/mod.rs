//! # Messaging Module
//!
//! Conversation-based messaging over a transactional queue store: buffered
//! conversations, receive-side queues, typed and untyped channels, queue
//! statistics, and the `ServiceBroker` provisioning facade.

pub mod broker;
pub mod channel;
pub mod conversation;
pub mod queue;
pub mod serializer;
pub mod statistics;
pub mod types;

pub use broker::ServiceBroker;
pub use channel::{
    ConversationChannel, MessageChannel, TypedChannel, UntypedChannel, UntypedChannelBuilder,
    UntypedMessage,
};
pub use conversation::{Conversation, ConversationEndpoint, ConversationOperation};
pub use queue::Queue;
pub use serializer::{JsonMessageSerializer, MessageSerializer};
pub use statistics::{QueueStatistics, QueueStatisticsRow};
pub use types::{
    Contract, ContractMessage, ConversationHandle, MessageType, QueueMessage, ReceivedMessage,
    Service,
};

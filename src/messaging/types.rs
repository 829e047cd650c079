//! # Broker Catalog Types
//!
//! Value types shared by the store boundary and the channel layer: message
//! types, contracts, services, conversation handles, and queue snapshots.

use crate::constants::{system, MessageDirection};
use crate::error::{BrokerError, BrokerResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use uuid::Uuid;

/// Name identifying the logical shape of a message body
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageType {
    name: Cow<'static, str>,
}

impl MessageType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Cow::Owned(name.into()),
        }
    }

    pub const fn from_static(name: &'static str) -> Self {
        Self {
            name: Cow::Borrowed(name),
        }
    }

    /// Message type named after the logical name of a Rust type
    ///
    /// The name comes from `std::any::type_name`, whose output is not
    /// guaranteed to be stable across compiler versions. Messages left in a
    /// durable store under one toolchain may carry a tag a later build no
    /// longer produces; use `MessageType::new` with an explicit name (and
    /// `ConversationChannel::send_as`) for types that must survive upgrades.
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self::from_static(std::any::type_name::<T>())
    }

    /// Delivered to the far endpoint when a conversation ends
    pub const END_DIALOG: MessageType = MessageType::from_static(system::END_DIALOG_MESSAGE_TYPE);

    pub const DEFAULT: MessageType = MessageType::from_static(system::DEFAULT_MESSAGE_TYPE);

    pub fn name(&self) -> &str {
        &self.name
    }

    /// System types are produced by the store, never by user code
    pub fn is_system(&self) -> bool {
        self.name() == system::END_DIALOG_MESSAGE_TYPE
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<&str> for MessageType {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// One message type declared on a contract, with the side allowed to send it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractMessage {
    pub message_type: MessageType,
    pub direction: MessageDirection,
}

/// Named, immutable set of message types two services may exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    name: String,
    messages: Vec<ContractMessage>,
}

impl Contract {
    /// Build a contract from the types each side may send
    ///
    /// A type that appears in both lists is recorded as sendable by either side.
    /// Fails with `ContractDefinition` when both lists are empty.
    pub fn new(
        name: impl Into<String>,
        sent_by_initiator: &[MessageType],
        sent_by_target: &[MessageType],
    ) -> BrokerResult<Self> {
        let name = name.into();
        let mut messages: Vec<ContractMessage> = Vec::new();

        let declared = sent_by_initiator
            .iter()
            .map(|t| (t, MessageDirection::Initiator))
            .chain(sent_by_target.iter().map(|t| (t, MessageDirection::Target)));

        for (message_type, direction) in declared {
            match messages.iter_mut().find(|m| &m.message_type == message_type) {
                Some(existing) => existing.direction = existing.direction.merge(direction),
                None => messages.push(ContractMessage {
                    message_type: message_type.clone(),
                    direction,
                }),
            }
        }

        Self::from_messages(name, messages)
    }

    /// Build a contract from already resolved declarations
    pub fn from_messages(
        name: impl Into<String>,
        messages: Vec<ContractMessage>,
    ) -> BrokerResult<Self> {
        let name = name.into();
        if messages.is_empty() {
            return Err(BrokerError::contract_definition(name));
        }
        Ok(Self { name, messages })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn messages(&self) -> &[ContractMessage] {
        &self.messages
    }

    /// Direction declared for a message type, if the contract carries it
    pub fn direction_of(&self, message_type: &MessageType) -> Option<MessageDirection> {
        self.messages
            .iter()
            .find(|m| &m.message_type == message_type)
            .map(|m| m.direction)
    }

    /// Whether the given side may send this message type
    ///
    /// The end-of-dialog system type is always allowed.
    pub fn permits(&self, message_type: &MessageType, from_initiator: bool) -> bool {
        message_type.is_system()
            || self
                .direction_of(message_type)
                .is_some_and(|d| d.allows(from_initiator))
    }
}

/// Named, queue-bound endpoint eligible to take part in conversations
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
}

impl Service {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Opaque identifier of one side of a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationHandle(Uuid);

impl ConversationHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ConversationHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConversationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A message dequeued under an open store transaction
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    /// Handle of the receiving side of the conversation
    pub conversation: ConversationHandle,
    pub message_type: MessageType,
    pub body: Vec<u8>,
}

/// Snapshot of a pending message, produced by a non-transactional peek
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessage {
    pub conversation: ConversationHandle,
    pub message_type: MessageType,
    pub body: Vec<u8>,
    pub enqueued_at: DateTime<Utc>,
}

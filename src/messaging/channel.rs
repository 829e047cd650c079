//! # Channels
//!
//! Channels put a serializer and a message type routing policy in front of a
//! `ConversationEndpoint` (send side) and a `Queue` (receive side).
//!
//! - `TypedChannel<T>` carries exactly one message type derived from `T`
//! - `UntypedChannel` carries any type registered on its builder and
//!   dispatches received bodies on the wire tag
//! - `ConversationChannel` is bound to one open conversation and keeps it open
//!   across sends until it is ended explicitly
//!
//! Typed and untyped channels open a fresh conversation per send and end it
//! after every successful receive. A received end-of-dialog is consumed by
//! ending the local side without calling the handler.

use crate::error::{BrokerError, BrokerResult};
use crate::messaging::conversation::{flush_conversation, Conversation, ConversationEndpoint};
use crate::messaging::queue::Queue;
use crate::messaging::serializer::{JsonMessageSerializer, MessageSerializer};
use crate::messaging::types::{ConversationHandle, MessageType};
use crate::store::QueueStore;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Send and receive values of `T` through the broker
#[async_trait]
pub trait MessageChannel<T>: Send + Sync
where
    T: Send + 'static,
{
    /// Send one item on a new conversation
    async fn send(&self, item: T) -> BrokerResult<()>;

    /// Receive at most one item within `timeout`
    ///
    /// `Ok(false)` means nothing arrived. A handler error rolls the receive
    /// back and is returned unchanged.
    async fn try_receive<F>(&self, timeout: Duration, handler: F) -> BrokerResult<bool>
    where
        F: FnOnce(T) -> BrokerResult<()> + Send;
}

/// Channel carrying a single message type
pub struct TypedChannel<T, S = JsonMessageSerializer> {
    endpoint: ConversationEndpoint,
    queue: Queue,
    serializer: S,
    message_type: MessageType,
    _item: PhantomData<fn() -> T>,
}

impl<T: 'static> TypedChannel<T, JsonMessageSerializer> {
    pub fn new(endpoint: ConversationEndpoint, queue: Queue) -> Self {
        Self::with_serializer(endpoint, queue, JsonMessageSerializer)
    }
}

impl<T: 'static, S: MessageSerializer> TypedChannel<T, S> {
    pub fn with_serializer(endpoint: ConversationEndpoint, queue: Queue, serializer: S) -> Self {
        Self {
            endpoint,
            queue,
            serializer,
            message_type: MessageType::of::<T>(),
            _item: PhantomData,
        }
    }

    pub fn message_type(&self) -> &MessageType {
        &self.message_type
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }
}

impl<T, S: Clone> Clone for TypedChannel<T, S> {
    fn clone(&self) -> Self {
        Self {
            endpoint: self.endpoint.clone(),
            queue: self.queue.clone(),
            serializer: self.serializer.clone(),
            message_type: self.message_type.clone(),
            _item: PhantomData,
        }
    }
}

impl<T, S: fmt::Debug> fmt::Debug for TypedChannel<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedChannel")
            .field("message_type", &self.message_type)
            .field("queue", &self.queue.name())
            .field("serializer", &self.serializer)
            .finish()
    }
}

#[async_trait]
impl<T, S> MessageChannel<T> for TypedChannel<T, S>
where
    T: Serialize + DeserializeOwned + Send + 'static,
    S: MessageSerializer,
{
    async fn send(&self, item: T) -> BrokerResult<()> {
        let body = self.serializer.serialize(&item)?;
        self.endpoint.send(&self.message_type, body).await?;
        Ok(())
    }

    async fn try_receive<F>(&self, timeout: Duration, handler: F) -> BrokerResult<bool>
    where
        F: FnOnce(T) -> BrokerResult<()> + Send,
    {
        let serializer = &self.serializer;
        let expected = &self.message_type;

        self.queue
            .try_receive(timeout, None, move |conversation, message_type, body| {
                if message_type.is_system() {
                    conversation.end_conversation();
                    return Ok(());
                }
                if message_type != expected {
                    return Err(BrokerError::unknown_message_type(message_type.name()));
                }
                handler(serializer.deserialize(body)?)?;
                conversation.end_conversation();
                Ok(())
            })
            .await
    }
}

type EncodeFn<S> = fn(&S, &(dyn Any + Send)) -> BrokerResult<Vec<u8>>;
type DecodeFn<S> = fn(&S, &[u8]) -> BrokerResult<Box<dyn Any + Send>>;

struct RegisteredType<S> {
    encode: EncodeFn<S>,
    decode: DecodeFn<S>,
}

impl<S> Clone for RegisteredType<S> {
    fn clone(&self) -> Self {
        Self {
            encode: self.encode,
            decode: self.decode,
        }
    }
}

fn encode_as<T, S>(serializer: &S, value: &(dyn Any + Send)) -> BrokerResult<Vec<u8>>
where
    T: Serialize + 'static,
    S: MessageSerializer,
{
    let item = value.downcast_ref::<T>().ok_or_else(|| {
        BrokerError::serialization(format!(
            "value is not a {}",
            std::any::type_name::<T>()
        ))
    })?;
    serializer.serialize(item)
}

fn decode_as<T, S>(serializer: &S, body: &[u8]) -> BrokerResult<Box<dyn Any + Send>>
where
    T: DeserializeOwned + Send + 'static,
    S: MessageSerializer,
{
    Ok(Box::new(serializer.deserialize::<T>(body)?))
}

/// A value received from or sent on an `UntypedChannel`, tagged with its type
#[derive(Debug)]
pub struct UntypedMessage {
    message_type: MessageType,
    value: Box<dyn Any + Send>,
}

impl UntypedMessage {
    pub fn new<T: Send + 'static>(value: T) -> Self {
        Self {
            message_type: MessageType::of::<T>(),
            value: Box::new(value),
        }
    }

    pub fn message_type(&self) -> &MessageType {
        &self.message_type
    }

    pub fn is<T: 'static>(&self) -> bool {
        self.value.is::<T>()
    }

    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Take the value out as `T`, or get the message back unchanged
    pub fn downcast<T: 'static>(self) -> Result<T, Self> {
        let message_type = self.message_type;
        match self.value.downcast::<T>() {
            Ok(value) => Ok(*value),
            Err(value) => Err(Self {
                message_type,
                value,
            }),
        }
    }

    pub fn into_parts(self) -> (MessageType, Box<dyn Any + Send>) {
        (self.message_type, self.value)
    }
}

/// Whitelist of the types an `UntypedChannel` may carry
pub struct UntypedChannelBuilder<S = JsonMessageSerializer> {
    name: String,
    serializer: S,
    registry: BTreeMap<MessageType, RegisteredType<S>>,
}

impl UntypedChannelBuilder<JsonMessageSerializer> {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_serializer(name, JsonMessageSerializer)
    }
}

impl<S: MessageSerializer> UntypedChannelBuilder<S> {
    pub fn with_serializer(name: impl Into<String>, serializer: S) -> Self {
        Self {
            name: name.into(),
            serializer,
            registry: BTreeMap::new(),
        }
    }

    /// Allow `T` on the channel under the tag `MessageType::of::<T>()`
    pub fn register<T>(mut self) -> Self
    where
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        self.registry.insert(
            MessageType::of::<T>(),
            RegisteredType {
                encode: encode_as::<T, S>,
                decode: decode_as::<T, S>,
            },
        );
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn message_types(&self) -> Vec<MessageType> {
        self.registry.keys().cloned().collect()
    }

    pub fn build(self, endpoint: ConversationEndpoint, queue: Queue) -> UntypedChannel<S> {
        UntypedChannel {
            name: self.name,
            endpoint,
            queue,
            serializer: self.serializer,
            registry: Arc::new(self.registry),
        }
    }
}

impl<S: fmt::Debug> fmt::Debug for UntypedChannelBuilder<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UntypedChannelBuilder")
            .field("name", &self.name)
            .field("message_types", &self.registry.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Channel carrying any registered type, dispatched on the wire tag
pub struct UntypedChannel<S = JsonMessageSerializer> {
    name: String,
    endpoint: ConversationEndpoint,
    queue: Queue,
    serializer: S,
    registry: Arc<BTreeMap<MessageType, RegisteredType<S>>>,
}

impl<S: MessageSerializer> UntypedChannel<S> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    pub fn supports(&self, message_type: &MessageType) -> bool {
        self.registry.contains_key(message_type)
    }

    /// Send `item` tagged with `MessageType::of::<T>()`
    ///
    /// A store rejection of a type missing from the whitelist is reported as
    /// `UnsupportedMessageType`; any other failure is returned unchanged.
    pub async fn send<T>(&self, item: &T) -> BrokerResult<()>
    where
        T: Serialize + Sync + 'static,
    {
        let message_type = MessageType::of::<T>();
        let body = self.serializer.serialize(item)?;
        self.send_tagged(&message_type, body).await
    }

    async fn send_tagged(&self, message_type: &MessageType, body: Vec<u8>) -> BrokerResult<()> {
        match self.endpoint.send(message_type, body).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_type_constraint() && !self.supports(message_type) => {
                debug!(channel = %self.name, message_type = %message_type, "Unsupported type rejected");
                Err(BrokerError::unsupported_message_type(
                    message_type.name(),
                    &self.name,
                ))
            }
            Err(e) => Err(e),
        }
    }
}

impl<S: Clone> Clone for UntypedChannel<S> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            endpoint: self.endpoint.clone(),
            queue: self.queue.clone(),
            serializer: self.serializer.clone(),
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<S: fmt::Debug> fmt::Debug for UntypedChannel<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UntypedChannel")
            .field("name", &self.name)
            .field("queue", &self.queue.name())
            .field("message_types", &self.registry.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[async_trait]
impl<S: MessageSerializer> MessageChannel<UntypedMessage> for UntypedChannel<S> {
    async fn send(&self, item: UntypedMessage) -> BrokerResult<()> {
        let registered = self.registry.get(&item.message_type).cloned().ok_or_else(|| {
            BrokerError::unsupported_message_type(item.message_type.name(), &self.name)
        })?;
        let body = (registered.encode)(&self.serializer, item.value.as_ref())?;
        self.send_tagged(&item.message_type, body).await
    }

    async fn try_receive<F>(&self, timeout: Duration, handler: F) -> BrokerResult<bool>
    where
        F: FnOnce(UntypedMessage) -> BrokerResult<()> + Send,
    {
        let serializer = &self.serializer;
        let registry = &self.registry;

        self.queue
            .try_receive(timeout, None, move |conversation, message_type, body| {
                if message_type.is_system() {
                    conversation.end_conversation();
                    return Ok(());
                }
                let registered = registry
                    .get(message_type)
                    .ok_or_else(|| BrokerError::unknown_message_type(message_type.name()))?;
                let value = (registered.decode)(serializer, body)?;
                handler(UntypedMessage {
                    message_type: message_type.clone(),
                    value,
                })?;
                conversation.end_conversation();
                Ok(())
            })
            .await
    }
}

/// Channel bound to one open conversation
///
/// Used for request/reply: the initiator keeps sending on the same dialog and
/// receives only the replies addressed to it.
#[derive(Debug, Clone)]
pub struct ConversationChannel<S = JsonMessageSerializer> {
    store: Arc<dyn QueueStore>,
    handle: ConversationHandle,
    queue: Queue,
    serializer: S,
}

impl ConversationChannel<JsonMessageSerializer> {
    /// `queue` must be the queue of the service owning `handle`
    pub fn new(handle: ConversationHandle, queue: Queue) -> Self {
        Self::with_serializer(handle, queue, JsonMessageSerializer)
    }
}

impl<S: MessageSerializer> ConversationChannel<S> {
    pub fn with_serializer(handle: ConversationHandle, queue: Queue, serializer: S) -> Self {
        Self {
            store: Arc::clone(queue.store()),
            handle,
            queue,
            serializer,
        }
    }

    pub fn handle(&self) -> ConversationHandle {
        self.handle
    }

    /// Whether this side of the conversation is still open
    pub async fn is_open(&self) -> BrokerResult<bool> {
        self.store.conversation_exists(self.handle).await
    }

    /// Send `item` tagged with `MessageType::of::<T>()`, keeping the dialog open
    pub async fn send<T>(&self, item: &T) -> BrokerResult<()>
    where
        T: Serialize + Sync + 'static,
    {
        self.send_as(&MessageType::of::<T>(), item).await
    }

    /// Send `item` under an explicit message type, keeping the dialog open
    pub async fn send_as<T>(&self, message_type: &MessageType, item: &T) -> BrokerResult<()>
    where
        T: Serialize + Sync + ?Sized,
    {
        let mut conversation = Conversation::new(self.handle);
        conversation.send(message_type, self.serializer.serialize(item)?);
        flush_conversation(self.store.as_ref(), &mut conversation).await
    }

    /// End this side; the far side receives an end-of-dialog
    pub async fn end_conversation(&self) -> BrokerResult<()> {
        let mut conversation = Conversation::new(self.handle);
        conversation.end_conversation();
        flush_conversation(self.store.as_ref(), &mut conversation).await
    }

    /// Receive at most one message of this conversation tagged `MessageType::of::<T>()`
    ///
    /// A received end-of-dialog ends the local side and reports `true`
    /// without calling the handler; `is_open` tells the two apart.
    pub async fn try_receive<T, F>(&self, timeout: Duration, handler: F) -> BrokerResult<bool>
    where
        T: DeserializeOwned + 'static,
        F: FnOnce(T) -> BrokerResult<()> + Send,
    {
        self.try_receive_as(&MessageType::of::<T>(), timeout, handler)
            .await
    }

    /// Receive at most one message of this conversation tagged `message_type`
    ///
    /// Any other tag fails with `UnknownMessageType` and stays on the queue.
    pub async fn try_receive_as<T, F>(
        &self,
        message_type: &MessageType,
        timeout: Duration,
        handler: F,
    ) -> BrokerResult<bool>
    where
        T: DeserializeOwned,
        F: FnOnce(T) -> BrokerResult<()> + Send,
    {
        let serializer = &self.serializer;

        self.queue
            .try_receive(timeout, Some(self.handle), move |conversation, received, body| {
                if received.is_system() {
                    conversation.end_conversation();
                    return Ok(());
                }
                if received != message_type {
                    return Err(BrokerError::unknown_message_type(received.name()));
                }
                handler(serializer.deserialize(body)?)
            })
            .await
    }
}

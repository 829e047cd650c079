//! # Service Broker
//!
//! Management surface over a `QueueStore`: provisioning of message types,
//! queues, contracts and services, conversation bootstrap, and the helpers that
//! open fully provisioned channels.
//!
//! Channels opened here use the sink service as initiator. Every send starts a
//! dialog from the sink, and the end-of-dialog coming back from the receiving
//! side is drained by the store so no initiator-side state accumulates.

use crate::config::{BrokerConfig, StoreBackend};
use crate::constants::system;
use crate::error::{BrokerError, BrokerResult};
use crate::logging::log_provisioning_operation;
use crate::messaging::channel::{
    ConversationChannel, TypedChannel, UntypedChannel, UntypedChannelBuilder,
};
use crate::messaging::conversation::{
    ensure_open, flush_conversation, Conversation, ConversationEndpoint,
};
use crate::messaging::queue::Queue;
use crate::messaging::serializer::MessageSerializer;
use crate::messaging::types::{Contract, ConversationHandle, MessageType, Service};
use crate::store::{InMemoryStore, QueueStore};
use std::sync::Arc;
use tracing::info;

/// Entry point for provisioning and opening channels
#[derive(Debug, Clone)]
pub struct ServiceBroker {
    store: Arc<dyn QueueStore>,
}

impl ServiceBroker {
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self { store }
    }

    /// Broker over a fresh process-local store
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryStore::new()))
    }

    /// Broker over the store selected by `config`
    pub async fn from_config(config: &BrokerConfig) -> BrokerResult<Self> {
        config.validate()?;
        match config.backend {
            StoreBackend::Memory => Ok(Self::in_memory()),
            #[cfg(feature = "postgres")]
            StoreBackend::Postgres => {
                let store = crate::store::PostgresStore::connect(
                    &config.database_url,
                    config.max_connections,
                )
                .await?
                .with_poll_interval(std::time::Duration::from_millis(config.poll_interval_ms));
                Ok(Self::new(Arc::new(store)))
            }
            #[cfg(not(feature = "postgres"))]
            StoreBackend::Postgres => Err(BrokerError::configuration(
                "backend",
                "postgres backend requires the `postgres` feature",
            )),
        }
    }

    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    pub async fn enable_broker(&self) -> BrokerResult<()> {
        self.store.enable_broker().await?;
        info!(store_type = self.store.store_type(), "🚀 Service broker enabled");
        Ok(())
    }

    pub async fn create_message_type(&self, name: &str) -> BrokerResult<MessageType> {
        self.store.create_message_type(name).await?;
        Ok(MessageType::new(name))
    }

    /// Create the queue if needed and return a handle to it
    pub async fn create_queue(&self, name: &str) -> BrokerResult<Queue> {
        self.store.create_queue(name).await?;
        log_provisioning_operation("create_queue", name, "created", None);
        Ok(self.queue(name))
    }

    /// Handle to a queue without provisioning it
    pub fn queue(&self, name: &str) -> Queue {
        Queue::new(Arc::clone(&self.store), name)
    }

    /// Drop the queue together with every service bound to it
    pub async fn delete_queue(&self, name: &str) -> BrokerResult<()> {
        self.store.delete_queue(name).await?;
        log_provisioning_operation("delete_queue", name, "deleted", Some("bound services dropped"));
        Ok(())
    }

    /// Names of all user queues; the sink queue is not listed
    pub async fn get_queues(&self) -> BrokerResult<Vec<String>> {
        let mut names = self.store.queue_names().await?;
        names.retain(|name| name != system::SINK_QUEUE_NAME);
        Ok(names)
    }

    /// Create a contract from the types each side may send
    ///
    /// A contract without message types is rejected before the store is touched.
    pub async fn create_contract(
        &self,
        name: &str,
        sent_by_initiator: &[MessageType],
        sent_by_target: &[MessageType],
    ) -> BrokerResult<Contract> {
        let contract = Contract::new(name, sent_by_initiator, sent_by_target)?;
        self.store.create_contract(&contract).await?;
        log_provisioning_operation("create_contract", name, "created", None);
        Ok(contract)
    }

    pub async fn get_contracts(&self) -> BrokerResult<Vec<Contract>> {
        self.store.contracts().await
    }

    pub async fn delete_contract(&self, name: &str) -> BrokerResult<()> {
        self.store.delete_contract(name).await?;
        log_provisioning_operation("delete_contract", name, "deleted", None);
        Ok(())
    }

    /// Provision the reserved sink queue and service
    pub async fn create_sink_service(&self) -> BrokerResult<Service> {
        self.store.create_queue(system::SINK_QUEUE_NAME).await?;
        self.store
            .create_service(system::SINK_SERVICE_NAME, system::SINK_QUEUE_NAME, &[])
            .await?;
        Ok(Service::new(system::SINK_SERVICE_NAME))
    }

    pub fn endpoint(&self, from: &Service, to: &Service, contract: &str) -> ConversationEndpoint {
        ConversationEndpoint::new(Arc::clone(&self.store), from.clone(), to.clone(), contract)
    }

    /// Open a brand-new dialog from `from` to `to`
    pub async fn begin_conversation(
        &self,
        from: &Service,
        to: &Service,
        contract: &str,
    ) -> BrokerResult<Conversation> {
        self.endpoint(from, to, contract).begin_conversation().await
    }

    /// Re-attach to an open conversation by handle
    pub async fn open_conversation(&self, handle: ConversationHandle) -> BrokerResult<Conversation> {
        ensure_open(self.store.as_ref(), handle).await?;
        Ok(Conversation::new(handle))
    }

    /// Handle of the far side of a conversation, while it is open
    pub async fn paired_conversation(
        &self,
        handle: ConversationHandle,
    ) -> BrokerResult<Option<ConversationHandle>> {
        self.store.paired_conversation(handle).await
    }

    /// Commit the operations buffered on a conversation
    pub async fn flush(&self, conversation: &mut Conversation) -> BrokerResult<()> {
        flush_conversation(self.store.as_ref(), conversation).await
    }

    /// Open a channel for `T`, provisioning everything it needs
    ///
    /// The message type, contract, queue and service are all named after
    /// `MessageType::of::<T>()`.
    pub async fn open_channel<T: 'static>(&self) -> BrokerResult<TypedChannel<T>> {
        let message_type = MessageType::of::<T>();
        let (endpoint, queue) = self
            .provision_channel(message_type.name(), std::slice::from_ref(&message_type))
            .await?;
        Ok(TypedChannel::new(endpoint, queue))
    }

    /// Open a channel carrying every type registered on `builder`
    pub async fn open_untyped_channel<S: MessageSerializer>(
        &self,
        builder: UntypedChannelBuilder<S>,
    ) -> BrokerResult<UntypedChannel<S>> {
        let message_types = builder.message_types();
        if message_types.is_empty() {
            return Err(BrokerError::contract_definition(builder.name()));
        }
        let name = builder.name().to_string();
        let (endpoint, queue) = self.provision_channel(&name, &message_types).await?;
        Ok(builder.build(endpoint, queue))
    }

    /// Channel bound to an open conversation whose local side lives on `queue`
    pub fn conversation_channel(
        &self,
        handle: ConversationHandle,
        queue: &Queue,
    ) -> ConversationChannel {
        ConversationChannel::new(handle, queue.clone())
    }

    async fn provision_channel(
        &self,
        name: &str,
        message_types: &[MessageType],
    ) -> BrokerResult<(ConversationEndpoint, Queue)> {
        for message_type in message_types {
            self.store.create_message_type(message_type.name()).await?;
        }
        let contract = self.create_contract(name, message_types, &[]).await?;
        let sink = self.create_sink_service().await?;
        let queue = self.create_queue(name).await?;
        let service = queue.create_service(name, contract.name()).await?;

        log_provisioning_operation(
            "open_channel",
            name,
            "ready",
            Some(&format!("{} message type(s)", message_types.len())),
        );
        Ok((self.endpoint(&sink, &service, contract.name()), queue))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::channel::MessageChannel;
    use std::time::Duration;

    #[tokio::test]
    async fn test_get_queues_hides_sink() {
        let broker = ServiceBroker::in_memory();
        broker.create_sink_service().await.unwrap();
        broker.create_queue("Work").await.unwrap();

        assert_eq!(broker.get_queues().await.unwrap(), vec!["Work".to_string()]);
    }

    #[tokio::test]
    async fn test_empty_contract_leaves_store_untouched() {
        let broker = ServiceBroker::in_memory();
        let err = broker.create_contract("Empty", &[], &[]).await.unwrap_err();
        assert!(matches!(err, BrokerError::ContractDefinition { .. }));
        assert!(broker.get_contracts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_open_channel_is_idempotent() {
        let broker = ServiceBroker::in_memory();
        let initiator = broker.open_channel::<String>().await.unwrap();
        let target = broker.open_channel::<String>().await.unwrap();

        initiator.send("Hello World!".to_string()).await.unwrap();
        let mut received = None;
        assert!(target
            .try_receive(Duration::from_secs(1), |s| {
                received = Some(s);
                Ok(())
            })
            .await
            .unwrap());
        assert_eq!(received.as_deref(), Some("Hello World!"));
        assert_eq!(broker.get_contracts().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_open_conversation_requires_open_dialog() {
        let broker = ServiceBroker::in_memory();
        let err = broker
            .open_conversation(ConversationHandle::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::ConversationNotFound { .. }));
    }

    #[tokio::test]
    async fn test_untyped_channel_needs_registered_types() {
        let broker = ServiceBroker::in_memory();
        let err = broker
            .open_untyped_channel(UntypedChannelBuilder::new("Nothing"))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::ContractDefinition { .. }));
    }
}

//! # In-Memory Queue Store
//!
//! Process-local implementation of the store boundary with the same dialog,
//! contract and locking semantics as the PostgreSQL backend. Used by the test
//! suite and by callers that want a broker without a database.
//!
//! ## Key Features
//!
//! - **Competing Consumers**: a claimed message is invisible to every other
//!   transaction until its claimer commits or rolls back
//! - **Blocking Receive**: waiters park on a `tokio::sync::Notify` and wake on
//!   every commit, rollback, or catalog change
//! - **Atomic Commit**: buffered sends and ends are planned against the current
//!   state first and applied only when every operation is valid
//! - **Sink Draining**: messages routed to the sink queue are consumed on arrival

use super::{QueueStore, StoreTransaction};
use crate::constants::system;
use crate::error::{BrokerError, BrokerResult};
use crate::messaging::types::{
    Contract, ConversationHandle, MessageType, QueueMessage, ReceivedMessage,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct StoredMessage {
    conversation: ConversationHandle,
    message_type: MessageType,
    body: Vec<u8>,
    enqueued_at: DateTime<Utc>,
    claimed_by: Option<u64>,
}

#[derive(Debug)]
struct ServiceRecord {
    queue: String,
    contracts: BTreeSet<String>,
}

#[derive(Debug)]
struct EndpointRecord {
    peer: ConversationHandle,
    is_initiator: bool,
    service: String,
    contract: String,
}

#[derive(Debug, Default)]
struct StoreState {
    broker_enabled: bool,
    message_types: BTreeSet<String>,
    queues: BTreeMap<String, VecDeque<StoredMessage>>,
    contracts: BTreeMap<String, Contract>,
    services: BTreeMap<String, ServiceRecord>,
    endpoints: HashMap<ConversationHandle, EndpointRecord>,
    next_transaction_id: u64,
}

/// Effect of one buffered operation, computed before anything is applied
#[derive(Debug)]
enum Effect {
    Enqueue {
        queue: String,
        conversation: ConversationHandle,
        message_type: MessageType,
        body: Vec<u8>,
    },
    RemoveEndpoint(ConversationHandle),
}

#[derive(Debug)]
enum PendingOperation {
    Send {
        conversation: ConversationHandle,
        message_type: MessageType,
        body: Vec<u8>,
    },
    End(ConversationHandle),
}

impl StoreState {
    fn queue_of_service(&self, service: &str) -> BrokerResult<&str> {
        self.services
            .get(service)
            .map(|s| s.queue.as_str())
            .ok_or_else(|| BrokerError::service_not_found(service))
    }

    /// Validate a batch of operations and turn it into effects
    ///
    /// Endpoints ended earlier in the batch are treated as gone for later
    /// operations of the same batch.
    fn plan(&self, operations: &[PendingOperation]) -> BrokerResult<Vec<Effect>> {
        let mut ended: HashSet<ConversationHandle> = HashSet::new();
        let mut effects = Vec::with_capacity(operations.len());

        for operation in operations {
            match operation {
                PendingOperation::Send {
                    conversation,
                    message_type,
                    body,
                } => {
                    if ended.contains(conversation) {
                        return Err(BrokerError::conversation_ended(conversation));
                    }
                    let endpoint = self
                        .endpoints
                        .get(conversation)
                        .ok_or_else(|| BrokerError::conversation_not_found(conversation))?;
                    let contract = self
                        .contracts
                        .get(&endpoint.contract)
                        .ok_or_else(|| BrokerError::contract_not_found(&endpoint.contract))?;
                    if message_type.is_system() || !contract.permits(message_type, endpoint.is_initiator)
                    {
                        return Err(BrokerError::message_type_not_in_contract(
                            message_type.name(),
                            contract.name(),
                        ));
                    }
                    if ended.contains(&endpoint.peer) || !self.endpoints.contains_key(&endpoint.peer) {
                        return Err(BrokerError::conversation_ended(conversation));
                    }
                    effects.extend(self.deliver(endpoint.peer, message_type, body)?);
                }
                PendingOperation::End(conversation) => {
                    if !ended.insert(*conversation) {
                        continue;
                    }
                    let endpoint = self
                        .endpoints
                        .get(conversation)
                        .ok_or_else(|| BrokerError::conversation_not_found(conversation))?;
                    effects.push(Effect::RemoveEndpoint(*conversation));
                    if ended.contains(&endpoint.peer) {
                        continue;
                    }
                    // A far side whose service is gone has nobody left to notify
                    if let Ok(notify) = self.deliver(endpoint.peer, &MessageType::END_DIALOG, &[]) {
                        if notify
                            .iter()
                            .any(|e| matches!(e, Effect::RemoveEndpoint(h) if *h == endpoint.peer))
                        {
                            ended.insert(endpoint.peer);
                        }
                        effects.extend(notify);
                    }
                }
            }
        }

        Ok(effects)
    }

    /// Route a message to the queue of the endpoint identified by `to`
    fn deliver(
        &self,
        to: ConversationHandle,
        message_type: &MessageType,
        body: &[u8],
    ) -> BrokerResult<Vec<Effect>> {
        let peer = self
            .endpoints
            .get(&to)
            .ok_or_else(|| BrokerError::conversation_not_found(to))?;
        let queue = self.queue_of_service(&peer.service)?;

        if queue == system::SINK_QUEUE_NAME {
            // The sink consumes on arrival: end-of-dialog closes its side, anything else is dropped
            return Ok(if message_type.is_system() {
                vec![Effect::RemoveEndpoint(to)]
            } else {
                Vec::new()
            });
        }

        if !self.queues.contains_key(queue) {
            return Err(BrokerError::queue_not_found(queue));
        }

        Ok(vec![Effect::Enqueue {
            queue: queue.to_string(),
            conversation: to,
            message_type: message_type.clone(),
            body: body.to_vec(),
        }])
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Enqueue {
                    queue,
                    conversation,
                    message_type,
                    body,
                } => {
                    let message = StoredMessage {
                        conversation,
                        message_type,
                        body,
                        enqueued_at: Utc::now(),
                        claimed_by: None,
                    };
                    if let Some(messages) = self.queues.get_mut(&queue) {
                        messages.push_back(message);
                    }
                }
                Effect::RemoveEndpoint(handle) => {
                    if let Some(endpoint) = self.endpoints.remove(&handle) {
                        // Unclaimed messages addressed to a closed endpoint can never be received
                        if let Some(queue) = self.services.get(&endpoint.service).map(|s| s.queue.clone()) {
                            if let Some(messages) = self.queues.get_mut(&queue) {
                                messages.retain(|m| m.conversation != handle || m.claimed_by.is_some());
                            }
                        }
                    }
                }
            }
        }
    }

    fn claim(
        &mut self,
        transaction_id: u64,
        queue: &str,
        conversation: Option<ConversationHandle>,
    ) -> BrokerResult<Option<ReceivedMessage>> {
        let messages = self
            .queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::queue_not_found(queue))?;

        let candidate = messages.iter_mut().find(|m| {
            m.claimed_by.is_none() && conversation.map_or(true, |c| m.conversation == c)
        });

        Ok(candidate.map(|message| {
            message.claimed_by = Some(transaction_id);
            ReceivedMessage {
                conversation: message.conversation,
                message_type: message.message_type.clone(),
                body: message.body.clone(),
            }
        }))
    }

    fn release_claims(&mut self, transaction_id: u64) {
        for messages in self.queues.values_mut() {
            for message in messages.iter_mut() {
                if message.claimed_by == Some(transaction_id) {
                    message.claimed_by = None;
                }
            }
        }
    }

    fn remove_claimed(&mut self, transaction_id: u64) {
        for messages in self.queues.values_mut() {
            messages.retain(|m| m.claimed_by != Some(transaction_id));
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<StoreState>,
    changed: Notify,
}

/// In-memory store implementation
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    shared: Arc<Shared>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `enable_broker` has been called on this store
    pub fn is_broker_enabled(&self) -> bool {
        self.shared.state.lock().broker_enabled
    }

    /// Number of open conversation endpoints
    pub fn open_endpoint_count(&self) -> usize {
        self.shared.state.lock().endpoints.len()
    }
}

#[async_trait]
impl QueueStore for InMemoryStore {
    async fn enable_broker(&self) -> BrokerResult<()> {
        let mut state = self.shared.state.lock();
        if !state.broker_enabled {
            state.broker_enabled = true;
            for reserved in [system::END_DIALOG_MESSAGE_TYPE, system::DEFAULT_MESSAGE_TYPE] {
                state.message_types.insert(reserved.to_string());
            }
            info!("Broker enabled on in-memory store");
        }
        Ok(())
    }

    async fn create_message_type(&self, name: &str) -> BrokerResult<()> {
        if self.shared.state.lock().message_types.insert(name.to_string()) {
            debug!(message_type = name, "Message type created");
        }
        Ok(())
    }

    async fn create_queue(&self, name: &str) -> BrokerResult<()> {
        let mut state = self.shared.state.lock();
        if !state.queues.contains_key(name) {
            state.queues.insert(name.to_string(), VecDeque::new());
            debug!(queue_name = name, "Queue created");
        }
        Ok(())
    }

    async fn delete_queue(&self, name: &str) -> BrokerResult<()> {
        {
            let mut guard = self.shared.state.lock();
            let state = &mut *guard;
            if state.queues.remove(name).is_none() {
                return Err(BrokerError::queue_not_found(name));
            }
            state.services.retain(|_, service| service.queue != name);
            // Endpoints of dropped services can never receive again
            let services = &state.services;
            state
                .endpoints
                .retain(|_, endpoint| services.contains_key(&endpoint.service));
            warn!(queue_name = name, "Queue dropped with its services");
        }
        self.shared.changed.notify_waiters();
        Ok(())
    }

    async fn queue_names(&self) -> BrokerResult<Vec<String>> {
        Ok(self.shared.state.lock().queues.keys().cloned().collect())
    }

    async fn create_contract(&self, contract: &Contract) -> BrokerResult<()> {
        let mut state = self.shared.state.lock();
        if state.contracts.contains_key(contract.name()) {
            return Ok(());
        }
        if let Some(missing) = contract
            .messages()
            .iter()
            .find(|m| !state.message_types.contains(m.message_type.name()))
        {
            return Err(BrokerError::unknown_message_type(missing.message_type.name()));
        }
        state
            .contracts
            .insert(contract.name().to_string(), contract.clone());
        debug!(contract = contract.name(), "Contract created");
        Ok(())
    }

    async fn contracts(&self) -> BrokerResult<Vec<Contract>> {
        Ok(self.shared.state.lock().contracts.values().cloned().collect())
    }

    async fn delete_contract(&self, name: &str) -> BrokerResult<()> {
        let mut state = self.shared.state.lock();
        if state.contracts.remove(name).is_none() {
            return Err(BrokerError::contract_not_found(name));
        }
        for service in state.services.values_mut() {
            service.contracts.remove(name);
        }
        Ok(())
    }

    async fn create_service(
        &self,
        name: &str,
        queue: &str,
        contracts: &[&str],
    ) -> BrokerResult<()> {
        let mut state = self.shared.state.lock();
        if state.services.contains_key(name) {
            return Ok(());
        }
        if !state.queues.contains_key(queue) {
            return Err(BrokerError::queue_not_found(queue));
        }
        if let Some(missing) = contracts
            .iter()
            .copied()
            .find(|c| !state.contracts.contains_key(*c))
        {
            return Err(BrokerError::contract_not_found(missing));
        }
        state.services.insert(
            name.to_string(),
            ServiceRecord {
                queue: queue.to_string(),
                contracts: contracts.iter().map(|c| c.to_string()).collect(),
            },
        );
        debug!(service = name, queue_name = queue, "Service created");
        Ok(())
    }

    async fn begin_dialog(
        &self,
        from_service: &str,
        to_service: &str,
        contract: &str,
    ) -> BrokerResult<ConversationHandle> {
        let mut state = self.shared.state.lock();
        if !state.services.contains_key(from_service) {
            return Err(BrokerError::service_not_found(from_service));
        }
        let target = state
            .services
            .get(to_service)
            .ok_or_else(|| BrokerError::service_not_found(to_service))?;
        if !state.contracts.contains_key(contract) {
            return Err(BrokerError::contract_not_found(contract));
        }
        if !target.contracts.contains(contract) {
            return Err(BrokerError::contract_not_accepted(to_service, contract));
        }

        let conversation_id = Uuid::new_v4();
        let initiator = ConversationHandle::new();
        let target = ConversationHandle::new();
        state.endpoints.insert(
            initiator,
            EndpointRecord {
                peer: target,
                is_initiator: true,
                service: from_service.to_string(),
                contract: contract.to_string(),
            },
        );
        state.endpoints.insert(
            target,
            EndpointRecord {
                peer: initiator,
                is_initiator: false,
                service: to_service.to_string(),
                contract: contract.to_string(),
            },
        );

        debug!(
            %conversation_id,
            from_service,
            to_service,
            contract,
            "Dialog started"
        );
        Ok(initiator)
    }

    async fn abandon_dialog(&self, handle: ConversationHandle) -> BrokerResult<()> {
        {
            let mut state = self.shared.state.lock();
            let peer = state
                .endpoints
                .get(&handle)
                .map(|endpoint| endpoint.peer)
                .ok_or_else(|| BrokerError::conversation_not_found(handle))?;
            // Both sides go at once so neither is told about the other
            state.apply(vec![Effect::RemoveEndpoint(handle), Effect::RemoveEndpoint(peer)]);
            debug!(conversation = %handle, "Dialog abandoned");
        }
        self.shared.changed.notify_waiters();
        Ok(())
    }

    async fn paired_conversation(
        &self,
        handle: ConversationHandle,
    ) -> BrokerResult<Option<ConversationHandle>> {
        let state = self.shared.state.lock();
        let endpoint = state
            .endpoints
            .get(&handle)
            .ok_or_else(|| BrokerError::conversation_not_found(handle))?;
        Ok(state
            .endpoints
            .contains_key(&endpoint.peer)
            .then_some(endpoint.peer))
    }

    async fn conversation_exists(&self, handle: ConversationHandle) -> BrokerResult<bool> {
        Ok(self.shared.state.lock().endpoints.contains_key(&handle))
    }

    async fn peek(&self, queue: &str) -> BrokerResult<Vec<QueueMessage>> {
        let state = self.shared.state.lock();
        let messages = state
            .queues
            .get(queue)
            .ok_or_else(|| BrokerError::queue_not_found(queue))?;
        Ok(messages
            .iter()
            .map(|m| QueueMessage {
                conversation: m.conversation,
                message_type: m.message_type.clone(),
                body: m.body.clone(),
                enqueued_at: m.enqueued_at,
            })
            .collect())
    }

    async fn begin(&self) -> BrokerResult<Box<dyn StoreTransaction>> {
        let id = {
            let mut state = self.shared.state.lock();
            state.next_transaction_id += 1;
            state.next_transaction_id
        };
        Ok(Box::new(MemoryTransaction {
            id,
            shared: Arc::clone(&self.shared),
            pending: Vec::new(),
            finished: false,
        }))
    }

    fn store_type(&self) -> &'static str {
        "in_memory"
    }
}

/// Transaction over the in-memory store
///
/// Dropping an unfinished transaction releases its claims like a rollback.
struct MemoryTransaction {
    id: u64,
    shared: Arc<Shared>,
    pending: Vec<PendingOperation>,
    finished: bool,
}

impl MemoryTransaction {
    fn release(&mut self) {
        if !self.finished {
            self.finished = true;
            self.shared.state.lock().release_claims(self.id);
            self.shared.changed.notify_waiters();
        }
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn receive(
        &mut self,
        queue: &str,
        timeout: Duration,
        conversation: Option<ConversationHandle>,
    ) -> BrokerResult<Option<ReceivedMessage>> {
        let deadline = Instant::now() + timeout;

        loop {
            let notified = self.shared.changed.notified();
            tokio::pin!(notified);
            // Register interest before looking so a commit in between is not missed
            notified.as_mut().enable();

            if let Some(message) = self.shared.state.lock().claim(self.id, queue, conversation)? {
                return Ok(Some(message));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            let _ = tokio::time::timeout_at(deadline, notified).await;
        }
    }

    async fn send(
        &mut self,
        conversation: ConversationHandle,
        message_type: &MessageType,
        body: &[u8],
    ) -> BrokerResult<()> {
        let operation = PendingOperation::Send {
            conversation,
            message_type: message_type.clone(),
            body: body.to_vec(),
        };
        // Surface contract violations at send time, not at commit
        let mut batch = std::mem::take(&mut self.pending);
        batch.push(operation);
        let planned = self.shared.state.lock().plan(&batch).map(|_| ());
        if planned.is_err() {
            batch.pop();
        }
        self.pending = batch;
        planned
    }

    async fn end_conversation(&mut self, conversation: ConversationHandle) -> BrokerResult<()> {
        if !self.shared.state.lock().endpoints.contains_key(&conversation) {
            return Err(BrokerError::conversation_not_found(conversation));
        }
        self.pending.push(PendingOperation::End(conversation));
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> BrokerResult<()> {
        let result = {
            let mut state = self.shared.state.lock();
            match state.plan(&self.pending) {
                Ok(effects) => {
                    state.remove_claimed(self.id);
                    state.apply(effects);
                    Ok(())
                }
                Err(e) => {
                    state.release_claims(self.id);
                    Err(e)
                }
            }
        };
        self.finished = true;
        self.shared.changed.notify_waiters();
        result
    }

    async fn rollback(mut self: Box<Self>) -> BrokerResult<()> {
        self.pending.clear();
        self.release();
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_with_dialog() -> (InMemoryStore, ConversationHandle) {
        let store = InMemoryStore::new();
        store.create_message_type("Work").await.unwrap();
        store.create_queue("WorkQueue").await.unwrap();
        store.create_queue("ClientQueue").await.unwrap();
        let contract = Contract::new("WorkContract", &[MessageType::new("Work")], &[]).unwrap();
        store.create_contract(&contract).await.unwrap();
        store
            .create_service("Worker", "WorkQueue", &["WorkContract"])
            .await
            .unwrap();
        store.create_service("Client", "ClientQueue", &[]).await.unwrap();
        let handle = store
            .begin_dialog("Client", "Worker", "WorkContract")
            .await
            .unwrap();
        (store, handle)
    }

    async fn send(store: &InMemoryStore, handle: ConversationHandle, body: &[u8]) {
        let mut tx = store.begin().await.unwrap();
        tx.send(handle, &MessageType::new("Work"), body).await.unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_send_is_invisible_until_commit() {
        let (store, handle) = store_with_dialog().await;

        let mut tx = store.begin().await.unwrap();
        tx.send(handle, &MessageType::new("Work"), b"one").await.unwrap();
        assert!(store.peek("WorkQueue").await.unwrap().is_empty());

        tx.commit().await.unwrap();
        let pending = store.peek("WorkQueue").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].body, b"one");
    }

    #[tokio::test]
    async fn test_claimed_message_hidden_from_other_transactions() {
        let (store, handle) = store_with_dialog().await;
        send(&store, handle, b"one").await;

        let mut first = store.begin().await.unwrap();
        let claimed = first
            .receive("WorkQueue", Duration::ZERO, None)
            .await
            .unwrap();
        assert!(claimed.is_some());

        let mut second = store.begin().await.unwrap();
        let nothing = second
            .receive("WorkQueue", Duration::ZERO, None)
            .await
            .unwrap();
        assert!(nothing.is_none());

        first.rollback().await.unwrap();
        let again = second
            .receive("WorkQueue", Duration::ZERO, None)
            .await
            .unwrap();
        assert!(again.is_some());
        second.commit().await.unwrap();

        assert!(store.peek("WorkQueue").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dropped_transaction_releases_claim() {
        let (store, handle) = store_with_dialog().await;
        send(&store, handle, b"one").await;

        {
            let mut tx = store.begin().await.unwrap();
            assert!(tx
                .receive("WorkQueue", Duration::ZERO, None)
                .await
                .unwrap()
                .is_some());
        }

        let mut tx = store.begin().await.unwrap();
        assert!(tx
            .receive("WorkQueue", Duration::ZERO, None)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_receive_wakes_on_commit() {
        let (store, handle) = store_with_dialog().await;

        let receiver = {
            let store = store.clone();
            tokio::spawn(async move {
                let mut tx = store.begin().await.unwrap();
                let received = tx
                    .receive("WorkQueue", Duration::from_secs(5), None)
                    .await
                    .unwrap();
                tx.commit().await.unwrap();
                received
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        send(&store, handle, b"late").await;

        let received = receiver.await.unwrap().expect("message should arrive");
        assert_eq!(received.body, b"late");
    }

    #[tokio::test]
    async fn test_send_direction_enforced() {
        let (store, handle) = store_with_dialog().await;
        let target = store.paired_conversation(handle).await.unwrap().unwrap();

        let mut tx = store.begin().await.unwrap();
        let err = tx
            .send(target, &MessageType::new("Work"), b"wrong way")
            .await
            .unwrap_err();
        assert!(err.is_type_constraint());

        let err = tx
            .send(handle, &MessageType::new("Other"), b"unknown")
            .await
            .unwrap_err();
        assert!(err.is_type_constraint());
    }

    #[tokio::test]
    async fn test_end_conversation_notifies_peer() {
        let (store, handle) = store_with_dialog().await;
        let target = store.paired_conversation(handle).await.unwrap().unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.end_conversation(target).await.unwrap();
        tx.commit().await.unwrap();

        let pending = store.peek("ClientQueue").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].message_type, MessageType::END_DIALOG);
        assert_eq!(pending[0].conversation, handle);
        assert_eq!(store.paired_conversation(handle).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_queue_cascades_to_services() {
        let (store, handle) = store_with_dialog().await;
        assert_eq!(store.open_endpoint_count(), 2);
        store.delete_queue("WorkQueue").await.unwrap();

        assert!(!store.queue_names().await.unwrap().contains(&"WorkQueue".to_string()));
        // Only the client side of the dialog survives
        assert_eq!(store.open_endpoint_count(), 1);
        assert_eq!(store.paired_conversation(handle).await.unwrap(), None);

        let mut tx = store.begin().await.unwrap();
        let err = tx
            .send(handle, &MessageType::new("Work"), b"orphan")
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::ConversationEnded { .. }));

        let err = store
            .begin_dialog("Client", "Worker", "WorkContract")
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::ServiceNotFound { .. }));
    }

    #[tokio::test]
    async fn test_abandon_dialog_notifies_nobody() {
        let (store, handle) = store_with_dialog().await;
        send(&store, handle, b"unread").await;

        store.abandon_dialog(handle).await.unwrap();

        assert_eq!(store.open_endpoint_count(), 0);
        assert!(store.peek("WorkQueue").await.unwrap().is_empty());
        assert!(store.peek("ClientQueue").await.unwrap().is_empty());
        let err = store.abandon_dialog(handle).await.unwrap_err();
        assert!(matches!(err, BrokerError::ConversationNotFound { .. }));
    }

    #[tokio::test]
    async fn test_enable_broker_registers_reserved_types() {
        let store = InMemoryStore::new();
        assert!(!store.is_broker_enabled());
        let contract = Contract::new("Plain", &[MessageType::DEFAULT], &[]).unwrap();
        assert!(store.create_contract(&contract).await.is_err());

        store.enable_broker().await.unwrap();
        store.enable_broker().await.unwrap();

        assert!(store.is_broker_enabled());
        store.create_contract(&contract).await.unwrap();
        assert_eq!(store.contracts().await.unwrap(), vec![contract]);
    }

    #[tokio::test]
    async fn test_create_service_requires_known_contracts() {
        let (store, _) = store_with_dialog().await;
        let err = store
            .create_service("Auditor", "WorkQueue", &["WorkContract", "Missing"])
            .await
            .unwrap_err();
        assert!(
            matches!(err, BrokerError::ContractNotFound { ref contract_name } if contract_name == "Missing")
        );
        store
            .create_service("Auditor", "WorkQueue", &["WorkContract"])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_contract_requires_known_message_types() {
        let store = InMemoryStore::new();
        let contract = Contract::new("Broken", &[MessageType::new("Missing")], &[]).unwrap();
        let err = store.create_contract(&contract).await.unwrap_err();
        assert!(matches!(err, BrokerError::UnknownMessageType { .. }));
    }
}

//! # PostgreSQL Queue Store
//!
//! sqlx backed implementation of the store boundary. The broker catalog
//! (message types, queues, contracts, services, conversation endpoints) and the
//! pending messages live in the `broker` schema, installed idempotently by
//! `enable_broker`.
//!
//! Receive claims one row with `FOR UPDATE SKIP LOCKED` and deletes it inside
//! the caller's transaction, so concurrent receivers never see the same row and
//! a rollback puts it back. Waiting is done by polling at `poll_interval` until
//! the timeout elapses.

use super::{QueueStore, StoreTransaction};
use crate::constants::{defaults, system, MessageDirection};
use crate::error::{BrokerError, BrokerResult};
use crate::messaging::types::{
    Contract, ContractMessage, ConversationHandle, MessageType, QueueMessage, ReceivedMessage,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{PgConnection, Postgres, Row, Transaction};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

const SCHEMA_STATEMENTS: &[&str] = &[
    "CREATE SCHEMA IF NOT EXISTS broker",
    "CREATE TABLE IF NOT EXISTS broker.message_types (
        name TEXT PRIMARY KEY
    )",
    "CREATE TABLE IF NOT EXISTS broker.queues (
        name TEXT PRIMARY KEY,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )",
    "CREATE TABLE IF NOT EXISTS broker.contracts (
        name TEXT PRIMARY KEY
    )",
    "CREATE TABLE IF NOT EXISTS broker.contract_message_types (
        contract_name TEXT NOT NULL REFERENCES broker.contracts(name) ON DELETE CASCADE,
        message_type TEXT NOT NULL REFERENCES broker.message_types(name),
        sent_by TEXT NOT NULL CHECK (sent_by IN ('initiator', 'target', 'any')),
        PRIMARY KEY (contract_name, message_type)
    )",
    "CREATE TABLE IF NOT EXISTS broker.services (
        name TEXT PRIMARY KEY,
        queue_name TEXT NOT NULL REFERENCES broker.queues(name) ON DELETE CASCADE
    )",
    "CREATE TABLE IF NOT EXISTS broker.service_contracts (
        service_name TEXT NOT NULL REFERENCES broker.services(name) ON DELETE CASCADE,
        contract_name TEXT NOT NULL REFERENCES broker.contracts(name) ON DELETE CASCADE,
        PRIMARY KEY (service_name, contract_name)
    )",
    "CREATE TABLE IF NOT EXISTS broker.conversation_endpoints (
        handle UUID PRIMARY KEY,
        conversation_id UUID NOT NULL,
        peer_handle UUID NOT NULL,
        is_initiator BOOLEAN NOT NULL,
        service_name TEXT NOT NULL,
        contract_name TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )",
    "CREATE TABLE IF NOT EXISTS broker.messages (
        id BIGSERIAL PRIMARY KEY,
        queue_name TEXT NOT NULL REFERENCES broker.queues(name) ON DELETE CASCADE,
        conversation_handle UUID NOT NULL,
        message_type TEXT NOT NULL,
        body BYTEA NOT NULL,
        enqueued_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )",
    "CREATE INDEX IF NOT EXISTS messages_queue_idx
        ON broker.messages (queue_name, id)",
    "CREATE INDEX IF NOT EXISTS messages_conversation_idx
        ON broker.messages (conversation_handle)",
];

/// Endpoint row as needed for routing
struct EndpointRow {
    peer_handle: Uuid,
    is_initiator: bool,
    contract_name: String,
}

/// PostgreSQL store implementation
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
    poll_interval: Duration,
}

impl PostgresStore {
    /// Connect using a connection string
    pub async fn connect(database_url: &str, max_connections: u32) -> BrokerResult<Self> {
        info!("🚀 Connecting broker store to PostgreSQL");

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("✅ Broker store connected");
        Ok(Self::new_with_pool(pool))
    }

    /// Create a store using an existing connection pool
    pub fn new_with_pool(pool: PgPool) -> Self {
        Self {
            pool,
            poll_interval: Duration::from_millis(defaults::POLL_INTERVAL_MS),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Get reference to underlying connection pool for advanced operations
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn execute_provisioning(&self, operation: &str, sql: &str, name: &str) -> BrokerResult<()> {
        sqlx::query(sql)
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| BrokerError::provisioning(operation, e.to_string()))?;
        Ok(())
    }
}

async fn load_endpoint(
    conn: &mut PgConnection,
    handle: ConversationHandle,
) -> BrokerResult<Option<EndpointRow>> {
    let row = sqlx::query(
        "SELECT peer_handle, is_initiator, contract_name
         FROM broker.conversation_endpoints WHERE handle = $1",
    )
    .bind(handle.as_uuid())
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(|r| EndpointRow {
        peer_handle: r.get("peer_handle"),
        is_initiator: r.get("is_initiator"),
        contract_name: r.get("contract_name"),
    }))
}

/// Queue of the service owning an endpoint
async fn endpoint_queue(conn: &mut PgConnection, handle: Uuid) -> BrokerResult<Option<String>> {
    let row = sqlx::query(
        "SELECT s.queue_name
         FROM broker.conversation_endpoints e
         JOIN broker.services s ON s.name = e.service_name
         WHERE e.handle = $1",
    )
    .bind(handle)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row.map(|r| r.get("queue_name")))
}

/// Remove an endpoint and every unread message addressed to it
async fn remove_endpoint(conn: &mut PgConnection, handle: Uuid) -> BrokerResult<()> {
    sqlx::query("DELETE FROM broker.messages WHERE conversation_handle = $1")
        .bind(handle)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM broker.conversation_endpoints WHERE handle = $1")
        .bind(handle)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Route a message to the queue of endpoint `to`, draining sink deliveries
async fn deliver(
    conn: &mut PgConnection,
    to: Uuid,
    message_type: &MessageType,
    body: &[u8],
) -> BrokerResult<()> {
    let queue = endpoint_queue(conn, to)
        .await?
        .ok_or_else(|| BrokerError::conversation_ended(to))?;

    if queue == system::SINK_QUEUE_NAME {
        if message_type.is_system() {
            remove_endpoint(conn, to).await?;
        }
        return Ok(());
    }

    sqlx::query(
        "INSERT INTO broker.messages (queue_name, conversation_handle, message_type, body)
         VALUES ($1, $2, $3, $4)",
    )
    .bind(&queue)
    .bind(to)
    .bind(message_type.name())
    .bind(body)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[async_trait]
impl QueueStore for PostgresStore {
    async fn enable_broker(&self) -> BrokerResult<()> {
        info!("🏗️ Installing broker schema");
        let mut tx = self.pool.begin().await?;
        for statement in SCHEMA_STATEMENTS {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| BrokerError::provisioning("enable_broker", e.to_string()))?;
        }
        for reserved in [system::END_DIALOG_MESSAGE_TYPE, system::DEFAULT_MESSAGE_TYPE] {
            sqlx::query("INSERT INTO broker.message_types (name) VALUES ($1) ON CONFLICT DO NOTHING")
                .bind(reserved)
                .execute(&mut *tx)
                .await
                .map_err(|e| BrokerError::provisioning("enable_broker", e.to_string()))?;
        }
        tx.commit().await?;
        info!("✅ Broker schema installed");
        Ok(())
    }

    async fn create_message_type(&self, name: &str) -> BrokerResult<()> {
        self.execute_provisioning(
            "create_message_type",
            "INSERT INTO broker.message_types (name) VALUES ($1) ON CONFLICT DO NOTHING",
            name,
        )
        .await
    }

    async fn create_queue(&self, name: &str) -> BrokerResult<()> {
        debug!("📋 Creating queue: {}", name);
        self.execute_provisioning(
            "create_queue",
            "INSERT INTO broker.queues (name) VALUES ($1) ON CONFLICT DO NOTHING",
            name,
        )
        .await
    }

    async fn delete_queue(&self, name: &str) -> BrokerResult<()> {
        warn!("💥 Dropping queue: {}", name);
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "DELETE FROM broker.conversation_endpoints
             WHERE service_name IN (SELECT name FROM broker.services WHERE queue_name = $1)",
        )
        .bind(name)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM broker.services WHERE queue_name = $1")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM broker.queues WHERE name = $1")
            .bind(name)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if deleted == 0 {
            tx.rollback().await?;
            return Err(BrokerError::queue_not_found(name));
        }
        tx.commit().await?;
        Ok(())
    }

    async fn queue_names(&self) -> BrokerResult<Vec<String>> {
        let rows = sqlx::query("SELECT name FROM broker.queues ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| r.get("name")).collect())
    }

    async fn create_contract(&self, contract: &Contract) -> BrokerResult<()> {
        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query("INSERT INTO broker.contracts (name) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(contract.name())
            .execute(&mut *tx)
            .await
            .map_err(|e| BrokerError::provisioning("create_contract", e.to_string()))?
            .rows_affected();

        if inserted > 0 {
            for message in contract.messages() {
                sqlx::query(
                    "INSERT INTO broker.contract_message_types (contract_name, message_type, sent_by)
                     VALUES ($1, $2, $3)",
                )
                .bind(contract.name())
                .bind(message.message_type.name())
                .bind(message.direction.as_str())
                .execute(&mut *tx)
                .await
                .map_err(|e| BrokerError::provisioning("create_contract", e.to_string()))?;
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn contracts(&self) -> BrokerResult<Vec<Contract>> {
        let rows = sqlx::query(
            "SELECT contract_name, message_type, sent_by
             FROM broker.contract_message_types ORDER BY contract_name, message_type",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut grouped: BTreeMap<String, Vec<ContractMessage>> = BTreeMap::new();
        for row in rows {
            let sent_by: String = row.get("sent_by");
            let direction = MessageDirection::parse(&sent_by).ok_or_else(|| {
                BrokerError::database("contracts", format!("invalid direction {sent_by}"))
            })?;
            grouped
                .entry(row.get("contract_name"))
                .or_default()
                .push(ContractMessage {
                    message_type: MessageType::new(row.get::<String, _>("message_type")),
                    direction,
                });
        }

        grouped
            .into_iter()
            .map(|(name, messages)| Contract::from_messages(name, messages))
            .collect()
    }

    async fn delete_contract(&self, name: &str) -> BrokerResult<()> {
        let deleted = sqlx::query("DELETE FROM broker.contracts WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if deleted == 0 {
            return Err(BrokerError::contract_not_found(name));
        }
        Ok(())
    }

    async fn create_service(
        &self,
        name: &str,
        queue: &str,
        contracts: &[&str],
    ) -> BrokerResult<()> {
        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query(
            "INSERT INTO broker.services (name, queue_name) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(name)
        .bind(queue)
        .execute(&mut *tx)
        .await
        .map_err(|e| BrokerError::provisioning("create_service", e.to_string()))?
        .rows_affected();

        if inserted > 0 {
            for contract in contracts {
                sqlx::query(
                    "INSERT INTO broker.service_contracts (service_name, contract_name) VALUES ($1, $2)",
                )
                .bind(name)
                .bind(*contract)
                .execute(&mut *tx)
                .await
                .map_err(|e| BrokerError::provisioning("create_service", e.to_string()))?;
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn begin_dialog(
        &self,
        from_service: &str,
        to_service: &str,
        contract: &str,
    ) -> BrokerResult<ConversationHandle> {
        let mut tx = self.pool.begin().await?;

        let from_exists = sqlx::query("SELECT 1 FROM broker.services WHERE name = $1")
            .bind(from_service)
            .fetch_optional(&mut *tx)
            .await?
            .is_some();
        if !from_exists {
            return Err(BrokerError::service_not_found(from_service));
        }

        let accepts = sqlx::query(
            "SELECT EXISTS (
                SELECT 1 FROM broker.service_contracts
                WHERE service_name = $1 AND contract_name = $2
             ) AS accepts,
             EXISTS (SELECT 1 FROM broker.services WHERE name = $1) AS target_exists",
        )
        .bind(to_service)
        .bind(contract)
        .fetch_one(&mut *tx)
        .await?;
        if !accepts.get::<bool, _>("target_exists") {
            return Err(BrokerError::service_not_found(to_service));
        }
        if !accepts.get::<bool, _>("accepts") {
            return Err(BrokerError::contract_not_accepted(to_service, contract));
        }

        let conversation_id = Uuid::new_v4();
        let initiator = Uuid::new_v4();
        let target = Uuid::new_v4();
        for (handle, peer, is_initiator, service) in [
            (initiator, target, true, from_service),
            (target, initiator, false, to_service),
        ] {
            sqlx::query(
                "INSERT INTO broker.conversation_endpoints
                    (handle, conversation_id, peer_handle, is_initiator, service_name, contract_name)
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(handle)
            .bind(conversation_id)
            .bind(peer)
            .bind(is_initiator)
            .bind(service)
            .bind(contract)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!(%conversation_id, from_service, to_service, contract, "Dialog started");
        Ok(ConversationHandle::from_uuid(initiator))
    }

    async fn abandon_dialog(&self, handle: ConversationHandle) -> BrokerResult<()> {
        let mut tx = self.pool.begin().await?;
        let endpoint = load_endpoint(&mut *tx, handle)
            .await?
            .ok_or_else(|| BrokerError::conversation_not_found(handle))?;
        remove_endpoint(&mut *tx, handle.as_uuid()).await?;
        remove_endpoint(&mut *tx, endpoint.peer_handle).await?;
        tx.commit().await?;

        debug!(conversation = %handle, "Dialog abandoned");
        Ok(())
    }

    async fn paired_conversation(
        &self,
        handle: ConversationHandle,
    ) -> BrokerResult<Option<ConversationHandle>> {
        let mut conn = self.pool.acquire().await?;
        let endpoint = load_endpoint(&mut *conn, handle)
            .await?
            .ok_or_else(|| BrokerError::conversation_not_found(handle))?;

        let peer = sqlx::query("SELECT handle FROM broker.conversation_endpoints WHERE handle = $1")
            .bind(endpoint.peer_handle)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(peer.map(|r| ConversationHandle::from_uuid(r.get("handle"))))
    }

    async fn conversation_exists(&self, handle: ConversationHandle) -> BrokerResult<bool> {
        let mut conn = self.pool.acquire().await?;
        Ok(load_endpoint(&mut *conn, handle).await?.is_some())
    }

    async fn peek(&self, queue: &str) -> BrokerResult<Vec<QueueMessage>> {
        let exists = sqlx::query("SELECT 1 FROM broker.queues WHERE name = $1")
            .bind(queue)
            .fetch_optional(&self.pool)
            .await?
            .is_some();
        if !exists {
            return Err(BrokerError::queue_not_found(queue));
        }

        let rows = sqlx::query(
            "SELECT conversation_handle, message_type, body, enqueued_at
             FROM broker.messages WHERE queue_name = $1 ORDER BY id",
        )
        .bind(queue)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| QueueMessage {
                conversation: ConversationHandle::from_uuid(r.get("conversation_handle")),
                message_type: MessageType::new(r.get::<String, _>("message_type")),
                body: r.get("body"),
                enqueued_at: r.get::<DateTime<Utc>, _>("enqueued_at"),
            })
            .collect())
    }

    async fn begin(&self) -> BrokerResult<Box<dyn StoreTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PostgresTransaction {
            tx,
            poll_interval: self.poll_interval,
        }))
    }

    fn store_type(&self) -> &'static str {
        "postgres"
    }
}

/// Transaction over the PostgreSQL store
struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
    poll_interval: Duration,
}

impl PostgresTransaction {
    async fn try_claim(
        &mut self,
        queue: &str,
        conversation: Option<ConversationHandle>,
    ) -> BrokerResult<Option<ReceivedMessage>> {
        let row = sqlx::query(
            "DELETE FROM broker.messages
             WHERE id = (
                 SELECT id FROM broker.messages
                 WHERE queue_name = $1
                   AND ($2::uuid IS NULL OR conversation_handle = $2)
                 ORDER BY id
                 FOR UPDATE SKIP LOCKED
                 LIMIT 1
             )
             RETURNING conversation_handle, message_type, body",
        )
        .bind(queue)
        .bind(conversation.map(|c| c.as_uuid()))
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(row.map(|r| ReceivedMessage {
            conversation: ConversationHandle::from_uuid(r.get("conversation_handle")),
            message_type: MessageType::new(r.get::<String, _>("message_type")),
            body: r.get("body"),
        }))
    }
}

#[async_trait]
impl StoreTransaction for PostgresTransaction {
    async fn receive(
        &mut self,
        queue: &str,
        timeout: Duration,
        conversation: Option<ConversationHandle>,
    ) -> BrokerResult<Option<ReceivedMessage>> {
        let exists = sqlx::query("SELECT 1 FROM broker.queues WHERE name = $1")
            .bind(queue)
            .fetch_optional(&mut *self.tx)
            .await?
            .is_some();
        if !exists {
            return Err(BrokerError::queue_not_found(queue));
        }

        let deadline = Instant::now() + timeout;
        loop {
            if let Some(message) = self.try_claim(queue, conversation).await? {
                return Ok(Some(message));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn send(
        &mut self,
        conversation: ConversationHandle,
        message_type: &MessageType,
        body: &[u8],
    ) -> BrokerResult<()> {
        let endpoint = load_endpoint(&mut *self.tx, conversation)
            .await?
            .ok_or_else(|| BrokerError::conversation_not_found(conversation))?;

        let sent_by = sqlx::query(
            "SELECT sent_by FROM broker.contract_message_types
             WHERE contract_name = $1 AND message_type = $2",
        )
        .bind(&endpoint.contract_name)
        .bind(message_type.name())
        .fetch_optional(&mut *self.tx)
        .await?
        .and_then(|r| MessageDirection::parse(&r.get::<String, _>("sent_by")));

        let permitted = !message_type.is_system()
            && sent_by.is_some_and(|d| d.allows(endpoint.is_initiator));
        if !permitted {
            return Err(BrokerError::message_type_not_in_contract(
                message_type.name(),
                &endpoint.contract_name,
            ));
        }

        deliver(&mut *self.tx, endpoint.peer_handle, message_type, body)
            .await
            .map_err(|e| match e {
                BrokerError::ConversationEnded { .. } => BrokerError::conversation_ended(conversation),
                other => other,
            })
    }

    async fn end_conversation(&mut self, conversation: ConversationHandle) -> BrokerResult<()> {
        let endpoint = load_endpoint(&mut *self.tx, conversation)
            .await?
            .ok_or_else(|| BrokerError::conversation_not_found(conversation))?;

        remove_endpoint(&mut *self.tx, conversation.as_uuid()).await?;

        // A far side that already ended or lost its service has nobody to notify
        match deliver(&mut *self.tx, endpoint.peer_handle, &MessageType::END_DIALOG, &[]).await {
            Ok(()) | Err(BrokerError::ConversationEnded { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn commit(self: Box<Self>) -> BrokerResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> BrokerResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

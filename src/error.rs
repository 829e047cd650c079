//! # Broker Error Types
//!
//! Structured error handling for the broker layer using thiserror. Store and
//! transport failures propagate unchanged; the only reclassification performed
//! by this crate is `MessageTypeNotInContract` → `UnsupportedMessageType` on
//! untyped channels.

use thiserror::Error;

/// Boxed error raised by user supplied handlers
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Comprehensive broker error types
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Provisioning failed: {operation}: {message}")]
    Provisioning { operation: String, message: String },

    #[error("Contract {contract} must declare at least one message type")]
    ContractDefinition { contract: String },

    #[error("Message type {message_type} is not supported by channel {channel}")]
    UnsupportedMessageType {
        message_type: String,
        channel: String,
    },

    #[error("Message type {message_type} is not allowed on contract {contract} in this direction")]
    MessageTypeNotInContract {
        message_type: String,
        contract: String,
    },

    #[error("Unknown message type: {message_type}")]
    UnknownMessageType { message_type: String },

    #[error("Queue not found: {queue_name}")]
    QueueNotFound { queue_name: String },

    #[error("Service not found: {service_name}")]
    ServiceNotFound { service_name: String },

    #[error("Contract not found: {contract_name}")]
    ContractNotFound { contract_name: String },

    #[error("Service {service_name} does not accept contract {contract_name}")]
    ContractNotAccepted {
        service_name: String,
        contract_name: String,
    },

    #[error("Conversation not found: {handle}")]
    ConversationNotFound { handle: String },

    #[error("Conversation already ended: {handle}")]
    ConversationEnded { handle: String },

    #[error("Message serialization error: {message}")]
    Serialization { message: String },

    #[error("Message deserialization error: {message}")]
    Deserialization { message: String },

    #[error("Database error: {operation}: {message}")]
    Database { operation: String, message: String },

    #[error("Configuration error: {component}: {message}")]
    Configuration { component: String, message: String },

    #[error("Handler failed: {0}")]
    Handler(#[source] HandlerError),
}

impl BrokerError {
    /// Create a provisioning error
    pub fn provisioning(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provisioning {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a contract definition error
    pub fn contract_definition(contract: impl Into<String>) -> Self {
        Self::ContractDefinition {
            contract: contract.into(),
        }
    }

    /// Create an unsupported message type error
    pub fn unsupported_message_type(
        message_type: impl Into<String>,
        channel: impl Into<String>,
    ) -> Self {
        Self::UnsupportedMessageType {
            message_type: message_type.into(),
            channel: channel.into(),
        }
    }

    /// Create a contract constraint rejection
    pub fn message_type_not_in_contract(
        message_type: impl Into<String>,
        contract: impl Into<String>,
    ) -> Self {
        Self::MessageTypeNotInContract {
            message_type: message_type.into(),
            contract: contract.into(),
        }
    }

    pub fn unknown_message_type(message_type: impl Into<String>) -> Self {
        Self::UnknownMessageType {
            message_type: message_type.into(),
        }
    }

    pub fn queue_not_found(queue_name: impl Into<String>) -> Self {
        Self::QueueNotFound {
            queue_name: queue_name.into(),
        }
    }

    pub fn service_not_found(service_name: impl Into<String>) -> Self {
        Self::ServiceNotFound {
            service_name: service_name.into(),
        }
    }

    pub fn contract_not_found(contract_name: impl Into<String>) -> Self {
        Self::ContractNotFound {
            contract_name: contract_name.into(),
        }
    }

    pub fn contract_not_accepted(
        service_name: impl Into<String>,
        contract_name: impl Into<String>,
    ) -> Self {
        Self::ContractNotAccepted {
            service_name: service_name.into(),
            contract_name: contract_name.into(),
        }
    }

    pub fn conversation_not_found(handle: impl ToString) -> Self {
        Self::ConversationNotFound {
            handle: handle.to_string(),
        }
    }

    pub fn conversation_ended(handle: impl ToString) -> Self {
        Self::ConversationEnded {
            handle: handle.to_string(),
        }
    }

    /// Create a message serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a message deserialization error
    pub fn deserialization(message: impl Into<String>) -> Self {
        Self::Deserialization {
            message: message.into(),
        }
    }

    /// Create a database error
    pub fn database(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Database {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Wrap an error raised inside a receive or pump handler
    pub fn handler(error: impl Into<HandlerError>) -> Self {
        Self::Handler(error.into())
    }

    /// True when the store rejected a send because of a contract constraint
    pub fn is_type_constraint(&self) -> bool {
        matches!(self, Self::MessageTypeNotInContract { .. })
    }
}

/// Conversion from sqlx::Error to BrokerError
impl From<sqlx::Error> for BrokerError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => BrokerError::database("query", "No rows found"),
            sqlx::Error::Database(db_err) => BrokerError::database("database", db_err.to_string()),
            sqlx::Error::PoolTimedOut => {
                BrokerError::database("pool", "Timed out acquiring a connection")
            }
            sqlx::Error::PoolClosed => BrokerError::database("pool", "Database pool is closed"),
            sqlx::Error::Configuration(config_err) => {
                BrokerError::configuration("database", config_err.to_string())
            }
            _ => BrokerError::database("connection", err.to_string()),
        }
    }
}

/// Conversion from serde_json::Error to BrokerError
impl From<serde_json::Error> for BrokerError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_syntax() || err.is_data() || err.is_eof() {
            BrokerError::deserialization(err.to_string())
        } else {
            BrokerError::serialization(err.to_string())
        }
    }
}

impl From<config::ConfigError> for BrokerError {
    fn from(err: config::ConfigError) -> Self {
        BrokerError::configuration("config", err.to_string())
    }
}

/// Result type alias for broker operations
pub type BrokerResult<T> = Result<T, BrokerError>;

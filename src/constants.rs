//! # System Constants
//!
//! Reserved names and operational defaults shared by the broker facade and the
//! store implementations.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Reserved catalog objects that every store recognizes
pub mod system {
    /// Initiator-side service used to originate one-shot sends
    pub const SINK_SERVICE_NAME: &str = "ServiceBroker.SinkService";
    /// Queue backing the sink service; drained by the store as messages arrive
    pub const SINK_QUEUE_NAME: &str = "SinkQueue";
    /// Message type delivered to the far side when a conversation endpoint ends
    pub const END_DIALOG_MESSAGE_TYPE: &str = "ServiceBroker/EndDialog";
    /// Message type every enabled store knows without provisioning
    pub const DEFAULT_MESSAGE_TYPE: &str = "DEFAULT";
}

/// Operational defaults
pub mod defaults {
    /// Receive timeout used by callers that do not pass one explicitly
    pub const RECEIVE_TIMEOUT_MS: u64 = 5_000;
    /// Interval between claim attempts for stores without push notification
    pub const POLL_INTERVAL_MS: u64 = 50;
    pub const MAX_CONNECTIONS: u32 = 10;
    pub const DATABASE_URL: &str = "postgresql://localhost/service_broker_development";
}

/// Direction in which a message type may be sent within a contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageDirection {
    /// Only the side that began the dialog may send it
    Initiator,
    /// Only the side that accepted the dialog may send it
    Target,
    /// Either side may send it
    Any,
}

impl MessageDirection {
    /// Whether a message with this direction may be sent from the given side
    pub fn allows(self, from_initiator: bool) -> bool {
        match self {
            MessageDirection::Any => true,
            MessageDirection::Initiator => from_initiator,
            MessageDirection::Target => !from_initiator,
        }
    }

    /// Combine two declarations for the same message type
    pub fn merge(self, other: MessageDirection) -> MessageDirection {
        if self == other {
            self
        } else {
            MessageDirection::Any
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageDirection::Initiator => "initiator",
            MessageDirection::Target => "target",
            MessageDirection::Any => "any",
        }
    }

    pub fn parse(value: &str) -> Option<MessageDirection> {
        match value {
            "initiator" => Some(MessageDirection::Initiator),
            "target" => Some(MessageDirection::Target),
            "any" => Some(MessageDirection::Any),
            _ => None,
        }
    }
}

impl fmt::Display for MessageDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_allows() {
        assert!(MessageDirection::Initiator.allows(true));
        assert!(!MessageDirection::Initiator.allows(false));
        assert!(MessageDirection::Target.allows(false));
        assert!(!MessageDirection::Target.allows(true));
        assert!(MessageDirection::Any.allows(true));
        assert!(MessageDirection::Any.allows(false));
    }

    #[test]
    fn test_direction_merge() {
        assert_eq!(
            MessageDirection::Initiator.merge(MessageDirection::Target),
            MessageDirection::Any
        );
        assert_eq!(
            MessageDirection::Target.merge(MessageDirection::Target),
            MessageDirection::Target
        );
    }

    #[test]
    fn test_direction_string_mapping() {
        for direction in [
            MessageDirection::Initiator,
            MessageDirection::Target,
            MessageDirection::Any,
        ] {
            assert_eq!(MessageDirection::parse(direction.as_str()), Some(direction));
        }
        assert_eq!(MessageDirection::parse("sideways"), None);
    }
}

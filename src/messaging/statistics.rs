use crate::messaging::types::QueueMessage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Pending count of one message type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatisticsRow {
    pub message_type: String,
    pub count: usize,
}

/// Snapshot of a queue grouped by message type, ordered by type name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatistics {
    counts: BTreeMap<String, usize>,
    captured_at: DateTime<Utc>,
}

impl QueueStatistics {
    pub fn from_messages(messages: &[QueueMessage]) -> Self {
        let mut counts = BTreeMap::new();
        for message in messages {
            *counts
                .entry(message.message_type.name().to_string())
                .or_insert(0) += 1;
        }
        Self {
            counts,
            captured_at: Utc::now(),
        }
    }

    /// Total of all per-type counts
    pub fn message_count(&self) -> usize {
        self.counts.values().sum()
    }

    pub fn get(&self, message_type: &str) -> Option<QueueStatisticsRow> {
        self.counts.get(message_type).map(|count| QueueStatisticsRow {
            message_type: message_type.to_string(),
            count: *count,
        })
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = QueueStatisticsRow> + '_ {
        self.counts.iter().map(|(name, count)| QueueStatisticsRow {
            message_type: name.clone(),
            count: *count,
        })
    }
}

impl IntoIterator for QueueStatistics {
    type Item = QueueStatisticsRow;
    type IntoIter = std::vec::IntoIter<QueueStatisticsRow>;

    fn into_iter(self) -> Self::IntoIter {
        self.counts
            .into_iter()
            .map(|(message_type, count)| QueueStatisticsRow {
                message_type,
                count,
            })
            .collect::<Vec<_>>()
            .into_iter()
    }
}

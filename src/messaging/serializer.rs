//! # Message Serializer
//!
//! Converts domain values to and from the self-describing byte body carried by
//! every message. The type tag travels next to the body as a `MessageType`.

use crate::error::BrokerResult;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

/// Body codec used by channels
pub trait MessageSerializer: Clone + Debug + Send + Sync + 'static {
    fn serialize<T: Serialize + ?Sized>(&self, item: &T) -> BrokerResult<Vec<u8>>;

    fn deserialize<T: DeserializeOwned>(&self, body: &[u8]) -> BrokerResult<T>;
}

/// UTF-8 JSON bodies without byte order mark
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMessageSerializer;

impl MessageSerializer for JsonMessageSerializer {
    fn serialize<T: Serialize + ?Sized>(&self, item: &T) -> BrokerResult<Vec<u8>> {
        Ok(serde_json::to_vec(item)?)
    }

    fn deserialize<T: DeserializeOwned>(&self, body: &[u8]) -> BrokerResult<T> {
        Ok(serde_json::from_slice(body)?)
    }
}

// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Storage Layer
//!
//! Bookkeeping of which user owns which exchanges and queues, and which
//! routing keys bind them. Rows are stored through injected
//! [`StorageAdapter`]s, one per record kind, and decoded into typed records.

mod adapter;
mod exchange;
mod memory;
mod queue;

pub use adapter::{Params, StorageAdapter};
pub use exchange::ExchangeStorage;
pub use memory::MemoryStorageAdapter;
pub use queue::QueueStorage;

#[cfg(test)]
pub use adapter::MockStorageAdapter;

use crate::errors::StorageError;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// An exchange owned by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeRecord {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
}

/// A queue owned by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueRecord {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
}

/// A binding between a queue and an exchange with a routing key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueRouterRecord {
    pub id: i64,
    pub queue_id: i64,
    pub exchange_id: i64,
    pub routing_key: String,
}

/// The adapters backing each record kind.
#[derive(Clone)]
pub struct StorageAdapters {
    pub exchanges: Arc<dyn StorageAdapter>,
    pub queues: Arc<dyn StorageAdapter>,
    pub queue_routers: Arc<dyn StorageAdapter>,
}

impl StorageAdapters {
    pub fn new(
        exchanges: Arc<dyn StorageAdapter>,
        queues: Arc<dyn StorageAdapter>,
        queue_routers: Arc<dyn StorageAdapter>,
    ) -> StorageAdapters {
        StorageAdapters {
            exchanges,
            queues,
            queue_routers,
        }
    }

    /// Three independent in-memory tables.
    pub fn in_memory() -> StorageAdapters {
        StorageAdapters {
            exchanges: Arc::new(MemoryStorageAdapter::new()),
            queues: Arc::new(MemoryStorageAdapter::new()),
            queue_routers: Arc::new(MemoryStorageAdapter::new()),
        }
    }
}

/// Turns a JSON object into adapter params. Anything else yields no params.
pub(crate) fn params(value: Value) -> Params {
    match value {
        Value::Object(map) => map,
        _ => Params::new(),
    }
}

pub(crate) fn decode<T: DeserializeOwned>(rows: Vec<Value>) -> Result<Vec<T>, StorageError> {
    rows.into_iter()
        .map(|row| {
            serde_json::from_value(row).map_err(|err| StorageError::InvalidRecord(err.to_string()))
        })
        .collect()
}

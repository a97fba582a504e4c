// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! In-memory storage adapter.
//!
//! Non-persistent table for tests and embedded use. Ids are assigned from an
//! increasing counter starting at 1.

use super::adapter::{Params, StorageAdapter};
use crate::errors::StorageError;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

pub const ID_COLUMN: &str = "id";

/// In-memory table.
pub struct MemoryStorageAdapter {
    rows: RwLock<Vec<Params>>,
    next_id: AtomicI64,
}

impl MemoryStorageAdapter {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(vec![]),
            next_id: AtomicI64::new(1),
        }
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

impl Default for MemoryStorageAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn matches(row: &Params, params: &Params) -> bool {
    params
        .iter()
        .all(|(column, value)| row.get(column) == Some(value))
}

#[async_trait]
impl StorageAdapter for MemoryStorageAdapter {
    async fn get(&self, params: &Params) -> Result<Vec<Value>, StorageError> {
        let rows = self.rows.read().await;

        Ok(rows
            .iter()
            .filter(|row| matches(row, params))
            .cloned()
            .map(Value::Object)
            .collect())
    }

    async fn add(&self, params: &Params) -> Result<(), StorageError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let mut row = params.clone();
        row.insert(ID_COLUMN.to_owned(), Value::from(id));

        debug!(id, "storing row");

        self.rows.write().await.push(row);
        Ok(())
    }

    async fn remove(&self, id: i64) -> Result<(), StorageError> {
        let id = Value::from(id);
        self.rows
            .write()
            .await
            .retain(|row| row.get(ID_COLUMN) != Some(&id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::params;
    use serde_json::json;

    #[tokio::test]
    async fn should_assign_increasing_ids() {
        let adapter = MemoryStorageAdapter::new();

        adapter.add(&params(json!({ "name": "a" }))).await.unwrap();
        adapter.add(&params(json!({ "name": "b" }))).await.unwrap();

        let rows = adapter.get(&Params::new()).await.unwrap();
        assert_eq!(
            rows,
            vec![json!({ "id": 1, "name": "a" }), json!({ "id": 2, "name": "b" })]
        );
    }

    #[tokio::test]
    async fn should_filter_on_every_param() {
        let adapter = MemoryStorageAdapter::new();
        adapter
            .add(&params(json!({ "queue_id": 1, "exchange_id": 1, "routing_key": "*" })))
            .await
            .unwrap();
        adapter
            .add(&params(json!({ "queue_id": 1, "exchange_id": 2, "routing_key": "*" })))
            .await
            .unwrap();

        let rows = adapter
            .get(&params(json!({ "queue_id": 1, "exchange_id": 2 })))
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], json!(2));
        assert_eq!(
            adapter.get(&params(json!({ "queue_id": 3 }))).await.unwrap(),
            Vec::<Value>::new()
        );
    }

    #[tokio::test]
    async fn should_remove_by_id() {
        let adapter = MemoryStorageAdapter::new();
        adapter.add(&params(json!({ "name": "a" }))).await.unwrap();
        adapter.add(&params(json!({ "name": "b" }))).await.unwrap();

        adapter.remove(1).await.unwrap();
        adapter.remove(42).await.unwrap();

        assert_eq!(adapter.len().await, 1);
        assert_eq!(
            adapter.get(&Params::new()).await.unwrap(),
            vec![json!({ "id": 2, "name": "b" })]
        );
    }
}

// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

use super::{decode, params, ExchangeRecord, QueueRecord, QueueStorage, StorageAdapters};
use crate::errors::StorageError;
use serde_json::json;
use tracing::debug;

/// Exchange bookkeeping on top of the exchanges adapter.
#[derive(Clone)]
pub struct ExchangeStorage {
    adapters: StorageAdapters,
}

impl ExchangeStorage {
    pub fn new(adapters: StorageAdapters) -> ExchangeStorage {
        ExchangeStorage { adapters }
    }

    /// Records a new exchange for `user_id`.
    ///
    /// Returns false when an exchange with the same name is already recorded.
    pub async fn add(&self, user_id: i64, name: &str) -> Result<bool, StorageError> {
        if self.get_by_name(name).await?.is_some() {
            debug!(name, "exchange already recorded");
            return Ok(false);
        }

        self.adapters
            .exchanges
            .add(&params(json!({ "user_id": user_id, "name": name })))
            .await?;

        Ok(true)
    }

    /// Removes the exchange record. Returns false when it doesn't exist.
    pub async fn remove(&self, id: i64) -> Result<bool, StorageError> {
        if self.get_by_id(id).await?.is_none() {
            return Ok(false);
        }

        self.adapters.exchanges.remove(id).await?;
        Ok(true)
    }

    pub async fn get_by_name(&self, name: &str) -> Result<Option<ExchangeRecord>, StorageError> {
        self.first(json!({ "name": name })).await
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<ExchangeRecord>, StorageError> {
        self.first(json!({ "id": id })).await
    }

    /// Queues bound to the exchange through at least one router.
    pub async fn get_queues(&self, id: i64) -> Result<Vec<QueueRecord>, StorageError> {
        QueueStorage::new(self.adapters.clone())
            .get_exchange_queues(id)
            .await
    }

    pub async fn get_user_exchanges(
        &self,
        user_id: i64,
    ) -> Result<Vec<ExchangeRecord>, StorageError> {
        let rows = self
            .adapters
            .exchanges
            .get(&params(json!({ "user_id": user_id })))
            .await?;

        decode(rows)
    }

    async fn first(
        &self,
        filter: serde_json::Value,
    ) -> Result<Option<ExchangeRecord>, StorageError> {
        let rows = self.adapters.exchanges.get(&params(filter)).await?;
        Ok(decode(rows)?.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MockStorageAdapter, StorageAdapter};
    use std::sync::Arc;

    #[tokio::test]
    async fn should_add_exchange_once() {
        let storage = ExchangeStorage::new(StorageAdapters::in_memory());

        assert!(storage.add(1, "user_1_events").await.unwrap());
        assert!(!storage.add(1, "user_1_events").await.unwrap());

        let record = storage.get_by_name("user_1_events").await.unwrap().unwrap();
        assert_eq!(
            record,
            ExchangeRecord {
                id: 1,
                user_id: 1,
                name: "user_1_events".to_owned()
            }
        );
        assert_eq!(storage.get_by_id(1).await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn should_list_user_exchanges() {
        let storage = ExchangeStorage::new(StorageAdapters::in_memory());
        storage.add(1, "user_1_events").await.unwrap();
        storage.add(2, "user_2_events").await.unwrap();
        storage.add(1, "user_1_audit").await.unwrap();

        let names: Vec<String> = storage
            .get_user_exchanges(1)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();

        assert_eq!(names, vec!["user_1_events", "user_1_audit"]);
        assert!(storage.get_user_exchanges(3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn should_not_remove_missing_exchange() {
        let storage = ExchangeStorage::new(StorageAdapters::in_memory());
        storage.add(1, "user_1_events").await.unwrap();

        assert!(!storage.remove(7).await.unwrap());
        assert!(storage.remove(1).await.unwrap());
        assert_eq!(storage.get_by_id(1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn should_reject_malformed_rows() {
        let mut exchanges = MockStorageAdapter::new();
        exchanges
            .expect_get()
            .returning(|_| Ok(vec![json!({ "id": "one", "name": "broken" })]));
        let exchanges: Arc<dyn StorageAdapter> = Arc::new(exchanges);

        let storage = ExchangeStorage::new(StorageAdapters::new(
            exchanges,
            Arc::new(crate::storage::MemoryStorageAdapter::new()),
            Arc::new(crate::storage::MemoryStorageAdapter::new()),
        ));

        let err = storage.get_by_id(1).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidRecord(_)));
    }

    #[tokio::test]
    async fn should_propagate_adapter_failures() {
        let mut exchanges = MockStorageAdapter::new();
        exchanges.expect_get().returning(|_| Ok(vec![]));
        exchanges
            .expect_add()
            .returning(|_| Err(StorageError::AdapterError("connection refused".to_owned())));

        let storage = ExchangeStorage::new(StorageAdapters::new(
            Arc::new(exchanges),
            Arc::new(crate::storage::MemoryStorageAdapter::new()),
            Arc::new(crate::storage::MemoryStorageAdapter::new()),
        ));

        assert_eq!(
            storage.add(1, "user_1_events").await,
            Err(StorageError::AdapterError("connection refused".to_owned()))
        );
    }
}

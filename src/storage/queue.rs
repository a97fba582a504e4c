// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

use super::{decode, params, QueueRecord, QueueRouterRecord, StorageAdapters};
use crate::errors::StorageError;
use serde_json::{json, Value};
use std::collections::HashSet;
use tracing::debug;

/// Queue and queue router bookkeeping on top of the queues and
/// queue routers adapters.
#[derive(Clone)]
pub struct QueueStorage {
    adapters: StorageAdapters,
}

impl QueueStorage {
    pub fn new(adapters: StorageAdapters) -> QueueStorage {
        QueueStorage { adapters }
    }

    /// Records a new queue for `user_id`.
    ///
    /// Returns false when a queue with the same name is already recorded.
    pub async fn add_queue(&self, user_id: i64, name: &str) -> Result<bool, StorageError> {
        if self.get_by_name(name).await?.is_some() {
            debug!(name, "queue already recorded");
            return Ok(false);
        }

        self.adapters
            .queues
            .add(&params(json!({ "user_id": user_id, "name": name })))
            .await?;

        Ok(true)
    }

    /// Records a router between a queue and an exchange.
    ///
    /// Returns false when the exact same router is already recorded.
    pub async fn add_queue_router(
        &self,
        queue_id: i64,
        exchange_id: i64,
        routing_key: &str,
    ) -> Result<bool, StorageError> {
        if !self
            .get_queue_routers(queue_id, Some(exchange_id), Some(routing_key))
            .await?
            .is_empty()
        {
            return Ok(false);
        }

        self.adapters
            .queue_routers
            .add(&params(json!({
                "queue_id": queue_id,
                "exchange_id": exchange_id,
                "routing_key": routing_key
            })))
            .await?;

        Ok(true)
    }

    /// Removes the queue record along with its routers.
    ///
    /// Returns false when the queue doesn't exist.
    pub async fn remove_queue(&self, queue_id: i64) -> Result<bool, StorageError> {
        let Some(queue) = self.get_by_id(queue_id).await? else {
            return Ok(false);
        };

        self.remove_queue_router(queue.id, None, None).await?;
        self.adapters.queues.remove(queue.id).await?;

        Ok(true)
    }

    /// Removes the routers of a queue, optionally narrowed to an exchange
    /// and a routing key.
    ///
    /// Returns false when no router matched.
    pub async fn remove_queue_router(
        &self,
        queue_id: i64,
        exchange_id: Option<i64>,
        routing_key: Option<&str>,
    ) -> Result<bool, StorageError> {
        let routers = self
            .get_queue_routers(queue_id, exchange_id, routing_key)
            .await?;
        if routers.is_empty() {
            return Ok(false);
        }

        for router in routers {
            self.adapters.queue_routers.remove(router.id).await?;
        }

        Ok(true)
    }

    pub async fn get_queue_routers(
        &self,
        queue_id: i64,
        exchange_id: Option<i64>,
        routing_key: Option<&str>,
    ) -> Result<Vec<QueueRouterRecord>, StorageError> {
        let mut filter = params(json!({ "queue_id": queue_id }));
        if let Some(exchange_id) = exchange_id {
            filter.insert("exchange_id".to_owned(), Value::from(exchange_id));
        }
        if let Some(routing_key) = routing_key {
            filter.insert("routing_key".to_owned(), Value::from(routing_key));
        }

        let rows = self.adapters.queue_routers.get(&filter).await?;
        decode(rows)
    }

    /// Every router pointing at the exchange.
    pub async fn get_exchange_routers(
        &self,
        exchange_id: i64,
    ) -> Result<Vec<QueueRouterRecord>, StorageError> {
        let rows = self
            .adapters
            .queue_routers
            .get(&params(json!({ "exchange_id": exchange_id })))
            .await?;

        decode(rows)
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<QueueRecord>, StorageError> {
        self.first(json!({ "id": id })).await
    }

    pub async fn get_by_name(&self, name: &str) -> Result<Option<QueueRecord>, StorageError> {
        self.first(json!({ "name": name })).await
    }

    /// Queues bound to the exchange, each listed once in router order.
    pub async fn get_exchange_queues(
        &self,
        exchange_id: i64,
    ) -> Result<Vec<QueueRecord>, StorageError> {
        let mut seen = HashSet::new();
        let mut queues = vec![];

        for router in self.get_exchange_routers(exchange_id).await? {
            if !seen.insert(router.queue_id) {
                continue;
            }

            if let Some(queue) = self.get_by_id(router.queue_id).await? {
                queues.push(queue);
            }
        }

        Ok(queues)
    }

    pub async fn get_user_queues(&self, user_id: i64) -> Result<Vec<QueueRecord>, StorageError> {
        let rows = self
            .adapters
            .queues
            .get(&params(json!({ "user_id": user_id })))
            .await?;

        decode(rows)
    }

    async fn first(&self, filter: Value) -> Result<Option<QueueRecord>, StorageError> {
        let rows = self.adapters.queues.get(&params(filter)).await?;
        Ok(decode(rows)?.into_iter().next())
    }
}

// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Per-User Topology
//!
//! Exchanges and queues owned by a user are named `user_<userId>_<name>`.
//! The helpers below keep the broker and the storage records in step. They
//! check for existence and then insert, nothing is transactional and a
//! failure halfway leaves whatever was already done in place.

use crate::{
    adapter::routing_key_or_default,
    center::QueueCenter,
    errors::QueueCenterError,
    storage::{ExchangeRecord, QueueRecord},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Envelope published to user exchanges and decoded by the handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessage<T> {
    /// Unix timestamp, in seconds, of the publication
    pub publish: i64,
    /// Handler type the message is dispatched to
    pub handler: String,
    pub message: T,
}

pub fn user_exchange_name(user_id: i64, name: &str) -> String {
    format!("user_{}_{}", user_id, name)
}

pub fn user_queue_name(user_id: i64, name: &str) -> String {
    format!("user_{}_{}", user_id, name)
}

impl QueueCenter {
    /// Records and declares a new exchange for the user.
    ///
    /// Returns false when the exchange is already recorded.
    pub async fn add_user_exchange(&self, user_id: i64, name: &str) -> Result<bool, QueueCenterError> {
        let full_name = user_exchange_name(user_id, name);

        if !self.exchange_storage().add(user_id, &full_name).await? {
            return Ok(false);
        }

        self.exchange(&full_name).adapter().await?;
        debug!(user_id, exchange = full_name.as_str(), "user exchange created");

        Ok(true)
    }

    /// Publishes `message` to the user exchange, creating the exchange when
    /// it isn't recorded yet. The message is wrapped in a [`UserMessage`]
    /// addressed to `handler`. An empty routing key publishes with `*`.
    pub async fn publish_to_user_exchange<T>(
        &self,
        user_id: i64,
        name: &str,
        message: &T,
        handler: &str,
        routing_key: &str,
    ) -> Result<bool, QueueCenterError>
    where
        T: Serialize + Sync,
    {
        let routing_key = routing_key_or_default(routing_key);
        let full_name = user_exchange_name(user_id, name);

        if self
            .exchange_storage()
            .get_by_name(&full_name)
            .await?
            .is_none()
            && !self.add_user_exchange(user_id, name).await?
        {
            return Ok(false);
        }

        let envelope = UserMessage {
            publish: Utc::now().timestamp(),
            handler: handler.to_owned(),
            message,
        };

        self.exchange(&full_name)
            .publish_json(&envelope, routing_key)
            .await?;

        Ok(true)
    }

    /// Unbinds every queue from the user exchange, deletes it from the broker
    /// and removes its record.
    ///
    /// Returns false when the exchange isn't recorded.
    pub async fn delete_user_exchange(&self, user_id: i64, name: &str) -> Result<bool, QueueCenterError> {
        let exchanges = self.exchange_storage();
        let queues = self.queue_storage();
        let full_name = user_exchange_name(user_id, name);

        let Some(record) = exchanges.get_by_name(&full_name).await? else {
            return Ok(false);
        };

        let exchange = self.exchange(&full_name);

        for router in queues.get_exchange_routers(record.id).await? {
            if let Some(queue) = queues.get_by_id(router.queue_id).await? {
                if let Err(err) = self
                    .queue(&queue.name)
                    .unbind(exchange.name(), &router.routing_key)
                    .await
                {
                    warn!(
                        error = err.to_string(),
                        queue = queue.name.as_str(),
                        "failure to unbind queue from deleted exchange"
                    );
                }
            }

            queues
                .remove_queue_router(router.queue_id, Some(record.id), Some(&router.routing_key))
                .await?;
        }

        exchange.delete().await?;

        Ok(exchanges.remove(record.id).await?)
    }

    /// Records and declares a new queue for the user.
    ///
    /// Returns false when the queue is already recorded.
    pub async fn add_user_queue(&self, user_id: i64, name: &str) -> Result<bool, QueueCenterError> {
        let full_name = user_queue_name(user_id, name);

        if !self.queue_storage().add_queue(user_id, &full_name).await? {
            return Ok(false);
        }

        self.queue(&full_name).adapter().await?;
        debug!(user_id, queue = full_name.as_str(), "user queue created");

        Ok(true)
    }

    /// Binds the user queue to a recorded exchange, creating the queue when
    /// it isn't recorded yet.
    ///
    /// Binding twice with the same routing key keeps a single router, an
    /// empty routing key binds with `*`.
    /// Returns false when the exchange isn't recorded.
    pub async fn bind_user_queue(
        &self,
        user_id: i64,
        name: &str,
        exchange_id: i64,
        routing_key: &str,
    ) -> Result<bool, QueueCenterError> {
        let routing_key = routing_key_or_default(routing_key);
        let storage = self.queue_storage();
        let full_name = user_queue_name(user_id, name);

        let queue = match storage.get_by_name(&full_name).await? {
            Some(queue) => queue,
            None => {
                if !self.add_user_queue(user_id, name).await? {
                    return Ok(false);
                }
                match storage.get_by_name(&full_name).await? {
                    Some(queue) => queue,
                    None => return Ok(false),
                }
            }
        };

        let Some(exchange) = self.exchange_storage().get_by_id(exchange_id).await? else {
            warn!(exchange_id, "binding to an unknown exchange");
            return Ok(false);
        };

        if !storage
            .add_queue_router(queue.id, exchange_id, routing_key)
            .await?
        {
            debug!(queue = full_name.as_str(), routing_key, "router already recorded");
        }

        self.queue(&full_name)
            .bind(self.exchange(&exchange.name).name(), routing_key)
            .await?;

        Ok(true)
    }

    /// Removes the router between the user queue and the exchange and
    /// unbinds them on the broker.
    ///
    /// Returns false when the queue, the router or the exchange is missing.
    pub async fn unbind_user_queue(
        &self,
        user_id: i64,
        name: &str,
        exchange_id: i64,
        routing_key: &str,
    ) -> Result<bool, QueueCenterError> {
        let routing_key = routing_key_or_default(routing_key);
        let storage = self.queue_storage();
        let full_name = user_queue_name(user_id, name);

        let Some(queue) = storage.get_by_name(&full_name).await? else {
            return Ok(false);
        };

        if !storage
            .remove_queue_router(queue.id, Some(exchange_id), Some(routing_key))
            .await?
        {
            return Ok(false);
        }

        let Some(exchange) = self.exchange_storage().get_by_id(exchange_id).await? else {
            return Ok(false);
        };

        self.queue(&full_name)
            .unbind(self.exchange(&exchange.name).name(), routing_key)
            .await?;

        Ok(true)
    }

    /// Unbinds the user queue from every exchange, deletes it from the broker
    /// and removes its record.
    ///
    /// Failures to unbind a single router are logged and skipped. Returns
    /// false when the queue isn't recorded.
    pub async fn delete_user_queue(&self, user_id: i64, name: &str) -> Result<bool, QueueCenterError> {
        let storage = self.queue_storage();
        let full_name = user_queue_name(user_id, name);

        let Some(queue) = storage.get_by_name(&full_name).await? else {
            return Ok(false);
        };

        for router in storage.get_queue_routers(queue.id, None, None).await? {
            match self
                .unbind_user_queue(user_id, name, router.exchange_id, &router.routing_key)
                .await
            {
                Ok(true) => {}
                Ok(false) => warn!(
                    exchange_id = router.exchange_id,
                    "router removed without broker unbinding"
                ),
                Err(err) => warn!(error = err.to_string(), "failure to unbind user queue"),
            }
        }

        self.queue(&full_name).delete().await?;

        Ok(storage.remove_queue(queue.id).await?)
    }

    pub async fn user_exchanges(&self, user_id: i64) -> Result<Vec<ExchangeRecord>, QueueCenterError> {
        Ok(self.exchange_storage().get_user_exchanges(user_id).await?)
    }

    pub async fn user_queues(&self, user_id: i64) -> Result<Vec<QueueRecord>, QueueCenterError> {
        Ok(self.queue_storage().get_user_queues(user_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        adapter::{Connector, MockConnector, MockQueueAdapter, QueueAdapter, JSON_CONTENT_TYPE},
        configs::QueueCenterConfigs,
        storage::StorageAdapters,
    };
    use mockall::predicate::eq;
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn center_with(cfg: QueueCenterConfigs, adapter: MockQueueAdapter) -> QueueCenter {
        let adapter: Arc<dyn QueueAdapter> = Arc::new(adapter);
        let mut connector = MockConnector::new();
        connector
            .expect_connect()
            .returning(move || Ok(adapter.clone()));
        let connector: Arc<dyn Connector> = Arc::new(connector);

        QueueCenter::new(cfg, connector, StorageAdapters::in_memory())
    }

    fn center(adapter: MockQueueAdapter) -> QueueCenter {
        center_with(QueueCenterConfigs::default(), adapter)
    }

    fn declaring_adapter() -> MockQueueAdapter {
        let mut adapter = MockQueueAdapter::new();
        adapter.expect_exchange_declare().returning(|_| Ok(()));
        adapter.expect_queue_declare().returning(|_| Ok(()));
        adapter
    }

    #[test]
    fn should_generate_user_names() {
        assert_eq!(user_exchange_name(7, "events"), "user_7_events");
        assert_eq!(user_queue_name(7, "inbox"), "user_7_inbox");
    }

    #[tokio::test]
    async fn should_add_user_exchange_once() {
        let mut adapter = MockQueueAdapter::new();
        adapter
            .expect_exchange_declare()
            .withf(|def| def.name() == "user_1_events")
            .times(1)
            .returning(|_| Ok(()));
        let center = center(adapter);

        assert!(center.add_user_exchange(1, "events").await.unwrap());
        assert!(!center.add_user_exchange(1, "events").await.unwrap());

        let exchanges = center.user_exchanges(1).await.unwrap();
        assert_eq!(exchanges.len(), 1);
        assert_eq!(exchanges[0].name, "user_1_events");
    }

    #[tokio::test]
    async fn should_create_exchange_and_publish_envelope() {
        let mut adapter = declaring_adapter();
        adapter
            .expect_exchange_publish()
            .withf(|msg| {
                let envelope: UserMessage<Value> = serde_json::from_slice(&msg.data).unwrap();
                msg.exchange == "user_1_events"
                    && msg.routing_key == "orders.created"
                    && msg.content_type == JSON_CONTENT_TYPE
                    && envelope.handler == "order-created"
                    && envelope.message == json!({ "order": 42 })
                    && envelope.publish > 0
            })
            .times(2)
            .returning(|_| Ok(()));
        let center = center(adapter);

        for _ in 0..2 {
            assert!(center
                .publish_to_user_exchange(
                    1,
                    "events",
                    &json!({ "order": 42 }),
                    "order-created",
                    "orders.created"
                )
                .await
                .unwrap());
        }

        assert_eq!(center.user_exchanges(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn should_bind_user_queue_to_prefixed_exchange() {
        let mut adapter = declaring_adapter();
        adapter
            .expect_queue_bind()
            .with(eq("user_2_inbox"), eq("prod_user_1_events"), eq("orders.*"))
            .times(2)
            .returning(|_, _, _| Ok(()));
        let cfg = QueueCenterConfigs {
            exchange_prefix: Some("prod".to_owned()),
            ..Default::default()
        };
        let center = center_with(cfg, adapter);

        center.add_user_exchange(1, "events").await.unwrap();

        assert!(center.bind_user_queue(2, "inbox", 1, "orders.*").await.unwrap());
        assert!(center.bind_user_queue(2, "inbox", 1, "orders.*").await.unwrap());

        let queue = center.user_queues(2).await.unwrap().remove(0);
        assert_eq!(queue.name, "user_2_inbox");
        assert_eq!(
            center
                .queue_storage()
                .get_queue_routers(queue.id, None, None)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn should_use_default_routing_key_when_empty() {
        let mut adapter = declaring_adapter();
        adapter
            .expect_queue_bind()
            .with(eq("user_2_inbox"), eq("user_1_events"), eq("*"))
            .times(1)
            .returning(|_, _, _| Ok(()));
        adapter
            .expect_queue_unbind()
            .with(eq("user_2_inbox"), eq("user_1_events"), eq("*"))
            .times(1)
            .returning(|_, _, _| Ok(()));
        adapter
            .expect_exchange_publish()
            .withf(|msg| msg.routing_key == "*")
            .times(1)
            .returning(|_| Ok(()));
        let center = center(adapter);

        center.add_user_exchange(1, "events").await.unwrap();
        assert!(center.bind_user_queue(2, "inbox", 1, "").await.unwrap());
        assert!(center
            .publish_to_user_exchange(1, "events", &json!({}), "order-created", "")
            .await
            .unwrap());

        let routers = center
            .queue_storage()
            .get_queue_routers(1, Some(1), Some("*"))
            .await
            .unwrap();
        assert_eq!(routers.len(), 1);

        assert!(center.unbind_user_queue(2, "inbox", 1, "").await.unwrap());
    }

    #[tokio::test]
    async fn should_not_bind_to_unknown_exchange() {
        let mut adapter = declaring_adapter();
        adapter.expect_queue_bind().never();
        let center = center(adapter);

        assert!(!center.bind_user_queue(2, "inbox", 99, "*").await.unwrap());
        assert!(center
            .queue_storage()
            .get_queue_routers(1, None, None)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn should_unbind_user_queue() {
        let mut adapter = declaring_adapter();
        adapter.expect_queue_bind().returning(|_, _, _| Ok(()));
        adapter
            .expect_queue_unbind()
            .with(eq("user_2_inbox"), eq("user_1_events"), eq("*"))
            .times(1)
            .returning(|_, _, _| Ok(()));
        let center = center(adapter);

        assert!(!center.unbind_user_queue(2, "inbox", 1, "*").await.unwrap());

        center.add_user_exchange(1, "events").await.unwrap();
        center.bind_user_queue(2, "inbox", 1, "*").await.unwrap();

        assert!(!center.unbind_user_queue(2, "inbox", 1, "other").await.unwrap());
        assert!(center.unbind_user_queue(2, "inbox", 1, "*").await.unwrap());
        assert!(!center.unbind_user_queue(2, "inbox", 1, "*").await.unwrap());
    }

    #[tokio::test]
    async fn should_delete_user_queue_and_routers() {
        let mut adapter = declaring_adapter();
        adapter.expect_queue_bind().returning(|_, _, _| Ok(()));
        adapter
            .expect_queue_unbind()
            .times(2)
            .returning(|_, _, _| Ok(()));
        adapter
            .expect_queue_delete()
            .with(eq("user_2_inbox"))
            .times(1)
            .returning(|_| Ok(0));
        let center = center(adapter);

        assert!(!center.delete_user_queue(2, "inbox").await.unwrap());

        center.add_user_exchange(1, "events").await.unwrap();
        center.add_user_exchange(1, "audit").await.unwrap();
        center.bind_user_queue(2, "inbox", 1, "*").await.unwrap();
        center.bind_user_queue(2, "inbox", 2, "*").await.unwrap();

        assert!(center.delete_user_queue(2, "inbox").await.unwrap());
        assert!(center.user_queues(2).await.unwrap().is_empty());
        assert!(center
            .queue_storage()
            .get_exchange_routers(1)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn should_keep_deleting_when_unbind_fails() {
        let mut adapter = declaring_adapter();
        adapter.expect_queue_bind().returning(|_, _, _| Ok(()));
        adapter.expect_queue_unbind().returning(|queue, exchange, _| {
            Err(crate::errors::AmqpError::UnbindingExchangeFromQueueError(
                exchange.to_owned(),
                queue.to_owned(),
            ))
        });
        adapter
            .expect_queue_delete()
            .times(1)
            .returning(|_| Ok(0));
        let center = center(adapter);

        center.add_user_exchange(1, "events").await.unwrap();
        center.bind_user_queue(2, "inbox", 1, "*").await.unwrap();

        assert!(center.delete_user_queue(2, "inbox").await.unwrap());
        assert!(center.user_queues(2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn should_delete_user_exchange_and_unbind_queues() {
        let mut adapter = declaring_adapter();
        adapter.expect_queue_bind().returning(|_, _, _| Ok(()));
        adapter
            .expect_queue_unbind()
            .with(eq("user_2_inbox"), eq("user_1_events"), eq("*"))
            .times(1)
            .returning(|_, _, _| Ok(()));
        adapter
            .expect_exchange_delete()
            .with(eq("user_1_events"))
            .times(1)
            .returning(|_| Ok(()));
        let center = center(adapter);

        assert!(!center.delete_user_exchange(1, "events").await.unwrap());

        center.add_user_exchange(1, "events").await.unwrap();
        center.bind_user_queue(2, "inbox", 1, "*").await.unwrap();

        assert!(center.delete_user_exchange(1, "events").await.unwrap());
        assert!(center.user_exchanges(1).await.unwrap().is_empty());
        assert!(center
            .queue_storage()
            .get_exchange_routers(1)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(center.user_queues(2).await.unwrap().len(), 1);
    }
}

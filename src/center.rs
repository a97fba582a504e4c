// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Center
//!
//! The context shared by every operation: configuration, the broker
//! connector and the storage adapters. Cloning is cheap, all members are
//! reference counted.

use crate::{
    adapter::Connector,
    configs::QueueCenterConfigs,
    errors::AmqpError,
    exchange::Exchange,
    queue::Queue,
    rabbitmq::RabbitMQConnector,
    storage::{ExchangeStorage, QueueStorage, StorageAdapters},
};
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct QueueCenter {
    configs: Arc<QueueCenterConfigs>,
    connector: Arc<dyn Connector>,
    storage: StorageAdapters,
}

impl QueueCenter {
    pub fn new(
        configs: QueueCenterConfigs,
        connector: Arc<dyn Connector>,
        storage: StorageAdapters,
    ) -> QueueCenter {
        QueueCenter {
            configs: Arc::new(configs),
            connector,
            storage,
        }
    }

    /// Queue center backed by RabbitMQ. The connection is opened on first use.
    pub fn rabbitmq(configs: QueueCenterConfigs, storage: StorageAdapters) -> QueueCenter {
        let connector = RabbitMQConnector::new(&configs);
        QueueCenter::new(configs, connector, storage)
    }

    pub fn configs(&self) -> &QueueCenterConfigs {
        &self.configs
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        self.connector.clone()
    }

    /// Wrapper for the exchange `name`; the configured prefix is applied.
    pub fn exchange(&self, name: &str) -> Exchange {
        Exchange::new(name, &self.configs, self.connector.clone())
    }

    /// Wrapper for the queue `name`; the configured prefix is applied.
    pub fn queue(&self, name: &str) -> Queue {
        Queue::new(name, &self.configs, self.connector.clone())
    }

    pub fn exchange_storage(&self) -> ExchangeStorage {
        ExchangeStorage::new(self.storage.clone())
    }

    pub fn queue_storage(&self) -> QueueStorage {
        QueueStorage::new(self.storage.clone())
    }

    /// Closes the broker channel and connection.
    pub async fn close(&self) -> Result<(), AmqpError> {
        debug!("closing queue center");
        self.connector.connect().await?.close().await
    }
}

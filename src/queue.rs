// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Management for RabbitMQ
//!
//! This module provides the queue definition builder and the `Queue` wrapper.
//! The wrapper lazily obtains the broker adapter, declares the queue on first
//! use and exposes binding, consuming, polling and acknowledgement.

use crate::{
    adapter::{Connector, Message, QueueAdapter},
    configs::QueueCenterConfigs,
    errors::{AmqpError, QueueCenterError},
    exchange::prefixed,
};
use async_trait::async_trait;
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, error};
use uuid::Uuid;

/// Dead letter exchange every queue wrapper is declared with by default
pub const DEFAULT_DEAD_LETTER_EXCHANGE: &str = "exchange-die";
/// Prefix of the consumer tag, completed with the process id and a unique suffix
pub const CONSUMER_TAG_PREFIX: &str = "queue-center";

/// Definition of a RabbitMQ queue with its configuration parameters.
///
/// This struct implements the builder pattern to create and configure queue definitions.
/// It supports standard queue options as well as message TTL, queue expiration,
/// max length and dead lettering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueDefinition {
    pub(crate) name: String,
    pub(crate) durable: bool,
    pub(crate) delete: bool,
    pub(crate) exclusive: bool,
    pub(crate) passive: bool,
    pub(crate) no_wait: bool,
    pub(crate) ttl: Option<i32>,
    pub(crate) expires: Option<i32>,
    pub(crate) max_length: Option<i32>,
    pub(crate) max_length_bytes: Option<i32>,
    pub(crate) dead_letter_exchange: Option<String>,
}

impl QueueDefinition {
    /// Creates a new queue definition with the given name.
    ///
    /// By default, the queue is created with standard settings (non-durable, non-exclusive, etc.)
    pub fn new(name: &str) -> QueueDefinition {
        QueueDefinition {
            name: name.to_owned(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Makes the queue durable, persisting across broker restarts.
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    /// Sets the queue to auto-delete when no longer used.
    pub fn delete(mut self) -> Self {
        self.delete = true;
        self
    }

    /// Makes the queue exclusive to the connection.
    ///
    /// Exclusive queues are deleted when the connection closes.
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    /// Makes the queue passive, checking for existence without creating it.
    pub fn passive(mut self) -> Self {
        self.passive = true;
        self
    }

    /// Sets no_wait flag, making the operation non-blocking.
    pub fn no_wait(mut self) -> Self {
        self.no_wait = true;
        self
    }

    /// Sets the message Time-To-Live (TTL) for the queue, in milliseconds.
    pub fn ttl(mut self, ttl: i32) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Deletes the queue after it has been unused for `expires` milliseconds.
    pub fn expires(mut self, expires: i32) -> Self {
        self.expires = Some(expires);
        self
    }

    /// Sets the maximum number of messages the queue can hold.
    pub fn max_length(mut self, max: i32) -> Self {
        self.max_length = Some(max);
        self
    }

    /// Sets the maximum size in bytes the queue can hold.
    pub fn max_length_bytes(mut self, max_bytes: i32) -> Self {
        self.max_length_bytes = Some(max_bytes);
        self
    }

    /// Routes rejected and expired messages to `exchange`.
    pub fn dead_letter_exchange(mut self, exchange: &str) -> Self {
        self.dead_letter_exchange = Some(exchange.to_owned());
        self
    }
}

/// Callback invoked for every message received by [`Queue::consume`].
#[async_trait]
pub trait MessageCallback: Send + Sync {
    async fn call(&self, message: &Message) -> Result<(), QueueCenterError>;
}

#[async_trait]
impl<F> MessageCallback for F
where
    F: Fn(&Message) -> Result<(), QueueCenterError> + Send + Sync,
{
    async fn call(&self, message: &Message) -> Result<(), QueueCenterError> {
        self(message)
    }
}

/// A queue on the broker.
///
/// The broker adapter is obtained and the queue declared on first use,
/// afterwards every operation reuses the same adapter.
pub struct Queue {
    def: QueueDefinition,
    connector: Arc<dyn Connector>,
    adapter: OnceCell<Arc<dyn QueueAdapter>>,
}

impl Queue {
    /// Creates the wrapper for `name`. Nothing is sent to the broker until
    /// the queue is used.
    ///
    /// The queue is durable, not exclusive, not auto-deleted and dead letters
    /// to [`DEFAULT_DEAD_LETTER_EXCHANGE`].
    pub fn new(name: &str, cfg: &QueueCenterConfigs, connector: Arc<dyn Connector>) -> Queue {
        let def = QueueDefinition::new(&prefixed(cfg.queue_prefix.as_deref(), name))
            .durable()
            .dead_letter_exchange(DEFAULT_DEAD_LETTER_EXCHANGE);

        Queue {
            def,
            connector,
            adapter: OnceCell::new(),
        }
    }

    /// Effective queue name, prefix included.
    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn definition(&self) -> &QueueDefinition {
        &self.def
    }

    /// Replaces the declaration options. The queue keeps its name.
    ///
    /// The given definition replaces every option, defaults included. Start
    /// from `queue.definition().clone()` to keep durability and the dead
    /// letter exchange:
    ///
    /// ```ignore
    /// let def = queue.definition().clone().ttl(60_000);
    /// let queue = queue.set_options(def);
    /// ```
    ///
    /// Only effective before the queue has been declared.
    pub fn set_options(mut self, def: QueueDefinition) -> Self {
        let name = std::mem::take(&mut self.def.name);
        self.def = QueueDefinition { name, ..def };
        self
    }

    /// Returns the broker adapter, declaring the queue the first time.
    pub async fn adapter(&self) -> Result<Arc<dyn QueueAdapter>, AmqpError> {
        self.adapter
            .get_or_try_init(|| async {
                let adapter = self.connector.connect().await?;
                adapter.queue_declare(&self.def).await?;
                Ok::<_, AmqpError>(adapter)
            })
            .await
            .cloned()
    }

    /// Binds the queue to `exchange`.
    pub async fn bind(&self, exchange: &str, routing_key: &str) -> Result<(), AmqpError> {
        self.adapter()
            .await?
            .queue_bind(self.name(), exchange, routing_key)
            .await
    }

    /// Removes the binding between the queue and `exchange`.
    pub async fn unbind(&self, exchange: &str, routing_key: &str) -> Result<(), AmqpError> {
        self.adapter()
            .await?
            .queue_unbind(self.name(), exchange, routing_key)
            .await
    }

    /// Deletes the queue from the broker.
    pub async fn delete(&self) -> Result<u32, AmqpError> {
        self.adapter().await?.queue_delete(self.name()).await
    }

    /// Removes every ready message from the queue.
    pub async fn purge(&self) -> Result<u32, AmqpError> {
        self.adapter().await?.queue_purge(self.name()).await
    }

    /// Fetches a single message, leaving it unacknowledged.
    pub async fn get(&self) -> Result<Option<Message>, AmqpError> {
        self.adapter().await?.queue_get(self.name(), false).await
    }

    /// Acknowledges a message received from this queue.
    pub async fn ack(&self, delivery_tag: u64, multiple: bool) -> Result<(), AmqpError> {
        self.adapter().await?.queue_ack(delivery_tag, multiple).await
    }

    /// Rejects a message received from this queue, requeueing it when
    /// `requeue` is set.
    pub async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), AmqpError> {
        self.adapter()
            .await?
            .queue_nack(delivery_tag, false, requeue)
            .await
    }

    /// Consumes messages until `amount` of them have been processed, then
    /// cancels the consumer. An `amount` of 0 consumes until the broker
    /// closes the consumer.
    ///
    /// Every message is acked once `callback` succeeds. A callback error
    /// stops consumption, leaves the message unacked and is returned.
    ///
    /// # Returns
    /// The number of acked messages
    pub async fn consume(
        &self,
        amount: usize,
        callback: &dyn MessageCallback,
    ) -> Result<usize, QueueCenterError> {
        let adapter = self.adapter().await?;
        let tag = consumer_tag();

        let mut consumer = adapter
            .queue_consume(self.name(), &tag, self.def.exclusive, self.def.no_wait)
            .await?;

        debug!(queue = self.name(), consumer_tag = tag.as_str(), "consuming messages");

        let mut consumed = 0;

        while let Some(result) = consumer.next().await {
            let message = match result {
                Ok(message) => message,
                Err(err) => {
                    error!(error = err.to_string(), "error receiving consumed message");
                    adapter.queue_cancel(&tag).await?;
                    return Err(err.into());
                }
            };

            if let Err(err) = callback.call(&message).await {
                error!(error = err.to_string(), "error handling consumed message");
                adapter.queue_cancel(&tag).await?;
                return Err(err);
            }

            adapter.queue_ack(message.delivery_tag, false).await?;
            consumed += 1;

            if consumed == amount {
                debug!(queue = self.name(), consumed, "target reached, stopping consumer");
                adapter.queue_cancel(&tag).await?;
                break;
            }
        }

        Ok(consumed)
    }
}

/// Every consumer shares the center-wide channel, so each one gets its own tag.
fn consumer_tag() -> String {
    format!(
        "{}-{}-{}",
        CONSUMER_TAG_PREFIX,
        std::process::id(),
        Uuid::new_v4()
    )
}

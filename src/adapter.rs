// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Broker Adapter Interface
//!
//! This module defines the façade every broker backend implements. The
//! `QueueAdapter` trait mirrors the AMQP channel operations the queue center
//! needs, and `Connector` hands out the adapter shared by the exchange and
//! queue wrappers. The RabbitMQ implementation lives in [`crate::rabbitmq`].

use crate::{errors::AmqpError, exchange::ExchangeDefinition, queue::QueueDefinition};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use lapin::{message::Delivery, BasicProperties};
use std::sync::Arc;

#[cfg(test)]
use mockall::automock;

/// Content type used for raw string/bytes payloads
pub const TEXT_CONTENT_TYPE: &str = "text/plain";
/// Content type used for serialized payloads
pub const JSON_CONTENT_TYPE: &str = "application/json";
/// Routing key used when the caller doesn't provide one
pub const DEFAULT_ROUTING_KEY: &str = "*";

/// Returns `routing_key`, or [`DEFAULT_ROUTING_KEY`] when it is empty.
pub fn routing_key_or_default(routing_key: &str) -> &str {
    if routing_key.is_empty() {
        DEFAULT_ROUTING_KEY
    } else {
        routing_key
    }
}

/// A message received from a queue, either pushed to a consumer or fetched
/// with `basic.get`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    pub delivery_tag: u64,
    pub exchange: String,
    pub routing_key: String,
    pub redelivered: bool,
    pub properties: BasicProperties,
    pub data: Vec<u8>,
}

impl From<Delivery> for Message {
    fn from(delivery: Delivery) -> Self {
        Message {
            delivery_tag: delivery.delivery_tag,
            exchange: delivery.exchange.to_string(),
            routing_key: delivery.routing_key.to_string(),
            redelivered: delivery.redelivered,
            properties: delivery.properties,
            data: delivery.data,
        }
    }
}

/// A message to be published to an exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishMessage {
    pub exchange: String,
    pub routing_key: String,
    pub data: Vec<u8>,
    pub content_type: String,
    pub mandatory: bool,
    pub immediate: bool,
}

impl PublishMessage {
    pub fn new(exchange: &str, routing_key: &str, data: Vec<u8>) -> PublishMessage {
        PublishMessage {
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
            data,
            content_type: TEXT_CONTENT_TYPE.to_owned(),
            mandatory: false,
            immediate: false,
        }
    }

    pub fn content_type(mut self, content_type: &str) -> Self {
        self.content_type = content_type.to_owned();
        self
    }
}

/// Stream of messages delivered to a consumer.
pub type MessageStream = BoxStream<'static, Result<Message, AmqpError>>;

/// Broker operations used by the exchange and queue wrappers.
///
/// Every method is a direct pass-through to the underlying AMQP channel.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait QueueAdapter: Send + Sync {
    async fn exchange_declare(&self, def: &ExchangeDefinition) -> Result<(), AmqpError>;

    async fn exchange_publish(&self, msg: &PublishMessage) -> Result<(), AmqpError>;

    async fn exchange_delete(&self, exchange: &str) -> Result<(), AmqpError>;

    /// Binds `destination` to `source` so messages published to `source`
    /// also reach `destination`.
    async fn exchange_bind(
        &self,
        destination: &str,
        source: &str,
        routing_key: &str,
    ) -> Result<(), AmqpError>;

    async fn exchange_unbind(
        &self,
        destination: &str,
        source: &str,
        routing_key: &str,
    ) -> Result<(), AmqpError>;

    async fn queue_declare(&self, def: &QueueDefinition) -> Result<(), AmqpError>;

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), AmqpError>;

    async fn queue_unbind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), AmqpError>;

    /// Deletes the queue, returning the number of messages it still held.
    async fn queue_delete(&self, queue: &str) -> Result<u32, AmqpError>;

    async fn queue_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        exclusive: bool,
        no_wait: bool,
    ) -> Result<MessageStream, AmqpError>;

    async fn queue_cancel(&self, consumer_tag: &str) -> Result<(), AmqpError>;

    /// Fetches a single message, `None` when the queue is empty.
    async fn queue_get(&self, queue: &str, no_ack: bool) -> Result<Option<Message>, AmqpError>;

    async fn queue_ack(&self, delivery_tag: u64, multiple: bool) -> Result<(), AmqpError>;

    /// Rejects a message, handing it back to the queue when `requeue` is set.
    async fn queue_nack(
        &self,
        delivery_tag: u64,
        multiple: bool,
        requeue: bool,
    ) -> Result<(), AmqpError>;

    /// Purges the queue, returning the number of removed messages.
    async fn queue_purge(&self, queue: &str) -> Result<u32, AmqpError>;

    async fn close(&self) -> Result<(), AmqpError>;
}

/// Provides the broker adapter shared by the wrappers of a queue center.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn QueueAdapter>, AmqpError>;
}

// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Adapter
//!
//! `lapin` implementation of the [`QueueAdapter`] façade. Every operation is
//! forwarded to the AMQP channel, failures are logged and mapped to the
//! matching `AmqpError` variant.

use crate::{
    adapter::{Connector, Message, MessageStream, PublishMessage, QueueAdapter},
    channel::new_amqp_channel,
    configs::QueueCenterConfigs,
    errors::AmqpError,
    exchange::ExchangeDefinition,
    otel,
    queue::QueueDefinition,
};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicGetOptions,
        BasicNackOptions, BasicPublishOptions, ExchangeBindOptions, ExchangeDeclareOptions,
        ExchangeDeleteOptions, ExchangeUnbindOptions, QueueBindOptions, QueueDeclareOptions,
        QueueDeleteOptions, QueuePurgeOptions,
    },
    types::{AMQPValue, FieldTable, LongInt, LongString, ShortString},
    BasicProperties, Channel, Connection,
};
use opentelemetry::Context;
use std::{collections::BTreeMap, sync::Arc};
use tokio::sync::OnceCell;
use tracing::{debug, error};
use uuid::Uuid;

/// Constant for the header field used to specify a dead letter exchange
pub const AMQP_HEADERS_DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";
/// Constant for the header field used to specify message TTL
pub const AMQP_HEADERS_MESSAGE_TTL: &str = "x-message-ttl";
/// Constant for the header field used to specify the queue expiration
pub const AMQP_HEADERS_EXPIRES: &str = "x-expires";
/// Constant for the header field used to specify maximum queue length
pub const AMQP_HEADERS_MAX_LENGTH: &str = "x-max-length";
/// Constant for the header field used to specify maximum queue size in bytes
pub const AMQP_HEADERS_MAX_LENGTH_BYTES: &str = "x-max-length-bytes";

/// Delivery mode marking published messages as persistent
pub const PERSISTENT_DELIVERY_MODE: u8 = 2;

const REPLY_SUCCESS: u16 = 200;

/// RabbitMQ implementation of the QueueAdapter trait.
pub struct RabbitMQAdapter {
    conn: Arc<Connection>,
    channel: Arc<Channel>,
}

impl RabbitMQAdapter {
    pub fn new(conn: Arc<Connection>, channel: Arc<Channel>) -> Arc<RabbitMQAdapter> {
        Arc::new(RabbitMQAdapter { conn, channel })
    }

    /// Gives access to the wrapped channel for operations the façade doesn't cover.
    pub fn channel(&self) -> Arc<Channel> {
        self.channel.clone()
    }
}

#[async_trait]
impl QueueAdapter for RabbitMQAdapter {
    async fn exchange_declare(&self, def: &ExchangeDefinition) -> Result<(), AmqpError> {
        debug!("creating exchange: {}", def.name);

        match self
            .channel
            .exchange_declare(
                &def.name,
                (&def.kind).into(),
                ExchangeDeclareOptions {
                    passive: def.passive,
                    durable: def.durable,
                    auto_delete: def.delete,
                    internal: def.internal,
                    nowait: def.no_wait,
                },
                FieldTable::from(def.params.clone()),
            )
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    name = def.name.as_str(),
                    "error to declare the exchange"
                );
                Err(AmqpError::DeclareExchangeError(def.name.clone()))
            }
            _ => {
                debug!("exchange: {} was created", def.name);
                Ok(())
            }
        }
    }

    async fn exchange_publish(&self, msg: &PublishMessage) -> Result<(), AmqpError> {
        let mut headers = BTreeMap::<ShortString, AMQPValue>::default();
        otel::inject_context(&Context::current(), &mut headers);

        match self
            .channel
            .basic_publish(
                &msg.exchange,
                &msg.routing_key,
                BasicPublishOptions {
                    mandatory: msg.mandatory,
                    immediate: msg.immediate,
                },
                &msg.data,
                BasicProperties::default()
                    .with_content_type(ShortString::from(msg.content_type.clone()))
                    .with_delivery_mode(PERSISTENT_DELIVERY_MODE)
                    .with_message_id(ShortString::from(Uuid::new_v4().to_string()))
                    .with_headers(FieldTable::from(headers)),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error publishing message");
                Err(AmqpError::PublishingError)
            }
            _ => Ok(()),
        }
    }

    async fn exchange_delete(&self, exchange: &str) -> Result<(), AmqpError> {
        match self
            .channel
            .exchange_delete(exchange, ExchangeDeleteOptions::default())
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), name = exchange, "error to delete the exchange");
                Err(AmqpError::DeleteExchangeError(exchange.to_owned()))
            }
            _ => {
                debug!("exchange: {} was deleted", exchange);
                Ok(())
            }
        }
    }

    async fn exchange_bind(
        &self,
        destination: &str,
        source: &str,
        routing_key: &str,
    ) -> Result<(), AmqpError> {
        match self
            .channel
            .exchange_bind(
                destination,
                source,
                routing_key,
                ExchangeBindOptions { nowait: false },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to bind exchange to exchange");
                Err(AmqpError::BindingExchangeError(
                    destination.to_owned(),
                    source.to_owned(),
                ))
            }
            _ => Ok(()),
        }
    }

    async fn exchange_unbind(
        &self,
        destination: &str,
        source: &str,
        routing_key: &str,
    ) -> Result<(), AmqpError> {
        match self
            .channel
            .exchange_unbind(
                destination,
                source,
                routing_key,
                ExchangeUnbindOptions { nowait: false },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to unbind exchange from exchange");
                Err(AmqpError::UnbindingExchangeError(
                    destination.to_owned(),
                    source.to_owned(),
                ))
            }
            _ => Ok(()),
        }
    }

    async fn queue_declare(&self, def: &QueueDefinition) -> Result<(), AmqpError> {
        debug!("creating queue: {}", def.name);

        match self
            .channel
            .queue_declare(
                &def.name,
                QueueDeclareOptions {
                    passive: def.passive,
                    durable: def.durable,
                    exclusive: def.exclusive,
                    auto_delete: def.delete,
                    nowait: def.no_wait,
                },
                FieldTable::from(queue_arguments(def)),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), name = def.name.as_str(), "error to declare the queue");
                Err(AmqpError::DeclareQueueError(def.name.clone()))
            }
            _ => {
                debug!("queue: {} was created", def.name);
                Ok(())
            }
        }
    }

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), AmqpError> {
        debug!(
            "binding queue: {} to the exchange: {} with the key: {}",
            queue, exchange, routing_key
        );

        match self
            .channel
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions { nowait: false },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to bind queue to exchange");
                Err(AmqpError::BindingExchangeToQueueError(
                    exchange.to_owned(),
                    queue.to_owned(),
                ))
            }
            _ => Ok(()),
        }
    }

    async fn queue_unbind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), AmqpError> {
        debug!(
            "unbinding queue: {} from the exchange: {} with the key: {}",
            queue, exchange, routing_key
        );

        match self
            .channel
            .queue_unbind(queue, exchange, routing_key, FieldTable::default())
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to unbind queue from exchange");
                Err(AmqpError::UnbindingExchangeFromQueueError(
                    exchange.to_owned(),
                    queue.to_owned(),
                ))
            }
            _ => Ok(()),
        }
    }

    async fn queue_delete(&self, queue: &str) -> Result<u32, AmqpError> {
        match self
            .channel
            .queue_delete(queue, QueueDeleteOptions::default())
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), name = queue, "error to delete the queue");
                Err(AmqpError::DeleteQueueError(queue.to_owned()))
            }
            Ok(count) => {
                debug!("queue: {} was deleted", queue);
                Ok(count)
            }
        }
    }

    async fn queue_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        exclusive: bool,
        no_wait: bool,
    ) -> Result<MessageStream, AmqpError> {
        let consumer = match self
            .channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: false,
                    exclusive,
                    nowait: no_wait,
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to create the consumer");
                Err(AmqpError::BindingConsumerError(queue.to_owned()))
            }
            Ok(c) => Ok(c),
        }?;

        Ok(consumer
            .map(|result| match result {
                Ok(delivery) => Ok(Message::from(delivery)),
                Err(err) => {
                    error!(error = err.to_string(), "errors consume msg");
                    Err(AmqpError::ConsumerError(err.to_string()))
                }
            })
            .boxed())
    }

    async fn queue_cancel(&self, consumer_tag: &str) -> Result<(), AmqpError> {
        match self
            .channel
            .basic_cancel(consumer_tag, BasicCancelOptions::default())
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to cancel the consumer");
                Err(AmqpError::CancelConsumerError(consumer_tag.to_owned()))
            }
            _ => Ok(()),
        }
    }

    async fn queue_get(&self, queue: &str, no_ack: bool) -> Result<Option<Message>, AmqpError> {
        match self
            .channel
            .basic_get(queue, BasicGetOptions { no_ack })
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), name = queue, "error to get message");
                Err(AmqpError::GetMessageError(queue.to_owned()))
            }
            Ok(msg) => Ok(msg.map(|m| Message::from(m.delivery))),
        }
    }

    async fn queue_ack(&self, delivery_tag: u64, multiple: bool) -> Result<(), AmqpError> {
        match self
            .channel
            .basic_ack(delivery_tag, BasicAckOptions { multiple })
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error whiling ack msg");
                Err(AmqpError::AckMessageError)
            }
            _ => Ok(()),
        }
    }

    async fn queue_nack(
        &self,
        delivery_tag: u64,
        multiple: bool,
        requeue: bool,
    ) -> Result<(), AmqpError> {
        match self
            .channel
            .basic_nack(delivery_tag, BasicNackOptions { multiple, requeue })
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error whiling nack msg");
                Err(AmqpError::NackMessageError)
            }
            _ => Ok(()),
        }
    }

    async fn queue_purge(&self, queue: &str) -> Result<u32, AmqpError> {
        match self
            .channel
            .queue_purge(queue, QueuePurgeOptions::default())
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), name = queue, "error to purge the queue");
                Err(AmqpError::PurgeQueueError(queue.to_owned()))
            }
            Ok(count) => Ok(count),
        }
    }

    async fn close(&self) -> Result<(), AmqpError> {
        debug!("closing amqp channel and connection...");

        if let Err(err) = self.channel.close(REPLY_SUCCESS, "OK").await {
            error!(error = err.to_string(), "error to close the channel");
            return Err(AmqpError::CloseError);
        }

        if let Err(err) = self.conn.close(REPLY_SUCCESS, "OK").await {
            error!(error = err.to_string(), "error to close the connection");
            return Err(AmqpError::CloseError);
        }

        Ok(())
    }
}

/// Builds the `x-*` arguments of a queue declaration.
pub(crate) fn queue_arguments(def: &QueueDefinition) -> BTreeMap<ShortString, AMQPValue> {
    let mut args = BTreeMap::new();

    if let Some(exchange) = &def.dead_letter_exchange {
        args.insert(
            ShortString::from(AMQP_HEADERS_DEAD_LETTER_EXCHANGE),
            AMQPValue::LongString(LongString::from(exchange.clone())),
        );
    }

    let limits = [
        (AMQP_HEADERS_MESSAGE_TTL, def.ttl),
        (AMQP_HEADERS_EXPIRES, def.expires),
        (AMQP_HEADERS_MAX_LENGTH, def.max_length),
        (AMQP_HEADERS_MAX_LENGTH_BYTES, def.max_length_bytes),
    ];

    for (key, value) in limits {
        if let Some(value) = value {
            args.insert(
                ShortString::from(key),
                AMQPValue::LongInt(LongInt::from(value)),
            );
        }
    }

    args
}

/// Connector opening a single RabbitMQ connection on first use and sharing
/// its adapter afterwards.
pub struct RabbitMQConnector {
    cfg: QueueCenterConfigs,
    adapter: OnceCell<Arc<dyn QueueAdapter>>,
}

impl RabbitMQConnector {
    pub fn new(cfg: &QueueCenterConfigs) -> Arc<RabbitMQConnector> {
        Arc::new(RabbitMQConnector {
            cfg: cfg.clone(),
            adapter: OnceCell::new(),
        })
    }
}

#[async_trait]
impl Connector for RabbitMQConnector {
    async fn connect(&self) -> Result<Arc<dyn QueueAdapter>, AmqpError> {
        self.adapter
            .get_or_try_init(|| async {
                let (conn, channel) = new_amqp_channel(&self.cfg).await?;
                Ok::<Arc<dyn QueueAdapter>, AmqpError>(RabbitMQAdapter::new(conn, channel))
            })
            .await
            .cloned()
    }
}

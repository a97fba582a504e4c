// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Exchange Management for RabbitMQ
//!
//! This module provides the exchange definition builder and the `Exchange`
//! wrapper. The wrapper lazily obtains the broker adapter, declares the
//! exchange the first time it's used and publishes messages to it.

use crate::{
    adapter::{Connector, PublishMessage, QueueAdapter, JSON_CONTENT_TYPE},
    configs::QueueCenterConfigs,
    errors::{AmqpError, QueueCenterError},
};
use lapin::types::{AMQPValue, LongString, ShortString};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, str::FromStr, sync::Arc};
use tokio::sync::OnceCell;
use tracing::{debug, error};

/// Constant for the header field used to specify the delayed exchange type
pub const AMQP_HEADERS_DELAYED_EXCHANGE_TYPE: &str = "x-delayed-type";

/// Represents the types of exchanges available in RabbitMQ.
///
/// Each exchange type has specific routing behavior:
/// - Direct: Routes messages to queues based on an exact match of routing keys
/// - Fanout: Broadcasts messages to all bound queues regardless of routing keys
/// - Topic: Routes messages based on wildcard pattern matching of routing keys
/// - Headers: Routes based on message header values instead of routing keys
/// - XMessageDelayed: Extension for delayed message delivery (plugin required)
///
/// Names are parsed case-insensitively, from a string or a serde source alike.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum ExchangeKind {
    Direct,
    Fanout,
    #[default]
    Topic,
    Headers,
    #[serde(rename = "x-delayed-message")]
    XMessageDelayed,
}

impl From<&ExchangeKind> for lapin::ExchangeKind {
    fn from(kind: &ExchangeKind) -> Self {
        match kind {
            ExchangeKind::Direct => lapin::ExchangeKind::Direct,
            ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
            ExchangeKind::Headers => lapin::ExchangeKind::Headers,
            ExchangeKind::Topic => lapin::ExchangeKind::Topic,
            ExchangeKind::XMessageDelayed => {
                lapin::ExchangeKind::Custom("x-delayed-message".to_owned())
            }
        }
    }
}

impl FromStr for ExchangeKind {
    type Err = AmqpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "direct" => Ok(ExchangeKind::Direct),
            "fanout" => Ok(ExchangeKind::Fanout),
            "topic" => Ok(ExchangeKind::Topic),
            "headers" => Ok(ExchangeKind::Headers),
            "x-delayed-message" => Ok(ExchangeKind::XMessageDelayed),
            _ => Err(AmqpError::DeclareExchangeError(s.to_owned())),
        }
    }
}

impl TryFrom<String> for ExchangeKind {
    type Error = AmqpError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Definition of a RabbitMQ exchange with its configuration parameters.
///
/// This struct implements the builder pattern to create and configure exchange definitions.
/// It supports standard exchange types as well as special configurations like delayed messaging.
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeDefinition {
    pub(crate) name: String,
    pub(crate) kind: ExchangeKind,
    pub(crate) delete: bool,
    pub(crate) durable: bool,
    pub(crate) passive: bool,
    pub(crate) internal: bool,
    pub(crate) no_wait: bool,
    pub(crate) params: BTreeMap<ShortString, AMQPValue>,
}

impl ExchangeDefinition {
    /// Creates a new exchange definition with the given name.
    ///
    /// By default, the exchange is created as a Direct exchange with default parameters.
    pub fn new(name: &str) -> ExchangeDefinition {
        ExchangeDefinition {
            name: name.to_owned(),
            kind: ExchangeKind::Direct,
            delete: false,
            durable: false,
            passive: false,
            internal: false,
            no_wait: false,
            params: BTreeMap::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sets the exchange type.
    pub fn kind(mut self, kind: ExchangeKind) -> Self {
        self.kind = kind;
        self
    }

    /// Sets the exchange type to Direct.
    pub fn direct(mut self) -> Self {
        self.kind = ExchangeKind::Direct;
        self
    }

    /// Sets the exchange type to Fanout.
    pub fn fanout(mut self) -> Self {
        self.kind = ExchangeKind::Fanout;
        self
    }

    /// Sets the exchange type to Topic.
    pub fn topic(mut self) -> Self {
        self.kind = ExchangeKind::Topic;
        self
    }

    /// Creates a delayed direct exchange.
    ///
    /// This requires the x-delayed-message plugin to be installed on the RabbitMQ server.
    pub fn direct_delayed(mut self) -> Self {
        self.kind = ExchangeKind::XMessageDelayed;
        self.params.insert(
            ShortString::from(AMQP_HEADERS_DELAYED_EXCHANGE_TYPE),
            AMQPValue::LongString(LongString::from("direct")),
        );
        self
    }

    /// Creates a delayed topic exchange.
    ///
    /// This requires the x-delayed-message plugin to be installed on the RabbitMQ server.
    pub fn topic_delayed(mut self) -> Self {
        self.kind = ExchangeKind::XMessageDelayed;
        self.params.insert(
            ShortString::from(AMQP_HEADERS_DELAYED_EXCHANGE_TYPE),
            AMQPValue::LongString(LongString::from("topic")),
        );
        self
    }

    /// Adds a single parameter to the exchange.
    pub fn param(mut self, key: ShortString, value: AMQPValue) -> Self {
        self.params.insert(key, value);
        self
    }

    /// Sets the exchange to auto-delete when no longer used.
    pub fn delete(mut self) -> Self {
        self.delete = true;
        self
    }

    /// Makes the exchange durable, persisting across broker restarts.
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    /// Makes the exchange passive, checking for existence without creating it.
    pub fn passive(mut self) -> Self {
        self.passive = true;
        self
    }

    /// Makes the exchange internal, preventing direct publishing.
    pub fn internal(mut self) -> Self {
        self.internal = true;
        self
    }

    /// Sets no_wait flag, making the operation non-blocking.
    pub fn no_wait(mut self) -> Self {
        self.no_wait = true;
        self
    }
}

/// Applies an optional `<prefix>_` to a wrapper name.
pub(crate) fn prefixed(prefix: Option<&str>, name: &str) -> String {
    match prefix {
        Some(prefix) if !prefix.is_empty() => format!("{}_{}", prefix, name),
        _ => name.to_owned(),
    }
}

/// An exchange on the broker.
///
/// The broker adapter is obtained and the exchange declared on first use,
/// afterwards every operation reuses the same adapter.
pub struct Exchange {
    def: ExchangeDefinition,
    connector: Arc<dyn Connector>,
    adapter: OnceCell<Arc<dyn QueueAdapter>>,
}

impl Exchange {
    /// Creates the wrapper for `name`. Nothing is sent to the broker until
    /// the exchange is used.
    ///
    /// The exchange is durable, not auto-deleted, and of the kind configured
    /// in `cfg`.
    pub fn new(name: &str, cfg: &QueueCenterConfigs, connector: Arc<dyn Connector>) -> Exchange {
        let def = ExchangeDefinition::new(&prefixed(cfg.exchange_prefix.as_deref(), name))
            .kind(cfg.exchange_kind.clone())
            .durable();

        Exchange {
            def,
            connector,
            adapter: OnceCell::new(),
        }
    }

    /// Effective exchange name, prefix included.
    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn definition(&self) -> &ExchangeDefinition {
        &self.def
    }

    /// Returns the broker adapter, declaring the exchange the first time.
    pub async fn adapter(&self) -> Result<Arc<dyn QueueAdapter>, AmqpError> {
        self.adapter
            .get_or_try_init(|| async {
                let adapter = self.connector.connect().await?;
                adapter.exchange_declare(&self.def).await?;
                Ok::<_, AmqpError>(adapter)
            })
            .await
            .cloned()
    }

    /// Publishes a raw payload to the exchange.
    pub async fn publish(&self, payload: &[u8], routing_key: &str) -> Result<(), AmqpError> {
        let adapter = self.adapter().await?;

        debug!(exchange = self.name(), routing_key, "publishing message");

        adapter
            .exchange_publish(&PublishMessage::new(
                self.name(),
                routing_key,
                payload.to_vec(),
            ))
            .await
    }

    /// Serializes `message` as JSON and publishes it to the exchange.
    pub async fn publish_json<T>(&self, message: &T, routing_key: &str) -> Result<(), QueueCenterError>
    where
        T: Serialize + ?Sized,
    {
        let data = serde_json::to_vec(message).map_err(|err| {
            error!(error = err.to_string(), "failure to serialize message");
            QueueCenterError::SerializeError(err.to_string())
        })?;

        let adapter = self.adapter().await?;

        debug!(exchange = self.name(), routing_key, "publishing json message");

        adapter
            .exchange_publish(
                &PublishMessage::new(self.name(), routing_key, data).content_type(JSON_CONTENT_TYPE),
            )
            .await?;

        Ok(())
    }

    /// Deletes the exchange from the broker.
    pub async fn delete(&self) -> Result<(), AmqpError> {
        self.adapter().await?.exchange_delete(self.name()).await
    }

    /// Binds this exchange to `source`.
    pub async fn bind(&self, source: &str, routing_key: &str) -> Result<(), AmqpError> {
        self.adapter()
            .await?
            .exchange_bind(self.name(), source, routing_key)
            .await
    }

    /// Removes the binding between this exchange and `source`.
    pub async fn unbind(&self, source: &str, routing_key: &str) -> Result<(), AmqpError> {
        self.adapter()
            .await?
            .exchange_unbind(self.name(), source, routing_key)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{MockConnector, MockQueueAdapter, TEXT_CONTENT_TYPE};
    use mockall::predicate::eq;

    fn connector(adapter: MockQueueAdapter) -> Arc<dyn Connector> {
        let adapter: Arc<dyn QueueAdapter> = Arc::new(adapter);
        let mut connector = MockConnector::new();
        connector
            .expect_connect()
            .times(1)
            .returning(move || Ok(adapter.clone()));
        Arc::new(connector)
    }

    #[test]
    fn should_apply_exchange_prefix() {
        let cfg = QueueCenterConfigs {
            exchange_prefix: Some("prod".to_owned()),
            ..Default::default()
        };

        let exchange = Exchange::new("user_1_events", &cfg, Arc::new(MockConnector::new()));

        assert_eq!(exchange.name(), "prod_user_1_events");
        assert_eq!(exchange.definition().kind, ExchangeKind::Topic);
        assert!(exchange.definition().durable);
        assert!(!exchange.definition().delete);
    }

    #[test]
    fn should_parse_exchange_kind() {
        assert_eq!("Fanout".parse::<ExchangeKind>(), Ok(ExchangeKind::Fanout));
        assert_eq!(
            "x-delayed-message".parse::<ExchangeKind>(),
            Ok(ExchangeKind::XMessageDelayed)
        );
        assert!("unknown".parse::<ExchangeKind>().is_err());
    }

    #[test]
    fn should_deserialize_exchange_kind_like_parse() {
        let kind: ExchangeKind = serde_json::from_value(serde_json::json!("Topic")).unwrap();
        assert_eq!(kind, ExchangeKind::Topic);

        let kind: ExchangeKind =
            serde_json::from_value(serde_json::json!("x-delayed-message")).unwrap();
        assert_eq!(kind, ExchangeKind::XMessageDelayed);

        assert!(serde_json::from_value::<ExchangeKind>(serde_json::json!("unknown")).is_err());
        assert_eq!(
            serde_json::to_value(ExchangeKind::XMessageDelayed).unwrap(),
            serde_json::json!("x-delayed-message")
        );
    }

    #[test]
    fn should_configure_delayed_exchange() {
        let def = ExchangeDefinition::new("delayed").topic_delayed();

        assert_eq!(def.kind, ExchangeKind::XMessageDelayed);
        assert_eq!(
            def.params
                .get(&ShortString::from(AMQP_HEADERS_DELAYED_EXCHANGE_TYPE)),
            Some(&AMQPValue::LongString(LongString::from("topic")))
        );
    }

    #[tokio::test]
    async fn should_declare_once_and_publish() {
        let mut adapter = MockQueueAdapter::new();
        adapter
            .expect_exchange_declare()
            .withf(|def| def.name == "events" && def.durable)
            .times(1)
            .returning(|_| Ok(()));
        adapter
            .expect_exchange_publish()
            .withf(|msg| {
                msg.exchange == "events"
                    && msg.routing_key == "user.created"
                    && msg.data == b"hello"
                    && msg.content_type == TEXT_CONTENT_TYPE
            })
            .times(2)
            .returning(|_| Ok(()));

        let exchange = Exchange::new("events", &QueueCenterConfigs::default(), connector(adapter));

        exchange.publish(b"hello", "user.created").await.unwrap();
        exchange.publish(b"hello", "user.created").await.unwrap();
    }

    #[tokio::test]
    async fn should_publish_json_payload() {
        let mut adapter = MockQueueAdapter::new();
        adapter.expect_exchange_declare().returning(|_| Ok(()));
        adapter
            .expect_exchange_publish()
            .withf(|msg| {
                msg.content_type == JSON_CONTENT_TYPE && msg.data == br#"{"id":7}"#.to_vec()
            })
            .times(1)
            .returning(|_| Ok(()));

        let exchange = Exchange::new("events", &QueueCenterConfigs::default(), connector(adapter));

        exchange
            .publish_json(&serde_json::json!({ "id": 7 }), "*")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn should_fail_when_declaration_fails() {
        let mut adapter = MockQueueAdapter::new();
        adapter
            .expect_exchange_declare()
            .returning(|def| Err(AmqpError::DeclareExchangeError(def.name.clone())));
        adapter.expect_exchange_publish().never();

        let exchange = Exchange::new("events", &QueueCenterConfigs::default(), connector(adapter));

        let err = exchange.publish(b"hello", "*").await.unwrap_err();
        assert_eq!(err, AmqpError::DeclareExchangeError("events".to_owned()));
    }

    #[tokio::test]
    async fn should_bind_and_delete_exchange() {
        let mut adapter = MockQueueAdapter::new();
        adapter.expect_exchange_declare().returning(|_| Ok(()));
        adapter
            .expect_exchange_bind()
            .with(eq("events"), eq("upstream"), eq("a.*"))
            .times(1)
            .returning(|_, _, _| Ok(()));
        adapter
            .expect_exchange_unbind()
            .with(eq("events"), eq("upstream"), eq("a.*"))
            .times(1)
            .returning(|_, _, _| Ok(()));
        adapter
            .expect_exchange_delete()
            .with(eq("events"))
            .times(1)
            .returning(|_| Ok(()));

        let exchange = Exchange::new("events", &QueueCenterConfigs::default(), connector(adapter));

        exchange.bind("upstream", "a.*").await.unwrap();
        exchange.unbind("upstream", "a.*").await.unwrap();
        exchange.delete().await.unwrap();
    }
}

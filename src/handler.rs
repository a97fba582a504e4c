// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Handler
//!
//! Drains user queues and dispatches every message to the callback
//! registered for the `handler` field of its [`UserMessage`] envelope.
//!
//! The handler polls with `basic.get` until a queue is empty. Messages whose
//! callback succeeds are acked. The others are nacked with requeue once the
//! queue is drained, so the next run receives them again.

use crate::{
    adapter::Message,
    center::QueueCenter,
    errors::QueueCenterError,
    otel,
    queue::Queue,
    storage::QueueRecord,
    users::UserMessage,
};
use async_trait::async_trait;
use opentelemetry::{
    global,
    trace::{Span, Status},
    Context,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{borrow::Cow, collections::HashMap, sync::Arc};
use tracing::{debug, error, warn};

#[cfg(test)]
use mockall::automock;

/// Prefix of the registry keys
pub const HANDLER_CALLBACK_PREFIX: &str = "handler";

/// Message handed to a callback: the published envelope enriched with
/// where it was received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerData {
    /// Unix timestamp, in seconds, of the publication
    pub publish: i64,
    pub handler: String,
    pub message: Value,
    pub user_id: i64,
    pub queue_id: i64,
    pub exchange: String,
    pub routing_key: String,
}

/// Processes messages addressed to one handler type.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait HandlerCallback: Send + Sync {
    /// An error hands the message back to the queue.
    async fn handle(&self, ctx: &Context, data: &HandlerData) -> Result<(), QueueCenterError>;
}

/// Selects the queues to drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleTarget {
    /// A single queue, by record id
    Queue(i64),
    /// Every queue owned by the user
    User(i64),
    /// Every queue bound to the exchange, by record id
    Exchange(i64),
}

pub struct Handler {
    center: QueueCenter,
    handlers: HashMap<String, Arc<dyn HandlerCallback>>,
}

impl Handler {
    pub fn new(center: QueueCenter) -> Self {
        Handler {
            center,
            handlers: HashMap::default(),
        }
    }

    /// Registers the callback for a handler type, replacing any previous one.
    pub fn add_handler(mut self, kind: &str, handler: Arc<dyn HandlerCallback>) -> Self {
        self.handlers.insert(handler_key(kind), handler);
        self
    }

    pub fn get_handler(&self, kind: &str) -> Result<Arc<dyn HandlerCallback>, QueueCenterError> {
        self.handlers
            .get(&handler_key(kind))
            .cloned()
            .ok_or_else(|| QueueCenterError::HandlerNotFound(kind.to_owned()))
    }

    /// Drains every queue selected by `target`.
    ///
    /// # Returns
    /// The number of acked messages
    pub async fn handle(&self, target: HandleTarget) -> Result<usize, QueueCenterError> {
        let storage = self.center.queue_storage();

        let queues: Vec<QueueRecord> = match target {
            HandleTarget::Queue(id) => storage.get_by_id(id).await?.into_iter().collect(),
            HandleTarget::User(user_id) => storage.get_user_queues(user_id).await?,
            HandleTarget::Exchange(exchange_id) => storage.get_exchange_queues(exchange_id).await?,
        };

        debug!(?target, queues = queues.len(), "handling queues");

        let mut handled = 0;
        for queue in &queues {
            handled += self.consume_queue_messages(queue).await?;
        }

        Ok(handled)
    }

    async fn consume_queue_messages(&self, record: &QueueRecord) -> Result<usize, QueueCenterError> {
        let queue = self.center.queue(&record.name);
        let mut acked = 0;
        let mut refused = vec![];

        let drained = self
            .drain_queue(record, &queue, &mut acked, &mut refused)
            .await;

        // Requeued only now, a nack while draining would hand the message straight back.
        for delivery_tag in refused {
            queue.nack(delivery_tag, true).await?;
        }
        drained?;

        debug!(queue = queue.name(), acked, "queue drained");

        Ok(acked)
    }

    async fn drain_queue(
        &self,
        record: &QueueRecord,
        queue: &Queue,
        acked: &mut usize,
        refused: &mut Vec<u64>,
    ) -> Result<(), QueueCenterError> {
        while let Some(message) = queue.get().await? {
            match self.handle_message(record, &message).await {
                Ok(true) => {
                    queue.ack(message.delivery_tag, false).await?;
                    *acked += 1;
                }
                Ok(false) => refused.push(message.delivery_tag),
                Err(err) => {
                    refused.push(message.delivery_tag);
                    return Err(err);
                }
            }
        }

        Ok(())
    }

    async fn handle_message(
        &self,
        record: &QueueRecord,
        message: &Message,
    ) -> Result<bool, QueueCenterError> {
        let envelope: UserMessage<Value> = serde_json::from_slice(&message.data).map_err(|err| {
            error!(error = err.to_string(), queue = record.name.as_str(), "failure to parse payload");
            QueueCenterError::InvalidPayload(err.to_string())
        })?;

        let handler = self.get_handler(&envelope.handler)?;

        let (ctx, mut span) = otel::new_span(
            &message.properties,
            &global::tracer("queue center handler"),
            &envelope.handler,
        );

        let data = HandlerData {
            publish: envelope.publish,
            handler: envelope.handler,
            message: envelope.message,
            user_id: record.user_id,
            queue_id: record.id,
            exchange: message.exchange.clone(),
            routing_key: message.routing_key.clone(),
        };

        match handler.handle(&ctx, &data).await {
            Ok(()) => {
                debug!(handler = data.handler.as_str(), "message successfully processed");
                span.set_status(Status::Ok);
                Ok(true)
            }
            Err(err) => {
                warn!(
                    error = err.to_string(),
                    handler = data.handler.as_str(),
                    "handler refused message, requeueing it"
                );
                span.record_error(&err);
                span.set_status(Status::Error {
                    description: Cow::from("handler failure"),
                });
                Ok(false)
            }
        }
    }
}

/// Registry key of a handler type: `user-created` is stored as
/// `handlerUserCreated`.
pub fn handler_key(kind: &str) -> String {
    let normalized: String = kind.split('-').map(upper_first).collect();
    format!("{}{}", HANDLER_CALLBACK_PREFIX, normalized)
}

fn upper_first(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for Queue Center
//!
//! This module provides the error types used across the crate. Broker failures
//! are reported with `AmqpError`, bookkeeping failures with `StorageError`,
//! configuration failures with `ConfigsError`. The `QueueCenterError` enum wraps
//! all of them for the high level per-user and handler operations.

use thiserror::Error;

/// Represents errors that can occur during AMQP/RabbitMQ operations.
///
/// Each variant names the broker operation that failed, carrying the exchange
/// or queue involved when there is one.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AmqpError {
    /// Error establishing a connection to the RabbitMQ server
    #[error("failure to connect")]
    ConnectionError,

    /// Error creating a channel from an established connection
    #[error("failure to create a channel")]
    ChannelError,

    /// Error closing the channel or the connection
    #[error("failure to close the connection")]
    CloseError,

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`")]
    DeclareExchangeError(String),

    /// Error deleting an exchange with the given name
    #[error("failure to delete an exchange `{0}`")]
    DeleteExchangeError(String),

    /// Error binding an exchange to another exchange
    #[error("failure to bind exchange `{0}` to exchange `{1}`")]
    BindingExchangeError(String, String),

    /// Error unbinding an exchange from another exchange
    #[error("failure to unbind exchange `{0}` from exchange `{1}`")]
    UnbindingExchangeError(String, String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Error deleting a queue with the given name
    #[error("failure to delete a queue `{0}`")]
    DeleteQueueError(String),

    /// Error purging a queue with the given name
    #[error("failure to purge a queue `{0}`")]
    PurgeQueueError(String),

    /// Error binding an exchange to a queue
    #[error("failure to binding exchange `{0}` to queue `{1}`")]
    BindingExchangeToQueueError(String, String),

    /// Error unbinding an exchange from a queue
    #[error("failure to unbinding exchange `{0}` from queue `{1}`")]
    UnbindingExchangeFromQueueError(String, String),

    /// Error binding a consumer to a queue
    #[error("failure to declare consumer `{0}`")]
    BindingConsumerError(String),

    /// Error cancelling a consumer
    #[error("failure to cancel consumer `{0}`")]
    CancelConsumerError(String),

    /// Error publishing a message
    #[error("failure to publish")]
    PublishingError,

    /// Error fetching a single message from a queue
    #[error("failure to get message from queue `{0}`")]
    GetMessageError(String),

    /// Error acknowledging a message
    #[error("failure to ack message")]
    AckMessageError,

    /// Error rejecting a message
    #[error("failure to nack message")]
    NackMessageError,

    /// Error consuming a message
    #[error("failure to consume message `{0}`")]
    ConsumerError(String),
}

/// Errors reported by the storage layer.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum StorageError {
    /// The injected adapter failed to execute the operation
    #[error("storage adapter failure `{0}`")]
    AdapterError(String),

    /// A row returned by the adapter doesn't match the expected record shape
    #[error("invalid storage record `{0}`")]
    InvalidRecord(String),
}

/// Errors reported while loading configuration.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigsError {
    /// The configuration sources hold a missing or unparsable value
    #[error("failure to load configs `{0}`")]
    LoadError(String),
}

/// Umbrella error for the queue center operations.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum QueueCenterError {
    #[error(transparent)]
    Amqp(#[from] AmqpError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Configs(#[from] ConfigsError),

    /// No callback registered for the given handler type
    #[error("not valid queue center message handler `{0}`")]
    HandlerNotFound(String),

    /// A registered callback refused the message
    #[error("handler failure `{0}`")]
    HandlerFailed(String),

    /// A message body is not a valid queue center envelope
    #[error("invalid message payload `{0}`")]
    InvalidPayload(String),

    /// A message could not be encoded before publishing
    #[error("failure to serialize message `{0}`")]
    SerializeError(String),
}

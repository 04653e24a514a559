// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the RabbitMQ Endpoint
//!
//! This module provides the error type shared by the endpoint resolver, the header
//! translator and the thin lapin layer underneath them. Configuration and header
//! errors are raised synchronously by pure code; the remaining variants map failures
//! reported by the broker client.

use thiserror::Error;

/// Represents errors that can occur while resolving endpoints, translating
/// headers or talking to RabbitMQ.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmqpError {
    /// An endpoint cannot be resolved into a valid topology.
    ///
    /// Always fatal to endpoint construction and never retried.
    #[error("invalid endpoint configuration: {0}")]
    ConfigurationError(String),

    /// A reserved property header carries a value that cannot be converted
    /// to the property's native representation.
    #[error("malformed header `{key}`: `{value}`")]
    MalformedHeaderError { key: String, value: String },

    /// Error establishing a connection to the RabbitMQ server
    #[error("failure to connect")]
    ConnectionError,

    /// Error creating a channel from an established connection
    #[error("failure to create a channel")]
    ChannelError,

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`")]
    DeclareExchangeError(String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Error binding a queue to an exchange
    #[error("failure to bind exchange `{0}` to queue `{1}`")]
    BindingExchangeToQueueError(String, String),

    /// Error configuring Quality of Service parameters
    #[error("failure to configure qos `{0}`")]
    QoSDeclarationError(String),

    /// Error starting a consumer on the given queue
    #[error("failure to create consumer on `{0}`")]
    CreatingConsumerError(String),

    /// Error publishing a message
    #[error("failure to publish")]
    PublishingError,

    /// Error acknowledging a message
    #[error("failure to ack message")]
    AckMessageError,

    /// Error negative-acknowledging a message
    #[error("failure to nack message")]
    NackMessageError,

    /// Error consuming a message
    #[error("failure to consume message `{0}`")]
    ConsumerError(String),
}

impl AmqpError {
    pub(crate) fn configuration(msg: impl Into<String>) -> Self {
        AmqpError::ConfigurationError(msg.into())
    }

    pub(crate) fn malformed_header(key: &str, value: &str) -> Self {
        AmqpError::MalformedHeaderError {
            key: key.to_owned(),
            value: value.to_owned(),
        }
    }
}

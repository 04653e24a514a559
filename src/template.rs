// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Message Template
//!
//! The publish side of the broker client. [`AmqpTemplate`] is what producers talk to;
//! [`ChannelTemplate`] publishes through a lapin channel, propagating the OpenTelemetry
//! context in the message headers.

use crate::{errors::AmqpError, message::AmqpMessage, otel};
use async_trait::async_trait;
use lapin::{options::BasicPublishOptions, BasicProperties, Channel};
use opentelemetry::Context;
use std::sync::Arc;
use tracing::{debug, error};
use uuid::Uuid;

/// Publishing operations an endpoint producer needs.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AmqpTemplate: Send + Sync {
    /// Publishes `msg` to `exchange` with `routing_key`.
    async fn publish(
        &self,
        ctx: &Context,
        exchange: &str,
        routing_key: &str,
        msg: &AmqpMessage,
    ) -> Result<(), AmqpError>;
}

/// [`AmqpTemplate`] over a lapin channel.
pub struct ChannelTemplate {
    channel: Arc<Channel>,
}

impl ChannelTemplate {
    pub fn new(channel: Arc<Channel>) -> Arc<ChannelTemplate> {
        Arc::new(ChannelTemplate { channel })
    }
}

#[async_trait]
impl AmqpTemplate for ChannelTemplate {
    /// Messages without a message id get a random one.
    async fn publish(
        &self,
        ctx: &Context,
        exchange: &str,
        routing_key: &str,
        msg: &AmqpMessage,
    ) -> Result<(), AmqpError> {
        let mut props = msg.properties.clone();
        otel::inject(ctx, &mut props);
        if props.message_id.is_none() {
            props.message_id = Some(Uuid::new_v4().to_string());
        }

        debug!(exchange, routing_key, "publishing message");

        match self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions {
                    immediate: false,
                    mandatory: false,
                },
                &msg.body,
                BasicProperties::from(&props),
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
}

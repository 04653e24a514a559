// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Endpoint Consumer
//!
//! Consumes the queue an endpoint describes and hands every delivery to an
//! [`EnvelopeHandler`] as a routing engine [`Envelope`]. Deliveries are settled
//! according to the endpoint's [`AcknowledgeMode`]:
//!
//! - `NONE`: the broker acknowledges on send (`no_ack`), nothing to settle.
//! - `AUTO`: acknowledged when the handler succeeds, rejected without requeue when it
//!   fails, so a configured dead letter exchange receives the message.
//! - `MANUAL`: the handler receives the delivery's [`Acker`] and settles it itself.

use crate::{
    config::AcknowledgeMode,
    endpoint::EndpointDescriptor,
    errors::AmqpError,
    header,
    message::{AmqpMessage, Envelope, MessageProperties},
    otel,
    topology::{self, AmqpAdmin},
};
use async_trait::async_trait;
use futures_util::{future::join_all, StreamExt};
use lapin::{
    acker::Acker,
    message::Delivery,
    options::{BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions},
    types::FieldTable,
    BasicProperties, Channel,
};
use opentelemetry::{
    global::{self, BoxedTracer},
    trace::{Span, Status},
    Context,
};
use std::{borrow::Cow, sync::Arc};
use tracing::{debug, error};

/// Receives the messages consumed by an endpoint.
#[async_trait]
pub trait EnvelopeHandler: Send + Sync {
    /// Handles one message. `acker` is only provided in manual acknowledge mode.
    async fn exec(
        &self,
        ctx: &Context,
        envelope: &Envelope,
        acker: Option<&Acker>,
    ) -> Result<(), AmqpError>;
}

/// What to do with a delivery once its handler returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Already acknowledged by the broker.
    Nothing,
    Ack,
    Reject,
    /// Left to the handler.
    Handler,
}

/// Settlement for a handler result under `mode`.
pub fn settlement(mode: AcknowledgeMode, result: &Result<(), AmqpError>) -> Settlement {
    match (mode, result) {
        (AcknowledgeMode::None, _) => Settlement::Nothing,
        (AcknowledgeMode::Auto, Ok(())) => Settlement::Ack,
        (AcknowledgeMode::Auto, Err(_)) => Settlement::Reject,
        (AcknowledgeMode::Manual, _) => Settlement::Handler,
    }
}

/// Converts a delivered message into an envelope.
///
/// Application headers are copied first, then the basic properties are written under
/// their reserved names, so a basic property wins over a same-named header.
pub fn to_envelope(data: &[u8], properties: &BasicProperties) -> Envelope {
    let msg = AmqpMessage {
        body: data.to_vec(),
        properties: MessageProperties::from(properties),
    };

    let mut envelope = Envelope::new(msg.body.clone());
    header::copy_headers_to_envelope(&mut envelope, msg.properties.headers());
    header::extract_properties_to_headers(&mut envelope.headers, &msg);
    envelope
}

/// An endpoint bound as a consumer.
pub struct EndpointConsumer {
    endpoint: EndpointDescriptor,
    channel: Arc<Channel>,
    handler: Arc<dyn EnvelopeHandler>,
}

impl EndpointConsumer {
    /// Binds `endpoint` as a consumer.
    pub fn new(
        mut endpoint: EndpointDescriptor,
        channel: Arc<Channel>,
        handler: Arc<dyn EnvelopeHandler>,
    ) -> Result<Self, AmqpError> {
        endpoint.resolve_as_consumer()?;
        Ok(EndpointConsumer {
            endpoint,
            channel,
            handler,
        })
    }

    /// Declares the consumer's exchange, queue and bindings, unless resource creation
    /// is disabled.
    pub async fn declare(&self, admin: &dyn AmqpAdmin) -> Result<(), AmqpError> {
        topology::declare_resources(admin, &self.endpoint).await
    }

    pub fn endpoint(&self) -> &EndpointDescriptor {
        &self.endpoint
    }

    /// Starts `concurrentConsumers` consumers on the endpoint queue and processes
    /// deliveries until every consumer stream ends.
    pub async fn consume_blocking(&self) -> Result<(), AmqpError> {
        let queue = self.endpoint.queue_name().unwrap_or_default().to_owned();
        let opts = self.endpoint.options();
        let mode = self.endpoint.acknowledge_mode();

        if let Err(err) = self
            .channel
            .basic_qos(opts.prefetch_count, BasicQosOptions { global: false })
            .await
        {
            error!(error = err.to_string(), "failure to configure qos");
            return Err(AmqpError::QoSDeclarationError(err.to_string()));
        }

        let mut spawns = vec![];

        for n in 0..opts.concurrent_consumers {
            let tag = format!("{queue}-{n}");
            let mut consumer = match self
                .channel
                .basic_consume(
                    &queue,
                    &tag,
                    BasicConsumeOptions {
                        no_local: false,
                        no_ack: mode == AcknowledgeMode::None,
                        exclusive: false,
                        nowait: false,
                    },
                    FieldTable::default(),
                )
                .await
            {
                Err(err) => {
                    error!(error = err.to_string(), "failure to create the consumer");
                    Err(AmqpError::CreatingConsumerError(queue.clone()))
                }
                Ok(c) => Ok(c),
            }?;

            debug!(queue = queue.as_str(), tag = tag.as_str(), "consumer started");

            let handler = self.handler.clone();
            let queue = queue.clone();

            spawns.push(tokio::spawn(async move {
                let tracer = global::tracer("amqp consumer");
                while let Some(result) = consumer.next().await {
                    match result {
                        Ok(delivery) => {
                            if let Err(err) =
                                consume(&tracer, &delivery, &queue, mode, handler.as_ref()).await
                            {
                                error!(error = err.to_string(), "error consume msg");
                            }
                        }
                        Err(err) => error!(error = err.to_string(), "errors consume msg"),
                    }
                }
            }));
        }

        for res in join_all(spawns).await {
            if let Err(err) = res {
                error!(error = err.to_string(), "tokio process error");
                return Err(AmqpError::ConsumerError(err.to_string()));
            }
        }

        Ok(())
    }
}

/// Runs one delivery through the handler and settles it.
async fn consume(
    tracer: &BoxedTracer,
    delivery: &Delivery,
    queue: &str,
    mode: AcknowledgeMode,
    handler: &dyn EnvelopeHandler,
) -> Result<(), AmqpError> {
    let envelope = to_envelope(&delivery.data, &delivery.properties);
    let (ctx, mut span) = otel::new_span(
        &MessageProperties::from(&delivery.properties),
        tracer,
        queue,
    );

    debug!(
        "received: {} - exchange: {}",
        delivery.routing_key, delivery.exchange
    );

    let acker = match mode {
        AcknowledgeMode::Manual => Some(&delivery.acker),
        _ => None,
    };
    let result = handler.exec(&ctx, &envelope, acker).await;

    if let Err(err) = &result {
        span.record_error(err);
        span.set_status(Status::Error {
            description: Cow::from(err.to_string()),
        });
    }

    match settlement(mode, &result) {
        Settlement::Ack => {
            if let Err(e) = delivery.ack(BasicAckOptions { multiple: false }).await {
                error!(error = e.to_string(), "error whiling ack msg");
                span.record_error(&e);
                return Err(AmqpError::AckMessageError);
            }
        }
        Settlement::Reject => {
            if let Err(e) = delivery
                .nack(BasicNackOptions {
                    multiple: false,
                    requeue: false,
                })
                .await
            {
                error!(error = e.to_string(), "error whiling nack msg");
                span.record_error(&e);
                return Err(AmqpError::NackMessageError);
            }
        }
        Settlement::Nothing | Settlement::Handler => {}
    }

    if result.is_ok() {
        span.set_status(Status::Ok);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{CORRELATION_ID, DELIVERY_MODE, EXCHANGE_PATTERN, MESSAGE_ID, PRIORITY};
    use lapin::types::{AMQPValue, LongString, ShortString};
    use serde_json::{json, Value};
    use std::collections::BTreeMap;

    #[test]
    fn settles_according_to_mode() {
        let ok = Ok(());
        let failed = Err(AmqpError::ConsumerError("boom".to_owned()));

        assert_eq!(settlement(AcknowledgeMode::None, &ok), Settlement::Nothing);
        assert_eq!(settlement(AcknowledgeMode::None, &failed), Settlement::Nothing);
        assert_eq!(settlement(AcknowledgeMode::Auto, &ok), Settlement::Ack);
        assert_eq!(settlement(AcknowledgeMode::Auto, &failed), Settlement::Reject);
        assert_eq!(settlement(AcknowledgeMode::Manual, &failed), Settlement::Handler);
    }

    #[test]
    fn delivery_becomes_envelope() {
        let mut table = BTreeMap::new();
        table.insert(
            ShortString::from("tenant"),
            AMQPValue::LongString(LongString::from("acme")),
        );
        table.insert(
            ShortString::from(EXCHANGE_PATTERN),
            AMQPValue::LongString(LongString::from("InOut")),
        );
        let props = BasicProperties::default()
            .with_message_id(ShortString::from("m-1"))
            .with_correlation_id(ShortString::from("c-1"))
            .with_priority(3)
            .with_delivery_mode(2)
            .with_headers(FieldTable::from(table));

        let envelope = to_envelope(b"payload", &props);

        assert_eq!(envelope.body, b"payload".to_vec());
        assert_eq!(envelope.header("tenant"), Some(&json!("acme")));
        assert_eq!(envelope.header(MESSAGE_ID), Some(&json!("m-1")));
        assert_eq!(envelope.header(CORRELATION_ID), Some(&json!("c-1")));
        assert_eq!(envelope.header(PRIORITY), Some(&json!("3")));
        assert_eq!(envelope.header(DELIVERY_MODE), Some(&json!("2")));
        assert!(envelope.header(EXCHANGE_PATTERN).is_none());
    }

    #[test]
    fn basic_property_wins_over_same_named_header() {
        let mut table = BTreeMap::new();
        table.insert(
            ShortString::from(MESSAGE_ID),
            AMQPValue::LongString(LongString::from("from-table")),
        );
        let props = BasicProperties::default().with_headers(FieldTable::from(table));

        let envelope = to_envelope(b"", &props);

        assert_eq!(envelope.header(MESSAGE_ID), Some(&Value::Null));
    }
}

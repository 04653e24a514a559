// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Endpoint Producer
//!
//! Sends routing engine messages to the exchange an endpoint describes. The
//! `exchangeName` and `routingKey` headers override the endpoint's destination for a
//! single message.

use crate::{
    endpoint::EndpointDescriptor,
    errors::AmqpError,
    header::{self, EXCHANGE_NAME_HEADER, ROUTING_KEY_HEADER},
    message::{AmqpMessage, Envelope},
    template::AmqpTemplate,
    topology::{self, AmqpAdmin},
};
use opentelemetry::Context;
use std::sync::Arc;
use tracing::debug;

/// An endpoint bound as a producer.
pub struct EndpointProducer {
    endpoint: EndpointDescriptor,
    template: Arc<dyn AmqpTemplate>,
}

impl EndpointProducer {
    /// Binds `endpoint` as a producer.
    pub fn new(
        mut endpoint: EndpointDescriptor,
        template: Arc<dyn AmqpTemplate>,
    ) -> Result<Self, AmqpError> {
        endpoint.resolve_as_producer()?;
        Ok(EndpointProducer { endpoint, template })
    }

    /// Declares the producer's exchange, unless resource creation is disabled.
    pub async fn declare(&self, admin: &dyn AmqpAdmin) -> Result<(), AmqpError> {
        topology::declare_resources(admin, &self.endpoint).await
    }

    pub fn endpoint(&self) -> &EndpointDescriptor {
        &self.endpoint
    }

    /// Builds the broker message for `envelope`: basic properties from the reserved
    /// headers, then the remaining headers into the application table.
    ///
    /// Malformed property headers are skipped and returned alongside the message.
    pub fn to_amqp_message(&self, envelope: &Envelope) -> (AmqpMessage, Vec<AmqpError>) {
        let mut msg = AmqpMessage::new(envelope.body.clone());
        let rejected = header::apply_properties_from_headers(&mut msg, &envelope.headers);
        header::copy_headers_to_message(&mut msg, &envelope.headers);
        (msg, rejected)
    }

    /// Exchange and routing key for `envelope`.
    pub fn destination(&self, envelope: &Envelope) -> (String, String) {
        let exchange = envelope
            .header_str(EXCHANGE_NAME_HEADER)
            .unwrap_or_else(|| self.endpoint.exchange_name().to_owned());
        let routing_key = envelope
            .header_str(ROUTING_KEY_HEADER)
            .or_else(|| self.endpoint.routing_key().map(str::to_owned))
            .unwrap_or_default();
        (exchange, routing_key)
    }

    /// Publishes `envelope`. Returns the property headers that were skipped.
    pub async fn send(
        &self,
        ctx: &Context,
        envelope: &Envelope,
    ) -> Result<Vec<AmqpError>, AmqpError> {
        let (exchange, routing_key) = self.destination(envelope);
        let (msg, rejected) = self.to_amqp_message(envelope);

        debug!(
            exchange = exchange.as_str(),
            routing_key = routing_key.as_str(),
            skipped = rejected.len(),
            "sending message"
        );

        self.template
            .publish(ctx, &exchange, &routing_key, &msg)
            .await?;

        Ok(rejected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        header::{MESSAGE_ID, PRIORITY},
        template::MockAmqpTemplate,
    };
    use serde_json::json;

    fn producer(uri: &str, template: MockAmqpTemplate) -> EndpointProducer {
        let endpoint = EndpointDescriptor::from_uri(uri).unwrap();
        EndpointProducer::new(endpoint, Arc::new(template)).unwrap()
    }

    #[test]
    fn binds_endpoint_as_producer() {
        let producer = producer("spring-amqp:orders:created", MockAmqpTemplate::new());

        assert_eq!(producer.endpoint().routing_key(), Some("created"));
        assert_eq!(producer.endpoint().queue_name(), None);
    }

    #[test]
    fn rejects_endpoint_bound_as_consumer() {
        let mut endpoint = EndpointDescriptor::from_uri("spring-amqp:orders:billing").unwrap();
        endpoint.resolve_as_consumer().unwrap();

        assert!(matches!(
            EndpointProducer::new(endpoint, Arc::new(MockAmqpTemplate::new())),
            Err(AmqpError::ConfigurationError(_))
        ));
    }

    #[test]
    fn headers_override_destination() {
        let producer = producer("spring-amqp:orders:created", MockAmqpTemplate::new());

        let plain = Envelope::new(vec![]);
        assert_eq!(
            producer.destination(&plain),
            ("orders".to_owned(), "created".to_owned())
        );

        let routed = Envelope::new(vec![])
            .with_header(EXCHANGE_NAME_HEADER, "audit")
            .with_header(ROUTING_KEY_HEADER, "order.cancelled");
        assert_eq!(
            producer.destination(&routed),
            ("audit".to_owned(), "order.cancelled".to_owned())
        );
    }

    #[test]
    fn exchange_only_endpoint_publishes_with_empty_key() {
        let producer = producer("spring-amqp:events", MockAmqpTemplate::new());

        assert_eq!(
            producer.destination(&Envelope::new(vec![])),
            ("events".to_owned(), String::new())
        );
    }

    #[tokio::test]
    async fn sends_translated_message() {
        let mut template = MockAmqpTemplate::new();
        template
            .expect_publish()
            .withf(|_, exchange, key, msg| {
                exchange.to_string() == "orders"
                    && key.to_string() == "created"
                    && msg.body == b"{}".to_vec()
                    && msg.properties.priority == Some(4)
                    && msg.properties.message_id.as_deref() == Some("m-1")
                    && msg.properties.header("tenant") == Some(&json!("acme"))
                    && !msg.properties.has_header(PRIORITY)
                    && !msg.properties.has_header(ROUTING_KEY_HEADER)
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let producer = producer("spring-amqp:orders:created", template);
        let envelope = Envelope::new(b"{}".to_vec())
            .with_header(PRIORITY, "4")
            .with_header(MESSAGE_ID, "m-1")
            .with_header(ROUTING_KEY_HEADER, "created")
            .with_header("tenant", "acme");

        let rejected = producer.send(&Context::new(), &envelope).await.unwrap();
        assert!(rejected.is_empty());
    }

    #[tokio::test]
    async fn malformed_header_does_not_block_delivery() {
        let mut template = MockAmqpTemplate::new();
        template
            .expect_publish()
            .withf(|_, _, _, msg| {
                msg.properties.priority.is_none()
                    && msg.properties.message_id.as_deref() == Some("m-2")
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let producer = producer("spring-amqp:orders:created", template);
        let envelope = Envelope::new(vec![])
            .with_header(PRIORITY, "urgent")
            .with_header(MESSAGE_ID, "m-2");

        let rejected = producer.send(&Context::new(), &envelope).await.unwrap();
        assert_eq!(rejected.len(), 1);
    }

    #[tokio::test]
    async fn publish_failure_is_propagated() {
        let mut template = MockAmqpTemplate::new();
        template
            .expect_publish()
            .returning(|_, _, _, _| Err(AmqpError::PublishingError));

        let producer = producer("spring-amqp:orders:created", template);

        assert_eq!(
            producer.send(&Context::new(), &Envelope::new(vec![])).await,
            Err(AmqpError::PublishingError)
        );
    }
}

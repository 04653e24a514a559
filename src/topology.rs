// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Topology Management
//!
//! Endpoints with `createResources=true` declare the exchange, queue and bindings
//! they describe before producing or consuming. Declaration goes through the
//! [`AmqpAdmin`] trait so the resolution logic can be exercised without a broker;
//! [`ChannelAdmin`] is the lapin backed implementation.

use crate::{
    endpoint::{Binding, EndpointDescriptor},
    errors::AmqpError,
    exchange::ExchangeDefinition,
    queue::{QueueBinding, QueueDefinition},
};
use async_trait::async_trait;
use lapin::{
    options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions},
    types::FieldTable,
    Channel,
};
use std::sync::Arc;
use tracing::{debug, error};

/// Broker administration operations an endpoint needs.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AmqpAdmin: Send + Sync {
    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), AmqpError>;

    async fn declare_queue(&self, def: &QueueDefinition) -> Result<(), AmqpError>;

    async fn declare_binding(&self, binding: &QueueBinding) -> Result<(), AmqpError>;
}

/// Declares the resources described by a bound endpoint.
///
/// Producers declare their exchange. Consumers additionally declare the dead letter
/// exchange and queue when both are named, then their queue and its binding. The
/// default exchange is never declared.
pub async fn declare_resources(
    admin: &dyn AmqpAdmin,
    endpoint: &EndpointDescriptor,
) -> Result<(), AmqpError> {
    if !endpoint.options().create_resources {
        debug!(exchange = endpoint.exchange_name(), "resource creation disabled");
        return Ok(());
    }

    if let Binding::Pending(_) = endpoint.binding() {
        return Err(AmqpError::configuration(format!(
            "endpoint {} must be bound before declaring resources",
            endpoint.canonical_uri()
        )));
    }

    if !endpoint.is_using_default_exchange() {
        admin
            .declare_exchange(&endpoint.exchange_definition())
            .await?;
    }

    if endpoint.binding() != &Binding::Consumer {
        return Ok(());
    }

    if let Some((dlx, dlq, binding)) = endpoint.dead_letter_definitions() {
        admin.declare_exchange(&dlx).await?;
        admin.declare_queue(&dlq).await?;
        admin.declare_binding(&binding).await?;
    }

    if let Some(queue) = endpoint.queue_definition() {
        admin.declare_queue(&queue).await?;
    }

    if let Some(binding) = endpoint.queue_binding() {
        admin.declare_binding(&binding).await?;
    }

    Ok(())
}

/// [`AmqpAdmin`] over a lapin channel.
pub struct ChannelAdmin {
    channel: Arc<Channel>,
}

impl ChannelAdmin {
    pub fn new(channel: Arc<Channel>) -> Self {
        ChannelAdmin { channel }
    }
}

#[async_trait]
impl AmqpAdmin for ChannelAdmin {
    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), AmqpError> {
        debug!("creating exchange: {}", def.name);

        match self
            .channel
            .exchange_declare(
                &def.name,
                def.kind.into(),
                ExchangeDeclareOptions {
                    passive: false,
                    durable: def.durable,
                    auto_delete: def.delete,
                    internal: false,
                    nowait: false,
                },
                FieldTable::default(),
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

    async fn declare_queue(&self, def: &QueueDefinition) -> Result<(), AmqpError> {
        debug!("creating queue: {}", def.name);

        match self
            .channel
            .queue_declare(
                &def.name,
                QueueDeclareOptions {
                    passive: false,
                    durable: def.durable,
                    exclusive: def.exclusive,
                    auto_delete: def.delete,
                    nowait: false,
                },
                FieldTable::from(def.arguments()),
            )
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    name = def.name.as_str(),
                    "error to declare the queue"
                );
                Err(AmqpError::DeclareQueueError(def.name.clone()))
            }
            _ => {
                debug!("queue: {} was created", def.name);
                Ok(())
            }
        }
    }

    async fn declare_binding(&self, binding: &QueueBinding) -> Result<(), AmqpError> {
        debug!(
            "binding queue: {} to the exchange: {} with the key: {}",
            binding.queue_name, binding.exchange_name, binding.routing_key
        );

        match self
            .channel
            .queue_bind(
                &binding.queue_name,
                &binding.exchange_name,
                &binding.routing_key,
                QueueBindOptions { nowait: false },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to bind queue to exchange");
                Err(AmqpError::BindingExchangeToQueueError(
                    binding.exchange_name.clone(),
                    binding.queue_name.clone(),
                ))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::ExchangeKind;
    use mockall::Sequence;

    fn bound_consumer(uri: &str) -> EndpointDescriptor {
        let mut endpoint = EndpointDescriptor::from_uri(uri).unwrap();
        endpoint.resolve_as_consumer().unwrap();
        endpoint
    }

    #[tokio::test]
    async fn consumer_declares_exchange_queue_and_binding() {
        let endpoint = bound_consumer("spring-amqp:orders:billing:order.*?durable=true");
        let mut admin = MockAmqpAdmin::new();
        let mut seq = Sequence::new();

        admin
            .expect_declare_exchange()
            .withf(|def| {
                def.name() == "orders"
                    && def.exchange_kind() == ExchangeKind::Topic
                    && def.is_durable()
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        admin
            .expect_declare_queue()
            .withf(|def| def.name() == "billing")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        admin
            .expect_declare_binding()
            .withf(|b| {
                b.queue_name() == "billing" && b.exchange_name() == "orders" && b.key() == "order.*"
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        declare_resources(&admin, &endpoint).await.unwrap();
    }

    #[tokio::test]
    async fn consumer_declares_dead_letter_topology_first() {
        let endpoint =
            bound_consumer("spring-amqp:orders:billing?dlxName=dead&dlqName=dead.billing");
        let mut admin = MockAmqpAdmin::new();
        let mut seq = Sequence::new();

        admin
            .expect_declare_exchange()
            .withf(|def| def.name() == "orders" && def.exchange_kind() == ExchangeKind::Fanout)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        admin
            .expect_declare_exchange()
            .withf(|def| def.name() == "dead")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        admin
            .expect_declare_queue()
            .withf(|def| def.name() == "dead.billing")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        admin
            .expect_declare_binding()
            .withf(|b| b.exchange_name() == "dead")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        admin
            .expect_declare_queue()
            .withf(|def| def.name() == "billing")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        admin
            .expect_declare_binding()
            .withf(|b| b.exchange_name() == "orders" && b.key().is_empty())
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        declare_resources(&admin, &endpoint).await.unwrap();
    }

    #[tokio::test]
    async fn producer_declares_only_its_exchange() {
        let mut endpoint = EndpointDescriptor::from_uri("spring-amqp:orders:created").unwrap();
        endpoint.resolve_as_producer().unwrap();

        let mut admin = MockAmqpAdmin::new();
        admin
            .expect_declare_exchange()
            .withf(|def| def.name() == "orders")
            .times(1)
            .returning(|_| Ok(()));
        admin.expect_declare_queue().never();
        admin.expect_declare_binding().never();

        declare_resources(&admin, &endpoint).await.unwrap();
    }

    #[tokio::test]
    async fn default_exchange_is_never_declared() {
        let endpoint = bound_consumer("spring-amqp::work");

        let mut admin = MockAmqpAdmin::new();
        admin.expect_declare_exchange().never();
        admin
            .expect_declare_queue()
            .withf(|def| def.name() == "work")
            .times(1)
            .returning(|_| Ok(()));
        admin.expect_declare_binding().never();

        declare_resources(&admin, &endpoint).await.unwrap();
    }

    #[tokio::test]
    async fn nothing_is_declared_when_disabled() {
        let endpoint = bound_consumer("spring-amqp:orders:billing?createResources=false");

        let mut admin = MockAmqpAdmin::new();
        admin.expect_declare_exchange().never();
        admin.expect_declare_queue().never();
        admin.expect_declare_binding().never();

        declare_resources(&admin, &endpoint).await.unwrap();
    }

    #[tokio::test]
    async fn unbound_endpoint_is_rejected() {
        let endpoint = EndpointDescriptor::from_uri("spring-amqp:orders:billing").unwrap();
        let admin = MockAmqpAdmin::new();

        assert!(matches!(
            declare_resources(&admin, &endpoint).await,
            Err(AmqpError::ConfigurationError(_))
        ));
    }

    #[tokio::test]
    async fn declaration_failure_is_propagated() {
        let endpoint = bound_consumer("spring-amqp:orders:billing");

        let mut admin = MockAmqpAdmin::new();
        admin
            .expect_declare_exchange()
            .returning(|def| Err(AmqpError::DeclareExchangeError(def.name().to_owned())));
        admin.expect_declare_queue().never();

        assert_eq!(
            declare_resources(&admin, &endpoint).await,
            Err(AmqpError::DeclareExchangeError("orders".to_owned()))
        );
    }
}

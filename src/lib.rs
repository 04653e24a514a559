// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! RabbitMQ endpoints addressed by URI for message routing engines.
//!
//! An [`endpoint::EndpointDescriptor`] is parsed from a URI such as
//! `spring-amqp:orders:billing:order.*?durable=true` and bound either as a
//! [`producer::EndpointProducer`] or as a [`consumer::EndpointConsumer`]. Messages cross
//! the boundary through the [`header`] translation functions.

mod otel;

pub mod channel;
pub mod config;
pub mod consumer;
pub mod endpoint;
pub mod errors;
pub mod exchange;
pub mod header;
pub mod message;
pub mod producer;
pub mod queue;
pub mod template;
pub mod topology;

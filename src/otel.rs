// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # OpenTelemetry Integration
//!
//! Trace context travels in the application header table of a message. The template
//! injects the current context before publishing and the consumer extracts it to parent
//! the span it opens for each delivery.

use crate::message::MessageProperties;
use opentelemetry::{
    global::{self, BoxedSpan, BoxedTracer},
    propagation::{Extractor, Injector},
    trace::{SpanKind, Tracer},
    Context,
};
use serde_json::Value;
use std::borrow::Cow;

/// Writes trace context entries into a message's header table.
pub(crate) struct HeaderInjector<'a> {
    props: &'a mut MessageProperties,
}

impl<'a> HeaderInjector<'a> {
    pub(crate) fn new(props: &'a mut MessageProperties) -> Self {
        Self { props }
    }
}

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        self.props
            .set_header(&key.to_lowercase(), Value::String(value));
    }
}

/// Reads trace context entries from a message's header table.
pub(crate) struct HeaderExtractor<'a> {
    props: &'a MessageProperties,
}

impl<'a> HeaderExtractor<'a> {
    pub(crate) fn new(props: &'a MessageProperties) -> Self {
        Self { props }
    }
}

impl Extractor for HeaderExtractor<'_> {
    /// Only string headers can carry trace context.
    fn get(&self, key: &str) -> Option<&str> {
        match self.props.header(key) {
            Some(Value::String(value)) => Some(value.as_str()),
            _ => None,
        }
    }

    fn keys(&self) -> Vec<&str> {
        self.props.headers().keys().map(|k| k.as_str()).collect()
    }
}

/// Injects `ctx` into the message headers with the global propagator.
pub(crate) fn inject(ctx: &Context, props: &mut MessageProperties) {
    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(ctx, &mut HeaderInjector::new(props))
    });
}

/// Extracts the remote context from message properties and opens a consumer span
/// named `name` under it.
pub(crate) fn new_span(
    props: &MessageProperties,
    tracer: &BoxedTracer,
    name: &str,
) -> (Context, BoxedSpan) {
    let ctx = global::get_text_map_propagator(|propagator| {
        propagator.extract(&HeaderExtractor::new(props))
    });

    let span = tracer
        .span_builder(Cow::from(name.to_owned()))
        .with_kind(SpanKind::Consumer)
        .start_with_context(tracer, &ctx);

    (ctx, span)
}

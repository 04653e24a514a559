// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Endpoint Descriptor
//!
//! Endpoint URIs have the shape `scheme:exchange[:queue-or-key[:routing-key]]?opt=value&...`.
//!
//! Consumers name exchange, queue and routing key in that order. Producers name the
//! exchange and, optionally, a routing key. A two segment URI is therefore ambiguous:
//! `orders:billing` is a queue to a consumer and a routing key to a producer. The
//! second segment is parked in [`Binding::Pending`] until the descriptor is bound to a
//! role with [`EndpointDescriptor::resolve_as_producer`] or
//! [`EndpointDescriptor::resolve_as_consumer`].
//!
//! ```
//! use rabbitmq_endpoint::endpoint::EndpointDescriptor;
//!
//! let mut endpoint = EndpointDescriptor::from_uri("spring-amqp:orders:billing").unwrap();
//! endpoint.resolve_as_consumer().unwrap();
//! assert_eq!(endpoint.queue_name(), Some("billing"));
//! ```

use crate::{
    config::{AcknowledgeMode, EndpointOptions},
    errors::AmqpError,
    exchange::{ExchangeDefinition, ExchangeKind},
    queue::{QueueBinding, QueueDefinition},
};
use std::fmt::Write;
use tracing::{debug, info};

/// Scheme used by [`EndpointDescriptor::canonical_uri`] when none was parsed.
pub const DEFAULT_SCHEME: &str = "spring-amqp";
/// The broker's default exchange.
pub const DEFAULT_EXCHANGE_NAME: &str = "";

const MAX_SHORT_STRING_LEN: usize = 255;

/// Role binding state of a descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    /// Not yet used as producer or consumer. Holds the second positional segment of
    /// a two segment URI, whose meaning depends on the role.
    Pending(Option<String>),
    Producer,
    Consumer,
}

/// One logical binding to broker topology, built from an endpoint URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointDescriptor {
    scheme: String,
    exchange_name: String,
    queue_name: Option<String>,
    routing_key: Option<String>,
    /// Kind chosen by URI shape or consumer binding when none was configured.
    default_kind: Option<ExchangeKind>,
    binding: Binding,
    options: EndpointOptions,
}

impl EndpointDescriptor {
    /// Parses a full endpoint URI: `scheme:body?query`.
    ///
    /// Path segments and query values are percent-decoded, so names holding `:`, `?`
    /// or `&` can be written as they appear in [`Self::canonical_uri`].
    pub fn from_uri(uri: &str) -> Result<Self, AmqpError> {
        let (path, query) = match uri.split_once('?') {
            Some((path, query)) => (path, query),
            None => (uri, ""),
        };
        let (scheme, body) = match path.split_once(':') {
            Some((scheme, body)) => (scheme, body),
            None => (path, ""),
        };

        info!("creating endpoint for {}", body);

        let mut options = EndpointOptions::default();
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            options.set(&decode(key)?, &decode(value)?)?;
        }

        let segments = body
            .split(':')
            .map(decode)
            .collect::<Result<Vec<_>, _>>()?;

        let mut descriptor = Self::from_segments(segments, options)?;
        descriptor.scheme = scheme.to_owned();
        Ok(descriptor)
    }

    /// Builds a descriptor from the colon delimited URI body and its query options.
    pub fn parse<I, K, V>(body: &str, params: I) -> Result<Self, AmqpError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        info!("creating endpoint for {}", body);

        let mut options = EndpointOptions::default();
        for (key, value) in params {
            options.set(key.as_ref(), value.as_ref())?;
        }

        Self::with_options(body, options)
    }

    /// Builds a descriptor from the URI body and already assembled options.
    pub fn with_options(body: &str, options: EndpointOptions) -> Result<Self, AmqpError> {
        Self::from_segments(body.split(':').map(str::to_owned).collect(), options)
    }

    fn from_segments(
        mut segments: Vec<String>,
        options: EndpointOptions,
    ) -> Result<Self, AmqpError> {
        // "x:q:" names two segments, not three
        while segments.len() > 1 && segments.last().is_some_and(|s| s.is_empty()) {
            segments.pop();
        }

        let exchange_name = segments
            .first()
            .cloned()
            .unwrap_or_else(|| DEFAULT_EXCHANGE_NAME.to_owned());

        let mut descriptor = EndpointDescriptor {
            scheme: DEFAULT_SCHEME.to_owned(),
            exchange_name,
            queue_name: None,
            routing_key: None,
            default_kind: None,
            binding: Binding::Pending(None),
            options,
        };

        match segments.as_slice() {
            [_, queue, key, ..] => {
                descriptor.queue_name = Some(queue.clone());
                descriptor.routing_key = Some(key.clone());
            }
            [_, queue_or_key] => {
                descriptor.binding = Binding::Pending(Some(queue_or_key.clone()));
            }
            // only an exchange: nothing else to route on
            _ => descriptor.default_kind = Some(ExchangeKind::Fanout),
        }

        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Binds the descriptor as a producer: a pending segment is a routing key.
    ///
    /// Calling it again is a no-op. Fails if the descriptor is already bound as a consumer.
    pub fn resolve_as_producer(&mut self) -> Result<&Self, AmqpError> {
        match self.binding {
            Binding::Producer => return Ok(self),
            Binding::Consumer => return Err(self.already_bound("consumer")),
            Binding::Pending(_) => {}
        }

        if let Binding::Pending(pending) = &mut self.binding {
            if let Some(key) = pending.take() {
                self.routing_key = Some(key);
            }
        }

        self.validate()?;
        self.binding = Binding::Producer;
        debug!(uri = self.canonical_uri(), "endpoint bound as producer");
        Ok(self)
    }

    /// Binds the descriptor as a consumer: a pending segment is a queue name, and
    /// with no configured kind the exchange fans out to it.
    ///
    /// Calling it again is a no-op. Fails if no queue name results, or if the
    /// descriptor is already bound as a producer.
    pub fn resolve_as_consumer(&mut self) -> Result<&Self, AmqpError> {
        match self.binding {
            Binding::Consumer => return Ok(self),
            Binding::Producer => return Err(self.already_bound("producer")),
            Binding::Pending(_) => {}
        }

        if let Binding::Pending(pending) = &mut self.binding {
            if let Some(queue) = pending.take() {
                self.queue_name = Some(queue);
                if self.options.exchange_kind.is_none() {
                    self.default_kind = Some(ExchangeKind::Fanout);
                }
            }
        }

        self.validate()?;
        if self.queue_name.is_none() {
            return Err(AmqpError::configuration(format!(
                "cannot have a consumer without a queue name for {}",
                self.canonical_uri()
            )));
        }

        self.binding = Binding::Consumer;
        debug!(uri = self.canonical_uri(), "endpoint bound as consumer");
        Ok(self)
    }

    /// Exchange kind implied by the current state alone: the configured kind, else
    /// topic when a routing key is present, else direct.
    pub fn infer_exchange_kind(&self) -> ExchangeKind {
        match (self.options.exchange_kind, &self.routing_key) {
            (Some(kind), _) => kind,
            (None, Some(_)) => ExchangeKind::Topic,
            (None, None) => ExchangeKind::Direct,
        }
    }

    /// Kind the exchange is declared with: the configured kind, else the default
    /// picked from the URI shape or consumer binding, else [`Self::infer_exchange_kind`].
    pub fn exchange_kind(&self) -> ExchangeKind {
        self.options
            .exchange_kind
            .or(self.default_kind)
            .unwrap_or_else(|| self.infer_exchange_kind())
    }

    /// Stable string form used to identify the endpoint.
    ///
    /// Names are percent-encoded. Options are written in a fixed order; the HA and dead
    /// letter flags and the trailing options are left out while they hold their
    /// defaults. [`Self::from_uri`] on the output yields an equal descriptor, except
    /// that a kind picked by URI shape comes back as a configured `type`.
    pub fn canonical_uri(&self) -> String {
        let mut uri = format!(
            "{}:{}",
            self.scheme,
            urlencoding::encode(&self.exchange_name)
        );
        for segment in [&self.queue_name, &self.routing_key].into_iter().flatten() {
            let _ = write!(uri, ":{}", urlencoding::encode(segment));
        }
        if let Binding::Pending(Some(segment)) = &self.binding {
            let _ = write!(uri, ":{}", urlencoding::encode(segment));
        }

        let opts = &self.options;
        let _ = write!(
            uri,
            "?type={}&autodelete={}&concurrentConsumers={}&durable={}&exclusive={}&transactional={}",
            self.exchange_kind(),
            opts.autodelete,
            opts.concurrent_consumers,
            opts.durable,
            opts.exclusive,
            opts.transactional
        );
        if opts.ha {
            uri.push_str("&x-ha-policy=all");
        }
        if let Some(dlx) = opts.dlx_name.as_deref().filter(|n| !n.is_empty()) {
            let _ = write!(uri, "&x-dead-letter-exchange={}", urlencoding::encode(dlx));
        }
        let _ = write!(
            uri,
            "&autoReply={}&createResources={}",
            opts.auto_reply, opts.create_resources
        );

        let defaults = EndpointOptions::default();
        if opts.prefetch_count != defaults.prefetch_count {
            let _ = write!(uri, "&prefetchCount={}", opts.prefetch_count);
        }
        if let Some(ttl) = opts.time_to_live {
            let _ = write!(uri, "&timeToLive={ttl}");
        }
        if let Some(mode) = opts.acknowledge_mode {
            let _ = write!(uri, "&acknowledgeMode={mode}");
        }
        if let Some(dlq) = &opts.dlq_name {
            let _ = write!(uri, "&dlqName={}", urlencoding::encode(dlq));
        }
        if let Some(connection) = &opts.connection {
            let _ = write!(uri, "&connection={}", urlencoding::encode(connection));
        }

        uri
    }

    /// Definition of the exchange this endpoint publishes to or consumes from.
    pub fn exchange_definition(&self) -> ExchangeDefinition {
        let mut def = ExchangeDefinition::new(&self.exchange_name).kind(self.exchange_kind());
        if self.options.durable {
            def = def.durable();
        }
        if self.options.autodelete {
            def = def.delete();
        }
        def
    }

    /// Definition of the consumer queue, when one is named.
    pub fn queue_definition(&self) -> Option<QueueDefinition> {
        let name = self.queue_name.as_deref()?;
        let opts = &self.options;

        let mut def = QueueDefinition::new(name);
        if opts.durable {
            def = def.durable();
        }
        if opts.exclusive {
            def = def.exclusive();
        }
        if opts.autodelete {
            def = def.delete();
        }
        if let Some(ttl) = opts.time_to_live {
            def = def.ttl(ttl);
        }
        if let Some(dlx) = opts.dlx_name.as_deref() {
            def = def.dead_letter_exchange(dlx);
        }
        if opts.ha {
            def = def.ha();
        }
        Some(def)
    }

    /// Binding of the consumer queue to the endpoint exchange.
    ///
    /// `None` without a queue, or on the default exchange where every queue is
    /// implicitly bound by name.
    pub fn queue_binding(&self) -> Option<QueueBinding> {
        if self.is_using_default_exchange() {
            return None;
        }
        let queue = self.queue_name.as_deref()?;

        Some(
            QueueBinding::new(queue)
                .exchange(&self.exchange_name)
                .routing_key(self.routing_key.as_deref().unwrap_or_default()),
        )
    }

    /// Dead letter exchange, queue and binding, when both names are configured.
    ///
    /// The dead letter exchange fans out so rejected messages reach the queue whatever
    /// routing key they carried.
    pub fn dead_letter_definitions(
        &self,
    ) -> Option<(ExchangeDefinition, QueueDefinition, QueueBinding)> {
        let dlx = self.options.dlx_name.as_deref()?;
        let dlq = self.options.dlq_name.as_deref()?;

        let mut exchange = ExchangeDefinition::new(dlx).kind(ExchangeKind::Fanout);
        let mut queue = QueueDefinition::new(dlq);
        if self.options.durable {
            exchange = exchange.durable();
            queue = queue.durable();
        }

        Some((exchange, queue, QueueBinding::new(dlq).exchange(dlx)))
    }

    pub fn exchange_name(&self) -> &str {
        &self.exchange_name
    }

    pub fn queue_name(&self) -> Option<&str> {
        self.queue_name.as_deref()
    }

    pub fn routing_key(&self) -> Option<&str> {
        self.routing_key.as_deref()
    }

    pub fn binding(&self) -> &Binding {
        &self.binding
    }

    pub fn options(&self) -> &EndpointOptions {
        &self.options
    }

    pub fn acknowledge_mode(&self) -> AcknowledgeMode {
        self.options.acknowledge_mode()
    }

    pub fn connection(&self) -> Option<&str> {
        self.options.connection.as_deref()
    }

    pub fn is_using_default_exchange(&self) -> bool {
        self.exchange_name == DEFAULT_EXCHANGE_NAME
    }

    pub fn has_dlx_name(&self) -> bool {
        self.options.dlx_name.as_deref().is_some_and(|n| !n.is_empty())
    }

    /// Applies one named option. Only allowed before role binding.
    pub fn set_option(&mut self, key: &str, value: &str) -> Result<(), AmqpError> {
        self.ensure_unbound()?;
        self.options.set(key, value)
    }

    pub fn set_exchange_kind(&mut self, kind: ExchangeKind) -> Result<(), AmqpError> {
        self.ensure_unbound()?;
        self.options.exchange_kind = Some(kind);
        Ok(())
    }

    pub fn set_exchange_name(&mut self, name: &str) -> Result<(), AmqpError> {
        self.ensure_unbound()?;
        check_short_string("exchange name", name)?;
        self.exchange_name = name.to_owned();
        Ok(())
    }

    pub fn set_queue_name(&mut self, name: &str) -> Result<(), AmqpError> {
        self.ensure_unbound()?;
        check_short_string("queue name", name)?;
        self.queue_name = Some(name.to_owned());
        Ok(())
    }

    pub fn set_routing_key(&mut self, key: &str) -> Result<(), AmqpError> {
        self.ensure_unbound()?;
        check_short_string("routing key", key)?;
        self.routing_key = Some(key.to_owned());
        Ok(())
    }

    fn ensure_unbound(&self) -> Result<(), AmqpError> {
        match self.binding {
            Binding::Pending(_) => Ok(()),
            Binding::Producer => Err(self.already_bound("producer")),
            Binding::Consumer => Err(self.already_bound("consumer")),
        }
    }

    fn already_bound(&self, role: &str) -> AmqpError {
        AmqpError::configuration(format!(
            "endpoint {} is already bound as a {role}",
            self.canonical_uri()
        ))
    }

    fn validate(&self) -> Result<(), AmqpError> {
        check_short_string("exchange name", &self.exchange_name)?;
        if let Some(queue) = &self.queue_name {
            check_short_string("queue name", queue)?;
        }
        if let Some(key) = &self.routing_key {
            check_short_string("routing key", key)?;
        }
        if let Binding::Pending(Some(segment)) = &self.binding {
            check_short_string("queue name or routing key", segment)?;
        }
        Ok(())
    }
}

fn check_short_string(what: &str, value: &str) -> Result<(), AmqpError> {
    if value.len() > MAX_SHORT_STRING_LEN {
        return Err(AmqpError::configuration(format!(
            "{what} is longer than {MAX_SHORT_STRING_LEN} bytes"
        )));
    }
    Ok(())
}

fn decode(raw: &str) -> Result<String, AmqpError> {
    urlencoding::decode(raw)
        .map(|s| s.into_owned())
        .map_err(|_| AmqpError::configuration(format!("invalid percent-encoding in `{raw}`")))
}

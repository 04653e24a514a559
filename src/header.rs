// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Header Translation
//!
//! Moves metadata between the routing engine's header map and an [`AmqpMessage`].
//!
//! The ten settable AMQP basic properties travel under reserved header names and are
//! always written to the message's property slots, overwriting what was there. Every
//! other header goes to the message's application header table, but never replaces a
//! header that is already staged there. The routing control headers read by the
//! producer (`routingKey`, `exchangeName`) are never copied at all.
//!
//! Property values that cannot be converted (a non-numeric priority, an unknown
//! delivery mode) are skipped: the remaining headers are still applied and the
//! offending keys are returned to the caller.

use crate::{
    errors::AmqpError,
    message::{value_to_string, AmqpMessage, DeliveryMode, Envelope, Headers},
};
use serde_json::Value;
use tracing::warn;

pub const CONTENT_TYPE: &str = "contentType";
pub const CONTENT_ENCODING: &str = "contentEncoding";
pub const PRIORITY: &str = "priority";
pub const MESSAGE_ID: &str = "messageId";
pub const CORRELATION_ID: &str = "correlationId";
pub const APP_ID: &str = "appId";
pub const REPLY_TO: &str = "replyTo";
pub const EXPIRATION: &str = "expiration";
pub const DELIVERY_MODE: &str = "deliveryMode";
pub const TYPE: &str = "type";

/// Per-message override of the producer's routing key.
pub const ROUTING_KEY_HEADER: &str = "routingKey";
/// Per-message override of the producer's exchange.
pub const EXCHANGE_NAME_HEADER: &str = "exchangeName";
/// Exchange pattern marker kept by the routing engine on its own messages.
pub const EXCHANGE_PATTERN: &str = "exchangePattern";

/// Header names carrying AMQP basic properties.
pub const PROPERTY_HEADERS: [&str; 10] = [
    CONTENT_TYPE,
    CONTENT_ENCODING,
    PRIORITY,
    MESSAGE_ID,
    CORRELATION_ID,
    APP_ID,
    REPLY_TO,
    EXPIRATION,
    DELIVERY_MODE,
    TYPE,
];

/// Whether a header name is reserved for basic properties or routing control.
pub fn is_reserved(key: &str) -> bool {
    PROPERTY_HEADERS.contains(&key) || key == ROUTING_KEY_HEADER || key == EXCHANGE_NAME_HEADER
}

/// Sets the message's basic properties from the reserved headers present in `headers`.
///
/// Present keys overwrite the property; a null value clears it. Other keys are ignored.
/// Returns one [`AmqpError::MalformedHeaderError`] per key that could not be converted;
/// those properties keep their previous value.
pub fn apply_properties_from_headers(msg: &mut AmqpMessage, headers: &Headers) -> Vec<AmqpError> {
    let mut rejected = vec![];

    for (key, value) in headers {
        if let Err(err) = apply_property(msg, key, value) {
            warn!(error = err.to_string(), header = key.as_str(), "skipping header");
            rejected.push(err);
        }
    }

    rejected
}

fn apply_property(msg: &mut AmqpMessage, key: &str, value: &Value) -> Result<(), AmqpError> {
    let text = value_to_string(value);
    let props = &mut msg.properties;

    match key {
        CONTENT_TYPE => props.content_type = text,
        CONTENT_ENCODING => props.content_encoding = text,
        MESSAGE_ID => props.message_id = text,
        CORRELATION_ID => props.correlation_id = text.map(String::into_bytes),
        APP_ID => props.app_id = text,
        REPLY_TO => props.reply_to = text,
        EXPIRATION => props.expiration = text,
        TYPE => props.kind = text,
        PRIORITY => {
            props.priority = match text {
                Some(raw) => Some(
                    raw.parse::<u8>()
                        .map_err(|_| AmqpError::malformed_header(key, &raw))?,
                ),
                None => None,
            }
        }
        DELIVERY_MODE => {
            props.delivery_mode = match text {
                Some(raw) => Some(
                    raw.parse::<i64>()
                        .ok()
                        .and_then(|n| DeliveryMode::try_from(n).ok())
                        .ok_or_else(|| AmqpError::malformed_header(key, &raw))?,
                ),
                None => None,
            }
        }
        _ => {}
    }

    Ok(())
}

/// Writes the message's basic properties into `target` under the reserved names.
///
/// All ten keys are written, overwriting existing entries; unset properties are written
/// as `Value::Null`. Priority and delivery mode are written in decimal string form.
pub fn extract_properties_to_headers(target: &mut Headers, source: &AmqpMessage) {
    let props = &source.properties;
    let text = |v: &Option<String>| v.clone().map(Value::String).unwrap_or(Value::Null);

    target.insert(MESSAGE_ID.to_owned(), text(&props.message_id));
    target.insert(CORRELATION_ID.to_owned(), text(&props.correlation_id_str()));
    target.insert(APP_ID.to_owned(), text(&props.app_id));
    target.insert(CONTENT_ENCODING.to_owned(), text(&props.content_encoding));
    target.insert(CONTENT_TYPE.to_owned(), text(&props.content_type));
    target.insert(EXPIRATION.to_owned(), text(&props.expiration));
    target.insert(
        PRIORITY.to_owned(),
        text(&props.priority.map(|p| p.to_string())),
    );
    target.insert(REPLY_TO.to_owned(), text(&props.reply_to));
    target.insert(
        DELIVERY_MODE.to_owned(),
        text(&props.delivery_mode.map(|m| m.as_u8().to_string())),
    );
    target.insert(TYPE.to_owned(), text(&props.kind));
}

/// Copies every non-reserved header into the message's application header table.
///
/// Headers already present in the table are left untouched.
pub fn copy_headers_to_message(msg: &mut AmqpMessage, headers: &Headers) {
    for (key, value) in headers {
        if !is_reserved(key) {
            msg.properties.set_header_if_absent(key, value);
        }
    }
}

/// Copies every header except the exchange pattern marker into the envelope,
/// overwriting existing entries.
pub fn copy_headers_to_envelope<'a, I>(envelope: &mut Envelope, headers: I)
where
    I: IntoIterator<Item = (&'a String, &'a Value)>,
{
    for (key, value) in headers {
        if key != EXCHANGE_PATTERN {
            envelope.headers.insert(key.clone(), value.clone());
        }
    }
}

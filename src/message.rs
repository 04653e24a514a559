// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Model
//!
//! Two views of a message cross the endpoint boundary:
//!
//! - [`Envelope`]: the routing engine's message, a body plus a free-form header map.
//! - [`AmqpMessage`]: the broker's message, a body plus [`MessageProperties`], which keeps
//!   the settable AMQP basic properties in named slots and everything else in a separate
//!   header table. A basic property can never end up in the header table and vice versa.
//!
//! Header values are [`serde_json::Value`]s on both sides; `Value::Null` marks an absent
//! property. Conversions to and from lapin's [`BasicProperties`] live here as well.

use crate::{errors::AmqpError, header::PROPERTY_HEADERS};
use lapin::{
    types::{
        AMQPValue, ByteArray, FieldArray, FieldTable, LongLongInt, LongString, ShortString,
    },
    BasicProperties,
};
use serde_json::{Map, Number, Value};
use std::collections::{BTreeMap, HashMap};

/// Header map of the routing engine's message.
pub type Headers = HashMap<String, Value>;

/// AMQP delivery mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    NonPersistent,
    Persistent,
}

impl DeliveryMode {
    pub fn as_u8(&self) -> u8 {
        match self {
            DeliveryMode::NonPersistent => 1,
            DeliveryMode::Persistent => 2,
        }
    }
}

impl TryFrom<i64> for DeliveryMode {
    type Error = AmqpError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(DeliveryMode::NonPersistent),
            2 => Ok(DeliveryMode::Persistent),
            _ => Err(AmqpError::configuration(format!(
                "unknown delivery mode `{value}`"
            ))),
        }
    }
}

/// The settable AMQP basic properties plus the application header table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageProperties {
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub priority: Option<u8>,
    pub message_id: Option<String>,
    /// Raw bytes; text correlation ids are stored as their UTF-8 encoding.
    pub correlation_id: Option<Vec<u8>>,
    pub app_id: Option<String>,
    pub reply_to: Option<String>,
    pub expiration: Option<String>,
    pub delivery_mode: Option<DeliveryMode>,
    pub kind: Option<String>,
    headers: BTreeMap<String, Value>,
}

impl MessageProperties {
    /// Application headers, excluding the basic properties.
    pub fn headers(&self) -> &BTreeMap<String, Value> {
        &self.headers
    }

    pub fn header(&self, key: &str) -> Option<&Value> {
        self.headers.get(key)
    }

    pub fn has_header(&self, key: &str) -> bool {
        self.headers.contains_key(key)
    }

    /// Sets an application header, replacing any previous value.
    ///
    /// Basic property names belong to the property slots and are refused; returns
    /// whether the header was stored.
    pub fn set_header(&mut self, key: &str, value: Value) -> bool {
        if is_property_name(key) {
            return false;
        }
        self.headers.insert(key.to_owned(), value);
        true
    }

    /// Sets an application header only when the key is not already present.
    pub(crate) fn set_header_if_absent(&mut self, key: &str, value: &Value) {
        if !is_property_name(key) && !self.headers.contains_key(key) {
            self.headers.insert(key.to_owned(), value.clone());
        }
    }

    /// Correlation id decoded as text. Invalid UTF-8 sequences are replaced.
    pub fn correlation_id_str(&self) -> Option<String> {
        self.correlation_id
            .as_ref()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }
}

impl From<&MessageProperties> for BasicProperties {
    fn from(props: &MessageProperties) -> Self {
        let mut basic = BasicProperties::default();

        if let Some(v) = &props.content_type {
            basic = basic.with_content_type(ShortString::from(v.clone()));
        }
        if let Some(v) = &props.content_encoding {
            basic = basic.with_content_encoding(ShortString::from(v.clone()));
        }
        if let Some(v) = props.priority {
            basic = basic.with_priority(v);
        }
        if let Some(v) = &props.message_id {
            basic = basic.with_message_id(ShortString::from(v.clone()));
        }
        if let Some(v) = props.correlation_id_str() {
            basic = basic.with_correlation_id(ShortString::from(v));
        }
        if let Some(v) = &props.app_id {
            basic = basic.with_app_id(ShortString::from(v.clone()));
        }
        if let Some(v) = &props.reply_to {
            basic = basic.with_reply_to(ShortString::from(v.clone()));
        }
        if let Some(v) = &props.expiration {
            basic = basic.with_expiration(ShortString::from(v.clone()));
        }
        if let Some(v) = props.delivery_mode {
            basic = basic.with_delivery_mode(v.as_u8());
        }
        if let Some(v) = &props.kind {
            basic = basic.with_type(ShortString::from(v.clone()));
        }

        basic.with_headers(field_table(&props.headers))
    }
}

impl From<&BasicProperties> for MessageProperties {
    fn from(basic: &BasicProperties) -> Self {
        let short = |v: &Option<ShortString>| v.as_ref().map(|s| s.to_string());

        MessageProperties {
            content_type: short(basic.content_type()),
            content_encoding: short(basic.content_encoding()),
            priority: *basic.priority(),
            message_id: short(basic.message_id()),
            correlation_id: basic
                .correlation_id()
                .as_ref()
                .map(|s| s.as_str().as_bytes().to_vec()),
            app_id: short(basic.app_id()),
            reply_to: short(basic.reply_to()),
            expiration: short(basic.expiration()),
            delivery_mode: (*basic.delivery_mode())
                .and_then(|m| DeliveryMode::try_from(i64::from(m)).ok()),
            kind: short(basic.kind()),
            headers: basic
                .headers()
                .as_ref()
                .map(|table| {
                    table
                        .inner()
                        .iter()
                        .filter(|(k, _)| !is_property_name(k.as_str()))
                        .map(|(k, v)| (k.to_string(), from_amqp_value(v)))
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

fn is_property_name(key: &str) -> bool {
    PROPERTY_HEADERS.contains(&key)
}

/// A message on the broker side.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AmqpMessage {
    pub body: Vec<u8>,
    pub properties: MessageProperties,
}

impl AmqpMessage {
    pub fn new(body: Vec<u8>) -> Self {
        AmqpMessage {
            body,
            properties: MessageProperties::default(),
        }
    }
}

/// A message on the routing engine side.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Envelope {
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl Envelope {
    pub fn new(body: Vec<u8>) -> Self {
        Envelope {
            headers: Headers::default(),
            body,
        }
    }

    /// Adds a header, replacing any previous value.
    pub fn with_header(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.headers.insert(key.to_owned(), value.into());
        self
    }

    pub fn header(&self, key: &str) -> Option<&Value> {
        self.headers.get(key)
    }

    /// String form of a header, `None` when absent or null.
    pub fn header_str(&self, key: &str) -> Option<String> {
        self.headers.get(key).and_then(value_to_string)
    }
}

/// String form of a header value: strings as-is, other scalars as JSON text, null as `None`.
pub fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Builds an AMQP field table from application headers.
pub fn field_table(headers: &BTreeMap<String, Value>) -> FieldTable {
    let btree: BTreeMap<ShortString, AMQPValue> = headers
        .iter()
        .map(|(k, v)| (ShortString::from(k.clone()), to_amqp_value(v)))
        .collect();
    FieldTable::from(btree)
}

/// Converts a header value into its AMQP field representation.
///
/// AMQP has no unsigned 64 bit field, so integers above `i64::MAX` are sent as their
/// decimal text rather than rounded through a double.
pub fn to_amqp_value(value: &Value) -> AMQPValue {
    match value {
        Value::Null => AMQPValue::Void,
        Value::Bool(b) => AMQPValue::Boolean(*b),
        Value::Number(n) => match (n.as_i64(), n.as_u64()) {
            (Some(i), _) => AMQPValue::LongLongInt(LongLongInt::from(i)),
            (None, Some(_)) => AMQPValue::LongString(LongString::from(n.to_string())),
            (None, None) => AMQPValue::Double(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => AMQPValue::LongString(LongString::from(s.clone())),
        Value::Array(items) => AMQPValue::FieldArray(FieldArray::from(
            items.iter().map(to_amqp_value).collect::<Vec<_>>(),
        )),
        Value::Object(map) => {
            let btree: BTreeMap<ShortString, AMQPValue> = map
                .iter()
                .map(|(k, v)| (ShortString::from(k.clone()), to_amqp_value(v)))
                .collect();
            AMQPValue::FieldTable(FieldTable::from(btree))
        }
    }
}

/// Converts an AMQP field value into a header value.
pub fn from_amqp_value(value: &AMQPValue) -> Value {
    match value {
        AMQPValue::Boolean(b) => Value::Bool(*b),
        AMQPValue::ShortShortInt(v) => Value::from(*v),
        AMQPValue::ShortShortUInt(v) => Value::from(*v),
        AMQPValue::ShortInt(v) => Value::from(*v),
        AMQPValue::ShortUInt(v) => Value::from(*v),
        AMQPValue::LongInt(v) => Value::from(*v),
        AMQPValue::LongUInt(v) => Value::from(*v),
        AMQPValue::LongLongInt(v) => Value::from(*v),
        AMQPValue::Timestamp(v) => Value::from(*v),
        AMQPValue::Float(v) => float(f64::from(*v)),
        AMQPValue::Double(v) => float(*v),
        AMQPValue::DecimalValue(d) => float(f64::from(d.value) / 10f64.powi(i32::from(d.scale))),
        AMQPValue::ShortString(s) => Value::String(s.to_string()),
        AMQPValue::LongString(s) => {
            Value::String(String::from_utf8_lossy(s.as_bytes()).into_owned())
        }
        AMQPValue::FieldArray(items) => {
            Value::Array(items.as_slice().iter().map(from_amqp_value).collect())
        }
        AMQPValue::FieldTable(table) => Value::Object(
            table
                .inner()
                .iter()
                .map(|(k, v)| (k.to_string(), from_amqp_value(v)))
                .collect::<Map<String, Value>>(),
        ),
        AMQPValue::ByteArray(bytes) => byte_array(bytes),
        AMQPValue::Void => Value::Null,
    }
}

fn float(v: f64) -> Value {
    Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null)
}

fn byte_array(bytes: &ByteArray) -> Value {
    Value::Array(bytes.as_slice().iter().map(|b| Value::from(*b)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{MESSAGE_ID, PRIORITY};
    use serde_json::json;

    #[test]
    fn header_table_round_trips_through_lapin() {
        let mut props = MessageProperties {
            content_type: Some("application/json".to_owned()),
            priority: Some(5),
            correlation_id: Some(b"corr-1".to_vec()),
            delivery_mode: Some(DeliveryMode::Persistent),
            ..Default::default()
        };
        props.set_header("tenant", json!("acme"));
        props.set_header("attempt", json!(3));
        props.set_header("flags", json!([true, false]));
        props.set_header("meta", json!({"region": "eu"}));

        let basic = BasicProperties::from(&props);
        let back = MessageProperties::from(&basic);

        assert_eq!(back, props);
    }

    #[test]
    fn basic_properties_stay_out_of_header_table() {
        let props = MessageProperties {
            message_id: Some("m-1".to_owned()),
            ..Default::default()
        };

        let basic = BasicProperties::from(&props);
        let table = basic.headers().clone().unwrap_or_default();

        assert!(table.inner().is_empty());
        assert_eq!(
            basic.message_id().as_ref().map(|s| s.as_str()),
            Some("m-1")
        );
    }

    #[test]
    fn string_form_of_values() {
        assert_eq!(value_to_string(&json!("abc")), Some("abc".to_owned()));
        assert_eq!(value_to_string(&json!(7)), Some("7".to_owned()));
        assert_eq!(value_to_string(&json!(true)), Some("true".to_owned()));
        assert_eq!(value_to_string(&Value::Null), None);
    }

    #[test]
    fn delivery_mode_accepts_only_protocol_values() {
        assert_eq!(DeliveryMode::try_from(1i64), Ok(DeliveryMode::NonPersistent));
        assert_eq!(DeliveryMode::try_from(2i64), Ok(DeliveryMode::Persistent));
        assert!(DeliveryMode::try_from(3i64).is_err());
    }

    #[test]
    fn set_header_if_absent_keeps_first_value() {
        let mut props = MessageProperties::default();

        props.set_header_if_absent("k", &json!("first"));
        props.set_header_if_absent("k", &json!("second"));
        props.set_header_if_absent(MESSAGE_ID, &json!("m-1"));

        assert_eq!(props.header("k"), Some(&json!("first")));
        assert!(!props.has_header(MESSAGE_ID));
    }

    #[test]
    fn header_table_refuses_property_names() {
        let mut props = MessageProperties::default();

        assert!(!props.set_header(PRIORITY, json!("9")));
        assert!(props.set_header("tenant", json!("acme")));

        assert!(!props.has_header(PRIORITY));
        assert_eq!(props.priority, None);
        assert_eq!(props.headers().len(), 1);
    }

    #[test]
    fn inbound_table_drops_property_names() {
        let mut table = BTreeMap::new();
        table.insert(
            ShortString::from(MESSAGE_ID),
            AMQPValue::LongString(LongString::from("x")),
        );
        table.insert(
            ShortString::from("tenant"),
            AMQPValue::LongString(LongString::from("acme")),
        );
        let basic = BasicProperties::default().with_headers(FieldTable::from(table));

        let props = MessageProperties::from(&basic);

        assert!(!props.has_header(MESSAGE_ID));
        assert_eq!(props.message_id, None);
        assert_eq!(props.header("tenant"), Some(&json!("acme")));
    }

    #[test]
    fn large_unsigned_numbers_keep_their_digits() {
        assert_eq!(
            to_amqp_value(&json!(u64::MAX)),
            AMQPValue::LongString(LongString::from(u64::MAX.to_string()))
        );
        assert_eq!(
            to_amqp_value(&json!(42)),
            AMQPValue::LongLongInt(42)
        );
        assert_eq!(to_amqp_value(&json!(1.5)), AMQPValue::Double(1.5));
    }
}

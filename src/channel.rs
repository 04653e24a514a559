// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Channel Management
//!
//! Opens the connection and channel that [`ChannelAdmin`](crate::topology::ChannelAdmin),
//! [`ChannelTemplate`](crate::template::ChannelTemplate) and
//! [`EndpointConsumer`](crate::consumer::EndpointConsumer) run on.

use crate::{config::ConnectionConfig, errors::AmqpError};
use lapin::{types::LongString, Channel, Connection, ConnectionProperties};
use std::sync::Arc;
use tracing::{debug, error};

/// Connects to RabbitMQ with `cfg` and creates a channel on that connection.
///
/// The connection is named after `cfg.app_name`. Both the connection and channel are
/// wrapped in Arc for sharing between endpoints.
pub async fn new_amqp_channel(
    cfg: &ConnectionConfig,
) -> Result<(Arc<Connection>, Arc<Channel>), AmqpError> {
    debug!("creating amqp connection...");
    let options = ConnectionProperties::default()
        .with_connection_name(LongString::from(cfg.app_name.clone()));

    let conn = match Connection::connect(&cfg.amqp_uri(), options).await {
        Ok(c) => Ok(c),
        Err(err) => {
            error!(error = err.to_string(), host = cfg.host.as_str(), "failure to connect");
            Err(AmqpError::ConnectionError)
        }
    }?;
    debug!("amqp connected");

    debug!("creating amqp channel...");
    match conn.create_channel().await {
        Ok(c) => {
            debug!("channel created");
            Ok((Arc::new(conn), Arc::new(c)))
        }
        Err(err) => {
            error!(error = err.to_string(), "error to create the channel");
            Err(AmqpError::ChannelError)
        }
    }
}

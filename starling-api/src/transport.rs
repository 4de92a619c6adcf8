//! # Transport Contract
//!
//! A minimal async interface over a publish/subscribe backend (in-memory,
//! Redis, Kafka, ...). The transport knows nothing about requests, responses or
//! correlation: it moves opaque JSON payloads between named channels.
//!
//! ## Channels
//!
//! [`Channel::bind`] subscribes a handler to a channel name and returns a handle
//! that can publish onto that channel and later unsubscribe from it. Binding
//! without a handler yields a publish-only handle.
//!
//! ## Acknowledgement
//!
//! Consumers acknowledge every delivered message with [`Transport::ack`].
//! The node runtime acks fire-and-forget; an ack failure is logged and never
//! retried.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::TransportError;
use crate::types::MessageHandler;

/// A message delivered on a subscribed channel.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportMessage {
    /// Backend specific delivery id, used for acknowledgement
    pub id: String,
    /// Channel the message was published on
    pub channel: String,
    pub payload: Value,
}

/// Pub/sub backend consumed by the node runtime.
///
/// Implementations must be object safe (`Arc<dyn Transport>`). A transport value
/// represents one connection: `unsubscribe` only removes subscriptions made
/// through the same value.
#[async_trait]
pub trait Transport: Send + Sync + Debug + 'static {
    /// Starts delivering messages published on `channel` to `handler`.
    async fn subscribe(&self, channel: &str, handler: MessageHandler) -> Result<(), TransportError>;

    /// Stops delivering messages from `channel` to this connection.
    async fn unsubscribe(&self, channel: &str) -> Result<(), TransportError>;

    /// Publishes `message` to every subscriber of `channel`.
    async fn publish(&self, channel: &str, message: Value) -> Result<(), TransportError>;

    /// Acknowledges a delivered message.
    async fn ack(&self, message: &TransportMessage) -> Result<(), TransportError>;
}

/// Handle to a bound channel.
#[derive(Debug, Clone)]
pub struct Channel {
    name: String,
    subscribed: bool,
    transport: Arc<dyn Transport>,
}

impl Channel {
    /// Binds `name` on `transport`, subscribing `handler` if one is given.
    pub async fn bind(
        transport: Arc<dyn Transport>,
        name: impl Into<String>,
        handler: Option<MessageHandler>,
    ) -> Result<Self, TransportError> {
        let name = name.into();
        let subscribed = match handler {
            Some(handler) => {
                transport.subscribe(&name, handler).await?;
                tracing::debug!(channel = %name, "Channel subscribed");
                true
            }
            None => false,
        };
        Ok(Self {
            name,
            subscribed,
            transport,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Publishes a message onto this channel.
    pub async fn send(&self, message: Value) -> Result<(), TransportError> {
        self.transport.publish(&self.name, message).await
    }

    /// Removes the subscription made at bind time. No-op for publish-only handles.
    pub async fn unsubscribe(&self) -> Result<(), TransportError> {
        if !self.subscribed {
            return Ok(());
        }
        self.transport.unsubscribe(&self.name).await?;
        tracing::debug!(channel = %self.name, "Channel unsubscribed");
        Ok(())
    }
}

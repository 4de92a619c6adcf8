use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use flume::Sender;
use futures::FutureExt;
use serde_json::Value;
use starling_api::errors::TransportError;
use starling_api::transport::{Transport, TransportMessage};
use starling_api::types::MessageHandler;
use tracing::{error, trace};

use crate::scheduler::task::panic_message;

#[derive(Debug)]
struct Subscription {
    connection: u64,
    sender: Sender<TransportMessage>,
}

#[derive(Debug, Default)]
struct BrokerInner {
    channels: Mutex<HashMap<String, Vec<Subscription>>>,
    next_connection: AtomicU64,
    next_message: AtomicU64,
}

/// Shared channel table standing in for an external pub/sub server.
///
/// Cloning yields another handle to the same broker. Every node connects
/// through its own [`InMemoryTransport`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    inner: Arc<BrokerInner>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of subscriptions currently attached to `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels().get(channel).map_or(0, Vec::len)
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<String, Vec<Subscription>>> {
        self.inner.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One connection to an [`InMemoryBroker`].
///
/// Each subscription owns an ordered delivery queue drained by its own task, so
/// messages on one channel reach a subscriber in publish order while a slow
/// handler never stalls other channels.
#[derive(Debug)]
pub struct InMemoryTransport {
    connection: u64,
    broker: InMemoryBroker,
    fail_publish: AtomicBool,
    acked: AtomicUsize,
}

impl InMemoryTransport {
    pub fn connect(broker: &InMemoryBroker) -> Self {
        Self {
            connection: broker.inner.next_connection.fetch_add(1, Ordering::Relaxed),
            broker: broker.clone(),
            fail_publish: AtomicBool::new(false),
            acked: AtomicUsize::new(0),
        }
    }

    /// Makes every subsequent publish through this connection fail.
    pub fn set_publish_failure(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Messages acknowledged through this connection so far.
    pub fn acked_count(&self) -> usize {
        self.acked.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn subscribe(&self, channel: &str, handler: MessageHandler) -> Result<(), TransportError> {
        let (sender, receiver) = flume::unbounded::<TransportMessage>();
        {
            let mut channels = self.broker.channels();
            let subscriptions = channels.entry(channel.to_string()).or_default();
            // Re-subscribing replaces this connection's previous handler.
            subscriptions.retain(|sub| sub.connection != self.connection);
            subscriptions.push(Subscription {
                connection: self.connection,
                sender,
            });
        }

        let channel_name = channel.to_string();
        tokio::spawn(async move {
            while let Ok(message) = receiver.recv_async().await {
                if let Err(panic) = AssertUnwindSafe(handler(message)).catch_unwind().await {
                    error!(channel = %channel_name, panic = %panic_message(panic), "Channel handler panicked");
                }
            }
            trace!(channel = %channel_name, "Subscription drained");
        });
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), TransportError> {
        let mut channels = self.broker.channels();
        if let Some(subscriptions) = channels.get_mut(channel) {
            subscriptions.retain(|sub| sub.connection != self.connection);
            if subscriptions.is_empty() {
                channels.remove(channel);
            }
        }
        Ok(())
    }

    async fn publish(&self, channel: &str, message: Value) -> Result<(), TransportError> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(TransportError::PublishFailed {
                channel: channel.to_string(),
                reason: "publish failure injected".to_string(),
            });
        }

        let mut channels = self.broker.channels();
        let Some(subscriptions) = channels.get_mut(channel) else {
            trace!(channel, "No subscribers, message dropped");
            return Ok(());
        };

        // Drained subscriptions are pruned as they are found.
        subscriptions.retain(|sub| {
            let id = self.broker.inner.next_message.fetch_add(1, Ordering::Relaxed);
            let delivery = TransportMessage {
                id: id.to_string(),
                channel: channel.to_string(),
                payload: message.clone(),
            };
            sub.sender.send(delivery).is_ok()
        });
        Ok(())
    }

    async fn ack(&self, _message: &TransportMessage) -> Result<(), TransportError> {
        self.acked.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for InMemoryTransport {
    fn drop(&mut self) {
        let mut channels = self.broker.channels();
        for subscriptions in channels.values_mut() {
            subscriptions.retain(|sub| sub.connection != self.connection);
        }
        channels.retain(|_, subscriptions| !subscriptions.is_empty());
    }
}

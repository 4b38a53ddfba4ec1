use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use redis::AsyncCommands;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

/// Live fan-out bus for override changes. Purely live: no backlog, no
/// replay, at-most-once delivery. The store stays the source of truth, the
/// bus is a freshness optimization.
#[async_trait]
pub trait PubSub {
    /// Fire-and-forget broadcast of an opaque message.
    async fn publish(&self, channel: &str, message: &str) -> Result<()>;

    /// Opens a dedicated subscription receiving every message published to
    /// `channel` after this call returns.
    async fn subscribe(&self, channel: &str) -> Result<Subscription>;
}

/// Handle to a live subscription. Dropping it tears the subscription down:
/// the forwarding task is aborted, which releases its connection or bus
/// receiver, so an abandoned consumer cannot leak subscriptions.
pub struct Subscription {
    receiver: mpsc::UnboundedReceiver<String>,
    forwarder: JoinHandle<()>,
}

impl Subscription {
    fn new(receiver: mpsc::UnboundedReceiver<String>, forwarder: JoinHandle<()>) -> Self {
        Subscription {
            receiver,
            forwarder,
        }
    }

    /// Next message, or `None` once the channel is gone.
    pub async fn recv(&mut self) -> Option<String> {
        self.receiver.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

pub struct RedisPubSub {
    client: redis::Client,
}

impl RedisPubSub {
    pub fn new(addr: String) -> Result<RedisPubSub> {
        let client = redis::Client::open(addr)?;

        Ok(RedisPubSub { client })
    }
}

#[async_trait]
impl PubSub for RedisPubSub {
    async fn publish(&self, channel: &str, message: &str) -> Result<()> {
        let mut conn = self.client.get_async_connection().await?;
        // The receiver count is irrelevant for fire-and-forget delivery.
        let _receivers: i64 = conn.publish(channel, message).await?;

        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        // Dedicated connection per subscription, a connection in subscribe
        // mode cannot issue other commands.
        let conn = self.client.get_async_connection().await?;
        let mut pubsub = conn.into_pubsub();
        pubsub.subscribe(channel).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let forwarder = tokio::spawn(async move {
            let mut messages = pubsub.on_message();
            while let Some(msg) = messages.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::warn!("dropping non-utf8 pubsub payload: {}", e);
                        continue;
                    }
                };
                if tx.send(payload).is_err() {
                    break;
                }
            }
        });

        Ok(Subscription::new(rx, forwarder))
    }
}

const IN_MEMORY_CHANNEL_CAPACITY: usize = 128;

/// Process-local bus for tests and single-instance deployments.
#[derive(Clone, Default)]
pub struct InMemoryPubSub {
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<String>>>>,
}

impl InMemoryPubSub {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        let mut channels = self.channels.lock().expect("channels lock poisoned");
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(IN_MEMORY_CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Live subscriber count for a channel, used by teardown tests.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .lock()
            .expect("channels lock poisoned")
            .get(channel)
            .map_or(0, broadcast::Sender::receiver_count)
    }
}

#[async_trait]
impl PubSub for InMemoryPubSub {
    async fn publish(&self, channel: &str, message: &str) -> Result<()> {
        // A send error only means nobody is subscribed right now.
        let _subscribers = self.sender(channel).send(message.to_string());

        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        let mut bus = self.sender(channel).subscribe();

        let (tx, rx) = mpsc::unbounded_channel();
        let forwarder = tokio::spawn(async move {
            loop {
                match bus.recv().await {
                    Ok(message) => {
                        if tx.send(message).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("in-memory subscriber lagged, skipped {}", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(Subscription::new(rx, forwarder))
    }
}

//! Redis pub/sub bus for [`JobTerminalEvent`]s.
//!
//! Pub/sub is not durable: events published while a subscriber is offline are
//! lost. Pollers of the status store still see every terminal state.

use std::sync::mpsc;
use std::thread;

use redis::Commands;
use tracing::{debug, warn};

use forgecrm_events::{EventBus, JobTerminalEvent, Subscription};

pub const DEFAULT_CHANNEL: &str = "forgecrm:bulk_email:events";

#[derive(Debug, thiserror::Error)]
pub enum RedisBusError {
    #[error("redis: {0}")]
    Redis(String),
    #[error("serialize: {0}")]
    Serialize(String),
}

#[derive(Debug, Clone)]
pub struct RedisPubSubEventBus {
    client: redis::Client,
    channel: String,
}

impl RedisPubSubEventBus {
    pub fn new(redis_url: impl AsRef<str>, channel: impl Into<String>) -> Result<Self, RedisBusError> {
        let client = redis::Client::open(redis_url.as_ref()).map_err(|e| RedisBusError::Redis(e.to_string()))?;
        Ok(Self {
            client,
            channel: channel.into(),
        })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

impl EventBus<JobTerminalEvent> for RedisPubSubEventBus {
    type Error = RedisBusError;

    fn publish(&self, message: JobTerminalEvent) -> Result<(), Self::Error> {
        let payload = serde_json::to_string(&message).map_err(|e| RedisBusError::Serialize(e.to_string()))?;

        let mut conn = self
            .client
            .get_connection()
            .map_err(|e| RedisBusError::Redis(e.to_string()))?;

        let receivers: i64 = conn
            .publish(&self.channel, payload)
            .map_err(|e| RedisBusError::Redis(e.to_string()))?;
        debug!(job_id = %message.job_id, receivers, "terminal event published to redis");
        Ok(())
    }

    fn subscribe(&self) -> Subscription<JobTerminalEvent> {
        let (tx, rx) = mpsc::channel();

        let client = self.client.clone();
        let channel = self.channel.clone();

        // Forwarding thread; it exits once the subscription is dropped.
        thread::spawn(move || {
            let mut conn = match client.get_connection() {
                Ok(c) => c,
                Err(e) => {
                    warn!(error = %e, "redis subscriber could not connect");
                    return;
                }
            };

            let mut pubsub = conn.as_pubsub();
            if let Err(e) = pubsub.subscribe(&channel) {
                warn!(error = %e, %channel, "redis subscribe failed");
                return;
            }

            loop {
                let msg = match pubsub.get_message() {
                    Ok(m) => m,
                    Err(e) => {
                        warn!(error = %e, "redis subscription closed");
                        return;
                    }
                };

                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(_) => continue,
                };

                let event: JobTerminalEvent = match serde_json::from_str(&payload) {
                    Ok(e) => e,
                    Err(e) => {
                        debug!(error = %e, "skipping unrecognised payload");
                        continue;
                    }
                };

                if tx.send(event).is_err() {
                    return;
                }
            }
        });

        Subscription::new(rx)
    }
}

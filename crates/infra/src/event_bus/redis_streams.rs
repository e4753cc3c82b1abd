//! Redis Streams event bus (`redis` feature).
//!
//! Envelopes are XADDed as JSON to a single stream key; subscribers run a
//! background thread reading either ad-hoc (XREAD from `$`) or through a
//! consumer group (XREADGROUP + XACK) for load-balanced, resumable
//! consumption. Delivery stays at-least-once; consumers are idempotent.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::{Client, Commands};
use serde_json::Value as JsonValue;
use tracing::warn;

use stockpile_core::TenantId;
use stockpile_events::{EventBus, EventEnvelope, Subscription};

const DEFAULT_STREAM_KEY: &str = "stockpile:events";
const DEFAULT_MAX_LEN: usize = 100_000;

#[derive(Debug)]
pub enum RedisBusError {
    Connection(String),
    Publish(String),
    Serialize(String),
}

/// Redis Streams-backed event bus.
pub struct RedisStreamsEventBus {
    client: Client,
    stream_key: String,
    /// Approximate stream trim length (XADD MAXLEN ~).
    max_len: usize,
}

impl RedisStreamsEventBus {
    pub fn new(
        redis_url: &str,
        stream_key: Option<String>,
        max_len: Option<usize>,
    ) -> Result<Self, RedisBusError> {
        let client =
            Client::open(redis_url).map_err(|e| RedisBusError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            stream_key: stream_key.unwrap_or_else(|| DEFAULT_STREAM_KEY.to_string()),
            max_len: max_len.unwrap_or(DEFAULT_MAX_LEN),
        })
    }

    /// Create the consumer group if it does not exist yet (idempotent).
    pub fn ensure_consumer_group(&self, group: &str) -> Result<(), RedisBusError> {
        let mut conn = self
            .client
            .get_connection()
            .map_err(|e| RedisBusError::Connection(e.to_string()))?;

        // BUSYGROUP means the group already exists; that is fine.
        let result: redis::RedisResult<()> =
            conn.xgroup_create_mkstream(&self.stream_key, group, "$");
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(RedisBusError::Connection(e.to_string())),
        }
    }

    /// Subscribe through a consumer group.
    ///
    /// Messages are XACKed after they have been handed to the channel; an
    /// optional tenant filter drops foreign-tenant envelopes before the
    /// channel (defense in depth for tenant-pinned workers).
    pub fn subscribe_with_group(
        &self,
        group: &str,
        consumer: &str,
        tenant_filter: Option<TenantId>,
    ) -> Subscription<EventEnvelope<JsonValue>> {
        let (tx, rx) = mpsc::channel();
        let client = self.client.clone();
        let stream_key = self.stream_key.clone();
        let group = group.to_string();
        let consumer = consumer.to_string();

        thread::spawn(move || {
            let mut conn = match client.get_connection() {
                Ok(c) => c,
                Err(e) => {
                    warn!("redis bus: connection failed: {e}");
                    return;
                }
            };

            loop {
                let options = StreamReadOptions::default()
                    .group(&group, &consumer)
                    .count(64)
                    .block(1_000);

                let reply: redis::RedisResult<StreamReadReply> =
                    conn.xread_options(&[&stream_key], &[">"], &options);

                let reply = match reply {
                    Ok(r) => r,
                    Err(e) => {
                        warn!("redis bus: read failed: {e}");
                        thread::sleep(Duration::from_millis(500));
                        continue;
                    }
                };

                for stream in reply.keys {
                    for entry in stream.ids {
                        if let Some(env) = decode_entry(&entry) {
                            let keep = tenant_filter
                                .map(|t| env.tenant_id() == t)
                                .unwrap_or(true);
                            if keep && tx.send(env).is_err() {
                                // Subscriber dropped; stop consuming.
                                return;
                            }
                        }

                        let _: redis::RedisResult<()> =
                            conn.xack(&stream_key, &group, &[&entry.id]);
                    }
                }
            }
        });

        Subscription::new(rx)
    }
}

fn decode_entry(entry: &redis::streams::StreamId) -> Option<EventEnvelope<JsonValue>> {
    let payload: String = entry.get("envelope")?;
    match serde_json::from_str(&payload) {
        Ok(env) => Some(env),
        Err(e) => {
            warn!("redis bus: undecodable envelope at {}: {e}", entry.id);
            None
        }
    }
}

impl EventBus<EventEnvelope<JsonValue>> for RedisStreamsEventBus {
    type Error = RedisBusError;

    fn publish(&self, message: EventEnvelope<JsonValue>) -> Result<(), Self::Error> {
        let mut conn = self
            .client
            .get_connection()
            .map_err(|e| RedisBusError::Connection(e.to_string()))?;

        let payload = serde_json::to_string(&message)
            .map_err(|e| RedisBusError::Serialize(e.to_string()))?;

        let _: String = conn
            .xadd_maxlen(
                &self.stream_key,
                redis::streams::StreamMaxlen::Approx(self.max_len),
                "*",
                &[("envelope", payload.as_str())],
            )
            .map_err(|e| RedisBusError::Publish(e.to_string()))?;

        Ok(())
    }

    /// Ad-hoc subscription (no consumer group): reads new entries from `$`.
    fn subscribe(&self) -> Subscription<EventEnvelope<JsonValue>> {
        let (tx, rx) = mpsc::channel();
        let client = self.client.clone();
        let stream_key = self.stream_key.clone();

        thread::spawn(move || {
            let mut conn = match client.get_connection() {
                Ok(c) => c,
                Err(e) => {
                    warn!("redis bus: connection failed: {e}");
                    return;
                }
            };

            let mut last_id = "$".to_string();
            loop {
                let options = StreamReadOptions::default().count(64).block(1_000);
                let reply: redis::RedisResult<StreamReadReply> =
                    conn.xread_options(&[&stream_key], &[&last_id], &options);

                let reply = match reply {
                    Ok(r) => r,
                    Err(e) => {
                        warn!("redis bus: read failed: {e}");
                        thread::sleep(Duration::from_millis(500));
                        continue;
                    }
                };

                for stream in reply.keys {
                    for entry in stream.ids {
                        last_id = entry.id.clone();
                        if let Some(env) = decode_entry(&entry) {
                            if tx.send(env).is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        });

        Subscription::new(rx)
    }
}

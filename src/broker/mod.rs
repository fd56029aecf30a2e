// Topic pub/sub broker with per-connection outbound queues

pub mod protocol;
pub mod queue;

#[cfg(test)]
pub(crate) mod testing;

pub use protocol::{ClientMessage, Envelope, MessageType, Topic, VehiclePosition};
pub use queue::{EnqueueOutcome, OutboundQueue, OverflowPolicy};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Opaque connection identifier (UUIDv7, time-ordered)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ConnectionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Broker errors
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerError {
    /// The connection is gone (usually a race with disconnect)
    UnknownConnection(ConnectionId),
    /// A full queue under the disconnect policy
    QueueOverflow(ConnectionId),
    Serialization(String),
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerError::UnknownConnection(id) => write!(f, "unknown connection {}", id),
            BrokerError::QueueOverflow(id) => write!(f, "outbound queue overflow on {}", id),
            BrokerError::Serialization(e) => write!(f, "failed to serialize envelope: {}", e),
        }
    }
}

impl std::error::Error for BrokerError {}

/// Fan-out result of one publish
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PublishReport {
    /// Connections subscribed to the topic at publish time
    pub subscribers: usize,
    /// Frames accepted into an outbound queue
    pub delivered: usize,
    /// Older frames evicted to make room
    pub dropped: usize,
    /// Connections removed by the disconnect policy
    pub disconnected: usize,
}

/// Publish/subscribe seam used by the ticker and alert dispatcher
pub trait Broker: Send + Sync {
    /// Register a new connection with no subscriptions
    fn connect(&self) -> ConnectionId;

    /// Idempotent
    fn subscribe(&self, connection_id: &ConnectionId, topic: Topic) -> Result<(), BrokerError>;

    /// Idempotent; not being subscribed is not an error
    fn unsubscribe(&self, connection_id: &ConnectionId, topic: Topic) -> Result<(), BrokerError>;

    /// Fan `envelope` out to every subscriber of `topic`.
    ///
    /// Zero subscribers is a no-op, not an error.
    fn publish(&self, topic: Topic, envelope: &Envelope) -> Result<PublishReport, BrokerError>;

    /// Remove the connection and all its subscriptions; returns false if it
    /// was already gone
    fn disconnect(&self, connection_id: &ConnectionId) -> bool;
}

/// Broker tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default)]
    pub overflow_policy: OverflowPolicy,
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

fn default_queue_capacity() -> usize {
    256
}

fn default_shutdown_timeout_ms() -> u64 {
    3000
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            overflow_policy: OverflowPolicy::default(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

/// Connection metadata as exposed to the admin API
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub connection_id: ConnectionId,
    pub subscribed_topics: Vec<Topic>,
    pub connected_at: DateTime<Utc>,
    pub last_heartbeat_at: DateTime<Utc>,
    pub queued: usize,
    pub dropped: u64,
}

struct ConnectionEntry {
    topics: HashSet<Topic>,
    connected_at: DateTime<Utc>,
    last_heartbeat_at: DateTime<Utc>,
    /// Monotonic twin of `last_heartbeat_at`, used for idle reaping
    last_seen: Instant,
    queue: Arc<OutboundQueue>,
}

/// In-process broker.
///
/// Connection table lives in a `DashMap`; every connection owns one bounded
/// queue, so delivery order is FIFO per (topic, connection).
pub struct InMemoryBroker {
    connections: DashMap<ConnectionId, ConnectionEntry>,
    writers: DashMap<ConnectionId, JoinHandle<()>>,
    config: BrokerConfig,
}

impl InMemoryBroker {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            connections: DashMap::new(),
            writers: DashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Outbound queue of a live connection, for its writer to drain
    pub fn outbound(&self, connection_id: &ConnectionId) -> Option<Arc<OutboundQueue>> {
        self.connections
            .get(connection_id)
            .map(|c| Arc::clone(&c.queue))
    }

    /// Track the task flushing `connection_id` so shutdown can join it
    pub fn register_writer(&self, connection_id: ConnectionId, handle: JoinHandle<()>) {
        self.writers.insert(connection_id, handle);
    }

    /// Enqueue a frame for a single connection (acks, heartbeat replies)
    pub fn send_to(
        &self,
        connection_id: &ConnectionId,
        envelope: &Envelope,
    ) -> Result<EnqueueOutcome, BrokerError> {
        let frame = encode(envelope)?;
        let outcome = {
            let entry = self
                .connections
                .get(connection_id)
                .ok_or(BrokerError::UnknownConnection(*connection_id))?;
            entry.queue.push(frame, self.config.overflow_policy)
        };

        if outcome == EnqueueOutcome::Overflow {
            warn!(connection_id = %connection_id, "Outbound queue overflow, disconnecting");
            self.disconnect(connection_id);
            return Err(BrokerError::QueueOverflow(*connection_id));
        }
        Ok(outcome)
    }

    /// Record a client heartbeat
    pub fn touch_heartbeat(&self, connection_id: &ConnectionId) -> Result<(), BrokerError> {
        let mut entry = self
            .connections
            .get_mut(connection_id)
            .ok_or(BrokerError::UnknownConnection(*connection_id))?;
        entry.last_heartbeat_at = Utc::now();
        entry.last_seen = Instant::now();
        Ok(())
    }

    /// Disconnect connections without a socket writer that have been silent
    /// for at least `max_idle`; returns the removed ids.
    ///
    /// Socket connections are removed when their socket closes, so only
    /// fallback sessions, which have nothing but silence to go by, are reaped.
    pub fn reap_idle(&self, max_idle: Duration) -> Vec<ConnectionId> {
        let idle: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|entry| {
                !self.writers.contains_key(entry.key()) && entry.last_seen.elapsed() >= max_idle
            })
            .map(|entry| *entry.key())
            .collect();

        // Removal must wait until the iterator above released its shard locks
        let mut reaped = Vec::with_capacity(idle.len());
        for id in idle {
            if self.disconnect(&id) {
                info!(
                    connection_id = %id,
                    idle_ms = max_idle.as_millis() as u64,
                    "Idle session reaped"
                );
                reaped.push(id);
            }
        }
        reaped
    }

    pub fn connection_info(&self, connection_id: &ConnectionId) -> Option<ConnectionInfo> {
        self.connections
            .get(connection_id)
            .map(|entry| info_for(*entry.key(), &entry))
    }

    pub fn connections(&self) -> Vec<ConnectionInfo> {
        let mut all: Vec<ConnectionInfo> = self
            .connections
            .iter()
            .map(|entry| info_for(*entry.key(), &entry))
            .collect();
        all.sort_by_key(|c| c.connected_at);
        all
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Close every connection, letting writers flush what is queued.
    ///
    /// Writers are joined for at most `timeout` in total; stragglers are
    /// aborted.
    pub async fn shutdown(&self, timeout: Duration) {
        info!(connections = self.connections.len(), "Broker shutting down");

        for entry in self.connections.iter() {
            entry.queue.close();
        }

        let deadline = Instant::now() + timeout;
        let ids: Vec<ConnectionId> = self.writers.iter().map(|w| *w.key()).collect();
        for id in ids {
            let Some((_, mut handle)) = self.writers.remove(&id) else {
                continue;
            };
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                warn!(connection_id = %id, "Writer did not finish in time, aborting");
                handle.abort();
            }
        }

        self.connections.clear();
        info!("Broker stopped");
    }
}

impl Broker for InMemoryBroker {
    fn connect(&self) -> ConnectionId {
        let id = ConnectionId::new();
        let now = Utc::now();
        self.connections.insert(
            id,
            ConnectionEntry {
                topics: HashSet::new(),
                connected_at: now,
                last_heartbeat_at: now,
                last_seen: Instant::now(),
                queue: Arc::new(OutboundQueue::new(self.config.queue_capacity)),
            },
        );
        info!(connection_id = %id, "Connection registered");
        id
    }

    fn subscribe(&self, connection_id: &ConnectionId, topic: Topic) -> Result<(), BrokerError> {
        let mut entry = self
            .connections
            .get_mut(connection_id)
            .ok_or(BrokerError::UnknownConnection(*connection_id))?;
        if entry.topics.insert(topic) {
            debug!(connection_id = %connection_id, topic = %topic, "Subscribed");
        }
        Ok(())
    }

    fn unsubscribe(&self, connection_id: &ConnectionId, topic: Topic) -> Result<(), BrokerError> {
        let mut entry = self
            .connections
            .get_mut(connection_id)
            .ok_or(BrokerError::UnknownConnection(*connection_id))?;
        if entry.topics.remove(&topic) {
            debug!(connection_id = %connection_id, topic = %topic, "Unsubscribed");
        }
        Ok(())
    }

    fn publish(&self, topic: Topic, envelope: &Envelope) -> Result<PublishReport, BrokerError> {
        let mut report = PublishReport::default();
        let mut frame: Option<Arc<str>> = None;
        let mut overflowed = Vec::new();

        for entry in self.connections.iter() {
            if !entry.topics.contains(&topic) {
                continue;
            }
            report.subscribers += 1;

            // Serialize once, on the first subscriber
            let frame = match &frame {
                Some(f) => Arc::clone(f),
                None => {
                    let encoded = encode(envelope)?;
                    frame = Some(Arc::clone(&encoded));
                    encoded
                }
            };

            match entry.queue.push(frame, self.config.overflow_policy) {
                EnqueueOutcome::Queued => report.delivered += 1,
                EnqueueOutcome::DroppedOldest => {
                    report.delivered += 1;
                    report.dropped += 1;
                    warn!(
                        connection_id = %entry.key(),
                        topic = %topic,
                        dropped_total = entry.queue.dropped(),
                        "Outbound queue full, dropped oldest frame"
                    );
                }
                EnqueueOutcome::Overflow => overflowed.push(*entry.key()),
                EnqueueOutcome::Closed => {}
            }
        }

        // Removal must wait until the iterator above released its shard locks
        for id in overflowed {
            warn!(connection_id = %id, topic = %topic, "Outbound queue overflow, disconnecting");
            if self.disconnect(&id) {
                report.disconnected += 1;
            }
        }

        Ok(report)
    }

    fn disconnect(&self, connection_id: &ConnectionId) -> bool {
        match self.connections.remove(connection_id) {
            Some((_, entry)) => {
                entry.queue.close();
                self.writers.remove(connection_id);
                info!(
                    connection_id = %connection_id,
                    dropped = entry.queue.dropped(),
                    "Connection removed"
                );
                true
            }
            None => false,
        }
    }
}

fn encode(envelope: &Envelope) -> Result<Arc<str>, BrokerError> {
    serde_json::to_string(envelope)
        .map(Arc::from)
        .map_err(|e| BrokerError::Serialization(e.to_string()))
}

fn info_for(connection_id: ConnectionId, entry: &ConnectionEntry) -> ConnectionInfo {
    let mut topics: Vec<Topic> = entry.topics.iter().copied().collect();
    topics.sort_by_key(|t| t.as_str());
    ConnectionInfo {
        connection_id,
        subscribed_topics: topics,
        connected_at: entry.connected_at,
        last_heartbeat_at: entry.last_heartbeat_at,
        queued: entry.queue.len(),
        dropped: entry.queue.dropped(),
    }
}

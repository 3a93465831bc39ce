// SPDX-License-Identifier: MIT OR Apache-2.0
//! The Status Channel: a durable snapshot store plus an in-process
//! broadcast fanout that the WebSocket layer subscribes to.
//!
//! Every status write follows the same snapshot-then-broadcast contract
//! as the service this is grounded on: the durable record is written
//! first, then listeners are notified — a client that polls right after
//! being notified always observes a snapshot at least as new as the
//! notification.
#![deny(unsafe_code)]

use async_trait::async_trait;
use sf_core::StatusSnapshot;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{RwLock, broadcast};
use uuid::Uuid;

/// TTL applied to Redis-backed status snapshots.
const SNAPSHOT_TTL_SECS: u64 = 24 * 60 * 60;

/// Default broadcast channel capacity per job.
const DEFAULT_CAPACITY: usize = 64;

/// Durable status storage, keyed by job id.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn put(&self, snapshot: &StatusSnapshot) -> Result<(), StatusError>;
    async fn get(&self, job_id: Uuid) -> Result<Option<StatusSnapshot>, StatusError>;
}

/// Cross-process fanout of status updates, used when more than one
/// daemon process serves WebSocket connections for the same job set.
/// The in-process [`Broadcast`] satisfies a single-daemon deployment on
/// its own; this trait exists so a multi-daemon deployment can plug in a
/// real publisher without changing the Status Channel's call sites.
#[async_trait]
pub trait RedisPublisher: Send + Sync {
    async fn publish(&self, job_id: Uuid, snapshot: &StatusSnapshot) -> Result<(), StatusError>;
}

#[derive(Debug)]
pub enum StatusError {
    Redis(redis::RedisError),
    Serde(serde_json::Error),
}

impl std::fmt::Display for StatusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Redis(e) => write!(f, "redis error: {e}"),
            Self::Serde(e) => write!(f, "serde error: {e}"),
        }
    }
}

impl std::error::Error for StatusError {}

/// Redis-backed [`SnapshotStore`] and [`RedisPublisher`], grounded on the
/// original service's `task:{id}:status` key / `task_updates:{id}`
/// channel convention.
pub struct RedisStatusStore {
    manager: redis::aio::ConnectionManager,
}

impl RedisStatusStore {
    pub async fn connect(url: &str) -> Result<Self, StatusError> {
        let client = redis::Client::open(url).map_err(StatusError::Redis)?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(StatusError::Redis)?;
        Ok(Self { manager })
    }

    fn status_key(job_id: Uuid) -> String {
        format!("status:{job_id}")
    }

    fn updates_channel(job_id: Uuid) -> String {
        format!("status_updates:{job_id}")
    }
}

#[async_trait]
impl SnapshotStore for RedisStatusStore {
    async fn put(&self, snapshot: &StatusSnapshot) -> Result<(), StatusError> {
        let payload = serde_json::to_string(snapshot).map_err(StatusError::Serde)?;
        let mut conn = self.manager.clone();
        redis::cmd("SETEX")
            .arg(Self::status_key(snapshot.job_id))
            .arg(SNAPSHOT_TTL_SECS)
            .arg(payload)
            .query_async::<()>(&mut conn)
            .await
            .map_err(StatusError::Redis)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<StatusSnapshot>, StatusError> {
        let mut conn = self.manager.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(Self::status_key(job_id))
            .query_async(&mut conn)
            .await
            .map_err(StatusError::Redis)?;
        match raw {
            Some(s) => Ok(Some(serde_json::from_str(&s).map_err(StatusError::Serde)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl RedisPublisher for RedisStatusStore {
    async fn publish(&self, job_id: Uuid, snapshot: &StatusSnapshot) -> Result<(), StatusError> {
        let payload = serde_json::to_string(snapshot).map_err(StatusError::Serde)?;
        let mut conn = self.manager.clone();
        redis::cmd("PUBLISH")
            .arg(Self::updates_channel(job_id))
            .arg(payload)
            .query_async::<()>(&mut conn)
            .await
            .map_err(StatusError::Redis)
    }
}

/// In-memory [`SnapshotStore`], used for single-process tests and
/// deployments without a Redis dependency.
#[derive(Default)]
pub struct InMemoryStatusStore {
    inner: RwLock<HashMap<Uuid, StatusSnapshot>>,
}

#[async_trait]
impl SnapshotStore for InMemoryStatusStore {
    async fn put(&self, snapshot: &StatusSnapshot) -> Result<(), StatusError> {
        self.inner
            .write()
            .await
            .insert(snapshot.job_id, snapshot.clone());
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<StatusSnapshot>, StatusError> {
        Ok(self.inner.read().await.get(&job_id).cloned())
    }
}

#[derive(Debug, Default)]
struct ChannelStats {
    total_published: AtomicU64,
    dropped_updates: AtomicU64,
}

struct Channel {
    tx: broadcast::Sender<StatusSnapshot>,
    stats: Arc<ChannelStats>,
}

/// Per-job in-process broadcast registry. One `tokio::sync::broadcast`
/// channel is created lazily on first subscribe and torn down once the
/// last subscriber drops.
pub struct Broadcast {
    channels: RwLock<HashMap<Uuid, Channel>>,
}

impl Default for Broadcast {
    fn default() -> Self {
        Self::new()
    }
}

impl Broadcast {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Publish a status snapshot to all subscribers of `snapshot.job_id`.
    /// If no channel exists yet for this job (no one has subscribed),
    /// the publish is a no-op rather than creating a channel no one will
    /// ever drain.
    pub async fn publish(&self, snapshot: StatusSnapshot) {
        let channels = self.channels.read().await;
        if let Some(channel) = channels.get(&snapshot.job_id) {
            channel
                .stats
                .total_published
                .fetch_add(1, Ordering::Relaxed);
            if channel.tx.send(snapshot).is_err() {
                channel.stats.dropped_updates.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Subscribe to status updates for `job_id`, creating the channel if
    /// this is the first subscriber.
    pub async fn subscribe(&self, job_id: Uuid) -> StatusSubscription {
        let mut channels = self.channels.write().await;
        let channel = channels.entry(job_id).or_insert_with(|| {
            let (tx, _) = broadcast::channel(DEFAULT_CAPACITY);
            Channel {
                tx,
                stats: Arc::new(ChannelStats::default()),
            }
        });
        StatusSubscription {
            rx: channel.tx.subscribe(),
        }
    }

    /// Number of active subscribers for a job, used to decide whether a
    /// listener task can be torn down.
    pub async fn subscriber_count(&self, job_id: Uuid) -> usize {
        self.channels
            .read()
            .await
            .get(&job_id)
            .map(|c| c.tx.receiver_count())
            .unwrap_or(0)
    }

    /// Drop the channel entry for a job once no subscribers remain, so
    /// the registry does not grow without bound across a long-lived
    /// daemon process's lifetime.
    pub async fn prune_if_idle(&self, job_id: Uuid) {
        let mut channels = self.channels.write().await;
        if channels
            .get(&job_id)
            .map(|c| c.tx.receiver_count() == 0)
            .unwrap_or(false)
        {
            channels.remove(&job_id);
        }
    }
}

/// A handle for receiving status updates for one job.
pub struct StatusSubscription {
    rx: broadcast::Receiver<StatusSnapshot>,
}

impl StatusSubscription {
    /// Receive the next snapshot, waiting asynchronously. Returns `None`
    /// once the channel is closed; transparently skips past lag.
    pub async fn recv(&mut self) -> Option<StatusSnapshot> {
        loop {
            match self.rx.recv().await {
                Ok(snap) => return Some(snap),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Combines a durable [`SnapshotStore`] with the in-process [`Broadcast`]
/// behind the single entry point the rest of the orchestrator uses.
pub struct StatusChannel {
    store: Arc<dyn SnapshotStore>,
    broadcast: Broadcast,
}

impl StatusChannel {
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            store,
            broadcast: Broadcast::new(),
        }
    }

    /// Persist the snapshot durably, then notify in-process subscribers.
    /// Durability happens first so a subscriber that wakes on the
    /// notification and immediately re-fetches never sees a stale value.
    pub async fn publish(&self, snapshot: StatusSnapshot) -> Result<(), StatusError> {
        self.store.put(&snapshot).await?;
        self.broadcast.publish(snapshot).await;
        Ok(())
    }

    pub async fn current(&self, job_id: Uuid) -> Result<Option<StatusSnapshot>, StatusError> {
        self.store.get(job_id).await
    }

    pub async fn subscribe(&self, job_id: Uuid) -> StatusSubscription {
        self.broadcast.subscribe(job_id).await
    }

    pub async fn subscriber_count(&self, job_id: Uuid) -> usize {
        self.broadcast.subscriber_count(job_id).await
    }

    pub async fn prune_if_idle(&self, job_id: Uuid) {
        self.broadcast.prune_if_idle(job_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sf_core::JobStatus;
    use chrono::Utc;

    fn snapshot(job_id: Uuid, status: JobStatus) -> StatusSnapshot {
        StatusSnapshot {
            job_id,
            status,
            progress: 0,
            cancel_requested: false,
            current_step: None,
            step_description: None,
            preview_refs: Vec::new(),
            error: None,
            artifact_id: None,
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn in_memory_store_roundtrips() {
        let store = InMemoryStatusStore::default();
        let id = Uuid::new_v4();
        store.put(&snapshot(id, JobStatus::Pending)).await.unwrap();
        let fetched = store.get(id).await.unwrap().unwrap();
        assert_eq!(fetched.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn missing_snapshot_returns_none() {
        let store = InMemoryStatusStore::default();
        assert!(store.get(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn broadcast_delivers_to_subscriber_after_subscribe() {
        let bus = Broadcast::new();
        let id = Uuid::new_v4();
        let mut sub = bus.subscribe(id).await;
        bus.publish(snapshot(id, JobStatus::Processing)).await;
        let got = sub.recv().await.unwrap();
        assert_eq!(got.status, JobStatus::Processing);
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let bus = Broadcast::new();
        bus.publish(snapshot(Uuid::new_v4(), JobStatus::Processing))
            .await;
    }

    #[tokio::test]
    async fn prune_removes_channel_once_subscribers_drop() {
        let bus = Broadcast::new();
        let id = Uuid::new_v4();
        {
            let _sub = bus.subscribe(id).await;
            assert_eq!(bus.subscriber_count(id).await, 1);
        }
        bus.prune_if_idle(id).await;
        assert_eq!(bus.subscriber_count(id).await, 0);
    }

    #[tokio::test]
    async fn status_channel_publishes_durably_then_broadcasts() {
        let store: Arc<dyn SnapshotStore> = Arc::new(InMemoryStatusStore::default());
        let channel = StatusChannel::new(store);
        let id = Uuid::new_v4();
        let mut sub = channel.subscribe(id).await;

        channel
            .publish(snapshot(id, JobStatus::Completed))
            .await
            .unwrap();

        let durable = channel.current(id).await.unwrap().unwrap();
        assert_eq!(durable.status, JobStatus::Completed);

        let broadcasted = sub.recv().await.unwrap();
        assert_eq!(broadcasted.status, JobStatus::Completed);
    }
}

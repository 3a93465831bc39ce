// SPDX-License-Identifier: MIT OR Apache-2.0
//! WebSocket Fanout: bridges the Status Channel's per-job broadcast to
//! every connected client for that job.
//!
//! Grounded on the original `websocket_service.py`'s connection lifecycle
//! (`connect` registers the socket and starts a listener if none exists
//! yet; `disconnect` removes it and tears the listener down once the set
//! empties) translated onto `sf-status`'s in-process broadcast instead of
//! a polling Redis subscription — the broadcast already pushes, so the
//! fanout task only needs to `recv().await` rather than poll on a timer.
#![deny(unsafe_code)]

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use sf_core::StatusSnapshot;
use sf_status::StatusChannel;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// One registered outgoing half of a connected WebSocket. Keyed
/// internally by a random connection id so a single client can't be
/// confused with another once both are registered under the same job.
struct Connection {
    tx: mpsc::UnboundedSender<Message>,
}

struct JobConnections {
    connections: HashMap<Uuid, Connection>,
    listener: Option<JoinHandle<()>>,
}

impl Default for JobConnections {
    fn default() -> Self {
        Self {
            connections: HashMap::new(),
            listener: None,
        }
    }
}

/// Per-job connection registry plus the subscription task that bridges
/// [`StatusChannel`] broadcasts to every registered connection.
pub struct WsFanout {
    status: Arc<StatusChannel>,
    jobs: RwLock<HashMap<Uuid, JobConnections>>,
}

impl WsFanout {
    #[must_use]
    pub fn new(status: Arc<StatusChannel>) -> Arc<Self> {
        Arc::new(Self {
            status,
            jobs: RwLock::new(HashMap::new()),
        })
    }

    /// Number of live connections registered for `job_id`, used by tests
    /// and by `/health` introspection.
    pub async fn connection_count(&self, job_id: Uuid) -> usize {
        self.jobs
            .read()
            .await
            .get(&job_id)
            .map(|j| j.connections.len())
            .unwrap_or(0)
    }

    /// Drive one accepted WebSocket connection end to end: register it,
    /// send the connection-established message and current snapshot,
    /// then loop reading client frames (answering pings) until the
    /// socket closes or errors, at which point the connection is torn
    /// down and the job's listener is stopped if it was the last one.
    pub async fn handle_socket(self: &Arc<Self>, socket: WebSocket, job_id: Uuid) {
        let (mut sink, mut stream) = socket.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let conn_id = Uuid::new_v4();

        let established = serde_json::json!({
            "type": "connection_established",
            "job_id": job_id,
        });
        let _ = tx.send(Message::Text(established.to_string().into()));

        self.register(job_id, conn_id, tx.clone()).await;

        if let Ok(Some(snapshot)) = self.status.current(job_id).await {
            let _ = tx.send(snapshot_message(&snapshot));
        }

        let writer = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
        });

        while let Some(Ok(msg)) = stream.next().await {
            match msg {
                Message::Close(_) => break,
                Message::Ping(payload) => {
                    let _ = tx.send(Message::Pong(payload));
                }
                Message::Text(text) => {
                    if is_ping_envelope(&text) {
                        let pong = serde_json::json!({ "type": "pong" });
                        let _ = tx.send(Message::Text(pong.to_string().into()));
                    }
                }
                _ => {}
            }
        }

        drop(tx);
        writer.abort();
        self.deregister(job_id, conn_id).await;
    }

    async fn register(self: &Arc<Self>, job_id: Uuid, conn_id: Uuid, tx: mpsc::UnboundedSender<Message>) {
        let mut jobs = self.jobs.write().await;
        let entry = jobs.entry(job_id).or_default();
        let first_connection = entry.connections.is_empty();
        entry.connections.insert(conn_id, Connection { tx });
        if first_connection {
            entry.listener = Some(self.spawn_listener(job_id));
        }
    }

    async fn deregister(&self, job_id: Uuid, conn_id: Uuid) {
        let mut jobs = self.jobs.write().await;
        if let Some(entry) = jobs.get_mut(&job_id) {
            entry.connections.remove(&conn_id);
            if entry.connections.is_empty() {
                if let Some(handle) = entry.listener.take() {
                    handle.abort();
                }
                jobs.remove(&job_id);
            }
        }
        self.status.prune_if_idle(job_id).await;
    }

    /// Spawn the one subscription task this job's first connection
    /// needs: subscribe once, forward every delta to every currently
    /// registered connection, exit when the channel closes (it only
    /// closes once every subscriber half drops, which `prune_if_idle`
    /// triggers after the last connection deregisters).
    fn spawn_listener(self: &Arc<Self>, job_id: Uuid) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut sub = this.status.subscribe(job_id).await;
            while let Some(snapshot) = sub.recv().await {
                this.broadcast(job_id, &snapshot).await;
            }
        })
    }

    async fn broadcast(&self, job_id: Uuid, snapshot: &StatusSnapshot) {
        let jobs = self.jobs.read().await;
        if let Some(entry) = jobs.get(&job_id) {
            let msg = snapshot_message(snapshot);
            for conn in entry.connections.values() {
                let _ = conn.tx.send(msg.clone());
            }
        }
    }
}

fn snapshot_message(snapshot: &StatusSnapshot) -> Message {
    Message::Text(serde_json::to_string(snapshot).unwrap_or_default().into())
}

/// The original protocol answers an explicit `{"type": "ping"}` text
/// frame with `{"type": "pong"}`, distinct from the WebSocket-protocol
/// ping/pong control frames handled above.
fn is_ping_envelope(text: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|v| v.get("type").and_then(|t| t.as_str()).map(str::to_string))
        .is_some_and(|t| t == "ping")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sf_core::JobStatus;
    use sf_status::InMemoryStatusStore;

    fn snapshot(job_id: Uuid) -> StatusSnapshot {
        StatusSnapshot {
            job_id,
            status: JobStatus::Processing,
            progress: 50,
            cancel_requested: false,
            current_step: Some("parse".into()),
            step_description: Some("Reading the markdown document".into()),
            preview_refs: Vec::new(),
            error: None,
            artifact_id: None,
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn ping_envelope_detection_ignores_other_text() {
        assert!(is_ping_envelope(r#"{"type":"ping"}"#));
        assert!(!is_ping_envelope(r#"{"type":"pong"}"#));
        assert!(!is_ping_envelope("not json"));
    }

    #[tokio::test]
    async fn fanout_starts_with_no_connections() {
        let status = Arc::new(StatusChannel::new(Arc::new(InMemoryStatusStore::default())));
        let fanout = WsFanout::new(status);
        assert_eq!(fanout.connection_count(Uuid::new_v4()).await, 0);
    }

    #[tokio::test]
    async fn register_then_deregister_tears_down_listener() {
        let status = Arc::new(StatusChannel::new(Arc::new(InMemoryStatusStore::default())));
        let fanout = WsFanout::new(status.clone());
        let job_id = Uuid::new_v4();
        let conn_id = Uuid::new_v4();
        let (tx, _rx) = mpsc::unbounded_channel();

        fanout.register(job_id, conn_id, tx).await;
        assert_eq!(fanout.connection_count(job_id).await, 1);

        fanout.deregister(job_id, conn_id).await;
        assert_eq!(fanout.connection_count(job_id).await, 0);
        assert!(!fanout.jobs.read().await.contains_key(&job_id));
    }

    #[tokio::test]
    async fn broadcast_reaches_every_registered_connection() {
        let status = Arc::new(StatusChannel::new(Arc::new(InMemoryStatusStore::default())));
        let fanout = WsFanout::new(status);
        let job_id = Uuid::new_v4();

        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        fanout.register(job_id, Uuid::new_v4(), tx1).await;
        fanout.register(job_id, Uuid::new_v4(), tx2).await;

        fanout.broadcast(job_id, &snapshot(job_id)).await;

        assert!(rx1.recv().await.is_some());
        assert!(rx2.recv().await.is_some());
    }

    #[tokio::test]
    async fn broadcast_to_unknown_job_is_a_no_op() {
        let status = Arc::new(StatusChannel::new(Arc::new(InMemoryStatusStore::default())));
        let fanout = WsFanout::new(status);
        fanout.broadcast(Uuid::new_v4(), &snapshot(Uuid::new_v4())).await;
    }
}

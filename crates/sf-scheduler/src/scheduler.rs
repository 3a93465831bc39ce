// SPDX-License-Identifier: MIT OR Apache-2.0
//! The Job Scheduler: one FIFO queue and worker pool per job kind, a
//! per-kind dispatch rate gate, soft/hard per-task deadlines, and a
//! cooperative-cancellation token registry keyed by job id.

use crate::queue::{JobQueue, QueueError, QueueStats};
use crate::rate_limit::RateGate;
use sf_core::cancel::CancellationToken;
use sf_core::job::JobKind;
use sf_core::{Job, JobStatus};
use sf_error::{ErrorCode, SfError};
use sf_runtime::{BudgetLimit, StageEngine};
use sf_status::StatusChannel;
use sf_store::{JobStore, StoreError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify, RwLock};
use uuid::Uuid;

/// Errors surfaced by scheduler operations, distinct from the lower-level
/// [`QueueError`] and [`StoreError`] they wrap.
#[derive(Debug)]
pub enum SchedulerError {
    Queue(QueueError),
    Store(StoreError),
    AlreadyTerminal(JobStatus),
    NotRunning(Uuid),
}

impl std::fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queue(e) => write!(f, "{e}"),
            Self::Store(e) => write!(f, "{e}"),
            Self::AlreadyTerminal(s) => write!(f, "job already in terminal state {s:?}"),
            Self::NotRunning(id) => write!(f, "job {id} is not queued or running"),
        }
    }
}

impl std::error::Error for SchedulerError {}

impl From<&SchedulerError> for SfError {
    fn from(err: &SchedulerError) -> Self {
        match err {
            SchedulerError::Queue(QueueError::Full { max }) => {
                SfError::new(ErrorCode::Internal, format!("job queue full (max {max})"))
            }
            SchedulerError::Queue(QueueError::Duplicate(id)) => {
                SfError::new(ErrorCode::Internal, format!("job {id} already queued"))
            }
            SchedulerError::Store(store_err) => SfError::from(store_err),
            SchedulerError::AlreadyTerminal(status) => SfError::new(
                ErrorCode::InputInvalidPayload,
                format!("job already in terminal state {status:?}"),
            ),
            SchedulerError::NotRunning(id) => {
                SfError::new(ErrorCode::InputNotFound, format!("job {id} is not queued or running"))
            }
        }
    }
}

/// Tunables for a per-kind queue and its worker pool.
#[derive(Debug, Clone, Copy)]
pub struct KindConfig {
    pub queue_capacity: usize,
    pub workers: usize,
    pub max_per_minute: u32,
}

struct KindState {
    queue: Mutex<JobQueue>,
    notify: Notify,
    gate: RateGate,
    workers: usize,
}

/// Routes submitted jobs to per-kind FIFO queues, dispatches them to a
/// bounded worker pool, and tracks the cancellation token for every job
/// currently running.
pub struct JobScheduler {
    engine: Arc<StageEngine>,
    store: Arc<JobStore>,
    status: Arc<StatusChannel>,
    job_root: String,
    budget_limit: BudgetLimit,
    kinds: HashMap<JobKind, KindState>,
    tokens: RwLock<HashMap<Uuid, CancellationToken>>,
}

impl JobScheduler {
    pub fn new(
        engine: Arc<StageEngine>,
        store: Arc<JobStore>,
        status: Arc<StatusChannel>,
        job_root: impl Into<String>,
        budget_limit: BudgetLimit,
        generate: KindConfig,
        analyze_template: KindConfig,
    ) -> Arc<Self> {
        let mut kinds = HashMap::new();
        kinds.insert(
            JobKind::Generate,
            KindState {
                queue: Mutex::new(JobQueue::new(generate.queue_capacity)),
                notify: Notify::new(),
                gate: RateGate::new(generate.max_per_minute),
                workers: generate.workers.max(1),
            },
        );
        kinds.insert(
            JobKind::AnalyzeTemplate,
            KindState {
                queue: Mutex::new(JobQueue::new(analyze_template.queue_capacity)),
                notify: Notify::new(),
                gate: RateGate::new(analyze_template.max_per_minute),
                workers: analyze_template.workers.max(1),
            },
        );
        Arc::new(Self {
            engine,
            store,
            status,
            job_root: job_root.into(),
            budget_limit,
            kinds,
            tokens: RwLock::new(HashMap::new()),
        })
    }

    /// Start the worker pool for every kind. Each worker runs until the
    /// process exits; there is no graceful-drain path in the core design.
    pub fn spawn_workers(self: &Arc<Self>) {
        for (kind, state) in &self.kinds {
            for _ in 0..state.workers {
                let this = self.clone();
                let kind = *kind;
                tokio::spawn(async move { this.worker_loop(kind).await });
            }
        }
    }

    async fn worker_loop(self: Arc<Self>, kind: JobKind) {
        loop {
            let id = self.next_dequeued(kind).await;
            self.kinds[&kind].gate.acquire().await;
            self.run_job(id, kind).await;
        }
    }

    async fn next_dequeued(&self, kind: JobKind) -> Uuid {
        let state = &self.kinds[&kind];
        loop {
            if let Some(id) = state.queue.lock().await.dequeue() {
                return id;
            }
            state.notify.notified().await;
        }
    }

    /// Create a Job record, enqueue it, and return its id. The queue is
    /// checked before the record is persisted so a full queue never
    /// leaves behind an orphaned `pending` job.
    pub async fn submit(
        &self,
        kind: JobKind,
        input: serde_json::Value,
        template_stem: Option<String>,
    ) -> Result<Uuid, SchedulerError> {
        let job = Job::new(kind, input, template_stem);
        let id = job.id;
        {
            let state = &self.kinds[&kind];
            let mut queue = state.queue.lock().await;
            queue.enqueue(id).map_err(SchedulerError::Queue)?;
        }
        if let Err(err) = self.store.create(job.clone()).await {
            self.kinds[&kind].queue.lock().await.remove(id);
            return Err(SchedulerError::Store(err));
        }
        if let Err(err) = self.status.publish((&job).into()).await {
            tracing::warn!(job_id = %id, %err, "failed to seed status snapshot at submission");
        }
        self.kinds[&kind].notify.notify_one();
        Ok(id)
    }

    /// Cancel a non-terminal job. A still-queued job is dropped from the
    /// queue and transitioned to `cancelled` directly; a running job is
    /// signalled cooperatively through its [`CancellationToken`] and only
    /// marked `cancel_requested` here — the terminal `cancelled` status
    /// is published by the worker itself once it observes the token and
    /// unwinds, per the ordering decided for this cancellation path (the
    /// API handler must never publish `Cancelled` ahead of the worker
    /// actually stopping). Returns the job record as it stands immediately
    /// after this call, which callers use to report cancellation as
    /// accepted rather than necessarily complete.
    pub async fn cancel(&self, id: Uuid) -> Result<Job, SchedulerError> {
        let job = self.store.get(id).await.map_err(SchedulerError::Store)?;
        if job.status.is_terminal() {
            return Err(SchedulerError::AlreadyTerminal(job.status));
        }

        let removed = self.kinds[&job.kind].queue.lock().await.remove(id);
        if removed {
            let updated = self
                .store
                .update(id, |j| j.status = JobStatus::Cancelled)
                .await
                .map_err(SchedulerError::Store)?;
            if let Err(err) = self.status.publish((&updated).into()).await {
                tracing::warn!(job_id = %id, %err, "failed to publish cancellation of queued job");
            }
            return Ok(updated);
        }

        let tokens = self.tokens.read().await;
        match tokens.get(&id) {
            Some(token) => {
                token.cancel();
                drop(tokens);
                let updated = self
                    .store
                    .update(id, |j| j.cancel_requested = true)
                    .await
                    .map_err(SchedulerError::Store)?;
                if let Err(err) = self.status.publish((&updated).into()).await {
                    tracing::warn!(job_id = %id, %err, "failed to publish cancel_requested");
                }
                Ok(updated)
            }
            None => Err(SchedulerError::NotRunning(id)),
        }
    }

    /// Snapshot of each kind's queue occupancy, for status/introspection.
    pub fn queue_stats(&self) -> HashMap<JobKind, QueueStats> {
        self.kinds
            .iter()
            .map(|(kind, state)| {
                let stats = state
                    .queue
                    .try_lock()
                    .map(|q| q.stats())
                    .unwrap_or(QueueStats { len: 0, max: 0 });
                (*kind, stats)
            })
            .collect()
    }

    async fn run_job(&self, id: Uuid, kind: JobKind) {
        let input = match self.store.get(id).await {
            Ok(job) => job.input,
            Err(err) => {
                tracing::error!(job_id = %id, %err, "job vanished before dispatch");
                return;
            }
        };

        let token = CancellationToken::new();
        self.tokens.write().await.insert(id, token.clone());
        let watchdog = self.spawn_watchdog(id, token.clone());

        match kind {
            JobKind::Generate => match self.materialize_generate_input(id, &input).await {
                Ok((markdown_path, template_path)) => {
                    let validation_enabled = input
                        .get("validation_enabled")
                        .and_then(|v| v.as_bool())
                        .unwrap_or(true);
                    self.engine
                        .run_generate(id, markdown_path, template_path, validation_enabled, token)
                        .await;
                }
                Err(err) => self.fail_before_dispatch(id, err).await,
            },
            JobKind::AnalyzeTemplate => match Self::template_ref(&input) {
                Ok(template_path) => {
                    self.engine.run_analyze_template(id, template_path, token).await;
                }
                Err(err) => self.fail_before_dispatch(id, err).await,
            },
        }

        watchdog.abort();
        self.tokens.write().await.remove(&id);
    }

    fn spawn_watchdog(&self, id: Uuid, token: CancellationToken) -> tokio::task::JoinHandle<()> {
        let soft = self.budget_limit.soft_deadline;
        let hard = self.budget_limit.hard_deadline;
        tokio::spawn(async move {
            tokio::time::sleep(soft).await;
            tracing::warn!(job_id = %id, deadline = ?soft, "job exceeded its soft deadline");
            tokio::time::sleep(hard.saturating_sub(soft)).await;
            tracing::warn!(job_id = %id, deadline = ?hard, "job exceeded its hard deadline, forcing cancellation");
            token.cancel();
        })
    }

    /// Mark a job failed before the Stage Engine ever ran, used when the
    /// job's own input cannot be materialized into a file path the
    /// pipeline stages can read.
    async fn fail_before_dispatch(&self, id: Uuid, err: SfError) {
        let updated = self
            .store
            .update(id, |j| {
                j.status = JobStatus::Failed;
                j.error = Some(sf_core::job::JobError {
                    kind: sf_core::job::ErrorKind::InputInvalid,
                    message: err.message.clone(),
                    retryable: false,
                });
                j.finished_at = Some(chrono::Utc::now());
            })
            .await;
        match updated {
            Ok(job) => {
                if let Err(err) = self.status.publish((&job).into()).await {
                    tracing::warn!(job_id = %id, %err, "failed to publish pre-dispatch failure");
                }
            }
            Err(store_err) => tracing::error!(job_id = %id, %store_err, "failed to record pre-dispatch failure"),
        }
    }

    /// Write a `generate` job's inline markdown text to `{job_root}/{id}/input.md`
    /// so the Stage Engine's file-based Parse stage can read it the same
    /// way it reads a template file, and resolve `template_ref` to a path.
    async fn materialize_generate_input(
        &self,
        id: Uuid,
        input: &serde_json::Value,
    ) -> Result<(String, String), SfError> {
        let markdown = input
            .get("markdown")
            .and_then(|v| v.as_str())
            .ok_or_else(|| SfError::new(ErrorCode::InputInvalidPayload, "generate job input missing `markdown`"))?;
        let template_path = Self::template_ref(input)?;

        let job_dir = std::path::Path::new(&self.job_root).join(id.to_string());
        tokio::fs::create_dir_all(&job_dir)
            .await
            .map_err(|e| SfError::new(ErrorCode::StoreIoFailed, e.to_string()))?;
        let markdown_path = job_dir.join("input.md");
        tokio::fs::write(&markdown_path, markdown)
            .await
            .map_err(|e| SfError::new(ErrorCode::StoreIoFailed, e.to_string()))?;
        Ok((markdown_path.display().to_string(), template_path))
    }

    fn template_ref(input: &serde_json::Value) -> Result<String, SfError> {
        input
            .get("template_ref")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| SfError::new(ErrorCode::InputInvalidPayload, "job input missing `template_ref`"))
    }
}

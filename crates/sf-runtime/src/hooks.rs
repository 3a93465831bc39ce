// SPDX-License-Identifier: MIT OR Apache-2.0
//! Lifecycle hooks for job-run extensibility.
//!
//! Register [`LifecycleHook`] implementations with a [`HookRegistry`] to
//! observe job start/stage/completion events without modifying the Stage
//! Engine's core loop. The Job Scheduler fires [`LifecycleHook::on_job_complete`]
//! on every completion path — success, failure, retry, and cancel — so
//! cleanup always runs.

use sf_core::Job;
use sf_error::SfError;

/// Extension point called at well-defined moments in a job's lifecycle.
///
/// All methods have default no-op implementations so hooks only need to
/// override the callbacks they care about.
pub trait LifecycleHook: Send + Sync {
    /// Called once a worker picks up a job, before the first stage runs.
    fn on_job_start(&self, _job: &Job) {}

    /// Called after each stage completes successfully.
    fn on_stage_complete(&self, _job: &Job, _stage_name: &str) {}

    /// Called once the job reaches any terminal state (completed, failed,
    /// or cancelled) — always, so cleanup routines never get skipped.
    fn on_job_complete(&self, _job: &Job) {}

    /// Called when a stage or the Validation Loop raises an [`SfError`].
    fn on_error(&self, _job: &Job, _error: &SfError) {}

    /// Human-readable name used in logging/diagnostics.
    fn name(&self) -> &str;
}

/// Ordered collection of [`LifecycleHook`]s that fires them in
/// registration order.
#[derive(Default)]
pub struct HookRegistry {
    hooks: Vec<Box<dyn LifecycleHook>>,
}

impl HookRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, hook: Box<dyn LifecycleHook>) {
        self.hooks.push(hook);
    }

    pub fn fire_job_start(&self, job: &Job) {
        for hook in &self.hooks {
            hook.on_job_start(job);
        }
    }

    pub fn fire_stage_complete(&self, job: &Job, stage_name: &str) {
        for hook in &self.hooks {
            hook.on_stage_complete(job, stage_name);
        }
    }

    pub fn fire_job_complete(&self, job: &Job) {
        for hook in &self.hooks {
            hook.on_job_complete(job);
        }
    }

    pub fn fire_error(&self, job: &Job, error: &SfError) {
        for hook in &self.hooks {
            hook.on_error(job, error);
        }
    }

    #[must_use]
    pub fn hook_count(&self) -> usize {
        self.hooks.len()
    }

    #[must_use]
    pub fn hook_names(&self) -> Vec<&str> {
        self.hooks.iter().map(|h| h.name()).collect()
    }
}

/// Logs lifecycle transitions via `tracing`.
pub struct LoggingHook;

impl LifecycleHook for LoggingHook {
    fn on_job_start(&self, job: &Job) {
        tracing::info!(target: "sf.hooks", job_id = %job.id, kind = ?job.kind, "job starting");
    }

    fn on_stage_complete(&self, job: &Job, stage_name: &str) {
        tracing::debug!(target: "sf.hooks", job_id = %job.id, stage = stage_name, "stage complete");
    }

    fn on_job_complete(&self, job: &Job) {
        tracing::info!(target: "sf.hooks", job_id = %job.id, status = ?job.status, "job complete");
    }

    fn on_error(&self, job: &Job, error: &SfError) {
        tracing::error!(target: "sf.hooks", job_id = %job.id, %error, "job error");
    }

    fn name(&self) -> &str {
        "logging"
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0
//! Job, status, and error wire types.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What kind of work a job performs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Produce a full presentation from a markdown document and a template.
    Generate,
    /// Analyze a template file and cache its layout features.
    AnalyzeTemplate,
}

/// Coarse, client-visible job status.
///
/// Mirrors the transition-graph pattern used for run lifecycles elsewhere
/// in the stack: terminal states have no valid successors, and every
/// transition must be checked against [`JobStatus::can_transition_to`]
/// before being committed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting in the scheduler's queue.
    Pending,
    /// A worker has picked up the job and is running stages.
    Processing,
    /// All stages completed and the output artifact is available.
    Completed,
    /// A stage failed and the job will not be retried automatically.
    Failed,
    /// The job was cancelled before it reached a terminal state.
    Cancelled,
}

impl JobStatus {
    /// Returns `true` if this status represents a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns the set of statuses that are valid successors of `self`.
    pub fn valid_transitions(&self) -> &'static [JobStatus] {
        match self {
            Self::Pending => &[Self::Processing, Self::Cancelled],
            Self::Processing => &[Self::Completed, Self::Failed, Self::Cancelled],
            Self::Completed | Self::Failed | Self::Cancelled => &[],
        }
    }

    /// Returns `true` if transitioning from `self` to `next` is valid.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        self.valid_transitions().contains(&next)
    }
}

/// Job-facing error kind, distinct from the internal [`sf_error::ErrorCode`]
/// taxonomy: this is the coarse contract returned to API clients.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The submitted job payload was malformed or referenced missing inputs.
    InputInvalid,
    /// A required precondition (e.g. a completed template analysis) is missing.
    PreconditionMissing,
    /// A pipeline stage failed to produce its artifact.
    StageFailed,
    /// The model provider could not be reached or exhausted its retries.
    ModelUnavailable,
    /// The job exceeded its hard deadline.
    Timeout,
    /// The job was cancelled by request.
    Cancelled,
}

/// Error attached to a job once it reaches [`JobStatus::Failed`].
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct JobError {
    /// Coarse, client-visible error kind.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
    /// Whether resubmitting the same job is likely to succeed.
    pub retryable: bool,
}

/// A unit of orchestrated work tracked end to end by the Job Store.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    /// Unique job identifier.
    pub id: Uuid,
    /// What kind of work this job performs.
    pub kind: JobKind,
    /// Current lifecycle status.
    pub status: JobStatus,
    /// Integer progress indicator, `0..=100`.
    pub progress: u8,
    /// Error detail, present only once `status` is `Failed`.
    pub error: Option<JobError>,
    /// Arbitrary job input payload (markdown path, template path, options).
    pub input: serde_json::Value,
    /// Identifier of the produced artifact, once `Completed`.
    pub artifact_id: Option<Uuid>,
    /// Template file stem this job is associated with, if any. Used by
    /// `jobs_for_template` to let a later `generate` job's Analyze stage
    /// find a prior `analyze_template` job's cached artifact.
    pub template_stem: Option<String>,
    /// Set by the API handler when a cancel request has been received but
    /// the worker has not yet observed it and unwound.
    pub cancel_requested: bool,
    /// Name of the most recently completed (or currently running) stage,
    /// e.g. `"parse"`, `"plan_content"`. `None` before the first stage runs.
    pub stage: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Construct a new job in the `Pending` state.
    pub fn new(kind: JobKind, input: serde_json::Value, template_stem: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            status: JobStatus::Pending,
            progress: 0,
            error: None,
            input,
            artifact_id: None,
            template_stem,
            cancel_requested: false,
            stage: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Clamp and set progress.
    pub fn set_progress(&mut self, progress: u8) {
        self.progress = progress.min(100);
    }
}

/// Human-readable gloss for a stage name, carried on the snapshot as
/// `step_description` so a client can render progress without its own
/// copy of the stage table.
fn describe_stage(stage: &str) -> &'static str {
    match stage {
        "parse" => "Reading the markdown document",
        "analyze_template" => "Analyzing the presentation template",
        "plan_content" => "Planning the slide sequence",
        "generate_slides" => "Generating slide content",
        "finalize" => "Validating and saving the presentation",
        _ => "Working",
    }
}

/// Progress / status payload broadcast over the Status Channel and
/// WebSocket Fanout. A strict subset of [`Job`]'s fields — clients never
/// see the raw input payload.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct StatusSnapshot {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub progress: u8,
    pub cancel_requested: bool,
    /// Name of the most recently completed (or running) stage.
    pub current_step: Option<String>,
    /// Human-readable gloss of `current_step`.
    pub step_description: Option<String>,
    /// Paths/ids of any preview artifacts produced so far. Always empty
    /// today — no stage publishes intermediate previews yet.
    pub preview_refs: Vec<String>,
    pub error: Option<JobError>,
    pub artifact_id: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Job> for StatusSnapshot {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            progress: job.progress,
            cancel_requested: job.cancel_requested,
            current_step: job.stage.clone(),
            step_description: job.stage.as_deref().map(describe_stage).map(str::to_string),
            preview_refs: Vec::new(),
            error: job.error.clone(),
            artifact_id: job.artifact_id,
            updated_at: Utc::now(),
        }
    }
}

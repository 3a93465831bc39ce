// SPDX-License-Identifier: MIT OR Apache-2.0
//! Wire request/response types for the Job API plus the submission
//! validation that must run *before* a Job record is created, so an
//! invalid submission never leaves an orphaned `pending` job behind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sf_core::job::JobKind;
use sf_core::{ErrorKind, Job, JobError, JobStatus, StatusSnapshot};
use sf_error::{ErrorCode, SfError};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    pub kind: JobKind,
    pub input: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct SubmitJobResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct Timestamps {
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// The merged status view: the Job Store is authoritative on
/// terminal state (`error`, `timestamps`), the Status Snapshot is
/// authoritative on live progress (`status`, `progress`, `current_step`,
/// `step_description`, `preview_refs`) whenever one exists.
#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub task_id: Uuid,
    pub status: JobStatus,
    pub progress: u8,
    pub current_step: Option<String>,
    pub step_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    pub preview_refs: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    pub timestamps: Timestamps,
}

impl JobStatusResponse {
    pub fn merge(job: &Job, snapshot: Option<StatusSnapshot>) -> Self {
        let snapshot = snapshot.unwrap_or_else(|| StatusSnapshot::from(job));
        let file_url = (job.status == JobStatus::Completed)
            .then(|| format!("/artifacts/{}", job.id));
        Self {
            task_id: job.id,
            status: snapshot.status,
            progress: snapshot.progress,
            current_step: snapshot.current_step,
            step_description: snapshot.step_description,
            file_url,
            preview_refs: snapshot.preview_refs,
            error: job.error.clone(),
            timestamps: Timestamps {
                created_at: job.created_at,
                started_at: job.started_at,
                completed_at: job.finished_at,
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_secs: u64,
    pub queue_depths: std::collections::BTreeMap<String, usize>,
}

/// Wire shape for every error response; mirrors `Job.error`'s
/// `{kind, message, retryable}` contract shared with job failure payloads.
#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
}

impl From<&SfError> for ApiErrorBody {
    fn from(err: &SfError) -> Self {
        let kind = match err.code {
            ErrorCode::InputInvalidPayload | ErrorCode::InputNotFound => ErrorKind::InputInvalid,
            ErrorCode::InputPreconditionMissing => ErrorKind::PreconditionMissing,
            ErrorCode::ModelNotConfigured | ErrorCode::ModelTimeout | ErrorCode::ModelUnavailable => {
                ErrorKind::ModelUnavailable
            }
            ErrorCode::Cancelled => ErrorKind::Cancelled,
            _ => ErrorKind::StageFailed,
        };
        Self {
            kind,
            retryable: kind == ErrorKind::ModelUnavailable,
            message: err.message.clone(),
        }
    }
}

/// Validate a job submission against the fields the chosen `kind`
/// requires. An invalid submission must fail before any Job record is
/// created — this runs ahead of `JobScheduler::submit`.
pub fn validate_submission(kind: JobKind, input: &serde_json::Value) -> Result<(), SfError> {
    match kind {
        JobKind::Generate => {
            let markdown = input.get("markdown").and_then(|v| v.as_str());
            if markdown.map(str::trim).unwrap_or("").is_empty() {
                return Err(SfError::new(
                    ErrorCode::InputInvalidPayload,
                    "generate job requires non-empty `markdown`",
                ));
            }
            require_template_ref(input)
        }
        JobKind::AnalyzeTemplate => require_template_ref(input),
    }
}

fn require_template_ref(input: &serde_json::Value) -> Result<(), SfError> {
    let template_ref = input.get("template_ref").and_then(|v| v.as_str());
    if template_ref.map(str::trim).unwrap_or("").is_empty() {
        return Err(SfError::new(
            ErrorCode::InputInvalidPayload,
            "job requires non-empty `template_ref`",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_markdown_is_rejected() {
        let err = validate_submission(
            JobKind::Generate,
            &serde_json::json!({"markdown": "", "template_ref": "t"}),
        )
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::InputInvalidPayload);
    }

    #[test]
    fn missing_template_ref_is_rejected() {
        let err = validate_submission(
            JobKind::Generate,
            &serde_json::json!({"markdown": "# hi"}),
        )
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::InputInvalidPayload);
    }

    #[test]
    fn valid_generate_submission_passes() {
        validate_submission(
            JobKind::Generate,
            &serde_json::json!({"markdown": "# hi", "template_ref": "t.pptx"}),
        )
        .unwrap();
    }

    #[test]
    fn analyze_template_requires_only_template_ref() {
        validate_submission(
            JobKind::AnalyzeTemplate,
            &serde_json::json!({"template_ref": "t.pptx"}),
        )
        .unwrap();
        assert!(validate_submission(JobKind::AnalyzeTemplate, &serde_json::json!({})).is_err());
    }
}

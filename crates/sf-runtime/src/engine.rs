// SPDX-License-Identifier: MIT OR Apache-2.0
//! The Stage Engine: drives one job through its ordered stages, wiring
//! the budget tracker, lifecycle hooks, Job Store, and Status Channel
//! around the stage sequence defined in [`crate::stages`].

use crate::budget::{BudgetLimit, BudgetStatus, BudgetTracker};
use crate::hooks::HookRegistry;
use crate::stages::{
    AnalyzeTemplateStage, FinalizeStage, GenerateSlidesStage, ParseStage, PlanContentStage, Stage,
    StageContext,
};
use sf_cache::ArtifactCache;
use sf_core::cancel::CancellationToken;
use sf_core::job::{ErrorKind, JobError};
use sf_core::{Job, JobStatus};
use sf_error::{ErrorCategory, ErrorCode, SfError};
use sf_host::ModelClientPool;
use sf_mutate::PresentationClient;
use sf_status::StatusChannel;
use sf_store::JobStore;
use std::sync::Arc;
use uuid::Uuid;

/// Maps a diagnostic [`SfError`] onto the coarse, client-visible
/// [`ErrorKind`] contract stored on a failed job.
fn job_error_from(err: &SfError) -> JobError {
    let kind = if err.code == ErrorCode::Cancelled {
        ErrorKind::Cancelled
    } else if err.code == ErrorCode::InputPreconditionMissing {
        ErrorKind::PreconditionMissing
    } else {
        match err.category() {
            ErrorCategory::Input => ErrorKind::InputInvalid,
            ErrorCategory::Model => ErrorKind::ModelUnavailable,
            ErrorCategory::Stage | ErrorCategory::Store | ErrorCategory::Config | ErrorCategory::Internal => {
                ErrorKind::StageFailed
            }
        }
    };
    JobError {
        kind,
        message: err.message.clone(),
        retryable: matches!(kind, ErrorKind::ModelUnavailable),
    }
}

/// Progress percentage recorded on the job after each named stage of the
/// `generate` pipeline completes.
fn progress_after(stage_name: &str) -> u8 {
    match stage_name {
        "parse" => 20,
        "analyze_template" => 40,
        "plan_content" => 60,
        "generate_slides" => 80,
        "finalize" => 100,
        _ => 0,
    }
}

/// Drives jobs through the Stage Engine pipeline, publishing status
/// updates and firing lifecycle hooks at every stage boundary.
pub struct StageEngine {
    store: Arc<JobStore>,
    status: Arc<StatusChannel>,
    cache: Arc<ArtifactCache>,
    host: Arc<ModelClientPool>,
    presentation: Arc<dyn PresentationClient>,
    hooks: HookRegistry,
    budget_limit: BudgetLimit,
    output_root: String,
    validation_max_iterations: u32,
    validation_max_workers: usize,
    validation_parallel: bool,
}

impl StageEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<JobStore>,
        status: Arc<StatusChannel>,
        cache: Arc<ArtifactCache>,
        host: Arc<ModelClientPool>,
        presentation: Arc<dyn PresentationClient>,
        hooks: HookRegistry,
        budget_limit: BudgetLimit,
        output_root: impl Into<String>,
        validation_max_iterations: u32,
        validation_max_workers: usize,
        validation_parallel: bool,
    ) -> Self {
        Self {
            store,
            status,
            cache,
            host,
            presentation,
            hooks,
            budget_limit,
            output_root: output_root.into(),
            validation_max_iterations,
            validation_max_workers,
            validation_parallel,
        }
    }

    async fn publish_progress(&self, job: &Job) {
        if let Err(err) = self.status.publish((job).into()).await {
            tracing::warn!(job_id = %job.id, %err, "failed to publish status snapshot");
        }
    }

    async fn fail_job(&self, job_id: Uuid, err: SfError) -> Job {
        let job_error = job_error_from(&err);
        let terminal_status = if job_error.kind == ErrorKind::Cancelled {
            JobStatus::Cancelled
        } else {
            JobStatus::Failed
        };
        let job = match self
            .store
            .update(job_id, |j| {
                j.status = terminal_status;
                j.error = Some(job_error.clone());
                j.finished_at = Some(chrono::Utc::now());
            })
            .await
        {
            Ok(j) => j,
            Err(store_err) => {
                tracing::error!(job_id = %job_id, %store_err, "failed to persist failed job state");
                return Job::new(sf_core::JobKind::Generate, serde_json::json!({}), None);
            }
        };
        self.hooks.fire_error(&job, &err);
        self.hooks.fire_job_complete(&job);
        self.publish_progress(&job).await;
        job
    }

    /// Run the full five-stage `generate` pipeline for `job_id`.
    pub async fn run_generate(
        &self,
        job_id: Uuid,
        markdown_path: String,
        template_path: String,
        validation_enabled: bool,
        cancellation: CancellationToken,
    ) -> Job {
        let job = match self
            .store
            .update(job_id, |j| {
                j.status = JobStatus::Processing;
                j.started_at = Some(chrono::Utc::now());
            })
            .await
        {
            Ok(j) => j,
            Err(store_err) => {
                tracing::error!(job_id = %job_id, %store_err, "could not mark job processing");
                return self.fail_job(job_id, SfError::new(ErrorCode::StoreIoFailed, store_err.to_string())).await;
            }
        };
        self.hooks.fire_job_start(&job);
        self.publish_progress(&job).await;

        let mut ctx = StageContext {
            markdown_path,
            template_path,
            output_root: self.output_root.clone(),
            job_id,
            outline: None,
            layout: None,
            content_plan: None,
            output_path: None,
            cache: self.cache.clone(),
            host: self.host.clone(),
            presentation: self.presentation.clone(),
            cancellation: cancellation.clone(),
        };

        let budget = BudgetTracker::start(self.budget_limit);
        let stages: Vec<Box<dyn Stage>> = vec![
            Box::new(ParseStage),
            Box::new(AnalyzeTemplateStage),
            Box::new(PlanContentStage),
            Box::new(GenerateSlidesStage),
            Box::new(FinalizeStage {
                max_iterations: self.validation_max_iterations,
                max_workers: self.validation_max_workers,
                parallel: self.validation_parallel,
                validation_enabled,
            }),
        ];

        for stage in stages {
            if cancellation.is_cancelled() {
                return self
                    .fail_job(job_id, SfError::new(ErrorCode::Cancelled, "job cancelled before stage ran"))
                    .await;
            }
            if let BudgetStatus::Exceeded(elapsed) = budget.check() {
                return self
                    .fail_job(
                        job_id,
                        SfError::new(ErrorCode::ModelTimeout, format!("hard deadline exceeded after {elapsed:?}")),
                    )
                    .await;
            }

            if let Err(err) = stage.run(&mut ctx).await {
                return self.fail_job(job_id, err).await;
            }

            let stage_name = stage.name().to_string();
            let updated = match self
                .store
                .update(job_id, |j| {
                    j.set_progress(progress_after(&stage_name));
                    j.stage = Some(stage_name.clone());
                })
                .await
            {
                Ok(j) => j,
                Err(store_err) => {
                    return self
                        .fail_job(job_id, SfError::new(ErrorCode::StoreIoFailed, store_err.to_string()))
                        .await;
                }
            };
            self.hooks.fire_stage_complete(&updated, &stage_name);
            self.publish_progress(&updated).await;
        }

        let completed = match self
            .store
            .update(job_id, |j| {
                j.status = JobStatus::Completed;
                j.artifact_id = Some(job_id);
                j.finished_at = Some(chrono::Utc::now());
                j.set_progress(100);
            })
            .await
        {
            Ok(j) => j,
            Err(store_err) => {
                return self
                    .fail_job(job_id, SfError::new(ErrorCode::StoreIoFailed, store_err.to_string()))
                    .await;
            }
        };
        self.hooks.fire_job_complete(&completed);
        self.publish_progress(&completed).await;
        completed
    }

    /// Run the standalone `analyze_template` job: a single stage that
    /// caches a template's layout features for later `generate` jobs to
    /// reuse.
    pub async fn run_analyze_template(
        &self,
        job_id: Uuid,
        template_path: String,
        cancellation: CancellationToken,
    ) -> Job {
        let job = match self
            .store
            .update(job_id, |j| {
                j.status = JobStatus::Processing;
                j.started_at = Some(chrono::Utc::now());
            })
            .await
        {
            Ok(j) => j,
            Err(store_err) => {
                return self.fail_job(job_id, SfError::new(ErrorCode::StoreIoFailed, store_err.to_string())).await;
            }
        };
        self.hooks.fire_job_start(&job);
        self.publish_progress(&job).await;

        let mut ctx = StageContext {
            markdown_path: String::new(),
            template_path,
            output_root: self.output_root.clone(),
            job_id,
            outline: None,
            layout: None,
            content_plan: None,
            output_path: None,
            cache: self.cache.clone(),
            host: self.host.clone(),
            presentation: self.presentation.clone(),
            cancellation,
        };

        if let Err(err) = AnalyzeTemplateStage.run(&mut ctx).await {
            return self.fail_job(job_id, err).await;
        }

        let completed = match self
            .store
            .update(job_id, |j| {
                j.status = JobStatus::Completed;
                j.artifact_id = Some(job_id);
                j.finished_at = Some(chrono::Utc::now());
                j.stage = Some("analyze_template".to_string());
                j.set_progress(100);
            })
            .await
        {
            Ok(j) => j,
            Err(store_err) => {
                return self
                    .fail_job(job_id, SfError::new(ErrorCode::StoreIoFailed, store_err.to_string()))
                    .await;
            }
        };
        self.hooks.fire_stage_complete(&completed, "analyze_template");
        self.hooks.fire_job_complete(&completed);
        self.publish_progress(&completed).await;
        completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::LoggingHook;
    use sf_core::JobKind;
    use sf_host::{MockModelClient, ModelKind, RateGateConfig, RetryConfig};
    use sf_mutate::InMemoryPresentation;
    use sf_status::InMemoryStatusStore;

    async fn engine(tmp: &tempfile::TempDir) -> (StageEngine, Arc<JobStore>) {
        let store = Arc::new(JobStore::open(tmp.path().join("jobs")).await.unwrap());
        let status = Arc::new(StatusChannel::new(Arc::new(InMemoryStatusStore::default())));
        let cache = Arc::new(ArtifactCache::new(tmp.path().join("cache")));

        let host = Arc::new(ModelClientPool::new(
            RateGateConfig {
                min_interval: std::time::Duration::from_millis(0),
            },
            RetryConfig::default(),
        ));
        let text_mock = MockModelClient::new();
        text_mock.push_text(Ok(serde_json::json!({
            "title": "Doc", "subtitle": null, "sections": []
        })
        .to_string()));
        text_mock.push_text(Ok(serde_json::json!({
            "layouts": [{
                "name": "title-only",
                "purpose": "opening and closing slides",
                "structure": "title_only",
                "editable_regions": [{"id": "title", "role": "title"}],
                "image_slots": [],
                "group_relations": [],
            }]
        })
        .to_string()));
        host.register(ModelKind::Text, Arc::new(text_mock)).await;
        let planning_mock = MockModelClient::new();
        planning_mock.push_text(Ok(serde_json::json!({
            "slides": [
                {"slide_id": "s1", "slide_type": "title", "layout_ref": "title-only",
                 "reasoning": "r", "section_content": {"title": "Doc"}}
            ]
        })
        .to_string()));
        host.register(ModelKind::DeepThinking, Arc::new(planning_mock))
            .await;

        let presentation = Arc::new(InMemoryPresentation::new());
        tokio::fs::write(tmp.path().join("doc.md"), "# Doc\n\nbody").await.unwrap();
        tokio::fs::write(tmp.path().join("template.pptx"), b"fake").await.unwrap();

        let mut hooks = HookRegistry::new();
        hooks.register(Box::new(LoggingHook));

        let engine = StageEngine::new(
            store.clone(),
            status,
            cache,
            host,
            presentation,
            hooks,
            BudgetLimit::default(),
            tmp.path().join("out").display().to_string(),
            2,
            1,
            false,
        );
        (engine, store)
    }

    #[tokio::test]
    async fn run_generate_completes_through_all_stages() {
        let tmp = tempfile::tempdir().unwrap();
        let (engine, store) = engine(&tmp).await;
        let job = Job::new(JobKind::Generate, serde_json::json!({}), None);
        let id = job.id;
        store.create(job).await.unwrap();

        let finished = engine
            .run_generate(
                id,
                tmp.path().join("doc.md").display().to_string(),
                tmp.path().join("template.pptx").display().to_string(),
                true,
                CancellationToken::new(),
            )
            .await;

        assert_eq!(finished.status, JobStatus::Completed);
        assert_eq!(finished.progress, 100);
        assert!(finished.artifact_id.is_some());
    }

    #[tokio::test]
    async fn run_generate_fails_job_when_template_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let (engine, store) = engine(&tmp).await;
        let job = Job::new(JobKind::Generate, serde_json::json!({}), None);
        let id = job.id;
        store.create(job).await.unwrap();

        let finished = engine
            .run_generate(
                id,
                tmp.path().join("doc.md").display().to_string(),
                tmp.path().join("missing.pptx").display().to_string(),
                true,
                CancellationToken::new(),
            )
            .await;

        assert_eq!(finished.status, JobStatus::Failed);
        assert_eq!(finished.error.unwrap().kind, ErrorKind::PreconditionMissing);
    }

    #[tokio::test]
    async fn run_generate_honors_pre_set_cancellation() {
        let tmp = tempfile::tempdir().unwrap();
        let (engine, store) = engine(&tmp).await;
        let job = Job::new(JobKind::Generate, serde_json::json!({}), None);
        let id = job.id;
        store.create(job).await.unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let finished = engine
            .run_generate(
                id,
                tmp.path().join("doc.md").display().to_string(),
                tmp.path().join("template.pptx").display().to_string(),
                true,
                token,
            )
            .await;

        assert_eq!(finished.status, JobStatus::Cancelled);
    }
}

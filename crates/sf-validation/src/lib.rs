// SPDX-License-Identifier: MIT OR Apache-2.0
//! The Validation Loop: the per-slide render → diagnose → repair cycle
//! that runs inside Finalize, bounded by an outer iteration count and an
//! optional concurrency cap on per-slide vision analysis.
//!
//! Grounded on the original service's `SlideValidationManager`
//! (`_perform_parallel_iterative_validation` / `_validate_single_slide`):
//! render the whole deck once per iteration, analyze slides concurrently
//! under a semaphore, then apply repairs serially in ascending slide
//! position so later diagnostics always observe a consistent state.
#![deny(unsafe_code)]

use futures::future::join_all;
use sf_core::cancel::CancellationToken;
use sf_core::plan::{ContentPlan, SlideId};
use sf_host::ModelClientPool;
use sf_mutate::{Operation, PresentationClient, RenderedSlide};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Raw shape of one slide's vision-model diagnosis, decoded from the
/// JSON value [`sf_host::ModelClient::analyze_image`] returns.
#[derive(Debug, Clone, Deserialize)]
struct SlideDiagnosis {
    has_issues: bool,
    #[serde(default)]
    #[allow(dead_code)]
    issues: Vec<String>,
    #[serde(default)]
    #[allow(dead_code)]
    suggestions: Vec<String>,
    #[serde(default)]
    operations: Vec<Operation>,
    quality_score: u32,
}

/// Per-slide outcome after the loop finishes (or gives up).
#[derive(Debug, Clone, Default)]
pub struct SlideValidationRecord {
    pub has_issues: bool,
    pub issues: Vec<String>,
    pub operations_applied: usize,
    pub quality_score: u32,
    /// Set when the slide's analysis call itself failed (as opposed to
    /// the analysis succeeding and reporting issues).
    pub analysis_failed: bool,
}

/// Full result of one [`ValidationLoop::run`] invocation.
#[derive(Debug, Clone, Default)]
pub struct ValidationOutcome {
    pub iterations_run: u32,
    pub per_slide: HashMap<SlideId, SlideValidationRecord>,
    pub total_operations_applied: usize,
}

/// Priority order operations are applied in within one slide's repair
/// batch: font-size adjustments first (cheapest, least structurally
/// disruptive), then text content, and only then resize/reposition/image
/// /delete edits. Mirrors the vision analyzer's own stated preference.
fn operation_priority(op: &Operation) -> u8 {
    match op {
        Operation::AdjustFontSize { .. } => 0,
        Operation::SetText { .. } => 1,
        Operation::ResizeRegion { .. } => 2,
        Operation::ReplaceImage { .. } => 2,
        Operation::DeleteRegion { .. } => 3,
    }
}

/// Bounded-concurrency, bounded-iteration slide validator.
pub struct ValidationLoop {
    host: Arc<ModelClientPool>,
    presentation: Arc<dyn PresentationClient>,
    max_iterations: u32,
    max_workers: usize,
    parallel: bool,
}

impl ValidationLoop {
    pub fn new(
        host: Arc<ModelClientPool>,
        presentation: Arc<dyn PresentationClient>,
        max_iterations: u32,
        max_workers: usize,
        parallel: bool,
    ) -> Self {
        Self {
            host,
            presentation,
            max_iterations: max_iterations.max(1),
            max_workers: max_workers.max(1),
            parallel,
        }
    }

    /// Run the validation loop against `content_plan`. `save_path` is
    /// passed to [`PresentationClient::save`] before each render so an
    /// on-disk renderer can work from a fresh file; the in-memory mock
    /// ignores it.
    pub async fn run(
        &self,
        content_plan: &ContentPlan,
        save_path: &str,
        cancellation: &CancellationToken,
    ) -> ValidationOutcome {
        let position_of: HashMap<&SlideId, usize> = content_plan
            .slides
            .iter()
            .enumerate()
            .map(|(i, s)| (&s.slide_id, i))
            .collect();

        let mut per_slide: HashMap<SlideId, SlideValidationRecord> = HashMap::new();
        let mut total_operations_applied = 0usize;
        let mut iterations_run = 0u32;

        for iteration in 1..=self.max_iterations {
            if cancellation.is_cancelled() {
                debug!(iteration, "validation loop observed cancellation, stopping");
                break;
            }
            iterations_run = iteration;

            if let Err(err) = self.presentation.save(save_path).await {
                warn!(iteration, %err, "validation save failed, retrying next iteration");
                continue;
            }
            let rendered = match self.presentation.render_all_slides().await {
                Ok(slides) => slides,
                Err(err) => {
                    warn!(iteration, %err, "validation render failed, retrying next iteration");
                    continue;
                }
            };

            let relevant: Vec<&RenderedSlide> = rendered
                .iter()
                .filter(|s| position_of.contains_key(&s.slide_id))
                .collect();

            let analyses = self.analyze_all(&relevant).await;

            // Apply repairs in ascending content-plan position order so a
            // slide inserted/removed mid-iteration never confuses the
            // next slide's repair.
            let mut ordered: Vec<(&SlideId, SlideDiagnosisOrFailure)> = analyses.into_iter().collect();
            ordered.sort_by_key(|(id, _)| position_of.get(id).copied().unwrap_or(usize::MAX));

            let mut any_issue = false;
            let mut iteration_ops_applied = 0usize;

            for (slide_id, outcome) in ordered {
                match outcome {
                    SlideDiagnosisOrFailure::Failed(message) => {
                        any_issue = true;
                        per_slide.insert(
                            slide_id.clone(),
                            SlideValidationRecord {
                                has_issues: true,
                                issues: vec![message],
                                operations_applied: 0,
                                quality_score: 0,
                                analysis_failed: true,
                            },
                        );
                    }
                    SlideDiagnosisOrFailure::Ok(mut diagnosis) => {
                        if diagnosis.has_issues {
                            any_issue = true;
                        }
                        diagnosis.operations.sort_by_key(operation_priority);

                        let applied = if diagnosis.has_issues && !diagnosis.operations.is_empty() {
                            self.presentation
                                .apply_operations(slide_id, &diagnosis.operations)
                                .await
                                .unwrap_or(0)
                        } else {
                            0
                        };
                        iteration_ops_applied += applied;

                        per_slide.insert(
                            slide_id.clone(),
                            SlideValidationRecord {
                                has_issues: diagnosis.has_issues,
                                issues: diagnosis.issues,
                                operations_applied: applied,
                                quality_score: diagnosis.quality_score,
                                analysis_failed: false,
                            },
                        );
                    }
                }
            }

            total_operations_applied += iteration_ops_applied;

            if !any_issue || iteration_ops_applied == 0 {
                debug!(iteration, any_issue, iteration_ops_applied, "validation loop converged");
                break;
            }
        }

        ValidationOutcome {
            iterations_run,
            per_slide,
            total_operations_applied,
        }
    }

    async fn analyze_all<'a>(
        &self,
        slides: &[&'a RenderedSlide],
    ) -> HashMap<SlideId, SlideDiagnosisOrFailure> {
        let permits = if self.parallel { self.max_workers } else { 1 };
        let semaphore = Arc::new(Semaphore::new(permits));

        let tasks = slides.iter().map(|slide| {
            let semaphore = semaphore.clone();
            let host = self.host.clone();
            let slide_id = slide.slide_id.clone();
            let png_bytes = slide.png_bytes.clone();
            async move {
                let _permit = semaphore.acquire().await.expect("semaphore closed");
                let prompt = format!("validate slide {slide_id}");
                let outcome = match host.analyze_image(&png_bytes, &prompt).await {
                    Ok(value) => match serde_json::from_value::<SlideDiagnosis>(value) {
                        Ok(diagnosis) => SlideDiagnosisOrFailure::Ok(diagnosis),
                        Err(err) => SlideDiagnosisOrFailure::Failed(format!(
                            "malformed analysis response: {err}"
                        )),
                    },
                    Err(err) => SlideDiagnosisOrFailure::Failed(err.to_string()),
                };
                (slide_id, outcome)
            }
        });

        join_all(tasks).await.into_iter().collect()
    }
}

#[derive(Debug, Clone)]
enum SlideDiagnosisOrFailure {
    Ok(SlideDiagnosis),
    Failed(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use sf_core::plan::{SlideDescriptor, SlideType};
    use sf_host::{ModelClientPool, ModelKind, MockModelClient, RateGateConfig, RetryConfig};
    use sf_mutate::InMemoryPresentation;
    use std::collections::HashMap as Map;
    use std::time::Duration;

    fn plan(ids: &[&str]) -> ContentPlan {
        ContentPlan {
            slides: ids
                .iter()
                .map(|id| SlideDescriptor {
                    slide_id: SlideId((*id).into()),
                    slide_type: SlideType::Content,
                    layout_ref: "content".into(),
                    reasoning: String::new(),
                    section_content: serde_json::json!({}),
                })
                .collect(),
        }
    }

    async fn pool_with_queued_analyses(values: Vec<serde_json::Value>) -> Arc<ModelClientPool> {
        let pool = ModelClientPool::new(
            RateGateConfig {
                min_interval: Duration::from_millis(0),
            },
            RetryConfig::default(),
        );
        let mock = MockModelClient::new();
        for v in values {
            mock.push_image_analysis(Ok(v));
        }
        pool.register(ModelKind::Vision, Arc::new(mock)).await;
        Arc::new(pool)
    }

    #[tokio::test]
    async fn converges_when_no_slide_reports_issues() {
        let deck = Arc::new(InMemoryPresentation::new());
        deck.seed_slide(SlideId("s1".into()), Map::from([("title".into(), "x".into())]));
        let host = pool_with_queued_analyses(vec![serde_json::json!({
            "has_issues": false, "issues": [], "suggestions": [], "operations": [], "quality_score": 95
        })])
        .await;

        let loop_ = ValidationLoop::new(host, deck, 3, 2, false);
        let outcome = loop_
            .run(&plan(&["s1"]), "/tmp/out.pptx", &CancellationToken::new())
            .await;

        assert_eq!(outcome.iterations_run, 1);
        assert_eq!(outcome.total_operations_applied, 0);
        assert!(!outcome.per_slide[&SlideId("s1".into())].has_issues);
    }

    #[tokio::test]
    async fn runs_to_ceiling_when_issues_never_resolve() {
        let deck = Arc::new(InMemoryPresentation::new());
        deck.seed_slide(SlideId("s1".into()), Map::from([("title".into(), "x".into())]));
        let issue_response = serde_json::json!({
            "has_issues": true,
            "issues": ["overflow"],
            "suggestions": [],
            "operations": [{"op": "set_text", "region_id": "title", "text": "y"}],
            "quality_score": 40,
        });
        let host = pool_with_queued_analyses(vec![
            issue_response.clone(),
            issue_response.clone(),
            issue_response,
        ])
        .await;

        let loop_ = ValidationLoop::new(host, deck, 3, 2, true);
        let outcome = loop_
            .run(&plan(&["s1"]), "/tmp/out.pptx", &CancellationToken::new())
            .await;

        assert_eq!(outcome.iterations_run, 3);
        assert!(outcome.per_slide[&SlideId("s1".into())].has_issues);
        assert!(outcome.total_operations_applied > 0);
    }

    #[tokio::test]
    async fn stops_early_once_operations_applied_is_zero() {
        let deck = Arc::new(InMemoryPresentation::new());
        deck.seed_slide(SlideId("s1".into()), Map::from([("title".into(), "x".into())]));
        // has_issues true but no operations -> zero applied -> loop must
        // still terminate after iteration 1 rather than spin with no progress.
        let host = pool_with_queued_analyses(vec![serde_json::json!({
            "has_issues": true, "issues": ["cosmetic"], "suggestions": [], "operations": [], "quality_score": 70
        })])
        .await;

        let loop_ = ValidationLoop::new(host, deck, 5, 1, false);
        let outcome = loop_
            .run(&plan(&["s1"]), "/tmp/out.pptx", &CancellationToken::new())
            .await;

        assert_eq!(outcome.iterations_run, 1);
    }

    #[tokio::test]
    async fn absorbs_per_slide_analysis_failure_and_continues() {
        let deck = Arc::new(InMemoryPresentation::new());
        deck.seed_slide(SlideId("s1".into()), Map::from([("title".into(), "x".into())]));
        // No registered client at all -> analyze_image returns a
        // permanent "no client registered" error for every call.
        let host = Arc::new(ModelClientPool::new(
            RateGateConfig::default(),
            RetryConfig::default(),
        ));

        let loop_ = ValidationLoop::new(host, deck, 2, 1, false);
        let outcome = loop_
            .run(&plan(&["s1"]), "/tmp/out.pptx", &CancellationToken::new())
            .await;

        let record = &outcome.per_slide[&SlideId("s1".into())];
        assert!(record.analysis_failed);
        assert_eq!(record.operations_applied, 0);
    }

    #[tokio::test]
    async fn respects_cancellation_before_first_iteration() {
        let deck = Arc::new(InMemoryPresentation::new());
        deck.seed_slide(SlideId("s1".into()), Map::from([("title".into(), "x".into())]));
        let host = pool_with_queued_analyses(vec![]).await;
        let token = CancellationToken::new();
        token.cancel();

        let loop_ = ValidationLoop::new(host, deck, 3, 1, false);
        let outcome = loop_.run(&plan(&["s1"]), "/tmp/out.pptx", &token).await;

        assert_eq!(outcome.iterations_run, 0);
        assert!(outcome.per_slide.is_empty());
    }

    #[test]
    fn operation_priority_orders_font_before_text_before_position() {
        let mut ops = vec![
            Operation::ResizeRegion {
                region_id: "a".into(),
                width_pct: 1.0,
                height_pct: 1.0,
            },
            Operation::SetText {
                region_id: "a".into(),
                text: "x".into(),
            },
            Operation::AdjustFontSize {
                region_id: "a".into(),
                points: -2.0,
            },
        ];
        ops.sort_by_key(operation_priority);
        assert!(matches!(ops[0], Operation::AdjustFontSize { .. }));
        assert!(matches!(ops[1], Operation::SetText { .. }));
        assert!(matches!(ops[2], Operation::ResizeRegion { .. }));
    }
}

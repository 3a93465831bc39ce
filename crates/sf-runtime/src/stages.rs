// SPDX-License-Identifier: MIT OR Apache-2.0
//! The five ordered stages of the `generate` pipeline, plus the
//! standalone `analyze_template` stage, each consulting the Artifact
//! Cache before doing real work and writing back on a miss.

use async_trait::async_trait;
use sf_cache::{ArtifactCache, CacheKey};
use sf_core::cancel::CancellationToken;
use sf_core::layout::LayoutFeatures;
use sf_core::outline::OutlineDocument;
use sf_core::plan::{ContentPlan, SlideId};
use sf_error::{ErrorCode, SfError};
use sf_host::{ModelClientPool, ModelError};
use sf_mutate::{MutateError, Operation, PresentationClient};
use sf_validation::ValidationLoop;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

fn model_err(code: ErrorCode, err: ModelError) -> SfError {
    SfError::new(code, err.to_string())
}

fn mutate_err(code: ErrorCode, err: MutateError) -> SfError {
    SfError::new(code, err.to_string())
}

fn cache_err(err: sf_cache::CacheError) -> SfError {
    SfError::new(ErrorCode::StoreCacheFailed, err.to_string())
}

/// Per-job state threaded through the stage pipeline. Owned by one
/// worker for the duration of a single job's run.
pub struct StageContext {
    pub markdown_path: String,
    pub template_path: String,
    pub output_root: String,
    pub job_id: uuid::Uuid,

    pub outline: Option<OutlineDocument>,
    pub layout: Option<LayoutFeatures>,
    pub content_plan: Option<ContentPlan>,
    pub output_path: Option<String>,

    pub cache: Arc<ArtifactCache>,
    pub host: Arc<ModelClientPool>,
    pub presentation: Arc<dyn PresentationClient>,
    pub cancellation: CancellationToken,
}

/// A single pipeline stage. Stages run sequentially; any failure
/// short-circuits the remaining stages in the pipeline.
#[async_trait]
pub trait Stage: Send + Sync {
    async fn run(&self, ctx: &mut StageContext) -> Result<(), SfError>;
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------
// 1. Parse
// ---------------------------------------------------------------------

pub struct ParseStage;

#[derive(Serialize)]
struct ParseInput<'a> {
    markdown: &'a str,
}

#[async_trait]
impl Stage for ParseStage {
    async fn run(&self, ctx: &mut StageContext) -> Result<(), SfError> {
        let markdown = tokio::fs::read_to_string(&ctx.markdown_path)
            .await
            .map_err(|e| {
                SfError::new(ErrorCode::InputPreconditionMissing, e.to_string())
                    .with_context("path", &ctx.markdown_path)
            })?;
        if markdown.trim().is_empty() {
            return Err(SfError::new(
                ErrorCode::InputInvalidPayload,
                "markdown document is empty",
            ));
        }

        let key = CacheKey::compute("parse", &ParseInput { markdown: &markdown })
            .map_err(cache_err)?;
        if let Some(cached) = ctx.cache.get::<OutlineDocument>(&key).await.map_err(cache_err)? {
            ctx.outline = Some(cached);
            return Ok(());
        }

        let prompt = format!(
            "Parse the following markdown document into a JSON outline with fields \
             title, subtitle, sections[] (heading, blocks[], subsections[], semantic_type, \
             relation_type, visualization_hint):\n\n{markdown}"
        );
        let response = ctx
            .host
            .generate_text(&prompt)
            .await
            .map_err(|e| model_err(ErrorCode::StageParseFailed, e))?;
        let outline: OutlineDocument = serde_json::from_str(&response).map_err(|e| {
            SfError::new(ErrorCode::StageParseFailed, format!("malformed outline: {e}"))
        })?;
        if let Some(offending_path) = outline.excess_depth_path() {
            return Err(SfError::new(
                ErrorCode::StageParseFailed,
                format!(
                    "section nesting exceeds the {} level cap at: {offending_path}",
                    sf_core::outline::MAX_SECTION_DEPTH
                ),
            ));
        }

        ctx.cache.put(&key, &outline).await.map_err(cache_err)?;
        ctx.outline = Some(outline);
        Ok(())
    }

    fn name(&self) -> &str {
        "parse"
    }
}

// ---------------------------------------------------------------------
// 2. Analyze template
// ---------------------------------------------------------------------

pub struct AnalyzeTemplateStage;

#[derive(Serialize)]
struct AnalyzeInput<'a> {
    template_path: &'a str,
}

#[async_trait]
impl Stage for AnalyzeTemplateStage {
    async fn run(&self, ctx: &mut StageContext) -> Result<(), SfError> {
        if tokio::fs::metadata(&ctx.template_path).await.is_err() {
            return Err(SfError::new(
                ErrorCode::InputPreconditionMissing,
                format!("template file not found: {}", ctx.template_path),
            ));
        }

        let key = CacheKey::compute(
            "analyze_template",
            &AnalyzeInput {
                template_path: &ctx.template_path,
            },
        )
        .map_err(cache_err)?;
        if let Some(cached) = ctx.cache.get::<LayoutFeatures>(&key).await.map_err(cache_err)? {
            ctx.layout = Some(cached);
            return Ok(());
        }

        ctx.presentation
            .load(&ctx.template_path)
            .await
            .map_err(|e| mutate_err(ErrorCode::StageAnalyzeFailed, e))?;

        let prompt = format!(
            "Analyze the slide layouts available in template '{}' and return a JSON \
             layout_features document listing, per layout: name, purpose, structure, \
             editable_regions[], image_slots[], group_relations[].",
            ctx.template_path
        );
        let response = ctx
            .host
            .generate_text(&prompt)
            .await
            .map_err(|e| model_err(ErrorCode::StageAnalyzeFailed, e))?;
        let layout: LayoutFeatures = serde_json::from_str(&response).map_err(|e| {
            SfError::new(ErrorCode::StageAnalyzeFailed, format!("malformed layout features: {e}"))
        })?;

        ctx.cache.put(&key, &layout).await.map_err(cache_err)?;
        ctx.layout = Some(layout);
        Ok(())
    }

    fn name(&self) -> &str {
        "analyze_template"
    }
}

// ---------------------------------------------------------------------
// 3. Plan content
// ---------------------------------------------------------------------

pub struct PlanContentStage;

#[derive(Serialize)]
struct PlanInput<'a> {
    outline: &'a OutlineDocument,
    layout: &'a LayoutFeatures,
}

#[async_trait]
impl Stage for PlanContentStage {
    async fn run(&self, ctx: &mut StageContext) -> Result<(), SfError> {
        let outline = ctx
            .outline
            .as_ref()
            .ok_or_else(|| SfError::new(ErrorCode::InputPreconditionMissing, "missing content_structure"))?;
        let layout = ctx
            .layout
            .as_ref()
            .ok_or_else(|| SfError::new(ErrorCode::InputPreconditionMissing, "missing layout_features"))?;

        let key = CacheKey::compute("plan_content", &PlanInput { outline, layout }).map_err(cache_err)?;
        if let Some(cached) = ctx.cache.get::<ContentPlan>(&key).await.map_err(cache_err)? {
            ctx.content_plan = Some(cached);
            return Ok(());
        }

        let prompt = format!(
            "Given this outline and this set of available layouts, produce a JSON content \
             plan: an ordered slides[] list that opens with one opening slide and closes with \
             one closing slide, each entry carrying slide_id, slide_type, layout_ref, reasoning, \
             section_content.\n\noutline: {}\n\nlayouts: {}",
            serde_json::to_string(outline).unwrap_or_default(),
            serde_json::to_string(layout).unwrap_or_default(),
        );
        let response = ctx
            .host
            .generate_deep_thinking(&prompt)
            .await
            .map_err(|e| model_err(ErrorCode::StagePlanFailed, e))?;
        let plan: ContentPlan = serde_json::from_str(&response).map_err(|e| {
            SfError::new(ErrorCode::StagePlanFailed, format!("malformed content plan: {e}"))
        })?;
        if plan.slides.is_empty() {
            return Err(SfError::new(
                ErrorCode::StagePlanFailed,
                "content plan produced zero slides from a non-empty outline",
            ));
        }

        ctx.cache.put(&key, &plan).await.map_err(cache_err)?;
        ctx.content_plan = Some(plan);
        Ok(())
    }

    fn name(&self) -> &str {
        "plan_content"
    }
}

// ---------------------------------------------------------------------
// 4. Generate slides
// ---------------------------------------------------------------------

pub struct GenerateSlidesStage;

/// Deterministic content-to-element mapping: object string values become
/// a single `set_text`; array-of-string values are joined into one
/// multi-line `set_text`. No model call — this is a mechanical
/// transcription of already-planned content, not a judgment call.
fn operations_for_section_content(content: &serde_json::Value) -> Vec<Operation> {
    let mut ops = Vec::new();
    let Some(map) = content.as_object() else {
        return ops;
    };
    for (region_id, value) in map {
        let text = match value {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Array(items) => items
                .iter()
                .filter_map(|v| v.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
            _ => continue,
        };
        ops.push(Operation::SetText {
            region_id: region_id.clone(),
            text,
        });
    }
    ops
}

#[async_trait]
impl Stage for GenerateSlidesStage {
    async fn run(&self, ctx: &mut StageContext) -> Result<(), SfError> {
        let plan = ctx
            .content_plan
            .as_ref()
            .ok_or_else(|| SfError::new(ErrorCode::InputPreconditionMissing, "missing content_plan"))?
            .clone();

        for slide in &plan.slides {
            ctx.presentation
                .create_slide(&slide.slide_id, &slide.layout_ref)
                .await
                .map_err(|e| mutate_err(ErrorCode::StageGenerateFailed, e))?;

            let ops = operations_for_section_content(&slide.section_content);
            if !ops.is_empty() {
                ctx.presentation
                    .apply_operations(&slide.slide_id, &ops)
                    .await
                    .map_err(|e| mutate_err(ErrorCode::StageGenerateFailed, e))?;
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "generate_slides"
    }
}

// ---------------------------------------------------------------------
// 5. Finalize
// ---------------------------------------------------------------------

pub struct FinalizeStage {
    pub max_iterations: u32,
    pub max_workers: usize,
    pub parallel: bool,
    /// `false` skips the Validation Loop entirely, going straight from
    /// slide reordering to save — the caller's `validation-enabled` flag.
    pub validation_enabled: bool,
}

#[async_trait]
impl Stage for FinalizeStage {
    async fn run(&self, ctx: &mut StageContext) -> Result<(), SfError> {
        let plan = ctx
            .content_plan
            .as_ref()
            .ok_or_else(|| SfError::new(ErrorCode::InputPreconditionMissing, "missing content_plan"))?
            .clone();

        let keep: HashSet<&SlideId> = plan.slides.iter().map(|s| &s.slide_id).collect();
        let current = ctx
            .presentation
            .list_slide_ids()
            .await
            .map_err(|e| mutate_err(ErrorCode::StageFinalizeFailed, e))?;
        for slide_id in &current {
            if !keep.contains(slide_id) {
                // Never delete all slides: ignore a WouldEmptyDeck refusal
                // rather than fail the stage over a pathological template.
                let _ = ctx.presentation.delete_slide(slide_id).await;
            }
        }

        let order: Vec<SlideId> = plan.slides.iter().map(|s| s.slide_id.clone()).collect();
        ctx.presentation
            .reorder_slides(&order)
            .await
            .map_err(|e| mutate_err(ErrorCode::StageFinalizeFailed, e))?;

        let output_dir = format!("{}/{}", ctx.output_root, ctx.job_id);
        tokio::fs::create_dir_all(&output_dir)
            .await
            .map_err(|e| SfError::new(ErrorCode::StoreIoFailed, e.to_string()))?;
        let output_path = format!("{output_dir}/presentation.pptx");

        if self.validation_enabled {
            let validation = ValidationLoop::new(
                ctx.host.clone(),
                ctx.presentation.clone(),
                self.max_iterations,
                self.max_workers,
                self.parallel,
            );
            let outcome = validation.run(&plan, &output_path, &ctx.cancellation).await;
            tracing::info!(
                target: "sf.runtime",
                job_id = %ctx.job_id,
                iterations = outcome.iterations_run,
                operations_applied = outcome.total_operations_applied,
                "validation loop finished"
            );
        } else {
            tracing::info!(
                target: "sf.runtime",
                job_id = %ctx.job_id,
                "validation loop skipped, disabled for this job"
            );
        }

        ctx.presentation
            .save(&output_path)
            .await
            .map_err(|e| mutate_err(ErrorCode::StageFinalizeFailed, e))?;
        ctx.output_path = Some(output_path);
        Ok(())
    }

    fn name(&self) -> &str {
        "finalize"
    }
}

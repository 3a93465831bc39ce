// SPDX-License-Identifier: MIT OR Apache-2.0
//! A narrow client for the presentation-mutation library: loading a
//! deck, cloning/deleting/reordering slides, applying typed edit
//! operations, rendering slides to images, and saving. The mutation
//! library itself is out of scope; this crate only defines the contract
//! the orchestrator drives it through.
#![deny(unsafe_code)]

use async_trait::async_trait;
use sf_core::SlideId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// A single typed edit verb applied to one slide's region. Modeled as a
/// tagged union rather than an opaque payload so the Validation Loop's
/// repair step can dispatch on `op` without round-tripping through the
/// mutation library's own types.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    SetText {
        region_id: String,
        text: String,
    },
    ResizeRegion {
        region_id: String,
        width_pct: f32,
        height_pct: f32,
    },
    AdjustFontSize {
        region_id: String,
        points: f32,
    },
    ReplaceImage {
        region_id: String,
        src: String,
    },
    DeleteRegion {
        region_id: String,
    },
}

#[derive(Debug)]
pub enum MutateError {
    SlideNotFound(SlideId),
    RegionNotFound { slide_id: SlideId, region_id: String },
    /// A reorder or delete call would leave the deck with no slides at
    /// all, which is never a legal outcome.
    WouldEmptyDeck,
    Io(String),
}

impl std::fmt::Display for MutateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SlideNotFound(id) => write!(f, "slide {id} not found"),
            Self::RegionNotFound { slide_id, region_id } => {
                write!(f, "slide {slide_id}: region {region_id} not found")
            }
            Self::WouldEmptyDeck => write!(f, "operation would leave the deck with no slides"),
            Self::Io(msg) => write!(f, "io error: {msg}"),
        }
    }
}

impl std::error::Error for MutateError {}

/// Rendered still image of one slide, used by the Validation Loop's
/// vision-model analysis step.
#[derive(Clone, Debug)]
pub struct RenderedSlide {
    pub slide_id: SlideId,
    pub png_bytes: Vec<u8>,
}

/// The contract the orchestrator drives the presentation mutation
/// library through. A real implementation wraps whatever native
/// presentation library is available; [`InMemoryPresentation`] below is
/// a deterministic mock used in tests.
#[async_trait]
pub trait PresentationClient: Send + Sync {
    /// Load a template or working deck from `path` and return a handle
    /// the remaining methods operate on.
    async fn load(&self, path: &str) -> Result<(), MutateError>;

    /// Clone a template slide matching `layout_ref` (or the first content
    /// layout as a fallback) and register it under `slide_id`, writing a
    /// `slide_id: {id}` marker into the clone's notes per the slide-notes
    /// contract. Appends to the end of the current physical order.
    async fn create_slide(&self, slide_id: &SlideId, layout_ref: &str) -> Result<(), MutateError>;

    /// Current physical slide order, read back via each slide's notes
    /// marker rather than an opaque internal index.
    async fn list_slide_ids(&self) -> Result<Vec<SlideId>, MutateError>;

    /// Remove a slide. Refuses to remove the deck's last remaining slide.
    async fn delete_slide(&self, slide_id: &SlideId) -> Result<(), MutateError>;

    /// Replace the physical slide order. `order` must name exactly the
    /// slides currently present; unknown ids are a no-op for that entry
    /// rather than a hard failure, since a repair may race a deletion.
    async fn reorder_slides(&self, order: &[SlideId]) -> Result<(), MutateError>;

    /// Apply a batch of operations to one slide, returning the number
    /// actually applied (operations addressing a missing region are
    /// skipped, not treated as a hard failure of the batch).
    async fn apply_operations(
        &self,
        slide_id: &SlideId,
        operations: &[Operation],
    ) -> Result<usize, MutateError>;

    /// Render every slide currently in the deck to an image, in physical
    /// slide order. Used once per validation iteration rather than per
    /// slide, since most presentation libraries render a whole deck in
    /// one pass far more cheaply than slide-by-slide.
    async fn render_all_slides(&self) -> Result<Vec<RenderedSlide>, MutateError>;

    async fn save(&self, path: &str) -> Result<(), MutateError>;
}

/// Deterministic in-memory mock: tracks region text per slide and
/// "renders" a slide as a fixed-size all-zero image whose length encodes
/// how many operations have touched it, so tests can assert something
/// changed without depending on real rendering.
#[derive(Default)]
pub struct InMemoryPresentation {
    order: Mutex<Vec<SlideId>>,
    regions: Mutex<HashMap<SlideId, HashMap<String, String>>>,
    applied_ops: Mutex<HashMap<SlideId, usize>>,
}

impl InMemoryPresentation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a slide with an initial set of editable regions, as if
    /// [`PresentationClient::create_slide`] had just populated it from a
    /// layout. Appends to the current physical order.
    pub fn seed_slide(&self, slide_id: SlideId, regions: HashMap<String, String>) {
        self.order.lock().unwrap().push(slide_id.clone());
        self.regions.lock().unwrap().insert(slide_id.clone(), regions);
        self.applied_ops.lock().unwrap().insert(slide_id, 0);
    }

    pub fn region_text(&self, slide_id: &SlideId, region_id: &str) -> Option<String> {
        self.regions
            .lock()
            .unwrap()
            .get(slide_id)
            .and_then(|r| r.get(region_id))
            .cloned()
    }
}

#[async_trait]
impl PresentationClient for InMemoryPresentation {
    async fn load(&self, _path: &str) -> Result<(), MutateError> {
        Ok(())
    }

    async fn create_slide(&self, slide_id: &SlideId, _layout_ref: &str) -> Result<(), MutateError> {
        self.seed_slide(slide_id.clone(), HashMap::new());
        Ok(())
    }

    async fn list_slide_ids(&self) -> Result<Vec<SlideId>, MutateError> {
        Ok(self.order.lock().unwrap().clone())
    }

    async fn delete_slide(&self, slide_id: &SlideId) -> Result<(), MutateError> {
        let mut order = self.order.lock().unwrap();
        if order.len() <= 1 {
            return Err(MutateError::WouldEmptyDeck);
        }
        let before = order.len();
        order.retain(|id| id != slide_id);
        if order.len() == before {
            return Err(MutateError::SlideNotFound(slide_id.clone()));
        }
        self.regions.lock().unwrap().remove(slide_id);
        self.applied_ops.lock().unwrap().remove(slide_id);
        Ok(())
    }

    async fn reorder_slides(&self, order: &[SlideId]) -> Result<(), MutateError> {
        if order.is_empty() {
            return Err(MutateError::WouldEmptyDeck);
        }
        let known = self.regions.lock().unwrap();
        let filtered: Vec<SlideId> = order.iter().filter(|id| known.contains_key(*id)).cloned().collect();
        drop(known);
        if filtered.is_empty() {
            return Err(MutateError::WouldEmptyDeck);
        }
        *self.order.lock().unwrap() = filtered;
        Ok(())
    }

    async fn apply_operations(
        &self,
        slide_id: &SlideId,
        operations: &[Operation],
    ) -> Result<usize, MutateError> {
        let mut regions = self.regions.lock().unwrap();
        let slide_regions = regions
            .get_mut(slide_id)
            .ok_or_else(|| MutateError::SlideNotFound(slide_id.clone()))?;

        let mut applied = 0;
        for op in operations {
            let ok = match op {
                Operation::SetText { region_id, text } => {
                    if let Some(entry) = slide_regions.get_mut(region_id) {
                        *entry = text.clone();
                        true
                    } else {
                        slide_regions.insert(region_id.clone(), text.clone());
                        true
                    }
                }
                Operation::DeleteRegion { region_id } => slide_regions.remove(region_id).is_some(),
                Operation::ResizeRegion { region_id, .. }
                | Operation::AdjustFontSize { region_id, .. }
                | Operation::ReplaceImage { region_id, .. } => {
                    slide_regions.contains_key(region_id)
                }
            };
            if ok {
                applied += 1;
            }
        }
        *self.applied_ops.lock().unwrap().entry(slide_id.clone()).or_insert(0) += applied;
        Ok(applied)
    }

    async fn render_all_slides(&self) -> Result<Vec<RenderedSlide>, MutateError> {
        let order = self.order.lock().unwrap();
        let applied = self.applied_ops.lock().unwrap();
        Ok(order
            .iter()
            .map(|id| RenderedSlide {
                slide_id: id.clone(),
                png_bytes: vec![0u8; 64 + applied.get(id).copied().unwrap_or(0)],
            })
            .collect())
    }

    async fn save(&self, _path: &str) -> Result<(), MutateError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slide(id: &str) -> SlideId {
        SlideId(id.into())
    }

    #[tokio::test]
    async fn apply_operations_skips_missing_regions_without_failing_batch() {
        let deck = InMemoryPresentation::new();
        deck.seed_slide(slide("s1"), HashMap::from([("title".into(), "old".into())]));

        let applied = deck
            .apply_operations(
                &slide("s1"),
                &[Operation::SetText {
                    region_id: "title".into(),
                    text: "new".into(),
                }],
            )
            .await
            .unwrap();

        assert_eq!(applied, 1);
        assert_eq!(deck.region_text(&slide("s1"), "title").unwrap(), "new");
    }

    #[tokio::test]
    async fn apply_operations_against_unknown_slide_is_an_error() {
        let deck = InMemoryPresentation::new();
        let err = deck
            .apply_operations(&slide("ghost"), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, MutateError::SlideNotFound(_)));
    }

    #[tokio::test]
    async fn render_all_slides_reflects_operations_applied() {
        let deck = InMemoryPresentation::new();
        deck.seed_slide(slide("s1"), HashMap::from([("title".into(), "old".into())]));
        let before = deck.render_all_slides().await.unwrap();

        deck.apply_operations(
            &slide("s1"),
            &[Operation::SetText {
                region_id: "title".into(),
                text: "new".into(),
            }],
        )
        .await
        .unwrap();
        let after = deck.render_all_slides().await.unwrap();

        assert!(after[0].png_bytes.len() > before[0].png_bytes.len());
    }

    #[tokio::test]
    async fn create_slide_appends_to_physical_order() {
        let deck = InMemoryPresentation::new();
        deck.create_slide(&slide("s1"), "title-only").await.unwrap();
        deck.create_slide(&slide("s2"), "content").await.unwrap();
        assert_eq!(deck.list_slide_ids().await.unwrap(), vec![slide("s1"), slide("s2")]);
    }

    #[tokio::test]
    async fn delete_slide_refuses_to_empty_the_deck() {
        let deck = InMemoryPresentation::new();
        deck.create_slide(&slide("only"), "title-only").await.unwrap();
        let err = deck.delete_slide(&slide("only")).await.unwrap_err();
        assert!(matches!(err, MutateError::WouldEmptyDeck));
    }

    #[tokio::test]
    async fn delete_slide_removes_from_order() {
        let deck = InMemoryPresentation::new();
        deck.create_slide(&slide("s1"), "title-only").await.unwrap();
        deck.create_slide(&slide("s2"), "content").await.unwrap();
        deck.delete_slide(&slide("s1")).await.unwrap();
        assert_eq!(deck.list_slide_ids().await.unwrap(), vec![slide("s2")]);
    }

    #[tokio::test]
    async fn reorder_slides_replaces_physical_order() {
        let deck = InMemoryPresentation::new();
        deck.create_slide(&slide("s1"), "title-only").await.unwrap();
        deck.create_slide(&slide("s2"), "content").await.unwrap();
        deck.reorder_slides(&[slide("s2"), slide("s1")]).await.unwrap();
        assert_eq!(deck.list_slide_ids().await.unwrap(), vec![slide("s2"), slide("s1")]);
    }

    #[tokio::test]
    async fn reorder_drops_unknown_ids_instead_of_failing() {
        let deck = InMemoryPresentation::new();
        deck.create_slide(&slide("s1"), "title-only").await.unwrap();
        deck.reorder_slides(&[slide("ghost"), slide("s1")]).await.unwrap();
        assert_eq!(deck.list_slide_ids().await.unwrap(), vec![slide("s1")]);
    }

    #[test]
    fn operation_serializes_with_tagged_op_field() {
        let op = Operation::SetText {
            region_id: "title".into(),
            text: "hi".into(),
        };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["op"], "set_text");
    }
}

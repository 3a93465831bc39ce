// SPDX-License-Identifier: MIT OR Apache-2.0
//! Content-plan and slide-descriptor types produced by the Plan-content
//! stage and consumed by Generate and the Validation Loop.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical identifier for a slide, stable across validation repairs even
/// if the physical slide index changes (e.g. a repair inserts a slide).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct SlideId(pub String);

impl fmt::Display for SlideId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The full set of slides planned for a presentation.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct ContentPlan {
    pub slides: Vec<SlideDescriptor>,
}

/// Coarse slide category, used by Generate to pick a rendering strategy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SlideType {
    Title,
    SectionDivider,
    Content,
    Comparison,
    Summary,
}

/// One planned slide: which layout to use, why, and what content to pour
/// into it.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct SlideDescriptor {
    pub slide_id: SlideId,
    pub slide_type: SlideType,
    pub layout_ref: String,
    pub reasoning: String,
    pub section_content: serde_json::Value,
}

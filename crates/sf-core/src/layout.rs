// SPDX-License-Identifier: MIT OR Apache-2.0
//! Template layout-feature types produced by the Analyze-template stage.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Layout features extracted from a presentation template.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct LayoutFeatures {
    pub layouts: Vec<LayoutDescriptor>,
}

/// One slide layout available in a template.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct LayoutDescriptor {
    pub name: String,
    pub purpose: String,
    pub structure: LayoutStructureType,
    pub editable_regions: Vec<EditableRegion>,
    pub image_slots: Vec<ImageSlot>,
    pub group_relations: Vec<GroupRelation>,
}

/// Coarse shape of a layout, used to pick candidate layouts for a slide
/// before checking individual region roles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum LayoutStructureType {
    TitleOnly,
    TitleAndBody,
    TwoColumn,
    Grid,
    FullBleedImage,
    Comparison,
}

/// A text region a layout exposes for content insertion.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct EditableRegion {
    pub id: String,
    pub role: RegionRole,
}

/// The content role an editable region plays within a layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RegionRole {
    Title,
    ParagraphSingle,
    ParagraphMulti,
    BulletShort,
    BulletLong,
    Numbered,
    ShapeLabel,
    ShapeContent,
}

/// A region reserved for an inserted image.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct ImageSlot {
    pub id: String,
    pub aspect_ratio: f32,
}

/// A declared relationship between two or more regions in a layout (e.g.
/// a label bound to a shape it annotates).
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct GroupRelation {
    pub region_ids: Vec<String>,
    pub kind: String,
}

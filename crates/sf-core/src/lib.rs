// SPDX-License-Identifier: MIT OR Apache-2.0
//! Domain types shared across the SlideForge orchestrator: jobs and their
//! lifecycle, the parsed-document model, template layout features, and
//! the content plan that bridges them.

pub mod cancel;
pub mod job;
pub mod layout;
pub mod outline;
pub mod plan;

pub use cancel::{CancellableRun, CancellationReason, CancellationToken};
pub use job::{ErrorKind, Job, JobError, JobKind, JobStatus, StatusSnapshot};
pub use layout::{
    EditableRegion, GroupRelation, ImageSlot, LayoutDescriptor, LayoutFeatures,
    LayoutStructureType, RegionRole,
};
pub use outline::{
    ContentBlock, OutlineDocument, OutlineSection, RelationType, SemanticType,
    VisualizationHint, MAX_SECTION_DEPTH,
};
pub use plan::{ContentPlan, SlideDescriptor, SlideId, SlideType};

// SPDX-License-Identifier: MIT OR Apache-2.0
//! Parsed-document and content-block types produced by the Parse stage.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Maximum nesting depth a parsed outline's sections may reach before the
/// Parse stage rejects the document.
pub const MAX_SECTION_DEPTH: usize = 5;

/// Root of a parsed markdown document.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct OutlineDocument {
    pub title: String,
    pub subtitle: Option<String>,
    pub sections: Vec<OutlineSection>,
}

impl OutlineDocument {
    /// Returns the deepest nesting level reached by any section, where a
    /// top-level section is depth 1.
    pub fn max_depth(&self) -> usize {
        self.sections
            .iter()
            .map(OutlineSection::max_depth)
            .max()
            .unwrap_or(0)
    }

    /// `true` if the document carries no sections at all — a successfully
    /// parsed but empty outline, distinct from a parse failure.
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Enforces the `MAX_SECTION_DEPTH` nesting cap. Returns the
    /// slash-joined heading path of the first section found exceeding it,
    /// so the caller can name the offending path in its error message.
    pub fn excess_depth_path(&self) -> Option<String> {
        let mut path = Vec::new();
        self.sections.iter().find_map(|s| s.excess_depth_path(1, &mut path))
    }
}

/// One heading and its content within an [`OutlineDocument`].
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct OutlineSection {
    pub heading: String,
    pub blocks: Vec<ContentBlock>,
    pub subsections: Vec<OutlineSection>,
    pub semantic_type: SemanticType,
    pub relation_type: RelationType,
    pub visualization_hint: VisualizationHint,
}

impl OutlineSection {
    fn max_depth(&self) -> usize {
        1 + self
            .subsections
            .iter()
            .map(OutlineSection::max_depth)
            .max()
            .unwrap_or(0)
    }

    /// Depth-first search for the first node at depth `MAX_SECTION_DEPTH + 1`
    /// or deeper, accumulating `path` as it descends so the caller gets a
    /// human-readable heading trail rather than a bare depth number.
    fn excess_depth_path(&self, depth: usize, path: &mut Vec<String>) -> Option<String> {
        path.push(self.heading.clone());
        if depth > MAX_SECTION_DEPTH {
            return Some(path.join(" > "));
        }
        let found = self
            .subsections
            .iter()
            .find_map(|s| s.excess_depth_path(depth + 1, path));
        if found.is_none() {
            path.pop();
        }
        found
    }
}

/// A single piece of content within a section.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Paragraph(String),
    BulletList(Vec<String>),
    NumberedList(Vec<String>),
    CodeBlock {
        language: Option<String>,
        code: String,
    },
    Table {
        headers: Vec<String>,
        rows: Vec<Vec<String>>,
    },
    Image {
        alt: String,
        src: String,
    },
}

/// Semantic role a section plays in the overall narrative. Vocabulary
/// drawn from the content-planning prompt's closed enumeration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SemanticType {
    Introduction,
    MainPoint,
    Supporting,
    Example,
    Comparison,
    Conclusion,
    Transition,
}

/// How a section's content relates internally.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    Sequential,
    Hierarchical,
    Parallel,
    CauseEffect,
    Contrast,
}

/// Suggested visual treatment for a section's content.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum VisualizationHint {
    None,
    Chart,
    Diagram,
    Table,
    Image,
    Timeline,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf_section(heading: &str) -> OutlineSection {
        OutlineSection {
            heading: heading.to_string(),
            blocks: vec![],
            subsections: vec![],
            semantic_type: SemanticType::Supporting,
            relation_type: RelationType::Sequential,
            visualization_hint: VisualizationHint::None,
        }
    }

    #[test]
    fn empty_document_reports_empty_and_zero_depth() {
        let doc = OutlineDocument {
            title: "Untitled".into(),
            subtitle: None,
            sections: vec![],
        };
        assert!(doc.is_empty());
        assert_eq!(doc.max_depth(), 0);
    }

    #[test]
    fn depth_counts_top_level_section_as_one() {
        let doc = OutlineDocument {
            title: "t".into(),
            subtitle: None,
            sections: vec![leaf_section("a")],
        };
        assert_eq!(doc.max_depth(), 1);
    }

    #[test]
    fn excess_depth_path_is_none_within_the_cap() {
        let doc = OutlineDocument {
            title: "t".into(),
            subtitle: None,
            sections: vec![leaf_section("a")],
        };
        assert!(doc.excess_depth_path().is_none());
    }

    #[test]
    fn excess_depth_path_names_the_offending_heading_trail() {
        let mut section = leaf_section("top");
        for i in 0..MAX_SECTION_DEPTH {
            let mut next = leaf_section(&format!("level-{i}"));
            next.subsections = vec![section];
            section = next;
        }
        let doc = OutlineDocument {
            title: "t".into(),
            subtitle: None,
            sections: vec![section],
        };
        let path = doc.excess_depth_path().expect("should exceed the cap");
        assert!(path.starts_with(&format!("level-{}", MAX_SECTION_DEPTH - 1)));
        assert!(path.ends_with("top"));
    }

    #[test]
    fn depth_accumulates_through_nested_subsections() {
        let mut inner = leaf_section("inner");
        let mut middle = leaf_section("middle");
        middle.subsections = vec![{
            inner.subsections = vec![leaf_section("deepest")];
            inner
        }];
        let doc = OutlineDocument {
            title: "t".into(),
            subtitle: None,
            sections: vec![middle],
        };
        assert_eq!(doc.max_depth(), 3);
    }
}

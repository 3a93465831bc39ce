// SPDX-License-Identifier: MIT OR Apache-2.0
//! Snapshot tests for the `Operation` wire tag, used by both the
//! Validation Loop's repair step and any external mutation-review
//! tooling that consumes the same JSON.

use sf_mutate::Operation;

#[test]
fn set_text_operation() {
    let op = Operation::SetText {
        region_id: "title".into(),
        text: "Quarterly Review".into(),
    };
    insta::assert_json_snapshot!("operation_set_text", op);
}

#[test]
fn resize_region_operation() {
    let op = Operation::ResizeRegion {
        region_id: "body".into(),
        width_pct: 0.82,
        height_pct: 0.55,
    };
    insta::assert_json_snapshot!("operation_resize_region", op);
}

#[test]
fn adjust_font_size_operation() {
    let op = Operation::AdjustFontSize {
        region_id: "bullet_list".into(),
        points: -2.0,
    };
    insta::assert_json_snapshot!("operation_adjust_font_size", op);
}

#[test]
fn replace_image_operation() {
    let op = Operation::ReplaceImage {
        region_id: "hero_image".into(),
        src: "assets/chart_01.png".into(),
    };
    insta::assert_json_snapshot!("operation_replace_image", op);
}

#[test]
fn delete_region_operation() {
    let op = Operation::DeleteRegion {
        region_id: "footer_note".into(),
    };
    insta::assert_json_snapshot!("operation_delete_region", op);
}

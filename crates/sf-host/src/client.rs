// SPDX-License-Identifier: MIT OR Apache-2.0
//! The narrow model-client contract external model providers implement.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Identifies which model capability is being invoked, so the pool can
/// apply per-kind rate limiting and pick a registered client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ModelKind {
    Text,
    Embedding,
    Vision,
    /// A slower, higher-quality text model used for planning steps that
    /// trade latency for better reasoning (e.g. Plan content).
    DeepThinking,
}

#[derive(Debug)]
pub enum ModelError {
    /// Transport-level or provider-side failure; eligible for retry.
    Transient(String),
    /// The request itself was malformed or unsupported; not retried.
    Permanent(String),
}

impl std::fmt::Display for ModelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient(m) => write!(f, "transient model error: {m}"),
            Self::Permanent(m) => write!(f, "permanent model error: {m}"),
        }
    }
}

impl std::error::Error for ModelError {}

/// A model client backing one [`ModelKind`].
///
/// Deliberately narrow: the wire protocol of any particular provider is
/// out of scope, so this trait exposes only the operations the Stage
/// Engine and Validation Loop actually need.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn generate_text(&self, prompt: &str) -> Result<String, ModelError>;
    async fn generate_embedding(&self, text: &str) -> Result<Vec<f32>, ModelError>;
    async fn analyze_image(&self, image_bytes: &[u8], prompt: &str) -> Result<Value, ModelError>;
    async fn analyze_images(
        &self,
        images: &[(Vec<u8>, String)],
    ) -> Result<Vec<Value>, ModelError>;
    /// Release any held resources (connections, file handles). Called
    /// when a `Config Registry` invalidation drops the last `Arc` to a
    /// client; implementations without resources to release can leave
    /// this as the default no-op.
    async fn close(&self) {}
}

/// In-process mock used by tests and local demos: returns a
/// pre-programmed, queued sequence of responses per method, falling back
/// to a fixed canned response once the queue is drained.
pub struct MockModelClient {
    text_queue: Mutex<VecDeque<Result<String, ModelError>>>,
    image_queue: Mutex<VecDeque<Result<Value, ModelError>>>,
}

impl Default for MockModelClient {
    fn default() -> Self {
        Self {
            text_queue: Mutex::new(VecDeque::new()),
            image_queue: Mutex::new(VecDeque::new()),
        }
    }
}

impl MockModelClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response to be returned by the next `generate_text` call.
    pub fn push_text(&self, response: Result<String, ModelError>) {
        self.text_queue.lock().unwrap().push_back(response);
    }

    /// Queue a response to be returned by the next `analyze_image` call.
    pub fn push_image_analysis(&self, response: Result<Value, ModelError>) {
        self.image_queue.lock().unwrap().push_back(response);
    }
}

#[async_trait]
impl ModelClient for MockModelClient {
    async fn generate_text(&self, prompt: &str) -> Result<String, ModelError> {
        if let Some(queued) = self.text_queue.lock().unwrap().pop_front() {
            return queued;
        }
        Ok(format!("mock response to: {prompt}"))
    }

    async fn generate_embedding(&self, text: &str) -> Result<Vec<f32>, ModelError> {
        Ok(text.bytes().map(|b| b as f32 / 255.0).collect())
    }

    async fn analyze_image(&self, _image_bytes: &[u8], _prompt: &str) -> Result<Value, ModelError> {
        if let Some(queued) = self.image_queue.lock().unwrap().pop_front() {
            return queued;
        }
        Ok(serde_json::json!({
            "has_issues": false,
            "issues": [],
            "suggestions": [],
            "operations": [],
            "quality_score": 100,
        }))
    }

    async fn analyze_images(
        &self,
        images: &[(Vec<u8>, String)],
    ) -> Result<Vec<Value>, ModelError> {
        let mut out = Vec::with_capacity(images.len());
        for (bytes, prompt) in images {
            out.push(self.analyze_image(bytes, prompt).await?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_falls_back_to_canned_response_when_queue_empty() {
        let client = MockModelClient::new();
        let resp = client.generate_text("hello").await.unwrap();
        assert!(resp.contains("hello"));
    }

    #[tokio::test]
    async fn mock_returns_queued_responses_in_order() {
        let client = MockModelClient::new();
        client.push_text(Ok("first".into()));
        client.push_text(Ok("second".into()));
        assert_eq!(client.generate_text("x").await.unwrap(), "first");
        assert_eq!(client.generate_text("x").await.unwrap(), "second");
        assert!(client.generate_text("x").await.unwrap().contains("mock response"));
    }

    #[tokio::test]
    async fn mock_default_image_analysis_has_no_issues() {
        let client = MockModelClient::new();
        let result = client.analyze_image(&[], "check slide").await.unwrap();
        assert_eq!(result["has_issues"], false);
    }
}

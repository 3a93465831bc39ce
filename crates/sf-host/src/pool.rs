// SPDX-License-Identifier: MIT OR Apache-2.0
//! The Model Client Pool: registers one [`ModelClient`] per [`ModelKind`],
//! throttles calls to a minimum inter-request interval per kind, and
//! retries transient failures with exponential backoff.

use crate::client::{ModelClient, ModelError, ModelKind};
use crate::retry::{RetryConfig, retry_async};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Minimum spacing enforced between consecutive calls of the same
/// [`ModelKind`], independent of which caller issues them.
#[derive(Debug, Clone)]
pub struct RateGateConfig {
    pub min_interval: Duration,
}

impl Default for RateGateConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(250),
        }
    }
}

struct Entry {
    client: Arc<dyn ModelClient>,
    last_call: Mutex<Instant>,
}

/// Registers model clients by kind and mediates every call through a
/// rate gate and retry policy.
pub struct ModelClientPool {
    entries: Mutex<HashMap<ModelKind, Arc<Entry>>>,
    rate_gate: RateGateConfig,
    retry: RetryConfig,
}

impl ModelClientPool {
    pub fn new(rate_gate: RateGateConfig, retry: RetryConfig) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            rate_gate,
            retry,
        }
    }

    /// Register or replace the client used for `kind`.
    pub async fn register(&self, kind: ModelKind, client: Arc<dyn ModelClient>) {
        let mut entries = self.entries.lock().await;
        entries.insert(
            kind,
            Arc::new(Entry {
                client,
                last_call: Mutex::new(Instant::now() - self.rate_gate.min_interval),
            }),
        );
    }

    /// Drop the client registered for `kind`, if any. In-flight `Arc`
    /// clones already handed to callers are not cancelled — only the
    /// pool's own reference is released.
    pub async fn invalidate(&self, kind: ModelKind) {
        self.entries.lock().await.remove(&kind);
    }

    async fn entry(&self, kind: ModelKind) -> Result<Arc<Entry>, ModelError> {
        self.entries
            .lock()
            .await
            .get(&kind)
            .cloned()
            .ok_or_else(|| ModelError::Permanent(format!("no client registered for {kind:?}")))
    }

    async fn gate(&self, entry: &Entry) {
        let mut last = entry.last_call.lock().await;
        let elapsed = last.elapsed();
        if elapsed < self.rate_gate.min_interval {
            tokio::time::sleep(self.rate_gate.min_interval - elapsed).await;
        }
        *last = Instant::now();
    }

    pub async fn generate_text(&self, prompt: &str) -> Result<String, ModelError> {
        let entry = self.entry(ModelKind::Text).await?;
        self.gate(&entry).await;
        retry_async(&self.retry, || entry.client.generate_text(prompt))
            .await
            .map(|o| o.value)
    }

    pub async fn generate_embedding(&self, text: &str) -> Result<Vec<f32>, ModelError> {
        let entry = self.entry(ModelKind::Embedding).await?;
        self.gate(&entry).await;
        retry_async(&self.retry, || entry.client.generate_embedding(text))
            .await
            .map(|o| o.value)
    }

    pub async fn analyze_image(&self, bytes: &[u8], prompt: &str) -> Result<Value, ModelError> {
        let entry = self.entry(ModelKind::Vision).await?;
        self.gate(&entry).await;
        retry_async(&self.retry, || entry.client.analyze_image(bytes, prompt))
            .await
            .map(|o| o.value)
    }

    pub async fn analyze_images(
        &self,
        images: &[(Vec<u8>, String)],
    ) -> Result<Vec<Value>, ModelError> {
        let entry = self.entry(ModelKind::Vision).await?;
        self.gate(&entry).await;
        retry_async(&self.retry, || entry.client.analyze_images(images))
            .await
            .map(|o| o.value)
    }

    /// Route a prompt to the slower `deep_thinking` kind, reusing the
    /// same `generate_text` contract as the `text` kind under a
    /// separate rate gate and client registration.
    pub async fn generate_deep_thinking(&self, prompt: &str) -> Result<String, ModelError> {
        let entry = self.entry(ModelKind::DeepThinking).await?;
        self.gate(&entry).await;
        retry_async(&self.retry, || entry.client.generate_text(prompt))
            .await
            .map(|o| o.value)
    }
}

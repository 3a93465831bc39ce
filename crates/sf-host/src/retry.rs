// SPDX-License-Identifier: MIT OR Apache-2.0
//! Exponential backoff with jitter for model client retries.

use crate::client::ModelError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, warn};

/// Configuration for retry behavior when calling a model client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the initial attempt.
    pub max_retries: u32,
    #[serde(with = "duration_millis")]
    pub base_delay: Duration,
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,
    #[serde(with = "duration_millis")]
    pub overall_timeout: Duration,
    /// Jitter factor in `[0.0, 1.0]`. 0 = no jitter, 1 = full jitter.
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            overall_timeout: Duration::from_secs(60),
            jitter_factor: 0.5,
        }
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(val: &Duration, ser: S) -> Result<S::Ok, S::Error> {
        val.as_millis().serialize(ser)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        let ms: u64 = u64::deserialize(de)?;
        Ok(Duration::from_millis(ms))
    }
}

/// Record of a single failed attempt.
#[derive(Debug, Clone)]
pub struct RetryAttempt {
    pub attempt: u32,
    pub error: String,
    pub delay: Duration,
}

/// Metadata captured across all retry attempts.
#[derive(Debug, Clone, Default)]
pub struct RetryMetadata {
    pub total_attempts: u32,
    pub failed_attempts: Vec<RetryAttempt>,
    pub total_duration: Duration,
}

/// Result of a retry-enabled operation.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub value: T,
    pub metadata: RetryMetadata,
}

/// Compute the backoff delay for a given zero-indexed attempt number.
pub fn compute_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exp = 2u64.saturating_pow(attempt);
    let delay_ms = (config.base_delay.as_millis() as u64).saturating_mul(exp);
    let capped_ms = delay_ms.min(config.max_delay.as_millis() as u64);

    let jitter_factor = config.jitter_factor.clamp(0.0, 1.0);
    if jitter_factor > 0.0 && capped_ms > 0 {
        let jitter_range = (capped_ms as f64 * jitter_factor) as u64;
        let nanos = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos() as u64;
        let pseudo = nanos.wrapping_mul(attempt as u64 + 1);
        let jitter = if jitter_range > 0 {
            pseudo % jitter_range
        } else {
            0
        };
        Duration::from_millis(capped_ms.saturating_sub(jitter))
    } else {
        Duration::from_millis(capped_ms)
    }
}

/// Returns `true` if the error is eligible for retry. Permanent (request
/// validity) errors are not — retrying a malformed request just wastes
/// the budget on a guaranteed second failure.
pub fn is_retryable(err: &ModelError) -> bool {
    matches!(err, ModelError::Transient(_))
}

/// Generic retry loop, bounded both by attempt count and by overall
/// wall-clock time.
pub async fn retry_async<T, F, Fut>(
    config: &RetryConfig,
    mut op: F,
) -> Result<RetryOutcome<T>, ModelError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ModelError>>,
{
    let start = Instant::now();
    let max_attempts = config.max_retries + 1;
    let mut failed_attempts = Vec::new();

    for attempt in 0..max_attempts {
        if start.elapsed() >= config.overall_timeout {
            warn!(target: "sf.host", attempt, "overall timeout exceeded");
            return Err(ModelError::Transient("overall retry timeout exceeded".into()));
        }

        debug!(target: "sf.host", attempt, max_attempts, "attempting model call");

        match op().await {
            Ok(value) => {
                let total_duration = start.elapsed();
                return Ok(RetryOutcome {
                    value,
                    metadata: RetryMetadata {
                        total_attempts: attempt + 1,
                        failed_attempts,
                        total_duration,
                    },
                });
            }
            Err(err) => {
                let is_last = attempt + 1 >= max_attempts;

                if !is_retryable(&err) {
                    debug!(target: "sf.host", error = %err, "non-retryable error, giving up");
                    return Err(err);
                }

                if is_last {
                    warn!(target: "sf.host", error = %err, attempt, "max retries exhausted");
                    return Err(err);
                }

                let delay = compute_delay(config, attempt);
                warn!(target: "sf.host", error = %err, attempt, delay_ms = delay.as_millis() as u64, "retrying after backoff");

                failed_attempts.push(RetryAttempt {
                    attempt,
                    error: err.to_string(),
                    delay,
                });

                let remaining = config.overall_timeout.saturating_sub(start.elapsed());
                if delay > remaining {
                    return Err(ModelError::Transient("overall retry timeout exceeded".into()));
                }

                tokio::time::sleep(delay).await;
            }
        }
    }

    Err(ModelError::Transient("overall retry timeout exceeded".into()))
}

// SPDX-License-Identifier: MIT OR Apache-2.0
//! Configuration loading, validation, and merging for SlideForge.
//!
//! Provides [`SlideForgeConfig`] — the top-level runtime settings — plus
//! helpers for loading from TOML, applying environment overrides, merging
//! overlays, and producing advisory [`ConfigWarning`]s.
#![deny(unsafe_code)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    #[error("failed to parse config: {reason}")]
    ParseError { reason: String },

    #[error("config validation failed: {reasons:?}")]
    ValidationError { reasons: Vec<String> },
}

/// Advisory-level issues that do not prevent operation but deserve attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    DeprecatedField {
        field: String,
        suggestion: Option<String>,
    },
    MissingOptionalField {
        field: String,
        hint: String,
    },
    LargeTimeout {
        model_kind: String,
        secs: u64,
    },
    ZeroConcurrency {
        section: String,
    },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::DeprecatedField { field, suggestion } => {
                write!(f, "deprecated field '{field}'")?;
                if let Some(s) = suggestion {
                    write!(f, " — use '{s}' instead")?;
                }
                Ok(())
            }
            ConfigWarning::MissingOptionalField { field, hint } => {
                write!(f, "missing optional field '{field}': {hint}")
            }
            ConfigWarning::LargeTimeout { model_kind, secs } => {
                write!(f, "model kind '{model_kind}' has a large timeout ({secs}s)")
            }
            ConfigWarning::ZeroConcurrency { section } => {
                write!(f, "section '{section}' has zero concurrency configured")
            }
        }
    }
}

/// Top-level runtime configuration for the SlideForge daemon.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct SlideForgeConfig {
    /// Address the HTTP/WebSocket server binds to.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Log level override (e.g. `"debug"`, `"info"`, `"warn"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Directory where job records are persisted.
    #[serde(default = "default_job_root")]
    pub job_root: String,

    /// Directory where cached stage artifacts are persisted.
    #[serde(default = "default_cache_root")]
    pub cache_root: String,

    /// Redis connection URL backing the durable status snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis_url: Option<String>,

    /// Job Scheduler tuning, per job kind.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Validation Loop tuning.
    #[serde(default)]
    pub validation: ValidationConfig,

    /// Named model client definitions, keyed by model kind.
    #[serde(default)]
    pub model_clients: BTreeMap<String, ModelClientEntry>,
}

impl Default for SlideForgeConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            log_level: Some("info".into()),
            job_root: default_job_root(),
            cache_root: default_cache_root(),
            redis_url: None,
            scheduler: SchedulerConfig::default(),
            validation: ValidationConfig::default(),
            model_clients: BTreeMap::new(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8080".into()
}

fn default_job_root() -> String {
    "./data/jobs".into()
}

fn default_cache_root() -> String {
    "./data/cache".into()
}

/// Per-kind worker and rate tuning for the Job Scheduler.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct SchedulerConfig {
    /// Queue capacity before `enqueue` starts rejecting new jobs.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Maximum concurrent jobs in flight, across both kinds.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
        }
    }
}

fn default_queue_capacity() -> usize {
    256
}

fn default_max_concurrent_jobs() -> usize {
    4
}

/// Validation Loop tuning.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ValidationConfig {
    /// Maximum outer iterations before the loop gives up and accepts the
    /// current state.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Maximum concurrent per-slide analysis tasks within one iteration.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_workers: default_max_workers(),
        }
    }
}

fn default_max_iterations() -> u32 {
    3
}

fn default_max_workers() -> usize {
    4
}

/// Configuration for a single named model client.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ModelClientEntry {
    /// An in-process mock client, used for tests and demos.
    #[serde(rename = "mock")]
    Mock {},
    /// A client backed by a real provider reachable at `endpoint`.
    #[serde(rename = "provider")]
    Provider {
        endpoint: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_secs: Option<u64>,
    },
}

const MAX_TIMEOUT_SECS: u64 = 86_400;
const LARGE_TIMEOUT_THRESHOLD: u64 = 3_600;
const VALID_LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];

/// Load a [`SlideForgeConfig`] from an optional TOML file path, applying
/// environment overrides on top either way.
pub fn load_config(path: Option<&Path>) -> Result<SlideForgeConfig, ConfigError> {
    let mut config = match path {
        Some(p) => {
            let content = std::fs::read_to_string(p).map_err(|_| ConfigError::FileNotFound {
                path: p.display().to_string(),
            })?;
            parse_toml(&content)?
        }
        None => SlideForgeConfig::default(),
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Parse a TOML string into a [`SlideForgeConfig`].
pub fn parse_toml(content: &str) -> Result<SlideForgeConfig, ConfigError> {
    toml::from_str::<SlideForgeConfig>(content).map_err(|e| ConfigError::ParseError {
        reason: e.to_string(),
    })
}

/// The file name a job root is checked for when resolving live model
/// client configuration.
const MODEL_CONFIGS_FILE: &str = "model_configs.json";

/// Load `ActiveConfig` rows from `{root}/model_configs.json`, the
/// sidecar file a deployment edits to add or change model clients
/// without restarting the daemon. A missing file is not an error — it
/// means no clients are configured yet, not that the job root is wrong.
/// Entries returned here take precedence over any `model_clients`
/// loaded from the static TOML file (see [`merge_configs`] semantics).
pub fn load_model_configs_sidecar(
    root: &Path,
) -> Result<BTreeMap<String, ModelClientEntry>, ConfigError> {
    let path = root.join(MODEL_CONFIGS_FILE);
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(_) => return Ok(BTreeMap::new()),
    };
    serde_json::from_str(&content).map_err(|e| ConfigError::ParseError {
        reason: format!("{}: {e}", path.display()),
    })
}

/// Apply environment variable overrides.
///
/// Recognised variables: `SLIDEFORGE_BIND`, `SLIDEFORGE_LOG_LEVEL`,
/// `SLIDEFORGE_JOB_ROOT`, `SLIDEFORGE_REDIS_URL`.
pub fn apply_env_overrides(config: &mut SlideForgeConfig) {
    if let Ok(val) = std::env::var("SLIDEFORGE_BIND") {
        config.bind = val;
    }
    if let Ok(val) = std::env::var("SLIDEFORGE_LOG_LEVEL") {
        config.log_level = Some(val);
    }
    if let Ok(val) = std::env::var("SLIDEFORGE_JOB_ROOT") {
        config.job_root = val;
    }
    if let Ok(val) = std::env::var("SLIDEFORGE_REDIS_URL") {
        config.redis_url = Some(val);
    }
}

/// Validate a parsed configuration, returning advisory warnings.
///
/// Hard errors (invalid log level, zero concurrency, out-of-range
/// timeouts) are returned as a [`ConfigError::ValidationError`]; soft
/// issues come back as warnings.
pub fn validate_config(config: &SlideForgeConfig) -> Result<Vec<ConfigWarning>, ConfigError> {
    let mut errors: Vec<String> = Vec::new();
    let mut warnings: Vec<ConfigWarning> = Vec::new();

    if let Some(ref level) = config.log_level
        && !VALID_LOG_LEVELS.contains(&level.as_str())
    {
        errors.push(format!("invalid log_level '{level}'"));
    }

    if config.scheduler.max_concurrent_jobs == 0 {
        warnings.push(ConfigWarning::ZeroConcurrency {
            section: "scheduler".into(),
        });
    }
    if config.validation.max_workers == 0 {
        warnings.push(ConfigWarning::ZeroConcurrency {
            section: "validation".into(),
        });
    }
    if config.validation.max_iterations == 0 {
        errors.push("validation.max_iterations must be at least 1".into());
    }

    for (name, entry) in &config.model_clients {
        if let ModelClientEntry::Provider {
            endpoint,
            timeout_secs,
        } = entry
        {
            if endpoint.trim().is_empty() {
                errors.push(format!("model client '{name}': endpoint must not be empty"));
            }
            if let Some(t) = timeout_secs {
                if *t == 0 || *t > MAX_TIMEOUT_SECS {
                    errors.push(format!(
                        "model client '{name}': timeout {t}s out of range (1..{MAX_TIMEOUT_SECS})"
                    ));
                } else if *t > LARGE_TIMEOUT_THRESHOLD {
                    warnings.push(ConfigWarning::LargeTimeout {
                        model_kind: name.clone(),
                        secs: *t,
                    });
                }
            }
        }
    }

    if config.redis_url.is_none() {
        warnings.push(ConfigWarning::MissingOptionalField {
            field: "redis_url".into(),
            hint: "status snapshots will only be visible within this process".into(),
        });
    }

    if errors.is_empty() {
        Ok(warnings)
    } else {
        Err(ConfigError::ValidationError { reasons: errors })
    }
}

/// Merge two configurations. Values in `overlay` take precedence over
/// `base`; model client maps are combined with overlay entries winning on
/// name collisions.
pub fn merge_configs(base: SlideForgeConfig, overlay: SlideForgeConfig) -> SlideForgeConfig {
    let mut model_clients = base.model_clients;
    model_clients.extend(overlay.model_clients);
    SlideForgeConfig {
        bind: overlay.bind,
        log_level: overlay.log_level.or(base.log_level),
        job_root: overlay.job_root,
        cache_root: overlay.cache_root,
        redis_url: overlay.redis_url.or(base.redis_url),
        scheduler: overlay.scheduler,
        validation: overlay.validation,
        model_clients,
    }
}

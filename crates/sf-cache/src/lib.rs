// SPDX-License-Identifier: MIT OR Apache-2.0
//! The Artifact Cache: a content-addressed store of stage outputs, keyed
//! by a canonical fingerprint of the stage's inputs so a re-run with
//! identical inputs can skip straight to the cached result.
#![deny(unsafe_code)]

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::PathBuf;

/// A stable, canonical fingerprint over a stage name and its input
/// payload. Canonicalization means: serialize to `serde_json::Value`
/// first (so field order in the source struct can't perturb the hash),
/// then recursively sort object keys, then hash the resulting bytes.
/// Two logically identical inputs produced in different field orders
/// always yield the same fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn compute(stage_name: &str, input: &impl Serialize) -> Result<Self, CacheError> {
        let value = serde_json::to_value(input).map_err(CacheError::Serde)?;
        let canonical = canonicalize(&value);
        let mut hasher = Sha256::new();
        hasher.update(stage_name.as_bytes());
        hasher.update(b"\0");
        hasher.update(canonical.as_bytes());
        let digest = hasher.finalize();
        Ok(Self(format!("{digest:x}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Recursively re-serialize a [`Value`] with object keys in sorted order.
/// `serde_json::Value`'s `Map` is already a `BTreeMap` under the default
/// feature set, so `to_string` on a re-built value is already
/// key-ordered; this function exists to make that guarantee explicit and
/// independent of `serde_json`'s default map implementation.
fn canonicalize(value: &Value) -> String {
    fn sort(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut sorted = serde_json::Map::new();
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                for key in keys {
                    sorted.insert(key.clone(), sort(&map[key]));
                }
                Value::Object(sorted)
            }
            Value::Array(items) => Value::Array(items.iter().map(sort).collect()),
            other => other.clone(),
        }
    }
    sort(value).to_string()
}

#[derive(Debug)]
pub enum CacheError {
    Io(std::io::Error),
    Serde(serde_json::Error),
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::Serde(e) => write!(f, "serde error: {e}"),
        }
    }
}

impl std::error::Error for CacheError {}

/// Content-addressed cache of stage output artifacts.
pub struct ArtifactCache {
    root: PathBuf,
}

impl ArtifactCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(format!("{}.json", key.as_str()))
    }

    /// Fetch a cached artifact, deserializing it as `T`. Returns `Ok(None)`
    /// on a cache miss, never an error — a miss is expected, routine
    /// behavior, not a failure.
    pub async fn get<T>(&self, key: &CacheKey) -> Result<Option<T>, CacheError>
    where
        T: serde::de::DeserializeOwned,
    {
        let path = self.entry_path(key);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let value = serde_json::from_str(&content).map_err(CacheError::Serde)?;
                Ok(Some(value))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::Io(e)),
        }
    }

    /// Store an artifact under `key`, overwriting any prior entry.
    pub async fn put<T>(&self, key: &CacheKey, value: &T) -> Result<(), CacheError>
    where
        T: Serialize,
    {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(CacheError::Io)?;
        let path = self.entry_path(key);
        let tmp_path = path.with_extension("json.tmp");
        let json = serde_json::to_string(value).map_err(CacheError::Serde)?;
        tokio::fs::write(&tmp_path, json)
            .await
            .map_err(CacheError::Io)?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(CacheError::Io)?;
        Ok(())
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0
//! The Job Store: durable, file-per-job persistence with an in-memory
//! index and transition-checked updates.
//!
//! One JSON file per job lives at `{root}/{job_id}.json`. Writes go to a
//! `.tmp` sibling and are renamed into place so a crash mid-write never
//! leaves a half-written job record behind.
#![deny(unsafe_code)]

use sf_core::{Job, JobStatus};
use sf_error::{ErrorCode, SfError};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Errors returned by [`JobStore`] operations.
#[derive(Debug)]
pub enum StoreError {
    NotFound(Uuid),
    IllegalTransition {
        job_id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },
    Io(std::io::Error),
    Serde(serde_json::Error),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "job {id} not found"),
            Self::IllegalTransition { job_id, from, to } => {
                write!(f, "job {job_id}: illegal transition {from:?} -> {to:?}")
            }
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::Serde(e) => write!(f, "serde error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<&StoreError> for SfError {
    fn from(err: &StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => {
                SfError::new(ErrorCode::InputNotFound, format!("job {id} not found"))
            }
            StoreError::IllegalTransition { job_id, from, to } => SfError::new(
                ErrorCode::StoreIllegalTransition,
                format!("job {job_id}: illegal transition {from:?} -> {to:?}"),
            ),
            StoreError::Io(e) => SfError::new(ErrorCode::StoreIoFailed, e.to_string()),
            StoreError::Serde(e) => SfError::new(ErrorCode::StoreIoFailed, e.to_string()),
        }
    }
}

/// Optional filter applied to [`JobStore::list`].
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub kind: Option<sf_core::JobKind>,
    pub status: Option<JobStatus>,
}

/// File-based job store with an in-memory read index.
pub struct JobStore {
    root: PathBuf,
    index: RwLock<HashMap<Uuid, Job>>,
}

impl JobStore {
    /// Construct a store rooted at `root`, loading any existing job files
    /// into the in-memory index.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(StoreError::Io)?;
        let mut index = HashMap::new();
        let mut entries = tokio::fs::read_dir(&root).await.map_err(StoreError::Io)?;
        while let Some(entry) = entries.next_entry().await.map_err(StoreError::Io)? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = tokio::fs::read_to_string(&path)
                .await
                .map_err(StoreError::Io)?;
            let job: Job = serde_json::from_str(&content).map_err(StoreError::Serde)?;
            index.insert(job.id, job);
        }
        Ok(Self {
            root,
            index: RwLock::new(index),
        })
    }

    /// Wrap this store in an `Arc`, the handle type every other component
    /// holds.
    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    fn job_path(&self, id: Uuid) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }

    /// Insert a brand-new job.
    pub async fn create(&self, job: Job) -> Result<(), StoreError> {
        self.persist(&job).await?;
        self.index.write().await.insert(job.id, job);
        Ok(())
    }

    /// Fetch a job by id.
    pub async fn get(&self, id: Uuid) -> Result<Job, StoreError> {
        self.index
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    /// List jobs matching `filter`.
    pub async fn list(&self, filter: &JobFilter) -> Vec<Job> {
        self.index
            .read()
            .await
            .values()
            .filter(|j| filter.kind.is_none_or(|k| k == j.kind))
            .filter(|j| filter.status.is_none_or(|s| s == j.status))
            .cloned()
            .collect()
    }

    /// Jobs associated with a given template file stem — used by a
    /// `generate` job's Analyze stage to find a prior completed
    /// `analyze_template` job's cached artifact.
    pub async fn jobs_for_template(&self, stem: &str) -> Vec<Job> {
        self.index
            .read()
            .await
            .values()
            .filter(|j| j.template_stem.as_deref() == Some(stem))
            .cloned()
            .collect()
    }

    /// Apply `patch` to the job identified by `id`, enforcing the status
    /// transition graph before the result is committed to disk and index.
    ///
    /// `patch` may leave `status` unchanged (a progress-only update) or
    /// move it to any status in [`JobStatus::valid_transitions`].
    pub async fn update<F>(&self, id: Uuid, patch: F) -> Result<Job, StoreError>
    where
        F: FnOnce(&mut Job),
    {
        let mut index = self.index.write().await;
        let job = index.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        let before_status = job.status;
        patch(job);
        if job.status != before_status && !before_status.can_transition_to(job.status) {
            let attempted = job.status;
            job.status = before_status;
            return Err(StoreError::IllegalTransition {
                job_id: id,
                from: before_status,
                to: attempted,
            });
        }
        let snapshot = job.clone();
        drop(index);
        self.persist(&snapshot).await?;
        Ok(snapshot)
    }

    async fn persist(&self, job: &Job) -> Result<(), StoreError> {
        let path = self.job_path(job.id);
        let tmp_path = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(job).map_err(StoreError::Serde)?;
        tokio::fs::write(&tmp_path, json)
            .await
            .map_err(StoreError::Io)?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(StoreError::Io)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sf_core::JobKind;

    async fn open_tmp() -> (tempfile::TempDir, JobStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::open(dir.path()).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn create_and_get_roundtrips() {
        let (_dir, store) = open_tmp().await;
        let job = Job::new(JobKind::Generate, serde_json::json!({}), None);
        let id = job.id;
        store.create(job).await.unwrap();
        let fetched = store.get(id).await.unwrap();
        assert_eq!(fetched.id, id);
        assert_eq!(fetched.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn update_enforces_legal_transitions() {
        let (_dir, store) = open_tmp().await;
        let job = Job::new(JobKind::Generate, serde_json::json!({}), None);
        let id = job.id;
        store.create(job).await.unwrap();

        let updated = store
            .update(id, |j| j.status = JobStatus::Processing)
            .await
            .unwrap();
        assert_eq!(updated.status, JobStatus::Processing);
    }

    #[tokio::test]
    async fn update_rejects_illegal_transition_and_leaves_status_unchanged() {
        let (_dir, store) = open_tmp().await;
        let job = Job::new(JobKind::Generate, serde_json::json!({}), None);
        let id = job.id;
        store.create(job).await.unwrap();

        let err = store
            .update(id, |j| j.status = JobStatus::Completed)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::IllegalTransition { .. }));

        let job = store.get(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn reopening_store_rehydrates_index_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let job = Job::new(JobKind::AnalyzeTemplate, serde_json::json!({}), None);
        let id = job.id;
        {
            let store = JobStore::open(dir.path()).await.unwrap();
            store.create(job).await.unwrap();
        }
        let reopened = JobStore::open(dir.path()).await.unwrap();
        let fetched = reopened.get(id).await.unwrap();
        assert_eq!(fetched.id, id);
    }

    #[tokio::test]
    async fn jobs_for_template_filters_by_stem() {
        let (_dir, store) = open_tmp().await;
        let a = Job::new(
            JobKind::Generate,
            serde_json::json!({}),
            Some("deck-a".into()),
        );
        let b = Job::new(
            JobKind::AnalyzeTemplate,
            serde_json::json!({}),
            Some("deck-a".into()),
        );
        let c = Job::new(JobKind::Generate, serde_json::json!({}), Some("deck-b".into()));
        store.create(a).await.unwrap();
        store.create(b).await.unwrap();
        store.create(c).await.unwrap();

        let matches = store.jobs_for_template("deck-a").await;
        assert_eq!(matches.len(), 2);
    }

    #[tokio::test]
    async fn list_filters_by_kind_and_status() {
        let (_dir, store) = open_tmp().await;
        let gen_job = Job::new(JobKind::Generate, serde_json::json!({}), None);
        let analyze_job = Job::new(JobKind::AnalyzeTemplate, serde_json::json!({}), None);
        store.create(gen_job).await.unwrap();
        store.create(analyze_job).await.unwrap();

        let gens = store
            .list(&JobFilter {
                kind: Some(JobKind::Generate),
                status: None,
            })
            .await;
        assert_eq!(gens.len(), 1);
        assert_eq!(gens[0].kind, JobKind::Generate);
    }

    #[tokio::test]
    async fn get_missing_job_returns_not_found() {
        let (_dir, store) = open_tmp().await;
        let err = store.get(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use sf_core::JobKind;

    fn fast_config() -> ProptestConfig {
        ProptestConfig {
            cases: 32,
            ..ProptestConfig::default()
        }
    }

    fn arb_status() -> impl Strategy<Value = JobStatus> {
        prop_oneof![
            Just(JobStatus::Pending),
            Just(JobStatus::Processing),
            Just(JobStatus::Completed),
            Just(JobStatus::Failed),
            Just(JobStatus::Cancelled),
        ]
    }

    proptest! {
        #![proptest_config(fast_config())]

        /// For any attempted status transition, the store's outcome always
        /// agrees with `JobStatus::can_transition_to`: legal transitions
        /// commit, illegal ones leave the stored status untouched.
        #[test]
        fn update_outcome_matches_transition_table(target in arb_status()) {
            let runtime = tokio::runtime::Runtime::new().unwrap();
            runtime.block_on(async {
                let dir = tempfile::tempdir().unwrap();
                let store = JobStore::open(dir.path()).await.unwrap();
                let job = Job::new(JobKind::Generate, serde_json::json!({}), None);
                let id = job.id;
                let original_status = job.status;
                store.create(job).await.unwrap();

                let legal = original_status.can_transition_to(target);
                let result = store.update(id, |j| j.status = target).await;

                if legal {
                    assert_eq!(result.unwrap().status, target);
                } else {
                    assert!(matches!(result, Err(StoreError::IllegalTransition { .. })));
                    let persisted = store.get(id).await.unwrap();
                    assert_eq!(persisted.status, original_status);
                }
            });
        }
    }
}

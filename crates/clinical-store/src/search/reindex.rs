//! Resumable bulk re-index.
//!
//! Rebuilds the derived search rows (index values, references and
//! compartment memberships) of every stored resource, one page at a time.
//! Each resource is re-indexed in its own transaction by the storage, so an
//! interrupted job leaves every resource either fully old or fully new.
//!
//! Progress is a plain serializable value. It records the ordered resource
//! types, the index of the type being processed and an opaque keyset cursor
//! within it, so a job can be persisted and later continued with
//! [`ReindexOperation::resume`] without processing any resource twice.
//!
//! ```ignore
//! let reindex = ReindexOperation::new(backend.clone());
//! let job_id = reindex.start(ReindexRequest::all()).await?;
//! let progress = reindex.run(&job_id).await?;
//! assert_eq!(progress.status, ReindexStatus::Completed);
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StorageResult;
use crate::types::{PageCursor, StoredResource};

use super::errors::ReindexError;
use super::references::ReferenceLookup;

/// Request to start a reindex operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReindexRequest {
    /// Target resource types (None = every stored type).
    pub resource_types: Option<Vec<String>>,

    /// Batch size for processing resources.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

fn default_batch_size() -> u32 {
    100
}

impl Default for ReindexRequest {
    fn default() -> Self {
        Self {
            resource_types: None,
            batch_size: default_batch_size(),
        }
    }
}

impl ReindexRequest {
    /// Creates a new reindex request for all resources.
    pub fn all() -> Self {
        Self::default()
    }

    /// Creates a reindex request for specific resource types.
    pub fn for_types<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            resource_types: Some(types.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// Sets the batch size.
    pub fn with_batch_size(mut self, size: u32) -> Self {
        self.batch_size = size;
        self
    }
}

/// Status of a reindex operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReindexStatus {
    /// Reindex is queued but not started.
    Queued,
    /// Reindex is currently running.
    InProgress,
    /// Reindex completed successfully.
    Completed,
    /// Reindex failed with an error.
    Failed,
    /// Reindex was cancelled.
    Cancelled,
}

impl ReindexStatus {
    /// Returns true if the job is still running.
    pub fn is_running(&self) -> bool {
        matches!(self, ReindexStatus::Queued | ReindexStatus::InProgress)
    }

    /// Returns true if the job has finished (success, failure, or cancelled).
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            ReindexStatus::Completed | ReindexStatus::Failed | ReindexStatus::Cancelled
        )
    }
}

/// Progress information for a reindex job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReindexProgress {
    /// Unique job identifier.
    pub job_id: String,

    /// Current status.
    pub status: ReindexStatus,

    /// Resource types in processing order.
    pub resource_types: Vec<String>,

    /// Index into `resource_types` of the type being processed.
    pub current_type_index: usize,

    /// Encoded keyset cursor within the current type; `None` at its start.
    pub cursor: Option<String>,

    /// Batch size used for each step.
    pub batch_size: u32,

    /// Total number of resources to process, counted at start.
    pub total_resources: u64,

    /// Number of resources processed so far.
    pub processed_resources: u64,

    /// Number of index entries created.
    pub entries_created: u64,

    /// Resources left under-indexed by this job.
    pub under_indexed_resources: u64,

    /// Errors encountered during processing.
    pub errors: Vec<ReindexProgressError>,

    /// When the job was started.
    pub started_at: Option<String>,

    /// When progress last changed.
    pub updated_at: Option<String>,

    /// When the job completed.
    pub completed_at: Option<String>,

    /// Error message if status is Failed.
    pub error_message: Option<String>,
}

/// An error encountered during reindexing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReindexProgressError {
    /// Resource type.
    pub resource_type: String,
    /// Resource ID.
    pub resource_id: String,
    /// Error message.
    pub error: String,
}

impl ReindexProgress {
    /// Creates a new progress tracker for a job.
    pub fn new(job_id: impl Into<String>, resource_types: Vec<String>, batch_size: u32) -> Self {
        Self {
            job_id: job_id.into(),
            status: ReindexStatus::Queued,
            resource_types,
            current_type_index: 0,
            cursor: None,
            batch_size: batch_size.max(1),
            total_resources: 0,
            processed_resources: 0,
            entries_created: 0,
            under_indexed_resources: 0,
            errors: Vec::new(),
            started_at: None,
            updated_at: None,
            completed_at: None,
            error_message: None,
        }
    }

    /// The type being processed, if any remain.
    pub fn current_resource_type(&self) -> Option<&str> {
        self.resource_types
            .get(self.current_type_index)
            .map(String::as_str)
    }

    /// Returns the progress percentage (0-100).
    pub fn percentage(&self) -> f64 {
        if self.total_resources == 0 {
            0.0
        } else {
            (self.processed_resources as f64 / self.total_resources as f64) * 100.0
        }
    }

    /// Returns true if any errors occurred.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty() || self.error_message.is_some()
    }

    fn touch(&mut self) {
        self.updated_at = Some(chrono::Utc::now().to_rfc3339());
    }

    fn finish(&mut self, status: ReindexStatus) {
        self.status = status;
        self.touch();
        self.completed_at = self.updated_at.clone();
    }

    fn validate(&self) -> Result<(), ReindexError> {
        if self.current_type_index > self.resource_types.len() {
            return Err(ReindexError::InvalidProgress {
                message: format!(
                    "type index {} is past the {} listed types",
                    self.current_type_index,
                    self.resource_types.len()
                ),
            });
        }
        if let Some(cursor) = &self.cursor {
            PageCursor::decode(cursor).map_err(|e| ReindexError::InvalidProgress {
                message: e.to_string(),
            })?;
        }
        Ok(())
    }
}

/// One keyset page of live resources.
#[derive(Debug, Clone, Default)]
pub struct ResourcePage {
    /// The resources, in keyset order.
    pub resources: Vec<StoredResource>,
    /// Cursor after the last resource; `None` when the type is exhausted.
    pub next_cursor: Option<PageCursor>,
}

/// What re-indexing one resource produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReindexOutcome {
    /// Search rows written.
    pub entries: u64,
    /// True if at least one value could not be indexed.
    pub under_indexed: bool,
}

/// Storage that can be re-indexed page by page.
#[async_trait]
pub trait ReindexableStorage: Send + Sync {
    /// Resource types that currently have live resources, sorted.
    async fn list_resource_types(&self) -> StorageResult<Vec<String>>;

    /// Number of live resources of a type.
    async fn count_resources(&self, resource_type: &str) -> StorageResult<u64>;

    /// Fetches live resources after `cursor` in keyset order.
    async fn fetch_resources_page(
        &self,
        resource_type: &str,
        cursor: Option<&PageCursor>,
        limit: u32,
    ) -> StorageResult<ResourcePage>;

    /// Builds the logical-id lookup used for every resource of a job.
    async fn build_reference_lookup(&self) -> StorageResult<ReferenceLookup>;

    /// Replaces one resource's derived rows in a single transaction.
    async fn reindex_resource(
        &self,
        resource: &StoredResource,
        lookup: &ReferenceLookup,
    ) -> StorageResult<ReindexOutcome>;
}

/// Manages reindex jobs over one storage.
pub struct ReindexOperation<S: ReindexableStorage> {
    storage: Arc<S>,
    jobs: Arc<RwLock<HashMap<String, ReindexProgress>>>,
    lookups: RwLock<HashMap<String, Arc<ReferenceLookup>>>,
}

impl<S: ReindexableStorage> ReindexOperation<S> {
    /// Creates a new reindex operation manager.
    pub fn new(storage: Arc<S>) -> Self {
        Self {
            storage,
            jobs: Arc::new(RwLock::new(HashMap::new())),
            lookups: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a job. Nothing is processed until [`step`](Self::step) or
    /// [`run`](Self::run) is called.
    pub async fn start(&self, request: ReindexRequest) -> Result<String, ReindexError> {
        let resource_types = match request.resource_types {
            Some(types) => types,
            None => self.storage.list_resource_types().await?,
        };

        let mut total = 0;
        for resource_type in &resource_types {
            total += self.storage.count_resources(resource_type).await?;
        }

        let job_id = Uuid::new_v4().to_string();
        let mut progress = ReindexProgress::new(&job_id, resource_types, request.batch_size);
        progress.total_resources = total;
        progress.touch();

        tracing::info!(
            job_id = %job_id,
            types = ?progress.resource_types,
            total,
            "reindex job created"
        );
        self.jobs.write().insert(job_id.clone(), progress);
        Ok(job_id)
    }

    /// Continues a job from previously saved progress.
    ///
    /// The job keeps its id. Resources before the saved cursor are not
    /// processed again.
    pub async fn resume(&self, mut progress: ReindexProgress) -> Result<String, ReindexError> {
        progress.validate()?;
        if progress.status != ReindexStatus::Completed {
            progress.status = ReindexStatus::Queued;
            progress.completed_at = None;
            progress.error_message = None;
        }
        progress.touch();

        let job_id = progress.job_id.clone();
        tracing::info!(
            job_id = %job_id,
            processed = progress.processed_resources,
            "reindex job resumed"
        );
        self.jobs.write().insert(job_id.clone(), progress);
        Ok(job_id)
    }

    /// Processes one page of the job and returns its new status.
    pub async fn step(&self, job_id: &str) -> Result<ReindexStatus, ReindexError> {
        let mut progress = self.get_progress(job_id).await.ok_or_else(|| {
            ReindexError::JobNotFound {
                job_id: job_id.to_string(),
            }
        })?;
        if progress.status.is_finished() {
            return Ok(progress.status);
        }

        if progress.status == ReindexStatus::Queued {
            progress.status = ReindexStatus::InProgress;
            if progress.started_at.is_none() {
                progress.started_at = Some(chrono::Utc::now().to_rfc3339());
            }
        }

        if let Err(err) = self.process_page(&mut progress).await {
            progress.error_message = Some(err.to_string());
            progress.finish(ReindexStatus::Failed);
            tracing::warn!(job_id, error = %err, "reindex job failed");
            self.store(progress);
            self.lookups.write().remove(job_id);
            return Err(err);
        }

        if progress.current_type_index >= progress.resource_types.len() {
            progress.finish(ReindexStatus::Completed);
            self.lookups.write().remove(job_id);
            tracing::info!(
                job_id,
                processed = progress.processed_resources,
                entries = progress.entries_created,
                under_indexed = progress.under_indexed_resources,
                errors = progress.errors.len(),
                "reindex job completed"
            );
        }

        Ok(self.store(progress))
    }

    /// Steps the job until it finishes, yielding between pages.
    pub async fn run(&self, job_id: &str) -> Result<ReindexProgress, ReindexError> {
        loop {
            let status = self.step(job_id).await?;
            if status == ReindexStatus::Cancelled {
                return Err(ReindexError::Cancelled {
                    job_id: job_id.to_string(),
                });
            }
            if status.is_finished() {
                break;
            }
            tokio::task::yield_now().await;
        }

        self.get_progress(job_id)
            .await
            .ok_or_else(|| ReindexError::JobNotFound {
                job_id: job_id.to_string(),
            })
    }

    /// Gets the progress of a reindex job.
    pub async fn get_progress(&self, job_id: &str) -> Option<ReindexProgress> {
        self.jobs.read().get(job_id).cloned()
    }

    /// Cancels a running reindex job. The saved progress stays resumable.
    pub async fn cancel(&self, job_id: &str) -> Result<(), ReindexError> {
        let mut jobs = self.jobs.write();
        let progress = jobs.get_mut(job_id).ok_or_else(|| ReindexError::JobNotFound {
            job_id: job_id.to_string(),
        })?;

        if progress.status.is_running() {
            progress.finish(ReindexStatus::Cancelled);
            tracing::info!(job_id, "reindex job cancelled");
        }
        drop(jobs);
        self.lookups.write().remove(job_id);
        Ok(())
    }

    /// Lists all jobs (active and recent).
    pub fn list_jobs(&self) -> Vec<ReindexProgress> {
        self.jobs.read().values().cloned().collect()
    }

    /// Removes finished jobs that completed more than `max_age_seconds` ago.
    pub fn cleanup_old_jobs(&self, max_age_seconds: i64) {
        let cutoff = chrono::Utc::now() - chrono::Duration::seconds(max_age_seconds);

        self.jobs.write().retain(|_, progress| {
            let expired = progress.status.is_finished()
                && progress
                    .completed_at
                    .as_deref()
                    .and_then(|at| chrono::DateTime::parse_from_rfc3339(at).ok())
                    .is_some_and(|at| at.with_timezone(&chrono::Utc) < cutoff);
            !expired
        });
    }

    async fn lookup_for(&self, job_id: &str) -> Result<Arc<ReferenceLookup>, ReindexError> {
        let cached = self.lookups.read().get(job_id).cloned();
        if let Some(lookup) = cached {
            return Ok(lookup);
        }
        let lookup = Arc::new(self.storage.build_reference_lookup().await?);
        self.lookups
            .write()
            .insert(job_id.to_string(), lookup.clone());
        Ok(lookup)
    }

    async fn process_page(&self, progress: &mut ReindexProgress) -> Result<(), ReindexError> {
        let Some(resource_type) = progress.current_resource_type().map(str::to_string) else {
            return Ok(());
        };

        let cursor = progress
            .cursor
            .as_deref()
            .map(PageCursor::decode)
            .transpose()
            .map_err(|e| ReindexError::InvalidProgress {
                message: e.to_string(),
            })?;

        let lookup = self.lookup_for(&progress.job_id).await?;
        let page = self
            .storage
            .fetch_resources_page(&resource_type, cursor.as_ref(), progress.batch_size)
            .await?;

        for resource in &page.resources {
            match self.storage.reindex_resource(resource, &lookup).await {
                Ok(outcome) => {
                    progress.entries_created += outcome.entries;
                    if outcome.under_indexed {
                        progress.under_indexed_resources += 1;
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        resource_type = %resource_type,
                        id = %resource.id(),
                        error = %err,
                        "resource could not be reindexed"
                    );
                    progress.errors.push(ReindexProgressError {
                        resource_type: resource_type.clone(),
                        resource_id: resource.id().to_string(),
                        error: err.to_string(),
                    });
                }
            }
            progress.processed_resources += 1;
        }

        match page.next_cursor {
            Some(next) => progress.cursor = Some(next.encode()),
            None => {
                progress.cursor = None;
                progress.current_type_index += 1;
            }
        }
        progress.touch();

        tracing::debug!(
            job_id = %progress.job_id,
            resource_type = %resource_type,
            page = page.resources.len(),
            processed = progress.processed_resources,
            "reindex page processed"
        );
        Ok(())
    }

    /// Saves the step's progress. A cancellation that arrived while the page
    /// was processed keeps its status; the counters and cursor still advance.
    fn store(&self, mut progress: ReindexProgress) -> ReindexStatus {
        let mut jobs = self.jobs.write();
        if let Some(existing) = jobs.get(&progress.job_id) {
            if existing.status == ReindexStatus::Cancelled {
                progress.status = ReindexStatus::Cancelled;
                progress.completed_at = existing.completed_at.clone();
            }
        }
        let status = progress.status;
        jobs.insert(progress.job_id.clone(), progress);
        status
    }
}

impl<S: ReindexableStorage> std::fmt::Debug for ReindexOperation<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReindexOperation")
            .field("active_jobs", &self.jobs.read().len())
            .finish()
    }
}

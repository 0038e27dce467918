//! Ownership of materialised audio handles, keyed by job.
//!
//! Every handle stored here is released exactly once: explicitly through
//! [`ResourceHandleCache::release`], through [`ResourceHandleCache::release_all`]
//! at teardown, or when the cache is dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use article_audio_core::{AudioStream, JobError, JobId};

use crate::resource::{ResourceFactory, ResourceHandle};

/// Counts from a [`ResourceHandleCache::release_all`] sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReleaseReport {
    pub released: usize,
    pub failed: usize,
}

pub struct ResourceHandleCache {
    factory: Arc<dyn ResourceFactory>,
    entries: Mutex<HashMap<JobId, ResourceHandle>>,
}

impl ResourceHandleCache {
    pub fn new(factory: Arc<dyn ResourceFactory>) -> Self {
        Self {
            factory,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<JobId, ResourceHandle>> {
        self.entries.lock().unwrap_or_else(|poisoned| {
            tracing::error!("resource cache mutex poisoned; recovering");
            poisoned.into_inner()
        })
    }

    /// Create a handle for `audio` and store it under `job_id`.
    pub fn materialize(&self, job_id: &JobId, audio: &AudioStream) -> Result<ResourceHandle, JobError> {
        let handle = self.factory.create(job_id, audio)?;
        tracing::info!(job_id = %job_id, uri = handle.uri(), bytes = handle.len(), "audio handle materialised");
        self.set(job_id.clone(), handle.clone());
        Ok(handle)
    }

    /// Store `handle` for `job_id`.
    ///
    /// A previous handle for the *same* job is released. Handles of other
    /// jobs are never touched here; releasing them is the caller's call.
    pub fn set(&self, job_id: JobId, handle: ResourceHandle) {
        let previous = self.entries().insert(job_id.clone(), handle.clone());
        if let Some(previous) = previous {
            if previous != handle {
                self.revoke(&job_id, &previous);
            }
        }
    }

    pub fn get(&self, job_id: &JobId) -> Option<ResourceHandle> {
        self.entries()
            .get(job_id)
            .filter(|handle| !handle.is_released())
            .cloned()
    }

    pub fn contains(&self, job_id: &JobId) -> bool {
        self.get(job_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Release the handle for `job_id`.
    ///
    /// Idempotent: unknown or already-released ids are a no-op. Returns
    /// whether a handle was actually revoked by this call.
    pub fn release(&self, job_id: &JobId) -> bool {
        let removed = self.entries().remove(job_id);
        match removed {
            Some(handle) => self.revoke(job_id, &handle),
            None => false,
        }
    }

    /// Release every outstanding handle. Never panics; individual revoke
    /// failures are logged and counted, and the cache ends up empty anyway.
    pub fn release_all(&self) -> ReleaseReport {
        let drained: Vec<(JobId, ResourceHandle)> = self.entries().drain().collect();
        let mut report = ReleaseReport::default();
        for (job_id, handle) in drained {
            if handle.is_released() {
                continue;
            }
            if self.revoke(&job_id, &handle) {
                report.released += 1;
            } else {
                report.failed += 1;
            }
        }
        if report.released > 0 || report.failed > 0 {
            tracing::debug!(released = report.released, failed = report.failed, "released all audio handles");
        }
        report
    }

    /// Revoke once. `true` when this call performed a successful revoke.
    fn revoke(&self, job_id: &JobId, handle: &ResourceHandle) -> bool {
        if !handle.mark_released() {
            return false;
        }
        match self.factory.revoke(handle) {
            Ok(()) => {
                tracing::debug!(job_id = %job_id, uri = handle.uri(), "audio handle released");
                true
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, uri = handle.uri(), error = %e, "failed to revoke audio handle");
                false
            }
        }
    }
}

impl Drop for ResourceHandleCache {
    fn drop(&mut self) {
        self.release_all();
    }
}

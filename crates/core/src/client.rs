//! `JobStatusClient` trait: the backend surface the tracker consumes.

use async_trait::async_trait;

use crate::error::JobError;
use crate::types::{ArticleId, AudioJob, AudioStream, JobId, StatusSnapshot, VoiceOptions};

/// Thin interface to the audio generation backend.
///
/// Implementations include:
/// - `HttpJobStatusClient` (article-audio-client) for the REST surface
/// - scripted fakes in the tracker's tests
#[async_trait]
pub trait JobStatusClient: Send + Sync {
    /// Start a generation job for `article_id`.
    ///
    /// Fails with `Validation` for malformed voice parameters, `Permission`
    /// when the caller lacks rights, and `Config` when no options were given
    /// and the server has no default configuration.
    async fn submit(&self, article_id: &ArticleId, options: &VoiceOptions)
        -> Result<JobId, JobError>;

    /// Current status of a job. `NotFound` once the job is gone.
    async fn get_status(&self, job_id: &JobId) -> Result<StatusSnapshot, JobError>;

    /// Audio content of a completed job. `NotReady` for any other status.
    async fn get_stream(&self, job_id: &JobId) -> Result<AudioStream, JobError>;

    /// Every job belonging to `article_id`, in server order.
    async fn list_jobs(&self, article_id: &ArticleId) -> Result<Vec<AudioJob>, JobError>;

    async fn delete(&self, job_id: &JobId) -> Result<(), JobError>;

    /// Name for logging (e.g. "http").
    fn name(&self) -> &str;
}

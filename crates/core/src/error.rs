use thiserror::Error;

use crate::types::JobId;

/// Every failure the audio job subsystem can report.
///
/// Variants mirror the kinds callers branch on: submission rejections
/// (`Validation`, `Permission`, `Config`), lookup failures (`NotFound`,
/// `NotReady`), tracker-side outcomes (`Resolution`, `Timeout`) and the
/// transient `Transport` bucket that polling swallows.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("Invalid voice parameters: {0}")]
    Validation(String),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("No voice configuration supplied and no default configured: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Audio for job {0} is not ready yet")]
    NotReady(JobId),

    #[error("Failed to resolve audio for job {job_id}: {message}")]
    Resolution { job_id: JobId, message: String },

    #[error("Timed out after {elapsed_secs} seconds waiting for job {job_id}")]
    Timeout { job_id: JobId, elapsed_secs: u64 },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Job {0} is not tracked")]
    UnknownJob(JobId),

    #[error("Tracker has been disposed")]
    Disposed,
}

impl JobError {
    /// Whether a polling tick that hit this error should simply try again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// True for the kinds a submission can be rejected with.
    pub fn is_submission_rejection(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::Permission(_) | Self::Config(_)
        )
    }

    pub fn resolution(job_id: &JobId, source: impl std::fmt::Display) -> Self {
        Self::Resolution {
            job_id: job_id.clone(),
            message: source.to_string(),
        }
    }
}

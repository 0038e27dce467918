//! Events broadcast by a `JobTracker`.

use serde::Serialize;

use article_audio_core::{JobError, JobId, JobStatus};

/// Something observable happened to the tracked jobs.
///
/// Serialised with a `type` tag so a UI layer can forward events as-is.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TrackerEvent {
    #[serde(rename_all = "camelCase")]
    JobSubmitted { job_id: JobId },

    #[serde(rename_all = "camelCase")]
    SelectionChanged {
        previous: Option<JobId>,
        current: Option<JobId>,
    },

    #[serde(rename_all = "camelCase")]
    JobUpdated {
        job_id: JobId,
        status: JobStatus,
        progress: Option<u8>,
    },

    #[serde(rename_all = "camelCase")]
    JobCompleted { job_id: JobId },

    #[serde(rename_all = "camelCase")]
    JobFailed { job_id: JobId, message: String },

    #[serde(rename_all = "camelCase")]
    HandleReady { job_id: JobId, uri: String },

    #[serde(rename_all = "camelCase")]
    ResolutionFailed { job_id: JobId, message: String },

    /// Polling gave up; the job keeps its last known status and may be
    /// re-checked manually.
    #[serde(rename_all = "camelCase")]
    PollTimedOut { job_id: JobId, elapsed_secs: u64 },

    #[serde(rename_all = "camelCase")]
    JobDeleted { job_id: JobId },

    Disposed,
}

impl TrackerEvent {
    /// The job this event is about, if any.
    pub fn job_id(&self) -> Option<&JobId> {
        match self {
            Self::JobSubmitted { job_id }
            | Self::JobUpdated { job_id, .. }
            | Self::JobCompleted { job_id }
            | Self::JobFailed { job_id, .. }
            | Self::HandleReady { job_id, .. }
            | Self::ResolutionFailed { job_id, .. }
            | Self::PollTimedOut { job_id, .. }
            | Self::JobDeleted { job_id } => Some(job_id),
            Self::SelectionChanged { current, .. } => current.as_ref(),
            Self::Disposed => None,
        }
    }

    pub(crate) fn from_error(job_id: &JobId, error: &JobError) -> Option<Self> {
        match error {
            JobError::Timeout { elapsed_secs, .. } => Some(Self::PollTimedOut {
                job_id: job_id.clone(),
                elapsed_secs: *elapsed_secs,
            }),
            JobError::Resolution { message, .. } => Some(Self::ResolutionFailed {
                job_id: job_id.clone(),
                message: message.clone(),
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_event_serialization() {
        let event = TrackerEvent::JobUpdated {
            job_id: JobId::from("j1"),
            status: JobStatus::Generating,
            progress: Some(40),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "jobUpdated",
                "jobId": "j1",
                "status": "GENERATING",
                "progress": 40
            })
        );

        let json = serde_json::to_value(TrackerEvent::Disposed).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "disposed" }));
    }

    #[test]
    fn test_from_error() {
        let job = JobId::from("j1");
        let timeout = JobError::Timeout { job_id: job.clone(), elapsed_secs: 300 };
        assert_eq!(
            TrackerEvent::from_error(&job, &timeout),
            Some(TrackerEvent::PollTimedOut { job_id: job.clone(), elapsed_secs: 300 })
        );
        assert_eq!(
            TrackerEvent::from_error(&job, &JobError::Transport("x".into())),
            None
        );
    }
}

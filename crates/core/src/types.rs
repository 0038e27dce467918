// crates/core/src/types.rs
//! Data model shared by the client adapter and the tracker.

use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::JobError;

/// Accepts both `"abc"` and `42` on the wire; ids are opaque either way.
#[derive(Deserialize)]
#[serde(untagged)]
enum IdRepr {
    Text(String),
    Signed(i64),
    Unsigned(u64),
}

impl From<IdRepr> for String {
    fn from(repr: IdRepr) -> Self {
        match repr {
            IdRepr::Text(s) => s,
            IdRepr::Signed(n) => n.to_string(),
            IdRepr::Unsigned(n) => n.to_string(),
        }
    }
}

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                IdRepr::deserialize(deserializer).map(|repr| Self(repr.into()))
            }
        }
    };
}

opaque_id!(
    /// Backend-assigned identifier of one audio generation job.
    JobId
);

opaque_id!(
    /// Identifier of the article that owns a set of jobs.
    ArticleId
);

/// Lifecycle of an audio job.
///
/// `Pending` only exists client-side, between a successful submission and
/// the first status fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Generating,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether a job in this state should have a polling loop.
    pub fn is_in_progress(self) -> bool {
        matches!(self, Self::Pending | Self::Generating)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Generating => "GENERATING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audio generation job as known to the client.
///
/// The locally materialised audio handle is deliberately not part of this
/// record; it lives in the tracker's handle cache and is never serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioJob {
    pub id: JobId,
    pub article_id: ArticleId,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

impl AudioJob {
    /// The record inserted right after a successful submission.
    pub fn pending(id: JobId, article_id: ArticleId) -> Self {
        Self {
            id,
            article_id,
            status: JobStatus::Pending,
            progress: None,
            error_message: None,
            created_at: Some(Utc::now()),
            file_name: None,
        }
    }

    /// Copy descriptive metadata from `other` where this record has none.
    /// Values already set are never overwritten.
    pub fn fill_metadata_from(&mut self, other: &AudioJob) {
        if self.created_at.is_none() {
            self.created_at = other.created_at;
        }
        if self.file_name.is_none() {
            self.file_name.clone_from(&other.file_name);
        }
    }
}

/// Result of one status fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub status: JobStatus,
    pub progress: Option<u8>,
    pub error_message: Option<String>,
}

impl StatusSnapshot {
    pub fn generating(progress: Option<u8>) -> Self {
        Self {
            status: JobStatus::Generating,
            progress,
            error_message: None,
        }
    }

    pub fn completed() -> Self {
        Self {
            status: JobStatus::Completed,
            progress: Some(100),
            error_message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            progress: None,
            error_message: Some(message.into()),
        }
    }
}

/// Optional voice configuration sent with a submission.
///
/// Leaving everything unset asks the server to use its default voice
/// configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pitch: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_id: Option<String>,
}

impl VoiceOptions {
    pub const SPEED_RANGE: std::ops::RangeInclusive<f32> = 0.25..=4.0;
    pub const PITCH_RANGE: std::ops::RangeInclusive<f32> = -12.0..=12.0;

    /// Reject malformed parameters before they reach the network.
    pub fn validate(&self) -> Result<(), JobError> {
        if let Some(voice) = &self.voice {
            if voice.trim().is_empty() {
                return Err(JobError::Validation("voice must not be empty".into()));
            }
        }
        if let Some(speed) = self.speed {
            if !Self::SPEED_RANGE.contains(&speed) {
                return Err(JobError::Validation(format!(
                    "speed {speed} outside {:?}",
                    Self::SPEED_RANGE
                )));
            }
        }
        if let Some(pitch) = self.pitch {
            if !Self::PITCH_RANGE.contains(&pitch) {
                return Err(JobError::Validation(format!(
                    "pitch {pitch} outside {:?}",
                    Self::PITCH_RANGE
                )));
            }
        }
        if let Some(config_id) = &self.config_id {
            if config_id.trim().is_empty() {
                return Err(JobError::Validation("configId must not be empty".into()));
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Audio content fetched for a completed job, before it is materialised
/// into a local handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioStream {
    pub content_type: String,
    pub bytes: Bytes,
}

impl AudioStream {
    pub fn new(content_type: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            content_type: content_type.into(),
            bytes: bytes.into(),
        }
    }

    /// File extension matching the content type.
    pub fn extension(&self) -> &'static str {
        let mime = self
            .content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match mime.as_str() {
            "audio/mpeg" | "audio/mp3" => "mp3",
            "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
            "audio/ogg" | "audio/opus" => "ogg",
            "audio/aac" | "audio/mp4" | "audio/x-m4a" => "aac",
            _ => "bin",
        }
    }
}

/// Clamp a server-reported percentage into `0..=100`.
pub fn clamp_progress(raw: f64) -> Option<u8> {
    if raw.is_nan() {
        return None;
    }
    Some(raw.round().clamp(0.0, 100.0) as u8)
}

/// Lenient timestamp parsing: RFC 3339 first, then `YYYY-MM-DD HH:MM:SS`
/// interpreted as UTC. Anything else is dropped.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_status_terminality() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Generating.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Pending.is_in_progress());
        assert!(!JobStatus::Failed.is_in_progress());
    }

    #[test]
    fn test_status_wire_names() {
        let json = serde_json::to_string(&JobStatus::Generating).unwrap();
        assert_eq!(json, "\"GENERATING\"");
        let status: JobStatus = serde_json::from_str("\"COMPLETED\"").unwrap();
        assert_eq!(status, JobStatus::Completed);
    }

    #[test]
    fn test_job_id_accepts_numbers() {
        let id: JobId = serde_json::from_str("42").unwrap();
        assert_eq!(id.as_str(), "42");
        let id: JobId = serde_json::from_str("-7").unwrap();
        assert_eq!(id.as_str(), "-7");
        let id: JobId = serde_json::from_str("18446744073709551615").unwrap();
        assert_eq!(id.as_str(), "18446744073709551615");
        let id: JobId = serde_json::from_str("\"a-b\"").unwrap();
        assert_eq!(id, JobId::from("a-b"));
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"a-b\"");
    }

    #[test]
    fn test_fill_metadata_never_overwrites() {
        let mut local = AudioJob::pending(JobId::from("1"), ArticleId::from("a"));
        let created = local.created_at;
        let mut remote = local.clone();
        remote.created_at = parse_timestamp("2024-03-01T10:00:00Z");
        remote.file_name = Some("article-a.mp3".into());

        local.fill_metadata_from(&remote);
        assert_eq!(local.created_at, created);
        assert_eq!(local.file_name.as_deref(), Some("article-a.mp3"));

        remote.file_name = Some("renamed.mp3".into());
        local.fill_metadata_from(&remote);
        assert_eq!(local.file_name.as_deref(), Some("article-a.mp3"));
    }

    #[test]
    fn test_voice_options_validation() {
        assert!(VoiceOptions::default().validate().is_ok());
        assert!(VoiceOptions::default().is_empty());

        let ok = VoiceOptions {
            voice: Some("alloy".into()),
            speed: Some(1.25),
            pitch: Some(-2.0),
            config_id: None,
        };
        assert!(ok.validate().is_ok());

        let too_fast = VoiceOptions {
            speed: Some(9.0),
            ..Default::default()
        };
        assert!(matches!(too_fast.validate(), Err(JobError::Validation(_))));

        let blank_voice = VoiceOptions {
            voice: Some("  ".into()),
            ..Default::default()
        };
        assert!(matches!(blank_voice.validate(), Err(JobError::Validation(_))));

        let bad_pitch = VoiceOptions {
            pitch: Some(30.0),
            ..Default::default()
        };
        assert!(matches!(bad_pitch.validate(), Err(JobError::Validation(_))));
    }

    #[test]
    fn test_voice_options_serialize_omits_unset() {
        let opts = VoiceOptions {
            voice: Some("nova".into()),
            config_id: Some("cfg-1".into()),
            ..Default::default()
        };
        let json = serde_json::to_string(&opts).unwrap();
        assert_eq!(json, r#"{"voice":"nova","configId":"cfg-1"}"#);
    }

    #[test]
    fn test_audio_stream_extension() {
        assert_eq!(AudioStream::new("audio/mpeg", vec![1u8]).extension(), "mp3");
        assert_eq!(
            AudioStream::new("audio/wav; codecs=1", vec![1u8]).extension(),
            "wav"
        );
        assert_eq!(
            AudioStream::new("application/octet-stream", vec![1u8]).extension(),
            "bin"
        );
    }

    #[test]
    fn test_clamp_progress() {
        assert_eq!(clamp_progress(10.4), Some(10));
        assert_eq!(clamp_progress(-3.0), Some(0));
        assert_eq!(clamp_progress(140.0), Some(100));
        assert_eq!(clamp_progress(f64::NAN), None);
    }

    #[test]
    fn test_parse_timestamp_formats() {
        assert!(parse_timestamp("2024-05-01T08:30:00+08:00").is_some());
        let ts = parse_timestamp("2024-05-01 08:30:00").unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-05-01T08:30:00+00:00");
        assert!(parse_timestamp("yesterday").is_none());
    }
}

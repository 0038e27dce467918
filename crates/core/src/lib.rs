//! Core types for article audio generation jobs.
//!
//! Shared by the REST adapter (`article-audio-client`) and the job tracker
//! (`article-audio-tracker`): the job data model, the error taxonomy, the
//! `JobStatusClient` backend trait and configuration.

pub mod client;
pub mod config;
pub mod error;
pub mod types;

pub use client::JobStatusClient;
pub use config::{ClientConfig, TrackerConfig};
pub use error::JobError;
pub use types::{
    clamp_progress, parse_timestamp, ArticleId, AudioJob, AudioStream, JobId, JobStatus,
    StatusSnapshot, VoiceOptions,
};

//! REST adapter for the article audio backend.
//!
//! [`HttpJobStatusClient`] implements `article_audio_core::JobStatusClient`
//! on top of `reqwest`, unwrapping the platform response envelope and mapping
//! HTTP statuses onto `JobError` kinds.

mod envelope;
pub mod http;

pub use http::{BuildError, HttpJobStatusClient};

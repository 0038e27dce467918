//! Lifecycle tracking for article audio generation jobs.
//!
//! [`JobTracker`] is the entry point: one per article view, disposed when
//! the view goes away. It drives a [`PollingController`] (one tokio task per
//! polled job) and owns a [`ResourceHandleCache`] of locally materialised
//! audio.

pub mod events;
pub mod polling;
pub mod resource;
pub mod resource_cache;
pub mod tracker;

pub use events::TrackerEvent;
pub use polling::{PollObserver, PollTicket, PollingController, JOB_GONE_MESSAGE};
pub use resource::{ResourceFactory, ResourceHandle, TempFileFactory};
pub use resource_cache::{ReleaseReport, ResourceHandleCache};
pub use tracker::JobTracker;

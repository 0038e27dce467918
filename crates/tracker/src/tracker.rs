// crates/tracker/src/tracker.rs
//! The per-article job tracker.
//!
//! A [`JobTracker`] owns every audio job known for one article, the single
//! selected job, the polling runs and the cached audio handles. User-driven
//! operations (`submit`, `select`, `refresh_list`, `delete`, `dispose`) are
//! the only code paths that change the selection; polling callbacks only
//! update job records and resolve audio for the job that is still selected.
//!
//! State lives behind one std `Mutex` that is never held across an await.
//! Poll cancellation and handle release happen while it is held, so once an
//! operation returns no stale tick can be applied.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};

use article_audio_core::{
    ArticleId, AudioJob, JobError, JobId, JobStatus, JobStatusClient, StatusSnapshot,
    TrackerConfig, VoiceOptions,
};

use crate::events::TrackerEvent;
use crate::polling::{PollObserver, PollTicket, PollingController, JOB_GONE_MESSAGE};
use crate::resource::{ResourceFactory, ResourceHandle};
use crate::resource_cache::ResourceHandleCache;

/// Stored when a FAILED status arrives without a message.
const UNSPECIFIED_FAILURE: &str = "audio generation failed";

struct TrackedJob {
    job: AudioJob,
    /// Generation of the poll allowed to update this job, if any.
    poll_generation: Option<u64>,
    last_tick: u64,
    last_error: Option<JobError>,
}

impl TrackedJob {
    fn new(job: AudioJob) -> Self {
        Self {
            job,
            poll_generation: None,
            last_tick: 0,
            last_error: None,
        }
    }
}

#[derive(Default)]
struct TrackerState {
    jobs: HashMap<JobId, TrackedJob>,
    /// Display order: newest submissions first, then server list order.
    order: Vec<JobId>,
    selected: Option<JobId>,
    /// Bumped on every selection change; resolutions started under an older
    /// epoch are discarded.
    selection_epoch: u64,
    /// Audio resolutions in flight. Their senders drop when they finish.
    resolving: HashMap<JobId, watch::Receiver<()>>,
    disposed: bool,
}

struct TrackerInner {
    article_id: ArticleId,
    client: Arc<dyn JobStatusClient>,
    polls: PollingController,
    handles: ResourceHandleCache,
    state: Mutex<TrackerState>,
    events: broadcast::Sender<TrackerEvent>,
    observer: Arc<dyn PollObserver>,
}

/// Tracks audio generation jobs for one article.
///
/// Call [`JobTracker::dispose`] when the owning view goes away. Dropping the
/// tracker disposes it as well.
pub struct JobTracker {
    inner: Arc<TrackerInner>,
}

impl JobTracker {
    /// Create a tracker for `article_id`. Nothing is fetched until an operation runs.
    pub fn new(
        article_id: ArticleId,
        client: Arc<dyn JobStatusClient>,
        factory: Arc<dyn ResourceFactory>,
        config: TrackerConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let inner = Arc::new_cyclic(|weak: &Weak<TrackerInner>| TrackerInner {
            article_id,
            polls: PollingController::new(Arc::clone(&client), &config),
            client,
            handles: ResourceHandleCache::new(factory),
            state: Mutex::new(TrackerState::default()),
            events,
            observer: Arc::new(TrackerObserver { inner: weak.clone() }),
        });
        tracing::debug!(
            article_id = %inner.article_id,
            backend = inner.client.name(),
            "job tracker created"
        );
        Self { inner }
    }

    /// The article whose jobs this tracker follows.
    pub fn article_id(&self) -> &ArticleId {
        &self.inner.article_id
    }

    /// Subscribe to tracker events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.inner.events.subscribe()
    }

    /// Submit a generation request for this article.
    ///
    /// On success the new job is tracked as PENDING, selected, and polled.
    /// Backend errors are returned unchanged and nothing is tracked.
    pub async fn submit(&self, options: &VoiceOptions) -> Result<JobId, JobError> {
        self.ensure_live()?;
        let inner = &self.inner;
        let job_id = match inner.client.submit(&inner.article_id, options).await {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(article_id = %inner.article_id, error = %e, "audio submission rejected");
                return Err(e);
            }
        };

        let mut state = inner.state();
        if state.disposed {
            return Err(JobError::Disposed);
        }
        let previous = inner.deselect(&mut state);
        if let Some(mut stale) = state.jobs.remove(&job_id) {
            inner.stop_poll(&mut stale);
        }
        state.order.retain(|id| id != &job_id);
        state.order.insert(0, job_id.clone());

        let mut tracked = TrackedJob::new(AudioJob::pending(job_id.clone(), inner.article_id.clone()));
        inner.start_poll(&mut tracked);
        state.jobs.insert(job_id.clone(), tracked);
        state.selected = Some(job_id.clone());
        state.selection_epoch += 1;

        tracing::info!(article_id = %inner.article_id, job_id = %job_id, "audio job submitted");
        inner.emit(TrackerEvent::JobSubmitted { job_id: job_id.clone() });
        inner.emit(TrackerEvent::SelectionChanged {
            previous,
            current: Some(job_id.clone()),
        });
        Ok(job_id)
    }

    /// Make `job_id` the selected job.
    ///
    /// The previously selected job stops polling and its handle is released.
    /// A job still in progress is (re)polled; a completed job has its audio
    /// resolved unless a handle is already cached. Selecting the job that is
    /// already selected retries whatever is outstanding for it.
    pub async fn select(&self, job_id: &JobId) -> Result<Option<ResourceHandle>, JobError> {
        let inner = &self.inner;
        let epoch = {
            let mut state = inner.state();
            if state.disposed {
                return Err(JobError::Disposed);
            }
            let status = match state.jobs.get(job_id) {
                Some(tracked) => tracked.job.status,
                None => return Err(JobError::UnknownJob(job_id.clone())),
            };

            if state.selected.as_ref() != Some(job_id) {
                let previous = inner.deselect(&mut state);
                state.selected = Some(job_id.clone());
                state.selection_epoch += 1;
                tracing::info!(job_id = %job_id, previous = ?previous, "audio job selected");
                inner.emit(TrackerEvent::SelectionChanged {
                    previous,
                    current: Some(job_id.clone()),
                });
            }

            match status {
                JobStatus::Pending | JobStatus::Generating => {
                    if !inner.polls.is_polling(job_id) {
                        if let Some(tracked) = state.jobs.get_mut(job_id) {
                            inner.start_poll(tracked);
                        }
                    }
                    return Ok(None);
                }
                JobStatus::Failed => return Ok(None),
                JobStatus::Completed => {}
            }
            if let Some(handle) = inner.handles.get(job_id) {
                return Ok(Some(handle));
            }
            state.selection_epoch
        };
        inner.resolve_handle(job_id, epoch).await
    }

    /// Reload the article's jobs from the backend and reconcile.
    ///
    /// Known jobs keep their cached handles and never leave a terminal
    /// status. Jobs missing from the list are dropped, except PENDING ones
    /// the backend has not confirmed yet. Every job still in progress is
    /// polled afterwards.
    pub async fn refresh_list(&self) -> Result<Vec<AudioJob>, JobError> {
        self.ensure_live()?;
        let inner = &self.inner;
        let listed = inner.client.list_jobs(&inner.article_id).await?;

        let resolve = {
            let mut state = inner.state();
            if state.disposed {
                return Err(JobError::Disposed);
            }
            inner.reconcile(&mut state, listed)
        };
        if let Some((job_id, epoch)) = resolve {
            // Failures are recorded on the job and broadcast.
            let _ = inner.resolve_handle(&job_id, epoch).await;
        }
        Ok(self.jobs())
    }

    /// Delete a job on the backend and stop tracking it.
    ///
    /// Polling stops and the handle is released before the backend call. A
    /// backend `NotFound` counts as success. On any other failure the job
    /// stays tracked without a poll; `refresh_list` resumes it.
    pub async fn delete(&self, job_id: &JobId) -> Result<(), JobError> {
        let inner = &self.inner;
        {
            let mut state = inner.state();
            if state.disposed {
                return Err(JobError::Disposed);
            }
            let Some(tracked) = state.jobs.get_mut(job_id) else {
                return Err(JobError::UnknownJob(job_id.clone()));
            };
            inner.stop_poll(tracked);
            inner.handles.release(job_id);
        }

        match inner.client.delete(job_id).await {
            Ok(()) => {}
            Err(JobError::NotFound(_)) => {
                tracing::debug!(job_id = %job_id, "job already gone on the backend");
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "failed to delete audio job");
                return Err(e);
            }
        }

        let mut state = inner.state();
        if !state.disposed && inner.forget(&mut state, job_id) {
            tracing::info!(job_id = %job_id, "audio job deleted");
            inner.emit(TrackerEvent::JobDeleted { job_id: job_id.clone() });
        }
        Ok(())
    }

    /// Fetch the status of `job_id` once, outside the polling schedule.
    ///
    /// Meant for jobs whose poll timed out. A terminal result is applied
    /// like a terminal poll; anything else is applied and polling restarts.
    pub async fn recheck(&self, job_id: &JobId) -> Result<AudioJob, JobError> {
        let inner = &self.inner;
        {
            let state = inner.state();
            if state.disposed {
                return Err(JobError::Disposed);
            }
            match state.jobs.get(job_id) {
                Some(tracked) if tracked.job.status.is_terminal() => return Ok(tracked.job.clone()),
                Some(_) => {}
                None => return Err(JobError::UnknownJob(job_id.clone())),
            }
        }

        let snapshot = match inner.client.get_status(job_id).await {
            Ok(snapshot) => snapshot,
            Err(JobError::NotFound(_)) => StatusSnapshot::failed(JOB_GONE_MESSAGE),
            Err(e) => return Err(e),
        };

        let (job, resolve) = {
            let mut state = inner.state();
            if state.disposed {
                return Err(JobError::Disposed);
            }
            let Some(tracked) = state.jobs.get_mut(job_id) else {
                return Err(JobError::UnknownJob(job_id.clone()));
            };
            if tracked.job.status.is_terminal() {
                (tracked.job.clone(), None)
            } else if snapshot.status.is_terminal() {
                inner.stop_poll(tracked);
                let epoch = inner.apply_terminal(&mut state, job_id, snapshot);
                let job = state.jobs.get(job_id).map(|t| t.job.clone());
                match job {
                    Some(job) => (job, epoch),
                    None => return Err(JobError::UnknownJob(job_id.clone())),
                }
            } else {
                tracked.job.status = snapshot.status;
                if snapshot.progress.is_some() {
                    tracked.job.progress = snapshot.progress;
                }
                tracked.last_error = None;
                inner.start_poll(tracked);
                let job = tracked.job.clone();
                inner.emit(TrackerEvent::JobUpdated {
                    job_id: job_id.clone(),
                    status: job.status,
                    progress: job.progress,
                });
                (job, None)
            }
        };
        if let Some(epoch) = resolve {
            let _ = inner.resolve_handle(job_id, epoch).await;
        }
        Ok(job)
    }

    /// Cancel every poll, release every handle and forget all jobs.
    ///
    /// Idempotent and infallible. Every later operation returns
    /// `JobError::Disposed`.
    pub fn dispose(&self) {
        let inner = &self.inner;
        let mut state = inner.state();
        if state.disposed {
            return;
        }
        state.disposed = true;
        let polls = inner.polls.cancel_all();
        let report = inner.handles.release_all();
        let jobs = state.jobs.len();
        state.jobs.clear();
        state.order.clear();
        state.selected = None;
        state.selection_epoch += 1;

        tracing::info!(
            article_id = %inner.article_id,
            jobs,
            polls,
            handles_released = report.released,
            handles_failed = report.failed,
            "job tracker disposed"
        );
        inner.emit(TrackerEvent::Disposed);
    }

    /// Tracked jobs in display order.
    pub fn jobs(&self) -> Vec<AudioJob> {
        let state = self.inner.state();
        state
            .order
            .iter()
            .filter_map(|id| state.jobs.get(id))
            .map(|tracked| tracked.job.clone())
            .collect()
    }

    /// Snapshot of one tracked job.
    pub fn job(&self, job_id: &JobId) -> Option<AudioJob> {
        self.inner.state().jobs.get(job_id).map(|t| t.job.clone())
    }

    /// The currently selected job, if any.
    pub fn selected(&self) -> Option<JobId> {
        self.inner.state().selected.clone()
    }

    /// The cached audio handle for `job_id`, if resolved and not released.
    pub fn handle(&self, job_id: &JobId) -> Option<ResourceHandle> {
        self.inner.handles.get(job_id)
    }

    /// The last timeout or resolution failure recorded for `job_id`.
    pub fn last_error(&self, job_id: &JobId) -> Option<JobError> {
        self.inner
            .state()
            .jobs
            .get(job_id)
            .and_then(|t| t.last_error.clone())
    }

    /// Whether a poll is active for `job_id`.
    pub fn is_polling(&self, job_id: &JobId) -> bool {
        self.inner.polls.is_polling(job_id)
    }

    /// Number of jobs with an active poll.
    pub fn active_poll_count(&self) -> usize {
        self.inner.polls.active_count()
    }

    /// Polling tasks not yet exited, including cancelled ones the runtime
    /// has not polled since.
    pub fn running_poll_tasks(&self) -> usize {
        self.inner.polls.running_tasks()
    }

    /// Number of live cached audio handles.
    pub fn cached_handle_count(&self) -> usize {
        self.inner.handles.len()
    }

    /// Whether [`JobTracker::dispose`] has run.
    pub fn is_disposed(&self) -> bool {
        self.inner.state().disposed
    }

    fn ensure_live(&self) -> Result<(), JobError> {
        if self.inner.state().disposed {
            Err(JobError::Disposed)
        } else {
            Ok(())
        }
    }
}

impl Drop for JobTracker {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl TrackerInner {
    fn state(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            tracing::error!("tracker state mutex poisoned; recovering");
            poisoned.into_inner()
        })
    }

    fn emit(&self, event: TrackerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn start_poll(&self, tracked: &mut TrackedJob) {
        let ticket = self
            .polls
            .start(tracked.job.id.clone(), Arc::clone(&self.observer));
        tracked.poll_generation = Some(ticket.generation);
        tracked.last_tick = 0;
    }

    fn stop_poll(&self, tracked: &mut TrackedJob) {
        tracked.poll_generation = None;
        self.polls.cancel(&tracked.job.id);
    }

    /// Clear the selection, stopping the old job's poll and releasing its
    /// handle. Returns the previously selected job.
    fn deselect(&self, state: &mut TrackerState) -> Option<JobId> {
        let previous = state.selected.take()?;
        if let Some(tracked) = state.jobs.get_mut(&previous) {
            self.stop_poll(tracked);
        }
        self.handles.release(&previous);
        state.selection_epoch += 1;
        Some(previous)
    }

    /// Drop a job from the tracked set along with its poll and handle.
    fn forget(&self, state: &mut TrackerState, job_id: &JobId) -> bool {
        let Some(mut tracked) = state.jobs.remove(job_id) else {
            return false;
        };
        self.stop_poll(&mut tracked);
        self.handles.release(job_id);
        state.order.retain(|id| id != job_id);
        if state.selected.as_ref() == Some(job_id) {
            state.selected = None;
            state.selection_epoch += 1;
            self.emit(TrackerEvent::SelectionChanged {
                previous: Some(job_id.clone()),
                current: None,
            });
        }
        true
    }

    /// Move a job to its terminal status. Returns the selection epoch when
    /// the job is selected, completed and still needs its audio resolved.
    fn apply_terminal(
        &self,
        state: &mut TrackerState,
        job_id: &JobId,
        snapshot: StatusSnapshot,
    ) -> Option<u64> {
        let tracked = state.jobs.get_mut(job_id)?;
        if tracked.job.status.is_terminal() {
            return None;
        }
        tracked.poll_generation = None;
        tracked.job.status = snapshot.status;
        tracked.job.progress = snapshot.progress.or(tracked.job.progress);

        if snapshot.status == JobStatus::Completed {
            tracked.job.error_message = None;
            tracked.last_error = None;
            tracing::info!(job_id = %job_id, "audio job completed");
            self.emit(TrackerEvent::JobCompleted { job_id: job_id.clone() });
        } else {
            let message = snapshot
                .error_message
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| UNSPECIFIED_FAILURE.to_string());
            tracked.job.error_message = Some(message.clone());
            tracing::warn!(job_id = %job_id, %message, "audio job failed");
            self.emit(TrackerEvent::JobFailed {
                job_id: job_id.clone(),
                message,
            });
        }

        let needs_handle = snapshot.status == JobStatus::Completed
            && state.selected.as_ref() == Some(job_id)
            && !self.handles.contains(job_id);
        needs_handle.then_some(state.selection_epoch)
    }

    fn reconcile(&self, state: &mut TrackerState, listed: Vec<AudioJob>) -> Option<(JobId, u64)> {
        let listed_ids: HashSet<JobId> = listed.iter().map(|job| job.id.clone()).collect();

        let vanished: Vec<JobId> = state
            .order
            .iter()
            .filter(|id| !listed_ids.contains(*id))
            .filter(|id| {
                state
                    .jobs
                    .get(*id)
                    .is_some_and(|t| t.job.status != JobStatus::Pending)
            })
            .cloned()
            .collect();
        for job_id in vanished {
            if self.forget(state, &job_id) {
                tracing::info!(job_id = %job_id, "audio job no longer listed; dropped");
                self.emit(TrackerEvent::JobDeleted { job_id });
            }
        }

        // Unconfirmed submissions stay on top.
        let mut order: Vec<JobId> = state
            .order
            .iter()
            .filter(|id| !listed_ids.contains(*id))
            .cloned()
            .collect();
        let mut finished = Vec::new();

        for server_job in listed {
            if order.contains(&server_job.id) {
                continue;
            }
            order.push(server_job.id.clone());
            let Some(tracked) = state.jobs.get_mut(&server_job.id) else {
                tracing::debug!(job_id = %server_job.id, status = %server_job.status, "new audio job listed");
                state
                    .jobs
                    .insert(server_job.id.clone(), TrackedJob::new(server_job));
                continue;
            };

            tracked.job.fill_metadata_from(&server_job);
            if tracked.job.status.is_terminal() {
                continue;
            }
            if server_job.status.is_terminal() {
                self.stop_poll(tracked);
                finished.push((
                    server_job.id.clone(),
                    StatusSnapshot {
                        status: server_job.status,
                        progress: server_job.progress,
                        error_message: server_job.error_message,
                    },
                ));
                continue;
            }
            let regresses = tracked.job.status == JobStatus::Generating
                && server_job.status == JobStatus::Pending;
            if !regresses {
                tracked.job.status = server_job.status;
            }
            if server_job.progress.is_some() {
                tracked.job.progress = server_job.progress;
            }
        }
        state.order = order;

        for (job_id, snapshot) in finished {
            self.apply_terminal(state, &job_id, snapshot);
        }

        for job_id in &state.order {
            if let Some(tracked) = state.jobs.get_mut(job_id) {
                if tracked.job.status.is_in_progress() && !self.polls.is_polling(job_id) {
                    self.start_poll(tracked);
                }
            }
        }

        let selected = state.selected.clone()?;
        let completed = state
            .jobs
            .get(&selected)
            .is_some_and(|t| t.job.status == JobStatus::Completed);
        (completed && !self.handles.contains(&selected)).then(|| (selected, state.selection_epoch))
    }

    /// Fetch and materialise audio for `job_id`.
    ///
    /// At most one fetch runs per job; a concurrent caller waits for it and
    /// then returns the cached handle. Runs without the state lock held
    /// during the fetch. The handle is only created if the job is still
    /// selected under `epoch`; otherwise the audio is discarded and
    /// `Ok(None)` returned.
    async fn resolve_handle(
        &self,
        job_id: &JobId,
        epoch: u64,
    ) -> Result<Option<ResourceHandle>, JobError> {
        let _flight = loop {
            let mut pending = {
                let mut state = self.state();
                if state.disposed {
                    return Err(JobError::Disposed);
                }
                if !wants_handle(&state, job_id, epoch) {
                    return Ok(None);
                }
                if let Some(handle) = self.handles.get(job_id) {
                    return Ok(Some(handle));
                }
                match state.resolving.get(job_id) {
                    Some(pending) => pending.clone(),
                    None => {
                        let (done, pending) = watch::channel(());
                        state.resolving.insert(job_id.clone(), pending);
                        break PendingResolution {
                            inner: self,
                            job_id,
                            _done: done,
                        };
                    }
                }
            };
            tracing::debug!(job_id = %job_id, "waiting for audio already being resolved");
            // Nothing is ever sent; this returns once the sender drops.
            let _ = pending.changed().await;
        };

        tracing::debug!(job_id = %job_id, "resolving audio");
        let fetched = self.client.get_stream(job_id).await;

        let mut state = self.state();
        if state.disposed {
            return Err(JobError::Disposed);
        }
        let audio = match fetched {
            Ok(audio) => audio,
            Err(e) => return Err(self.resolution_failed(&mut state, job_id, e)),
        };

        if !wants_handle(&state, job_id, epoch) {
            tracing::debug!(job_id = %job_id, "discarding audio for a job no longer selected");
            return Ok(None);
        }

        match self.handles.materialize(job_id, &audio) {
            Ok(handle) => {
                if let Some(tracked) = state.jobs.get_mut(job_id) {
                    tracked.last_error = None;
                }
                self.emit(TrackerEvent::HandleReady {
                    job_id: job_id.clone(),
                    uri: handle.uri().to_string(),
                });
                Ok(Some(handle))
            }
            Err(e) => Err(self.resolution_failed(&mut state, job_id, e)),
        }
    }

    fn resolution_failed(&self, state: &mut TrackerState, job_id: &JobId, error: JobError) -> JobError {
        let error = match error {
            e @ JobError::Resolution { .. } => e,
            other => JobError::resolution(job_id, other),
        };
        tracing::warn!(job_id = %job_id, error = %error, "audio resolution failed");
        if let Some(tracked) = state.jobs.get_mut(job_id) {
            tracked.last_error = Some(error.clone());
        }
        if let Some(event) = TrackerEvent::from_error(job_id, &error) {
            self.emit(event);
        }
        error
    }

    fn on_update(&self, ticket: &PollTicket, tick: u64, snapshot: StatusSnapshot) {
        let mut state = self.state();
        if state.disposed {
            return;
        }
        let Some(tracked) = state.jobs.get_mut(&ticket.job_id) else {
            return;
        };
        if tracked.poll_generation != Some(ticket.generation) {
            tracing::debug!(job_id = %ticket.job_id, tick, "discarding update from a superseded poll");
            return;
        }
        if tracked.job.status.is_terminal() || tick <= tracked.last_tick {
            return;
        }
        tracked.last_tick = tick;
        tracked.job.status = snapshot.status;
        if snapshot.progress.is_some() {
            tracked.job.progress = snapshot.progress;
        }
        tracked.last_error = None;
        tracing::debug!(
            job_id = %ticket.job_id,
            tick,
            status = %snapshot.status,
            progress = ?snapshot.progress,
            "audio job progress"
        );
        let event = TrackerEvent::JobUpdated {
            job_id: ticket.job_id.clone(),
            status: tracked.job.status,
            progress: tracked.job.progress,
        };
        self.emit(event);
    }

    async fn on_terminal(&self, ticket: &PollTicket, tick: u64, snapshot: StatusSnapshot) {
        let epoch = {
            let mut state = self.state();
            if state.disposed {
                return;
            }
            let current = state
                .jobs
                .get(&ticket.job_id)
                .is_some_and(|t| t.poll_generation == Some(ticket.generation));
            if !current {
                tracing::debug!(job_id = %ticket.job_id, tick, "discarding terminal status from a superseded poll");
                return;
            }
            self.apply_terminal(&mut state, &ticket.job_id, snapshot)
        };
        if let Some(epoch) = epoch {
            let _ = self.resolve_handle(&ticket.job_id, epoch).await;
        }
    }

    fn on_timeout(&self, ticket: &PollTicket, error: JobError) {
        let mut state = self.state();
        if state.disposed {
            return;
        }
        let Some(tracked) = state.jobs.get_mut(&ticket.job_id) else {
            return;
        };
        if tracked.poll_generation != Some(ticket.generation) {
            return;
        }
        tracked.poll_generation = None;
        tracked.last_error = Some(error.clone());
        if let Some(event) = TrackerEvent::from_error(&ticket.job_id, &error) {
            self.emit(event);
        }
    }
}

/// Whether `job_id` is still the selected, completed job under `epoch`.
fn wants_handle(state: &TrackerState, job_id: &JobId, epoch: u64) -> bool {
    state.selected.as_ref() == Some(job_id)
        && state.selection_epoch == epoch
        && state
            .jobs
            .get(job_id)
            .is_some_and(|t| t.job.status == JobStatus::Completed)
}

/// An audio fetch in flight for one job. Dropping it, whether the fetch
/// finished or was cancelled, wakes every caller waiting on the job.
struct PendingResolution<'a> {
    inner: &'a TrackerInner,
    job_id: &'a JobId,
    _done: watch::Sender<()>,
}

impl Drop for PendingResolution<'_> {
    fn drop(&mut self) {
        // Only the owning flight ever registers an entry for its job.
        self.inner.state().resolving.remove(self.job_id);
    }
}

/// Routes poll results back into the tracker without keeping it alive.
struct TrackerObserver {
    inner: Weak<TrackerInner>,
}

#[async_trait]
impl PollObserver for TrackerObserver {
    async fn on_update(&self, ticket: &PollTicket, tick: u64, snapshot: StatusSnapshot) {
        if let Some(inner) = self.inner.upgrade() {
            inner.on_update(ticket, tick, snapshot);
        }
    }

    async fn on_terminal(&self, ticket: &PollTicket, tick: u64, snapshot: StatusSnapshot) {
        if let Some(inner) = self.inner.upgrade() {
            inner.on_terminal(ticket, tick, snapshot).await;
        }
    }

    async fn on_timeout(&self, ticket: &PollTicket, error: JobError) {
        if let Some(inner) = self.inner.upgrade() {
            inner.on_timeout(ticket, error);
        }
    }
}

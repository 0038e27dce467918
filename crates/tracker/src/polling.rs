// crates/tracker/src/polling.rs
//! Per-job status polling with supersession, timeout and cancellation.
//!
//! Each [`PollingController::start`] spawns one tokio task that fetches the
//! job's status every `poll_interval`. The task stops on a terminal status,
//! on the safety timeout, or when cancelled. Starting a poll for a job that
//! is already polled cancels the previous task first, so at most one live
//! poll exists per job.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use article_audio_core::{JobError, JobId, JobStatusClient, StatusSnapshot, TrackerConfig};

/// Synthetic failure message for a job that vanished server-side mid-poll.
pub const JOB_GONE_MESSAGE: &str = "job no longer exists";

/// Identifies one polling run. A later `start` for the same job yields a
/// higher `generation`, and only the current generation may deliver results.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PollTicket {
    pub job_id: JobId,
    pub generation: u64,
}

/// Receives the outcome of polling ticks.
///
/// `tick` is 1-based and increases by one per status fetch within a run.
#[async_trait]
pub trait PollObserver: Send + Sync + 'static {
    /// A non-terminal status arrived.
    async fn on_update(&self, ticket: &PollTicket, tick: u64, snapshot: StatusSnapshot);

    /// A terminal status arrived. The run has already stopped.
    async fn on_terminal(&self, ticket: &PollTicket, tick: u64, snapshot: StatusSnapshot);

    /// No terminal status within the safety timeout. The run has stopped.
    async fn on_timeout(&self, ticket: &PollTicket, error: JobError);
}

struct ActivePoll {
    generation: u64,
    cancel: CancellationToken,
}

struct Registry {
    /// Parent of every run's token; replaced by `cancel_all`.
    root: CancellationToken,
    active: HashMap<JobId, ActivePoll>,
}

type SharedRegistry = Arc<Mutex<Registry>>;

fn lock(registry: &SharedRegistry) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(|poisoned| {
        tracing::error!("poll registry mutex poisoned; recovering");
        poisoned.into_inner()
    })
}

/// Decrements the live-task counter when a polling task ends.
struct LiveTask(Arc<AtomicUsize>);

impl LiveTask {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for LiveTask {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct PollingController {
    client: Arc<dyn JobStatusClient>,
    interval: Duration,
    timeout: Duration,
    registry: SharedRegistry,
    next_generation: AtomicU64,
    running: Arc<AtomicUsize>,
}

impl PollingController {
    pub fn new(client: Arc<dyn JobStatusClient>, config: &TrackerConfig) -> Self {
        Self {
            client,
            interval: config.poll_interval,
            timeout: config.poll_timeout,
            registry: Arc::new(Mutex::new(Registry {
                root: CancellationToken::new(),
                active: HashMap::new(),
            })),
            next_generation: AtomicU64::new(1),
            running: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Begin polling `job_id`, cancelling any run already active for it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, job_id: JobId, observer: Arc<dyn PollObserver>) -> PollTicket {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let ticket = PollTicket { job_id: job_id.clone(), generation };

        let mut registry = lock(&self.registry);
        let cancel = registry.root.child_token();
        if let Some(previous) = registry.active.insert(
            job_id.clone(),
            ActivePoll { generation, cancel: cancel.clone() },
        ) {
            tracing::debug!(job_id = %job_id, superseded = previous.generation, "superseding active poll");
            previous.cancel.cancel();
        }

        let run = PollRun {
            ticket: ticket.clone(),
            client: Arc::clone(&self.client),
            observer,
            registry: Arc::clone(&self.registry),
            cancel,
            interval: self.interval,
            timeout: self.timeout,
        };
        let live = LiveTask::enter(&self.running);
        tokio::spawn(async move {
            let _live = live;
            run.run().await;
        });
        drop(registry);

        tracing::debug!(job_id = %job_id, generation, "polling started");
        ticket
    }

    /// Stop polling `job_id`. Unknown or already-stopped jobs are a no-op.
    pub fn cancel(&self, job_id: &JobId) -> bool {
        let removed = lock(&self.registry).active.remove(job_id);
        match removed {
            Some(poll) => {
                poll.cancel.cancel();
                tracing::debug!(job_id = %job_id, generation = poll.generation, "polling cancelled");
                true
            }
            None => false,
        }
    }

    /// Stop every run, including runs that are delivering a terminal result.
    /// Returns how many registered polls were cancelled.
    pub fn cancel_all(&self) -> usize {
        let mut registry = lock(&self.registry);
        let count = registry.active.len();
        registry.active.clear();
        let old_root = std::mem::replace(&mut registry.root, CancellationToken::new());
        drop(registry);
        old_root.cancel();
        if count > 0 {
            tracing::debug!(count, "cancelled all polls");
        }
        count
    }

    pub fn is_polling(&self, job_id: &JobId) -> bool {
        lock(&self.registry).active.contains_key(job_id)
    }

    /// Whether `ticket` still names the active run for its job.
    pub fn is_current(&self, ticket: &PollTicket) -> bool {
        is_current(&self.registry, ticket)
    }

    pub fn active_count(&self) -> usize {
        lock(&self.registry).active.len()
    }

    /// Polling tasks that have not yet exited, cancelled ones included
    /// until the runtime gets to them.
    pub fn running_tasks(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for PollingController {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

fn is_current(registry: &SharedRegistry, ticket: &PollTicket) -> bool {
    lock(registry)
        .active
        .get(&ticket.job_id)
        .is_some_and(|poll| poll.generation == ticket.generation)
}

/// Remove the run's registry entry if it is still the current one.
fn retire(registry: &SharedRegistry, ticket: &PollTicket) -> bool {
    let mut registry = lock(registry);
    match registry.active.get(&ticket.job_id) {
        Some(poll) if poll.generation == ticket.generation => {
            registry.active.remove(&ticket.job_id);
            true
        }
        _ => false,
    }
}

enum Wake {
    Cancelled,
    TimedOut,
    Tick,
}

enum Fetched {
    Cancelled,
    TimedOut,
    Status(Result<StatusSnapshot, JobError>),
}

struct PollRun {
    ticket: PollTicket,
    client: Arc<dyn JobStatusClient>,
    observer: Arc<dyn PollObserver>,
    registry: SharedRegistry,
    cancel: CancellationToken,
    interval: Duration,
    timeout: Duration,
}

impl PollRun {
    async fn run(self) {
        let job_id = &self.ticket.job_id;
        let started = Instant::now();
        let deadline = started + self.timeout;
        let mut ticker = interval_at(started + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut tick = 0u64;

        loop {
            let wake = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Wake::Cancelled,
                _ = sleep_until(deadline) => Wake::TimedOut,
                _ = ticker.tick() => Wake::Tick,
            };
            match wake {
                Wake::Cancelled => return,
                Wake::TimedOut => return self.time_out(started.elapsed()).await,
                Wake::Tick => {}
            }

            tick += 1;
            // An in-flight request is dropped on cancel, discarding its result.
            let fetched = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Fetched::Cancelled,
                _ = sleep_until(deadline) => Fetched::TimedOut,
                result = self.client.get_status(job_id) => Fetched::Status(result),
            };

            let snapshot = match fetched {
                Fetched::Cancelled => return,
                Fetched::TimedOut => return self.time_out(started.elapsed()).await,
                Fetched::Status(Ok(snapshot)) => snapshot,
                Fetched::Status(Err(JobError::NotFound(what))) => {
                    tracing::info!(job_id = %job_id, %what, "job disappeared while polling");
                    StatusSnapshot::failed(JOB_GONE_MESSAGE)
                }
                Fetched::Status(Err(e)) if e.is_transient() => {
                    tracing::debug!(job_id = %job_id, tick, error = %e, "status fetch failed; retrying next tick");
                    continue;
                }
                Fetched::Status(Err(e)) => {
                    tracing::warn!(job_id = %job_id, tick, error = %e, "status fetch rejected; retrying next tick");
                    continue;
                }
            };

            if snapshot.status.is_terminal() {
                if retire(&self.registry, &self.ticket) {
                    tracing::debug!(job_id = %job_id, tick, status = %snapshot.status, "polling reached terminal status");
                    self.deliver(self.observer.on_terminal(&self.ticket, tick, snapshot))
                        .await;
                }
                return;
            }

            if !is_current(&self.registry, &self.ticket) {
                return;
            }
            self.deliver(self.observer.on_update(&self.ticket, tick, snapshot))
                .await;
        }
    }

    async fn time_out(&self, elapsed: Duration) {
        if !retire(&self.registry, &self.ticket) {
            return;
        }
        let elapsed_secs = elapsed.as_secs();
        tracing::warn!(job_id = %self.ticket.job_id, elapsed_secs, "polling timed out; status left unchanged");
        let error = JobError::Timeout {
            job_id: self.ticket.job_id.clone(),
            elapsed_secs,
        };
        self.deliver(self.observer.on_timeout(&self.ticket, error)).await;
    }

    /// Run an observer callback unless the run is cancelled first.
    async fn deliver(&self, callback: impl std::future::Future<Output = ()>) {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {}
            _ = callback => {}
        }
    }
}

// crates/tracker/tests/common/mod.rs
//! Scripted backend and in-memory resource factory for tracker tests.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{broadcast, Notify};

use article_audio_core::{
    ArticleId, AudioJob, AudioStream, JobError, JobId, JobStatus, JobStatusClient, StatusSnapshot,
    TrackerConfig, VoiceOptions,
};
use article_audio_tracker::{JobTracker, ResourceFactory, ResourceHandle, TrackerEvent};

pub const ARTICLE: &str = "article-1";

/// Backend double. Status scripts are per job; the last scripted result
/// repeats. Unscripted jobs report GENERATING with unknown progress.
#[derive(Default)]
pub struct FakeClient {
    next_id: AtomicUsize,
    submit_error: Mutex<Option<JobError>>,
    statuses: Mutex<HashMap<JobId, VecDeque<Result<StatusSnapshot, JobError>>>>,
    status_calls: Mutex<HashMap<JobId, usize>>,
    status_gates: Mutex<HashMap<JobId, Arc<Notify>>>,
    stream_errors: Mutex<HashMap<JobId, JobError>>,
    stream_calls: Mutex<HashMap<JobId, usize>>,
    stream_gates: Mutex<HashMap<JobId, Arc<Notify>>>,
    listed: Mutex<Vec<AudioJob>>,
    delete_error: Mutex<Option<JobError>>,
    deleted: Mutex<Vec<JobId>>,
}

impl FakeClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_submit(&self, error: JobError) {
        *self.submit_error.lock().unwrap() = Some(error);
    }

    pub fn script_status(&self, job: &str, script: Vec<Result<StatusSnapshot, JobError>>) {
        self.statuses
            .lock()
            .unwrap()
            .insert(JobId::from(job), script.into());
    }

    pub fn status_calls(&self, job: &str) -> usize {
        self.status_calls
            .lock()
            .unwrap()
            .get(&JobId::from(job))
            .copied()
            .unwrap_or(0)
    }

    /// Make status fetches for `job` wait until the returned gate is notified.
    pub fn hold_status(&self, job: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.status_gates
            .lock()
            .unwrap()
            .insert(JobId::from(job), gate.clone());
        gate
    }

    pub fn fail_stream(&self, job: &str, error: JobError) {
        self.stream_errors
            .lock()
            .unwrap()
            .insert(JobId::from(job), error);
    }

    pub fn heal_stream(&self, job: &str) {
        self.stream_errors.lock().unwrap().remove(&JobId::from(job));
    }

    pub fn stream_calls(&self, job: &str) -> usize {
        self.stream_calls
            .lock()
            .unwrap()
            .get(&JobId::from(job))
            .copied()
            .unwrap_or(0)
    }

    pub fn hold_stream(&self, job: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.stream_gates
            .lock()
            .unwrap()
            .insert(JobId::from(job), gate.clone());
        gate
    }

    pub fn set_list(&self, jobs: Vec<AudioJob>) {
        *self.listed.lock().unwrap() = jobs;
    }

    pub fn fail_delete(&self, error: JobError) {
        *self.delete_error.lock().unwrap() = Some(error);
    }

    pub fn deleted(&self) -> Vec<JobId> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobStatusClient for FakeClient {
    async fn submit(&self, _article: &ArticleId, _options: &VoiceOptions) -> Result<JobId, JobError> {
        if let Some(error) = self.submit_error.lock().unwrap().clone() {
            return Err(error);
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(JobId::new(format!("job-{n}")))
    }

    async fn get_status(&self, job_id: &JobId) -> Result<StatusSnapshot, JobError> {
        *self
            .status_calls
            .lock()
            .unwrap()
            .entry(job_id.clone())
            .or_default() += 1;
        let gate = self.status_gates.lock().unwrap().get(job_id).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let mut statuses = self.statuses.lock().unwrap();
        match statuses.get_mut(job_id) {
            Some(script) if script.len() > 1 => script.pop_front().unwrap(),
            Some(script) => script
                .front()
                .cloned()
                .unwrap_or_else(|| Ok(StatusSnapshot::generating(None))),
            None => Ok(StatusSnapshot::generating(None)),
        }
    }

    async fn get_stream(&self, job_id: &JobId) -> Result<AudioStream, JobError> {
        *self
            .stream_calls
            .lock()
            .unwrap()
            .entry(job_id.clone())
            .or_default() += 1;
        let gate = self.stream_gates.lock().unwrap().get(job_id).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if let Some(error) = self.stream_errors.lock().unwrap().get(job_id).cloned() {
            return Err(error);
        }
        Ok(AudioStream::new("audio/mpeg", vec![0xffu8, 0xfb, 0x90, 0x00]))
    }

    async fn list_jobs(&self, _article: &ArticleId) -> Result<Vec<AudioJob>, JobError> {
        Ok(self.listed.lock().unwrap().clone())
    }

    async fn delete(&self, job_id: &JobId) -> Result<(), JobError> {
        if let Some(error) = self.delete_error.lock().unwrap().clone() {
            return Err(error);
        }
        self.deleted.lock().unwrap().push(job_id.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "fake"
    }
}

/// In-memory handles; records every revoke and can be told to fail some.
#[derive(Default)]
pub struct RecordingFactory {
    seq: AtomicUsize,
    fail_create: AtomicBool,
    fail_revoke: Mutex<HashSet<String>>,
    revoked: Mutex<Vec<String>>,
}

impl RecordingFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn fail_revoke_for(&self, job: &str) {
        self.fail_revoke.lock().unwrap().insert(job.to_string());
    }

    pub fn revoked(&self) -> Vec<String> {
        self.revoked.lock().unwrap().clone()
    }
}

impl ResourceFactory for RecordingFactory {
    fn create(&self, job_id: &JobId, audio: &AudioStream) -> Result<ResourceHandle, JobError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(JobError::resolution(job_id, "disk full"));
        }
        let n = self.seq.fetch_add(1, Ordering::SeqCst);
        Ok(ResourceHandle::new(
            format!("mem:{job_id}/{n}"),
            PathBuf::from(format!("/mem/{job_id}/{n}")),
            audio.content_type.clone(),
            audio.bytes.len() as u64,
        ))
    }

    fn revoke(&self, handle: &ResourceHandle) -> std::io::Result<()> {
        self.revoked.lock().unwrap().push(handle.uri().to_string());
        let job = handle
            .uri()
            .trim_start_matches("mem:")
            .split('/')
            .next()
            .unwrap_or_default()
            .to_string();
        if self.fail_revoke.lock().unwrap().contains(&job) {
            return Err(std::io::Error::new(std::io::ErrorKind::Other, "revoke refused"));
        }
        Ok(())
    }
}

pub struct Harness {
    pub client: Arc<FakeClient>,
    pub factory: Arc<RecordingFactory>,
    pub tracker: JobTracker,
    pub events: broadcast::Receiver<TrackerEvent>,
}

pub fn harness() -> Harness {
    let client = FakeClient::new();
    let factory = RecordingFactory::new();
    let tracker = JobTracker::new(
        ArticleId::from(ARTICLE),
        client.clone(),
        factory.clone(),
        TrackerConfig::default(),
    );
    let events = tracker.subscribe();
    Harness {
        client,
        factory,
        tracker,
        events,
    }
}

pub fn listed(id: &str, status: JobStatus, progress: Option<u8>) -> AudioJob {
    AudioJob {
        id: JobId::from(id),
        article_id: ArticleId::from(ARTICLE),
        status,
        progress,
        error_message: None,
        created_at: None,
        file_name: None,
    }
}

pub fn id(raw: &str) -> JobId {
    JobId::from(raw)
}

/// Everything broadcast so far.
pub fn drain(events: &mut broadcast::Receiver<TrackerEvent>) -> Vec<TrackerEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

/// Sleep past `n` poll intervals of the default 3 s schedule.
pub async fn after_ticks(n: u64) {
    tokio::time::sleep(std::time::Duration::from_millis(3_000 * n + 500)).await;
}

//! Locally materialised audio handles.
//!
//! A [`ResourceHandle`] is the client-side analogue of a browser object URL:
//! a revocable local reference to downloaded audio. Handles are created and
//! revoked only through a [`ResourceFactory`], and only the
//! `ResourceHandleCache` calls the factory.

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use article_audio_core::{AudioStream, JobError, JobId};
use tempfile::TempDir;

/// Local, revocable reference to streamable audio.
///
/// Clones share one released flag, so whichever clone is released first
/// releases all of them.
#[derive(Clone)]
pub struct ResourceHandle {
    uri: String,
    path: PathBuf,
    content_type: String,
    len: u64,
    released: Arc<AtomicBool>,
}

impl ResourceHandle {
    pub fn new(uri: impl Into<String>, path: PathBuf, content_type: impl Into<String>, len: u64) -> Self {
        Self {
            uri: uri.into(),
            path,
            content_type: content_type.into(),
            len,
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Where the audio bytes live while the handle is valid.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Flip the released flag. Returns `true` only for the first caller.
    pub(crate) fn mark_released(&self) -> bool {
        !self.released.swap(true, Ordering::AcqRel)
    }
}

impl PartialEq for ResourceHandle {
    fn eq(&self, other: &Self) -> bool {
        self.uri == other.uri
    }
}

impl Eq for ResourceHandle {}

impl fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("uri", &self.uri)
            .field("path", &self.path)
            .field("content_type", &self.content_type)
            .field("len", &self.len)
            .field("released", &self.is_released())
            .finish()
    }
}

/// Creates and revokes resource handles.
pub trait ResourceFactory: Send + Sync {
    /// Materialise `audio` for `job_id`. Failures are `JobError::Resolution`.
    fn create(&self, job_id: &JobId, audio: &AudioStream) -> Result<ResourceHandle, JobError>;

    /// Invalidate a handle's backing resource.
    fn revoke(&self, handle: &ResourceHandle) -> std::io::Result<()>;
}

/// Writes each stream to its own file inside a private temp directory.
///
/// Revoking deletes the file; dropping the factory removes the directory
/// and anything still in it.
pub struct TempFileFactory {
    dir: TempDir,
}

impl TempFileFactory {
    pub fn new() -> std::io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("article-audio-").tempdir()?;
        Ok(Self { dir })
    }

    /// Use a fresh temp directory under `parent`.
    pub fn in_dir(parent: impl AsRef<Path>) -> std::io::Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("article-audio-")
            .tempdir_in(parent)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }
}

impl ResourceFactory for TempFileFactory {
    fn create(&self, job_id: &JobId, audio: &AudioStream) -> Result<ResourceHandle, JobError> {
        let id = uuid::Uuid::new_v4();
        let suffix = format!(".{}", audio.extension());
        let (mut file, path) = tempfile::Builder::new()
            .prefix(&format!("job-{}-", sanitize(job_id.as_str())))
            .suffix(&suffix)
            .tempfile_in(self.dir.path())
            .and_then(|tmp| tmp.keep().map_err(|e| e.error))
            .map_err(|e| JobError::resolution(job_id, e))?;

        file.write_all(&audio.bytes)
            .and_then(|()| file.flush())
            .map_err(|e| {
                let _ = std::fs::remove_file(&path);
                JobError::resolution(job_id, e)
            })?;

        Ok(ResourceHandle::new(
            format!("blob:article-audio/{id}"),
            path,
            audio.content_type.clone(),
            audio.bytes.len() as u64,
        ))
    }

    fn revoke(&self, handle: &ResourceHandle) -> std::io::Result<()> {
        match std::fs::remove_file(handle.path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Keep file names portable whatever the backend uses for ids.
fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(48)
        .collect()
}

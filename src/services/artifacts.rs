use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use uuid::Uuid;

/// Creates and tears down per-job on-disk working files.
///
/// Every path handed out contains the job id plus a random suffix, so
/// concurrent jobs can never collide inside the shared temp root. Artifacts
/// are deleted in `Drop`, which makes cleanup hold on every exit path out of
/// the orchestrator, including early returns and panics.
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, ArtifactError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Acquire a working-file handle for one job. No files are created until
    /// the handle writes them.
    pub fn acquire(&self, job_id: Uuid) -> TempArtifact {
        TempArtifact {
            root: self.root.clone(),
            job_id,
            // Random suffix guards against id reuse across process restarts.
            nonce: Uuid::new_v4().simple().to_string()[..8].to_string(),
            paths: Vec::new(),
        }
    }

    /// Number of files still present for a given job id. Used by tests to
    /// assert the zero-leftovers guarantee.
    pub fn remaining(&self, job_id: Uuid) -> Result<usize, ArtifactError> {
        let needle = job_id.to_string();
        let mut count = 0;
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_name().to_string_lossy().contains(&needle) {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Probe that the temp root is writable (health check).
    pub fn probe(&self) -> Result<(), ArtifactError> {
        let path = self.root.join(format!("probe-{}", Uuid::new_v4().simple()));
        fs::write(&path, b"ok")?;
        fs::remove_file(&path)?;
        Ok(())
    }
}

/// Working files owned exclusively by a single job for its lifetime.
pub struct TempArtifact {
    root: PathBuf,
    job_id: Uuid,
    nonce: String,
    paths: Vec<PathBuf>,
}

impl TempArtifact {
    /// Write one named artifact (e.g. "original.png") and register it for
    /// cleanup. Returns the path it landed at.
    pub fn write(&mut self, name: &str, bytes: &[u8]) -> Result<PathBuf, ArtifactError> {
        let path = self
            .root
            .join(format!("{}-{}-{}", self.job_id, self.nonce, name));
        fs::write(&path, bytes)?;
        self.paths.push(path.clone());
        Ok(path)
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        for path in &self.paths {
            match fs::remove_file(path) {
                Ok(()) => {}
                // Already gone is fine; release must not fail twice over.
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(job_id = %self.job_id, path = %path.display(), error = %e,
                        "failed to remove temp artifact");
                }
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("temp storage I/O error: {0}")]
    Io(#[from] io::Error),
}

//! Per-job staging directories.

use std::io;
use std::path::{Path, PathBuf};

/// Root under which every job gets its own staging directory.
#[derive(Debug, Clone)]
pub struct StagingRoot {
    root: PathBuf,
}

impl StagingRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Returns the directory a job with `job_id` would use.
    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.root.join(format!("job-{job_id}"))
    }

    /// Creates an exclusive, empty directory for `job_id`.
    ///
    /// The root is created if missing. Fails with `AlreadyExists` if the
    /// job directory is already present, so two jobs never share one.
    pub fn acquire(&self, job_id: &str) -> io::Result<StagingArea> {
        std::fs::create_dir_all(&self.root)?;

        let dir = self.job_dir(job_id);
        std::fs::create_dir(&dir)?;
        // From here on, dropping the area removes the directory.
        let area = StagingArea {
            dir,
            released: false,
        };

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(area.path(), std::fs::Permissions::from_mode(0o700))?;
        }

        tracing::debug!(dir = %area.path().display(), "staging area acquired");
        Ok(area)
    }
}

/// A job's staging directory. Removed on [`release`](Self::release) or drop.
#[derive(Debug)]
pub struct StagingArea {
    dir: PathBuf,
    released: bool,
}

impl StagingArea {
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Path of `name` inside the staging directory.
    pub fn join(&self, name: impl AsRef<Path>) -> PathBuf {
        self.dir.join(name)
    }

    /// Recursively deletes the staging directory.
    ///
    /// Idempotent: a directory that is already (partly or fully) gone is
    /// not an error.
    pub fn release(&mut self) -> io::Result<()> {
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => {
                tracing::debug!(dir = %self.dir.display(), "staging area released");
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        self.released = true;
        Ok(())
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl Drop for StagingArea {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.release() {
            tracing::warn!(dir = %self.dir.display(), error = %e, "failed to release staging area");
        }
    }
}

use crate::error::Error;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Exclusive advisory lock held for the length of one sync run.
///
/// Sidecar writes are full replacements, so two overlapping runs could
/// interleave their refreshes and writes. The OS releases the lock if the
/// process dies, so a leftover file never blocks the next run.
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    pub fn acquire(path: &Path) -> Result<Self, Error> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)?;
        if file.try_lock_exclusive().is_err() {
            return Err(Error::Locked(path.to_path_buf()));
        }
        let mut lock = Self {
            file,
            path: path.to_path_buf(),
        };
        lock.write_pid()?;
        debug!("Acquired run lock {}", path.display());
        Ok(lock)
    }

    fn write_pid(&mut self) -> Result<(), Error> {
        self.file.set_len(0)?;
        writeln!(self.file, "{}", std::process::id())?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            warn!("Failed to release run lock {}: {}", self.path.display(), e);
        }
    }
}

//! Per-base exclusive lock.
//!
//! The lock lives on a `.jlk` sidecar rather than on one of the four data files,
//! because pack replaces those files and a lock on a replaced inode guards nothing.
//! Every [`BaseLock`] opens the sidecar separately, so two handles on the same base
//! contend even inside one process.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;
use log::{debug, warn};

use super::errors::JamError;
use crate::metrics;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

pub struct BaseLock {
    path: PathBuf,
    file: File,
    depth: u32,
    timeout: Duration,
}

impl BaseLock {
    pub fn open(path: &Path, timeout: Duration) -> Result<Self, JamError> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            depth: 0,
            timeout,
        })
    }

    pub fn is_held(&self) -> bool {
        self.depth > 0
    }

    /// Acquire, waiting up to the timeout. Nested acquisitions on the same handle only count.
    pub fn acquire(&mut self) -> Result<(), JamError> {
        if self.depth > 0 {
            self.depth += 1;
            return Ok(());
        }
        let deadline = Instant::now() + self.timeout;
        loop {
            match self.file.try_lock_exclusive() {
                Ok(()) => break,
                Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                    if Instant::now() >= deadline {
                        warn!(
                            "Timed out after {:?} waiting for {}",
                            self.timeout,
                            self.path.display()
                        );
                        metrics::inc_lock_timeouts();
                        return Err(JamError::Locked(self.path.clone()));
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Err(e) => return Err(JamError::Io(e)),
            }
        }
        debug!("Acquired {}", self.path.display());
        self.depth = 1;
        Ok(())
    }

    /// Release one level; the file lock drops with the outermost level.
    pub fn release(&mut self) -> Result<(), JamError> {
        match self.depth {
            0 => Ok(()),
            1 => {
                self.depth = 0;
                self.file.unlock()?;
                debug!("Released {}", self.path.display());
                Ok(())
            }
            _ => {
                self.depth -= 1;
                Ok(())
            }
        }
    }
}

impl Drop for BaseLock {
    fn drop(&mut self) {
        if self.depth > 0 {
            let _ = self.file.unlock();
        }
    }
}

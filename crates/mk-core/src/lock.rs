//! Cross-process machine lock.
//!
//! One advisory lock file per machine name under `<home>/locks`. Every process that
//! starts a host for the same machine name on this host serializes on it; the lock
//! does not coordinate across hosts.

use std::{
    fs::File,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use tracing::{debug, info, trace};

use crate::error::{CoreError, ErrorKind};

/// How long a single start waits for another process holding the same machine.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(15 * 60);
/// Poll interval while the lock is held elsewhere.
pub const DEFAULT_LOCK_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockSpec {
    pub dir: PathBuf,
    pub timeout: Duration,
    pub delay: Duration,
}

impl LockSpec {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            timeout: DEFAULT_LOCK_TIMEOUT,
            delay: DEFAULT_LOCK_DELAY,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Lock file for `name`; path separators are replaced.
    pub fn path_for(&self, name: &str) -> PathBuf {
        let safe: String = name
            .chars()
            .map(|c| if matches!(c, '/' | '\\') { '_' } else { c })
            .collect();
        self.dir.join(format!("{safe}.lock"))
    }
}

/// Held machine lock. Released on drop or by [`MachineLock::release`].
#[derive(Debug)]
pub struct MachineLock {
    name: String,
    path: PathBuf,
    file: Option<File>,
    acquired_at: Instant,
    waited: Duration,
}

impl MachineLock {
    /// Blocks until the lock is held or `spec.timeout` elapses.
    pub async fn acquire(name: &str, spec: &LockSpec) -> Result<Self, CoreError> {
        std::fs::create_dir_all(&spec.dir).map_err(|e| {
            CoreError::with_source(ErrorKind::Lock, e).context(format!("create {}", spec.dir.display()))
        })?;

        let path = spec.path_for(name);
        let start = Instant::now();
        let deadline = start + spec.timeout;
        info!(name, path = %path.display(), timeout = ?spec.timeout, "acquiring machines lock");

        loop {
            match sys::try_lock(&path) {
                Ok(Some(file)) => {
                    let waited = start.elapsed();
                    info!(name, ?waited, "acquired machines lock");
                    return Ok(Self {
                        name: name.to_string(),
                        path,
                        file: Some(file),
                        acquired_at: Instant::now(),
                        waited,
                    });
                }
                Ok(None) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(CoreError::new(
                            ErrorKind::LockTimeout,
                            format!(
                                "timed out after {:?} waiting for lock on {}",
                                spec.timeout,
                                path.display()
                            ),
                        ));
                    }
                    trace!(name, "lock held elsewhere, retrying");
                    tokio::time::sleep(spec.delay.min(deadline - now)).await;
                }
                Err(e) => {
                    return Err(CoreError::with_source(ErrorKind::Lock, e)
                        .context(format!("lock {}", path.display())));
                }
            }
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Time spent waiting before the lock was obtained.
    #[inline]
    pub fn waited(&self) -> Duration {
        self.waited
    }

    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    pub fn release(mut self) {
        self.unlock();
    }

    fn unlock(&mut self) {
        if let Some(file) = self.file.take() {
            sys::unlock(&file, &self.path);
            debug!(name = %self.name, held = ?self.acquired_at.elapsed(), "released machines lock");
        }
    }
}

impl Drop for MachineLock {
    fn drop(&mut self) {
        self.unlock();
    }
}

#[cfg(unix)]
mod sys {
    use std::{
        fs::{File, OpenOptions},
        io,
        os::fd::AsRawFd,
        path::Path,
    };

    /// `Ok(None)` when another holder has it.
    pub fn try_lock(path: &Path) -> io::Result<Option<File>> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)?;

        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc == 0 {
            return Ok(Some(file));
        }
        let err = io::Error::last_os_error();
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => Ok(None),
            _ => Err(err),
        }
    }

    pub fn unlock(file: &File, _path: &Path) {
        unsafe {
            libc::flock(file.as_raw_fd(), libc::LOCK_UN);
        }
    }
}

#[cfg(not(unix))]
mod sys {
    use std::{
        fs::{File, OpenOptions},
        io,
        path::Path,
    };

    pub fn try_lock(path: &Path) -> io::Result<Option<File>> {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(f) => Ok(Some(f)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn unlock(_file: &File, path: &Path) {
        if let Err(e) = std::fs::remove_file(path) {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove lock file");
        }
    }
}

//! Scoped exclusive access to a file shared between processes.
//!
//! The lock is a sibling `<path>.lock` file created with `O_EXCL`. Holders
//! write their pid and acquisition time into it; a lock whose mtime is older
//! than the staleness threshold is presumed abandoned and reclaimed. The
//! guard removes the lock file on drop, so release happens on every exit
//! path including early returns and panics.
//!
//! All calls block the current thread; async callers wrap them in
//! `spawn_blocking`.

use std::{
    fs::{self, OpenOptions},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use {
    rand::Rng,
    tracing::{debug, warn},
};

#[cfg(feature = "metrics")]
use courier_metrics::{counter, session as session_metrics};

use crate::{Error, Result};

/// Retry and staleness parameters for [`FileLock::acquire`].
#[derive(Debug, Clone)]
pub struct LockOptions {
    /// Retries after the first failed attempt.
    pub retries: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    /// Multiply each delay by a random value in `[1, 2)`.
    pub randomize: bool,
    /// Age after which an existing lock is reclaimed.
    pub stale: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            retries: 10,
            min_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            factor: 2.0,
            randomize: true,
            stale: Duration::from_secs(30),
        }
    }
}

impl LockOptions {
    /// Delay before retry number `retry` (0-based).
    fn delay(&self, retry: u32) -> Duration {
        let base = self.min_delay.as_millis() as f64 * self.factor.powi(retry as i32);
        let scaled = if self.randomize {
            base * rand::rng().random_range(1.0..2.0)
        } else {
            base
        };
        let capped = scaled.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }
}

/// Held lock. Dropping it releases the lock.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
}

impl FileLock {
    /// Lock path guarding `target`.
    #[must_use]
    pub fn lock_path(target: &Path) -> PathBuf {
        let mut name = target.as_os_str().to_os_string();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Acquire exclusive access to `target`, retrying with backoff.
    pub fn acquire(target: &Path, options: &LockOptions) -> Result<Self> {
        let path = Self::lock_path(target);
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let mut retry = 0;
        loop {
            match Self::try_create(&path) {
                Ok(()) => return Ok(Self { path }),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {},
                Err(e) => return Err(e.into()),
            }

            if Self::reclaim_if_stale(&path, options.stale) {
                continue;
            }

            if retry >= options.retries {
                warn!(path = %path.display(), attempts = retry + 1, "lock acquisition timed out");
                return Err(Error::LockTimeout {
                    path,
                    attempts: retry + 1,
                });
            }

            #[cfg(feature = "metrics")]
            counter!(session_metrics::LOCK_CONTENDED_TOTAL).increment(1);

            let delay = options.delay(retry);
            debug!(path = %path.display(), retry, delay_ms = delay.as_millis() as u64, "lock busy, retrying");
            std::thread::sleep(delay);
            retry += 1;
        }
    }

    fn try_create(path: &Path) -> std::io::Result<()> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        let stamp = courier_common::types::now_ms();
        writeln!(file, "{} {stamp}", std::process::id())?;
        Ok(())
    }

    /// Remove the lock if its mtime is older than `stale`. Returns `true`
    /// when the caller should retry immediately.
    fn reclaim_if_stale(path: &Path, stale: Duration) -> bool {
        let modified = match fs::metadata(path).and_then(|m| m.modified()) {
            Ok(m) => m,
            // Released between our create attempt and this check.
            Err(e) if e.kind() == ErrorKind::NotFound => return true,
            Err(_) => return false,
        };
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or_default();
        if age < stale {
            return false;
        }
        warn!(path = %path.display(), age_ms = age.as_millis() as u64, "reclaiming stale lock");
        #[cfg(feature = "metrics")]
        counter!(session_metrics::LOCK_RECLAIMED_TOTAL).increment(1);
        match fs::remove_file(path) {
            Ok(()) => true,
            Err(e) => e.kind() == ErrorKind::NotFound,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path)
            && e.kind() != ErrorKind::NotFound
        {
            warn!(path = %self.path.display(), error = %e, "failed to release lock");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn fast() -> LockOptions {
        LockOptions {
            retries: 2,
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            factor: 2.0,
            randomize: false,
            stale: Duration::from_secs(30),
        }
    }

    #[test]
    fn guard_releases_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("sessions.json");
        {
            let guard = FileLock::acquire(&target, &fast()).unwrap();
            assert!(guard.path().exists());
        }
        assert!(!FileLock::lock_path(&target).exists());
        // Re-acquirable after release.
        FileLock::acquire(&target, &fast()).unwrap();
    }

    #[test]
    fn contended_lock_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("sessions.json");
        let _held = FileLock::acquire(&target, &fast()).unwrap();
        let err = FileLock::acquire(&target, &fast()).unwrap_err();
        match err {
            Error::LockTimeout { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn stale_lock_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("sessions.json");
        let lock = FileLock::lock_path(&target);
        fs::write(&lock, "99999 0\n").unwrap();

        let options = LockOptions {
            stale: Duration::ZERO,
            ..fast()
        };
        let guard = FileLock::acquire(&target, &options).unwrap();
        let contents = fs::read_to_string(guard.path()).unwrap();
        assert!(contents.starts_with(&std::process::id().to_string()));
    }

    #[test]
    fn release_runs_on_error_path() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("sessions.json");
        let failing = || -> Result<()> {
            let _guard = FileLock::acquire(&target, &fast())?;
            Err(Error::message("boom"))
        };
        assert!(failing().is_err());
        assert!(!FileLock::lock_path(&target).exists());
    }

    #[test]
    fn delay_is_capped() {
        let options = LockOptions {
            randomize: true,
            ..LockOptions::default()
        };
        for retry in 0..10 {
            assert!(options.delay(retry) <= options.max_delay);
            assert!(options.delay(retry) >= options.min_delay.min(options.max_delay));
        }
    }
}

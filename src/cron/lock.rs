//! Mutual exclusion for the scheduled-job path.
//!
//! The production lock is an OS advisory lock on a file at a fixed path, so
//! independent processes (a worker loop and a one-shot `cron` invocation)
//! exclude each other. If the holder dies the OS drops the advisory lock with
//! the process; the leftover file carries no meaning and the next acquisition
//! truncates it.

use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use fs2::FileExt;

/// Non-blocking exclusive lock. `Ok(None)` means another holder has it.
pub trait CronLock: Send + Sync {
    fn try_acquire(&self) -> io::Result<Option<Box<dyn CronLockGuard>>>;
}

/// Held lock. Dropping it releases the OS lock; `release` additionally
/// removes the backing file so the next acquisition starts clean.
pub trait CronLockGuard: Send {
    fn release(self: Box<Self>) -> io::Result<()>;
}

/// Advisory file lock.
pub struct FileLock {
    path: PathBuf,
}

impl FileLock {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl CronLock for FileLock {
    fn try_acquire(&self) -> io::Result<Option<Box<dyn CronLockGuard>>> {
        // Reopen and truncate every time; stale content from a crashed
        // holder is meaningless.
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Box::new(FileLockGuard {
                file,
                path: self.path.clone(),
            }))),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(err) => Err(err),
        }
    }
}

struct FileLockGuard {
    file: std::fs::File,
    path: PathBuf,
}

impl CronLockGuard for FileLockGuard {
    fn release(self: Box<Self>) -> io::Result<()> {
        FileExt::unlock(&self.file)?;
        std::fs::remove_file(&self.path)
    }
}

/// In-memory substitute for single-process test runs.
#[derive(Default)]
pub struct MemoryLock {
    held: Arc<AtomicBool>,
}

impl MemoryLock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CronLock for MemoryLock {
    fn try_acquire(&self) -> io::Result<Option<Box<dyn CronLockGuard>>> {
        let acquired = self
            .held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if acquired {
            Ok(Some(Box::new(MemoryLockGuard {
                held: self.held.clone(),
            })))
        } else {
            Ok(None)
        }
    }
}

struct MemoryLockGuard {
    held: Arc<AtomicBool>,
}

impl CronLockGuard for MemoryLockGuard {
    fn release(self: Box<Self>) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for MemoryLockGuard {
    fn drop(&mut self) {
        self.held.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_lock_is_exclusive_until_released() {
        let lock = MemoryLock::new();
        let guard = lock.try_acquire().unwrap().expect("first acquisition");
        assert!(lock.try_acquire().unwrap().is_none());

        guard.release().unwrap();
        assert!(lock.try_acquire().unwrap().is_some());
    }

    #[test]
    fn file_lock_contention_and_cleanup() {
        let path = std::env::temp_dir().join(format!(
            "gamebot-lock-test-{}.lock",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);

        let lock = FileLock::new(path.clone());
        let guard = lock.try_acquire().unwrap().expect("first acquisition");

        // Same-process flock re-acquisition behaviour is platform-dependent,
        // so only the release contract is asserted here; cross-process
        // exclusion is covered by the runner tests through the trait.
        guard.release().unwrap();
        assert!(!path.exists());
    }
}

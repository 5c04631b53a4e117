//! Scheduled-job execution, guarded against overlapping runs.

pub mod lock;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::config::CronGroup;
use crate::error::KernelError;
use self::lock::CronLock;

/// Executes an ordered batch of scheduled jobs. Job-level failure handling
/// belongs to the implementation, not the runner.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn run_jobs(&self, jobs: &[String]) -> Result<(), KernelError>;
}

/// What a single `run_once` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CronOutcome {
    /// Ran the flattened job list; carries the job count.
    Ran(usize),

    /// Another run holds the lock; nothing was executed.
    Skipped,
}

/// Runs the due scheduled jobs exactly once, under the lock.
pub struct ScheduledJobRunner {
    groups: Vec<CronGroup>,
    lock: Arc<dyn CronLock>,
    executor: Arc<dyn JobExecutor>,

    /// Whether an operator is watching; controls the "already running"
    /// notice on contention.
    interactive: bool,
}

impl ScheduledJobRunner {
    pub fn new(
        groups: Vec<CronGroup>,
        lock: Arc<dyn CronLock>,
        executor: Arc<dyn JobExecutor>,
        interactive: bool,
    ) -> Self {
        Self {
            groups,
            lock,
            executor,
            interactive,
        }
    }

    /// Run all configured jobs once.
    ///
    /// Contention is expected and not an error: overlapping runs are dropped,
    /// not queued. An empty job list is a misconfiguration and fails.
    pub async fn run_once(&self) -> Result<CronOutcome, KernelError> {
        let Some(guard) = self.lock.try_acquire()? else {
            if self.interactive {
                println!("There is already another cron task running in the background!");
            }
            return Ok(CronOutcome::Skipped);
        };

        let jobs = flatten_groups(&self.groups);
        if jobs.is_empty() {
            return Err(KernelError::config("no scheduled jobs configured"));
        }

        debug!(count = jobs.len(), "running scheduled jobs");
        self.executor.run_jobs(&jobs).await?;

        guard.release()?;
        Ok(CronOutcome::Ran(jobs.len()))
    }
}

/// Concatenate all groups into one ordered job list: group order first, then
/// within-group order. Deliberately no deduplication; a job listed twice
/// runs twice.
pub fn flatten_groups(groups: &[CronGroup]) -> Vec<String> {
    groups
        .iter()
        .flat_map(|group| group.jobs.iter().cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::lock::MemoryLock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingExecutor {
        calls: AtomicUsize,
        last_batch: std::sync::Mutex<Vec<String>>,
    }

    impl RecordingExecutor {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                last_batch: std::sync::Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl JobExecutor for RecordingExecutor {
        async fn run_jobs(&self, jobs: &[String]) -> Result<(), KernelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_batch.lock().unwrap() = jobs.to_vec();
            Ok(())
        }
    }

    fn groups(spec: &[(&str, &[&str])]) -> Vec<CronGroup> {
        spec.iter()
            .map(|(name, jobs)| CronGroup {
                name: name.to_string(),
                jobs: jobs.iter().map(|j| j.to_string()).collect(),
            })
            .collect()
    }

    #[test]
    fn flatten_preserves_group_then_job_order() {
        let flat = flatten_groups(&groups(&[
            ("default", &["/a", "/b"]),
            ("extra", &["/c", "/a"]),
        ]));
        // No deduplication: /a appears twice.
        assert_eq!(flat, vec!["/a", "/b", "/c", "/a"]);
    }

    #[tokio::test]
    async fn run_once_executes_flattened_list_in_one_call() {
        let executor = RecordingExecutor::new();
        let runner = ScheduledJobRunner::new(
            groups(&[("default", &["/a", "/b"])]),
            Arc::new(MemoryLock::new()),
            executor.clone(),
            false,
        );

        assert_eq!(runner.run_once().await.unwrap(), CronOutcome::Ran(2));
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
        assert_eq!(*executor.last_batch.lock().unwrap(), vec!["/a", "/b"]);
    }

    #[tokio::test]
    async fn empty_job_set_is_a_config_error() {
        let executor = RecordingExecutor::new();
        let runner = ScheduledJobRunner::new(
            Vec::new(),
            Arc::new(MemoryLock::new()),
            executor.clone(),
            false,
        );

        assert!(matches!(
            runner.run_once().await,
            Err(KernelError::Config(_))
        ));
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn contended_run_skips_without_error_or_side_effects() {
        let lock = Arc::new(MemoryLock::new());
        let held = lock.try_acquire().unwrap().expect("hold the lock");

        let executor = RecordingExecutor::new();
        let runner = ScheduledJobRunner::new(
            groups(&[("default", &["/a"])]),
            lock.clone(),
            executor.clone(),
            false,
        );

        assert_eq!(runner.run_once().await.unwrap(), CronOutcome::Skipped);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);

        held.release().unwrap();
        assert_eq!(runner.run_once().await.unwrap(), CronOutcome::Ran(1));
    }

    #[tokio::test]
    async fn lock_is_released_after_a_run() {
        let lock = Arc::new(MemoryLock::new());
        let runner = ScheduledJobRunner::new(
            groups(&[("default", &["/a"])]),
            lock.clone(),
            RecordingExecutor::new(),
            false,
        );

        runner.run_once().await.unwrap();
        assert!(lock.try_acquire().unwrap().is_some());
    }
}

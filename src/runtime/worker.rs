//! Minute-granularity scheduler loop.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::cron::ScheduledJobRunner;
use crate::utils::timestamp;

const DEFAULT_INTERVAL_SECS: i64 = 60;
const DEBUG_INTERVAL_SECS: i64 = 3;

/// Upper bound on any single sleep, so the loop notices cancellation within
/// this window even when the next run is far away.
const POLL_GRANULARITY_SECS: i64 = 10;

/// Drives [`ScheduledJobRunner`] on a fixed cadence.
///
/// `last_run` is reset to the time a run actually starts, so job execution
/// time stretches the effective interval. That drift is accepted; runs are
/// not aligned to wall-clock boundaries.
pub struct WorkerLoop {
    runner: ScheduledJobRunner,
    interval: i64,
    granularity: i64,
}

impl WorkerLoop {
    pub fn new(runner: ScheduledJobRunner, debug: bool) -> Self {
        Self {
            runner,
            interval: if debug {
                DEBUG_INTERVAL_SECS
            } else {
                DEFAULT_INTERVAL_SECS
            },
            granularity: POLL_GRANULARITY_SECS,
        }
    }

    pub async fn run(&self, cancel: CancellationToken) {
        println!("[{}] Initializing worker...", timestamp());

        // Monotonic seconds since loop start; tokio's clock also makes the
        // timing testable under paused time.
        let start = tokio::time::Instant::now();
        let elapsed = |at: tokio::time::Instant| at.duration_since(start).as_secs() as i64;
        let mut last_run = 0i64;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let now = elapsed(tokio::time::Instant::now());
            if let Some(sleep_secs) = sleep_before_due(now, last_run, self.interval, self.granularity)
            {
                let remaining = last_run + self.interval - now;
                println!(
                    "[{}] Next run in {remaining} seconds, sleeping for {sleep_secs} seconds...",
                    timestamp()
                );
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(sleep_secs as u64)) => {}
                }
                continue;
            }

            println!("[{}] Running...", timestamp());
            last_run = elapsed(tokio::time::Instant::now());

            // A failed run must not kill the loop; misconfiguration shows up
            // in the log on every tick until fixed.
            if let Err(err) = self.runner.run_once().await {
                println!("[{}] Scheduled run failed: {err}", timestamp());
            }

            println!("[{}] Finished!", timestamp());
        }
    }
}

/// How long to sleep before the next run is due, or `None` when due now.
/// Sleeps are capped at `granularity` so the loop stays responsive.
fn sleep_before_due(now: i64, last_run: i64, interval: i64, granularity: i64) -> Option<i64> {
    let due_at = last_run + interval;
    if now >= due_at {
        return None;
    }
    Some((due_at - now).min(granularity))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::config::CronGroup;
    use crate::cron::lock::MemoryLock;
    use crate::cron::{JobExecutor, ScheduledJobRunner};
    use crate::error::KernelError;

    #[test]
    fn sleep_is_capped_at_the_poll_granularity() {
        // 5 seconds into a 60 second interval: 55 remain, capped to 10.
        assert_eq!(sleep_before_due(1005, 1000, 60, 10), Some(10));
    }

    #[test]
    fn short_remainder_sleeps_exactly_the_remainder() {
        assert_eq!(sleep_before_due(1057, 1000, 60, 10), Some(3));
    }

    #[test]
    fn due_now_or_overdue_does_not_sleep() {
        assert_eq!(sleep_before_due(1060, 1000, 60, 10), None);
        assert_eq!(sleep_before_due(1100, 1000, 60, 10), None);
    }

    struct CountingExecutor {
        runs: Arc<AtomicUsize>,
        limit: usize,
        cancel: CancellationToken,
    }

    #[async_trait]
    impl JobExecutor for CountingExecutor {
        async fn run_jobs(&self, _jobs: &[String]) -> Result<(), KernelError> {
            if self.runs.fetch_add(1, Ordering::SeqCst) + 1 >= self.limit {
                self.cancel.cancel();
            }
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn worker_keeps_invoking_the_runner_until_cancelled() {
        let cancel = CancellationToken::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let executor = Arc::new(CountingExecutor {
            runs: runs.clone(),
            limit: 2,
            cancel: cancel.clone(),
        });

        let runner = ScheduledJobRunner::new(
            vec![CronGroup {
                name: "default".to_string(),
                jobs: vec!["/a".to_string()],
            }],
            Arc::new(MemoryLock::new()),
            executor,
            false,
        );

        // Debug interval (3 s); paused time auto-advances through the sleeps.
        WorkerLoop::new(runner, true).run(cancel).await;

        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }
}

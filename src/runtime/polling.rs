//! Long-polling loop driver.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::telegram::UpdateSource;
use crate::utils::{format_bytes, peak_rss_bytes, timestamp};

/// Sleep between polling rounds, matching the upstream cadence of roughly
/// three polls per second.
const POLL_PAUSE: Duration = Duration::from_millis(333);

/// Repeatedly asks the platform for new updates until cancelled.
///
/// A failed round is logged and survived; the loop has no other exit than
/// the cancellation signal.
pub struct PollingLoop<S: UpdateSource> {
    source: S,
    pause: Duration,
}

impl<S: UpdateSource> PollingLoop<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            pause: POLL_PAUSE,
        }
    }

    #[cfg(test)]
    fn with_pause(source: S, pause: Duration) -> Self {
        Self { source, pause }
    }

    pub async fn run(&self, cancel: CancellationToken) {
        println!("[{}] Running with getUpdates method...", timestamp());

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.source.poll().await {
                Ok(0) => {}
                Ok(count) => {
                    let memory = peak_rss_bytes()
                        .map(|b| format!(" (peak memory usage: {})", format_bytes(b)))
                        .unwrap_or_default();
                    println!("[{}] Processed {count} updates!{memory}", timestamp());
                }
                Err(err) => {
                    println!("[{}] Failed to process updates!", timestamp());
                    println!("Error: {err}");
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.pause) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::error::KernelError;

    /// Fails the first round, then succeeds, cancelling after `limit` rounds.
    struct FlakySource {
        rounds: AtomicUsize,
        limit: usize,
        cancel: CancellationToken,
    }

    #[async_trait]
    impl UpdateSource for FlakySource {
        async fn poll(&self) -> Result<usize, KernelError> {
            let round = self.rounds.fetch_add(1, Ordering::SeqCst) + 1;
            if round >= self.limit {
                self.cancel.cancel();
            }
            if round == 1 {
                Err(KernelError::Upstream("boom".into()))
            } else {
                Ok(1)
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn a_failed_round_does_not_stop_the_next_one() {
        let cancel = CancellationToken::new();
        let source = FlakySource {
            rounds: AtomicUsize::new(0),
            limit: 3,
            cancel: cancel.clone(),
        };

        let looper = PollingLoop::with_pause(source, Duration::from_millis(1));
        looper.run(cancel).await;

        // Round 1 failed; rounds 2 and 3 still happened.
        assert_eq!(looper.source.rounds.load(Ordering::SeqCst), 3);
    }
}

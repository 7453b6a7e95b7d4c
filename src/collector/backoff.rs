//! Flood-wait retry and request pacing

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::warn;

use crate::error::{Error, Result};
use crate::metrics;

/// Flood-wait bookkeeping for one collection run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FloodStats {
    pub waits: u32,
    pub waited_secs: u64,
}

/// Retries an operation while Telegram answers with FLOOD_WAIT.
#[derive(Debug, Clone)]
pub struct FloodBackoff {
    max_retries: u32,
    max_wait_secs: u32,
}

impl FloodBackoff {
    pub fn new(max_retries: u32, max_wait_secs: u32) -> Self {
        Self {
            max_retries,
            max_wait_secs,
        }
    }

    /// Run `op`, sleeping `seconds + 1` after each flood wait.
    ///
    /// Gives up with the flood error once retries are exhausted or the
    /// requested wait exceeds the configured ceiling.
    pub async fn run<T, F, Fut>(&self, stats: &mut FloodStats, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Err(Error::FloodWait(seconds)) => {
                    if attempt >= self.max_retries || seconds > self.max_wait_secs {
                        warn!(
                            "Flood wait of {}s not retried (attempt {}/{})",
                            seconds, attempt, self.max_retries
                        );
                        return Err(Error::FloodWait(seconds));
                    }
                    attempt += 1;
                    let wait = u64::from(seconds) + 1;
                    warn!("Rate limit hit, waiting {}s (retry {})", wait, attempt);
                    metrics::record_flood_wait(seconds);
                    stats.waits += 1;
                    stats.waited_secs += wait;
                    sleep(Duration::from_secs(wait)).await;
                }
                other => return other,
            }
        }
    }
}

/// Fixed delay between paginated requests with a little jitter.
#[derive(Debug, Clone)]
pub struct Pacer {
    delay: Duration,
}

impl Pacer {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    /// Next pause: the base delay scaled by 90-115%.
    pub fn next_pause(&self, rng: &mut impl Rng) -> Duration {
        if self.delay.is_zero() {
            return Duration::ZERO;
        }
        let percent: u32 = rng.gen_range(90..=115);
        self.delay * percent / 100
    }

    pub async fn pause(&self) {
        let pause = self.next_pause(&mut rand::thread_rng());
        if !pause.is_zero() {
            sleep(pause).await;
        }
    }
}

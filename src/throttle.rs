//! Inter-batch pause
//!
//! The runner sleeps between batches to keep request cadence against the target
//! service low. With jitter enabled the pause is stretched by a random factor in
//! `[1, 2]`, so batches do not start on a fixed beat.

use rand::Rng;
use std::time::Duration;

use crate::config::StageConfig;

/// Pause applied after each batch of a stage
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Throttle {
    delay: Duration,
    jitter: bool,
}

impl Throttle {
    /// Fixed or jittered pause of at least `delay`
    pub fn new(delay: Duration, jitter: bool) -> Self {
        Self { delay, jitter }
    }

    /// Throttle configured for a stage
    pub fn from_stage(settings: &StageConfig) -> Self {
        Self::new(settings.batch_delay, settings.delay_jitter)
    }

    /// Duration of the next pause
    pub fn next_delay(&self) -> Duration {
        if self.jitter {
            add_jitter(self.delay)
        } else {
            self.delay
        }
    }

    /// Sleep for the next pause; returns immediately for a zero delay
    pub async fn pause(&self) {
        let delay = self.next_delay();
        if delay.is_zero() {
            return;
        }
        tracing::debug!(delay_ms = delay.as_millis() as u64, "Pausing before next batch");
        tokio::time::sleep(delay).await;
    }
}

/// Stretch `delay` by a uniform random factor between 1x and 2x
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    let jittered_secs = delay.as_secs_f64() * (1.0 + jitter_factor);
    Duration::from_secs_f64(jittered_secs)
}

//! Send-rate pacing shared by every worker of one replay job.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Spaces publishes so a job sends at most `rate` records per second.
///
/// The rate is read on every call so an update applies to the next record.
/// A rate of zero disables pacing.
#[derive(Debug)]
pub struct Pacer {
    rate: AtomicU64,
    next_slot: Mutex<Option<Instant>>,
}

impl Pacer {
    pub fn new(rate: u64) -> Self {
        Self {
            rate: AtomicU64::new(rate),
            next_slot: Mutex::new(None),
        }
    }

    pub fn rate(&self) -> u64 {
        self.rate.load(Ordering::Relaxed)
    }

    pub fn set_rate(&self, rate: u64) {
        self.rate.store(rate, Ordering::Relaxed);
    }

    /// Wait for the next send slot
    pub async fn acquire(&self) {
        let rate = self.rate();
        if rate == 0 {
            *self.next_slot.lock().await = None;
            return;
        }

        let interval = Duration::from_secs_f64(1.0 / rate as f64);
        let slot = {
            let mut next_slot = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = match *next_slot {
                Some(at) if at > now => at,
                _ => now,
            };
            *next_slot = Some(slot + interval);
            slot
        };

        tokio::time::sleep_until(slot).await;
    }
}

#[cfg(test)]
#[path = "pacer_tests.rs"]
mod tests;

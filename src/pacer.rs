//! Shared bandwidth pacer.
//!
//! Every chunk body the engine reads goes through one pacer, so the combined
//! send rate of all concurrent workers stays under the configured cap. The
//! pacer never fails a request; it only delays the caller until the byte
//! budget covers it.

use crate::config::PacingConfig;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Token-bucket byte throttle shared across workers.
///
/// The budget replenishes continuously at the target rate and is capped at
/// one second of bytes. Requests deduct unconditionally; a caller that
/// drives the budget negative sleeps until the deficit is repaid, which
/// spaces out everyone behind it.
#[derive(Debug)]
pub struct Pacer {
    bytes_per_second: Option<u64>,
    budget: Mutex<Budget>,
}

#[derive(Debug)]
struct Budget {
    /// Bytes currently available. Negative while paying off a deficit.
    available: f64,
    last_refill: Instant,
}

impl Pacer {
    /// Create a pacer capped at `bytes_per_second`. The bucket starts full.
    pub fn new(bytes_per_second: u64) -> Self {
        Self {
            bytes_per_second: Some(bytes_per_second),
            budget: Mutex::new(Budget {
                available: bytes_per_second as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Create a pacer that admits everything immediately.
    pub fn unlimited() -> Self {
        Self {
            bytes_per_second: None,
            budget: Mutex::new(Budget {
                available: 0.0,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Build a pacer from the pacing section of the engine config.
    pub fn from_config(pacing: &PacingConfig) -> Self {
        match pacing.bytes_per_second {
            Some(rate) => Self::new(rate),
            None => Self::unlimited(),
        }
    }

    /// Wait until `bytes` fit inside the rate budget.
    ///
    /// Safe to call from any number of tasks at once. The lock is only held
    /// for the budget arithmetic; waiting happens outside it.
    pub async fn acquire(&self, bytes: u64) {
        let Some(rate) = self.bytes_per_second else {
            return;
        };
        if bytes == 0 {
            return;
        }

        let wait = {
            let mut budget = self.budget.lock().await;
            let now = Instant::now();
            let refill = now.duration_since(budget.last_refill).as_secs_f64() * rate as f64;
            budget.available = (budget.available + refill).min(rate as f64);
            budget.last_refill = now;
            budget.available -= bytes as f64;

            if budget.available < 0.0 {
                Some(Duration::from_secs_f64(-budget.available / rate as f64))
            } else {
                None
            }
        };

        if let Some(delay) = wait {
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unlimited_never_waits() {
        let pacer = Pacer::unlimited();
        pacer.acquire(u64::MAX).await;
        pacer.acquire(0).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_within_budget_is_immediate() {
        let pacer = Pacer::new(1000);
        let start = Instant::now();
        pacer.acquire(1000).await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deficit_delays_proportionally() {
        let pacer = Pacer::new(1000);
        let start = Instant::now();
        pacer.acquire(1000).await;
        pacer.acquire(500).await;
        assert!(start.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversize_request_is_admitted() {
        let pacer = Pacer::new(100);
        let start = Instant::now();
        pacer.acquire(250).await;
        // 250 bytes against a full 100-byte bucket leaves a 150-byte deficit.
        assert!(start.elapsed() >= Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_replenishes_over_time() {
        let pacer = Pacer::new(1000);
        pacer.acquire(1000).await;
        tokio::time::advance(Duration::from_secs(2)).await;

        // Refill is capped at one second of budget.
        let start = Instant::now();
        pacer.acquire(1000).await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_zero_bytes_is_noop() {
        let pacer = Pacer::new(1);
        pacer.acquire(0).await;
    }
}

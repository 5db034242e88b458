//! Per-job throughput accounting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Byte counter shared by every transfer of a job.
///
/// Workers add the length of each chunk body they stage successfully;
/// progress readers sample the counter without locking.
#[derive(Debug)]
pub struct JobThroughput {
    bytes_sent: AtomicU64,
    started_at: Instant,
}

impl JobThroughput {
    /// Create a new throughput counter starting now.
    pub fn new() -> Self {
        Self {
            bytes_sent: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    /// Record bytes successfully sent to the destination.
    pub fn record(&self, bytes: u64) {
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Total bytes sent so far.
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    /// Average send rate in bytes per second since the job started.
    pub fn bytes_per_second(&self) -> f64 {
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.bytes_sent() as f64 / elapsed
        } else {
            0.0
        }
    }
}

impl Default for JobThroughput {
    fn default() -> Self {
        Self::new()
    }
}

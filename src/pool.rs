//! Chunk worker pool.
//!
//! One bounded queue feeds a fixed set of worker tasks. Chunk jobs from
//! every transfer and every job go through the same queue, so a slow
//! destination applies backpressure all the way back to the prologues
//! enqueuing behind it. Workers are transfer-agnostic: correctness of
//! completion comes from the counter protocol in [`crate::transfer`], never
//! from worker identity or ordering.

use crate::error::TransferError;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

/// A queued unit of chunk work.
pub type ChunkJob = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Snapshot of pool activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub workers: usize,
    pub executed: u64,
    pub per_worker_executed: Vec<u64>,
}

/// Fixed set of workers draining the shared chunk queue.
pub struct ChunkPool {
    queue_tx: mpsc::Sender<ChunkJob>,
    worker_handles: Vec<JoinHandle<()>>,
    executed: Arc<Vec<AtomicU64>>,
}

/// Cloneable enqueue handle handed to transfer prologues.
#[derive(Clone)]
pub struct ChunkScheduler {
    queue_tx: mpsc::Sender<ChunkJob>,
}

impl ChunkPool {
    /// Start `workers` worker tasks over a queue of `queue_depth` slots.
    pub fn start(workers: usize, queue_depth: usize) -> Self {
        let workers = workers.max(1);
        let depth = queue_depth.max(1);

        let (queue_tx, queue_rx) = mpsc::channel::<ChunkJob>(depth);
        let queue_rx = Arc::new(Mutex::new(queue_rx));
        let executed: Arc<Vec<AtomicU64>> =
            Arc::new((0..workers).map(|_| AtomicU64::new(0)).collect());

        let worker_handles = (0..workers)
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    worker_id,
                    Arc::clone(&queue_rx),
                    Arc::clone(&executed),
                ))
            })
            .collect();

        Self {
            queue_tx,
            worker_handles,
            executed,
        }
    }

    /// Get an enqueue handle for this pool.
    pub fn scheduler(&self) -> ChunkScheduler {
        ChunkScheduler {
            queue_tx: self.queue_tx.clone(),
        }
    }

    /// Snapshot how much work each worker has executed.
    pub fn stats(&self) -> PoolStats {
        let per_worker_executed: Vec<u64> = self
            .executed
            .iter()
            .map(|counter| counter.load(Ordering::Relaxed))
            .collect();
        PoolStats {
            workers: per_worker_executed.len(),
            executed: per_worker_executed.iter().sum(),
            per_worker_executed,
        }
    }

    /// Close intake and wait for workers to drain the queue and exit.
    ///
    /// The queue only closes once every [`ChunkScheduler`] clone has been
    /// dropped as well.
    pub async fn shutdown(self) {
        drop(self.queue_tx);
        for handle in self.worker_handles {
            // A worker that panicked already tore down its job; nothing to do.
            let _ = handle.await;
        }
    }
}

impl ChunkScheduler {
    /// Queue one chunk job, waiting while the queue is full.
    pub async fn enqueue<F>(&self, job: F) -> Result<(), TransferError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.queue_tx
            .send(Box::pin(job))
            .await
            .map_err(|_| TransferError::Setup("chunk queue is closed".to_string()))
    }
}

async fn worker_loop(
    worker_id: usize,
    queue_rx: Arc<Mutex<mpsc::Receiver<ChunkJob>>>,
    executed: Arc<Vec<AtomicU64>>,
) {
    loop {
        let job = queue_rx.lock().await.recv().await;
        match job {
            Some(job) => {
                job.await;
                executed[worker_id].fetch_add(1, Ordering::Relaxed);
            }
            None => {
                debug!(worker = worker_id, "Chunk worker exiting");
                break;
            }
        }
    }
}

//! Transfer controller: prologue, chunk execution, epilogue.
//!
//! One [`TransferState`] tracks a single source-to-destination move. The
//! [`TransferRunner`] turns it into chunk jobs on the shared pool (or a
//! single whole-object put for small sources) and the completion-counting
//! protocol decides which worker runs the epilogue. Chunks may finish in any
//! order; the committed block list is always in chunk-index order because
//! ids are published into per-index slots, never appended.

use crate::base::{chunk_count, chunk_ranges, ChunkRange, TransferStatus};
use crate::config::{EngineConfig, RetryConfig, MAX_BLOCKS_PER_BLOB};
use crate::error::TransferError;
use crate::pacer::Pacer;
use crate::pool::ChunkScheduler;
use crate::remote::{
    sniff_content_type, BlobHeaders, BlockDestination, BlockId, DestinationFactory, RequestPolicy,
};
use crate::source::SourceView;
use crate::throughput::JobThroughput;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::Mutex;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, error, info, warn, Level};

/// Input describing one file-level transfer, as submitted in a job part.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferDescriptor {
    /// Local source file path.
    pub source: PathBuf,
    /// Destination locator; its meaning belongs to the destination factory.
    pub destination: String,
    /// Size of the source in bytes, as known at submission time.
    pub source_size: u64,
    /// Chunk size in bytes. Zero means "use the engine default".
    #[serde(default)]
    pub block_size: u64,
    /// Content type to commit with. Sniffed from the source when absent.
    #[serde(default)]
    pub content_type: Option<String>,
    /// Metadata pairs stored with the committed object.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Floor for per-transfer logging ("error".."trace"). Defaults to info.
    #[serde(default)]
    pub minimum_log_level: Option<String>,
}

/// Live state of one transfer.
///
/// Shared as `Arc` between the prologue, every chunk job, and the job-part
/// aggregation layer. All cross-worker mutation goes through atomics, the
/// cancellation token, or the write-once block slots.
pub struct TransferState {
    pub descriptor: TransferDescriptor,
    /// Chunk count for the chunked path; zero means whole-object upload.
    /// Kept untruncated so the block ceiling check sees the real count.
    pub num_chunks: u64,
    chunks_done: AtomicU64,
    status: AtomicU8,
    done: AtomicBool,
    token: CancellationToken,
    source: Mutex<Option<Arc<SourceView>>>,
    block_slots: Vec<OnceLock<BlockId>>,
    throughput: Arc<JobThroughput>,
    transfers_done: Arc<AtomicU32>,
}

impl TransferState {
    /// Build the state for one transfer attempt.
    ///
    /// The cancellation token is a child of `parent`, so cancelling the
    /// owning job cancels every transfer in it.
    pub fn new(
        descriptor: TransferDescriptor,
        throughput: Arc<JobThroughput>,
        transfers_done: Arc<AtomicU32>,
        parent: &CancellationToken,
    ) -> Arc<Self> {
        let num_chunks = if descriptor.block_size > 0 && descriptor.source_size > descriptor.block_size
        {
            chunk_count(descriptor.source_size, descriptor.block_size)
        } else {
            0
        };
        // No slots beyond the block ceiling: an over-ceiling transfer fails
        // in the prologue before any slot is touched, and allocating a slot
        // per chunk would be unbounded.
        let slot_count = if num_chunks <= MAX_BLOCKS_PER_BLOB as u64 {
            num_chunks as usize
        } else {
            0
        };
        let block_slots = (0..slot_count).map(|_| OnceLock::new()).collect();

        Arc::new(Self {
            descriptor,
            num_chunks,
            chunks_done: AtomicU64::new(0),
            status: AtomicU8::new(TransferStatus::NotStarted as u8),
            done: AtomicBool::new(false),
            token: parent.child_token(),
            source: Mutex::new(None),
            block_slots,
            throughput,
            transfers_done,
        })
    }

    /// Current lifecycle status.
    pub fn status(&self) -> TransferStatus {
        TransferStatus::from_repr(self.status.load(Ordering::Acquire))
    }

    /// Move the status forward. A terminal status is never overwritten, so
    /// a `Failed` set by one chunk survives the epilogue's `Cancelled`.
    pub fn set_status(&self, next: TransferStatus) {
        let _ = self
            .status
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if TransferStatus::from_repr(current).is_terminal() {
                    None
                } else {
                    Some(next as u8)
                }
            });
    }

    /// Cancel this transfer. In-flight chunks observe the token and
    /// short-circuit; unstarted chunks skip their I/O entirely.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves when the transfer is cancelled; raced against I/O calls.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// Chunks counted done so far (completed, failed, or skipped).
    pub fn chunks_done(&self) -> u64 {
        self.chunks_done.load(Ordering::Acquire)
    }

    /// Count one chunk done and return the post-increment value. Exactly one
    /// caller per transfer sees `num_chunks` and must run the epilogue.
    fn complete_chunk(&self) -> u64 {
        self.chunks_done.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Publish the block id for one chunk index. Each index is written by
    /// exactly one chunk job; the `OnceLock` is the publish fence the
    /// finalizing worker's read pairs with.
    fn publish_block(&self, index: u32, id: BlockId) {
        let _ = self.block_slots[index as usize].set(id);
    }

    /// The full block list in chunk-index order. An empty slot means a chunk
    /// never staged, which makes the commit invalid.
    pub fn block_list(&self) -> Result<Vec<BlockId>, TransferError> {
        self.block_slots
            .iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.get().cloned().ok_or_else(|| {
                    TransferError::Destination(format!("Block {} was never staged", index))
                })
            })
            .collect()
    }

    async fn store_source(&self, view: Arc<SourceView>) {
        *self.source.lock().await = Some(view);
    }

    /// Drop the transfer's reference to the mapped source. Called exactly
    /// once, by the finalizing worker or a failed prologue; the mapping
    /// itself unmaps when the last in-flight chunk reference drops.
    async fn release_source(&self) -> bool {
        self.source.lock().await.take().is_some()
    }

    /// Count this transfer done at the job-part level. The flag publishes
    /// before the counter increments, so a reader seeing the count also
    /// sees every transfer it covers as finalized.
    pub(crate) fn mark_done(&self) {
        self.done.store(true, Ordering::Release);
        self.transfers_done.fetch_add(1, Ordering::AcqRel);
    }

    /// Whether this attempt has finalized: resources released, outcome
    /// logged, counted at the job-part level.
    pub fn is_finalized(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    pub fn throughput(&self) -> &JobThroughput {
        &self.throughput
    }

    /// Logging floor from the descriptor; unknown names fall back to info.
    pub fn log_level(&self) -> Level {
        match self.descriptor.minimum_log_level.as_deref() {
            Some(name) => match name.to_ascii_lowercase().as_str() {
                "error" => Level::ERROR,
                "warn" => Level::WARN,
                "info" => Level::INFO,
                "debug" => Level::DEBUG,
                "trace" => Level::TRACE,
                _ => Level::INFO,
            },
            None => Level::INFO,
        }
    }

    /// Whether a log call at `level` clears this transfer's floor.
    pub fn log_allows(&self, level: Level) -> bool {
        level <= self.log_level()
    }

    /// Headers committed with the object. The caller passes the leading
    /// bytes of the body for sniffing when no content type was supplied.
    fn headers_for(&self, head: &[u8]) -> BlobHeaders {
        let content_type = self
            .descriptor
            .content_type
            .clone()
            .unwrap_or_else(|| sniff_content_type(head).to_string());
        BlobHeaders {
            content_type,
            metadata: self.descriptor.metadata.clone(),
        }
    }
}

/// Outcome of executing one chunk job.
enum ChunkOutcome {
    Succeeded,
    Cancelled,
    Failed(TransferError),
}

/// Drives transfers: opens destinations, maps sources, and feeds chunk jobs
/// to the shared pool.
pub struct TransferRunner {
    factory: Arc<dyn DestinationFactory>,
    pacer: Arc<Pacer>,
    scheduler: ChunkScheduler,
    retry: RetryConfig,
    max_blocks: u32,
}

impl TransferRunner {
    pub fn new(
        factory: Arc<dyn DestinationFactory>,
        pacer: Arc<Pacer>,
        scheduler: ChunkScheduler,
        config: &EngineConfig,
    ) -> Self {
        Self {
            factory,
            pacer,
            scheduler,
            retry: config.retry.clone(),
            max_blocks: config.chunking.max_blocks,
        }
    }

    /// Run one transfer end to end: prologue here, chunk bodies on the pool.
    ///
    /// Returns once every chunk job is enqueued (or immediately for the
    /// whole-object path); the epilogue runs later on whichever worker
    /// counts the last chunk.
    pub async fn run(&self, transfer: Arc<TransferState>) {
        let policy = RequestPolicy::from_retry(&self.retry, transfer.log_level());
        let destination = match self
            .factory
            .open(&transfer.descriptor.destination, &policy)
            .await
        {
            Ok(destination) => destination,
            Err(error) => return fail_setup(&transfer, error).await,
        };

        let size = transfer.descriptor.source_size;
        if size == 0 {
            self.put_whole(transfer, destination, None).await;
            return;
        }

        let source = match SourceView::open(&transfer.descriptor.source) {
            Ok(view) => Arc::new(view),
            Err(error) => return fail_setup(&transfer, error).await,
        };
        if source.len() != size {
            let error = TransferError::Setup(format!(
                "Source {} is {} bytes, descriptor says {}",
                transfer.descriptor.source.display(),
                source.len(),
                size
            ));
            return fail_setup(&transfer, error).await;
        }
        transfer.store_source(Arc::clone(&source)).await;

        if transfer.num_chunks == 0 {
            self.put_whole(transfer, destination, Some(source)).await;
            return;
        }

        // The configured limit never exceeds the destination's hard
        // ceiling, which also bounds the slot vector.
        let limit = self.max_blocks.min(MAX_BLOCKS_PER_BLOB);
        if transfer.num_chunks > limit as u64 {
            let error = TransferError::TooManyBlocks {
                needed: transfer.num_chunks,
                limit,
            };
            return fail_setup(&transfer, error).await;
        }

        transfer.set_status(TransferStatus::InProgress);
        info!(
            source = %transfer.descriptor.source.display(),
            destination = %transfer.descriptor.destination,
            chunks = transfer.num_chunks,
            block_size = transfer.descriptor.block_size,
            "Starting chunked transfer"
        );

        for range in chunk_ranges(size, transfer.descriptor.block_size) {
            let job_transfer = Arc::clone(&transfer);
            let job_destination = Arc::clone(&destination);
            let job_source = Arc::clone(&source);
            let job_pacer = Arc::clone(&self.pacer);
            let job = async move {
                run_chunk(job_transfer, job_destination, job_source, job_pacer, range).await;
            };

            if self.scheduler.enqueue(job).await.is_err() {
                // Pool shut down mid-prologue. The chunk never runs, so
                // account for it here to keep the count reaching its total.
                transfer.cancel();
                transfer.set_status(TransferStatus::Failed);
                finish_chunk(&transfer, &destination, &source).await;
            }
        }
    }

    /// Small-object path: one `put_blob` of the whole body, no block list.
    async fn put_whole(
        &self,
        transfer: Arc<TransferState>,
        destination: Arc<dyn BlockDestination>,
        source: Option<Arc<SourceView>>,
    ) {
        transfer.set_status(TransferStatus::InProgress);
        let size = transfer.descriptor.source_size;

        let body = match &source {
            Some(view) => {
                let full = ChunkRange::new(0, 0, size);
                tokio::select! {
                    body = view.read_paced(full, &self.pacer) => body,
                    _ = transfer.cancelled() => {
                        info!(
                            source = %transfer.descriptor.source.display(),
                            "Whole-object upload cancelled before send"
                        );
                        transfer.set_status(TransferStatus::Cancelled);
                        transfer.release_source().await;
                        transfer.mark_done();
                        return;
                    }
                }
            }
            None => Bytes::new(),
        };

        let headers = transfer.headers_for(&body);
        let result = tokio::select! {
            result = destination.put_blob(body, &headers) => result,
            _ = transfer.cancelled() => Err(TransferError::Cancelled),
        };

        match result {
            Ok(()) => transfer.set_status(TransferStatus::Complete),
            Err(_) if transfer.is_cancelled() => {
                info!(
                    source = %transfer.descriptor.source.display(),
                    "Whole-object upload aborted by cancellation"
                );
                transfer.set_status(TransferStatus::Cancelled);
            }
            Err(error) => {
                error!(
                    source = %transfer.descriptor.source.display(),
                    destination = %transfer.descriptor.destination,
                    %error,
                    "Whole-object upload failed"
                );
                transfer.set_status(TransferStatus::Failed);
            }
        }

        // Zero-byte objects send nothing; counting them would inflate rates.
        if size > 0 {
            transfer.throughput().record(size);
        }
        transfer.release_source().await;
        transfer.mark_done();
        info!(
            source = %transfer.descriptor.source.display(),
            destination = %transfer.descriptor.destination,
            status = %transfer.status(),
            "Transfer finalized"
        );
    }
}

/// Prologue failure: nothing was scheduled, finalize immediately.
async fn fail_setup(transfer: &Arc<TransferState>, error: TransferError) {
    error!(
        source = %transfer.descriptor.source.display(),
        destination = %transfer.descriptor.destination,
        %error,
        "Transfer setup failed"
    );
    transfer.set_status(TransferStatus::Failed);
    transfer.release_source().await;
    transfer.mark_done();
}

/// Body of one chunk job, executed on a pool worker.
async fn run_chunk(
    transfer: Arc<TransferState>,
    destination: Arc<dyn BlockDestination>,
    source: Arc<SourceView>,
    pacer: Arc<Pacer>,
    range: ChunkRange,
) {
    match execute_chunk(&transfer, destination.as_ref(), &source, &pacer, range).await {
        ChunkOutcome::Succeeded => {
            transfer.throughput().record(range.length);
            if transfer.log_allows(Level::DEBUG) {
                debug!(
                    source = %transfer.descriptor.source.display(),
                    chunk = range.index,
                    bytes = range.length,
                    "Staged chunk"
                );
            }
        }
        ChunkOutcome::Cancelled => {
            if transfer.log_allows(Level::DEBUG) {
                debug!(
                    source = %transfer.descriptor.source.display(),
                    chunk = range.index,
                    "Chunk skipped, transfer cancelled"
                );
            }
        }
        ChunkOutcome::Failed(error) => {
            warn!(
                source = %transfer.descriptor.source.display(),
                chunk = range.index,
                %error,
                "Chunk failed, cancelling transfer"
            );
            // One bad chunk fails the whole file; remaining chunks observe
            // the token and short-circuit.
            transfer.set_status(TransferStatus::Failed);
            transfer.cancel();
        }
    }

    finish_chunk(&transfer, &destination, &source).await;
}

/// Stage one chunk's bytes, honoring cancellation at every await point.
async fn execute_chunk(
    transfer: &TransferState,
    destination: &dyn BlockDestination,
    source: &SourceView,
    pacer: &Pacer,
    range: ChunkRange,
) -> ChunkOutcome {
    if transfer.is_cancelled() {
        return ChunkOutcome::Cancelled;
    }

    let block_id = BlockId::generate();
    transfer.publish_block(range.index, block_id.clone());

    let body = tokio::select! {
        body = source.read_paced(range, pacer) => body,
        _ = transfer.cancelled() => return ChunkOutcome::Cancelled,
    };

    tokio::select! {
        result = destination.stage_block(&block_id, body) => match result {
            Ok(()) => ChunkOutcome::Succeeded,
            // A failure after our own token fired is the cancellation
            // surfacing through the destination, not a new error.
            Err(_) if transfer.is_cancelled() => ChunkOutcome::Cancelled,
            Err(error) => ChunkOutcome::Failed(error),
        },
        _ = transfer.cancelled() => ChunkOutcome::Cancelled,
    }
}

/// Count one chunk done; the worker that counts the last one finalizes.
async fn finish_chunk(
    transfer: &Arc<TransferState>,
    destination: &Arc<dyn BlockDestination>,
    source: &Arc<SourceView>,
) {
    if transfer.complete_chunk() == transfer.num_chunks {
        epilogue(transfer, destination, source).await;
    }
}

/// Runs exactly once per chunked transfer, on whichever worker counted the
/// last chunk. Commits on the happy path, finalizes quietly otherwise.
async fn epilogue(
    transfer: &Arc<TransferState>,
    destination: &Arc<dyn BlockDestination>,
    source: &Arc<SourceView>,
) {
    if transfer.is_cancelled() {
        // Keeps an already-set Failed; otherwise records the cancellation.
        transfer.set_status(TransferStatus::Cancelled);
    } else {
        let headers = transfer.headers_for(source.as_bytes());
        let result = match transfer.block_list() {
            Ok(block_ids) => destination.commit_block_list(&block_ids, &headers).await,
            Err(error) => Err(error),
        };
        match result {
            Ok(()) => transfer.set_status(TransferStatus::Complete),
            Err(error) => {
                error!(
                    source = %transfer.descriptor.source.display(),
                    destination = %transfer.descriptor.destination,
                    %error,
                    "Block list commit failed"
                );
                transfer.set_status(TransferStatus::Failed);
            }
        }
    }

    if !transfer.release_source().await {
        // Cleanup problems never change the outcome, only the log.
        warn!(
            source = %transfer.descriptor.source.display(),
            "Source view was already released"
        );
    }
    transfer.mark_done();
    info!(
        source = %transfer.descriptor.source.display(),
        destination = %transfer.descriptor.destination,
        status = %transfer.status(),
        chunks = transfer.num_chunks,
        "Transfer finalized"
    );
}

//! Hoist - chunked blob transfer engine.
//!
//! Hoist moves large files into a blob-style destination at high throughput
//! by splitting each file into fixed-size chunks, staging them concurrently
//! through a shared worker pool, and committing them atomically as one
//! object.
//!
//! # Features
//!
//! - **Concurrent**: one bounded worker pool executes chunks from every
//!   active transfer, giving global concurrency control with backpressure
//! - **Atomic**: staged blocks are invisible until the block list commits,
//!   in chunk-index order, exactly once per transfer
//! - **Throttled**: a shared token-bucket pacer caps aggregate bandwidth
//!   across all concurrent chunk bodies
//! - **Controllable**: jobs are submitted, listed, cancelled, paused, and
//!   resumed through a typed command dispatcher
//!
//! # Example
//!
//! ```no_run
//! use hoist::{CommandKind, Engine, EngineConfig, FsStore, SubmitJobPartRequest};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), hoist::TransferError> {
//! let engine = Engine::new(&EngineConfig::default(), Arc::new(FsStore::new()));
//! let request = SubmitJobPartRequest {
//!     job_id: hoist::JobId::new().to_string(),
//!     part_number: 0,
//!     is_final_part: true,
//!     transfers: vec![],
//! };
//! let _ack: hoist::AckResponse =
//!     hoist::send_command(&engine, CommandKind::SubmitJobPart, &request).await?;
//! # Ok(())
//! # }
//! ```

pub mod base;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod fs_store;
pub mod job;
pub mod pacer;
pub mod pool;
pub mod remote;
pub mod source;
pub mod throughput;
pub mod transfer;

pub use base::{chunk_count, chunk_ranges, ChunkRange, TransferStatus};
pub use config::EngineConfig;
pub use dispatch::{
    send_command, AckResponse, CancelJobRequest, CommandDispatcher, CommandKind, Engine,
    ListJobSummaryRequest, ListJobSummaryResponse, ListJobTransfersRequest,
    ListJobTransfersResponse, ListJobsRequest, ListJobsResponse, PauseJobRequest,
    ResumeJobRequest, SubmitJobPartRequest,
};
pub use error::TransferError;
pub use fs_store::FsStore;
pub use job::{Job, JobId, JobProgress, JobRegistry};
pub use pacer::Pacer;
pub use pool::{ChunkPool, ChunkScheduler};
pub use remote::{BlobHeaders, BlockDestination, BlockId, DestinationFactory, RequestPolicy};
pub use source::SourceView;
pub use throughput::JobThroughput;
pub use transfer::{TransferDescriptor, TransferRunner, TransferState};

// Re-export commonly used types for convenience
pub use bytes;
pub use serde;
pub use tokio;

//! Jobs, job parts, and the registry.
//!
//! A job is one submitted request, split into numbered parts of transfers.
//! This layer aggregates transfer statuses into progress summaries, owns the
//! root cancellation token, and carries the per-job throughput counter every
//! worker reports into.

use crate::error::TransferError;
use crate::throughput::JobThroughput;
use crate::transfer::{TransferDescriptor, TransferState};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Unique job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Generate a fresh id.
    pub fn new() -> Self {
        JobId(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = TransferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(JobId)
            .map_err(|_| TransferError::InvalidRequest(format!("Invalid job id: {}", s)))
    }
}

/// One source/destination pair, used in failure reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferPair {
    pub src: String,
    pub dst: String,
}

/// One transfer's listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferDetail {
    pub src: String,
    pub dst: String,
    pub transfer_status: crate::base::TransferStatus,
}

/// Aggregated progress of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub total_transfers: u32,
    pub transfers_completed: u32,
    pub transfers_failed: u32,
    /// Whether a final part has been submitted, so the total is final.
    pub complete_job_ordered: bool,
    /// Progressed share in percent; failed transfers count as progressed.
    pub percentage_progress: f32,
    pub failed_transfers: Vec<TransferPair>,
}

/// One batch of transfers submitted together.
pub struct JobPart {
    pub part_number: u32,
    pub is_final_part: bool,
    pub transfers: Vec<Arc<TransferState>>,
    transfers_done: Arc<AtomicU32>,
}

impl JobPart {
    /// Transfers of this part that have finalized.
    pub fn done_count(&self) -> u32 {
        self.transfers_done.load(Ordering::Acquire)
    }
}

/// One logical transfer request, made of ordered parts.
pub struct Job {
    id: JobId,
    token: CancellationToken,
    throughput: Arc<JobThroughput>,
    parts: RwLock<Vec<JobPart>>,
    paused: AtomicBool,
}

impl Job {
    fn new(id: JobId) -> Arc<Self> {
        Arc::new(Self {
            id,
            token: CancellationToken::new(),
            throughput: Arc::new(JobThroughput::new()),
            parts: RwLock::new(Vec::new()),
            paused: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn throughput(&self) -> &Arc<JobThroughput> {
        &self.throughput
    }

    /// Append a part and build the transfer states for it.
    ///
    /// Every state's token is a child of the job's root token. The returned
    /// states are the caller's to run; the job itself schedules nothing.
    pub async fn add_part(
        &self,
        part_number: u32,
        is_final_part: bool,
        descriptors: Vec<TransferDescriptor>,
    ) -> Result<Vec<Arc<TransferState>>, TransferError> {
        if self.token.is_cancelled() {
            return Err(TransferError::InvalidRequest(format!(
                "Job {} is cancelled",
                self.id
            )));
        }

        let mut parts = self.parts.write().await;
        if parts.iter().any(|part| part.part_number == part_number) {
            return Err(TransferError::InvalidRequest(format!(
                "Duplicate part number {}",
                part_number
            )));
        }

        let transfers_done = Arc::new(AtomicU32::new(0));
        let transfers: Vec<Arc<TransferState>> = descriptors
            .into_iter()
            .map(|descriptor| {
                TransferState::new(
                    descriptor,
                    Arc::clone(&self.throughput),
                    Arc::clone(&transfers_done),
                    &self.token,
                )
            })
            .collect();

        info!(
            job = %self.id,
            part = part_number,
            transfers = transfers.len(),
            final_part = is_final_part,
            "Job part added"
        );
        parts.push(JobPart {
            part_number,
            is_final_part,
            transfers: transfers.clone(),
            transfers_done,
        });
        Ok(transfers)
    }

    /// Cancel the job: the root token cancels every transfer's child token.
    /// Idempotent; cancelling an already-cancelled job is a no-op.
    pub fn cancel(&self) {
        if !self.token.is_cancelled() {
            info!(job = %self.id, "Cancelling job");
            self.token.cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Pause: cancel in-flight work transfer by transfer, keeping the root
    /// token intact so the job stays resumable.
    pub async fn pause(&self) {
        self.paused.store(true, Ordering::Release);
        let parts = self.parts.read().await;
        for part in parts.iter() {
            for transfer in &part.transfers {
                if !transfer.status().is_terminal() {
                    transfer.cancel();
                }
            }
        }
        info!(job = %self.id, "Job paused");
    }

    /// Resume: replace every finalized transfer that did not complete with
    /// a fresh attempt and return the new states for the caller to run.
    ///
    /// Attempts still draining their cancelled chunks are left in place;
    /// their finalize is still pending and a replacement would double-count
    /// them at the part level.
    pub async fn resume(&self) -> Result<Vec<Arc<TransferState>>, TransferError> {
        if self.token.is_cancelled() {
            return Err(TransferError::InvalidRequest(format!(
                "Cannot resume cancelled job {}",
                self.id
            )));
        }
        self.paused.store(false, Ordering::Release);

        let mut fresh = Vec::new();
        let mut parts = self.parts.write().await;
        for part in parts.iter_mut() {
            for slot in part.transfers.iter_mut() {
                if slot.is_finalized() && slot.status() != crate::base::TransferStatus::Complete {
                    let state = TransferState::new(
                        slot.descriptor.clone(),
                        Arc::clone(&self.throughput),
                        Arc::clone(&part.transfers_done),
                        &self.token,
                    );
                    // The replaced attempt already counted itself done; the
                    // fresh one counts again when it finalizes.
                    part.transfers_done.fetch_sub(1, Ordering::AcqRel);
                    *slot = Arc::clone(&state);
                    fresh.push(state);
                }
            }
        }
        info!(job = %self.id, restarted = fresh.len(), "Job resumed");
        Ok(fresh)
    }

    /// Whether every submitted transfer has finalized, whatever its
    /// outcome. Stronger than status checks: a finalized transfer has also
    /// released its source view and counted itself done at the part level.
    pub async fn is_drained(&self) -> bool {
        let parts = self.parts.read().await;
        parts
            .iter()
            .all(|part| part.done_count() as usize == part.transfers.len())
    }

    /// Aggregate the statuses of every transfer across all parts.
    pub async fn progress_summary(&self) -> JobProgress {
        let parts = self.parts.read().await;
        let mut total = 0u32;
        let mut completed = 0u32;
        let mut failed = 0u32;
        let mut failed_transfers = Vec::new();
        let mut complete_job_ordered = false;

        for part in parts.iter() {
            complete_job_ordered |= part.is_final_part;
            for transfer in &part.transfers {
                total += 1;
                match transfer.status() {
                    crate::base::TransferStatus::Complete => completed += 1,
                    crate::base::TransferStatus::Failed
                    | crate::base::TransferStatus::Cancelled => {
                        failed += 1;
                        failed_transfers.push(TransferPair {
                            src: transfer.descriptor.source.to_string_lossy().into_owned(),
                            dst: transfer.descriptor.destination.clone(),
                        });
                    }
                    _ => {}
                }
            }
        }

        let percentage_progress = if total == 0 {
            0.0
        } else {
            (completed + failed) as f32 * 100.0 / total as f32
        };

        JobProgress {
            total_transfers: total,
            transfers_completed: completed,
            transfers_failed: failed,
            complete_job_ordered,
            percentage_progress,
            failed_transfers,
        }
    }

    /// List transfers, optionally only those in one status.
    pub async fn transfers_with_status(
        &self,
        filter: Option<crate::base::TransferStatus>,
    ) -> Vec<TransferDetail> {
        let parts = self.parts.read().await;
        let mut details = Vec::new();
        for part in parts.iter() {
            for transfer in &part.transfers {
                let status = transfer.status();
                if filter.is_none() || filter == Some(status) {
                    details.push(TransferDetail {
                        src: transfer.descriptor.source.to_string_lossy().into_owned(),
                        dst: transfer.descriptor.destination.clone(),
                        transfer_status: status,
                    });
                }
            }
        }
        details
    }
}

/// All jobs known to this engine instance. Jobs live until process end;
/// there is no persistence.
#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<JobId, Arc<Job>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a job, creating it on first reference to its id.
    pub async fn get_or_create(&self, id: JobId) -> Arc<Job> {
        let mut jobs = self.jobs.write().await;
        Arc::clone(jobs.entry(id).or_insert_with(|| Job::new(id)))
    }

    pub async fn get(&self, id: JobId) -> Option<Arc<Job>> {
        self.jobs.read().await.get(&id).cloned()
    }

    pub async fn job_ids(&self) -> Vec<JobId> {
        let mut ids: Vec<JobId> = self.jobs.read().await.keys().copied().collect();
        ids.sort_by_key(|id| id.to_string());
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::TransferStatus;
    use std::path::PathBuf;

    fn descriptor(name: &str) -> TransferDescriptor {
        TransferDescriptor {
            source: PathBuf::from(name),
            destination: format!("dest/{}", name),
            source_size: 1000,
            block_size: 100,
            content_type: None,
            metadata: HashMap::new(),
            minimum_log_level: None,
        }
    }

    #[test]
    fn test_job_id_parse_round_trip() {
        let id = JobId::new();
        let parsed: JobId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_job_id_parse_rejects_garbage() {
        let result = "not-a-uuid".parse::<JobId>();
        assert!(matches!(result, Err(TransferError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_duplicate_part_number_rejected() {
        let job = Job::new(JobId::new());
        job.add_part(0, false, vec![descriptor("a")]).await.unwrap();
        let result = job.add_part(0, true, vec![descriptor("b")]).await;
        assert!(matches!(result, Err(TransferError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_cancel_propagates_to_transfer_tokens() {
        let job = Job::new(JobId::new());
        let transfers = job
            .add_part(0, true, vec![descriptor("a"), descriptor("b")])
            .await
            .unwrap();

        assert!(!transfers[0].is_cancelled());
        job.cancel();
        assert!(transfers[0].is_cancelled());
        assert!(transfers[1].is_cancelled());
        // Idempotent.
        job.cancel();
        assert!(job.is_cancelled());
    }

    #[tokio::test]
    async fn test_add_part_after_cancel_rejected() {
        let job = Job::new(JobId::new());
        job.cancel();
        let result = job.add_part(0, true, vec![descriptor("a")]).await;
        assert!(matches!(result, Err(TransferError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_progress_summary_counts_failed_as_progressed() {
        let job = Job::new(JobId::new());
        let transfers = job
            .add_part(0, true, vec![descriptor("a"), descriptor("b"), descriptor("c"), descriptor("d")])
            .await
            .unwrap();

        transfers[0].set_status(TransferStatus::Complete);
        transfers[1].set_status(TransferStatus::Failed);
        transfers[2].set_status(TransferStatus::Cancelled);

        let summary = job.progress_summary().await;
        assert_eq!(summary.total_transfers, 4);
        assert_eq!(summary.transfers_completed, 1);
        assert_eq!(summary.transfers_failed, 2);
        assert!(summary.complete_job_ordered);
        assert!((summary.percentage_progress - 75.0).abs() < f32::EPSILON);
        assert_eq!(summary.failed_transfers.len(), 2);
        assert_eq!(summary.failed_transfers[0].src, "a");
    }

    #[tokio::test]
    async fn test_summary_without_final_part() {
        let job = Job::new(JobId::new());
        job.add_part(0, false, vec![descriptor("a")]).await.unwrap();
        let summary = job.progress_summary().await;
        assert!(!summary.complete_job_ordered);
        assert_eq!(summary.percentage_progress, 0.0);
    }

    #[tokio::test]
    async fn test_transfers_with_status_filter() {
        let job = Job::new(JobId::new());
        let transfers = job
            .add_part(0, true, vec![descriptor("a"), descriptor("b")])
            .await
            .unwrap();
        transfers[0].set_status(TransferStatus::Complete);

        let complete = job
            .transfers_with_status(Some(TransferStatus::Complete))
            .await;
        assert_eq!(complete.len(), 1);
        assert_eq!(complete[0].src, "a");

        let all = job.transfers_with_status(None).await;
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_resume_replaces_only_incomplete_transfers() {
        let job = Job::new(JobId::new());
        let transfers = job
            .add_part(0, true, vec![descriptor("a"), descriptor("b")])
            .await
            .unwrap();
        transfers[0].set_status(TransferStatus::Complete);
        transfers[0].mark_done();
        transfers[1].set_status(TransferStatus::Failed);
        transfers[1].mark_done();

        job.pause().await;
        assert!(job.is_paused());
        assert!(job.is_drained().await);

        let fresh = job.resume().await.unwrap();
        assert!(!job.is_paused());
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].descriptor.source, PathBuf::from("b"));
        assert_eq!(fresh[0].status(), TransferStatus::NotStarted);
        assert!(!fresh[0].is_cancelled());

        // The replaced attempt gave back its done count.
        assert!(!job.is_drained().await);
        fresh[0].set_status(TransferStatus::Complete);
        fresh[0].mark_done();
        assert!(job.is_drained().await);

        // The completed transfer kept its state.
        let summary = job.progress_summary().await;
        assert_eq!(summary.transfers_completed, 2);
        assert_eq!(summary.transfers_failed, 0);
    }

    #[tokio::test]
    async fn test_resume_skips_attempts_still_draining() {
        let job = Job::new(JobId::new());
        let transfers = job
            .add_part(0, true, vec![descriptor("a")])
            .await
            .unwrap();
        // Cancelled status set but finalize has not run yet.
        transfers[0].set_status(TransferStatus::Cancelled);
        assert!(!job.is_drained().await);

        let fresh = job.resume().await.unwrap();
        assert!(fresh.is_empty());

        transfers[0].mark_done();
        assert!(job.is_drained().await);
        let fresh = job.resume().await.unwrap();
        assert_eq!(fresh.len(), 1);
    }

    #[tokio::test]
    async fn test_resume_of_cancelled_job_rejected() {
        let job = Job::new(JobId::new());
        job.cancel();
        assert!(matches!(
            job.resume().await,
            Err(TransferError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_registry_get_or_create() {
        let registry = JobRegistry::new();
        let id = JobId::new();
        let first = registry.get_or_create(id).await;
        let second = registry.get_or_create(id).await;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.job_ids().await, vec![id]);
        assert!(registry.get(JobId::new()).await.is_none());
    }
}

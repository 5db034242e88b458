//! Command dispatcher and the engine behind it.
//!
//! Commands are typed request/response pairs carried as JSON values through
//! the [`CommandDispatcher`] trait. The trait is injected wherever commands
//! are issued, so tests substitute fakes freely; there is no process-wide
//! dispatcher. Every response carries an `error_message` field, empty on
//! success — callers check it before using the rest of the payload. Decode
//! failures at this boundary are typed errors, never panics.

use crate::base::TransferStatus;
use crate::config::EngineConfig;
use crate::error::TransferError;
use crate::job::{JobId, JobRegistry, TransferDetail, TransferPair};
use crate::pacer::Pacer;
use crate::pool::ChunkPool;
use crate::remote::DestinationFactory;
use crate::transfer::{TransferDescriptor, TransferRunner, TransferState};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// The commands the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    SubmitJobPart,
    ListJobs,
    ListJobProgressSummary,
    ListJobTransfers,
    CancelJob,
    PauseJob,
    ResumeJob,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::SubmitJobPart => "SubmitJobPart",
            CommandKind::ListJobs => "ListJobs",
            CommandKind::ListJobProgressSummary => "ListJobProgressSummary",
            CommandKind::ListJobTransfers => "ListJobTransfers",
            CommandKind::CancelJob => "CancelJob",
            CommandKind::PauseJob => "PauseJob",
            CommandKind::ResumeJob => "ResumeJob",
        }
    }

    /// Parse a command name, for callers that carry it as a string.
    pub fn parse(s: &str) -> Result<CommandKind, TransferError> {
        match s {
            "SubmitJobPart" => Ok(CommandKind::SubmitJobPart),
            "ListJobs" => Ok(CommandKind::ListJobs),
            "ListJobProgressSummary" => Ok(CommandKind::ListJobProgressSummary),
            "ListJobTransfers" => Ok(CommandKind::ListJobTransfers),
            "CancelJob" => Ok(CommandKind::CancelJob),
            "PauseJob" => Ok(CommandKind::PauseJob),
            "ResumeJob" => Ok(CommandKind::ResumeJob),
            other => Err(TransferError::UnknownCommand(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitJobPartRequest {
    pub job_id: String,
    pub part_number: u32,
    pub is_final_part: bool,
    pub transfers: Vec<TransferDescriptor>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListJobsRequest {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListJobsResponse {
    pub error_message: String,
    pub job_ids: Vec<JobId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListJobSummaryRequest {
    pub job_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListJobSummaryResponse {
    pub error_message: String,
    pub job_id: String,
    pub total_transfers: u32,
    pub transfers_completed: u32,
    pub transfers_failed: u32,
    pub complete_job_ordered: bool,
    pub percentage_progress: f32,
    pub failed_transfers: Vec<TransferPair>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListJobTransfersRequest {
    pub job_id: String,
    /// Status name to filter by; absent means all transfers.
    #[serde(default)]
    pub of_status: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListJobTransfersResponse {
    pub error_message: String,
    pub job_id: String,
    pub details: Vec<TransferDetail>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CancelJobRequest {
    pub job_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PauseJobRequest {
    pub job_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResumeJobRequest {
    pub job_id: String,
}

/// Response carrying only an outcome, for cancel/pause/resume/submit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AckResponse {
    pub error_message: String,
}

impl AckResponse {
    fn ok() -> Self {
        Self::default()
    }

    fn err(message: impl Into<String>) -> Self {
        Self {
            error_message: message.into(),
        }
    }
}

/// Routes a command plus request payload to its handler.
///
/// `dispatch` only fails on transport-layer problems: a request payload that
/// does not decode, or a response that does not encode. Domain failures land
/// in the response's `error_message`.
#[async_trait]
pub trait CommandDispatcher: Send + Sync {
    async fn dispatch(&self, command: CommandKind, request: Value)
        -> Result<Value, TransferError>;
}

/// Typed convenience wrapper around [`CommandDispatcher::dispatch`].
pub async fn send_command<Req, Resp>(
    dispatcher: &dyn CommandDispatcher,
    command: CommandKind,
    request: &Req,
) -> Result<Resp, TransferError>
where
    Req: Serialize + Sync,
    Resp: DeserializeOwned,
{
    let payload = serde_json::to_value(request)?;
    let response = dispatcher.dispatch(command, payload).await?;
    serde_json::from_value(response).map_err(|source| TransferError::Decode {
        command: command.as_str().to_string(),
        source,
    })
}

/// The transfer engine: registry, worker pool, pacer, and runner in one
/// place, fronted by the dispatcher trait.
pub struct Engine {
    registry: Arc<JobRegistry>,
    runner: Arc<TransferRunner>,
    pool: ChunkPool,
    default_block_size: u64,
}

impl Engine {
    /// Start the worker pool and wire the runner to the given destination
    /// factory.
    pub fn new(config: &EngineConfig, factory: Arc<dyn DestinationFactory>) -> Self {
        let pool = ChunkPool::start(
            config.scheduling.chunk_workers,
            config.scheduling.chunk_queue_depth,
        );
        let pacer = Arc::new(Pacer::from_config(&config.pacing));
        let runner = Arc::new(TransferRunner::new(
            factory,
            pacer,
            pool.scheduler(),
            config,
        ));

        Self {
            registry: Arc::new(JobRegistry::new()),
            runner,
            pool,
            default_block_size: config.chunking.block_size,
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Tear the engine down once its jobs have drained. Drops the runner
    /// (and with it the scheduler's queue handle) so the workers see the
    /// channel close, then joins them.
    pub async fn shutdown(self) {
        drop(self.runner);
        drop(self.registry);
        self.pool.shutdown().await;
    }

    fn spawn_transfers(&self, transfers: Vec<Arc<TransferState>>) {
        for transfer in transfers {
            let runner = Arc::clone(&self.runner);
            tokio::spawn(async move {
                runner.run(transfer).await;
            });
        }
    }

    async fn submit_job_part(&self, request: SubmitJobPartRequest) -> AckResponse {
        let job_id: JobId = match request.job_id.parse() {
            Ok(id) => id,
            Err(error) => return AckResponse::err(error.to_string()),
        };

        let mut descriptors = request.transfers;
        for descriptor in &mut descriptors {
            if descriptor.block_size == 0 {
                descriptor.block_size = self.default_block_size;
            }
        }

        let job = self.registry.get_or_create(job_id).await;
        match job
            .add_part(request.part_number, request.is_final_part, descriptors)
            .await
        {
            Ok(transfers) => {
                self.spawn_transfers(transfers);
                AckResponse::ok()
            }
            Err(error) => AckResponse::err(error.to_string()),
        }
    }

    async fn list_jobs(&self) -> ListJobsResponse {
        ListJobsResponse {
            error_message: String::new(),
            job_ids: self.registry.job_ids().await,
        }
    }

    async fn job_summary(&self, request: ListJobSummaryRequest) -> ListJobSummaryResponse {
        let job = match self.lookup(&request.job_id).await {
            Ok(job) => job,
            Err(error) => {
                return ListJobSummaryResponse {
                    error_message: error.to_string(),
                    job_id: request.job_id,
                    ..Default::default()
                }
            }
        };

        let progress = job.progress_summary().await;
        ListJobSummaryResponse {
            error_message: String::new(),
            job_id: request.job_id,
            total_transfers: progress.total_transfers,
            transfers_completed: progress.transfers_completed,
            transfers_failed: progress.transfers_failed,
            complete_job_ordered: progress.complete_job_ordered,
            percentage_progress: progress.percentage_progress,
            failed_transfers: progress.failed_transfers,
        }
    }

    async fn job_transfers(&self, request: ListJobTransfersRequest) -> ListJobTransfersResponse {
        let filter = match request.of_status.as_deref() {
            Some(name) => match TransferStatus::parse(name) {
                TransferStatus::Invalid => {
                    return ListJobTransfersResponse {
                        error_message: format!("Invalid status filter: {}", name),
                        job_id: request.job_id,
                        details: Vec::new(),
                    }
                }
                status => Some(status),
            },
            None => None,
        };

        let job = match self.lookup(&request.job_id).await {
            Ok(job) => job,
            Err(error) => {
                return ListJobTransfersResponse {
                    error_message: error.to_string(),
                    job_id: request.job_id,
                    details: Vec::new(),
                }
            }
        };

        ListJobTransfersResponse {
            error_message: String::new(),
            job_id: request.job_id,
            details: job.transfers_with_status(filter).await,
        }
    }

    async fn cancel_job(&self, request: CancelJobRequest) -> AckResponse {
        match self.lookup(&request.job_id).await {
            Ok(job) => {
                job.cancel();
                AckResponse::ok()
            }
            Err(error) => AckResponse::err(error.to_string()),
        }
    }

    async fn pause_job(&self, request: PauseJobRequest) -> AckResponse {
        match self.lookup(&request.job_id).await {
            Ok(job) => {
                job.pause().await;
                AckResponse::ok()
            }
            Err(error) => AckResponse::err(error.to_string()),
        }
    }

    async fn resume_job(&self, request: ResumeJobRequest) -> AckResponse {
        let job = match self.lookup(&request.job_id).await {
            Ok(job) => job,
            Err(error) => return AckResponse::err(error.to_string()),
        };
        match job.resume().await {
            Ok(transfers) => {
                self.spawn_transfers(transfers);
                AckResponse::ok()
            }
            Err(error) => AckResponse::err(error.to_string()),
        }
    }

    async fn lookup(&self, job_id: &str) -> Result<Arc<crate::job::Job>, TransferError> {
        let id: JobId = job_id.parse()?;
        self.registry
            .get(id)
            .await
            .ok_or_else(|| TransferError::JobNotFound(job_id.to_string()))
    }
}

fn decode<T: DeserializeOwned>(command: CommandKind, request: Value) -> Result<T, TransferError> {
    serde_json::from_value(request).map_err(|source| TransferError::Decode {
        command: command.as_str().to_string(),
        source,
    })
}

fn encode<T: Serialize>(response: &T) -> Result<Value, TransferError> {
    Ok(serde_json::to_value(response)?)
}

#[async_trait]
impl CommandDispatcher for Engine {
    async fn dispatch(
        &self,
        command: CommandKind,
        request: Value,
    ) -> Result<Value, TransferError> {
        debug!(command = command.as_str(), "Dispatching command");
        match command {
            CommandKind::SubmitJobPart => {
                let request = decode(command, request)?;
                encode(&self.submit_job_part(request).await)
            }
            CommandKind::ListJobs => {
                let _request: ListJobsRequest = decode(command, request)?;
                encode(&self.list_jobs().await)
            }
            CommandKind::ListJobProgressSummary => {
                let request = decode(command, request)?;
                encode(&self.job_summary(request).await)
            }
            CommandKind::ListJobTransfers => {
                let request = decode(command, request)?;
                encode(&self.job_transfers(request).await)
            }
            CommandKind::CancelJob => {
                let request = decode(command, request)?;
                encode(&self.cancel_job(request).await)
            }
            CommandKind::PauseJob => {
                let request = decode(command, request)?;
                encode(&self.pause_job(request).await)
            }
            CommandKind::ResumeJob => {
                let request = decode(command, request)?;
                encode(&self.resume_job(request).await)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs_store::FsStore;
    use serde_json::json;

    fn engine() -> Engine {
        Engine::new(&EngineConfig::default(), Arc::new(FsStore::new()))
    }

    #[test]
    fn test_command_kind_round_trip() {
        for kind in [
            CommandKind::SubmitJobPart,
            CommandKind::ListJobs,
            CommandKind::ListJobProgressSummary,
            CommandKind::ListJobTransfers,
            CommandKind::CancelJob,
            CommandKind::PauseJob,
            CommandKind::ResumeJob,
        ] {
            assert_eq!(CommandKind::parse(kind.as_str()).unwrap(), kind);
        }
        assert!(matches!(
            CommandKind::parse("Frobnicate"),
            Err(TransferError::UnknownCommand(_))
        ));
    }

    #[tokio::test]
    async fn test_decode_failure_is_typed_error() {
        let engine = engine();
        let result = engine
            .dispatch(CommandKind::CancelJob, json!({"job_id": 42}))
            .await;
        match result {
            Err(TransferError::Decode { command, .. }) => assert_eq!(command, "CancelJob"),
            other => panic!("Expected Decode error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_unknown_job_reported_in_error_message() {
        let engine = engine();
        let response: ListJobSummaryResponse = send_command(
            &engine,
            CommandKind::ListJobProgressSummary,
            &ListJobSummaryRequest {
                job_id: JobId::new().to_string(),
            },
        )
        .await
        .unwrap();
        assert!(response.error_message.contains("No job found"));
    }

    #[tokio::test]
    async fn test_bad_job_id_reported_in_error_message() {
        let engine = engine();
        let response: AckResponse = send_command(
            &engine,
            CommandKind::CancelJob,
            &CancelJobRequest {
                job_id: "garbage".to_string(),
            },
        )
        .await
        .unwrap();
        assert!(response.error_message.contains("Invalid job id"));
    }

    #[tokio::test]
    async fn test_invalid_status_filter_rejected() {
        let engine = engine();
        let job_id = JobId::new().to_string();
        // Create the job so the filter is the only problem.
        let _: AckResponse = send_command(
            &engine,
            CommandKind::SubmitJobPart,
            &SubmitJobPartRequest {
                job_id: job_id.clone(),
                part_number: 0,
                is_final_part: true,
                transfers: vec![],
            },
        )
        .await
        .unwrap();

        let response: ListJobTransfersResponse = send_command(
            &engine,
            CommandKind::ListJobTransfers,
            &ListJobTransfersRequest {
                job_id,
                of_status: Some("bogus".to_string()),
            },
        )
        .await
        .unwrap();
        assert!(response.error_message.contains("Invalid status filter"));
    }

    #[tokio::test]
    async fn test_list_jobs_shows_submitted_job() {
        let engine = engine();
        let job_id = JobId::new();
        let response: AckResponse = send_command(
            &engine,
            CommandKind::SubmitJobPart,
            &SubmitJobPartRequest {
                job_id: job_id.to_string(),
                part_number: 0,
                is_final_part: true,
                transfers: vec![],
            },
        )
        .await
        .unwrap();
        assert!(response.error_message.is_empty());

        let jobs: ListJobsResponse = send_command(
            &engine,
            CommandKind::ListJobs,
            &ListJobsRequest {},
        )
        .await
        .unwrap();
        assert_eq!(jobs.job_ids, vec![job_id]);
    }

    #[tokio::test]
    async fn test_send_command_surfaces_response_decode_failure() {
        struct BadDispatcher;

        #[async_trait]
        impl CommandDispatcher for BadDispatcher {
            async fn dispatch(
                &self,
                _command: CommandKind,
                _request: Value,
            ) -> Result<Value, TransferError> {
                Ok(json!({"error_message": 7}))
            }
        }

        let result: Result<AckResponse, _> =
            send_command(&BadDispatcher, CommandKind::ListJobs, &ListJobsRequest {}).await;
        assert!(matches!(result, Err(TransferError::Decode { .. })));
    }
}

use clap::{Parser, Subcommand};
use hoist::{
    send_command, AckResponse, CancelJobRequest, CommandKind, Engine, EngineConfig, FsStore,
    JobId, ListJobSummaryRequest, ListJobSummaryResponse, ListJobTransfersRequest,
    ListJobTransfersResponse, ListJobsRequest, ListJobsResponse, PauseJobRequest,
    ResumeJobRequest, SubmitJobPartRequest, TransferDescriptor, TransferStatus,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use walkdir::WalkDir;

/// Transfers per job part; larger submissions are split into parts.
const TRANSFERS_PER_PART: usize = 1000;

#[derive(Parser)]
#[command(name = "hoist")]
#[command(about = "Chunked blob transfer tool: parallel block uploads with atomic commit")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "hoist.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy a file or directory into the destination store
    Copy {
        /// Source file or directory
        source: PathBuf,
        /// Destination object path (directory sources copy beneath it)
        dest: String,
        /// Chunk size in bytes (defaults to the configured block size)
        #[arg(long)]
        block_size: Option<u64>,
        /// Cap aggregate bandwidth in bytes per second
        #[arg(long)]
        bandwidth: Option<u64>,
    },
    /// List jobs, or one job's progress or transfers
    List {
        /// Job to inspect; omit to list all job ids
        job_id: Option<String>,
        /// Only show transfers in this status
        #[arg(long)]
        with_status: Option<String>,
    },
    /// Cancel a job
    Cancel { job_id: String },
    /// Pause a job, keeping it resumable
    Pause { job_id: String },
    /// Resume a paused job, retrying everything not yet complete
    Resume { job_id: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mut config = EngineConfig::load_or_create(&cli.config)?;

    match cli.command {
        Commands::Copy {
            source,
            dest,
            block_size,
            bandwidth,
        } => {
            if let Some(rate) = bandwidth {
                config.pacing.bytes_per_second = Some(rate);
            }
            if let Some(size) = block_size {
                config.chunking.block_size = size;
            }
            run_copy(&config, &source, &dest).await
        }
        Commands::List {
            job_id,
            with_status,
        } => {
            // Validate control input locally before any dispatch call.
            let job_id = job_id.map(|id| id.parse::<JobId>()).transpose()?;
            let with_status = with_status
                .map(|name| match TransferStatus::parse(&name) {
                    TransferStatus::Invalid => Err(format!("Invalid status filter: {}", name)),
                    status => Ok(status),
                })
                .transpose()?;
            run_list(&config, job_id, with_status).await
        }
        Commands::Cancel { job_id } => {
            let job_id: JobId = job_id.parse()?;
            let engine = engine_for(&config);
            let ack: AckResponse = send_command(
                &engine,
                CommandKind::CancelJob,
                &CancelJobRequest {
                    job_id: job_id.to_string(),
                },
            )
            .await?;
            report_ack("cancel", &ack)
        }
        Commands::Pause { job_id } => {
            let job_id: JobId = job_id.parse()?;
            let engine = engine_for(&config);
            let ack: AckResponse = send_command(
                &engine,
                CommandKind::PauseJob,
                &PauseJobRequest {
                    job_id: job_id.to_string(),
                },
            )
            .await?;
            report_ack("pause", &ack)
        }
        Commands::Resume { job_id } => {
            let job_id: JobId = job_id.parse()?;
            let engine = engine_for(&config);
            let ack: AckResponse = send_command(
                &engine,
                CommandKind::ResumeJob,
                &ResumeJobRequest {
                    job_id: job_id.to_string(),
                },
            )
            .await?;
            report_ack("resume", &ack)
        }
    }
}

fn engine_for(config: &EngineConfig) -> Engine {
    Engine::new(config, Arc::new(FsStore::new()))
}

fn report_ack(action: &str, ack: &AckResponse) -> Result<(), Box<dyn std::error::Error>> {
    if ack.error_message.is_empty() {
        println!("{} accepted", action);
        Ok(())
    } else {
        Err(ack.error_message.clone().into())
    }
}

/// Expand the source into one transfer descriptor per file.
fn build_transfers(
    source: &Path,
    dest: &str,
) -> Result<Vec<TransferDescriptor>, Box<dyn std::error::Error>> {
    let mut transfers = Vec::new();

    if source.is_dir() {
        let dest_root = PathBuf::from(dest);
        for entry in WalkDir::new(source) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(source)?;
            let size = entry.metadata()?.len();
            transfers.push(TransferDescriptor {
                source: entry.path().to_path_buf(),
                destination: dest_root.join(relative).to_string_lossy().into_owned(),
                source_size: size,
                block_size: 0,
                content_type: None,
                metadata: Default::default(),
                minimum_log_level: None,
            });
        }
    } else {
        let size = std::fs::metadata(source)?.len();
        let destination = if dest.ends_with('/') {
            let name = source
                .file_name()
                .ok_or("Source path has no file name")?
                .to_string_lossy();
            format!("{}{}", dest, name)
        } else {
            dest.to_string()
        };
        transfers.push(TransferDescriptor {
            source: source.to_path_buf(),
            destination,
            source_size: size,
            block_size: 0,
            content_type: None,
            metadata: Default::default(),
            minimum_log_level: None,
        });
    }

    if transfers.is_empty() {
        return Err(format!("No files found under {}", source.display()).into());
    }
    Ok(transfers)
}

async fn run_copy(
    config: &EngineConfig,
    source: &Path,
    dest: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let transfers = build_transfers(source, dest)?;
    let total = transfers.len();
    let engine = engine_for(config);
    let job_id = JobId::new();
    info!(job = %job_id, transfers = total, "Submitting copy job");

    let parts: Vec<Vec<TransferDescriptor>> = transfers
        .chunks(TRANSFERS_PER_PART)
        .map(|chunk| chunk.to_vec())
        .collect();
    let last_part = parts.len() - 1;
    for (part_number, part_transfers) in parts.into_iter().enumerate() {
        let ack: AckResponse = send_command(
            &engine,
            CommandKind::SubmitJobPart,
            &SubmitJobPartRequest {
                job_id: job_id.to_string(),
                part_number: part_number as u32,
                is_final_part: part_number == last_part,
                transfers: part_transfers,
            },
        )
        .await?;
        if !ack.error_message.is_empty() {
            return Err(ack.error_message.into());
        }
    }

    let summary = watch_job(&engine, job_id, total as u64).await?;
    engine.shutdown().await;

    println!(
        "Job {}: {} of {} transfers complete, {} failed",
        job_id, summary.transfers_completed, summary.total_transfers, summary.transfers_failed
    );
    for pair in &summary.failed_transfers {
        println!("  failed: {} -> {}", pair.src, pair.dst);
    }
    if summary.transfers_failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}

/// Poll the progress summary until the job drains, rendering a progress bar.
async fn watch_job(
    engine: &Engine,
    job_id: JobId,
    total: u64,
) -> Result<ListJobSummaryResponse, Box<dyn std::error::Error>> {
    let bar = ProgressBar::new(total);
    bar.set_style(
        ProgressStyle::with_template("{bar:40} {pos}/{len} transfers {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    loop {
        let summary: ListJobSummaryResponse = send_command(
            engine,
            CommandKind::ListJobProgressSummary,
            &ListJobSummaryRequest {
                job_id: job_id.to_string(),
            },
        )
        .await?;
        if !summary.error_message.is_empty() {
            bar.abandon();
            return Err(summary.error_message.into());
        }

        let progressed = summary.transfers_completed + summary.transfers_failed;
        bar.set_position(progressed as u64);
        let mut drained = false;
        if let Some(job) = engine.registry().get(job_id).await {
            bar.set_message(hoist::base::format_speed(
                job.throughput().bytes_per_second(),
            ));
            drained = job.is_drained().await;
        }

        // Statuses go terminal before finalize runs; wait for the drain
        // too so shutdown never races a transfer still releasing itself.
        if summary.complete_job_ordered && progressed >= summary.total_transfers && drained {
            bar.finish();
            return Ok(summary);
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

async fn run_list(
    config: &EngineConfig,
    job_id: Option<JobId>,
    with_status: Option<TransferStatus>,
) -> Result<(), Box<dyn std::error::Error>> {
    let engine = engine_for(config);

    match (job_id, with_status) {
        (None, _) => {
            let response: ListJobsResponse =
                send_command(&engine, CommandKind::ListJobs, &ListJobsRequest {}).await?;
            if !response.error_message.is_empty() {
                return Err(response.error_message.into());
            }
            if response.job_ids.is_empty() {
                println!("No jobs");
            }
            for id in response.job_ids {
                println!("{}", id);
            }
        }
        (Some(id), None) => {
            let summary: ListJobSummaryResponse = send_command(
                &engine,
                CommandKind::ListJobProgressSummary,
                &ListJobSummaryRequest {
                    job_id: id.to_string(),
                },
            )
            .await?;
            if !summary.error_message.is_empty() {
                return Err(summary.error_message.into());
            }
            println!("Job {}", summary.job_id);
            println!("  total transfers:  {}", summary.total_transfers);
            println!("  completed:        {}", summary.transfers_completed);
            println!("  failed:           {}", summary.transfers_failed);
            println!("  progress:         {:.1}%", summary.percentage_progress);
            println!("  final part seen:  {}", summary.complete_job_ordered);
            for pair in &summary.failed_transfers {
                println!("  failed: {} -> {}", pair.src, pair.dst);
            }
        }
        (Some(id), Some(status)) => {
            let response: ListJobTransfersResponse = send_command(
                &engine,
                CommandKind::ListJobTransfers,
                &ListJobTransfersRequest {
                    job_id: id.to_string(),
                    of_status: Some(status.to_string()),
                },
            )
            .await?;
            if !response.error_message.is_empty() {
                return Err(response.error_message.into());
            }
            for detail in &response.details {
                println!(
                    "{}  {} -> {}",
                    detail.transfer_status, detail.src, detail.dst
                );
            }
        }
    }
    Ok(())
}

//! Configuration management for hoist.
//!
//! This module handles loading, saving, and managing configuration for the
//! transfer engine. Configuration is stored in TOML format and covers chunk
//! sizing, worker scheduling, bandwidth pacing, and destination retry policy.

use crate::error::TransferError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

// Chunking constants
// Default block size balances request overhead and commit granularity.
// Larger blocks mean fewer round trips but coarser retry units.
pub const DEFAULT_BLOCK_SIZE: u64 = 4 * 1024 * 1024; // 4MB
pub const MAX_BLOCKS_PER_BLOB: u32 = 50_000;

// Scheduling constants
pub const DEFAULT_CHUNK_WORKERS: usize = 16;
pub const DEFAULT_CHUNK_QUEUE_DEPTH: usize = 256;

// Pacing constants
// Chunk bodies are metered through the pacer in quanta this size so one
// large chunk cannot drain a whole second of budget at once.
pub const PACER_QUANTUM_BYTES: u64 = 64 * 1024; // 64KB

// Destination retry constants
pub const UPLOAD_MAX_TRIES: u32 = 20;
pub const UPLOAD_TRY_TIMEOUT_SECS: u64 = 600;
pub const UPLOAD_RETRY_DELAY_MS: u64 = 1000;
pub const UPLOAD_MAX_RETRY_DELAY_MS: u64 = 3000;

/// Main configuration structure containing all engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Chunk sizing configuration.
    pub chunking: ChunkingConfig,
    /// Worker pool scheduling configuration.
    pub scheduling: SchedulingConfig,
    /// Bandwidth pacing configuration.
    pub pacing: PacingConfig,
    /// Destination retry policy configuration.
    pub retry: RetryConfig,
}

/// Chunk sizing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Block size in bytes used when the caller does not specify one.
    pub block_size: u64,
    /// Upper bound on blocks per object, matching the destination's limit.
    pub max_blocks: u32,
}

/// Worker pool scheduling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingConfig {
    /// Number of chunk worker tasks draining the shared queue.
    pub chunk_workers: usize,
    /// Capacity of the shared chunk queue; enqueue blocks when full.
    pub chunk_queue_depth: usize,
}

/// Bandwidth pacing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacingConfig {
    /// Byte rate cap shared across all concurrent chunks.
    /// If None, pacing is disabled.
    pub bytes_per_second: Option<u64>,
}

/// Destination retry policy settings, handed to the destination factory
/// when a transfer opens its handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_tries: u32,
    pub try_timeout_secs: u64,
    pub retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
}

impl EngineConfig {
    /// Loads configuration from a file, or creates a new default configuration
    /// if the file doesn't exist.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file (TOML format)
    ///
    /// # Returns
    ///
    /// Returns the loaded or newly created configuration, or an error if
    /// the file exists but cannot be read or parsed.
    pub fn load_or_create(path: &PathBuf) -> Result<Self, TransferError> {
        if path.exists() {
            let content = fs::read_to_string(path).map_err(TransferError::Io)?;
            toml::from_str(&content).map_err(TransferError::TomlDeserialization)
        } else {
            let config = Self::default();
            config.save(path)?;
            Ok(config)
        }
    }

    /// Saves the configuration to a file in TOML format.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails or the file cannot be written.
    pub fn save(&self, path: &PathBuf) -> Result<(), TransferError> {
        let content = toml::to_string_pretty(self).map_err(TransferError::TomlSerialization)?;
        fs::write(path, content).map_err(TransferError::Io)?;
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            scheduling: SchedulingConfig::default(),
            pacing: PacingConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            max_blocks: MAX_BLOCKS_PER_BLOB,
        }
    }
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            chunk_workers: DEFAULT_CHUNK_WORKERS,
            chunk_queue_depth: DEFAULT_CHUNK_QUEUE_DEPTH,
        }
    }
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            bytes_per_second: None,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_tries: UPLOAD_MAX_TRIES,
            try_timeout_secs: UPLOAD_TRY_TIMEOUT_SECS,
            retry_delay_ms: UPLOAD_RETRY_DELAY_MS,
            max_retry_delay_ms: UPLOAD_MAX_RETRY_DELAY_MS,
        }
    }
}

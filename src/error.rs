//! Error types for the hoist transfer engine.
//!
//! This module defines the error types used throughout the engine. Errors
//! carry enough context to tell a setup failure apart from a chunk failure
//! or a bad control request, since each is handled differently.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during transfer and job-control operations.
#[derive(Debug, Error)]
pub enum TransferError {
    /// An I/O error occurred during file or destination operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Failed to serialize or deserialize JSON data.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failed to serialize data to TOML format.
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// Failed to deserialize data from TOML format.
    #[error("TOML deserialization error: {0}")]
    TomlDeserialization(#[from] toml::de::Error),

    /// A command payload could not be decoded into its request type.
    #[error("Failed to decode {command} request: {source}")]
    Decode {
        command: String,
        #[source]
        source: serde_json::Error,
    },

    /// The dispatcher received a command name it does not handle.
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// A prologue step failed before any chunk was scheduled.
    #[error("Transfer setup failed: {0}")]
    Setup(String),

    /// The destination rejected a stage, commit, or put call.
    #[error("Destination error: {0}")]
    Destination(String),

    /// The source requires more blocks than the destination allows.
    #[error("Source needs {needed} blocks, destination allows at most {limit}")]
    TooManyBlocks { needed: u64, limit: u32 },

    /// The requested source file was not found.
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// The transfer was cancelled by the user or system.
    #[error("Transfer cancelled")]
    Cancelled,

    /// No job with the given id is known to the engine.
    #[error("No job found with id {0}")]
    JobNotFound(String),

    /// A control request was well-formed JSON but semantically invalid.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

//! Shared types for the transfer engine.
//!
//! This module provides the small building blocks used across the engine:
//! chunk range tiling, transfer lifecycle statuses, and formatting helpers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Half-open byte range `[offset, offset + length)` covered by one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    /// Position of this chunk in the committed block list.
    pub index: u32,
    /// Start offset in bytes.
    pub offset: u64,
    /// Length in bytes. Never zero for a scheduled chunk.
    pub length: u64,
}

impl ChunkRange {
    /// Create a new chunk range.
    pub fn new(index: u32, offset: u64, length: u64) -> Self {
        Self {
            index,
            offset,
            length,
        }
    }

    /// End offset in bytes (exclusive).
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// Number of chunks needed to cover `source_size` bytes in `chunk_size`
/// steps. Returned untruncated so callers can check it against a block
/// ceiling before committing to that many chunks.
pub fn chunk_count(source_size: u64, chunk_size: u64) -> u64 {
    if source_size == 0 || chunk_size == 0 {
        return 0;
    }
    source_size.div_ceil(chunk_size)
}

/// Split `[0, source_size)` into consecutive fixed-size chunks.
///
/// Every chunk except possibly the last has exactly `chunk_size` bytes; the
/// last covers the remainder. The ranges tile the file with no gap and no
/// overlap. Callers must bound [`chunk_count`] against their block ceiling
/// before materializing ranges; chunk indexes fit `u32` only under such a
/// ceiling.
pub fn chunk_ranges(source_size: u64, chunk_size: u64) -> Vec<ChunkRange> {
    let count = chunk_count(source_size, chunk_size);
    let mut ranges = Vec::with_capacity(count as usize);
    let mut offset = 0u64;

    for index in 0..count {
        let length = chunk_size.min(source_size - offset);
        ranges.push(ChunkRange::new(index as u32, offset, length));
        offset += length;
    }

    ranges
}

/// Lifecycle status of a single transfer.
///
/// Transitions only move forward: once a transfer reaches a terminal status
/// (`Complete`, `Failed`, `Cancelled`) it never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum TransferStatus {
    /// Accepted into a job part, no chunk scheduled yet.
    NotStarted,
    /// Prologue ran and chunks are queued or in flight.
    InProgress,
    /// All chunks staged and the commit succeeded.
    Complete,
    /// A setup step, chunk upload, or commit failed.
    Failed,
    /// Cancelled before completion.
    Cancelled,
    /// Sentinel for an unrecognized status string. Never stored on a
    /// transfer; used to reject bad filter input before dispatch.
    Invalid,
}

impl TransferStatus {
    /// Reverse of the `repr(u8)` discriminant, for atomic status storage.
    pub(crate) fn from_repr(value: u8) -> TransferStatus {
        match value {
            0 => TransferStatus::NotStarted,
            1 => TransferStatus::InProgress,
            2 => TransferStatus::Complete,
            3 => TransferStatus::Failed,
            4 => TransferStatus::Cancelled,
            _ => TransferStatus::Invalid,
        }
    }

    /// Whether this status ends the transfer's lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferStatus::Complete | TransferStatus::Failed | TransferStatus::Cancelled
        )
    }

    /// Parse a status name, case-insensitively.
    ///
    /// Unknown strings map to [`TransferStatus::Invalid`] rather than an
    /// error so callers can validate filter flags with a plain comparison.
    pub fn parse(s: &str) -> TransferStatus {
        match s.to_ascii_lowercase().as_str() {
            "notstarted" => TransferStatus::NotStarted,
            "inprogress" => TransferStatus::InProgress,
            "complete" => TransferStatus::Complete,
            "failed" => TransferStatus::Failed,
            "cancelled" => TransferStatus::Cancelled,
            _ => TransferStatus::Invalid,
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransferStatus::NotStarted => "NotStarted",
            TransferStatus::InProgress => "InProgress",
            TransferStatus::Complete => "Complete",
            TransferStatus::Failed => "Failed",
            TransferStatus::Cancelled => "Cancelled",
            TransferStatus::Invalid => "Invalid",
        };
        f.write_str(name)
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Format speed as human-readable string
pub fn format_speed(bytes_per_sec: f64) -> String {
    format!("{}/s", format_bytes(bytes_per_sec as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_count_rounds_up() {
        assert_eq!(chunk_count(1000, 100), 10);
        assert_eq!(chunk_count(1001, 100), 11);
        assert_eq!(chunk_count(99, 100), 1);
        assert_eq!(chunk_count(0, 100), 0);
    }

    #[test]
    fn test_chunk_count_does_not_truncate_large_counts() {
        // A 1-byte chunk size on a >4 GiB source needs more chunks than fit
        // in 32 bits; the count must survive untruncated so the block
        // ceiling can reject it.
        let source_size = (1u64 << 32) + 5;
        assert_eq!(chunk_count(source_size, 1), source_size);
        assert_eq!(chunk_count(u64::MAX, 1), u64::MAX);
        assert_eq!(chunk_count(u64::MAX, 2), 1u64 << 63);
    }

    #[test]
    fn test_chunk_ranges_tile_exactly() {
        let ranges = chunk_ranges(250, 100);
        assert_eq!(ranges.len(), 3);
        assert_eq!(ranges[0], ChunkRange::new(0, 0, 100));
        assert_eq!(ranges[1], ChunkRange::new(1, 100, 100));
        assert_eq!(ranges[2], ChunkRange::new(2, 200, 50));
    }

    #[test]
    fn test_chunk_ranges_no_gap_no_overlap() {
        let source_size = 10 * 1024 * 1024 + 37;
        let ranges = chunk_ranges(source_size, 256 * 1024);
        let mut expected_offset = 0u64;
        for (i, range) in ranges.iter().enumerate() {
            assert_eq!(range.index, i as u32);
            assert_eq!(range.offset, expected_offset);
            assert!(range.length > 0);
            expected_offset = range.end();
        }
        assert_eq!(expected_offset, source_size);
    }

    #[test]
    fn test_chunk_ranges_exact_multiple() {
        let ranges = chunk_ranges(300, 100);
        assert_eq!(ranges.len(), 3);
        assert_eq!(ranges[2].length, 100);
        assert_eq!(ranges[2].end(), 300);
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(TransferStatus::parse("Complete"), TransferStatus::Complete);
        assert_eq!(TransferStatus::parse("failed"), TransferStatus::Failed);
        assert_eq!(
            TransferStatus::parse("INPROGRESS"),
            TransferStatus::InProgress
        );
        assert_eq!(TransferStatus::parse("bogus"), TransferStatus::Invalid);
        assert_eq!(TransferStatus::parse(""), TransferStatus::Invalid);
    }

    #[test]
    fn test_status_terminal() {
        assert!(TransferStatus::Complete.is_terminal());
        assert!(TransferStatus::Failed.is_terminal());
        assert!(TransferStatus::Cancelled.is_terminal());
        assert!(!TransferStatus::NotStarted.is_terminal());
        assert!(!TransferStatus::InProgress.is_terminal());
    }

    #[test]
    fn test_status_display_round_trip() {
        for status in [
            TransferStatus::NotStarted,
            TransferStatus::InProgress,
            TransferStatus::Complete,
            TransferStatus::Failed,
            TransferStatus::Cancelled,
        ] {
            assert_eq!(TransferStatus::parse(&status.to_string()), status);
        }
    }

    #[test]
    fn test_status_repr_round_trip() {
        for status in [
            TransferStatus::NotStarted,
            TransferStatus::InProgress,
            TransferStatus::Complete,
            TransferStatus::Failed,
            TransferStatus::Cancelled,
            TransferStatus::Invalid,
        ] {
            assert_eq!(TransferStatus::from_repr(status as u8), status);
        }
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.00 MB");
        assert_eq!(format_bytes(512), "512.00 B");
    }
}

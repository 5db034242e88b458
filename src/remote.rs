//! Destination capability traits.
//!
//! The engine never talks HTTP itself. It drives a [`BlockDestination`]
//! handle obtained from a [`DestinationFactory`], which binds the handle to
//! a retry and logging policy when it is opened. Implementations decide what
//! staging and committing mean; the engine only guarantees call ordering and
//! block-list order.

use crate::config::RetryConfig;
use crate::error::TransferError;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Bytes examined when sniffing a content type.
const SNIFF_LEN: usize = 512;

/// Opaque identifier for a staged block.
///
/// Ids are generated engine-side as the base64 encoding of a fresh UUID
/// string, which keeps them fixed-length and unique per chunk attempt.
/// Destinations treat them as tokens and never parse them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockId(String);

impl BlockId {
    /// Generate a fresh block id.
    pub fn generate() -> Self {
        let id = Uuid::new_v4().to_string();
        BlockId(BASE64.encode(id.as_bytes()))
    }

    /// The id as a string token.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Headers and metadata applied when an object is committed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobHeaders {
    /// MIME content type. Sniffed from the source when the caller does not
    /// supply one.
    pub content_type: String,
    /// Caller-supplied metadata pairs stored with the object.
    pub metadata: HashMap<String, String>,
}

/// Retry and logging policy a destination handle is bound to at open time.
#[derive(Debug, Clone)]
pub struct RequestPolicy {
    pub max_tries: u32,
    pub try_timeout: Duration,
    pub retry_delay: Duration,
    pub max_retry_delay: Duration,
    /// Floor for per-request logging on this handle.
    pub minimum_log_level: tracing::Level,
}

impl RequestPolicy {
    /// Build a policy from the retry section of the engine config.
    pub fn from_retry(retry: &RetryConfig, minimum_log_level: tracing::Level) -> Self {
        Self {
            max_tries: retry.max_tries,
            try_timeout: Duration::from_secs(retry.try_timeout_secs),
            retry_delay: Duration::from_millis(retry.retry_delay_ms),
            max_retry_delay: Duration::from_millis(retry.max_retry_delay_ms),
            minimum_log_level,
        }
    }
}

impl Default for RequestPolicy {
    fn default() -> Self {
        Self::from_retry(&RetryConfig::default(), tracing::Level::INFO)
    }
}

/// One open object at the destination.
///
/// Chunked uploads call `stage_block` any number of times in any order, then
/// `commit_block_list` exactly once with the ids in object order. Small
/// objects call `put_blob` instead and never touch the block calls.
#[async_trait]
pub trait BlockDestination: Send + Sync {
    /// Upload one block body under `block_id`. Staged blocks are invisible
    /// until committed.
    async fn stage_block(&self, block_id: &BlockId, body: Bytes) -> Result<(), TransferError>;

    /// Atomically assemble the object from previously staged blocks, in the
    /// given order, with the given headers.
    async fn commit_block_list(
        &self,
        block_ids: &[BlockId],
        headers: &BlobHeaders,
    ) -> Result<(), TransferError>;

    /// Upload the whole object in one call. The body may be empty.
    async fn put_blob(&self, body: Bytes, headers: &BlobHeaders) -> Result<(), TransferError>;
}

/// Opens destination handles for transfers.
///
/// The locator is the transfer's destination string; its meaning belongs to
/// the implementation (a path for the filesystem store, a URL for a real
/// remote).
#[async_trait]
pub trait DestinationFactory: Send + Sync {
    async fn open(
        &self,
        locator: &str,
        policy: &RequestPolicy,
    ) -> Result<Arc<dyn BlockDestination>, TransferError>;
}

/// Guess a content type from the leading bytes of an object.
///
/// Recognizes a handful of common magic numbers, then falls back to
/// `text/plain` for UTF-8 data and `application/octet-stream` otherwise.
pub fn sniff_content_type(head: &[u8]) -> &'static str {
    let head = &head[..head.len().min(SNIFF_LEN)];

    if head.starts_with(b"%PDF-") {
        return "application/pdf";
    }
    if head.starts_with(b"\x89PNG\r\n\x1a\n") {
        return "image/png";
    }
    if head.starts_with(b"\xFF\xD8\xFF") {
        return "image/jpeg";
    }
    if head.starts_with(b"GIF87a") || head.starts_with(b"GIF89a") {
        return "image/gif";
    }
    if head.starts_with(b"PK\x03\x04") {
        return "application/zip";
    }
    if head.starts_with(b"\x1F\x8B") {
        return "application/gzip";
    }

    match std::str::from_utf8(head) {
        Ok(_) => "text/plain; charset=utf-8",
        // A decode error with no length is an incomplete trailing sequence,
        // which happens when the sniff window cuts a multi-byte character.
        Err(e) if e.error_len().is_none() && e.valid_up_to() > 0 => "text/plain; charset=utf-8",
        Err(_) => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_ids_are_unique() {
        let a = BlockId::generate();
        let b = BlockId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_block_id_is_base64_of_uuid() {
        let id = BlockId::generate();
        let decoded = BASE64.decode(id.as_str()).unwrap();
        let uuid_str = String::from_utf8(decoded).unwrap();
        assert!(Uuid::parse_str(&uuid_str).is_ok());
    }

    #[test]
    fn test_block_ids_have_fixed_length() {
        let a = BlockId::generate();
        let b = BlockId::generate();
        assert_eq!(a.as_str().len(), b.as_str().len());
    }

    #[test]
    fn test_sniff_magic_numbers() {
        assert_eq!(sniff_content_type(b"%PDF-1.7 ..."), "application/pdf");
        assert_eq!(
            sniff_content_type(b"\x89PNG\r\n\x1a\n....."),
            "image/png"
        );
        assert_eq!(sniff_content_type(b"\xFF\xD8\xFF\xE0"), "image/jpeg");
        assert_eq!(sniff_content_type(b"GIF89a......"), "image/gif");
        assert_eq!(sniff_content_type(b"PK\x03\x04...."), "application/zip");
        assert_eq!(sniff_content_type(b"\x1F\x8B\x08...."), "application/gzip");
    }

    #[test]
    fn test_sniff_text_and_binary() {
        assert_eq!(
            sniff_content_type(b"hello world\n"),
            "text/plain; charset=utf-8"
        );
        assert_eq!(
            sniff_content_type(b""),
            "text/plain; charset=utf-8"
        );
        assert_eq!(
            sniff_content_type(&[0x00, 0x01, 0x02, 0xFF]),
            "application/octet-stream"
        );
    }

    #[test]
    fn test_sniff_truncated_utf8_is_text() {
        // Multi-byte character cut mid-sequence at the end of the window.
        let mut data = vec![b'a'; 511];
        data.extend_from_slice("é".as_bytes());
        data.extend_from_slice(b"tail beyond window");
        assert_eq!(sniff_content_type(&data), "text/plain; charset=utf-8");
    }

    #[test]
    fn test_policy_from_retry() {
        let retry = RetryConfig::default();
        let policy = RequestPolicy::from_retry(&retry, tracing::Level::WARN);
        assert_eq!(policy.max_tries, retry.max_tries);
        assert_eq!(policy.try_timeout, Duration::from_secs(retry.try_timeout_secs));
        assert_eq!(policy.minimum_log_level, tracing::Level::WARN);
    }
}

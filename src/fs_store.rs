//! Filesystem-backed destination.
//!
//! Stages blocks as files in a per-object staging directory and assembles
//! the object on commit. This is the runnable target for the CLI and the
//! end-to-end sink in tests; it is not a cloud client. Committed objects get
//! a `.headers.json` sidecar recording the headers and metadata they were
//! committed with.

use crate::error::TransferError;
use crate::remote::{BlobHeaders, BlockDestination, BlockId, DestinationFactory, RequestPolicy};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::debug;

/// Factory for filesystem destinations. Locators are object paths.
#[derive(Debug, Default)]
pub struct FsStore;

impl FsStore {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DestinationFactory for FsStore {
    async fn open(
        &self,
        locator: &str,
        policy: &RequestPolicy,
    ) -> Result<Arc<dyn BlockDestination>, TransferError> {
        let object_path = PathBuf::from(locator);
        if let Some(parent) = object_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let staging_dir = staging_dir_for(&object_path);
        debug!(
            object = %object_path.display(),
            max_tries = policy.max_tries,
            "Opened filesystem destination"
        );

        Ok(Arc::new(FsDestination {
            object_path,
            staging_dir,
            policy: policy.clone(),
        }))
    }
}

/// One object being written under a filesystem root.
#[derive(Debug)]
struct FsDestination {
    object_path: PathBuf,
    staging_dir: PathBuf,
    policy: RequestPolicy,
}

/// Staging directory sits next to the object so commit is a same-filesystem
/// rename-free concatenation.
fn staging_dir_for(object_path: &Path) -> PathBuf {
    let name = object_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "object".to_string());
    object_path.with_file_name(format!(".{}.staging", name))
}

/// Block ids use the standard base64 alphabet; map the two characters that
/// are not filename-safe.
fn staging_file_name(block_id: &BlockId) -> String {
    block_id.as_str().replace('/', "_").replace('+', "-")
}

#[async_trait]
impl BlockDestination for FsDestination {
    async fn stage_block(&self, block_id: &BlockId, body: Bytes) -> Result<(), TransferError> {
        fs::create_dir_all(&self.staging_dir).await?;
        let path = self.staging_dir.join(staging_file_name(block_id));
        fs::write(&path, &body).await?;
        debug!(block = %block_id, size = body.len(), "Staged block");
        Ok(())
    }

    async fn commit_block_list(
        &self,
        block_ids: &[BlockId],
        headers: &BlobHeaders,
    ) -> Result<(), TransferError> {
        let mut assembled = Vec::new();
        for block_id in block_ids {
            let path = self.staging_dir.join(staging_file_name(block_id));
            let body = fs::read(&path).await.map_err(|e| {
                TransferError::Destination(format!(
                    "Missing staged block {} for {}: {}",
                    block_id,
                    self.object_path.display(),
                    e
                ))
            })?;
            assembled.extend_from_slice(&body);
        }

        fs::write(&self.object_path, &assembled).await?;
        write_headers_sidecar(&self.object_path, headers).await?;
        fs::remove_dir_all(&self.staging_dir).await?;

        debug!(
            object = %self.object_path.display(),
            blocks = block_ids.len(),
            bytes = assembled.len(),
            max_tries = self.policy.max_tries,
            "Committed block list"
        );
        Ok(())
    }

    async fn put_blob(&self, body: Bytes, headers: &BlobHeaders) -> Result<(), TransferError> {
        fs::write(&self.object_path, &body).await?;
        write_headers_sidecar(&self.object_path, headers).await?;
        debug!(
            object = %self.object_path.display(),
            bytes = body.len(),
            "Put whole object"
        );
        Ok(())
    }
}

async fn write_headers_sidecar(
    object_path: &Path,
    headers: &BlobHeaders,
) -> Result<(), TransferError> {
    let sidecar = sidecar_path(object_path);
    let content = serde_json::to_string_pretty(headers)?;
    fs::write(&sidecar, content).await?;
    Ok(())
}

/// Path of the headers sidecar written next to a committed object.
pub fn sidecar_path(object_path: &Path) -> PathBuf {
    let name = object_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "object".to_string());
    object_path.with_file_name(format!("{}.headers.json", name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn headers_with_type(content_type: &str) -> BlobHeaders {
        BlobHeaders {
            content_type: content_type.to_string(),
            metadata: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_stage_and_commit_assembles_in_order() {
        let dir = tempdir().unwrap();
        let object = dir.path().join("out/blob.bin");
        let store = FsStore::new();
        let dest = store
            .open(object.to_str().unwrap(), &RequestPolicy::default())
            .await
            .unwrap();

        let first = BlockId::generate();
        let second = BlockId::generate();
        // Stage out of order; commit order decides layout.
        dest.stage_block(&second, Bytes::from_static(b" world"))
            .await
            .unwrap();
        dest.stage_block(&first, Bytes::from_static(b"hello"))
            .await
            .unwrap();
        dest.commit_block_list(
            &[first, second],
            &headers_with_type("text/plain; charset=utf-8"),
        )
        .await
        .unwrap();

        let assembled = std::fs::read(&object).unwrap();
        assert_eq!(&assembled, b"hello world");

        let staging = staging_dir_for(&object);
        assert!(!staging.exists());

        let sidecar = std::fs::read_to_string(sidecar_path(&object)).unwrap();
        assert!(sidecar.contains("text/plain"));
    }

    #[tokio::test]
    async fn test_commit_missing_block_fails() {
        let dir = tempdir().unwrap();
        let object = dir.path().join("blob.bin");
        let store = FsStore::new();
        let dest = store
            .open(object.to_str().unwrap(), &RequestPolicy::default())
            .await
            .unwrap();

        let staged = BlockId::generate();
        let never_staged = BlockId::generate();
        dest.stage_block(&staged, Bytes::from_static(b"data"))
            .await
            .unwrap();

        let result = dest
            .commit_block_list(&[staged, never_staged], &BlobHeaders::default())
            .await;
        assert!(matches!(result, Err(TransferError::Destination(_))));
    }

    #[tokio::test]
    async fn test_put_blob_writes_object() {
        let dir = tempdir().unwrap();
        let object = dir.path().join("small.txt");
        let store = FsStore::new();
        let dest = store
            .open(object.to_str().unwrap(), &RequestPolicy::default())
            .await
            .unwrap();

        dest.put_blob(
            Bytes::from_static(b"tiny"),
            &headers_with_type("text/plain; charset=utf-8"),
        )
        .await
        .unwrap();

        assert_eq!(std::fs::read(&object).unwrap(), b"tiny");
    }

    #[tokio::test]
    async fn test_put_blob_empty_body() {
        let dir = tempdir().unwrap();
        let object = dir.path().join("empty.bin");
        let store = FsStore::new();
        let dest = store
            .open(object.to_str().unwrap(), &RequestPolicy::default())
            .await
            .unwrap();

        dest.put_blob(Bytes::new(), &BlobHeaders::default())
            .await
            .unwrap();

        assert_eq!(std::fs::read(&object).unwrap().len(), 0);
    }
}

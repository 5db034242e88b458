//! Memory-mapped source files.
//!
//! A transfer maps its source once in the prologue; every chunk then reads
//! its own disjoint range from the shared mapping, so no locking is needed
//! around reads. The mapping and the file handle are released together when
//! the finalizing chunk drops the transfer's reference.

use crate::base::ChunkRange;
use crate::config::PACER_QUANTUM_BYTES;
use crate::error::TransferError;
use crate::pacer::Pacer;
use bytes::{Bytes, BytesMut};
use memmap2::MmapOptions;
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};

/// Read-only view of a source file backed by a memory mapping.
///
/// The file handle is held alongside the mapping so both are released in a
/// single drop. The source must be non-empty; zero-length transfers skip
/// mapping entirely.
#[derive(Debug)]
pub struct SourceView {
    path: PathBuf,
    mmap: memmap2::Mmap,
    len: u64,
    _file: std::fs::File,
}

impl SourceView {
    /// Map the file at `path` for reading.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, TransferError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).open(&path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                TransferError::FileNotFound(path.clone())
            } else {
                TransferError::Io(e)
            }
        })?;

        let metadata = file.metadata().map_err(TransferError::Io)?;
        let len = metadata.len();

        let mmap = unsafe { MmapOptions::new().map(&file).map_err(TransferError::Io)? };

        Ok(Self {
            path,
            mmap,
            len,
            _file: file,
        })
    }

    /// Size of the mapped file in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the mapped file is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Path the view was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The whole mapping. Used for content-type sniffing in the epilogue.
    pub fn as_bytes(&self) -> &[u8] {
        &self.mmap
    }

    /// The bytes covered by one chunk range.
    pub fn slice(&self, range: ChunkRange) -> &[u8] {
        &self.mmap[range.offset as usize..range.end() as usize]
    }

    /// Copy a chunk range into an owned body, metering the copy through the
    /// pacer in fixed quanta so one large chunk cannot burst past the rate
    /// cap.
    pub async fn read_paced(&self, range: ChunkRange, pacer: &Pacer) -> Bytes {
        let slice = self.slice(range);
        let mut body = BytesMut::with_capacity(slice.len());
        let mut copied = 0usize;

        while copied < slice.len() {
            let step = (PACER_QUANTUM_BYTES as usize).min(slice.len() - copied);
            pacer.acquire(step as u64).await;
            body.extend_from_slice(&slice[copied..copied + step]);
            copied += step;
        }

        body.freeze()
    }
}

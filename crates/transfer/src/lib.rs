//! Chunk splitting and transfer progress monitoring.
//!
//! Oversized files are cut into bounded parts by [`ChunkSplitter`] without
//! ever holding a whole part in memory. In-flight transfers are observed by
//! [`ProgressMonitor`], which polls a file size or a [`ByteCounter`].

mod chunked;
mod progress;
mod types;

pub use chunked::{ChunkSplitter, WrittenChunk};
pub use progress::{
    MonitorHandle, MonitorOutcome, ProgressMonitor, ProgressSink, ProgressSource, ProgressUpdate,
    SinkError, SpeedCalculator, TransferKind, percentage,
};
pub use types::{ByteCounter, ChunkDescriptor};

/// Default chunk size limit: 2 GiB.
///
/// Files strictly larger than this are split before upload.
pub const DEFAULT_CHUNK_SIZE_LIMIT: u64 = 2 * 1024 * 1024 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(std::io::Error),

    #[error("disk full: {0}")]
    DiskFull(std::io::Error),

    #[error("chunk {index} out of range ({total} chunks)")]
    ChunkOutOfRange { index: usize, total: usize },

    #[error("source changed while splitting: expected {expected} bytes, found {actual}")]
    SourceChanged { expected: u64, actual: u64 },
}

impl From<std::io::Error> for TransferError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::StorageFull {
            Self::DiskFull(err)
        } else {
            Self::Io(err)
        }
    }
}

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// One contiguous slice of a file produced by [`ChunkSplitter`](crate::ChunkSplitter).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkDescriptor {
    /// 0-based position among the parts.
    pub index: usize,
    /// Number of parts the source splits into.
    pub total: usize,
    /// Byte offset of the slice within the source file.
    pub offset: u64,
    /// Slice length in bytes.
    pub length: u64,
    /// File name of the source (used for part naming and captions).
    pub source_name: String,
    /// Size of the source file when the splitter was opened.
    pub source_size: u64,
}

impl ChunkDescriptor {
    /// 1-based ordinal, as shown to receivers.
    pub fn ordinal(&self) -> usize {
        self.index + 1
    }

    /// Returns `true` for the final part.
    pub fn is_last(&self) -> bool {
        self.ordinal() == self.total
    }

    /// File name of the materialized part: `<source>.part<index>`.
    pub fn part_name(&self) -> String {
        format!("{}.part{}", self.source_name, self.index)
    }

    /// Receiver-facing caption: `Part i/N of <source>`.
    pub fn caption(&self) -> String {
        format!(
            "Part {}/{} of {}",
            self.ordinal(),
            self.total,
            self.source_name
        )
    }
}

/// Count of bytes moved so far by a transfer.
///
/// Clones share the same counter, so an uploader can advance it while a
/// [`ProgressMonitor`](crate::ProgressMonitor) reads it from another task.
#[derive(Debug, Clone, Default)]
pub struct ByteCounter(Arc<AtomicU64>);

impl ByteCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `bytes` and returns the new total.
    pub fn add(&self, bytes: u64) -> u64 {
        self.0.fetch_add(bytes, Ordering::Relaxed) + bytes
    }

    pub fn set(&self, bytes: u64) {
        self.0.store(bytes, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::types::ChunkDescriptor;
use crate::{DEFAULT_CHUNK_SIZE_LIMIT, TransferError};

/// Copy buffer used when materializing a part. Bounds memory per split.
const COPY_BUFFER_SIZE: usize = 1024 * 1024;

// ---------------------------------------------------------------------------
// ChunkSplitter
// ---------------------------------------------------------------------------

/// A part written to disk by [`ChunkSplitter::write_part`].
#[derive(Debug, Clone)]
pub struct WrittenChunk {
    pub descriptor: ChunkDescriptor,
    /// Location of the part file.
    pub path: PathBuf,
    /// SHA-256 hex digest of the part payload.
    pub checksum: String,
}

/// Splits a file into fixed-size parts.
///
/// The sequence is lazy and restartable: descriptors are computed from the
/// index alone, and any part can be (re)written independently with
/// [`write_part`](Self::write_part).
#[derive(Debug, Clone)]
pub struct ChunkSplitter {
    source: PathBuf,
    source_name: String,
    file_size: u64,
    chunk_size: u64,
}

impl ChunkSplitter {
    /// Opens `path` for splitting into parts of at most `chunk_size` bytes.
    ///
    /// If `chunk_size` is 0, [`DEFAULT_CHUNK_SIZE_LIMIT`] (2 GiB) is used.
    pub fn open(path: &Path, chunk_size: u64) -> Result<Self, TransferError> {
        let file_size = std::fs::metadata(path)?.len();
        let chunk_size = if chunk_size == 0 {
            DEFAULT_CHUNK_SIZE_LIMIT
        } else {
            chunk_size
        };
        let source_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".into());

        Ok(Self {
            source: path.to_path_buf(),
            source_name,
            file_size,
            chunk_size,
        })
    }

    /// Number of parts: `ceil(file_size / chunk_size)`, 0 for an empty file.
    pub fn chunk_count(&self) -> usize {
        self.file_size.div_ceil(self.chunk_size) as usize
    }

    /// Source file size observed at [`open`](Self::open).
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// Describes part `index`, or `None` past the end.
    pub fn descriptor(&self, index: usize) -> Option<ChunkDescriptor> {
        let total = self.chunk_count();
        if index >= total {
            return None;
        }
        let offset = index as u64 * self.chunk_size;
        let length = std::cmp::min(self.chunk_size, self.file_size - offset);
        Some(ChunkDescriptor {
            index,
            total,
            offset,
            length,
            source_name: self.source_name.clone(),
            source_size: self.file_size,
        })
    }

    /// Iterates all part descriptors in index order.
    pub fn descriptors(&self) -> impl Iterator<Item = ChunkDescriptor> + '_ {
        (0..self.chunk_count()).filter_map(|i| self.descriptor(i))
    }

    /// Streams part `index` into `dest_dir/<source>.part<index>`.
    ///
    /// Reads exactly the part's byte range through a bounded buffer. On any
    /// failure the partially written part file is removed.
    pub fn write_part(&self, index: usize, dest_dir: &Path) -> Result<WrittenChunk, TransferError> {
        let descriptor = self
            .descriptor(index)
            .ok_or(TransferError::ChunkOutOfRange {
                index,
                total: self.chunk_count(),
            })?;

        let current_size = std::fs::metadata(&self.source)?.len();
        if current_size != self.file_size {
            return Err(TransferError::SourceChanged {
                expected: self.file_size,
                actual: current_size,
            });
        }

        let path = dest_dir.join(descriptor.part_name());
        match self.copy_range(&descriptor, &path) {
            Ok(checksum) => {
                debug!(
                    part = %descriptor.part_name(),
                    bytes = descriptor.length,
                    checksum = %checksum,
                    "part written"
                );
                Ok(WrittenChunk {
                    descriptor,
                    path,
                    checksum,
                })
            }
            Err(e) => {
                let _ = std::fs::remove_file(&path);
                Err(e)
            }
        }
    }

    fn copy_range(
        &self,
        descriptor: &ChunkDescriptor,
        path: &Path,
    ) -> Result<String, TransferError> {
        let mut source = std::fs::File::open(&self.source)?;
        source.seek(SeekFrom::Start(descriptor.offset))?;
        let mut source = source.take(descriptor.length);

        let mut out = std::fs::File::create(path)?;
        let mut hasher = Sha256::new();
        let buf_len = std::cmp::min(descriptor.length, COPY_BUFFER_SIZE as u64).max(1) as usize;
        let mut buf = vec![0u8; buf_len];
        let mut written: u64 = 0;

        loop {
            let n = source.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            out.write_all(&buf[..n])?;
            written += n as u64;
        }

        // Source shrank underneath us.
        if written != descriptor.length {
            return Err(TransferError::SourceChanged {
                expected: self.file_size,
                actual: descriptor.offset + written,
            });
        }

        out.sync_all()?;
        Ok(hex::encode(hasher.finalize()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(data).unwrap();
        path
    }

    fn patterned(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    #[test]
    fn chunk_count_boundaries() {
        let dir = TempDir::new().unwrap();

        let exact = create_test_file(dir.path(), "exact.bin", &patterned(10));
        let splitter = ChunkSplitter::open(&exact, 10).unwrap();
        assert_eq!(splitter.chunk_count(), 1);
        assert_eq!(splitter.descriptor(0).unwrap().length, 10);

        let over = create_test_file(dir.path(), "over.bin", &patterned(11));
        let splitter = ChunkSplitter::open(&over, 10).unwrap();
        let lengths: Vec<u64> = splitter.descriptors().map(|d| d.length).collect();
        assert_eq!(lengths, vec![10, 1]);

        let empty = create_test_file(dir.path(), "empty.bin", b"");
        let splitter = ChunkSplitter::open(&empty, 10).unwrap();
        assert_eq!(splitter.chunk_count(), 0);
        assert!(splitter.descriptor(0).is_none());
    }

    #[test]
    fn zero_limit_uses_default() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "x.bin", b"x");
        let splitter = ChunkSplitter::open(&path, 0).unwrap();
        assert_eq!(splitter.chunk_size(), DEFAULT_CHUNK_SIZE_LIMIT);
        assert_eq!(splitter.chunk_count(), 1);
    }

    #[test]
    fn descriptors_cover_file_exactly() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "movie.mkv", &patterned(45));
        let splitter = ChunkSplitter::open(&path, 20).unwrap();

        let descriptors: Vec<_> = splitter.descriptors().collect();
        assert_eq!(descriptors.len(), 3);
        assert_eq!(descriptors.iter().map(|d| d.length).sum::<u64>(), 45);
        for d in &descriptors[..2] {
            assert_eq!(d.length, 20);
        }
        assert_eq!(descriptors[2].offset, 40);
        assert_eq!(descriptors[2].caption(), "Part 3/3 of movie.mkv");
    }

    #[test]
    fn parts_concatenate_to_original() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("parts");
        std::fs::create_dir_all(&out).unwrap();

        for (size, limit) in [(1usize, 1u64), (100, 7), (4096, 1000), (3000, 3000), (3001, 3000)] {
            let original = patterned(size);
            let path = create_test_file(dir.path(), "source.bin", &original);
            let splitter = ChunkSplitter::open(&path, limit).unwrap();
            assert_eq!(splitter.chunk_count() as u64, (size as u64).div_ceil(limit));

            let mut joined = Vec::new();
            for i in 0..splitter.chunk_count() {
                let part = splitter.write_part(i, &out).unwrap();
                let bytes = std::fs::read(&part.path).unwrap();
                assert_eq!(bytes.len() as u64, part.descriptor.length);
                assert_eq!(part.checksum, hex::encode(Sha256::digest(&bytes)));
                if !part.descriptor.is_last() {
                    assert_eq!(bytes.len() as u64, limit);
                }
                joined.extend_from_slice(&bytes);
                std::fs::remove_file(&part.path).unwrap();
            }
            assert_eq!(joined, original, "size={size} limit={limit}");
        }
    }

    #[test]
    fn parts_can_be_written_out_of_order() {
        let dir = TempDir::new().unwrap();
        let data = b"AABBCCDDEE";
        let path = create_test_file(dir.path(), "data.bin", data);
        let splitter = ChunkSplitter::open(&path, 4).unwrap();

        let last = splitter.write_part(2, dir.path()).unwrap();
        assert_eq!(std::fs::read(&last.path).unwrap(), b"EE");
        assert!(last.path.ends_with("data.bin.part2"));

        let first = splitter.write_part(0, dir.path()).unwrap();
        assert_eq!(std::fs::read(&first.path).unwrap(), b"AABB");
    }

    #[test]
    fn out_of_range_index_rejected() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "data.bin", b"0123456789");
        let splitter = ChunkSplitter::open(&path, 4).unwrap();

        let result = splitter.write_part(3, dir.path());
        assert!(matches!(
            result.unwrap_err(),
            TransferError::ChunkOutOfRange { index: 3, total: 3 }
        ));
    }

    #[test]
    fn changed_source_rejected() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "data.bin", b"0123456789");
        let splitter = ChunkSplitter::open(&path, 4).unwrap();

        std::fs::write(&path, b"0123").unwrap();
        let result = splitter.write_part(0, dir.path());
        assert!(matches!(
            result.unwrap_err(),
            TransferError::SourceChanged {
                expected: 10,
                actual: 4
            }
        ));
        assert!(!dir.path().join("data.bin.part0").exists());
    }
}

//! Content classification by leading byte signature.

use std::io::{self, Read};
use std::path::Path;

/// ZIP local file header.
const ZIP_LOCAL_HEADER: &[u8; 4] = b"PK\x03\x04";
/// ZIP end-of-central-directory record (an archive with no members).
const ZIP_EMPTY_ARCHIVE: &[u8; 4] = b"PK\x05\x06";

/// What a fetched object turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    PlainFile,
    Archive,
}

/// Classifies the file at `path` from its first bytes. The name is ignored.
pub fn classify(path: &Path) -> io::Result<ContentKind> {
    let file = std::fs::File::open(path)?;
    let mut header = Vec::with_capacity(ZIP_LOCAL_HEADER.len());
    file.take(ZIP_LOCAL_HEADER.len() as u64)
        .read_to_end(&mut header)?;

    let kind = sniff(&header);
    tracing::debug!(path = %path.display(), ?kind, "classified content");
    Ok(kind)
}

/// Classifies a header buffer. Anything without a known signature is a
/// plain file.
pub fn sniff(header: &[u8]) -> ContentKind {
    if header.starts_with(ZIP_LOCAL_HEADER) || header.starts_with(ZIP_EMPTY_ARCHIVE) {
        ContentKind::Archive
    } else {
        ContentKind::PlainFile
    }
}

//! Job-scoped filesystem work for the relay pipeline.
//!
//! Provides per-job staging directories with guaranteed cleanup, content
//! classification by byte signature, and flat archive expansion.

mod archive;
mod classify;
mod staging;
mod validation;

pub use archive::{ExpandedMember, expand_archive};
pub use classify::{ContentKind, classify, sniff};
pub use staging::{StagingArea, StagingRoot};
pub use validation::validate_member_path;

/// Default staging root, relative to the working directory.
pub const DEFAULT_STAGING_ROOT: &str = "downloads";

/// Errors produced while expanding an archive.
#[derive(Debug, thiserror::Error)]
pub enum ExpandError {
    #[error("corrupt archive: {0}")]
    Corrupt(String),

    #[error("unsafe member path: {0}")]
    UnsafePath(String),

    #[error("member name collision: {0}")]
    Collision(String),

    #[error("disk full: {0}")]
    DiskFull(std::io::Error),

    #[error("I/O error: {0}")]
    Io(std::io::Error),
}

impl From<std::io::Error> for ExpandError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::StorageFull {
            Self::DiskFull(err)
        } else {
            Self::Io(err)
        }
    }
}

impl From<zip::result::ZipError> for ExpandError {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::UnexpectedEof | std::io::ErrorKind::InvalidData
                ) =>
            {
                Self::Corrupt(e.to_string())
            }
            zip::result::ZipError::Io(e) => e.into(),
            other => Self::Corrupt(other.to_string()),
        }
    }
}

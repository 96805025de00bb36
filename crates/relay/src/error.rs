//! Relay error types.

use std::io;
use std::time::Duration;

use linkrelay_file_ops::ExpandError;
use linkrelay_transfer::TransferError;

use crate::types::JobState;

/// Errors produced while resolving or downloading a link.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("invalid link: {0}")]
    LinkInvalid(String),

    #[error("unsupported source: {0}")]
    UnsupportedSource(String),

    #[error("download failed: {0}")]
    DownloadFailure(String),

    #[error("disk full: {0}")]
    DiskFull(io::Error),

    #[error("I/O error: {0}")]
    Io(io::Error),
}

impl From<io::Error> for FetchError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::StorageFull {
            Self::DiskFull(e)
        } else {
            Self::Io(e)
        }
    }
}

/// Errors reported by an [`Uploader`](crate::Uploader).
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("rejected by destination: {0}")]
    Rejected(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Why a relay job failed.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("invalid link: {0}")]
    LinkInvalid(String),

    #[error("unsupported source: {0}")]
    UnsupportedSource(String),

    #[error("download failed: {0}")]
    DownloadFailure(String),

    #[error("corrupt archive: {0}")]
    ArchiveCorrupt(String),

    #[error("archive member name collision: {0}")]
    ArchiveCollision(String),

    #[error("upload of \"{item}\" failed: {reason}")]
    UploadFailure { item: String, reason: String },

    #[error("disk full: {0}")]
    DiskFull(String),

    #[error("timed out after {limit:?} while {stage}")]
    Timeout { stage: JobState, limit: Duration },

    #[error("cancelled")]
    Cancelled,

    #[error("invalid job transition: {from} -> {to}")]
    InvalidTransition { from: JobState, to: JobState },

    #[error("I/O error: {0}")]
    Io(io::Error),
}

impl From<io::Error> for RelayError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::StorageFull {
            Self::DiskFull(e.to_string())
        } else {
            Self::Io(e)
        }
    }
}

impl From<FetchError> for RelayError {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::LinkInvalid(m) => Self::LinkInvalid(m),
            FetchError::UnsupportedSource(m) => Self::UnsupportedSource(m),
            FetchError::DownloadFailure(m) => Self::DownloadFailure(m),
            FetchError::DiskFull(e) => Self::DiskFull(e.to_string()),
            FetchError::Io(e) => Self::DownloadFailure(e.to_string()),
        }
    }
}

impl From<ExpandError> for RelayError {
    fn from(e: ExpandError) -> Self {
        match e {
            ExpandError::Corrupt(m) => Self::ArchiveCorrupt(m),
            ExpandError::UnsafePath(m) => Self::ArchiveCorrupt(format!("unsafe member path: {m}")),
            ExpandError::Collision(m) => Self::ArchiveCollision(m),
            ExpandError::DiskFull(e) => Self::DiskFull(e.to_string()),
            ExpandError::Io(e) => Self::Io(e),
        }
    }
}

impl From<TransferError> for RelayError {
    fn from(e: TransferError) -> Self {
        match e {
            TransferError::DiskFull(e) => Self::DiskFull(e.to_string()),
            TransferError::Io(e) => Self::Io(e),
            // The staged download no longer matches what was fetched.
            e @ TransferError::SourceChanged { .. } => Self::DownloadFailure(e.to_string()),
            e @ TransferError::ChunkOutOfRange { .. } => {
                Self::Io(io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))
            }
        }
    }
}

/// A job that did not complete.
///
/// `job_id` is `None` when the input was rejected before a job existed.
#[derive(Debug, thiserror::Error)]
#[error("{stage} failed: {error}")]
pub struct JobFailure {
    pub job_id: Option<String>,
    pub stage: JobState,
    #[source]
    pub error: RelayError,
}

impl JobFailure {
    /// Failure for input rejected before any job was created.
    pub fn rejected(error: RelayError) -> Self {
        Self {
            job_id: None,
            stage: JobState::Pending,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_full_maps_to_disk_full() {
        let err: RelayError = io::Error::new(io::ErrorKind::StorageFull, "no space").into();
        assert!(matches!(err, RelayError::DiskFull(_)));

        let err: FetchError = io::Error::new(io::ErrorKind::StorageFull, "no space").into();
        assert!(matches!(err, FetchError::DiskFull(_)));

        let err: RelayError = io::Error::new(io::ErrorKind::PermissionDenied, "nope").into();
        assert!(matches!(err, RelayError::Io(_)));
    }

    #[test]
    fn expand_errors_map_to_archive_kinds() {
        assert!(matches!(
            RelayError::from(ExpandError::Corrupt("crc".into())),
            RelayError::ArchiveCorrupt(_)
        ));
        assert!(matches!(
            RelayError::from(ExpandError::UnsafePath("../x".into())),
            RelayError::ArchiveCorrupt(_)
        ));
        assert!(matches!(
            RelayError::from(ExpandError::Collision("a/b".into())),
            RelayError::ArchiveCollision(_)
        ));
    }

    #[test]
    fn fetch_io_is_a_download_failure() {
        let err = RelayError::from(FetchError::Io(io::Error::other("reset")));
        assert!(matches!(err, RelayError::DownloadFailure(_)));
    }

    #[test]
    fn changed_source_is_a_download_failure() {
        let err = RelayError::from(TransferError::SourceChanged {
            expected: 100,
            actual: 40,
        });
        match err {
            RelayError::DownloadFailure(m) => assert!(m.contains("expected 100 bytes")),
            other => panic!("unexpected error: {other:?}"),
        }

        let err = RelayError::from(TransferError::ChunkOutOfRange { index: 3, total: 2 });
        assert!(matches!(err, RelayError::Io(ref e) if e.kind() == io::ErrorKind::InvalidInput));
    }

    #[test]
    fn failure_message_names_stage_and_cause() {
        let failure = JobFailure {
            job_id: Some("j1".into()),
            stage: JobState::Uploading,
            error: RelayError::UploadFailure {
                item: "Part 2/3 of movie.mkv".into(),
                reason: "rejected by destination: too big".into(),
            },
        };
        assert_eq!(
            failure.to_string(),
            "uploading failed: upload of \"Part 2/3 of movie.mkv\" failed: rejected by destination: too big"
        );
    }

    #[test]
    fn timeout_message() {
        let err = RelayError::Timeout {
            stage: JobState::Fetching,
            limit: Duration::from_secs(30),
        };
        assert_eq!(err.to_string(), "timed out after 30s while fetching");
    }
}

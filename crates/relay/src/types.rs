//! Data types for relay jobs.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use linkrelay_transfer::{DEFAULT_CHUNK_SIZE_LIMIT, ProgressUpdate};
use serde::{Deserialize, Serialize};

use crate::error::RelayError;
use crate::link::SourceLink;
use crate::upload::DEFAULT_CAPTION;

/// Lifecycle state of a [`TransferJob`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Fetching,
    Classifying,
    Expanding,
    Splitting,
    Uploading,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether the job may move from `self` to `next`.
    ///
    /// Any non-terminal state may fail. A plain file within the size limit
    /// goes straight from classifying to uploading.
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (Completed | Failed, _) => false,
            (_, Failed) => true,
            (Pending, Fetching)
            | (Fetching, Classifying)
            | (Classifying, Expanding | Splitting | Uploading)
            | (Expanding | Splitting, Uploading)
            | (Uploading, Completed) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Fetching => "fetching",
            Self::Classifying => "classifying",
            Self::Expanding => "expanding",
            Self::Splitting => "splitting",
            Self::Uploading => "uploading",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One link being relayed.
#[derive(Debug)]
pub struct TransferJob {
    id: String,
    link: SourceLink,
    staging_dir: PathBuf,
    state: JobState,
    total_bytes: Option<u64>,
    started: Instant,
    error: Option<String>,
}

impl TransferJob {
    pub fn new(id: impl Into<String>, link: SourceLink, staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            link,
            staging_dir: staging_dir.into(),
            state: JobState::Pending,
            total_bytes: None,
            started: Instant::now(),
            error: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn link(&self) -> &SourceLink {
        &self.link
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Size of the fetched object, once known.
    pub fn total_bytes(&self) -> Option<u64> {
        self.total_bytes
    }

    pub fn set_total_bytes(&mut self, bytes: u64) {
        self.total_bytes = Some(bytes);
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Moves to `next`, rejecting transitions the lifecycle does not allow.
    pub fn advance(&mut self, next: JobState) -> Result<(), RelayError> {
        if !self.state.can_transition_to(next) {
            return Err(RelayError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Marks the job failed, returning the stage it failed in.
    ///
    /// A job that already reached a terminal state keeps it.
    pub fn fail(&mut self, error: &RelayError) -> JobState {
        let stage = self.state;
        if !stage.is_terminal() {
            self.state = JobState::Failed;
            self.error = Some(error.to_string());
        }
        stage
    }
}

/// What to do with a fetched object of zero bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmptyObjectPolicy {
    /// Relay it like any other file.
    #[default]
    Upload,
    /// Fail the job as a download failure.
    Reject,
}

/// Tunables for the relay pipeline.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    /// Largest file uploaded in one piece. Bigger files are split.
    pub chunk_size_limit: u64,
    pub progress_interval: Duration,
    /// Bound on the whole fetch stage. `None` waits forever.
    pub fetch_timeout: Option<Duration>,
    /// Bound on each single upload. `None` waits forever.
    pub upload_timeout: Option<Duration>,
    pub empty_objects: EmptyObjectPolicy,
    /// Caption for files relayed as-is.
    pub caption: String,
}

impl RelaySettings {
    /// Replaces a zero chunk limit with [`DEFAULT_CHUNK_SIZE_LIMIT`], the
    /// same fallback the splitter applies.
    pub fn normalized(mut self) -> Self {
        if self.chunk_size_limit == 0 {
            self.chunk_size_limit = DEFAULT_CHUNK_SIZE_LIMIT;
        }
        self
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            chunk_size_limit: DEFAULT_CHUNK_SIZE_LIMIT,
            progress_interval: Duration::from_secs(1),
            fetch_timeout: None,
            upload_timeout: None,
            empty_objects: EmptyObjectPolicy::default(),
            caption: DEFAULT_CAPTION.to_string(),
        }
    }
}

/// Event emitted while jobs run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RelayEvent {
    /// The job entered a new state.
    StateChanged { job_id: String, state: JobState },
    /// Periodic progress of the current download or upload.
    Progress {
        job_id: String,
        #[serde(flatten)]
        update: ProgressUpdate,
    },
    /// One item reached the destination.
    ItemUploaded {
        job_id: String,
        caption: String,
        bytes: u64,
    },
    Completed {
        job_id: String,
        uploads: usize,
        elapsed_ms: u64,
    },
    Failed {
        job_id: String,
        stage: JobState,
        error: String,
    },
}

/// Summary of a completed job.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub job_id: String,
    /// The link without its key.
    pub link: String,
    pub name: String,
    pub bytes: u64,
    /// Number of items uploaded.
    pub uploads: usize,
    pub fetch_elapsed: Duration,
    pub elapsed: Duration,
    /// Staging directory the job used (removed by now).
    pub staging_dir: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use linkrelay_transfer::TransferKind;

    const ALL: [JobState; 8] = [
        JobState::Pending,
        JobState::Fetching,
        JobState::Classifying,
        JobState::Expanding,
        JobState::Splitting,
        JobState::Uploading,
        JobState::Completed,
        JobState::Failed,
    ];

    fn job() -> TransferJob {
        let link = SourceLink::parse("https://storage.example/file/abc#k").unwrap();
        TransferJob::new("j1", link, "/tmp/job-j1")
    }

    #[test]
    fn happy_paths_are_allowed() {
        use JobState::*;
        for path in [
            &[Pending, Fetching, Classifying, Uploading, Completed][..],
            &[Pending, Fetching, Classifying, Expanding, Uploading, Completed],
            &[Pending, Fetching, Classifying, Splitting, Uploading, Completed],
        ] {
            for pair in path.windows(2) {
                assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
            }
        }
    }

    #[test]
    fn skipping_stages_is_rejected() {
        use JobState::*;
        assert!(!Pending.can_transition_to(Uploading));
        assert!(!Fetching.can_transition_to(Expanding));
        assert!(!Expanding.can_transition_to(Splitting));
        assert!(!Uploading.can_transition_to(Fetching));
        assert!(!Classifying.can_transition_to(Completed));
    }

    #[test]
    fn terminal_states_are_final() {
        for next in ALL {
            assert!(!JobState::Completed.can_transition_to(next));
            assert!(!JobState::Failed.can_transition_to(next));
        }
        for state in ALL.into_iter().filter(|s| !s.is_terminal()) {
            assert!(state.can_transition_to(JobState::Failed), "{state}");
        }
    }

    #[test]
    fn advance_enforces_lifecycle() {
        let mut job = job();
        job.advance(JobState::Fetching).unwrap();
        let err = job.advance(JobState::Completed).unwrap_err();
        assert!(matches!(
            err,
            RelayError::InvalidTransition {
                from: JobState::Fetching,
                to: JobState::Completed
            }
        ));
        assert_eq!(job.state(), JobState::Fetching);
    }

    #[test]
    fn fail_records_stage_and_error() {
        let mut job = job();
        job.advance(JobState::Fetching).unwrap();

        let stage = job.fail(&RelayError::DownloadFailure("404".into()));
        assert_eq!(stage, JobState::Fetching);
        assert_eq!(job.state(), JobState::Failed);
        assert_eq!(job.error(), Some("download failed: 404"));

        // Already terminal.
        assert_eq!(job.fail(&RelayError::Cancelled), JobState::Failed);
        assert_eq!(job.error(), Some("download failed: 404"));
    }

    #[test]
    fn settings_defaults() {
        let settings = RelaySettings::default();
        assert_eq!(settings.chunk_size_limit, 2 * 1024 * 1024 * 1024);
        assert_eq!(settings.progress_interval, Duration::from_secs(1));
        assert!(settings.fetch_timeout.is_none());
        assert_eq!(settings.empty_objects, EmptyObjectPolicy::Upload);
        assert_eq!(settings.caption, DEFAULT_CAPTION);
    }

    #[test]
    fn zero_chunk_limit_normalizes_to_default() {
        let settings = RelaySettings {
            chunk_size_limit: 0,
            ..RelaySettings::default()
        }
        .normalized();
        assert_eq!(settings.chunk_size_limit, DEFAULT_CHUNK_SIZE_LIMIT);

        let settings = RelaySettings {
            chunk_size_limit: 10,
            ..RelaySettings::default()
        }
        .normalized();
        assert_eq!(settings.chunk_size_limit, 10);
    }

    #[test]
    fn events_serialize_tagged() {
        let event = RelayEvent::StateChanged {
            job_id: "j1".into(),
            state: JobState::Splitting,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "state_changed");
        assert_eq!(json["state"], "splitting");

        let event = RelayEvent::Progress {
            job_id: "j1".into(),
            update: ProgressUpdate::new(TransferKind::Upload, "a.txt", 50, 100, 0.0),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "progress");
        assert_eq!(json["kind"], "upload");
        assert_eq!(json["percentage"], 50.0);
    }

    #[test]
    fn empty_policy_parses_lowercase() {
        #[derive(Deserialize)]
        struct Wrapper {
            policy: EmptyObjectPolicy,
        }
        let w: Wrapper = serde_json::from_str(r#"{"policy":"reject"}"#).unwrap();
        assert_eq!(w.policy, EmptyObjectPolicy::Reject);
    }
}

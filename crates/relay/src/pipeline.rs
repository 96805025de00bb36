//! Relay orchestrator.
//!
//! Drives one [`TransferJob`] per incoming message through fetch,
//! classification, expansion or splitting, and upload. Jobs are independent:
//! the orchestrator can be shared and `relay` called concurrently.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use linkrelay_file_ops::{ContentKind, StagingArea, StagingRoot, classify, expand_archive};
use linkrelay_transfer::{
    ByteCounter, ChunkSplitter, ProgressMonitor, ProgressSink, ProgressSource, ProgressUpdate,
    SinkError, TransferKind,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{JobFailure, RelayError};
use crate::fetch::{FetchedObject, Fetcher, plan_fetch};
use crate::link::SourceLink;
use crate::types::{EmptyObjectPolicy, JobReport, JobState, RelayEvent, RelaySettings, TransferJob};
use crate::upload::{Uploader, member_caption};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Staging subdirectories. The fetched object keeps its remote name, so it
/// never shares a directory with derived files.
const FETCH_DIR: &str = "fetched";
const EXTRACT_DIR: &str = "extracted";
const PARTS_DIR: &str = "parts";

/// Orchestrates relay jobs.
pub struct RelayOrchestrator {
    fetcher: Arc<dyn Fetcher>,
    uploader: Arc<dyn Uploader>,
    staging: StagingRoot,
    settings: RelaySettings,
    monitor: ProgressMonitor,
    events_tx: mpsc::Sender<RelayEvent>,
    events_rx: Option<mpsc::Receiver<RelayEvent>>,
    cancel: CancellationToken,
}

impl RelayOrchestrator {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        uploader: Arc<dyn Uploader>,
        staging: StagingRoot,
        settings: RelaySettings,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            fetcher,
            uploader,
            staging,
            monitor: ProgressMonitor::new(Some(settings.progress_interval)),
            settings: settings.normalized(),
            events_tx,
            events_rx: Some(events_rx),
            cancel: CancellationToken::new(),
        }
    }

    /// Takes the event receiver. Can only be called once.
    ///
    /// Events are dropped rather than awaited when nobody drains the
    /// channel fast enough.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<RelayEvent>> {
        self.events_rx.take()
    }

    /// Returns the token that cancels every running and future job.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }

    /// Relays the first file link found in `text`.
    ///
    /// Text without a link, or with a folder link, is rejected before any
    /// job or staging directory is created. Once a job exists its staging
    /// directory is removed before this returns, whatever the outcome.
    pub async fn relay(&self, text: &str) -> Result<JobReport, JobFailure> {
        let link = SourceLink::find(text)
            .and_then(|link| link.require_file().map(|()| link))
            .map_err(|e| {
                debug!(error = %e, "message rejected");
                JobFailure::rejected(e.into())
            })?;

        let job_id = Uuid::new_v4().to_string();
        let mut staging = self.staging.acquire(&job_id).map_err(|e| {
            let error = RelayError::from(e);
            error!(job = %job_id, error = %error, "failed to create staging area");
            self.emit(RelayEvent::Failed {
                job_id: job_id.clone(),
                stage: JobState::Pending,
                error: error.to_string(),
            });
            JobFailure {
                job_id: Some(job_id.clone()),
                stage: JobState::Pending,
                error,
            }
        })?;

        let mut job = TransferJob::new(job_id, link, staging.path());
        info!(job = %job.id(), link = %job.link().redacted(), "job started");

        let outcome = self.run(&mut job, &staging).await;

        if let Err(e) = staging.release() {
            warn!(job = %job.id(), error = %e, "failed to release staging area");
        }

        let result = outcome.and_then(|summary| {
            self.transition(&mut job, JobState::Completed)?;
            Ok(summary)
        });

        match result {
            Ok(summary) => {
                let elapsed = job.elapsed();
                self.emit(RelayEvent::Completed {
                    job_id: job.id().to_string(),
                    uploads: summary.uploads,
                    elapsed_ms: elapsed.as_millis() as u64,
                });
                info!(
                    job = %job.id(),
                    uploads = summary.uploads,
                    bytes = summary.fetched.size,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "job completed"
                );
                Ok(JobReport {
                    job_id: job.id().to_string(),
                    link: job.link().redacted(),
                    name: summary.fetched.name,
                    bytes: summary.fetched.size,
                    uploads: summary.uploads,
                    fetch_elapsed: summary.fetched.elapsed,
                    elapsed,
                    staging_dir: job.staging_dir().to_path_buf(),
                })
            }
            Err(e) => {
                let stage = job.fail(&e);
                self.emit(RelayEvent::Failed {
                    job_id: job.id().to_string(),
                    stage,
                    error: e.to_string(),
                });
                error!(job = %job.id(), stage = %stage, error = %e, "job failed");
                Err(JobFailure {
                    job_id: Some(job.id().to_string()),
                    stage,
                    error: e,
                })
            }
        }
    }

    async fn run(
        &self,
        job: &mut TransferJob,
        staging: &StagingArea,
    ) -> Result<RunSummary, RelayError> {
        self.transition(job, JobState::Fetching)?;
        let fetched = self.fetch_stage(job, staging).await?;
        job.set_total_bytes(fetched.size);
        info!(
            job = %job.id(),
            name = %fetched.name,
            bytes = fetched.size,
            elapsed_ms = fetched.elapsed.as_millis() as u64,
            "object fetched"
        );

        self.transition(job, JobState::Classifying)?;
        self.check_cancelled()?;
        let path = fetched.path.clone();
        let kind = blocking(move || classify(&path)).await??;

        let uploads = match kind {
            ContentKind::Archive => self.relay_archive(job, staging, &fetched).await?,
            ContentKind::PlainFile if fetched.size > self.settings.chunk_size_limit => {
                self.relay_parts(job, staging, &fetched).await?
            }
            ContentKind::PlainFile => self.relay_single(job, &fetched).await?,
        };

        Ok(RunSummary { fetched, uploads })
    }

    async fn fetch_stage(
        &self,
        job: &TransferJob,
        staging: &StagingArea,
    ) -> Result<FetchedObject, RelayError> {
        let fetcher = self.fetcher.as_ref();
        let work = async {
            let dest_dir = staging.join(FETCH_DIR);
            tokio::fs::create_dir_all(&dest_dir).await?;
            let plan = plan_fetch(fetcher, job.link(), &dest_dir).await?;
            let monitor = self.monitor.spawn(
                TransferKind::Download,
                plan.object.name.clone(),
                ProgressSource::File(plan.dest.clone()),
                plan.expected_size(),
                self.sink(job),
                &self.cancel,
            );
            let result = plan.execute(fetcher).await;
            monitor.stop().await;
            Ok::<_, RelayError>(result?)
        };
        self.bounded(JobState::Fetching, self.settings.fetch_timeout, work)
            .await
    }

    async fn relay_single(
        &self,
        job: &mut TransferJob,
        fetched: &FetchedObject,
    ) -> Result<usize, RelayError> {
        if fetched.size == 0 && self.settings.empty_objects == EmptyObjectPolicy::Reject {
            return Err(RelayError::DownloadFailure(format!(
                "{} is empty",
                fetched.name
            )));
        }

        self.transition(job, JobState::Uploading)?;
        self.upload_item(job, &fetched.path, &self.settings.caption, &fetched.name)
            .await?;
        Ok(1)
    }

    async fn relay_archive(
        &self,
        job: &mut TransferJob,
        staging: &StagingArea,
        fetched: &FetchedObject,
    ) -> Result<usize, RelayError> {
        self.transition(job, JobState::Expanding)?;
        self.check_cancelled()?;

        let archive = fetched.path.clone();
        let dest = staging.join(EXTRACT_DIR);
        let members = blocking(move || expand_archive(&archive, &dest)).await??;
        debug!(job = %job.id(), members = members.len(), "archive expanded");

        self.transition(job, JobState::Uploading)?;
        for member in &members {
            let caption = member_caption(&member.name);
            self.upload_item(job, &member.path, &caption, &member.name)
                .await?;
        }
        Ok(members.len())
    }

    /// Writes and uploads one part at a time so at most one part sits on
    /// disk next to the source.
    async fn relay_parts(
        &self,
        job: &mut TransferJob,
        staging: &StagingArea,
        fetched: &FetchedObject,
    ) -> Result<usize, RelayError> {
        self.transition(job, JobState::Splitting)?;
        self.check_cancelled()?;

        let source = fetched.path.clone();
        let limit = self.settings.chunk_size_limit;
        let splitter = blocking(move || ChunkSplitter::open(&source, limit)).await??;
        let parts_dir = staging.join(PARTS_DIR);
        tokio::fs::create_dir_all(&parts_dir).await?;
        let total = splitter.chunk_count();
        debug!(job = %job.id(), parts = total, "splitting into parts");

        self.transition(job, JobState::Uploading)?;
        for index in 0..total {
            self.check_cancelled()?;
            let part = {
                let splitter = splitter.clone();
                let dir = parts_dir.clone();
                blocking(move || splitter.write_part(index, &dir)).await??
            };
            debug!(
                job = %job.id(),
                part = part.descriptor.ordinal(),
                bytes = part.descriptor.length,
                sha256 = %part.checksum,
                "part written"
            );
            let caption = part.descriptor.caption();
            self.upload_item(job, &part.path, &caption, &part.descriptor.part_name())
                .await?;
        }
        Ok(total)
    }

    /// Uploads one item, then deletes it from the staging area.
    async fn upload_item(
        &self,
        job: &TransferJob,
        path: &Path,
        caption: &str,
        label: &str,
    ) -> Result<(), RelayError> {
        self.check_cancelled()?;
        let size = tokio::fs::metadata(path).await?.len();
        let sent = ByteCounter::new();
        let uploader = self.uploader.as_ref();

        let work = async {
            let monitor = self.monitor.spawn(
                TransferKind::Upload,
                label,
                ProgressSource::Counter(sent.clone()),
                size,
                self.sink(job),
                &self.cancel,
            );
            let result = uploader.upload(path, caption, sent.clone()).await;
            monitor.stop().await;
            result.map_err(|e| RelayError::UploadFailure {
                item: caption.to_string(),
                reason: e.to_string(),
            })
        };
        self.bounded(JobState::Uploading, self.settings.upload_timeout, work)
            .await?;

        tokio::fs::remove_file(path).await?;
        debug!(job = %job.id(), item = %label, bytes = size, "item relayed");
        self.emit(RelayEvent::ItemUploaded {
            job_id: job.id().to_string(),
            caption: caption.to_string(),
            bytes: size,
        });
        Ok(())
    }

    /// Runs `work` under the stage's time limit, aborting on cancellation.
    async fn bounded<T>(
        &self,
        stage: JobState,
        limit: Option<Duration>,
        work: impl Future<Output = Result<T, RelayError>>,
    ) -> Result<T, RelayError> {
        let limited = async {
            match limit {
                Some(limit) => match tokio::time::timeout(limit, work).await {
                    Ok(result) => result,
                    Err(_) => Err(RelayError::Timeout { stage, limit }),
                },
                None => work.await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(RelayError::Cancelled),
            result = limited => result,
        }
    }

    fn check_cancelled(&self) -> Result<(), RelayError> {
        if self.cancel.is_cancelled() {
            Err(RelayError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn transition(&self, job: &mut TransferJob, next: JobState) -> Result<(), RelayError> {
        job.advance(next)?;
        debug!(job = %job.id(), state = %next, "state changed");
        self.emit(RelayEvent::StateChanged {
            job_id: job.id().to_string(),
            state: next,
        });
        Ok(())
    }

    fn emit(&self, event: RelayEvent) {
        if let Err(e) = self.events_tx.try_send(event) {
            debug!(error = %e, "relay event dropped");
        }
    }

    fn sink(&self, job: &TransferJob) -> Arc<dyn ProgressSink> {
        Arc::new(EventSink {
            job_id: job.id().to_string(),
            tx: self.events_tx.clone(),
        })
    }
}

struct RunSummary {
    fetched: FetchedObject,
    uploads: usize,
}

/// Forwards monitor updates onto the event channel.
struct EventSink {
    job_id: String,
    tx: mpsc::Sender<RelayEvent>,
}

impl ProgressSink for EventSink {
    fn deliver(
        &self,
        update: ProgressUpdate,
    ) -> std::pin::Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + '_>> {
        let result = self
            .tx
            .try_send(RelayEvent::Progress {
                job_id: self.job_id.clone(),
                update,
            })
            .map_err(|e| SinkError(e.to_string()));
        Box::pin(async move { result })
    }
}

async fn blocking<T, F>(f: F) -> Result<T, RelayError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| RelayError::Io(std::io::Error::other(format!("task join error: {e}"))))
}

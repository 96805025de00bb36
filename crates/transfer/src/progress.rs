use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};

use crate::types::ByteCounter;

/// Default polling interval.
const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

const MIB: u64 = 1024 * 1024;

/// Direction of the transfer being observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferKind {
    Download,
    Upload,
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Download => f.write_str("Download"),
            Self::Upload => f.write_str("Upload"),
        }
    }
}

/// Percentage of `expected` covered by `current`.
///
/// Returns 0 when `expected` is 0 (unknown) and exactly 100 once
/// `current >= expected`.
pub fn percentage(current: u64, expected: u64) -> f64 {
    if expected == 0 {
        return 0.0;
    }
    if current >= expected {
        return 100.0;
    }
    // Float rounding on huge sizes must not report completion early.
    (current as f64 / expected as f64 * 100.0).min(99.99)
}

/// A single progress observation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressUpdate {
    pub kind: TransferKind,
    /// What is being transferred (file name, part caption, ...).
    pub label: String,
    pub current: u64,
    pub expected: u64,
    pub percentage: f64,
    pub bytes_per_second: f64,
}

impl ProgressUpdate {
    pub fn new(
        kind: TransferKind,
        label: impl Into<String>,
        current: u64,
        expected: u64,
        bytes_per_second: f64,
    ) -> Self {
        Self {
            kind,
            label: label.into(),
            current,
            expected,
            percentage: percentage(current, expected),
            bytes_per_second,
        }
    }

    /// Returns `true` once the known expected size has been reached.
    pub fn is_complete(&self) -> bool {
        self.expected > 0 && self.current >= self.expected
    }
}

impl fmt::Display for ProgressUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Progress: {:.2}% ({}MB/{}MB) at {:.2} MB/s",
            self.kind,
            self.percentage,
            self.current / MIB,
            self.expected / MIB,
            self.bytes_per_second / MIB as f64
        )
    }
}

/// Error returned by a [`ProgressSink`] that could not deliver an update.
#[derive(Debug, thiserror::Error)]
#[error("progress sink unavailable: {0}")]
pub struct SinkError(pub String);

/// Receives progress updates (a chat message being edited, a terminal, ...).
///
/// Delivery failures are logged by the monitor and otherwise ignored.
pub trait ProgressSink: Send + Sync {
    fn deliver(
        &self,
        update: ProgressUpdate,
    ) -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + '_>>;
}

/// What the monitor polls.
#[derive(Debug, Clone)]
pub enum ProgressSource {
    /// Size of a file being written by the transfer.
    File(PathBuf),
    /// Byte counter advanced by the transfer.
    Counter(ByteCounter),
}

impl ProgressSource {
    /// Current byte count, or `None` if a watched file does not exist.
    pub async fn observe(&self) -> Option<u64> {
        match self {
            Self::File(path) => tokio::fs::metadata(path).await.ok().map(|m| m.len()),
            Self::Counter(counter) => Some(counter.get()),
        }
    }
}

/// Why a monitor task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorOutcome {
    /// The observed size reached the expected size.
    Completed,
    /// The watched file disappeared (transfer aborted or file moved away).
    SourceGone,
    /// Stopped by its owner before completion.
    Cancelled,
}

/// Spawns periodic pollers for in-flight transfers.
#[derive(Debug, Clone)]
pub struct ProgressMonitor {
    interval: Duration,
}

impl Default for ProgressMonitor {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ProgressMonitor {
    /// Creates a monitor polling at `interval` (1 s when `None`).
    pub fn new(interval: Option<Duration>) -> Self {
        Self {
            interval: interval.unwrap_or(DEFAULT_INTERVAL),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Starts polling `source` in a background tokio task.
    ///
    /// The task ends on its own when `expected` (if non-zero) is reached or
    /// the watched file disappears, and is cancelled together with `parent`.
    pub fn spawn(
        &self,
        kind: TransferKind,
        label: impl Into<String>,
        source: ProgressSource,
        expected: u64,
        sink: Arc<dyn ProgressSink>,
        parent: &CancellationToken,
    ) -> MonitorHandle {
        let cancel = parent.child_token();
        let poller = Poller {
            kind,
            label: label.into(),
            source,
            expected,
            sink,
            interval: self.interval,
        };
        let task = tokio::spawn(poller.run(cancel.clone()));
        MonitorHandle {
            guard: cancel.clone().drop_guard(),
            cancel,
            task,
        }
    }
}

/// Handle to a running monitor task. Dropping it cancels the task.
pub struct MonitorHandle {
    cancel: CancellationToken,
    task: JoinHandle<MonitorOutcome>,
    guard: DropGuard,
}

impl MonitorHandle {
    /// Stops the monitor and waits for it to exit.
    ///
    /// A monitor that already finished reports its own outcome.
    pub async fn stop(self) -> MonitorOutcome {
        self.cancel.cancel();
        self.join().await
    }

    /// Waits for the monitor to end on its own.
    pub async fn join(self) -> MonitorOutcome {
        let Self { task, guard, .. } = self;
        let outcome = match task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "progress monitor task failed");
                MonitorOutcome::Cancelled
            }
        };
        drop(guard);
        outcome
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

struct Poller {
    kind: TransferKind,
    label: String,
    source: ProgressSource,
    expected: u64,
    sink: Arc<dyn ProgressSink>,
    interval: Duration,
}

impl Poller {
    async fn run(self, cancel: CancellationToken) -> MonitorOutcome {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut speed = SpeedCalculator::new(None, None);
        let mut reported: u64 = 0;
        let mut seen = false;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    // Flush the final position so a finished transfer shows 100%.
                    if let Some(size) = self.source.observe().await
                        && size > reported
                    {
                        speed.add_sample(size - reported);
                        let update = self.update(size, &speed);
                        let complete = update.is_complete();
                        self.deliver(update).await;
                        if complete {
                            return MonitorOutcome::Completed;
                        }
                    }
                    return MonitorOutcome::Cancelled;
                }
                _ = ticker.tick() => {
                    let observed = match self.source.observe().await {
                        Some(size) => {
                            seen = true;
                            size
                        }
                        // Not created yet.
                        None if !seen => 0,
                        None => {
                            debug!(label = %self.label, "monitored file disappeared");
                            return MonitorOutcome::SourceGone;
                        }
                    };

                    let current = observed.max(reported);
                    speed.add_sample(current - reported);
                    reported = current;

                    let update = self.update(current, &speed);
                    let complete = update.is_complete();
                    self.deliver(update).await;
                    if complete {
                        return MonitorOutcome::Completed;
                    }
                }
            }
        }
    }

    fn update(&self, current: u64, speed: &SpeedCalculator) -> ProgressUpdate {
        ProgressUpdate::new(
            self.kind,
            self.label.clone(),
            current,
            self.expected,
            speed.bytes_per_second(),
        )
    }

    async fn deliver(&self, update: ProgressUpdate) {
        if let Err(e) = self.sink.deliver(update).await {
            warn!(label = %self.label, error = %e, "failed to deliver progress update");
        }
    }
}

// ---------------------------------------------------------------------------
// SpeedCalculator
// ---------------------------------------------------------------------------

struct SpeedSample {
    bytes: u64,
    timestamp: Instant,
}

/// Calculates transfer speed using a sliding window of samples.
pub struct SpeedCalculator {
    samples: Vec<SpeedSample>,
    max_samples: usize,
    window_size: Duration,
}

impl SpeedCalculator {
    /// Creates a new calculator.
    ///
    /// - `window_size`: time window for speed calculation (default 5 s).
    /// - `max_samples`: maximum retained samples (default 100).
    pub fn new(window_size: Option<Duration>, max_samples: Option<usize>) -> Self {
        Self {
            samples: Vec::new(),
            max_samples: max_samples.unwrap_or(100),
            window_size: window_size.unwrap_or(Duration::from_secs(5)),
        }
    }

    /// Records `bytes` transferred since the previous sample.
    pub fn add_sample(&mut self, bytes: u64) {
        let now = Instant::now();
        self.samples.push(SpeedSample {
            bytes,
            timestamp: now,
        });

        if let Some(cutoff) = now.checked_sub(self.window_size) {
            self.samples.retain(|sample| sample.timestamp >= cutoff);
        }

        if self.samples.len() > self.max_samples {
            let excess = self.samples.len() - self.max_samples;
            self.samples.drain(..excess);
        }
    }

    /// Average speed in bytes/second within the window.
    ///
    /// Returns 0.0 with fewer than 2 samples.
    pub fn bytes_per_second(&self) -> f64 {
        let (Some(first), Some(last)) = (self.samples.first(), self.samples.last()) else {
            return 0.0;
        };
        let elapsed = last.timestamp.duration_since(first.timestamp);
        if self.samples.len() < 2 || elapsed.is_zero() {
            return 0.0;
        }

        // The first sample marks the window start; its bytes predate it.
        let total_bytes: u64 = self.samples[1..].iter().map(|s| s.bytes).sum();
        total_bytes as f64 / elapsed.as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingSink {
        updates: Mutex<Vec<ProgressUpdate>>,
    }

    impl RecordingSink {
        fn percentages(&self) -> Vec<f64> {
            self.updates
                .lock()
                .unwrap()
                .iter()
                .map(|u| u.percentage)
                .collect()
        }
    }

    impl ProgressSink for RecordingSink {
        fn deliver(
            &self,
            update: ProgressUpdate,
        ) -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + '_>> {
            self.updates.lock().unwrap().push(update);
            Box::pin(async { Ok(()) })
        }
    }

    #[derive(Default)]
    struct FailingSink {
        attempts: AtomicUsize,
    }

    impl ProgressSink for FailingSink {
        fn deliver(
            &self,
            _update: ProgressUpdate,
        ) -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + '_>> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Err(SinkError("message deleted".into())) })
        }
    }

    #[test]
    fn percentage_guards_unknown_size() {
        assert_eq!(percentage(10, 0), 0.0);
        assert_eq!(percentage(0, 0), 0.0);
    }

    #[test]
    fn percentage_hits_100_exactly_at_expected() {
        assert_eq!(percentage(50, 100), 50.0);
        assert_eq!(percentage(100, 100), 100.0);
        assert_eq!(percentage(150, 100), 100.0);
        assert!(percentage(u64::MAX - 1, u64::MAX) < 100.0);
    }

    #[test]
    fn update_display_reports_megabytes() {
        let update = ProgressUpdate::new(TransferKind::Download, "a.bin", 10 * MIB, 40 * MIB, 0.0);
        assert_eq!(
            update.to_string(),
            "Download Progress: 25.00% (10MB/40MB) at 0.00 MB/s"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn counter_progress_is_monotonic_and_completes() {
        let counter = ByteCounter::new();
        let sink = Arc::new(RecordingSink::default());
        let monitor = ProgressMonitor::new(Some(Duration::from_secs(1)));
        let root = CancellationToken::new();

        let handle = monitor.spawn(
            TransferKind::Upload,
            "part",
            ProgressSource::Counter(counter.clone()),
            100,
            sink.clone(),
            &root,
        );

        // A regression of the counter must not be reported.
        for step in [10, 40, 30, 70, 100] {
            counter.set(step);
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        let outcome = handle.join().await;
        assert_eq!(outcome, MonitorOutcome::Completed);

        let pcts = sink.percentages();
        assert!(!pcts.is_empty());
        assert!(pcts.windows(2).all(|w| w[0] <= w[1]), "{pcts:?}");
        assert_eq!(*pcts.last().unwrap(), 100.0);
        assert_eq!(pcts.iter().filter(|p| **p == 100.0).count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn already_complete_source_reports_once() {
        let counter = ByteCounter::new();
        counter.set(64);
        let sink = Arc::new(RecordingSink::default());
        let handle = ProgressMonitor::default().spawn(
            TransferKind::Download,
            "done",
            ProgressSource::Counter(counter),
            64,
            sink.clone(),
            &CancellationToken::new(),
        );

        assert_eq!(handle.join().await, MonitorOutcome::Completed);
        assert_eq!(sink.percentages(), vec![100.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn sink_failures_are_swallowed() {
        let counter = ByteCounter::new();
        let sink = Arc::new(FailingSink::default());
        let handle = ProgressMonitor::default().spawn(
            TransferKind::Upload,
            "x",
            ProgressSource::Counter(counter.clone()),
            10,
            sink.clone(),
            &CancellationToken::new(),
        );

        tokio::time::sleep(Duration::from_secs(3)).await;
        counter.set(10);

        assert_eq!(handle.join().await, MonitorOutcome::Completed);
        assert!(sink.attempts.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_flushes_final_position() {
        let counter = ByteCounter::new();
        let sink = Arc::new(RecordingSink::default());
        let handle = ProgressMonitor::new(Some(Duration::from_secs(60))).spawn(
            TransferKind::Upload,
            "x",
            ProgressSource::Counter(counter.clone()),
            10,
            sink.clone(),
            &CancellationToken::new(),
        );

        // Let the first (immediate) tick run, then finish between ticks.
        tokio::time::sleep(Duration::from_millis(10)).await;
        counter.set(10);

        assert_eq!(handle.stop().await, MonitorOutcome::Completed);
        assert_eq!(*sink.percentages().last().unwrap(), 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_size_runs_until_cancelled() {
        let root = CancellationToken::new();
        let sink = Arc::new(RecordingSink::default());
        let handle = ProgressMonitor::default().spawn(
            TransferKind::Upload,
            "x",
            ProgressSource::Counter(ByteCounter::new()),
            0,
            sink.clone(),
            &root,
        );

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!handle.is_finished());

        root.cancel();
        assert_eq!(handle.join().await, MonitorOutcome::Cancelled);
        assert!(sink.percentages().iter().all(|p| *p == 0.0));
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_handle_cancels_task() {
        let sink = Arc::new(RecordingSink::default());
        let root = CancellationToken::new();
        let handle = ProgressMonitor::default().spawn(
            TransferKind::Upload,
            "x",
            ProgressSource::Counter(ByteCounter::new()),
            100,
            sink.clone(),
            &root,
        );

        tokio::time::sleep(Duration::from_millis(1500)).await;
        drop(handle);
        tokio::time::sleep(Duration::from_secs(10)).await;

        // Ticks at 0s and 1s only.
        assert_eq!(sink.percentages().len(), 2);
        assert!(!root.is_cancelled());
    }

    #[tokio::test]
    async fn deleted_file_stops_monitor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("growing.bin");
        std::fs::write(&path, b"12345").unwrap();

        let sink = Arc::new(RecordingSink::default());
        let handle = ProgressMonitor::new(Some(Duration::from_millis(10))).spawn(
            TransferKind::Download,
            "growing.bin",
            ProgressSource::File(path.clone()),
            10,
            sink.clone(),
            &CancellationToken::new(),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        std::fs::remove_file(&path).unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(5), handle.join())
            .await
            .unwrap();
        assert_eq!(outcome, MonitorOutcome::SourceGone);
        assert!(sink.percentages().contains(&50.0));
    }

    #[tokio::test]
    async fn file_not_yet_created_is_not_gone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("later.bin");

        let sink = Arc::new(RecordingSink::default());
        let handle = ProgressMonitor::new(Some(Duration::from_millis(10))).spawn(
            TransferKind::Download,
            "later.bin",
            ProgressSource::File(path.clone()),
            4,
            sink.clone(),
            &CancellationToken::new(),
        );

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!handle.is_finished());
        std::fs::write(&path, b"abcd").unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(5), handle.join())
            .await
            .unwrap();
        assert_eq!(outcome, MonitorOutcome::Completed);
    }

    #[test]
    fn speed_calculator_no_samples() {
        let calc = SpeedCalculator::new(None, None);
        assert_eq!(calc.bytes_per_second(), 0.0);
    }

    #[test]
    fn speed_calculator_single_sample() {
        let mut calc = SpeedCalculator::new(None, None);
        calc.add_sample(100);
        assert_eq!(calc.bytes_per_second(), 0.0);
    }

    #[test]
    fn speed_calculator_multiple_samples() {
        let mut calc = SpeedCalculator::new(Some(Duration::from_secs(10)), None);
        calc.add_sample(500);
        std::thread::sleep(Duration::from_millis(50));
        calc.add_sample(500);

        assert!(calc.bytes_per_second() > 0.0);
    }

    #[test]
    fn speed_calculator_max_samples() {
        let mut calc = SpeedCalculator::new(Some(Duration::from_secs(60)), Some(5));
        for i in 0..20 {
            calc.add_sample(i * 10);
        }
        assert!(calc.samples.len() <= 5);
    }
}

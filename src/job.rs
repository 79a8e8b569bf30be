use crate::classifier::{relative_path, ClassificationResult, InclusionClassifier};
use crate::discovery::ordered_set;
use crate::errors::ProcessorError;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, trace, warn};

pub const LARGE_SELECTION_THRESHOLD_BYTES: u64 = 100 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedFile {
    pub relative_path: String,
    pub bytes: u64,
}

/// The packed text of every processed file, in processing order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatedArtifact {
    pub text: String,
    pub file_count: usize,
    pub total_bytes: u64,
    pub files: Vec<ProcessedFile>,
}

#[derive(Debug)]
pub enum JobOutcome {
    Completed(AggregatedArtifact),
    Failed {
        error: ProcessorError,
        processed_count: usize,
        total_bytes: u64,
    },
    Cancelled {
        processed_count: usize,
        total_bytes: u64,
    },
}

impl JobOutcome {
    pub fn state(&self) -> JobState {
        match self {
            JobOutcome::Completed(_) => JobState::Completed,
            JobOutcome::Failed { .. } => JobState::Failed,
            JobOutcome::Cancelled { .. } => JobState::Cancelled,
        }
    }
}

#[derive(Debug)]
pub enum JobEvent {
    CurrentFile(PathBuf),
    Progress { current: usize, total: usize },
    Statistics { processed_count: usize, total_bytes: u64 },
    Finished(JobOutcome),
}

impl JobEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobEvent::Finished(_))
    }

    pub fn dispatch(&self, subscriber: &mut dyn JobSubscriber) {
        match self {
            JobEvent::CurrentFile(path) => subscriber.on_current_file(path),
            JobEvent::Progress { current, total } => subscriber.on_progress(*current, *total),
            JobEvent::Statistics {
                processed_count,
                total_bytes,
            } => subscriber.on_statistics(*processed_count, *total_bytes),
            JobEvent::Finished(JobOutcome::Completed(artifact)) => subscriber.on_completed(artifact),
            JobEvent::Finished(JobOutcome::Failed {
                error,
                processed_count,
                ..
            }) => subscriber.on_failed(error, *processed_count),
            JobEvent::Finished(JobOutcome::Cancelled { .. }) => subscriber.on_cancelled(),
        }
    }
}

/// Receives job events in order. Every method defaults to doing nothing.
pub trait JobSubscriber: Send {
    fn on_progress(&mut self, _current: usize, _total: usize) {}
    fn on_current_file(&mut self, _path: &Path) {}
    fn on_statistics(&mut self, _processed_count: usize, _total_bytes: u64) {}
    fn on_completed(&mut self, _artifact: &AggregatedArtifact) {}
    fn on_failed(&mut self, _error: &ProcessorError, _processed_count: usize) {}
    fn on_cancelled(&mut self) {}
}

/// Cooperative cancellation, checked before each file.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        CancellationFlag::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// State shared between a running job and whoever supervises it.
#[derive(Debug)]
struct JobStatus {
    state: Mutex<JobState>,
    processed_count: AtomicUsize,
    total_bytes: AtomicU64,
    finished: AtomicBool,
}

/// Sending half of a job's event stream. Guarantees that at most one
/// terminal event is ever sent, whoever tries to send it.
#[derive(Debug, Clone)]
struct EventEmitter {
    tx: mpsc::UnboundedSender<JobEvent>,
    status: Arc<JobStatus>,
}

impl EventEmitter {
    fn emit(&self, event: JobEvent) {
        if self.tx.send(event).is_err() {
            trace!("Job subscriber is gone; dropping event");
        }
    }

    /// Sends the terminal event unless one was already sent. Returns whether
    /// this call was the one that finished the job.
    fn finish(&self, outcome: JobOutcome) -> bool {
        if self
            .status
            .finished
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        self.set_state(outcome.state());
        self.emit(JobEvent::Finished(outcome));
        true
    }

    /// Finishes the job as cancelled with whatever counters it had reached.
    fn finish_cancelled(&self) -> bool {
        self.finish(JobOutcome::Cancelled {
            processed_count: self.status.processed_count.load(Ordering::SeqCst),
            total_bytes: self.status.total_bytes.load(Ordering::SeqCst),
        })
    }

    pub fn state(&self) -> JobState {
        read_state(&self.status)
    }

    fn set_state(&self, state: JobState) {
        let mut guard = self
            .status
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !guard.is_terminal() {
            *guard = state;
        }
    }

    fn record(&self, processed_count: usize, total_bytes: u64) {
        self.status
            .processed_count
            .store(processed_count, Ordering::SeqCst);
        self.status.total_bytes.store(total_bytes, Ordering::SeqCst);
    }
}

fn read_state(status: &JobStatus) -> JobState {
    *status
        .state
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// The subscriber's half of a job: its ordered event stream plus a way to
/// ask it to stop.
#[derive(Debug)]
pub struct JobHandle {
    root: PathBuf,
    events: mpsc::UnboundedReceiver<JobEvent>,
    cancel: CancellationFlag,
    status: Arc<JobStatus>,
}

impl JobHandle {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cancel(&self) {
        debug!("Cancellation requested for job on {}", self.root.display());
        self.cancel.cancel();
    }

    pub fn state(&self) -> JobState {
        read_state(&self.status)
    }

    pub async fn next_event(&mut self) -> Option<JobEvent> {
        self.events.recv().await
    }

    /// Feeds every event to `subscriber` until the terminal one, and returns
    /// that outcome.
    pub async fn drain(mut self, subscriber: &mut dyn JobSubscriber) -> Option<JobOutcome> {
        while let Some(event) = self.events.recv().await {
            event.dispatch(subscriber);
            if let JobEvent::Finished(outcome) = event {
                return Some(outcome);
            }
        }
        None
    }

    /// Waits for the terminal outcome, discarding intermediate events.
    pub async fn outcome(self) -> Option<JobOutcome> {
        struct Discard;
        impl JobSubscriber for Discard {}
        self.drain(&mut Discard).await
    }
}

/// The owner's half of a job: the task itself, with graceful and forced
/// ways to bring it to a terminal state.
#[derive(Debug)]
pub struct JobSupervisor {
    root: PathBuf,
    cancel: CancellationFlag,
    emitter: EventEmitter,
    task: JoinHandle<JobState>,
}

impl JobSupervisor {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn state(&self) -> JobState {
        self.emitter.state()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the job to end on its own.
    pub async fn join(mut self) -> JobState {
        match (&mut self.task).await {
            Ok(state) => state,
            Err(e) => self.recover(e),
        }
    }

    /// Requests cancellation and waits up to `grace` for the job to stop.
    /// A job still running after that is aborted and reported as cancelled.
    pub async fn shutdown(mut self, grace: Duration) -> JobState {
        self.cancel.cancel();
        let waited = tokio::time::timeout(grace, &mut self.task).await;
        match waited {
            Ok(Ok(state)) => state,
            Ok(Err(e)) => self.recover(e),
            Err(_) => {
                warn!(
                    "Job on {} did not terminate gracefully. Aborting it.",
                    self.root.display()
                );
                self.task.abort();
                if let Err(e) = (&mut self.task).await {
                    if !e.is_cancelled() {
                        error!("Job on {} failed while aborting: {}", self.root.display(), e);
                    }
                }
                self.emitter.finish_cancelled();
                self.emitter.state()
            }
        }
    }

    fn recover(&self, e: JoinError) -> JobState {
        if e.is_cancelled() {
            self.emitter.finish_cancelled();
        } else {
            error!("Job on {} panicked: {}", self.root.display(), e);
            self.emitter.finish(JobOutcome::Failed {
                error: ProcessorError::WorkerFailed(e.to_string()),
                processed_count: self.emitter.status.processed_count.load(Ordering::SeqCst),
                total_bytes: self.emitter.status.total_bytes.load(Ordering::SeqCst),
            });
        }
        self.emitter.state()
    }
}

/// Size summary of the processable set, computed before any file is read.
#[derive(Debug, Clone)]
pub struct Preflight {
    pub processable: Vec<ClassificationResult>,
    pub total_size: u64,
}

impl Preflight {
    pub fn file_count(&self) -> usize {
        self.processable.len()
    }

    pub fn exceeds(&self, threshold_bytes: u64) -> bool {
        self.total_size > threshold_bytes
    }
}

/// Classifies each candidate once and keeps the included, non-directory
/// ones in ascending path order.
pub async fn processable_set(candidates: &[PathBuf], classifier: &InclusionClassifier) -> Vec<ClassificationResult> {
    let mut processable = Vec::new();
    for path in ordered_set(candidates.iter().cloned()) {
        let result = classifier.classify_file(&path).await;
        if result.is_processable() {
            processable.push(result);
        }
    }
    processable
}

pub async fn preflight(candidates: &[PathBuf], classifier: &InclusionClassifier, threshold_bytes: u64) -> Preflight {
    let processable = processable_set(candidates, classifier).await;
    let total_size = processable.iter().map(|r| r.size_bytes).sum();
    let summary = Preflight {
        processable,
        total_size,
    };
    debug!(
        "Processing {} files, total processable size: {} bytes",
        summary.file_count(),
        summary.total_size
    );
    if summary.exceeds(threshold_bytes) {
        warn!(
            "About to process {} files totaling {} MB",
            summary.file_count(),
            summary.total_size / (1024 * 1024)
        );
    }
    summary
}

/// Appends one file block: header line, content, blank line.
pub fn append_block(buffer: &mut String, relative_path: &str, content: &str) {
    buffer.push_str("=== ");
    buffer.push_str(relative_path);
    buffer.push_str(" ===\n");
    buffer.push_str(content);
    buffer.push_str("\n\n");
}

/// One run of filtering, reading and concatenating a candidate set.
pub struct AggregationJob {
    root: PathBuf,
    candidates: Vec<PathBuf>,
    classifier: Arc<InclusionClassifier>,
    yield_between_files: bool,
}

impl fmt::Debug for AggregationJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregationJob")
            .field("root", &self.root)
            .field("candidates", &self.candidates.len())
            .finish()
    }
}

impl AggregationJob {
    /// Headers are made relative to the classifier's root, the same root
    /// classification is evaluated against.
    pub fn new<I, P>(candidates: I, classifier: Arc<InclusionClassifier>) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        AggregationJob {
            root: classifier.root().to_path_buf(),
            candidates: ordered_set(candidates),
            classifier,
            yield_between_files: true,
        }
    }

    pub fn yield_between_files(mut self, enabled: bool) -> Self {
        self.yield_between_files = enabled;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn candidates(&self) -> &[PathBuf] {
        &self.candidates
    }

    /// Starts the job on its own task. The handle carries the event stream
    /// for the subscriber; the supervisor controls the task.
    pub fn spawn(self) -> (JobHandle, JobSupervisor) {
        let (tx, rx) = mpsc::unbounded_channel();
        let status = Arc::new(JobStatus {
            state: Mutex::new(JobState::Pending),
            processed_count: AtomicUsize::new(0),
            total_bytes: AtomicU64::new(0),
            finished: AtomicBool::new(false),
        });
        let emitter = EventEmitter {
            tx,
            status: status.clone(),
        };
        let cancel = CancellationFlag::new();

        let handle = JobHandle {
            root: self.root.clone(),
            events: rx,
            cancel: cancel.clone(),
            status,
        };
        let root = self.root.clone();
        let task = tokio::spawn(self.run(emitter.clone(), cancel.clone()));
        let supervisor = JobSupervisor {
            root,
            cancel,
            emitter,
            task,
        };
        (handle, supervisor)
    }

    async fn run(self, emitter: EventEmitter, cancel: CancellationFlag) -> JobState {
        emitter.set_state(JobState::Running);
        let outcome = self.aggregate(&emitter, &cancel).await;

        match &outcome {
            JobOutcome::Completed(artifact) => info!(
                "Successfully processed {} files, total size: {} bytes",
                artifact.file_count, artifact.total_bytes
            ),
            JobOutcome::Failed { error, .. } => error!("Processing failed: {}", error),
            JobOutcome::Cancelled { processed_count, .. } => {
                info!("Processing cancelled after {} files", processed_count)
            }
        }

        if !emitter.finish(outcome) {
            debug!("Job on {} was already finished by its supervisor", self.root.display());
        }
        emitter.state()
    }

    async fn aggregate(&self, emitter: &EventEmitter, cancel: &CancellationFlag) -> JobOutcome {
        let processable = processable_set(&self.candidates, &self.classifier).await;
        let total_files = processable.len();

        if total_files == 0 {
            warn!("No files were processed.");
            return JobOutcome::Failed {
                error: ProcessorError::EmptyCandidateSet,
                processed_count: 0,
                total_bytes: 0,
            };
        }

        info!("Starting to process {} files", total_files);

        let mut buffer = String::new();
        let mut files = Vec::with_capacity(total_files);
        let mut processed_count = 0usize;
        let mut total_bytes = 0u64;

        for entry in &processable {
            if cancel.is_cancelled() {
                return JobOutcome::Cancelled {
                    processed_count,
                    total_bytes,
                };
            }

            let path = &entry.path;
            emitter.emit(JobEvent::CurrentFile(path.clone()));
            debug!("Processing file: {}", path.display());

            let bytes = match tokio::fs::read(path).await {
                Ok(bytes) => bytes,
                Err(source) => {
                    warn!("Could not open file: {} - {}", path.display(), source);
                    return JobOutcome::Failed {
                        error: ProcessorError::FileRead {
                            path: path.clone(),
                            source,
                        },
                        processed_count,
                        total_bytes,
                    };
                }
            };

            let relative = relative_path(path, &self.root);
            let content = String::from_utf8_lossy(&bytes);
            append_block(&mut buffer, &relative, &content);

            let byte_len = bytes.len() as u64;
            processed_count += 1;
            total_bytes += byte_len;
            files.push(ProcessedFile {
                relative_path: relative,
                bytes: byte_len,
            });
            emitter.record(processed_count, total_bytes);

            emitter.emit(JobEvent::Progress {
                current: processed_count,
                total: total_files,
            });
            emitter.emit(JobEvent::Statistics {
                processed_count,
                total_bytes,
            });

            if self.yield_between_files {
                tokio::task::yield_now().await;
            }
        }

        if total_bytes == 0 {
            warn!("No content was produced from {} files", processed_count);
            return JobOutcome::Failed {
                error: ProcessorError::EmptyArtifact,
                processed_count,
                total_bytes,
            };
        }

        JobOutcome::Completed(AggregatedArtifact {
            text: buffer,
            file_count: processed_count,
            total_bytes,
            files,
        })
    }
}

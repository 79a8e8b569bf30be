use crate::classifier::InclusionClassifier;
use crate::config::ProcessorConfig;
use crate::discovery::collect_candidates;
use crate::errors::ProcessorError;
use crate::ignore::{load_ignore_file, IgnorePatterns};
use crate::job::{preflight, AggregationJob, JobHandle, JobState, Preflight};
use crate::policy::{Policy, PolicyStore};
use crate::scheduler::JobScheduler;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// Everything tied to one selected root: the policy snapshot, the current
/// ignore patterns and the jobs started for it.
#[derive(Debug)]
pub struct RootSession {
    root: PathBuf,
    policy: Arc<Policy>,
    config: ProcessorConfig,
    classifier: RwLock<Arc<InclusionClassifier>>,
    scheduler: JobScheduler,
}

impl RootSession {
    /// Opens `root`, reading its ignore file. Jobs started through the
    /// session are stopped within `config.shutdown_grace` when replaced or
    /// cancelled.
    pub async fn open(
        root: impl Into<PathBuf>,
        store: &PolicyStore,
        config: ProcessorConfig,
    ) -> Result<Self, ProcessorError> {
        let root = root.into();
        let metadata = tokio::fs::metadata(&root).await.map_err(|e| {
            ProcessorError::IoError(format!("could not open root {}: {}", root.display(), e))
        })?;
        if !metadata.is_dir() {
            return Err(ProcessorError::IoError(format!(
                "{} is not a directory",
                root.display()
            )));
        }

        let policy = store.get();
        let ignore_path = root.join(&config.ignore_file_name);
        let project = load_ignore_file(&ignore_path).await?;
        let classifier = InclusionClassifier::new(
            root.clone(),
            policy.clone(),
            IgnorePatterns::from_policy(&policy, &project),
        );
        info!("Opened {}", root.display());

        let scheduler = JobScheduler::new(config.shutdown_grace);
        Ok(RootSession {
            root,
            policy,
            config,
            classifier: RwLock::new(Arc::new(classifier)),
            scheduler,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn ignore_file_path(&self) -> PathBuf {
        self.root.join(&self.config.ignore_file_name)
    }

    /// The current classifier. Jobs keep the snapshot they started with even
    /// if the patterns are refreshed meanwhile.
    pub fn classifier(&self) -> Arc<InclusionClassifier> {
        self.classifier
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Re-reads the ignore file and swaps in a fresh classifier. Returns the
    /// number of patterns now in effect.
    pub async fn refresh_ignore_patterns(&self) -> Result<usize, ProcessorError> {
        let project = load_ignore_file(&self.ignore_file_path()).await?;
        let patterns = IgnorePatterns::from_policy(&self.policy, &project);
        let count = patterns.len();
        let classifier = InclusionClassifier::new(self.root.clone(), self.policy.clone(), patterns);
        *self
            .classifier
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Arc::new(classifier);
        debug!("Refreshed ignore patterns for {}: {} in effect", self.root.display(), count);
        Ok(count)
    }

    pub fn collect_candidates(&self) -> Vec<PathBuf> {
        collect_candidates(&self.root, &self.classifier(), self.config.max_depth)
    }

    pub async fn preflight(&self, candidates: &[PathBuf]) -> Preflight {
        preflight(
            candidates,
            &self.classifier(),
            self.config.large_selection_threshold_bytes,
        )
        .await
    }

    /// Starts a job over `candidates`, stopping any job still running for
    /// this root first.
    pub async fn start_job(&self, candidates: Vec<PathBuf>) -> JobHandle {
        let job = AggregationJob::new(candidates, self.classifier())
            .yield_between_files(self.config.yield_between_files);
        self.scheduler.start(job).await
    }

    pub async fn cancel_job(&self) -> Option<JobState> {
        self.scheduler.cancel(&self.root).await
    }
}

use crate::job::{AggregationJob, JobHandle, JobState, JobSupervisor};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// The job slot for one root. Its lock is held while a previous job is
/// being stopped, which only holds up callers for the same root.
type Slot = Arc<Mutex<Option<JobSupervisor>>>;

/// Keeps at most one running job per root. Starting a job for a root whose
/// previous job is still running stops that job first.
#[derive(Debug)]
pub struct JobScheduler {
    slots: Mutex<HashMap<PathBuf, Slot>>,
    grace: Duration,
}

impl Default for JobScheduler {
    fn default() -> Self {
        JobScheduler::new(DEFAULT_SHUTDOWN_GRACE)
    }
}

impl JobScheduler {
    pub fn new(grace: Duration) -> Self {
        JobScheduler {
            slots: Mutex::new(HashMap::new()),
            grace,
        }
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    async fn slot(&self, root: &Path) -> Slot {
        self.slots
            .lock()
            .await
            .entry(root.to_path_buf())
            .or_default()
            .clone()
    }

    async fn existing_slot(&self, root: &Path) -> Option<Slot> {
        self.slots.lock().await.get(root).cloned()
    }

    pub async fn start(&self, job: AggregationJob) -> JobHandle {
        let root = job.root().to_path_buf();
        let slot = self.slot(&root).await;
        let mut current = slot.lock().await;

        if let Some(prior) = current.take() {
            let state = if prior.is_finished() {
                prior.join().await
            } else {
                info!("Stopping previous job on {}", root.display());
                prior.shutdown(self.grace).await
            };
            debug!("Previous job on {} ended as {:?}", root.display(), state);
        }

        let (handle, supervisor) = job.spawn();
        *current = Some(supervisor);
        handle
    }

    /// Stops the job for `root`, if any, using the same grace period as `start`.
    pub async fn cancel(&self, root: &Path) -> Option<JobState> {
        let slot = self.existing_slot(root).await?;
        let supervisor = slot.lock().await.take()?;
        Some(supervisor.shutdown(self.grace).await)
    }

    /// Waits for the job for `root` to end on its own.
    pub async fn wait(&self, root: &Path) -> Option<JobState> {
        let slot = self.existing_slot(root).await?;
        let supervisor = slot.lock().await.take()?;
        Some(supervisor.join().await)
    }

    pub async fn is_running(&self, root: &Path) -> bool {
        let Some(slot) = self.existing_slot(root).await else {
            return false;
        };
        let current = slot.lock().await;
        current.as_ref().map(|s| !s.is_finished()).unwrap_or(false)
    }

    pub async fn shutdown_all(&self) {
        let slots: Vec<Slot> = self.slots.lock().await.drain().map(|(_, s)| s).collect();
        for slot in slots {
            let Some(supervisor) = slot.lock().await.take() else {
                continue;
            };
            let root = supervisor.root().to_path_buf();
            let state = supervisor.shutdown(self.grace).await;
            debug!("Job on {} ended as {:?}", root.display(), state);
        }
    }
}

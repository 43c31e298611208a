use std::{collections::HashMap, path::PathBuf, sync::Arc};

use serde::Serialize;
use shared::model::JobId;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Where a job is in its lifecycle. Transitions only move forward along
/// `Starting -> Downloading -> Processing -> Completed`, with `Error` reachable
/// from any non-terminal state. `Completed` and `Error` are terminal.
#[derive(Serialize, Clone, Copy, PartialEq, Eq, Debug)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Starting,
    Downloading,
    Processing,
    Completed,
    Error,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }
}

/// Everything a status poll can observe about one job. Written only by the
/// job's worker task; read by any number of concurrent requests.
#[derive(Clone, Debug)]
pub struct JobRecord {
    pub status: JobStatus,
    pub progress: f64,
    pub title: String,
    pub message: String,
    pub downloaded_bytes: Option<u64>,
    pub total_bytes: Option<u64>,
    pub speed: Option<f64>,
    pub elapsed: Option<f64>,
    pub eta: Option<f64>,
    pub artifact: Option<PathBuf>,
}

impl JobRecord {
    /// Telemetry is only meaningful while the raw fetch is running; it is
    /// dropped as soon as the job leaves `Downloading`.
    pub fn clear_telemetry(&mut self) {
        self.downloaded_bytes = None;
        self.total_bytes = None;
        self.speed = None;
        self.elapsed = None;
        self.eta = None;
    }

    fn new() -> Self {
        Self {
            status: JobStatus::Starting,
            progress: 0.0,
            title: String::new(),
            message: "Starting download".into(),
            downloaded_bytes: None,
            total_bytes: None,
            speed: None,
            elapsed: None,
            eta: None,
            artifact: None,
        }
    }
}

struct JobEntry {
    record: JobRecord,
    handle: Option<JoinHandle<()>>,
}

/// Process-wide registry of download jobs. A single mutex guards the whole
/// map; entries live until reclamation and are lost on restart.
#[derive(Default, Clone)]
pub struct JobRegistry {
    jobs: Arc<Mutex<HashMap<JobId, JobEntry>>>,
}

impl JobRegistry {
    pub async fn create(&self, id: JobId) -> anyhow::Result<()> {
        let mut jobs = self.jobs.lock().await;
        if jobs.contains_key(&id) {
            anyhow::bail!("job {} already exists in the registry", id);
        }

        jobs.insert(
            id,
            JobEntry {
                record: JobRecord::new(),
                handle: None,
            },
        );

        Ok(())
    }

    /// Applies `f` to the job's record. Updating a job that was concurrently
    /// removed is a no-op; the update/delete race must never crash a worker.
    pub async fn update(&self, id: &JobId, f: impl FnOnce(&mut JobRecord)) {
        if let Some(entry) = self.jobs.lock().await.get_mut(id) {
            f(&mut entry.record);
        }
    }

    pub async fn get(&self, id: &JobId) -> Option<JobRecord> {
        self.jobs
            .lock()
            .await
            .get(id)
            .map(|entry| entry.record.clone())
    }

    pub async fn remove(&self, id: &JobId) -> Option<JobRecord> {
        self.jobs.lock().await.remove(id).map(|entry| entry.record)
    }

    /// Tracks the task currently driving this job (its worker, later its
    /// reclaimer), so tests can await completion instead of racing timers.
    pub async fn attach_handle(&self, id: &JobId, handle: JoinHandle<()>) {
        if let Some(entry) = self.jobs.lock().await.get_mut(id) {
            entry.handle = Some(handle);
        }
    }

    pub async fn take_handle(&self, id: &JobId) -> Option<JoinHandle<()>> {
        self.jobs
            .lock()
            .await
            .get_mut(id)
            .and_then(|entry| entry.handle.take())
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }
}

#[derive(Default, Clone)]
pub struct State {
    pub job_registry: JobRegistry,
}

#[cfg(test)]
mod tests {
    use shared::model::JobId;

    use super::{JobRegistry, JobStatus};

    #[tokio::test]
    async fn an_unknown_id_is_distinguishable_from_a_failed_job() {
        let registry = JobRegistry::default();

        assert!(registry.get(&JobId::new()).await.is_none());
    }

    #[tokio::test]
    async fn a_created_job_starts_at_zero() {
        let registry = JobRegistry::default();
        let id = JobId::new();

        registry.create(id).await.unwrap();
        let record = registry.get(&id).await.unwrap();

        assert_eq!(JobStatus::Starting, record.status);
        assert_eq!(0.0, record.progress);
        assert!(record.title.is_empty());
    }

    #[tokio::test]
    async fn creating_the_same_id_twice_fails() {
        let registry = JobRegistry::default();
        let id = JobId::new();

        registry.create(id).await.unwrap();

        assert!(registry.create(id).await.is_err());
    }

    #[tokio::test]
    async fn updating_a_removed_job_is_a_harmless_no_op() {
        let registry = JobRegistry::default();
        let id = JobId::new();

        registry.create(id).await.unwrap();
        registry.remove(&id).await.unwrap();

        registry
            .update(&id, |record| record.status = JobStatus::Downloading)
            .await;

        assert!(registry.get(&id).await.is_none());
    }

    #[tokio::test]
    async fn updates_to_one_job_never_leak_into_another() {
        let registry = JobRegistry::default();
        let first = JobId::new();
        let second = JobId::new();

        registry.create(first).await.unwrap();
        registry.create(second).await.unwrap();

        registry
            .update(&first, |record| {
                record.status = JobStatus::Downloading;
                record.progress = 42.0;
            })
            .await;

        let untouched = registry.get(&second).await.unwrap();
        assert_eq!(JobStatus::Starting, untouched.status);
        assert_eq!(0.0, untouched.progress);
    }

    #[tokio::test]
    async fn polling_a_completed_job_returns_an_identical_snapshot() {
        let registry = JobRegistry::default();
        let id = JobId::new();

        registry.create(id).await.unwrap();
        registry
            .update(&id, |record| {
                record.status = JobStatus::Completed;
                record.progress = 100.0;
                record.title = "Some Track".into();
            })
            .await;

        let first_poll = registry.get(&id).await.unwrap();
        let second_poll = registry.get(&id).await.unwrap();

        assert_eq!(first_poll.status, second_poll.status);
        assert_eq!(first_poll.progress, second_poll.progress);
        assert_eq!(first_poll.title, second_poll.title);
    }
}

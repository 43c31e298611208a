use std::time::Duration;

use log::debug;
use shared::{audio_storage::AudioStorage, model::JobId};
use tokio::task::JoinHandle;

use super::state::JobRegistry;

/// Removes the job from the registry and deletes its scratch directory after a
/// grace delay. The registry entry goes away before the directory does, so a
/// fetch racing with reclamation observes either the intact artifact or a
/// clean not-found, never a half-deleted directory.
pub async fn reclaim_job(
    registry: JobRegistry,
    storage: AudioStorage,
    id: JobId,
    delay: Duration,
) {
    tokio::time::sleep(delay).await;

    debug!("reclaiming job {}", id);
    registry.remove(&id).await;
    storage.remove_job_dir(&id);
}

pub fn schedule(
    registry: JobRegistry,
    storage: AudioStorage,
    id: JobId,
    delay: Duration,
) -> JoinHandle<()> {
    tokio::spawn(reclaim_job(registry, storage, id, delay))
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::Duration;

    use shared::audio_storage::AudioStorage;
    use shared::model::JobId;

    use super::super::state::{JobRegistry, JobStatus};
    use super::reclaim_job;

    #[tokio::test]
    async fn reclamation_removes_the_entry_and_the_scratch_directory() {
        let directory = tempfile::tempdir().unwrap();
        let storage = AudioStorage::new(directory.path().join("jobs")).unwrap();
        let registry = JobRegistry::default();
        let id = JobId::new();

        registry.create(id).await.unwrap();
        let job_dir = storage.allocate_job_dir(&id).unwrap();
        fs::write(job_dir.join("track.mp3"), b"audio").unwrap();
        registry
            .update(&id, |record| {
                record.status = JobStatus::Completed;
                record.progress = 100.0;
                record.artifact = Some(job_dir.join("track.mp3"));
            })
            .await;

        reclaim_job(registry.clone(), storage.clone(), id, Duration::ZERO).await;

        assert!(registry.get(&id).await.is_none());
        assert!(!job_dir.exists());
    }

    #[tokio::test]
    async fn reclaiming_an_already_gone_job_is_harmless() {
        let directory = tempfile::tempdir().unwrap();
        let storage = AudioStorage::new(directory.path().join("jobs")).unwrap();
        let registry = JobRegistry::default();

        reclaim_job(registry, storage, JobId::new(), Duration::ZERO).await;
    }
}

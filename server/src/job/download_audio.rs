use std::sync::Arc;
use std::time::Instant;

use futures::{pin_mut, StreamExt};
use shared::{
    audio_storage::AudioStorage,
    settings::Settings,
    usecases::download_audio::{self, DownloadRequest, ProgressReport},
};
use tokio::task::JoinHandle;

use super::state::{JobRecord, JobRegistry, JobStatus};

/// Highest progress a job may report before an artifact has been confirmed on
/// disk; anything above would falsely signal completion mid post-processing.
const MAX_UNFINISHED_PROGRESS: f64 = 99.0;

pub struct DownloadAudioJob;

impl DownloadAudioJob {
    /// Spawns the worker task for `request`, folding every progress report
    /// into the registry. The job entry must already exist; this task is its
    /// single writer.
    pub fn spawn(
        registry: JobRegistry,
        storage: AudioStorage,
        settings: Arc<Settings>,
        request: DownloadRequest,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let job_id = request.job_id;
            let reports = download_audio::download_audio(&storage, &settings, request);
            pin_mut!(reports);

            // Elapsed time is counted from the first progress callback, not
            // from job creation.
            let mut first_progress_at: Option<Instant> = None;

            while let Some(report) = reports.next().await {
                let elapsed = match &report {
                    ProgressReport::Downloading(_) => {
                        let started = *first_progress_at.get_or_insert_with(Instant::now);
                        Some(started.elapsed().as_secs_f64())
                    }
                    _ => None,
                };

                let terminal = matches!(
                    &report,
                    ProgressReport::Finished(_) | ProgressReport::Errored(_)
                );

                registry
                    .update(&job_id, |record| apply_report(record, report, elapsed))
                    .await;

                if terminal {
                    break;
                }
            }
        })
    }
}

/// Folds one progress report into a job record. This is the only place job
/// records are mutated after creation, which keeps every invariant (monotonic
/// status, non-decreasing progress, the 99 clamp) in one spot.
fn apply_report(record: &mut JobRecord, report: ProgressReport, elapsed: Option<f64>) {
    if record.status.is_terminal() {
        return;
    }

    match report {
        ProgressReport::Probing => {
            record.message = "Resolving track information".into();
        }
        ProgressReport::Metadata { title } => {
            record.title = title;
            record.message = "Track information resolved".into();
        }
        ProgressReport::Downloading(line) => {
            if record.status == JobStatus::Processing {
                // A stray progress line after the fetch finished; the status
                // never walks backwards.
                return;
            }

            record.status = JobStatus::Downloading;
            let percent = line.percent().min(MAX_UNFINISHED_PROGRESS);
            // A stalled or re-estimated total must not move the bar backwards.
            record.progress = record.progress.max(percent);
            record.downloaded_bytes = line.downloaded_bytes;
            record.total_bytes = line.total_bytes;
            record.speed = line.speed;
            record.eta = line.eta;
            record.elapsed = elapsed;
            record.message = format!("Downloading ({:.1}%)", record.progress);
        }
        ProgressReport::Processing => {
            record.status = JobStatus::Processing;
            record.progress = MAX_UNFINISHED_PROGRESS;
            record.clear_telemetry();
            record.message = "Extracting audio".into();
        }
        ProgressReport::Finished(artifact) => {
            record.status = JobStatus::Completed;
            record.progress = 100.0;
            record.clear_telemetry();
            if record.title.is_empty() {
                record.title = artifact.title;
            }
            record.artifact = Some(artifact.path);
            record.message = "Download completed".into();
        }
        ProgressReport::Errored(e) => {
            record.status = JobStatus::Error;
            record.clear_telemetry();
            record.message = e.detail();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use anyhow::anyhow;
    use shared::audio_downloader::ProgressLine;
    use shared::usecases::download_audio::{AudioArtifact, Error, ProgressReport};

    use super::super::state::{JobRecord, JobStatus};
    use super::apply_report;

    fn fresh_record() -> JobRecord {
        let mut record = JobRecord {
            status: JobStatus::Starting,
            progress: 0.0,
            title: String::new(),
            message: String::new(),
            downloaded_bytes: None,
            total_bytes: None,
            speed: None,
            elapsed: None,
            eta: None,
            artifact: None,
        };
        apply_report(&mut record, ProgressReport::Probing, None);

        record
    }

    fn downloading(downloaded_bytes: u64, total_bytes: u64) -> ProgressReport {
        ProgressReport::Downloading(ProgressLine {
            status: "downloading".into(),
            downloaded_bytes: Some(downloaded_bytes),
            total_bytes: Some(total_bytes),
            ..Default::default()
        })
    }

    fn finished() -> ProgressReport {
        ProgressReport::Finished(AudioArtifact {
            path: PathBuf::from("/tmp/track.mp3"),
            title: "Fallback Title".into(),
        })
    }

    #[test]
    fn progress_is_clamped_below_one_hundred_until_completed() {
        let mut record = fresh_record();

        apply_report(&mut record, downloading(100, 100), Some(1.0));

        assert_eq!(JobStatus::Downloading, record.status);
        assert_eq!(99.0, record.progress);
    }

    #[test]
    fn progress_never_decreases() {
        let mut record = fresh_record();

        apply_report(&mut record, downloading(80, 100), Some(1.0));
        apply_report(&mut record, downloading(60, 100), Some(2.0));

        assert_eq!(80.0, record.progress);
        // Telemetry still reflects the latest callback.
        assert_eq!(Some(60), record.downloaded_bytes);
        assert_eq!(Some(2.0), record.elapsed);
    }

    #[test]
    fn processing_pins_progress_at_ninety_nine() {
        let mut record = fresh_record();

        apply_report(&mut record, downloading(50, 100), Some(1.0));
        apply_report(&mut record, ProgressReport::Processing, None);

        assert_eq!(JobStatus::Processing, record.status);
        assert_eq!(99.0, record.progress);
        // Download telemetry makes no sense once the fetch is over.
        assert_eq!(None, record.downloaded_bytes);
        assert_eq!(None, record.eta);
    }

    #[test]
    fn the_status_never_walks_back_from_processing() {
        let mut record = fresh_record();

        apply_report(&mut record, ProgressReport::Processing, None);
        apply_report(&mut record, downloading(10, 100), Some(1.0));

        assert_eq!(JobStatus::Processing, record.status);
        assert_eq!(99.0, record.progress);
    }

    #[test]
    fn progress_reaches_one_hundred_only_on_completion() {
        let mut record = fresh_record();
        apply_report(
            &mut record,
            ProgressReport::Metadata {
                title: "Some Track".into(),
            },
            None,
        );

        let mut observed = vec![record.progress];
        for report in [
            downloading(10, 100),
            downloading(100, 100),
            ProgressReport::Processing,
            finished(),
        ] {
            apply_report(&mut record, report, None);
            observed.push(record.progress);
        }

        assert!(observed.windows(2).all(|pair| pair[0] <= pair[1]));
        assert_eq!(100.0, record.progress);
        assert_eq!(JobStatus::Completed, record.status);
        // The probed title is kept over the artifact's fallback.
        assert_eq!("Some Track", record.title);
        assert_eq!(Some(PathBuf::from("/tmp/track.mp3")), record.artifact);
    }

    #[test]
    fn an_error_is_terminal_and_descriptive() {
        let mut record = fresh_record();

        apply_report(&mut record, downloading(10, 100), Some(1.0));
        apply_report(
            &mut record,
            ProgressReport::Errored(Error::DownloadError(anyhow!("network unreachable"))),
            None,
        );

        assert_eq!(JobStatus::Error, record.status);
        assert!(record.message.contains("network unreachable"));
        assert_eq!(10.0, record.progress);

        // Nothing applied after a terminal state changes the record.
        apply_report(&mut record, downloading(50, 100), Some(2.0));
        assert_eq!(JobStatus::Error, record.status);
        assert_eq!(10.0, record.progress);
        assert_eq!(None, record.downloaded_bytes);
    }
}

use std::path::PathBuf;

use async_stream::stream;
use futures::{pin_mut, Stream, StreamExt};
use log::debug;
use tokio::sync::mpsc;

use crate::{
    audio_downloader::{AudioDownloader, Error as AudioDownloaderError, ProgressLine},
    audio_storage::AudioStorage,
    model::JobId,
    settings::Settings,
};

/// A finished download: the artifact on disk plus the resolved track title.
#[derive(Clone, Debug)]
pub struct AudioArtifact {
    pub path: PathBuf,
    pub title: String,
}

/// One request for the download worker. `cookies` is a per-request credentials
/// blob; when present it wins over the cookies file configured in the settings.
#[derive(Debug)]
pub struct DownloadRequest {
    pub job_id: JobId,
    pub url: String,
    pub cookies: Option<String>,
}

pub enum ProgressReport {
    /// The scratch directory exists and metadata is being resolved.
    Probing,
    /// Metadata resolution succeeded.
    Metadata { title: String },
    /// One progress line from the downloader.
    Downloading(ProgressLine),
    /// The raw fetch finished; audio extraction is still running.
    Processing,
    /// Terminal: exactly one artifact was found in the scratch directory.
    Finished(AudioArtifact),
    /// Terminal: the scratch directory has already been cleaned up.
    Errored(Error),
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("couldn't resolve metadata for the given URL")]
    ExtractionError(#[source] anyhow::Error),
    #[error("an error occurred while downloading the audio track")]
    DownloadError(#[source] anyhow::Error),
    #[error("the downloader did not produce exactly one output file")]
    ArtifactError(#[source] anyhow::Error),
    #[error("unknown error")]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Human-readable message including the underlying cause, suitable for a
    /// job's status message or an error response body.
    pub fn detail(&self) -> String {
        match self {
            Error::ExtractionError(e) => {
                format!("couldn't resolve metadata for the given URL: {:#}", e)
            }
            Error::DownloadError(e) => format!("the download failed: {:#}", e),
            Error::ArtifactError(e) => {
                format!("the downloader did not produce a usable output file: {:#}", e)
            }
            Error::Other(e) => format!("something went wrong: {:#}", e),
        }
    }
}

impl From<AudioDownloaderError> for Error {
    fn from(value: AudioDownloaderError) -> Self {
        match value {
            AudioDownloaderError::ExtractionError(e) => Error::ExtractionError(e),
            AudioDownloaderError::DownloadError(e) => Error::DownloadError(e),
            AudioDownloaderError::Other(e) => Error::Other(e),
        }
    }
}

/// Runs one end-to-end download: allocate a private scratch directory,
/// materialize credentials, probe metadata, drive the downloader, and discover
/// the single output artifact. Yields progress along the way and always ends
/// with a terminal [`ProgressReport::Finished`] or [`ProgressReport::Errored`].
///
/// On any error the scratch directory is removed before the terminal report is
/// yielded, so callers never see partially-written state. On success the
/// artifact stays on disk until the caller reclaims it.
///
/// This is the single worker implementation behind both the asynchronous
/// (spawn + poll) and synchronous (await inline) flows.
pub fn download_audio<'a>(
    storage: &'a AudioStorage,
    settings: &'a Settings,
    request: DownloadRequest,
) -> impl Stream<Item = ProgressReport> + 'a {
    stream! {
        let job_id = request.job_id;
        debug!("job {}: starting download of {}", job_id, request.url);

        yield ProgressReport::Probing;

        if let Err(e) = storage.allocate_job_dir(&job_id) {
            yield ProgressReport::Errored(Error::Other(e));
            return;
        }

        let cookies_path = match materialize_cookies(storage, settings, &request) {
            Ok(path) => path,
            Err(e) => {
                storage.remove_job_dir(&job_id);
                yield ProgressReport::Errored(Error::Other(e));
                return;
            }
        };

        let downloader = AudioDownloader::new(settings.downloader_path.clone());

        let metadata = match downloader.probe(&request.url, cookies_path.as_deref()).await {
            Ok(metadata) => metadata,
            Err(e) => {
                storage.remove_job_dir(&job_id);
                yield ProgressReport::Errored(e.into());
                return;
            }
        };

        let title = metadata.title.unwrap_or("Unknown title".into());
        yield ProgressReport::Metadata { title: title.clone() };

        // The subprocess runs on its own task so progress can be yielded as it
        // arrives; the channel closes once the downloader returns.
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let download = {
            let job_dir = storage.job_dir(&job_id);
            let format = settings.audio_format;
            let url = request.url;

            tokio::spawn(async move {
                downloader
                    .download(&url, &job_dir, format, cookies_path.as_deref(), |line| {
                        let _ = progress_tx.send(line);
                    })
                    .await
            })
        };

        while let Some(line) = progress_rx.recv().await {
            if line.is_finished() {
                yield ProgressReport::Processing;
            } else {
                yield ProgressReport::Downloading(line);
            }
        }

        let result = match download.await {
            Ok(result) => result,
            Err(e) => {
                storage.remove_job_dir(&job_id);
                yield ProgressReport::Errored(Error::Other(e.into()));
                return;
            }
        };

        if let Err(e) = result {
            storage.remove_job_dir(&job_id);
            yield ProgressReport::Errored(e.into());
            return;
        }

        match storage.find_artifact(&job_id, settings.audio_format) {
            Ok(path) => {
                debug!("job {}: artifact at {}", job_id, path.display());
                yield ProgressReport::Finished(AudioArtifact { path, title });
            }
            Err(e) => {
                storage.remove_job_dir(&job_id);
                yield ProgressReport::Errored(Error::ArtifactError(e));
            }
        }
    }
}

/// Drives [`download_audio`] to its terminal report. This is the synchronous
/// flavor of the worker: same stream, awaited in place instead of polled.
pub async fn download_audio_blocking(
    storage: &AudioStorage,
    settings: &Settings,
    request: DownloadRequest,
) -> Result<AudioArtifact, Error> {
    let reports = download_audio(storage, settings, request);
    pin_mut!(reports);

    while let Some(report) = reports.next().await {
        match report {
            ProgressReport::Finished(artifact) => return Ok(artifact),
            ProgressReport::Errored(e) => return Err(e),
            _ => {}
        }
    }

    Err(Error::Other(anyhow::anyhow!(
        "the download worker stopped reporting before reaching a terminal state"
    )))
}

fn materialize_cookies(
    storage: &AudioStorage,
    settings: &Settings,
    request: &DownloadRequest,
) -> anyhow::Result<Option<PathBuf>> {
    if let Some(contents) = &request.cookies {
        return Ok(Some(storage.write_cookies(&request.job_id, contents)?));
    }

    if let Some(default) = &settings.cookies_file {
        return Ok(Some(storage.copy_cookies_from(&request.job_id, default)?));
    }

    Ok(None)
}

use axum::extract::{Path, State as StateExtractor};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::warn;
use serde::Deserialize;
use shared::model::{AudioFormat, JobId};
use shared::usecases::download_audio::{download_audio_blocking, DownloadRequest};

use crate::job::download_audio::DownloadAudioJob;
use crate::job::reclaim;
use crate::job::state::JobStatus;
use crate::job::State as JobState;
use crate::model::{ProgressResponse, StartedResponse};
use crate::state::State;
use crate::AppError;

pub fn routes() -> Router<State> {
    Router::new()
        .route("/downloads", post(start_download))
        .route("/downloads/sync", post(download_sync))
        .route("/downloads/:id/progress", get(get_progress))
        .route("/downloads/:id/file", get(get_file))
}

#[derive(Deserialize)]
struct StartDownloadBody {
    url: Option<String>,
    cookies: Option<String>,
}

impl StartDownloadBody {
    /// The URL is the only required input; it is not validated beyond being
    /// non-empty.
    fn url(self) -> Result<(String, Option<String>), AppError> {
        let url = self
            .url
            .filter(|url| !url.trim().is_empty())
            .ok_or(AppError::MissingUrl)?;

        Ok((url, self.cookies))
    }
}

async fn start_download(
    StateExtractor(State {
        settings,
        storage,
        job_state: JobState { job_registry },
    }): StateExtractor<State>,
    Json(body): Json<StartDownloadBody>,
) -> Result<Json<StartedResponse>, AppError> {
    let (url, cookies) = body.url()?;

    let job_id = JobId::new();
    job_registry.create(job_id).await?;

    let request = DownloadRequest {
        job_id,
        url,
        cookies,
    };
    let handle = DownloadAudioJob::spawn(job_registry.clone(), storage, settings, request);
    job_registry.attach_handle(&job_id, handle).await;

    Ok(Json(StartedResponse::new(job_id)))
}

#[derive(Deserialize)]
struct DownloadPathParams {
    id: String,
}

async fn get_progress(
    StateExtractor(JobState { job_registry }): StateExtractor<JobState>,
    Path(DownloadPathParams { id }): Path<DownloadPathParams>,
) -> Result<Json<ProgressResponse>, AppError> {
    // A malformed id cannot name a job, so it gets the same not-found as an
    // expired one.
    let id = JobId::parse(&id).ok_or(AppError::JobNotFound)?;

    let record = job_registry.get(&id).await.ok_or(AppError::JobNotFound)?;

    Ok(Json(ProgressResponse::from(record)))
}

async fn get_file(
    StateExtractor(State {
        settings,
        storage,
        job_state: JobState { job_registry },
    }): StateExtractor<State>,
    Path(DownloadPathParams { id }): Path<DownloadPathParams>,
) -> Result<Response, AppError> {
    let id = JobId::parse(&id).ok_or(AppError::JobNotFound)?;

    let record = job_registry.get(&id).await.ok_or(AppError::JobNotFound)?;

    if record.status != JobStatus::Completed {
        return Err(AppError::JobNotCompleted);
    }

    let artifact = record.artifact.ok_or(AppError::ArtifactMissing)?;

    // The whole file is buffered before reclamation is scheduled, so the
    // response body cannot race the deletion.
    let bytes = tokio::fs::read(&artifact).await.map_err(|e| {
        warn!("couldn't read the artifact {}: {}", artifact.display(), e);
        AppError::ArtifactMissing
    })?;

    let handle = reclaim::schedule(
        job_registry.clone(),
        storage,
        id,
        settings.reclaim_delay(),
    );
    job_registry.attach_handle(&id, handle).await;

    Ok(audio_response(bytes, &record.title, settings.audio_format))
}

/// Synchronous variant: one request, one binary response, no job id exposed.
/// Drives the same worker stream the background jobs use.
async fn download_sync(
    StateExtractor(State {
        settings, storage, ..
    }): StateExtractor<State>,
    Json(body): Json<StartDownloadBody>,
) -> Result<Response, AppError> {
    let (url, cookies) = body.url()?;

    let job_id = JobId::new();
    let request = DownloadRequest {
        job_id,
        url,
        cookies,
    };

    let artifact = download_audio_blocking(&storage, &settings, request)
        .await
        .map_err(AppError::from_download_audio_error)?;

    let bytes = tokio::fs::read(&artifact.path).await.map_err(|e| {
        warn!(
            "couldn't read the artifact {}: {}",
            artifact.path.display(),
            e
        );
        AppError::ArtifactMissing
    });

    // The scratch directory is gone on every exit path; nothing to reclaim
    // later for one-shot requests.
    storage.remove_job_dir(&job_id);

    Ok(audio_response(
        bytes?,
        &artifact.title,
        settings.audio_format,
    ))
}

fn audio_response(bytes: Vec<u8>, title: &str, format: AudioFormat) -> Response {
    let filename = attachment_filename(title, format);

    (
        [
            (header::CONTENT_TYPE, format.content_type().to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        bytes,
    )
        .into_response()
}

fn attachment_filename(title: &str, format: AudioFormat) -> String {
    let stem = if title.is_empty() { "audio" } else { title };

    sanitize_filename::sanitize(format!("{}.{}", stem, format.extension()))
}

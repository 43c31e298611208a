mod audio;
mod job;
mod model;
mod state;

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use log::{error, info};
use state::State;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use serde::Serialize;
use shared::audio_storage::AudioStorage;
use shared::settings::Settings;
use shared::usecases::download_audio::Error as DownloadAudioError;

use crate::model::NotFoundResponse;

#[derive(Parser, Debug)]
struct Args {
    home_path: PathBuf,
    #[arg(long, default_value_t = 10000)]
    port: u16,
}

const COOKIES_FILE_ENV_VAR: &str = "OTOTORI_COOKIES_FILE";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_ansi(false))
        .init();

    info!("starting ototori, version: {}", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();
    fs::create_dir_all(&args.home_path)
        .context("while trying to ensure ototori's home folder exists")?;

    let settings_path = args.home_path.join("settings.json");
    let scratch_path = args.home_path.join("jobs");

    let mut settings = Settings::from_file_or_default(&settings_path)
        .with_context(|| format!("couldn't read settings file at {}", settings_path.display()))?;

    if let Ok(cookies_file) = std::env::var(COOKIES_FILE_ENV_VAR) {
        settings.cookies_file = Some(PathBuf::from(cookies_file));
    }

    let storage = AudioStorage::new(scratch_path).context("couldn't initialize audio storage")?;

    let state = State {
        settings: Arc::new(settings),
        storage,
        job_state: Default::default(),
    };

    let app = Router::new()
        .route("/health-check", get(health_check))
        .merge(audio::routes())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", args.port))
        .await
        .context("failed to bind to TCP port")?;

    info!("server listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Serialize)]
struct HealthCheck {
    status: &'static str,
}

async fn health_check() -> Json<HealthCheck> {
    Json(HealthCheck { status: "ok" })
}

// Make our own error that wraps `anyhow::Error`.
#[derive(Debug)]
pub enum AppError {
    MissingUrl,
    JobNotFound,
    JobNotCompleted,
    ArtifactMissing,
    Download(DownloadAudioError),
    Other(anyhow::Error),
}

#[derive(Serialize, Clone)]
pub struct ErrorResponse {
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<String>,
}

impl AppError {
    pub fn from_download_audio_error(value: DownloadAudioError) -> Self {
        Self::Download(value)
    }
}

impl From<&AppError> for StatusCode {
    fn from(value: &AppError) -> Self {
        match value {
            AppError::MissingUrl => StatusCode::BAD_REQUEST,
            AppError::JobNotFound => StatusCode::NOT_FOUND,
            AppError::JobNotCompleted => StatusCode::CONFLICT,
            AppError::ArtifactMissing => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Download(e) => match e {
                DownloadAudioError::ExtractionError(_) | DownloadAudioError::DownloadError(_) => {
                    StatusCode::BAD_GATEWAY
                }
                DownloadAudioError::ArtifactError(_) | DownloadAudioError::Other(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<&AppError> for ErrorResponse {
    fn from(value: &AppError) -> Self {
        let (message, hint) = match value {
            AppError::MissingUrl => ("A video URL is required.".to_string(), None),
            AppError::JobNotFound => ("No such download job.".to_string(), None),
            AppError::JobNotCompleted => ("The download has not completed yet.".to_string(), None),
            AppError::ArtifactMissing => {
                ("The downloaded file is no longer available.".to_string(), None)
            }
            AppError::Download(e) => {
                let detail = e.detail();
                let hint = cookies_hint(&detail);

                (detail, hint)
            }
            AppError::Other(e) => (format!("Something went wrong: {}", e), None),
        };

        Self { message, hint }
    }
}

impl From<AppError> for ErrorResponse {
    fn from(value: AppError) -> Self {
        Self::from(&value)
    }
}

/// Restricted content tends to announce itself in the downloader's stderr;
/// surface a remediation hint alongside the raw message when it does.
fn cookies_hint(detail: &str) -> Option<String> {
    let lowered = detail.to_lowercase();
    let restricted = ["sign in", "log in", "login", "cookies", "private", "members-only"]
        .iter()
        .any(|marker| lowered.contains(marker));

    restricted.then(|| {
        format!(
            "This content appears to be restricted. Configure a cookies file (via the settings \
             file or the {} environment variable) or pass one with the request, then try again.",
            COOKIES_FILE_ENV_VAR
        )
    })
}

// Tell axum how to convert `AppError` into a response.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let AppError::JobNotFound = self {
            return (StatusCode::NOT_FOUND, Json(NotFoundResponse::default())).into_response();
        }

        let status_code = StatusCode::from(&self);
        let error_response = ErrorResponse::from(&self);

        match &self {
            AppError::Download(e) => error!("download failed: {}", e.detail()),
            AppError::Other(e) => error!("Error caused by: {:?}", e),
            _ => {}
        }

        (status_code, Json(error_response)).into_response()
    }
}

// This enables using `?` on functions that return `Result<_, anyhow::Error>` to turn them into
// `Result<_, AppError>`. That way you don't need to do that manually.
impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::Other(err.into())
    }
}

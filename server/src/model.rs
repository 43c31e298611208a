use serde::Serialize;
use shared::model::JobId;

use crate::job::state::{JobRecord, JobStatus};

#[derive(Serialize)]
pub struct StartedResponse {
    pub status: &'static str,
    pub download_id: JobId,
    pub message: String,
}

impl StartedResponse {
    pub fn new(download_id: JobId) -> Self {
        Self {
            status: "started",
            download_id,
            message: "Download started; poll progress with the returned id.".into(),
        }
    }
}

#[derive(Serialize)]
pub struct NotFoundResponse {
    pub status: &'static str,
}

impl Default for NotFoundResponse {
    fn default() -> Self {
        Self {
            status: "not_found",
        }
    }
}

/// The job snapshot handed back by the progress endpoint. The artifact path is
/// deliberately not part of it; clients only ever see the file through the
/// fetch endpoint.
#[derive(Serialize)]
pub struct ProgressResponse {
    status: JobStatus,
    progress: f64,
    title: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    downloaded_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    total_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    elapsed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    eta: Option<f64>,
}

impl From<JobRecord> for ProgressResponse {
    fn from(record: JobRecord) -> Self {
        Self {
            status: record.status,
            progress: record.progress,
            title: record.title,
            message: record.message,
            downloaded_bytes: record.downloaded_bytes,
            total_bytes: record.total_bytes,
            speed: record.speed,
            elapsed: record.elapsed,
            eta: record.eta,
        }
    }
}

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque handle for one download job. Generated once at job creation and used
/// as the external identifier for all later operations.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize, Debug)]
#[serde(transparent)]
pub struct JobId {
    job_id: Uuid,
}

impl JobId {
    pub fn new() -> Self {
        Self {
            job_id: Uuid::new_v4(),
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Uuid::parse_str(value).ok().map(|job_id| Self { job_id })
    }

    pub fn value(&self) -> &Uuid {
        &self.job_id
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.job_id.fmt(f)
    }
}

/// Audio container the downloader is asked to transcode into. The extension
/// doubles as the value passed to the downloader's `--audio-format` flag and as
/// the pattern used when discovering the output artifact.
#[derive(Clone, Copy, Eq, PartialEq, Serialize, Deserialize, Debug, Default)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    #[default]
    Mp3,
    M4a,
    Opus,
    Flac,
    Wav,
}

impl AudioFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::M4a => "m4a",
            AudioFormat::Opus => "opus",
            AudioFormat::Flac => "flac",
            AudioFormat::Wav => "wav",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "audio/mpeg",
            AudioFormat::M4a => "audio/mp4",
            AudioFormat::Opus => "audio/opus",
            AudioFormat::Flac => "audio/flac",
            AudioFormat::Wav => "audio/wav",
        }
    }
}

/// Subset of the metadata JSON the downloader prints during a probe. Everything
/// else in the (very large) document is ignored.
#[derive(Clone, Deserialize, Debug)]
pub struct TrackMetadata {
    pub title: Option<String>,
    pub uploader: Option<String>,
    pub duration: Option<f64>,
}

use std::{
    fs::File,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::model::AudioFormat;

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Settings {
    #[serde(default)]
    pub audio_format: AudioFormat,
    #[serde(default = "default_downloader_path")]
    pub downloader_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookies_file: Option<PathBuf>,
    #[serde(default = "default_reclaim_delay_seconds")]
    pub reclaim_delay_seconds: u64,
}

impl Settings {
    pub fn from_file_or_default(path: &Path) -> Result<Self> {
        if let Ok(file) = File::open(path) {
            Ok(serde_json::from_reader(file)?)
        } else {
            Ok(Default::default())
        }
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;

        Ok(serde_json::to_writer(file, self)?)
    }

    /// Grace period between a successful fetch and the deletion of the job's
    /// artifact, so that slow clients can retry.
    pub fn reclaim_delay(&self) -> Duration {
        Duration::from_secs(self.reclaim_delay_seconds)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            audio_format: AudioFormat::default(),
            downloader_path: default_downloader_path(),
            cookies_file: None,
            reclaim_delay_seconds: default_reclaim_delay_seconds(),
        }
    }
}

fn default_downloader_path() -> PathBuf {
    PathBuf::from("yt-dlp")
}

fn default_reclaim_delay_seconds() -> u64 {
    60
}

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{anyhow, Context};
use log::debug;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, Command};

use crate::model::{AudioFormat, TrackMetadata};

/// Prefix baked into the progress template so that progress lines can be told
/// apart from the downloader's other stdout noise.
const PROGRESS_LINE_PREFIX: &str = "progress=";

/// How many trailing stderr lines are kept around for error messages.
const STDERR_TAIL_LINES: usize = 12;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("couldn't resolve metadata for the given URL")]
    ExtractionError(#[source] anyhow::Error),
    #[error("an error occurred while downloading the audio track")]
    DownloadError(#[source] anyhow::Error),
    #[error("unknown error")]
    Other(#[from] anyhow::Error),
}

/// One parsed progress line, as emitted by the downloader's progress template.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ProgressLine {
    #[serde(default)]
    pub status: String,
    pub downloaded_bytes: Option<u64>,
    pub total_bytes: Option<u64>,
    pub total_bytes_estimate: Option<f64>,
    pub speed: Option<f64>,
    pub eta: Option<f64>,
}

impl ProgressLine {
    /// Percentage against the best total the downloader knows about, or 0 when
    /// no total is known at all.
    pub fn percent(&self) -> f64 {
        let total = self
            .total_bytes
            .map(|bytes| bytes as f64)
            .or(self.total_bytes_estimate);

        match (self.downloaded_bytes, total) {
            (Some(downloaded), Some(total)) if total > 0.0 => downloaded as f64 / total * 100.0,
            _ => 0.0,
        }
    }

    /// The raw fetch is done and the downloader is about to post-process.
    pub fn is_finished(&self) -> bool {
        self.status == "finished"
    }
}

pub fn parse_progress_line(line: &str) -> Option<ProgressLine> {
    let payload = line.trim().strip_prefix(PROGRESS_LINE_PREFIX)?;

    serde_json::from_str(payload).ok()
}

/// Thin wrapper around the external downloader binary. Everything hard
/// (format negotiation, transcoding, site support) lives in the tool itself;
/// this type only builds command lines and parses what comes back.
pub struct AudioDownloader {
    binary: PathBuf,
}

impl AudioDownloader {
    pub fn new(binary: PathBuf) -> Self {
        Self { binary }
    }

    /// Resolves the track metadata without downloading anything.
    pub async fn probe(&self, url: &str, cookies: Option<&Path>) -> Result<TrackMetadata, Error> {
        let mut command = Command::new(&self.binary);
        command
            .arg("--dump-single-json")
            .arg("--no-download")
            .arg("--no-warnings")
            .arg("--no-playlist");

        if let Some(cookies) = cookies {
            command.arg("--cookies").arg(cookies);
        }

        let output = command
            .arg(url)
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("couldn't run {}", self.binary.display()))
            .map_err(Error::ExtractionError)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);

            return Err(Error::ExtractionError(anyhow!(
                "downloader exited with {}: {}",
                output.status,
                tail_of(&stderr)
            )));
        }

        let metadata = serde_json::from_slice(&output.stdout)
            .with_context(|| "while parsing the downloader's metadata output")
            .map_err(Error::ExtractionError)?;

        Ok(metadata)
    }

    /// Runs the download and audio extraction, invoking `on_progress` for every
    /// parsed progress line. Returns once the subprocess has exited and the
    /// extracted file is expected to be in `output_dir`.
    pub async fn download(
        &self,
        url: &str,
        output_dir: &Path,
        format: AudioFormat,
        cookies: Option<&Path>,
        mut on_progress: impl FnMut(ProgressLine),
    ) -> Result<(), Error> {
        let output_template = output_dir.join("%(title)s.%(ext)s");

        let mut command = Command::new(&self.binary);
        command
            .arg("--extract-audio")
            .arg("--audio-format")
            .arg(format.extension())
            // A single audio stream keeps the progress sequence monotonic and
            // the output directory single-file.
            .arg("--format")
            .arg("bestaudio/best")
            .arg("--output")
            .arg(&output_template)
            .arg("--newline")
            .arg("--no-warnings")
            .arg("--no-playlist")
            .arg("--progress-template")
            .arg(format!("download:{}%(progress)j", PROGRESS_LINE_PREFIX));

        if let Some(cookies) = cookies {
            command.arg("--cookies").arg(cookies);
        }

        let mut child = command
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("couldn't spawn {}", self.binary.display()))
            .map_err(Error::DownloadError)?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("the downloader's stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("the downloader's stderr was not captured"))?;

        let stderr_tail = tokio::spawn(collect_stderr_tail(stderr));

        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| Error::DownloadError(e.into()))?
        {
            match parse_progress_line(&line) {
                Some(progress) => on_progress(progress),
                None => debug!("downloader: {}", line),
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| Error::DownloadError(e.into()))?;
        let stderr_tail = stderr_tail.await.unwrap_or_default();

        if !status.success() {
            return Err(Error::DownloadError(anyhow!(
                "downloader exited with {}: {}",
                status,
                stderr_tail
            )));
        }

        Ok(())
    }
}

async fn collect_stderr_tail(stderr: ChildStderr) -> String {
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
    let mut lines = BufReader::new(stderr).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        debug!("downloader stderr: {}", line);

        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }

    Vec::from(tail).join("\n")
}

fn tail_of(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().collect();
    let skip = lines.len().saturating_sub(STDERR_TAIL_LINES);

    lines[skip..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::parse_progress_line;

    #[test]
    fn it_parses_a_progress_template_line() {
        let line = r#"progress={"status": "downloading", "downloaded_bytes": 512, "total_bytes": 2048, "speed": 100.5, "eta": 15.0}"#;

        let progress = parse_progress_line(line).unwrap();

        assert_eq!("downloading", progress.status);
        assert_eq!(Some(512), progress.downloaded_bytes);
        assert_eq!(Some(2048), progress.total_bytes);
        assert_eq!(25.0, progress.percent());
        assert!(!progress.is_finished());
    }

    #[test]
    fn it_ignores_lines_that_are_not_progress_reports() {
        assert!(parse_progress_line("[youtube] Extracting URL").is_none());
        assert!(parse_progress_line("progress=definitely not json").is_none());
        assert!(parse_progress_line("").is_none());
    }

    #[test]
    fn it_falls_back_to_the_estimated_total() {
        let line = r#"progress={"status": "downloading", "downloaded_bytes": 50, "total_bytes_estimate": 200.0}"#;

        let progress = parse_progress_line(line).unwrap();

        assert_eq!(25.0, progress.percent());
    }

    #[test]
    fn percent_is_zero_when_no_total_is_known() {
        let line = r#"progress={"status": "downloading", "downloaded_bytes": 50}"#;

        let progress = parse_progress_line(line).unwrap();

        assert_eq!(0.0, progress.percent());
    }

    #[test]
    fn a_finished_line_marks_the_fetch_as_done() {
        let line = r#"progress={"status": "finished", "downloaded_bytes": 100, "total_bytes": 100}"#;

        let progress = parse_progress_line(line).unwrap();

        assert!(progress.is_finished());
    }
}

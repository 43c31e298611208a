use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use log::warn;

use crate::model::{AudioFormat, JobId};

const COOKIES_FILE_NAME: &str = "cookies.txt";

/// Owns the scratch root under which every job gets its own private directory.
/// Directories are never shared between jobs; that is what makes the
/// exactly-one-artifact discovery in [`AudioStorage::find_artifact`] sound.
#[derive(Clone)]
pub struct AudioStorage {
    scratch_root: PathBuf,
}

impl AudioStorage {
    pub fn new(scratch_root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&scratch_root)
            .with_context(|| "while trying to ensure the scratch root exists")?;

        Ok(Self { scratch_root })
    }

    pub fn job_dir(&self, id: &JobId) -> PathBuf {
        self.scratch_root.join(id.to_string())
    }

    pub fn allocate_job_dir(&self, id: &JobId) -> Result<PathBuf> {
        let dir = self.job_dir(id);
        fs::create_dir_all(&dir)
            .with_context(|| format!("while allocating a scratch directory for job {}", id))?;

        Ok(dir)
    }

    /// Writes a job-private cookies file from an inline blob.
    pub fn write_cookies(&self, id: &JobId, contents: &str) -> Result<PathBuf> {
        let path = self.job_dir(id).join(COOKIES_FILE_NAME);
        fs::write(&path, contents)
            .with_context(|| format!("while writing the cookies file for job {}", id))?;

        Ok(path)
    }

    /// Copies a configured default cookies file into the job's directory, so
    /// concurrent jobs never point the downloader at a shared mutable path.
    pub fn copy_cookies_from(&self, id: &JobId, source: &Path) -> Result<PathBuf> {
        let path = self.job_dir(id).join(COOKIES_FILE_NAME);
        fs::copy(source, &path).with_context(|| {
            format!(
                "while copying the configured cookies file {} for job {}",
                source.display(),
                id
            )
        })?;

        Ok(path)
    }

    /// Finds the single output file with the expected audio extension in the
    /// job's directory. Zero or multiple candidates means the downloader did
    /// something unexpected, and is reported as an error rather than resolved
    /// by picking an arbitrary file.
    pub fn find_artifact(&self, id: &JobId, format: AudioFormat) -> Result<PathBuf> {
        let dir = self.job_dir(id);
        let entries = fs::read_dir(&dir)
            .with_context(|| format!("while scanning the scratch directory for job {}", id))?;

        let mut candidates: Vec<PathBuf> = entries
            .filter_map(|entry| {
                let path = entry.ok()?.path();
                let extension = path.extension()?;

                if path.is_file() && extension == format.extension() {
                    Some(path)
                } else {
                    None
                }
            })
            .collect();

        match candidates.len() {
            0 => Err(anyhow!(
                "no .{} file was produced in {}",
                format.extension(),
                dir.display()
            )),
            1 => Ok(candidates.remove(0)),
            count => Err(anyhow!(
                "expected exactly one .{} file in {}, found {}",
                format.extension(),
                dir.display(),
                count
            )),
        }
    }

    /// Recursively removes the job's directory. Best-effort and idempotent;
    /// cleanup failures are logged, never propagated.
    pub fn remove_job_dir(&self, id: &JobId) {
        let dir = self.job_dir(id);
        if !dir.exists() {
            return;
        }

        if let Err(e) = fs::remove_dir_all(&dir) {
            warn!(
                "couldn't remove the scratch directory {}: {}",
                dir.display(),
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use crate::model::{AudioFormat, JobId};

    use super::AudioStorage;

    fn storage_in_tempdir() -> (tempfile::TempDir, AudioStorage) {
        let directory = tempfile::tempdir().unwrap();
        let storage = AudioStorage::new(directory.path().join("jobs")).unwrap();

        (directory, storage)
    }

    #[test]
    fn it_finds_the_single_artifact() {
        let (_directory, storage) = storage_in_tempdir();
        let id = JobId::new();

        let dir = storage.allocate_job_dir(&id).unwrap();
        fs::write(dir.join("Some Track.mp3"), b"audio").unwrap();
        fs::write(dir.join("cookies.txt"), b"not an artifact").unwrap();

        let artifact = storage.find_artifact(&id, AudioFormat::Mp3).unwrap();

        assert_eq!(dir.join("Some Track.mp3"), artifact);
    }

    #[test]
    fn it_errors_when_no_artifact_was_produced() {
        let (_directory, storage) = storage_in_tempdir();
        let id = JobId::new();

        storage.allocate_job_dir(&id).unwrap();

        assert!(storage.find_artifact(&id, AudioFormat::Mp3).is_err());
    }

    #[test]
    fn it_errors_on_ambiguous_output_instead_of_picking_one() {
        let (_directory, storage) = storage_in_tempdir();
        let id = JobId::new();

        let dir = storage.allocate_job_dir(&id).unwrap();
        fs::write(dir.join("one.mp3"), b"audio").unwrap();
        fs::write(dir.join("two.mp3"), b"audio").unwrap();

        assert!(storage.find_artifact(&id, AudioFormat::Mp3).is_err());
    }

    #[test]
    fn removal_is_idempotent() {
        let (_directory, storage) = storage_in_tempdir();
        let id = JobId::new();

        let dir = storage.allocate_job_dir(&id).unwrap();
        fs::write(dir.join("track.mp3"), b"audio").unwrap();

        storage.remove_job_dir(&id);
        assert!(!dir.exists());

        // Removing an already-removed directory must not panic or warn loudly.
        storage.remove_job_dir(&id);
    }

    #[test]
    fn job_directories_are_private_per_job() {
        let (_directory, storage) = storage_in_tempdir();
        let first = JobId::new();
        let second = JobId::new();

        let first_dir = storage.allocate_job_dir(&first).unwrap();
        let second_dir = storage.allocate_job_dir(&second).unwrap();
        fs::write(first_dir.join("track.mp3"), b"audio").unwrap();

        assert_ne!(first_dir, second_dir);
        assert!(storage.find_artifact(&second, AudioFormat::Mp3).is_err());
    }
}

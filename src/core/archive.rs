//! Timestamped `tar` archives of a set of source directories.
//!
//! Each source is added relative to its parent (`tar -C <parent> <leaf>`), so
//! archive members never carry absolute paths. Missing sources are skipped
//! with a warning; the job only fails when `tar` itself does.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use chrono::{DateTime, Local};
use tokio::process::Command;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::core::models::{ArchiveJob, CompressionFormat};
use crate::error::{BackupError, Result};

pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// GNU tar exit status for "some files changed while being read". The archive
/// is still complete.
const TAR_FILES_CHANGED: i32 = 1;

/// `<label>_<YYYYMMDD_HHMMSS>.<ext>`
pub fn timestamped_name(label: &str, extension: &str, at: &DateTime<Local>) -> String {
    format!("{}_{}.{}", label, at.format(TIMESTAMP_FORMAT), extension)
}

/// Pick a path under `dir` that does not exist yet.
///
/// The plain timestamped name is preferred; a second run within the same
/// second gets `_2`, `_3`, ... appended before the extension.
pub fn unique_destination(dir: &Path, label: &str, extension: &str, at: &DateTime<Local>) -> PathBuf {
    let first = dir.join(timestamped_name(label, extension, at));
    if !first.exists() {
        return first;
    }

    let stamp = at.format(TIMESTAMP_FORMAT);
    (2u32..)
        .map(|n| dir.join(format!("{}_{}_{}.{}", label, stamp, n, extension)))
        .find(|candidate| !candidate.exists())
        .unwrap_or(first)
}

/// Result of running one archive job.
#[derive(Debug)]
pub enum ArchiveOutcome {
    Written(ArchiveResult),
    /// None of the job's sources exist, so nothing was written.
    NoSources { skipped: Vec<PathBuf> },
}

#[derive(Debug)]
pub struct ArchiveResult {
    pub path: PathBuf,
    pub included: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
    pub total_bytes: u64,
    pub duration_secs: u64,
}

pub struct ArchiveBuilder {
    format: CompressionFormat,
    tar_program: String,
}

impl Default for ArchiveBuilder {
    fn default() -> Self {
        Self {
            format: CompressionFormat::Gzip,
            tar_program: "tar".to_string(),
        }
    }
}

impl ArchiveBuilder {
    /// Use a different `tar` binary, e.g. `gtar` or an absolute path.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.tar_program = program.into();
        self
    }

    /// Describe the job for `label` without touching the filesystem beyond
    /// choosing a free destination name.
    ///
    /// Sources are made absolute against the current directory: tar resolves
    /// a relative `-C` against the previous one.
    pub fn plan(
        &self,
        label: &str,
        sources: Vec<PathBuf>,
        destination_root: &Path,
        at: &DateTime<Local>,
    ) -> ArchiveJob {
        ArchiveJob {
            label: label.to_string(),
            destination: unique_destination(destination_root, label, self.format.extension(), at),
            sources: sources.into_iter().map(absolute_source).collect(),
            format: self.format,
        }
    }

    pub async fn run(&self, job: &ArchiveJob) -> Result<ArchiveOutcome> {
        let span = info_span!(
            "archive",
            label = %job.label,
            destination = %job.destination.display()
        );

        async {
            let (included, skipped): (Vec<PathBuf>, Vec<PathBuf>) =
                job.sources.iter().cloned().partition(|p| p.exists());

            for path in &skipped {
                warn!(source = %path.display(), "{}, skipping", BackupError::SourceMissing(path.clone()));
            }

            if included.is_empty() {
                warn!("No sources exist, nothing to archive");
                return Ok(ArchiveOutcome::NoSources { skipped });
            }

            info!(sources = included.len(), "Creating archive");
            let start_time = Instant::now();

            let mut command = Command::new(&self.tar_program);
            command
                .arg(job.format.tar_flag())
                .arg(&job.destination)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::piped());
            for source in &included {
                let (parent, leaf) = relative_member(source);
                command.arg("-C").arg(parent).arg(leaf);
            }

            let output = command.output().await.map_err(|e| BackupError::Archive {
                path: job.destination.clone(),
                message: format!("failed to spawn {}: {}", self.tar_program, e),
            })?;

            let stderr = String::from_utf8_lossy(&output.stderr);
            match output.status.code() {
                Some(0) => {}
                Some(TAR_FILES_CHANGED) => {
                    warn!(stderr = %stderr.trim(), "Some files changed while being archived");
                }
                _ => {
                    let message = describe_failure(&job.destination, output.status, &stderr);
                    discard_partial(&job.destination);
                    return Err(BackupError::Archive {
                        path: job.destination.clone(),
                        message,
                    });
                }
            }

            let total_bytes = std::fs::metadata(&job.destination)
                .map(|m| m.len())
                .map_err(|e| BackupError::write(&job.destination, e))?;
            let duration_secs = start_time.elapsed().as_secs();

            info!(
                total_bytes,
                duration_secs,
                skipped = skipped.len(),
                "Archive complete"
            );

            Ok(ArchiveOutcome::Written(ArchiveResult {
                path: job.destination.clone(),
                included,
                skipped,
                total_bytes,
                duration_secs,
            }))
        }
        .instrument(span)
        .await
    }
}

fn absolute_source(source: PathBuf) -> PathBuf {
    match std::path::absolute(&source) {
        Ok(path) => path,
        Err(e) => {
            warn!(source = %source.display(), error = %e, "Cannot resolve source path");
            source
        }
    }
}

/// Split an absolute source into the directory `tar` changes into and the
/// member name added from there.
fn relative_member(source: &Path) -> (PathBuf, PathBuf) {
    match (source.parent(), source.file_name()) {
        (Some(parent), Some(leaf)) => (parent.to_path_buf(), PathBuf::from(leaf)),
        _ => (source.to_path_buf(), PathBuf::from(".")),
    }
}

fn describe_failure(destination: &Path, status: std::process::ExitStatus, stderr: &str) -> String {
    let detail = stderr
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("")
        .trim();

    let removed = destination
        .parent()
        .map(|dir| !dir.exists())
        .unwrap_or(false);

    match (removed, detail.is_empty()) {
        (true, _) => format!("tar exited with {}; the device appears to have been removed", status),
        (false, true) => format!("tar exited with {}", status),
        (false, false) => format!("tar exited with {}: {}", status, detail),
    }
}

fn discard_partial(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "Removed partial archive"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove partial archive"),
    }
}

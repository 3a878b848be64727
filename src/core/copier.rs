//! Plain (uncompressed) copy of a directory tree onto the backup target.
//!
//! The copy merges into an existing destination directory. Permissions and
//! timestamps are preserved; symlinks and special files are skipped. A single
//! unreadable file does not stop the copy, but a removed device does.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::core::models::CopyJob;
use crate::error::{BackupError, Result};

/// Buffer size for file I/O operations
const BUFFER_SIZE: usize = 128 * 1024;

/// How many per-file errors are spelled out in the job error
const MAX_REPORTED_ERRORS: usize = 10;

pub struct DirectoryCopier {
    /// Whether to fsync each file after writing (safer but slower)
    pub sync_files: bool,
}

impl Default for DirectoryCopier {
    fn default() -> Self {
        Self { sync_files: true }
    }
}

#[derive(Debug)]
pub struct CopyResult {
    pub files_copied: u64,
    pub total_bytes: u64,
    pub duration_secs: u64,
}

impl DirectoryCopier {
    pub async fn copy(&self, job: &CopyJob) -> Result<CopyResult> {
        if !job.source.is_dir() {
            return Err(BackupError::SourceMissing(job.source.clone()));
        }

        let span = info_span!(
            "directory_copy",
            source = %job.source.display(),
            destination = %job.destination.display()
        );

        let source = job.source.clone();
        let destination = job.destination.clone();
        let sync_files = self.sync_files;
        let dispatch = tracing::dispatcher::get_default(|d| d.clone());

        async move {
            info!("Starting directory copy");
            let start_time = Instant::now();

            let worker_span = tracing::Span::current();
            let result = tokio::task::spawn_blocking(move || {
                tracing::dispatcher::with_default(&dispatch, || {
                    let _entered = worker_span.enter();
                    copy_tree(&source, &destination, sync_files)
                })
            })
            .await
            .map_err(|e| BackupError::write(&job.destination, io::Error::other(e)))??;

            let duration_secs = start_time.elapsed().as_secs();
            info!(
                files_copied = result.0,
                total_bytes = result.1,
                duration_secs,
                "Directory copy complete"
            );

            Ok(CopyResult {
                files_copied: result.0,
                total_bytes: result.1,
                duration_secs,
            })
        }
        .instrument(span)
        .await
    }
}

/// Error tracking for copy operations
struct CopyError {
    file: String,
    message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureKind {
    /// The source file disappeared after the scan.
    SourceVanished,
    DeviceRemoved,
    Other,
}

/// Error information from a file copy operation
struct FileCopyError {
    message: String,
    kind: FailureKind,
}

impl FileCopyError {
    /// Failure reading the local source tree. A missing file there is churn
    /// in a live directory, not a lost device.
    fn from_source(context: &str, e: &io::Error) -> Self {
        let kind = if e.kind() == ErrorKind::NotFound {
            FailureKind::SourceVanished
        } else if is_device_removed_error(e) {
            FailureKind::DeviceRemoved
        } else {
            FailureKind::Other
        };
        Self::new(context, e, kind)
    }

    /// Failure writing to the backup target. A missing path there means the
    /// mount went away.
    fn from_destination(context: &str, e: &io::Error) -> Self {
        let kind = if e.kind() == ErrorKind::NotFound || is_device_removed_error(e) {
            FailureKind::DeviceRemoved
        } else {
            FailureKind::Other
        };
        Self::new(context, e, kind)
    }

    fn new(context: &str, e: &io::Error, kind: FailureKind) -> Self {
        Self {
            message: format!("{}: {}", context, e),
            kind,
        }
    }
}

/// Copy every directory and regular file under `source` into `destination`.
/// Returns (files copied, bytes copied).
fn copy_tree(source: &Path, destination: &Path, sync_files: bool) -> Result<(u64, u64)> {
    fs::create_dir_all(destination).map_err(|e| BackupError::write(destination, e))?;

    let mut files = Vec::new();
    let mut directories = Vec::new();
    scan_directory_recursive(source, &mut files, &mut directories)
        .map_err(|e| BackupError::write(destination, e))?;

    debug!(files = files.len(), directories = directories.len(), "Scan complete");

    copy_scanned(source, destination, &directories, &files, sync_files)
}

/// Recreate `directories` and copy `files`, both as found by the scan of
/// `source`.
fn copy_scanned(
    source: &Path,
    destination: &Path,
    directories: &[PathBuf],
    files: &[PathBuf],
    sync_files: bool,
) -> Result<(u64, u64)> {
    for dir_path in directories {
        let Ok(relative) = dir_path.strip_prefix(source) else {
            continue;
        };
        let dest_dir = destination.join(relative);
        fs::create_dir_all(&dest_dir).map_err(|e| BackupError::write(&dest_dir, e))?;
        if let Ok(metadata) = fs::metadata(dir_path) {
            if let Err(e) = fs::set_permissions(&dest_dir, metadata.permissions()) {
                debug!(path = %dest_dir.display(), error = %e, "Failed to set directory permissions");
            }
        }
    }

    let mut bytes_copied: u64 = 0;
    let mut files_copied: u64 = 0;
    let mut errors: Vec<CopyError> = Vec::new();

    for file_path in files {
        let Ok(relative) = file_path.strip_prefix(source) else {
            continue;
        };
        let dest_path = destination.join(relative);
        let current_file = relative.to_string_lossy().to_string();

        match copy_single_file(file_path, &dest_path, sync_files) {
            Ok(file_bytes) => {
                bytes_copied += file_bytes;
                files_copied += 1;
            }
            Err(e) => match e.kind {
                FailureKind::SourceVanished => {
                    warn!(file = %current_file, error = %e.message, "Source file vanished, skipping");
                }
                FailureKind::DeviceRemoved => {
                    return Err(BackupError::write(
                        &dest_path,
                        io::Error::other(format!(
                            "device removed during copy at file {}: {}",
                            current_file, e.message
                        )),
                    ));
                }
                FailureKind::Other => {
                    error!(file = %current_file, error = %e.message, "Failed to copy file");
                    errors.push(CopyError {
                        file: current_file,
                        message: e.message,
                    });
                }
            },
        }
    }

    if !errors.is_empty() {
        let mut summary = format!("copy completed with {} error(s):", errors.len());
        for e in errors.iter().take(MAX_REPORTED_ERRORS) {
            summary.push_str(&format!("\n  - {}: {}", e.file, e.message));
        }
        if errors.len() > MAX_REPORTED_ERRORS {
            summary.push_str(&format!(
                "\n  ... and {} more errors",
                errors.len() - MAX_REPORTED_ERRORS
            ));
        }
        return Err(BackupError::write(destination, io::Error::other(summary)));
    }

    Ok((files_copied, bytes_copied))
}

/// Collect regular files and directories, parents before children.
fn scan_directory_recursive(
    current: &Path,
    files: &mut Vec<PathBuf>,
    directories: &mut Vec<PathBuf>,
) -> io::Result<()> {
    for entry in fs::read_dir(current)? {
        let path = entry?.path();

        // symlink_metadata so links are never followed
        let metadata = match path.symlink_metadata() {
            Ok(m) => m,
            Err(e) => {
                if is_device_removed_error(&e) {
                    return Err(e);
                }
                warn!(path = %path.display(), error = %e, "Skipping unreadable entry");
                continue;
            }
        };

        if metadata.is_dir() {
            directories.push(path.clone());
            if let Err(e) = scan_directory_recursive(&path, files, directories) {
                if is_device_removed_error(&e) {
                    return Err(e);
                }
                warn!(path = %path.display(), error = %e, "Skipping unreadable directory");
            }
        } else if metadata.is_file() {
            files.push(path);
        }
    }

    Ok(())
}

/// Copy a single file with metadata preservation
fn copy_single_file(source: &Path, dest: &Path, sync_file: bool) -> Result<u64, FileCopyError> {
    let source_metadata = fs::metadata(source)
        .map_err(|e| FileCopyError::from_source("Failed to read source metadata", &e))?;

    let source_file =
        File::open(source).map_err(|e| FileCopyError::from_source("Failed to open source file", &e))?;
    let mut reader = BufReader::with_capacity(BUFFER_SIZE, source_file);

    let dest_file = File::create(dest)
        .map_err(|e| FileCopyError::from_destination("Failed to create destination file", &e))?;
    let mut writer = BufWriter::with_capacity(BUFFER_SIZE, dest_file);

    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut bytes_written: u64 = 0;

    loop {
        let bytes_read = reader
            .read(&mut buffer)
            .map_err(|e| FileCopyError::from_source("Failed to read from source", &e))?;

        if bytes_read == 0 {
            break;
        }

        writer
            .write_all(&buffer[..bytes_read])
            .map_err(|e| FileCopyError::from_destination("Failed to write to destination", &e))?;

        bytes_written += bytes_read as u64;
    }

    writer
        .flush()
        .map_err(|e| FileCopyError::from_destination("Failed to flush destination file", &e))?;

    if sync_file {
        let inner = writer
            .into_inner()
            .map_err(|e| FileCopyError::from_destination("Failed to get inner file handle", e.error()))?;

        inner
            .sync_all()
            .map_err(|e| FileCopyError::from_destination("Failed to sync file", &e))?;
    }

    // Permission errors are expected on vfat/exfat sticks
    if let Err(e) = fs::set_permissions(dest, source_metadata.permissions()) {
        debug!(dest = %dest.display(), error = %e, "Failed to set file permissions");
    }

    let atime = filetime::FileTime::from_last_access_time(&source_metadata);
    let mtime = filetime::FileTime::from_last_modification_time(&source_metadata);
    if let Err(e) = filetime::set_file_times(dest, atime, mtime) {
        debug!(dest = %dest.display(), error = %e, "Failed to preserve file timestamps");
    }

    Ok(bytes_written)
}

/// Check if an I/O error indicates the device has been removed.
///
/// `NotFound` is left to the caller, which knows whether the path was on the
/// source or the target.
fn is_device_removed_error(error: &io::Error) -> bool {
    match error.kind() {
        ErrorKind::PermissionDenied => false,
        ErrorKind::BrokenPipe => true,
        ErrorKind::NotConnected => true,
        _ => {
            if let Some(os_error) = error.raw_os_error() {
                matches!(
                    os_error,
                    libc::EIO
                    | libc::ENODEV
                    | libc::ENXIO
                    | libc::ENOMEDIUM
                    | libc::EMEDIUMTYPE
                )
            } else {
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::Permissions;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    #[test]
    fn device_removal_errnos() {
        assert!(is_device_removed_error(&io::Error::from_raw_os_error(libc::EIO)));
        assert!(is_device_removed_error(&io::Error::from_raw_os_error(libc::ENODEV)));
        assert!(!is_device_removed_error(&io::Error::new(ErrorKind::NotFound, "gone")));
        assert!(!is_device_removed_error(&io::Error::new(
            ErrorKind::PermissionDenied,
            "denied"
        )));
    }

    #[test]
    fn missing_path_depends_on_side() {
        let gone = io::Error::new(ErrorKind::NotFound, "gone");
        assert_eq!(
            FileCopyError::from_source("open", &gone).kind,
            FailureKind::SourceVanished
        );
        assert_eq!(
            FileCopyError::from_destination("create", &gone).kind,
            FailureKind::DeviceRemoved
        );

        let eio = io::Error::from_raw_os_error(libc::EIO);
        assert_eq!(
            FileCopyError::from_source("read", &eio).kind,
            FailureKind::DeviceRemoved
        );
    }

    #[test]
    fn file_deleted_after_scan_is_skipped() {
        let temp = tempdir().unwrap();
        let source = temp.path().join(".config");
        let dest = temp.path().join("usb").join("kde_config");
        fs::create_dir_all(source.join("session")).unwrap();
        fs::write(source.join("kdeglobals"), b"[General]\n").unwrap();
        fs::write(source.join("session/lock"), b"1234").unwrap();
        fs::create_dir_all(&dest).unwrap();

        let mut files = Vec::new();
        let mut directories = Vec::new();
        scan_directory_recursive(&source, &mut files, &mut directories).unwrap();
        assert_eq!(files.len(), 2);

        fs::remove_file(source.join("session/lock")).unwrap();

        let (copied, bytes) = copy_scanned(&source, &dest, &directories, &files, false).unwrap();
        assert_eq!(copied, 1);
        assert_eq!(bytes, 10);
        assert!(dest.join("kdeglobals").exists());
        assert!(!dest.join("session/lock").exists());
    }

    #[test]
    fn vanished_destination_aborts_the_copy() {
        let temp = tempdir().unwrap();
        let source = temp.path().join("src");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("a.txt"), b"a").unwrap();

        let files = vec![source.join("a.txt")];
        let dest = temp.path().join("usb-gone");

        let err = copy_scanned(&source, &dest, &[], &files, false).unwrap_err();
        assert!(err.to_string().contains("device removed"));
    }

    #[tokio::test]
    async fn copies_tree_and_preserves_mode() {
        let temp = tempdir().unwrap();
        let source = temp.path().join(".config");
        let dest = temp.path().join("usb").join("kde_config");

        fs::create_dir_all(source.join("plasma")).unwrap();
        fs::write(source.join("kdeglobals"), b"[General]\n").unwrap();
        fs::write(source.join("plasma/panel.rc"), b"panel=1\n").unwrap();
        fs::set_permissions(source.join("kdeglobals"), Permissions::from_mode(0o600)).unwrap();

        let job = CopyJob {
            source: source.clone(),
            destination: dest.clone(),
        };
        let result = DirectoryCopier::default().copy(&job).await.unwrap();

        assert_eq!(result.files_copied, 2);
        assert_eq!(result.total_bytes, 10 + 8);
        assert_eq!(
            fs::read_to_string(dest.join("plasma/panel.rc")).unwrap(),
            "panel=1\n"
        );
        let mode = fs::metadata(dest.join("kdeglobals")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn merges_into_existing_destination() {
        let temp = tempdir().unwrap();
        let source = temp.path().join("src");
        let dest = temp.path().join("dest");

        fs::create_dir_all(&source).unwrap();
        fs::create_dir_all(&dest).unwrap();
        fs::write(source.join("new.txt"), b"new").unwrap();
        fs::write(dest.join("old.txt"), b"old").unwrap();

        let job = CopyJob {
            source,
            destination: dest.clone(),
        };
        DirectoryCopier::default().copy(&job).await.unwrap();

        assert!(dest.join("old.txt").exists());
        assert!(dest.join("new.txt").exists());
    }

    #[tokio::test]
    async fn skips_symlinks() {
        let temp = tempdir().unwrap();
        let source = temp.path().join("src");
        let dest = temp.path().join("dest");

        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("real.txt"), b"data").unwrap();
        std::os::unix::fs::symlink(source.join("real.txt"), source.join("link.txt")).unwrap();

        let job = CopyJob {
            source,
            destination: dest.clone(),
        };
        let result = DirectoryCopier::default().copy(&job).await.unwrap();

        assert_eq!(result.files_copied, 1);
        assert!(!dest.join("link.txt").exists());
    }

    #[tokio::test]
    async fn missing_source_is_reported() {
        let temp = tempdir().unwrap();
        let job = CopyJob {
            source: temp.path().join("missing"),
            destination: temp.path().join("dest"),
        };
        let err = DirectoryCopier::default().copy(&job).await.unwrap_err();
        assert!(matches!(err, BackupError::SourceMissing(_)));
    }
}

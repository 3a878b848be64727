use std::path::PathBuf;

/// Failures surfaced by the backup run.
///
/// Only [`BackupError::InsufficientPrivilege`] ends the run on its own. Every
/// other variant is caught at the step or job boundary, logged, and reported
/// in the run summary.
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("root privileges required: {0}")]
    InsufficientPrivilege(String),

    #[error("failed to query block devices: {0}")]
    DeviceQuery(String),

    #[error("drive selection failed: {0}")]
    Selection(String),

    #[error("source does not exist: {}", .0.display())]
    SourceMissing(PathBuf),

    #[error("archive {} failed: {message}", .path.display())]
    Archive { path: PathBuf, message: String },

    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("package query failed: {0}")]
    PackageQuery(String),
}

impl BackupError {
    pub fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Write {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T, E = BackupError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_error_names_the_destination() {
        let err = BackupError::Archive {
            path: PathBuf::from("/media/usb0/user_backup.tar.gz"),
            message: "tar exited with status 2".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("/media/usb0/user_backup.tar.gz"));
        assert!(msg.contains("status 2"));
    }

    #[test]
    fn write_error_keeps_io_source() {
        let err = BackupError::write(
            "/media/usb0/list.txt",
            std::io::Error::from_raw_os_error(libc::ENOSPC),
        );
        assert!(std::error::Error::source(&err).is_some());
    }
}

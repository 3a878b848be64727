use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

/// A mounted block device that can receive a backup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbCandidate {
    pub name: String,
    pub mount_point: Option<PathBuf>,
    pub label: Option<String>,
}

impl UsbCandidate {
    pub fn new(name: &str, mount_point: Option<&str>, label: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            mount_point: mount_point.map(PathBuf::from),
            label: label.map(str::to_string),
        }
    }

    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or("No Label")
    }
}

impl fmt::Display for UsbCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.mount_point {
            Some(mount) => write!(
                f,
                "{} - {} ({})",
                self.display_label(),
                mount.display(),
                self.name
            ),
            None => write!(f, "{} - not mounted ({})", self.display_label(), self.name),
        }
    }
}

/// The mount point chosen for this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupTarget {
    mount_point: PathBuf,
    device: String,
}

impl BackupTarget {
    pub fn new(mount_point: impl Into<PathBuf>, device: impl Into<String>) -> Self {
        Self {
            mount_point: mount_point.into(),
            device: device.into(),
        }
    }

    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }

    pub fn device(&self) -> &str {
        &self.device
    }
}

/// One compressed archive built from a set of source directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveJob {
    pub label: String,
    pub sources: Vec<PathBuf>,
    pub destination: PathBuf,
    pub format: CompressionFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionFormat {
    Gzip,
}

impl CompressionFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Gzip => "tar.gz",
        }
    }

    pub fn tar_flag(&self) -> &'static str {
        match self {
            Self::Gzip => "-czf",
        }
    }
}

/// Plain, uncompressed copy of a directory tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyJob {
    pub source: PathBuf,
    pub destination: PathBuf,
}

/// Bare names of user-installed packages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageList {
    names: BTreeSet<String>,
}

impl PackageList {
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Newline-delimited, one name per line.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for name in &self.names {
            out.push_str(name);
            out.push('\n');
        }
        out
    }
}

impl FromIterator<String> for PackageList {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            names: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Completed(PathBuf),
    Skipped(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub name: String,
    pub status: JobStatus,
}

impl JobReport {
    pub fn completed(name: &str, artifact: PathBuf) -> Self {
        Self {
            name: name.to_string(),
            status: JobStatus::Completed(artifact),
        }
    }

    pub fn skipped(name: &str, reason: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status: JobStatus::Skipped(reason.into()),
        }
    }

    pub fn failed(name: &str, error: impl fmt::Display) -> Self {
        Self {
            name: name.to_string(),
            status: JobStatus::Failed(error.to_string()),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, JobStatus::Failed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub target: BackupTarget,
    pub destination: PathBuf,
    pub jobs: Vec<JobReport>,
}

impl RunSummary {
    pub fn failed_count(&self) -> usize {
        self.jobs.iter().filter(|j| j.is_failed()).count()
    }

    pub fn job(&self, name: &str) -> Option<&JobReport> {
        self.jobs.iter().find(|j| j.name == name)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Backup to {} ({}):",
            self.destination.display(),
            self.target.device()
        )?;
        for job in &self.jobs {
            match &job.status {
                JobStatus::Completed(path) => {
                    writeln!(f, "  [ok]      {}: {}", job.name, path.display())?
                }
                JobStatus::Skipped(reason) => writeln!(f, "  [skipped] {}: {}", job.name, reason)?,
                JobStatus::Failed(error) => writeln!(f, "  [failed]  {}: {}", job.name, error)?,
            }
        }
        let failed = self.failed_count();
        if failed == 0 {
            write!(f, "All backup operations have been completed.")
        } else {
            write!(
                f,
                "Backup finished with {} failed job(s) out of {}.",
                failed,
                self.jobs.len()
            )
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every configured job was attempted.
    Completed(RunSummary),
    NoPrivilege,
    NoDevice,
}

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;
use tracing::{debug, info};

use crate::core::models::PackageList;
use crate::error::{BackupError, Result};

/// Trailing `.arch` of an RPM NEVRA or `dnf list` name column.
static ARCH_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\.(x86_64|i[3-6]86|aarch64|armv7hl|ppc64le|s390x|riscv64|noarch|src)$")
        .expect("valid arch regex")
});

/// A `-version` or `-release` segment, optionally with an `epoch:` prefix.
static VERSION_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+:)?\d[\w.+~^]*$").expect("valid version regex"));

/// Produces the raw text listing of user-installed packages.
#[async_trait]
pub trait PackageQuery: Send + Sync {
    async fn query(&self) -> Result<String>;
}

/// Runs the configured package manager command and captures stdout.
pub struct CommandPackageQuery {
    command: Vec<String>,
}

impl CommandPackageQuery {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

#[async_trait]
impl PackageQuery for CommandPackageQuery {
    async fn query(&self) -> Result<String> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| BackupError::PackageQuery("no command configured".to_string()))?;

        debug!(program = %program, args = ?args, "Querying user-installed packages");

        let output = Command::new(program)
            .args(args)
            .stdin(std::process::Stdio::null())
            .output()
            .await
            .map_err(|e| BackupError::PackageQuery(format!("failed to run {}: {}", program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BackupError::PackageQuery(format!(
                "{} exited with {}: {}",
                program,
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// At most `-version-release` trails the name in a NEVRA token.
const MAX_VERSION_SEGMENTS: usize = 2;

/// Reduce one listing line to a bare package name.
///
/// Accepts both `dnf repoquery` NEVRA lines (`bash-0:5.2.15-1.fc38.x86_64`)
/// and `dnf list` rows (`bash.x86_64  5.2.15-1.fc38  @updates`). Headers and
/// blank lines yield `None`.
pub fn normalize_package_name(line: &str) -> Option<String> {
    let mut columns = line.split_whitespace();
    let token = columns.next()?;
    if is_header(line) {
        return None;
    }

    let without_arch = ARCH_SUFFIX.replace(token, "");

    // `dnf list` keeps the version in its own column, so the token is already
    // the bare name and may legitimately end in digits (`gnome-2048`).
    let version_in_column = columns.next().is_some_and(is_version_column);
    let max_pops = if version_in_column { 0 } else { MAX_VERSION_SEGMENTS };

    let mut segments: Vec<&str> = without_arch.split('-').collect();
    let mut popped = 0;
    while popped < max_pops
        && segments.len() > 1
        && segments.last().is_some_and(|s| VERSION_SEGMENT.is_match(s))
    {
        segments.pop();
        popped += 1;
    }

    let name = segments.join("-");
    if name.is_empty() { None } else { Some(name) }
}

fn is_version_column(column: &str) -> bool {
    column.split('-').all(|s| VERSION_SEGMENT.is_match(s))
}

fn is_header(line: &str) -> bool {
    let line = line.trim_start();
    line.starts_with("Installed Packages")
        || line.starts_with("Installed packages")
        || line.starts_with("Last metadata expiration")
        || line.starts_with("Updating and loading")
        || line.starts_with("Repositories loaded")
}

/// Normalize and de-duplicate a full listing.
pub fn normalize_listing(listing: &str) -> PackageList {
    listing.lines().filter_map(normalize_package_name).collect()
}

pub struct PackageLister {
    query: Box<dyn PackageQuery>,
}

impl PackageLister {
    pub fn new(query: Box<dyn PackageQuery>) -> Self {
        Self { query }
    }

    /// Query and normalize, surfacing a query failure to the caller.
    pub async fn list(&self) -> Result<PackageList> {
        let listing = self.query.query().await?;
        let packages = normalize_listing(&listing);
        info!(count = packages.len(), "Found user-installed packages");
        Ok(packages)
    }
}

/// Write the list newline-delimited to `path`.
pub fn write_package_list(packages: &PackageList, path: &Path) -> Result<PathBuf> {
    std::fs::write(path, packages.to_text()).map_err(|e| BackupError::write(path, e))?;
    info!(path = %path.display(), count = packages.len(), "Package list written");
    Ok(path.to_path_buf())
}

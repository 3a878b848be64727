use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::core::hardware::{DeviceFilter, DeviceQuery, MountCheck, parse_lsblk_json};
use crate::core::models::UsbCandidate;
use crate::error::{BackupError, Result};

const MOUNTS_PATH: &str = "/proc/self/mounts";

/// Enumerates block devices through `lsblk -J`.
pub struct LsblkDeviceQuery {
    program: String,
}

impl Default for LsblkDeviceQuery {
    fn default() -> Self {
        Self {
            program: "lsblk".to_string(),
        }
    }
}

impl LsblkDeviceQuery {
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl DeviceQuery for LsblkDeviceQuery {
    async fn list_candidates(&self, filter: &DeviceFilter) -> Result<Vec<UsbCandidate>> {
        let output = Command::new(&self.program)
            .args(["-J", "-o", "NAME,MOUNTPOINT,LABEL"])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| BackupError::DeviceQuery(format!("failed to run {}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BackupError::DeviceQuery(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        let json = String::from_utf8_lossy(&output.stdout);
        let candidates = parse_lsblk_json(&json, filter)?;
        debug!(count = candidates.len(), "Block device query complete");
        Ok(candidates)
    }
}

/// Mount state read from the live system.
#[derive(Default)]
pub struct LinuxMounts;

impl MountCheck for LinuxMounts {
    fn is_mounted(&self, path: &Path) -> bool {
        match std::fs::read_to_string(MOUNTS_PATH) {
            Ok(table) => mount_table_contains(&table, path),
            Err(e) => {
                debug!(error = %e, "Mount table unreadable, comparing device ids");
                is_mount_point(path)
            }
        }
    }
}

/// Whether `path` appears as a mount target in a `/proc/self/mounts` table.
pub fn mount_table_contains(table: &str, path: &Path) -> bool {
    let wanted = normalize(path);
    table
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(|target| PathBuf::from(unescape_mount_field(target)))
        .any(|target| normalize(&target) == wanted)
}

/// `path` is a mount point when it lives on a different device than its
/// parent, or is its own parent (`/`).
pub fn is_mount_point(path: &Path) -> bool {
    let Ok(meta) = std::fs::symlink_metadata(path) else {
        return false;
    };
    if !meta.is_dir() {
        return false;
    }
    let Ok(parent) = std::fs::metadata(path.join("..")) else {
        return false;
    };
    meta.dev() != parent.dev() || meta.ino() == parent.ino()
}

fn normalize(path: &Path) -> PathBuf {
    path.components().collect()
}

/// The kernel escapes space, tab, newline and backslash as `\ooo`.
fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let byte = bytes
            .get(i + 1..i + 4)
            .filter(|_| bytes[i] == b'\\')
            .and_then(octal_byte);
        if let Some(byte) = byte {
            out.push(byte);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Three octal digits naming a single byte. `\400` and above are not
/// escapes and stay literal.
fn octal_byte(digits: &[u8]) -> Option<u8> {
    if !digits.iter().all(|b| (b'0'..=b'7').contains(b)) {
        return None;
    }
    let code = digits
        .iter()
        .fold(0u32, |acc, d| acc * 8 + u32::from(d - b'0'));
    u8::try_from(code).ok()
}

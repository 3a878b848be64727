use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::DeviceConfig;
use crate::core::models::UsbCandidate;
use crate::error::{BackupError, Result};

/// Source of USB candidates, in the order the OS reports them.
#[async_trait]
pub trait DeviceQuery: Send + Sync {
    async fn list_candidates(&self, filter: &DeviceFilter) -> Result<Vec<UsbCandidate>>;
}

/// Answers whether a path is currently a mount point.
pub trait MountCheck: Send + Sync {
    fn is_mounted(&self, path: &Path) -> bool;
}

/// Which block devices count as removable backup targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFilter {
    pub name_prefixes: Vec<String>,
    pub mount_prefixes: Vec<String>,
}

impl Default for DeviceFilter {
    fn default() -> Self {
        Self::from(&DeviceConfig::default())
    }
}

impl From<&DeviceConfig> for DeviceFilter {
    fn from(config: &DeviceConfig) -> Self {
        Self {
            name_prefixes: config.name_prefixes.clone(),
            mount_prefixes: config.mount_prefixes.clone(),
        }
    }
}

impl DeviceFilter {
    pub fn accepts(&self, candidate: &UsbCandidate) -> bool {
        let Some(mount) = candidate.mount_point.as_deref() else {
            return false;
        };
        let mount = mount.to_string_lossy();
        if mount.is_empty() || mount == "[SWAP]" {
            return false;
        }

        let name_ok = self
            .name_prefixes
            .iter()
            .any(|prefix| candidate.name.starts_with(prefix.as_str()));
        let mount_ok = self.mount_prefixes.is_empty()
            || self
                .mount_prefixes
                .iter()
                .any(|prefix| mount.starts_with(prefix.as_str()));

        name_ok && mount_ok
    }
}

#[derive(Debug, Deserialize)]
struct LsblkOutput {
    blockdevices: Vec<LsblkDevice>,
}

#[derive(Debug, Deserialize)]
struct LsblkDevice {
    name: String,
    #[serde(default)]
    mountpoint: Option<String>,
    /// util-linux >= 2.37 may report every mount of a device here instead.
    #[serde(default)]
    mountpoints: Vec<Option<String>>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    children: Vec<LsblkDevice>,
}

impl LsblkDevice {
    fn mount_point(&self) -> Option<&str> {
        self.mountpoint
            .as_deref()
            .or_else(|| self.mountpoints.iter().flatten().next().map(String::as_str))
            .filter(|m| !m.is_empty())
    }
}

/// Parse `lsblk -J -o NAME,MOUNTPOINT,LABEL` output into candidates.
///
/// The device tree is flattened depth-first (a disk, then its partitions)
/// and only entries accepted by `filter` are kept.
pub fn parse_lsblk_json(json: &str, filter: &DeviceFilter) -> Result<Vec<UsbCandidate>> {
    let output: LsblkOutput = serde_json::from_str(json)
        .map_err(|e| BackupError::DeviceQuery(format!("unparsable lsblk output: {}", e)))?;

    let mut candidates = Vec::new();
    for device in &output.blockdevices {
        collect_candidates(device, filter, &mut candidates);
    }
    Ok(candidates)
}

fn collect_candidates(device: &LsblkDevice, filter: &DeviceFilter, out: &mut Vec<UsbCandidate>) {
    let label = device.label.as_deref().filter(|l| !l.is_empty());
    let candidate = UsbCandidate::new(&device.name, device.mount_point(), label);
    if filter.accepts(&candidate) {
        out.push(candidate);
    }

    for child in &device.children {
        collect_candidates(child, filter, out);
    }
}

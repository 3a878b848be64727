//! In-memory stand-ins for the system collaborators.
//!
//! These drive the orchestrator and selector without real block devices, a
//! terminal, or root.

use std::collections::{HashSet, VecDeque};
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::core::hardware::{DeviceFilter, DeviceQuery, MountCheck};
use crate::core::models::UsbCandidate;
use crate::core::packages::PackageQuery;
use crate::core::privilege::PrivilegeCheck;
use crate::core::selector::Prompt;
use crate::error::{BackupError, Result};

/// Device query returning a fixed device list, filtered like the real one.
pub struct SimulatedDevices {
    devices: std::result::Result<Vec<UsbCandidate>, String>,
}

impl SimulatedDevices {
    pub fn new(devices: Vec<UsbCandidate>) -> Self {
        Self {
            devices: Ok(devices),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            devices: Err(message.to_string()),
        }
    }
}

#[async_trait]
impl DeviceQuery for SimulatedDevices {
    async fn list_candidates(&self, filter: &DeviceFilter) -> Result<Vec<UsbCandidate>> {
        match &self.devices {
            Ok(devices) => Ok(devices
                .iter()
                .filter(|d| filter.accepts(d))
                .cloned()
                .collect()),
            Err(message) => Err(BackupError::DeviceQuery(message.clone())),
        }
    }
}

/// Mount check answering from a fixed set of paths.
pub struct StaticMounts {
    mounted: Option<HashSet<PathBuf>>,
}

impl StaticMounts {
    /// Every path counts as mounted.
    pub fn all() -> Self {
        Self { mounted: None }
    }

    pub fn only<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            mounted: Some(paths.into_iter().map(Into::into).collect()),
        }
    }
}

impl MountCheck for StaticMounts {
    fn is_mounted(&self, path: &Path) -> bool {
        match &self.mounted {
            None => true,
            Some(set) => set.contains(path),
        }
    }
}

/// Prompt fed from a script of answers. Input closes when the script runs out.
#[derive(Default)]
pub struct ScriptedPrompt {
    answers: VecDeque<String>,
    shown: Vec<String>,
    asked: usize,
}

impl ScriptedPrompt {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: answers.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn shown(&self) -> &[String] {
        &self.shown
    }

    pub fn questions_asked(&self) -> usize {
        self.asked
    }
}

impl Prompt for ScriptedPrompt {
    fn show(&mut self, line: &str) {
        self.shown.push(line.to_string());
    }

    fn ask(&mut self, _question: &str) -> io::Result<Option<String>> {
        self.asked += 1;
        Ok(self.answers.pop_front())
    }
}

/// Package query returning canned output.
pub struct FixedPackageQuery {
    listing: std::result::Result<String, String>,
}

impl FixedPackageQuery {
    pub fn new(listing: &str) -> Self {
        Self {
            listing: Ok(listing.to_string()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            listing: Err(message.to_string()),
        }
    }
}

#[async_trait]
impl PackageQuery for FixedPackageQuery {
    async fn query(&self) -> Result<String> {
        self.listing
            .clone()
            .map_err(BackupError::PackageQuery)
    }
}

/// Privilege check with a fixed answer.
pub struct StaticPrivilege {
    granted: bool,
}

impl StaticPrivilege {
    pub fn granted() -> Self {
        Self { granted: true }
    }

    pub fn denied() -> Self {
        Self { granted: false }
    }
}

#[async_trait]
impl PrivilegeCheck for StaticPrivilege {
    async fn check(&self) -> Result<()> {
        if self.granted {
            Ok(())
        } else {
            Err(BackupError::InsufficientPrivilege(
                "simulated non-root user".to_string(),
            ))
        }
    }
}

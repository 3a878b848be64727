use async_trait::async_trait;
use nix::unistd::Uid;
use tokio::process::Command;
use tracing::debug;

use crate::config::PrivilegeProbe;
use crate::error::{BackupError, Result};

/// Decides whether the run has the rights to read system configuration and
/// write to the target device.
#[async_trait]
pub trait PrivilegeCheck: Send + Sync {
    async fn check(&self) -> Result<()>;
}

/// Probe backed by the real process identity.
pub struct SystemPrivilegeCheck {
    probe: PrivilegeProbe,
}

impl SystemPrivilegeCheck {
    pub fn new(probe: PrivilegeProbe) -> Self {
        Self { probe }
    }
}

#[async_trait]
impl PrivilegeCheck for SystemPrivilegeCheck {
    async fn check(&self) -> Result<()> {
        match self.probe {
            PrivilegeProbe::EffectiveUid => {
                let euid = Uid::effective();
                debug!(euid = euid.as_raw(), "Checking effective user");
                if euid.is_root() {
                    Ok(())
                } else {
                    Err(BackupError::InsufficientPrivilege(format!(
                        "running as uid {}",
                        euid
                    )))
                }
            }
            PrivilegeProbe::Sudo => {
                debug!("Probing sudo -n true");
                let status = Command::new("sudo")
                    .args(["-n", "true"])
                    .stdin(std::process::Stdio::null())
                    .stdout(std::process::Stdio::null())
                    .stderr(std::process::Stdio::null())
                    .status()
                    .await
                    .map_err(|e| {
                        BackupError::InsufficientPrivilege(format!("failed to run sudo: {}", e))
                    })?;

                if status.success() {
                    Ok(())
                } else {
                    Err(BackupError::InsufficientPrivilege(
                        "sudo requires a password or is not permitted".to_string(),
                    ))
                }
            }
        }
    }
}

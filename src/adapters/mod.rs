use crate::config::AppConfig;
use crate::core::archive::ArchiveBuilder;
use crate::core::orchestrator::Collaborators;
use crate::core::packages::{CommandPackageQuery, PackageLister};
use crate::core::privilege::SystemPrivilegeCheck;
use crate::core::selector::TerminalPrompt;

#[cfg(target_os = "linux")]
mod linux;
pub mod simulated;

#[cfg(target_os = "linux")]
pub use linux::{LinuxMounts, LsblkDeviceQuery, is_mount_point, mount_table_contains};
pub use simulated::{
    FixedPackageQuery, ScriptedPrompt, SimulatedDevices, StaticMounts, StaticPrivilege,
};

/// Collaborators backed by the live system: `lsblk`, the kernel mount
/// table, the terminal, `tar` and the configured package manager.
#[cfg(target_os = "linux")]
pub fn system(config: &AppConfig) -> Collaborators {
    Collaborators {
        privilege: Box::new(SystemPrivilegeCheck::new(config.privilege_probe)),
        devices: Box::new(LsblkDeviceQuery::default()),
        mounts: Box::new(LinuxMounts),
        prompt: Box::new(TerminalPrompt),
        packages: PackageLister::new(Box::new(CommandPackageQuery::new(
            config.packages.command.clone(),
        ))),
        archiver: ArchiveBuilder::default(),
    }
}

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/usb-backup/config.toml";
const ENV_PREFIX: &str = "USB_BACKUP_";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub privilege_probe: PrivilegeProbe,
    pub verbose: bool,
    pub json_logs: bool,
    pub file_logging: bool,
    pub log_file: PathBuf,
    /// Written under the selected mount point instead of its root when set.
    pub destination_subdir: Option<PathBuf>,
    pub devices: DeviceConfig,
    pub archives: Vec<ArchiveJobConfig>,
    pub config_copy: CopyJobConfig,
    pub packages: PackageConfig,
}

/// How the privilege check decides whether the run may proceed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum PrivilegeProbe {
    /// The effective user is root.
    EffectiveUid,
    /// `sudo -n true` succeeds without asking for a password.
    Sudo,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeviceConfig {
    /// Kernel name prefixes treated as removable storage.
    pub name_prefixes: Vec<String>,
    /// When non-empty, a candidate's mount point must start with one of these.
    pub mount_prefixes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArchiveJobConfig {
    pub label: String,
    /// Paths to archive. A leading `~` is the invoking user's home.
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CopyJobConfig {
    pub enabled: bool,
    pub source: String,
    /// Directory name created under the destination.
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PackageConfig {
    pub enabled: bool,
    pub command: Vec<String>,
    pub label: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            privilege_probe: PrivilegeProbe::EffectiveUid,
            verbose: false,
            json_logs: false,
            file_logging: true,
            log_file: PathBuf::from("usb-backup.log"),
            destination_subdir: None,
            devices: DeviceConfig::default(),
            archives: vec![
                ArchiveJobConfig {
                    label: "system_preferences".to_string(),
                    sources: vec![
                        "/etc".to_string(),
                        "/usr/share".to_string(),
                        "~/.config".to_string(),
                        "~/.local/share".to_string(),
                        "/var/lib".to_string(),
                    ],
                },
                ArchiveJobConfig {
                    label: "user_backup".to_string(),
                    sources: vec!["~".to_string()],
                },
            ],
            config_copy: CopyJobConfig::default(),
            packages: PackageConfig::default(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name_prefixes: vec!["sd".to_string()],
            mount_prefixes: Vec::new(),
        }
    }
}

impl Default for CopyJobConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            source: "~/.config".to_string(),
            name: "kde_config".to_string(),
        }
    }
}

impl Default for PackageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: vec![
                "dnf".to_string(),
                "repoquery".to_string(),
                "--userinstalled".to_string(),
            ],
            label: "installed_packages".to_string(),
        }
    }
}

impl AppConfig {
    /// Layer defaults, the TOML file, `USB_BACKUP_*` environment variables
    /// and finally any CLI overrides.
    ///
    /// An explicitly requested config file must exist; the default location
    /// is optional.
    pub fn new<T: Serialize>(config_path: Option<&Path>, cli_args: Option<&T>) -> Result<Self> {
        let path = match config_path {
            Some(path) => {
                if !path.exists() {
                    bail!("Config file not found: {}", path.display());
                }
                path.to_path_buf()
            }
            None => PathBuf::from(DEFAULT_CONFIG_PATH),
        };

        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            figment = figment.merge(Toml::string(&contents));
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        if let Some(args) = cli_args {
            figment = figment.merge(Serialized::defaults(args));
        }

        let config: AppConfig = figment
            .extract()
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }

    fn validate(&self) -> Result<()> {
        for job in &self.archives {
            if job.label.trim().is_empty() {
                bail!("Archive job labels must not be empty");
            }
        }
        if self.packages.enabled && self.packages.command.is_empty() {
            bail!("packages.command must name the package query program");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[derive(Serialize)]
    struct Overrides {
        verbose: Option<bool>,
    }

    #[test]
    fn defaults_cover_both_archive_jobs() {
        let config = AppConfig::default();
        let labels: Vec<_> = config.archives.iter().map(|j| j.label.as_str()).collect();
        assert_eq!(labels, ["system_preferences", "user_backup"]);
        assert_eq!(config.devices.name_prefixes, ["sd"]);
        assert!(!config.config_copy.enabled);
    }

    #[test]
    fn file_overrides_defaults() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
privilege_probe = "sudo"
destination_subdir = "backups"

[devices]
mount_prefixes = ["/media/"]

[[archives]]
label = "dotfiles"
sources = ["~/.config"]
"#,
        )
        .unwrap();

        let config = AppConfig::new(Some(&path), None::<&Overrides>).unwrap();
        assert_eq!(config.privilege_probe, PrivilegeProbe::Sudo);
        assert_eq!(config.destination_subdir, Some(PathBuf::from("backups")));
        assert_eq!(config.devices.mount_prefixes, ["/media/"]);
        assert_eq!(config.devices.name_prefixes, ["sd"]);
        assert_eq!(config.archives.len(), 1);
        assert_eq!(config.archives[0].label, "dotfiles");
    }

    #[test]
    fn cli_overrides_file() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "verbose = false\n").unwrap();

        let args = Overrides {
            verbose: Some(true),
        };
        let config = AppConfig::new(Some(&path), Some(&args)).unwrap();
        assert!(config.verbose);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let result = AppConfig::new(
            Some(Path::new("/nonexistent/usb-backup.toml")),
            None::<&Overrides>,
        );
        assert!(result.is_err());
    }

    #[test]
    fn empty_label_is_rejected() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[[archives]]\nlabel = \" \"\nsources = [\"/etc\"]\n").unwrap();

        let result = AppConfig::new(Some(&path), None::<&Overrides>);
        assert!(result.is_err());
    }

    #[test]
    fn effective_config_renders_as_toml() {
        let rendered = AppConfig::default().to_toml().unwrap();
        assert!(rendered.contains("privilege_probe = \"effective-uid\""));
        assert!(rendered.contains("system_preferences"));
    }
}

//! End-to-end runs of the orchestrator against simulated collaborators.
//!
//! Archive jobs shell out to `tar`; tests that need it skip when it is missing.

use std::path::{Path, PathBuf};
use std::process::Command;

use nix::unistd::{Gid, Uid};
use tempfile::{TempDir, tempdir};
use usb_backup::adapters::{
    FixedPackageQuery, ScriptedPrompt, SimulatedDevices, StaticMounts, StaticPrivilege,
};
use usb_backup::config::{AppConfig, ArchiveJobConfig};
use usb_backup::context::AppContext;
use usb_backup::core::{
    ArchiveBuilder, Collaborators, InvokingUser, JobStatus, Orchestrator, PackageLister,
    RunOutcome, UsbCandidate,
};
use usb_backup::logging::LogHandle;

fn has_tar() -> bool {
    Command::new("tar").arg("--version").output().is_ok()
}

struct Fixture {
    _temp: TempDir,
    home: PathBuf,
    usb: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let temp = tempdir().unwrap();
        let home = temp.path().join("home").join("alex");
        let usb = temp.path().join("media").join("usb0");

        std::fs::create_dir_all(home.join(".config/plasma")).unwrap();
        std::fs::write(home.join(".config/kdeglobals"), b"[General]\n").unwrap();
        std::fs::write(home.join(".config/plasma/panel.rc"), b"panel=1\n").unwrap();
        std::fs::write(home.join("notes.txt"), b"remember the milk\n").unwrap();
        std::fs::create_dir_all(&usb).unwrap();

        Self {
            _temp: temp,
            home,
            usb,
        }
    }

    fn user(&self) -> InvokingUser {
        InvokingUser {
            name: "alex".to_string(),
            group: "alex".to_string(),
            home: self.home.clone(),
            uid: Uid::current(),
            gid: Gid::current(),
        }
    }

    fn candidate(&self) -> UsbCandidate {
        UsbCandidate {
            name: "sdb1".to_string(),
            mount_point: Some(self.usb.clone()),
            label: Some("DATA".to_string()),
        }
    }

    fn config(&self) -> AppConfig {
        AppConfig {
            file_logging: false,
            archives: vec![
                ArchiveJobConfig {
                    label: "system_preferences".to_string(),
                    sources: vec![
                        "~/.config".to_string(),
                        "/etc/doesnotexist".to_string(),
                    ],
                },
                ArchiveJobConfig {
                    label: "user_backup".to_string(),
                    sources: vec!["~".to_string()],
                },
            ],
            ..AppConfig::default()
        }
    }

    fn context(&self, config: AppConfig) -> AppContext {
        AppContext::new(config, LogHandle::disabled()).with_user(self.user())
    }

    fn artifacts(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(&self.usb)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}

fn parts(
    privilege: StaticPrivilege,
    devices: SimulatedDevices,
    answers: &[&str],
    packages: FixedPackageQuery,
) -> Collaborators {
    Collaborators {
        privilege: Box::new(privilege),
        devices: Box::new(devices),
        mounts: Box::new(StaticMounts::all()),
        prompt: Box::new(ScriptedPrompt::new(answers.iter().copied())),
        packages: PackageLister::new(Box::new(packages)),
        archiver: ArchiveBuilder::default(),
    }
}

fn list_archive(path: &Path) -> Vec<String> {
    let output = Command::new("tar").arg("-tzf").arg(path).output().unwrap();
    assert!(output.status.success(), "archive should be readable");
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::to_string)
        .collect()
}

#[tokio::test]
async fn test_full_run_attempts_every_job() {
    if !has_tar() {
        eprintln!("Skipping: tar not available");
        return;
    }

    let fx = Fixture::new();
    let parts = parts(
        StaticPrivilege::granted(),
        SimulatedDevices::new(vec![fx.candidate()]),
        &["1"],
        FixedPackageQuery::new("foo-1.2.3.x86_64\nbar-4.5.x86_64\n"),
    );

    let outcome = Orchestrator::new(fx.context(fx.config()), parts).run().await;

    let summary = match outcome {
        RunOutcome::Completed(summary) => summary,
        other => panic!("expected a completed run, got {:?}", other),
    };

    assert_eq!(summary.target.mount_point(), fx.usb.as_path());
    assert_eq!(summary.jobs.len(), 3);
    assert_eq!(summary.failed_count(), 0, "{}", summary);

    let prefs = match &summary.job("system_preferences").unwrap().status {
        JobStatus::Completed(path) => path.clone(),
        other => panic!("system_preferences: {:?}", other),
    };
    let members = list_archive(&prefs);
    assert!(members.iter().any(|m| m.starts_with(".config/")));
    assert!(members.iter().all(|m| !m.starts_with('/')));
    assert!(members.iter().all(|m| !m.contains("doesnotexist")));

    let home = match &summary.job("user_backup").unwrap().status {
        JobStatus::Completed(path) => path.clone(),
        other => panic!("user_backup: {:?}", other),
    };
    let members = list_archive(&home);
    assert!(members.iter().any(|m| m == "alex/notes.txt"));

    let packages = match &summary.job("installed_packages").unwrap().status {
        JobStatus::Completed(path) => path.clone(),
        other => panic!("installed_packages: {:?}", other),
    };
    assert_eq!(std::fs::read_to_string(packages).unwrap(), "bar\nfoo\n");

    let artifacts = fx.artifacts();
    assert_eq!(artifacts.len(), 3);
    assert!(artifacts.iter().any(|a| a.starts_with("system_preferences_") && a.ends_with(".tar.gz")));
    assert!(artifacts.iter().any(|a| a.starts_with("user_backup_") && a.ends_with(".tar.gz")));
    assert!(artifacts.iter().any(|a| a.starts_with("installed_packages_") && a.ends_with(".txt")));
}

#[tokio::test]
async fn test_no_privilege_touches_nothing() {
    let fx = Fixture::new();
    let parts = parts(
        StaticPrivilege::denied(),
        SimulatedDevices::new(vec![fx.candidate()]),
        &["1"],
        FixedPackageQuery::new("foo-1.2.3.x86_64\n"),
    );

    let outcome = Orchestrator::new(fx.context(fx.config()), parts).run().await;

    assert_eq!(outcome, RunOutcome::NoPrivilege);
    assert!(fx.artifacts().is_empty());
}

#[tokio::test]
async fn test_no_mounted_devices_exits_cleanly() {
    let fx = Fixture::new();
    let unmounted = UsbCandidate {
        name: "sdb1".to_string(),
        mount_point: None,
        label: Some("DATA".to_string()),
    };
    let parts = parts(
        StaticPrivilege::granted(),
        SimulatedDevices::new(vec![unmounted]),
        &["1"],
        FixedPackageQuery::new(""),
    );

    let outcome = Orchestrator::new(fx.context(fx.config()), parts).run().await;

    assert_eq!(outcome, RunOutcome::NoDevice);
    assert!(fx.artifacts().is_empty());
}

#[tokio::test]
async fn test_device_query_failure_exits_cleanly() {
    let fx = Fixture::new();
    let parts = parts(
        StaticPrivilege::granted(),
        SimulatedDevices::failing("lsblk: command not found"),
        &["1"],
        FixedPackageQuery::new(""),
    );

    let outcome = Orchestrator::new(fx.context(fx.config()), parts).run().await;

    assert_eq!(outcome, RunOutcome::NoDevice);
}

#[tokio::test]
async fn test_closed_input_cancels_backup() {
    let fx = Fixture::new();
    let parts = parts(
        StaticPrivilege::granted(),
        SimulatedDevices::new(vec![fx.candidate()]),
        &["nine", "9"],
        FixedPackageQuery::new(""),
    );

    let outcome = Orchestrator::new(fx.context(fx.config()), parts).run().await;

    assert_eq!(outcome, RunOutcome::NoDevice);
    assert!(fx.artifacts().is_empty());
}

#[tokio::test]
async fn test_failed_job_does_not_stop_the_others() {
    let fx = Fixture::new();
    let mut config = fx.config();
    config.archives.clear();
    config.config_copy.enabled = true;
    config.destination_subdir = Some(PathBuf::from("backups"));

    let parts = parts(
        StaticPrivilege::granted(),
        SimulatedDevices::new(vec![fx.candidate()]),
        &["1"],
        FixedPackageQuery::failing("dnf: command not found"),
    );

    let outcome = Orchestrator::new(fx.context(config), parts).run().await;

    let summary = match outcome {
        RunOutcome::Completed(summary) => summary,
        other => panic!("expected a completed run, got {:?}", other),
    };

    assert_eq!(summary.destination, fx.usb.join("backups"));
    assert_eq!(summary.jobs.len(), 2);
    assert_eq!(summary.failed_count(), 1);
    assert!(summary.job("installed_packages").unwrap().is_failed());

    let copied = fx.usb.join("backups").join("kde_config");
    assert_eq!(
        summary.job("config_copy").unwrap().status,
        JobStatus::Completed(copied.clone())
    );
    assert_eq!(
        std::fs::read_to_string(copied.join("plasma/panel.rc")).unwrap(),
        "panel=1\n"
    );
}

#[tokio::test]
async fn test_all_sources_missing_is_skipped() {
    let fx = Fixture::new();
    let mut config = fx.config();
    config.archives = vec![ArchiveJobConfig {
        label: "system_preferences".to_string(),
        sources: vec!["~/.nothing-here".to_string()],
    }];
    config.packages.enabled = false;

    let parts = parts(
        StaticPrivilege::granted(),
        SimulatedDevices::new(vec![fx.candidate()]),
        &["1"],
        FixedPackageQuery::new(""),
    );

    let outcome = Orchestrator::new(fx.context(config), parts).run().await;

    let summary = match outcome {
        RunOutcome::Completed(summary) => summary,
        other => panic!("expected a completed run, got {:?}", other),
    };
    assert!(matches!(
        summary.job("system_preferences").unwrap().status,
        JobStatus::Skipped(_)
    ));
    assert!(fx.artifacts().is_empty());
}

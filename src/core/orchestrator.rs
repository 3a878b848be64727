use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use crate::config::ArchiveJobConfig;
use crate::context::AppContext;
use crate::core::archive::{ArchiveBuilder, ArchiveOutcome, unique_destination};
use crate::core::copier::DirectoryCopier;
use crate::core::hardware::{DeviceFilter, DeviceQuery, MountCheck};
use crate::core::models::{CopyJob, JobReport, JobStatus, RunOutcome, RunSummary, UsbCandidate};
use crate::core::ownership::InvokingUser;
use crate::core::packages::{PackageLister, write_package_list};
use crate::core::privilege::PrivilegeCheck;
use crate::core::selector::{Prompt, Selection, select_device};
use crate::error::BackupError;

pub const CONFIG_COPY_JOB: &str = "config_copy";

/// The system-facing pieces of a run. Swapped for simulated ones in tests.
pub struct Collaborators {
    pub privilege: Box<dyn PrivilegeCheck>,
    pub devices: Box<dyn DeviceQuery>,
    pub mounts: Box<dyn MountCheck>,
    pub prompt: Box<dyn Prompt>,
    pub packages: PackageLister,
    pub archiver: ArchiveBuilder,
}

pub struct Orchestrator {
    ctx: AppContext,
    parts: Collaborators,
}

impl Orchestrator {
    pub fn new(ctx: AppContext, parts: Collaborators) -> Self {
        Self { ctx, parts }
    }

    /// Run one backup from privilege check to summary.
    ///
    /// Only a failed privilege check or the absence of a usable drive stop the
    /// run early; every job is attempted independently of the others.
    pub async fn run(&mut self) -> RunOutcome {
        let _log = self.ctx.log.enter();
        let span = info_span!("backup_run", run_id = %Uuid::now_v7());

        self.run_steps().instrument(span).await
    }

    async fn run_steps(&mut self) -> RunOutcome {
        if let Err(e) = self.parts.privilege.check().await {
            error!(error = %e, "Privilege check failed");
            self.parts
                .prompt
                .show("This program must be run as root or with sudo privileges.");
            return RunOutcome::NoPrivilege;
        }
        info!("Privilege check passed");

        let candidates = self.enumerate_devices().await;

        let target = match select_device(
            &candidates,
            self.parts.prompt.as_mut(),
            self.parts.mounts.as_ref(),
        ) {
            Ok(Selection::Selected(target)) => target,
            Ok(Selection::NoSelection) => {
                warn!("Backup cancelled, no valid USB drive selected");
                self.parts
                    .prompt
                    .show("Backup operation cancelled or no valid USB drive selected.");
                return RunOutcome::NoDevice;
            }
            Err(e) => {
                error!(
                    error = %BackupError::Selection(e.to_string()),
                    "Could not read drive selection"
                );
                return RunOutcome::NoDevice;
            }
        };

        let destination = match &self.ctx.config.destination_subdir {
            Some(subdir) => target.mount_point().join(subdir),
            None => target.mount_point().to_path_buf(),
        };

        let user = self.ctx.resolve_user();
        let jobs = match std::fs::create_dir_all(&destination) {
            Ok(()) => {
                info!(destination = %destination.display(), "Backup destination ready");
                self.parts.prompt.show("\nStarting backup operations:");
                self.run_jobs(&destination, user.as_ref()).await
            }
            Err(e) => {
                let e = BackupError::write(&destination, e);
                error!(error = %e, "Failed to prepare backup destination");
                self.job_names()
                    .into_iter()
                    .map(|name| JobReport::failed(&name, &e))
                    .collect()
            }
        };

        let summary = RunSummary {
            target,
            destination,
            jobs,
        };
        info!(
            jobs = summary.jobs.len(),
            failed = summary.failed_count(),
            "Backup run finished"
        );

        RunOutcome::Completed(summary)
    }

    /// A failed query is logged and treated as "no drives".
    async fn enumerate_devices(&self) -> Vec<UsbCandidate> {
        let filter = DeviceFilter::from(&self.ctx.config.devices);
        match self.parts.devices.list_candidates(&filter).await {
            Ok(candidates) => {
                info!(count = candidates.len(), "USB drive candidates found");
                candidates
            }
            Err(e) => {
                error!(error = %e, "Error listing USB drives");
                Vec::new()
            }
        }
    }

    fn job_names(&self) -> Vec<String> {
        let config = &self.ctx.config;
        let mut names: Vec<String> = config.archives.iter().map(|j| j.label.clone()).collect();
        if config.config_copy.enabled {
            names.push(CONFIG_COPY_JOB.to_string());
        }
        if config.packages.enabled {
            names.push(config.packages.label.clone());
        }
        names
    }

    async fn run_jobs(&mut self, destination: &Path, user: Option<&InvokingUser>) -> Vec<JobReport> {
        let config = self.ctx.config.clone();
        let mut reports = Vec::new();

        for job in &config.archives {
            self.parts
                .prompt
                .show(&format!("Backing up {}...", job.label));
            reports.push(self.run_archive_job(job, destination, user).await);
        }

        if config.config_copy.enabled {
            self.parts.prompt.show("Copying configuration directory...");
            let copy = CopyJob {
                source: expand_source(&config.config_copy.source, user),
                destination: destination.join(&config.config_copy.name),
            };
            reports.push(self.run_copy_job(&copy, user).await);
        }

        if config.packages.enabled {
            self.parts.prompt.show("Recording installed packages...");
            reports.push(
                self.run_package_job(&config.packages.label, destination, user)
                    .await,
            );
        }

        for report in &reports {
            let line = match &report.status {
                JobStatus::Completed(path) => format!("{} saved to {}", report.name, path.display()),
                JobStatus::Skipped(reason) => format!("{} skipped: {}", report.name, reason),
                JobStatus::Failed(error) => format!("Error in {}: {}", report.name, error),
            };
            self.parts.prompt.show(&line);
        }

        reports
    }

    async fn run_archive_job(
        &self,
        job: &ArchiveJobConfig,
        destination: &Path,
        user: Option<&InvokingUser>,
    ) -> JobReport {
        let sources = job
            .sources
            .iter()
            .map(|raw| expand_source(raw, user))
            .collect();
        let plan = self
            .parts
            .archiver
            .plan(&job.label, sources, destination, &Local::now());

        match self.parts.archiver.run(&plan).await {
            Ok(ArchiveOutcome::Written(result)) => {
                if let Some(user) = user {
                    user.take_ownership(&result.path);
                }
                JobReport::completed(&job.label, result.path)
            }
            Ok(ArchiveOutcome::NoSources { .. }) => {
                JobReport::skipped(&job.label, "none of the configured sources exist")
            }
            Err(e) => {
                error!(job = %job.label, error = %e, "Archive job failed");
                JobReport::failed(&job.label, e)
            }
        }
    }

    async fn run_copy_job(&self, job: &CopyJob, user: Option<&InvokingUser>) -> JobReport {
        match DirectoryCopier::default().copy(job).await {
            Ok(_) => {
                if let Some(user) = user {
                    user.take_ownership(&job.destination);
                }
                JobReport::completed(CONFIG_COPY_JOB, job.destination.clone())
            }
            Err(BackupError::SourceMissing(path)) => {
                warn!(source = %path.display(), "Configuration directory missing, skipping copy");
                JobReport::skipped(
                    CONFIG_COPY_JOB,
                    format!("{} does not exist", path.display()),
                )
            }
            Err(e) => {
                error!(job = CONFIG_COPY_JOB, error = %e, "Copy job failed");
                JobReport::failed(CONFIG_COPY_JOB, e)
            }
        }
    }

    async fn run_package_job(
        &self,
        label: &str,
        destination: &Path,
        user: Option<&InvokingUser>,
    ) -> JobReport {
        let packages = match self.parts.packages.list().await {
            Ok(packages) => packages,
            Err(e) => {
                error!(job = %label, error = %e, "Failed to list user-installed packages");
                return JobReport::failed(label, e);
            }
        };

        let path = unique_destination(destination, label, "txt", &Local::now());
        match write_package_list(&packages, &path) {
            Ok(path) => {
                if let Some(user) = user {
                    user.take_ownership(&path);
                }
                JobReport::completed(label, path)
            }
            Err(e) => {
                error!(job = %label, error = %e, "Failed to write package list");
                JobReport::failed(label, e)
            }
        }
    }
}

/// Expand `~` against the invoking user, or the process home when unknown.
fn expand_source(raw: &str, user: Option<&InvokingUser>) -> PathBuf {
    match user {
        Some(user) => user.expand(raw),
        None => PathBuf::from(shellexpand::tilde(raw).as_ref()),
    }
}

pub mod archive;
pub mod copier;
pub mod hardware;
pub mod models;
pub mod orchestrator;
pub mod ownership;
pub mod packages;
pub mod privilege;
pub mod selector;

pub use archive::{ArchiveBuilder, ArchiveOutcome, ArchiveResult};
pub use copier::{CopyResult, DirectoryCopier};
pub use hardware::{DeviceFilter, DeviceQuery, MountCheck};
pub use models::{
    ArchiveJob, BackupTarget, CopyJob, JobReport, JobStatus, PackageList, RunOutcome, RunSummary,
    UsbCandidate,
};
pub use orchestrator::{Collaborators, Orchestrator};
pub use ownership::{InvokingUser, invoking_user};
pub use packages::{PackageLister, PackageQuery};
pub use privilege::PrivilegeCheck;
pub use selector::{Prompt, Selection, TerminalPrompt, select_device};

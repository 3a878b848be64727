use nix::unistd::{Gid, Group, Uid, User, chown};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// The human account a backup is taken for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokingUser {
    pub name: String,
    pub group: String,
    pub home: PathBuf,
    pub uid: Uid,
    pub gid: Gid,
}

impl InvokingUser {
    /// Expand a configured source path. A leading `~` is this user's home,
    /// not root's.
    pub fn expand(&self, raw: &str) -> PathBuf {
        let home = self.home.to_string_lossy().into_owned();
        let expanded = shellexpand::tilde_with_context(raw, || Some(home.as_str()));
        PathBuf::from(expanded.as_ref())
    }

    /// Hand a written artifact back to this user.
    ///
    /// Best effort: filesystems such as vfat do not record ownership.
    pub fn take_ownership(&self, path: &Path) {
        if let Err(e) = chown(path, Some(self.uid), Some(self.gid)) {
            debug!(
                path = %path.display(),
                user = %self.name,
                error = %e,
                "Failed to set artifact ownership"
            );
        }
    }
}

/// Determine who the backup is for.
///
/// Detection order:
/// 1. `SUDO_USER` environment variable - the user who invoked sudo
/// 2. The real user of this process
///
/// Returns None if neither can be resolved through the user database.
pub fn invoking_user() -> Option<InvokingUser> {
    if let Some(user) = from_sudo_user() {
        debug!(user = %user.name, home = %user.home.display(), "Detected invoking user from SUDO_USER");
        return Some(user);
    }

    match User::from_uid(Uid::current()) {
        Ok(Some(user)) => from_passwd(user),
        _ => {
            warn!("Could not determine invoking user");
            None
        }
    }
}

fn from_sudo_user() -> Option<InvokingUser> {
    let sudo_user = std::env::var("SUDO_USER").ok()?;

    if sudo_user.is_empty() {
        return None;
    }

    let user = User::from_name(&sudo_user).ok()??;
    from_passwd(user)
}

fn from_passwd(user: User) -> Option<InvokingUser> {
    let group = Group::from_gid(user.gid).ok()??;

    Some(InvokingUser {
        name: user.name,
        group: group.name,
        home: user.dir,
        uid: user.uid,
        gid: user.gid,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alex() -> InvokingUser {
        InvokingUser {
            name: "alex".to_string(),
            group: "alex".to_string(),
            home: PathBuf::from("/home/alex"),
            uid: Uid::from_raw(1000),
            gid: Gid::from_raw(1000),
        }
    }

    #[test]
    fn expands_tilde_to_invoking_home() {
        let user = alex();
        assert_eq!(user.expand("~"), PathBuf::from("/home/alex"));
        assert_eq!(user.expand("~/.config"), PathBuf::from("/home/alex/.config"));
        assert_eq!(user.expand("/etc"), PathBuf::from("/etc"));
    }

    #[test]
    fn current_process_user_resolves() {
        // The test runner's own account is always in the user database.
        let user = match User::from_uid(Uid::current()) {
            Ok(Some(user)) => from_passwd(user),
            _ => None,
        };
        assert!(user.is_some());
    }
}

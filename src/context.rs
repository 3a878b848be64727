use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::ownership::{InvokingUser, invoking_user};
use crate::logging::LogHandle;

/// Everything one backup run needs besides its system collaborators.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub log: LogHandle,
    /// Owner of `~` paths and of the written artifacts. Detected from
    /// `SUDO_USER` at run time unless set explicitly.
    user: Option<InvokingUser>,
}

impl AppContext {
    pub fn new(config: AppConfig, log: LogHandle) -> Self {
        Self {
            config: Arc::new(config),
            log,
            user: None,
        }
    }

    pub fn with_user(mut self, user: InvokingUser) -> Self {
        self.user = Some(user);
        self
    }

    pub fn resolve_user(&self) -> Option<InvokingUser> {
        self.user.clone().or_else(invoking_user)
    }
}

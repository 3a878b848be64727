//! Back up a Linux desktop's configuration, home directory and installed
//! package list to a USB drive chosen interactively.

pub mod adapters;
pub mod config;
pub mod context;
pub mod core;
pub mod error;
pub mod logging;

pub use error::{BackupError, Result};

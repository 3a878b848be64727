use std::io::{self, BufRead, Write};

use tracing::{debug, info, warn};

use crate::core::hardware::MountCheck;
use crate::core::models::{BackupTarget, UsbCandidate};

pub const SELECT_PROMPT: &str = "Select a drive by number: ";

/// Interactive line input.
pub trait Prompt {
    /// Print an informational line to the user.
    fn show(&mut self, line: &str);

    /// Ask a question and read one line. `Ok(None)` means input is closed.
    fn ask(&mut self, question: &str) -> io::Result<Option<String>>;
}

/// Prompt bound to the process's stdin/stdout.
#[derive(Default)]
pub struct TerminalPrompt;

impl Prompt for TerminalPrompt {
    fn show(&mut self, line: &str) {
        println!("{}", line);
    }

    fn ask(&mut self, question: &str) -> io::Result<Option<String>> {
        let mut stdout = io::stdout();
        write!(stdout, "{}", question)?;
        stdout.flush()?;

        let mut input = String::new();
        let read = io::stdin().lock().read_line(&mut input)?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(input))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Selected(BackupTarget),
    /// Nothing to pick from, or the user closed input.
    NoSelection,
}

/// Let the user pick a candidate by its 1-based number.
///
/// Non-numeric and out-of-range answers re-prompt, as does a drive that is no
/// longer mounted by the time it is picked.
pub fn select_device(
    candidates: &[UsbCandidate],
    prompt: &mut dyn Prompt,
    mounts: &dyn MountCheck,
) -> io::Result<Selection> {
    if candidates.is_empty() {
        warn!("No USB drives available to select");
        prompt.show("No USB drives available to select.");
        return Ok(Selection::NoSelection);
    }

    prompt.show("Available USB drives:");
    for (idx, candidate) in candidates.iter().enumerate() {
        prompt.show(&format!("{}. {}", idx + 1, candidate));
    }

    loop {
        let Some(answer) = prompt.ask(SELECT_PROMPT)? else {
            warn!("Input closed before a drive was selected");
            return Ok(Selection::NoSelection);
        };

        let choice = match answer.trim().parse::<usize>() {
            Ok(n) => n,
            Err(_) => {
                debug!(input = %answer.trim(), "Non-numeric drive selection");
                prompt.show("Please enter a valid number.");
                continue;
            }
        };

        if choice == 0 || choice > candidates.len() {
            debug!(choice, available = candidates.len(), "Drive selection out of range");
            prompt.show("Invalid selection. Please try again.");
            continue;
        }

        let candidate = &candidates[choice - 1];
        let Some(mount_point) = candidate.mount_point.as_deref() else {
            prompt.show("Selected drive is not mounted. Please try another.");
            continue;
        };

        if !mounts.is_mounted(mount_point) {
            warn!(
                device = %candidate.name,
                mount_point = %mount_point.display(),
                "Selected drive is no longer mounted"
            );
            prompt.show("Selected drive is not mounted. Please try another.");
            continue;
        }

        info!(
            device = %candidate.name,
            mount_point = %mount_point.display(),
            "Drive selected"
        );
        prompt.show(&format!("Drive selected: {}", mount_point.display()));
        return Ok(Selection::Selected(BackupTarget::new(
            mount_point,
            candidate.name.clone(),
        )));
    }
}

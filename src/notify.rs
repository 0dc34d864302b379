//! Best-effort side channel for operator alerts. Never affects the run.

use crate::util::shell_command;
use anyhow::{bail, Context, Result};
use tracing::debug;

pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str) -> Result<()>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _message: &str) -> Result<()> {
        Ok(())
    }
}

/// Runs an operator-supplied command with the message in `ANNOTL_MESSAGE`.
#[derive(Clone, Debug)]
pub struct CommandNotifier {
    command: String,
}

impl CommandNotifier {
    pub fn new(command: impl Into<String>) -> Self {
        Self { command: command.into() }
    }
}

impl Notifier for CommandNotifier {
    fn notify(&self, message: &str) -> Result<()> {
        let status = shell_command(&self.command)
            .env("ANNOTL_MESSAGE", message)
            .status()
            .with_context(|| format!("spawn notifier `{}`", self.command))?;
        if !status.success() {
            bail!("notifier `{}` exited with {status}", self.command);
        }
        Ok(())
    }
}

/// Deliver if possible; failures only show up at debug level.
pub fn best_effort(notifier: Option<&dyn Notifier>, message: &str) {
    if let Some(n) = notifier {
        if let Err(e) = n.notify(message) {
            debug!("notification dropped: {e:#}");
        }
    }
}

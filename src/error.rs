use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    /// Invalid task graph. Always raised before any agent runs.
    #[error(
        "Configuration error in task '{task}'{}: {reason}",
        channel_suffix(.channel)
    )]
    Configuration {
        task: String,
        channel: Option<String>,
        reason: String,
    },

    /// A task stayed unready past its readiness deadline.
    #[error("Task '{task}' starved in cycle {cycle}: no value for {missing:?} after {waited:?}")]
    TaskStarved {
        task: String,
        cycle: u64,
        waited: Duration,
        missing: Vec<String>,
    },

    /// An invoked callable failed. `inputs` is a JSON snapshot of what it was given.
    #[error("Task '{task}' failed in cycle {cycle}: {message} (inputs: {inputs})")]
    TaskExecution {
        task: String,
        cycle: u64,
        message: String,
        inputs: String,
    },

    /// A continuous worker did not exit within the shutdown timeout.
    #[error("Worker for task '{task}' did not exit within {timeout:?}")]
    ShutdownTimeout { task: String, timeout: Duration },

    #[error("Agent '{agent}' failed during '{capability}': {message}")]
    Agent {
        agent: String,
        capability: String,
        message: String,
    },

    #[error("Agent '{agent}' has no capability '{capability}'")]
    UnknownCapability { agent: String, capability: String },

    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    #[error("Invalid phase transition from {from} to {to}")]
    InvalidPhaseTransition { from: String, to: String },

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Task join error: {0}")]
    TaskJoin(String),
}

impl Error {
    pub(crate) fn config(task: &str, channel: Option<&str>, reason: impl Into<String>) -> Self {
        Error::Configuration {
            task: task.to_string(),
            channel: channel.map(str::to_string),
            reason: reason.into(),
        }
    }

    /// Build an agent failure, for use inside `Agent::invoke` implementations.
    pub fn agent(agent: &str, capability: &str, message: impl Into<String>) -> Self {
        Error::Agent {
            agent: agent.to_string(),
            capability: capability.to_string(),
            message: message.into(),
        }
    }

    /// Name of the task this error is about, when it has one.
    pub fn task(&self) -> Option<&str> {
        match self {
            Error::Configuration { task, .. }
            | Error::TaskStarved { task, .. }
            | Error::TaskExecution { task, .. }
            | Error::ShutdownTimeout { task, .. } => Some(task),
            _ => None,
        }
    }
}

fn channel_suffix(channel: &Option<String>) -> String {
    channel
        .as_ref()
        .map(|c| format!(" (channel '{}')", c))
        .unwrap_or_default()
}

pub type Result<T> = std::result::Result<T, Error>;

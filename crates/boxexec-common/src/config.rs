//! Execution configuration model.
//!
//! One [`Config`] describes a single command run: the container to create,
//! the task to execute inside it, and the identity used to label it.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BoxexecError, Result};
use crate::types::{CommandDetails, Mount};

/// Container runtime a configuration targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    /// containerd, with containers created through `nerdctl`.
    #[default]
    Containerd,
    /// Docker engine.
    Docker,
}

impl FromStr for RuntimeKind {
    type Err = BoxexecError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "containerd" => Ok(Self::Containerd),
            "docker" => Ok(Self::Docker),
            other => Err(BoxexecError::Config {
                message: format!("unsupported runtime: {other:?}"),
            }),
        }
    }
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Containerd => write!(f, "containerd"),
            Self::Docker => write!(f, "docker"),
        }
    }
}

/// Root configuration for one command execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Runtime the command should run on.
    pub runtime: RuntimeKind,
    /// Runtime namespace; required by containerd.
    pub namespace: Option<String>,
    /// Container image, user, environment, and mounts.
    pub container: ContainerConfig,
    /// DNS settings applied by runtimes that support them.
    pub network: NetworkConfig,
    /// Executable, arguments, timeout, and working directory.
    pub task: TaskConfig,
    /// Identity of the command, used for naming and labels.
    pub command: CommandDetails,
}

impl Config {
    /// Loads a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid JSON.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| BoxexecError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Returns the executable followed by its arguments.
    #[must_use]
    pub fn command_line(&self) -> Vec<String> {
        std::iter::once(self.task.executable.clone())
            .chain(self.task.args.iter().cloned())
            .collect()
    }
}

/// Container-level settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Image reference.
    pub image: String,
    /// User (numeric uid or name) the process runs as.
    pub user: String,
    /// Environment variables in `KEY=VALUE` form.
    pub env: Vec<String>,
    /// Mounts attached to the container.
    pub mounts: Vec<Mount>,
}

/// Task-level settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    /// Executable path inside the container.
    pub executable: String,
    /// Arguments passed to the executable.
    pub args: Vec<String>,
    /// Command timeout in seconds.
    pub timeout_secs: u64,
    /// Working directory inside the container.
    pub working_dir: String,
}

impl TaskConfig {
    /// Returns the command timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// DNS settings for the container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// DNS servers.
    pub dns: Vec<String>,
    /// DNS search domains.
    pub dns_search: Vec<String>,
    /// DNS resolver options.
    pub dns_options: Vec<String>,
}

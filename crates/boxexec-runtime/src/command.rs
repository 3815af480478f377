//! Execution handle: one command bound to one backend lifecycle.

use std::sync::Arc;

use boxexec_common::config::Config;
use boxexec_common::error::Result;
use boxexec_common::types::ContainerId;

use crate::backend::{Backend, RuntimeClient};
use crate::lifecycle::{ExitOutcome, Execution};
use crate::stdio::TaskIo;
use crate::trace::{self, Tracer};

/// A command to run in a fresh container.
///
/// ```no_run
/// # use std::sync::Arc;
/// # use boxexec_common::config::{Config, RuntimeKind};
/// # use boxexec_runtime::backend::RuntimeClient;
/// # use boxexec_runtime::backend::docker::DockerCli;
/// # use boxexec_runtime::command::Command;
/// # use boxexec_runtime::stdio::TaskIo;
/// # fn main() -> boxexec_common::error::Result<()> {
/// let config = Config { runtime: RuntimeKind::Docker, ..Config::default() };
/// let client = RuntimeClient::Docker(Arc::new(DockerCli::locate()?));
/// let mut cmd = Command::from_config(client, &config)?;
/// let outcome = cmd.run(TaskIo::inherit());
/// println!("exited with {}", outcome.code);
/// # Ok(())
/// # }
/// ```
pub struct Command {
    path: String,
    args: Vec<String>,
    backend: Backend,
}

impl Command {
    /// Binds `path` and `args` to a backend lifecycle.
    #[must_use]
    pub fn new(backend: Backend, path: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            path: path.into(),
            args,
            backend,
        }
    }

    /// Builds the command configured in `config` for `client`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the client does not match the
    /// configured runtime or the backend rejects the configuration.
    pub fn from_config(client: RuntimeClient, config: &Config) -> Result<Self> {
        Self::from_config_traced(client, config, trace::noop())
    }

    /// Like [`Command::from_config`], reporting lifecycle segments to `tracer`.
    ///
    /// # Errors
    ///
    /// See [`Command::from_config`].
    pub fn from_config_traced(
        client: RuntimeClient,
        config: &Config,
        tracer: Arc<dyn Tracer>,
    ) -> Result<Self> {
        let backend = Backend::for_client(client, config, tracer)?;
        Ok(Self::new(
            backend,
            config.task.executable.clone(),
            config.task.args.clone(),
        ))
    }

    /// Returns the executable path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the arguments.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Returns the full command line, executable first.
    #[must_use]
    pub fn command_line(&self) -> Vec<String> {
        std::iter::once(self.path.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }

    /// Returns the backend lifecycle.
    #[must_use]
    pub const fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Sets the environment before start.
    ///
    /// # Errors
    ///
    /// Returns an "already set" error if an environment is configured.
    pub fn set_env(&mut self, env: Vec<String>) -> Result<()> {
        self.backend.set_env(env)
    }

    /// Sets the working directory before start.
    ///
    /// # Errors
    ///
    /// Returns an "already set" error if a directory is configured.
    pub fn set_dir(&mut self, dir: impl Into<String>) -> Result<()> {
        self.backend.set_dir(dir.into())
    }

    /// Creates the container and starts the command.
    ///
    /// A command that fails to start has its container removed before the
    /// error is returned.
    ///
    /// # Errors
    ///
    /// Returns an error if creation or start fails.
    pub fn start(&mut self, io: TaskIo) -> Result<()> {
        let command = self.command_line();
        self.backend.create(&command)?;
        if let Err(e) = self.backend.run(io) {
            if let Err(cleanup) = self.backend.kill() {
                tracing::warn!(error = %cleanup, "cleanup after failed start failed");
            }
            return Err(e);
        }
        tracing::debug!(path = %self.path, "command started");
        Ok(())
    }

    /// Waits for the started command to exit, then removes its container.
    pub fn wait(&mut self) -> ExitOutcome {
        self.backend.wait()
    }

    /// Starts the command and waits for it.
    pub fn run(&mut self, io: TaskIo) -> ExitOutcome {
        match self.start(io) {
            Ok(()) => self.wait(),
            Err(e) => ExitOutcome::failed(e),
        }
    }

    /// Terminates the command and removes its container.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime fails to delete the resources.
    pub fn kill(&mut self) -> Result<()> {
        self.backend.kill()
    }

    /// Id of the created container, once there is one.
    #[must_use]
    pub fn container_id(&self) -> Option<ContainerId> {
        self.backend.container_id()
    }
}

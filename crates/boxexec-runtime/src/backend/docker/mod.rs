//! Docker task lifecycle.
//!
//! The docker engine creates, starts, and attaches in one client; the
//! lifecycle keeps the same deadline, label, and cleanup rules as the
//! containerd backend.

pub mod cli;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::Duration;

use boxexec_common::config::Config;
use boxexec_common::error::{BoxexecError, Result, ResultExt};
use boxexec_common::types::{CommandDetails, ContainerId, Deadline};

pub use self::cli::DockerCli;
use crate::client::ExitStatus;
use crate::lifecycle::{
    self, ExitOutcome, Execution, Phase, build_labels, container_name, wait_for_exit,
};
use crate::mount::{HostMount, to_host_mount};
use crate::stdio::TaskIo;
use crate::trace::{Segment, Tracer};

/// Everything needed to create one docker container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateContainerOptions {
    /// Container name.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// User the process runs as.
    pub user: String,
    /// Environment in `KEY=VALUE` form.
    pub env: Vec<String>,
    /// Command line.
    pub cmd: Vec<String>,
    /// Working directory of the process.
    pub working_dir: String,
    /// Labels attached to the container.
    pub labels: BTreeMap<String, String>,
    /// Host mounts.
    pub mounts: Vec<HostMount>,
    /// DNS servers.
    pub dns: Vec<String>,
    /// DNS search domains.
    pub dns_search: Vec<String>,
    /// DNS resolver options.
    pub dns_options: Vec<String>,
}

impl CreateContainerOptions {
    /// Extracts the container template from a common configuration.
    ///
    /// Name, labels, and command are filled in at creation time.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            image: config.container.image.clone(),
            user: config.container.user.clone(),
            env: config.container.env.clone(),
            working_dir: config.task.working_dir.clone(),
            mounts: config.container.mounts.iter().map(to_host_mount).collect(),
            dns: config.network.dns.clone(),
            dns_search: config.network.dns_search.clone(),
            dns_options: config.network.dns_options.clone(),
            ..Self::default()
        }
    }
}

/// Connection to a docker engine.
pub trait DockerClient: Send + Sync {
    /// Creates a container and returns its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine rejects the container.
    fn create_container(&self, opts: &CreateContainerOptions) -> Result<ContainerId>;

    /// Starts a container with its streams attached to `io`.
    ///
    /// The returned channel yields one status once the container exits.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be started.
    fn start_attached(&self, id: &ContainerId, io: TaskIo) -> Result<Receiver<ExitStatus>>;

    /// Force-removes a container and its anonymous volumes.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if the container is already gone.
    fn remove_container(&self, id: &ContainerId) -> Result<()>;
}

/// One command run on docker.
pub struct DockerExecution {
    client: Arc<dyn DockerClient>,
    template: CreateContainerOptions,
    command_timeout: Duration,
    command_details: CommandDetails,
    tracer: Arc<dyn Tracer>,
    phase: Phase,
    deadline: Option<Deadline>,
    container: Option<ContainerId>,
    exits: Option<Receiver<ExitStatus>>,
}

impl DockerExecution {
    /// Prepares an execution from a container template.
    #[must_use]
    pub fn new(
        client: Arc<dyn DockerClient>,
        template: CreateContainerOptions,
        command_timeout: Duration,
        command_details: CommandDetails,
        tracer: Arc<dyn Tracer>,
    ) -> Self {
        Self {
            client,
            template,
            command_timeout,
            command_details,
            tracer,
            phase: Phase::Uninitialized,
            deadline: None,
            container: None,
            exits: None,
        }
    }

    /// Prepares an execution from a common configuration.
    #[must_use]
    pub fn from_config(
        client: Arc<dyn DockerClient>,
        config: &Config,
        tracer: Arc<dyn Tracer>,
    ) -> Self {
        Self::new(
            client,
            CreateContainerOptions::from_config(config),
            config.task.timeout(),
            config.command,
            tracer,
        )
    }

    /// Returns the current lifecycle phase.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Returns the deadline, once the container has been created.
    #[must_use]
    pub const fn deadline(&self) -> Option<&Deadline> {
        self.deadline.as_ref()
    }

    fn cleanup(&mut self) -> Result<()> {
        if self.phase == Phase::Cleaned {
            return Ok(());
        }
        let _segment = Segment::start(&self.tracer, "cleanup");
        if let Some(id) = &self.container {
            match self.client.remove_container(id) {
                Err(e) if !e.is_not_found() => return Err(e.context("removing container")),
                _ => tracing::debug!(id = %id, "container removed"),
            }
        }
        self.phase = Phase::Cleaned;
        self.exits = None;
        Ok(())
    }
}

impl Execution for DockerExecution {
    fn create(&mut self, command: &[String]) -> Result<()> {
        self.phase.expect(Phase::Uninitialized, "create")?;
        let _segment = Segment::start(&self.tracer, "createContainer");

        let deadline = Deadline::after(self.command_timeout);
        let opts = CreateContainerOptions {
            name: container_name(&self.command_details),
            cmd: command.to_vec(),
            labels: build_labels(&self.command_details, &deadline),
            ..self.template.clone()
        };
        self.deadline = Some(deadline);

        match self.client.create_container(&opts) {
            Ok(id) => {
                tracing::info!(id = %id, name = %opts.name, %deadline, "container created");
                self.container = Some(id);
                self.phase = Phase::Created;
                Ok(())
            }
            Err(e) => {
                self.phase = Phase::Cleaned;
                Err(e.context("creating container"))
            }
        }
    }

    fn run(&mut self, io: TaskIo) -> Result<()> {
        self.phase.expect(Phase::Created, "run")?;
        let id = self.container.as_ref().ok_or(BoxexecError::InvalidState {
            operation: "run",
            state: "without a container".into(),
        })?;
        self.exits = Some(
            self.client
                .start_attached(id, io)
                .context("starting container")?,
        );
        self.phase = Phase::Running;
        Ok(())
    }

    fn wait(&mut self) -> ExitOutcome {
        if let Err(e) = self.phase.expect(Phase::Running, "wait") {
            return ExitOutcome::failed(e);
        }
        let (Some(exits), Some(deadline)) = (self.exits.take(), self.deadline) else {
            return ExitOutcome::failed(BoxexecError::InvalidState {
                operation: "wait",
                state: "running without an exit channel".into(),
            });
        };
        let outcome = wait_for_exit(&exits, &deadline);
        self.phase = Phase::Finished;
        outcome.with_cleanup(self.cleanup())
    }

    fn kill(&mut self) -> Result<()> {
        self.cleanup()
    }

    fn set_env(&mut self, env: Vec<String>) -> Result<()> {
        self.phase.expect(Phase::Uninitialized, "set env")?;
        lifecycle::set_env_once(&mut self.template.env, env)
    }

    fn set_dir(&mut self, dir: String) -> Result<()> {
        self.phase.expect(Phase::Uninitialized, "set working dir")?;
        lifecycle::set_dir_once(&mut self.template.working_dir, dir)
    }

    fn container_id(&self) -> Option<ContainerId> {
        self.container.clone()
    }
}

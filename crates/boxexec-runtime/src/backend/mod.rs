//! Runtime backends and the selector that picks one for a client.
//!
//! The backend set is closed: containerd and docker. Each has its own
//! constructor; [`Backend::for_client`] dispatches on the client handed in
//! and checks it against the configured runtime kind.

pub mod containerd;
pub mod docker;
pub(crate) mod tool;

use std::sync::Arc;

use boxexec_common::config::{Config, RuntimeKind};
use boxexec_common::error::{BoxexecError, Result};
use boxexec_common::types::ContainerId;

use self::containerd::{Containerd, ContainerdExecution, CreateTaskOptions};
use self::docker::{DockerClient, DockerExecution};
use crate::client::ContainerdClient;
use crate::lifecycle::{ExitOutcome, Execution};
use crate::stdio::TaskIo;
use crate::trace::Tracer;

/// A connected runtime client.
#[derive(Clone)]
pub enum RuntimeClient {
    /// containerd API client.
    Containerd(Arc<dyn ContainerdClient>),
    /// docker engine client.
    Docker(Arc<dyn DockerClient>),
}

impl RuntimeClient {
    /// Returns which runtime this client talks to.
    #[must_use]
    pub const fn kind(&self) -> RuntimeKind {
        match self {
            Self::Containerd(_) => RuntimeKind::Containerd,
            Self::Docker(_) => RuntimeKind::Docker,
        }
    }
}

/// A lifecycle bound to one backend.
pub enum Backend {
    /// containerd lifecycle.
    Containerd(ContainerdExecution),
    /// docker lifecycle.
    Docker(DockerExecution),
}

impl Backend {
    /// Builds a containerd lifecycle from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BoxexecError::Config`] if no namespace is configured.
    pub fn containerd(
        client: Arc<dyn ContainerdClient>,
        config: &Config,
        tracer: Arc<dyn Tracer>,
    ) -> Result<Self> {
        let namespace = config.namespace.clone().unwrap_or_default();
        let runtime = Containerd::new(client, namespace)?;
        Ok(Self::Containerd(ContainerdExecution::new(
            runtime,
            CreateTaskOptions::from_config(config),
            tracer,
        )))
    }

    /// Builds a docker lifecycle from configuration.
    #[must_use]
    pub fn docker(client: Arc<dyn DockerClient>, config: &Config, tracer: Arc<dyn Tracer>) -> Self {
        Self::Docker(DockerExecution::from_config(client, config, tracer))
    }

    /// Builds the lifecycle matching `client`.
    ///
    /// # Errors
    ///
    /// Returns [`BoxexecError::Config`] if the configured runtime differs
    /// from the client's, or the backend rejects the configuration.
    pub fn for_client(
        client: RuntimeClient,
        config: &Config,
        tracer: Arc<dyn Tracer>,
    ) -> Result<Self> {
        if client.kind() != config.runtime {
            return Err(BoxexecError::Config {
                message: format!(
                    "unsupported client type: configured for {} but given a {} client",
                    config.runtime,
                    client.kind()
                ),
            });
        }
        match client {
            RuntimeClient::Containerd(c) => Self::containerd(c, config, tracer),
            RuntimeClient::Docker(c) => Ok(Self::docker(c, config, tracer)),
        }
    }

    /// Returns which runtime this lifecycle runs on.
    #[must_use]
    pub const fn kind(&self) -> RuntimeKind {
        match self {
            Self::Containerd(_) => RuntimeKind::Containerd,
            Self::Docker(_) => RuntimeKind::Docker,
        }
    }

    fn inner(&mut self) -> &mut dyn Execution {
        match self {
            Self::Containerd(e) => e,
            Self::Docker(e) => e,
        }
    }
}

impl Execution for Backend {
    fn create(&mut self, command: &[String]) -> Result<()> {
        self.inner().create(command)
    }

    fn run(&mut self, io: TaskIo) -> Result<()> {
        self.inner().run(io)
    }

    fn wait(&mut self) -> ExitOutcome {
        self.inner().wait()
    }

    fn kill(&mut self) -> Result<()> {
        self.inner().kill()
    }

    fn set_env(&mut self, env: Vec<String>) -> Result<()> {
        self.inner().set_env(env)
    }

    fn set_dir(&mut self, dir: String) -> Result<()> {
        self.inner().set_dir(dir)
    }

    fn container_id(&self) -> Option<ContainerId> {
        match self {
            Self::Containerd(e) => e.container_id(),
            Self::Docker(e) => e.container_id(),
        }
    }
}

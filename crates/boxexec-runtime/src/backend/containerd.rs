//! containerd task lifecycle.
//!
//! Containers are created with `nerdctl` rather than through the API:
//! containers created over the socket get no networking, and nerdctl
//! installs the OCI hooks that wire it up on the host. Everything after
//! creation (tasks, processes, waiting, deletion) goes through the
//! [`ContainerdClient`] API.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};

use boxexec_common::config::Config;
use boxexec_common::constants::{
    CONNECTION_CHECK_TIMEOUT, DEFAULT_NAMESPACE, EXEC_ID_SUFFIX, NERDCTL_BINARY,
};
use boxexec_common::error::{BoxexecError, Result, ResultExt};
use boxexec_common::types::{CommandDetails, ContainerId, Deadline};

use super::tool;
use crate::client::{
    ContainerdClient, ExitStatus, Lease, ProcessSpec, RuntimeContainer, RuntimeTask, Scope,
};
use crate::lifecycle::{
    self, ExitOutcome, Execution, Phase, build_labels, container_name, wait_for_exit,
};
use crate::mount::{OciMount, to_oci_mount};
use crate::stdio::TaskIo;
use crate::trace::{Segment, Tracer};

/// A containerd client bound to the namespace commands run in.
#[derive(Clone)]
pub struct Containerd {
    client: Arc<dyn ContainerdClient>,
    namespace: String,
}

impl Containerd {
    /// Binds `client` to `namespace`.
    ///
    /// # Errors
    ///
    /// Returns [`BoxexecError::Config`] if the namespace is empty.
    pub fn new(client: Arc<dyn ContainerdClient>, namespace: impl Into<String>) -> Result<Self> {
        let namespace = namespace.into();
        if namespace.trim().is_empty() {
            return Err(BoxexecError::Config {
                message: "config must have namespace set".into(),
            });
        }
        Ok(Self { client, namespace })
    }

    /// Returns the namespace commands run in.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns the underlying client.
    #[must_use]
    pub fn client(&self) -> &Arc<dyn ContainerdClient> {
        &self.client
    }
}

/// Creates containers from a prepared argument list, returning the new id.
pub trait ContainerCreator: Send + Sync {
    /// Runs the creation and returns the container id.
    ///
    /// # Errors
    ///
    /// Returns an error if the container could not be created.
    fn create_container(&self, args: &[String]) -> Result<String>;

    /// Force-removes a container this creator made.
    ///
    /// # Errors
    ///
    /// Returns an error if the container could not be removed.
    fn remove_container(&self, namespace: &str, id: &str) -> Result<()>;
}

/// [`ContainerCreator`] backed by the `nerdctl` binary.
#[derive(Debug, Clone)]
pub struct Nerdctl {
    binary: PathBuf,
}

impl Nerdctl {
    /// Uses `nerdctl` as found on `PATH` at invocation time.
    #[must_use]
    pub fn new() -> Self {
        Self {
            binary: PathBuf::from(NERDCTL_BINARY),
        }
    }

    /// Uses the binary at `binary`.
    #[must_use]
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Resolves `nerdctl` on `PATH` up front.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if `nerdctl` is not installed.
    pub fn locate() -> Result<Self> {
        tool::locate(NERDCTL_BINARY).map(Self::with_binary)
    }
}

impl Default for Nerdctl {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerCreator for Nerdctl {
    fn create_container(&self, args: &[String]) -> Result<String> {
        let id = tool::capture(NERDCTL_BINARY, &self.binary, args)?;
        if id.is_empty() {
            return Err(BoxexecError::Runtime {
                message: "nerdctl printed no container id".into(),
            });
        }
        Ok(id)
    }

    fn remove_container(&self, namespace: &str, id: &str) -> Result<()> {
        let args = ["--namespace", namespace, "rm", "--force", id].map(String::from);
        let _ = tool::capture(NERDCTL_BINARY, &self.binary, &args)?;
        Ok(())
    }
}

/// Container and task settings for one containerd execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateTaskOptions {
    /// Image reference.
    pub image: String,
    /// Mounts attached to the container.
    pub mounts: Vec<OciMount>,
    /// User the process runs as; numeric values also set the process uid.
    pub user: String,
    /// Environment in `KEY=VALUE` form.
    pub env: Vec<String>,
    /// Command timeout, before the safety buffer.
    pub command_timeout: Duration,
    /// Working directory of the process.
    pub working_dir: String,
    /// Identity used for naming and labels.
    pub command_details: CommandDetails,
}

impl CreateTaskOptions {
    /// Extracts the containerd options from a common configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            image: config.container.image.clone(),
            mounts: config.container.mounts.iter().map(to_oci_mount).collect(),
            user: config.container.user.clone(),
            env: config.container.env.clone(),
            command_timeout: config.task.timeout(),
            working_dir: config.task.working_dir.clone(),
            command_details: config.command,
        }
    }
}

/// Returns the namespace configured for containerd, or the default one.
#[must_use]
pub fn configured_namespace(config: &Config) -> &str {
    config.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE)
}

/// Builds the `nerdctl create` argument list.
///
/// Mount options are joined with commas after the destination; the image
/// always comes last.
#[must_use]
pub fn create_container_args(
    namespace: &str,
    name: &str,
    opts: &CreateTaskOptions,
    labels: &BTreeMap<String, String>,
) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "--namespace".into(),
        namespace.into(),
        "create".into(),
        "--name".into(),
        name.into(),
        "--user".into(),
        opts.user.clone(),
    ];
    for m in &opts.mounts {
        let volume = if m.options.is_empty() {
            format!("{}:{}", m.source, m.destination)
        } else {
            format!("{}:{}:{}", m.source, m.destination, m.options.join(","))
        };
        args.extend(["-v".into(), volume]);
    }
    for e in &opts.env {
        args.extend(["-e".into(), e.clone()]);
    }
    for (key, value) in labels {
        args.extend(["--label".into(), format!("{key}={value}")]);
    }
    args.push(opts.image.clone());
    args
}

/// One command run on containerd: container, task, process, and teardown.
pub struct ContainerdExecution {
    runtime: Containerd,
    opts: CreateTaskOptions,
    creator: Arc<dyn ContainerCreator>,
    tracer: Arc<dyn Tracer>,
    phase: Phase,
    cmd: Vec<String>,
    deadline: Option<Deadline>,
    labels: BTreeMap<String, String>,
    lease: Option<Lease>,
    container: Option<Arc<dyn RuntimeContainer>>,
    task: Option<Arc<dyn RuntimeTask>>,
    exits: Option<Receiver<ExitStatus>>,
}

impl ContainerdExecution {
    /// Prepares an execution that creates containers with `nerdctl`.
    #[must_use]
    pub fn new(runtime: Containerd, opts: CreateTaskOptions, tracer: Arc<dyn Tracer>) -> Self {
        Self::with_creator(runtime, opts, Arc::new(Nerdctl::new()), tracer)
    }

    /// Prepares an execution using a custom container creator.
    #[must_use]
    pub fn with_creator(
        runtime: Containerd,
        opts: CreateTaskOptions,
        creator: Arc<dyn ContainerCreator>,
        tracer: Arc<dyn Tracer>,
    ) -> Self {
        Self {
            runtime,
            opts,
            creator,
            tracer,
            phase: Phase::Uninitialized,
            cmd: Vec::new(),
            deadline: None,
            labels: BTreeMap::new(),
            lease: None,
            container: None,
            task: None,
            exits: None,
        }
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

    /// Returns the labels attached at creation.
    #[must_use]
    pub const fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    fn scope(&self) -> Scope {
        Scope {
            namespace: self.runtime.namespace.clone(),
            lease: self.lease.as_ref().map(|l| l.id.clone()),
        }
    }

    fn create_container(&self) -> Result<Arc<dyn RuntimeContainer>> {
        let _segment = Segment::start(&self.tracer, "createContainer");
        let start = Instant::now();
        let args = self.build_create_container_args(&container_name(&self.opts.command_details));
        let id = self
            .execute_create_container(&args)
            .context("nerdctl: creating container")?;
        let container = match self.load_container(&id) {
            Ok(container) => container,
            Err(e) => {
                self.discard_container(&id);
                return Err(e.context("loading container"));
            }
        };
        tracing::debug!(
            id = %id,
            duration_ms = start.elapsed().as_millis(),
            "entire create container operation finished"
        );
        Ok(container)
    }

    /// Builds the `nerdctl create` argument list for a container named `name`.
    pub(crate) fn build_create_container_args(&self, name: &str) -> Vec<String> {
        let _segment = Segment::start(&self.tracer, "buildCreateContainerArgs");
        create_container_args(&self.runtime.namespace, name, &self.opts, &self.labels)
    }

    fn execute_create_container(&self, args: &[String]) -> Result<String> {
        let _segment = Segment::start(&self.tracer, "executeCreateContainer");
        let start = Instant::now();
        let id = self.creator.create_container(args)?;
        tracing::debug!(
            id = %id,
            duration_ms = start.elapsed().as_millis(),
            "nerdctl created container"
        );
        Ok(id)
    }

    /// Removes a container that was created but never loaded.
    fn discard_container(&self, id: &str) {
        match self.creator.remove_container(&self.runtime.namespace, id) {
            Ok(()) => tracing::debug!(id, "removed unloaded container"),
            Err(e) => tracing::warn!(id, error = %e, "failed to remove unloaded container"),
        }
    }

    fn load_container(&self, id: &str) -> Result<Arc<dyn RuntimeContainer>> {
        let _segment = Segment::start(&self.tracer, "loadContainer");
        let start = Instant::now();
        let container = self.runtime.client.load_container(&self.scope(), id)?;
        tracing::debug!(
            id,
            duration_ms = start.elapsed().as_millis(),
            "load container finished"
        );
        Ok(container)
    }

    /// Checks the runtime connection and reconnects once if it went stale.
    fn ensure_connection(&self) -> Result<()> {
        let _segment = Segment::start(&self.tracer, "ensureConnection");
        let client = &self.runtime.client;
        match client.is_serving(CONNECTION_CHECK_TIMEOUT) {
            Ok(true) => return Ok(()),
            Ok(false) => tracing::warn!("runtime connection is not serving; reconnecting"),
            Err(e) => tracing::warn!(error = %e, "runtime connection check failed; reconnecting"),
        }
        client.reconnect().map_err(|e| BoxexecError::Transport {
            message: format!("error ensuring runtime connection: {e}"),
        })
    }

    fn create_task(&self, container: &Arc<dyn RuntimeContainer>) -> Result<Arc<dyn RuntimeTask>> {
        let _segment = Segment::start(&self.tracer, "createTask");
        container.new_task()
    }

    /// Derives the process spec from the container's base spec.
    ///
    /// A user that does not parse as a numeric uid leaves the uid untouched.
    pub(crate) fn create_process_spec(
        &self,
        container: &Arc<dyn RuntimeContainer>,
    ) -> Result<ProcessSpec> {
        let _segment = Segment::start(&self.tracer, "createProcessSpec");
        let spec = container.spec().context("getting spec from container")?;
        let mut process = spec.process.ok_or_else(|| BoxexecError::Runtime {
            message: format!("container {} spec has no process section", container.id()),
        })?;
        process.args.clone_from(&self.cmd);
        process.cwd.clone_from(&self.opts.working_dir);
        if let Ok(uid) = self.opts.user.parse::<u32>() {
            process.user.uid = uid;
        }
        Ok(process)
    }

    fn start_process(&mut self, io: TaskIo) -> Result<()> {
        let container = self.container.clone().ok_or(BoxexecError::InvalidState {
            operation: "run",
            state: "without a container".into(),
        })?;
        self.ensure_connection()?;

        let task = self.create_task(&container).context("creating task")?;
        self.task = Some(Arc::clone(&task));

        let spec = self
            .create_process_spec(&container)
            .context("creating process spec")?;
        let exec_id = format!("{}{EXEC_ID_SUFFIX}", container.id());
        let process = task
            .exec(&exec_id, &spec, io)
            .context("creating process")?;

        // wait must be registered before start or a fast exit is lost
        self.exits = Some(process.wait().context("waiting for process")?);
        process.start().context("starting process")?;
        Ok(())
    }

    /// Deletes the task, then the container, then releases the lease.
    ///
    /// Not-found results count as already clean. A task deletion failure is
    /// returned without attempting container deletion.
    fn cleanup(&mut self) -> Result<()> {
        if self.phase == Phase::Cleaned {
            return Ok(());
        }
        let _segment = Segment::start(&self.tracer, "cleanup");
        let result = self.delete_resources();
        self.release_lease();
        if result.is_ok() {
            self.phase = Phase::Cleaned;
            self.exits = None;
        }
        result
    }

    fn delete_resources(&mut self) -> Result<()> {
        if let Some(task) = self.task.clone() {
            match task.delete() {
                Err(e) if !e.is_not_found() => return Err(e.context("deleting task")),
                _ => self.task = None,
            }
        }
        if let Some(container) = &self.container {
            match container.delete() {
                Err(e) if !e.is_not_found() => return Err(e.context("deleting container")),
                _ => tracing::debug!(id = %container.id(), "container deleted"),
            }
        }
        Ok(())
    }

    fn release_lease(&mut self) {
        let Some(lease) = self.lease.take() else {
            return;
        };
        if let Err(e) = self.runtime.client.delete_lease(&self.runtime.namespace, &lease) {
            tracing::warn!(lease = %lease.id, error = %e, "failed to release lease");
        }
    }
}

impl Execution for ContainerdExecution {
    fn create(&mut self, command: &[String]) -> Result<()> {
        self.phase.expect(Phase::Uninitialized, "create")?;
        self.cmd = command.to_vec();

        let deadline = Deadline::after(self.opts.command_timeout);
        // containerd keeps unleased resources for 24h by default; at this
        // volume they must go away once the command is overdue
        let lease = self
            .runtime
            .client
            .create_lease(&self.runtime.namespace, deadline.expiration())
            .context("creating containerd lease")?;
        self.lease = Some(lease);
        self.labels = build_labels(&self.opts.command_details, &deadline);
        self.deadline = Some(deadline);

        match self.create_container() {
            Ok(container) => {
                tracing::info!(id = %container.id(), %deadline, "container created");
                self.container = Some(container);
                self.phase = Phase::Created;
                Ok(())
            }
            Err(e) => {
                self.release_lease();
                self.phase = Phase::Cleaned;
                Err(e.context("creating container"))
            }
        }
    }

    fn run(&mut self, io: TaskIo) -> Result<()> {
        self.phase.expect(Phase::Created, "run")?;
        self.start_process(io)?;
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
        tracing::debug!(code = outcome.code, timed_out = outcome.timed_out(), "wait finished");
        outcome.with_cleanup(self.cleanup())
    }

    fn kill(&mut self) -> Result<()> {
        self.cleanup()
    }

    fn set_env(&mut self, env: Vec<String>) -> Result<()> {
        self.phase.expect(Phase::Uninitialized, "set env")?;
        lifecycle::set_env_once(&mut self.opts.env, env)
    }

    fn set_dir(&mut self, dir: String) -> Result<()> {
        self.phase.expect(Phase::Uninitialized, "set working dir")?;
        lifecycle::set_dir_once(&mut self.opts.working_dir, dir)
    }

    fn container_id(&self) -> Option<ContainerId> {
        self.container.as_ref().map(|c| ContainerId::new(c.id()))
    }
}

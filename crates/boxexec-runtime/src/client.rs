//! containerd client abstraction.
//!
//! The lifecycle only talks to containerd through these traits, which
//! mirror the subset of the containerd API this crate needs. A gRPC-backed
//! implementation lives with the embedding service; tests use fakes.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::Duration;

use boxexec_common::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::mount::OciMount;
use crate::stdio::TaskIo;

/// A runtime lease bounding how long created resources are retained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    /// Lease identifier.
    pub id: String,
    /// Time after creation at which the runtime may reclaim the lease.
    pub expiration: Duration,
}

/// Namespace and lease under which runtime calls are issued.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scope {
    /// containerd namespace.
    pub namespace: String,
    /// Lease attached to calls that create resources.
    pub lease: Option<String>,
}

impl Scope {
    /// Creates a scope with no lease.
    #[must_use]
    pub fn namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            lease: None,
        }
    }
}

/// Equality filter on a container label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelFilter {
    /// Label key.
    pub key: String,
    /// Required label value.
    pub value: String,
}

impl LabelFilter {
    /// Creates a filter matching containers whose `key` label equals `value`.
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for LabelFilter {
    /// Renders the filter in containerd filter syntax.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "labels.\"{}\"=={}", self.key, self.value)
    }
}

/// Exit notification delivered once a process terminates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitStatus {
    /// Raw exit code reported by the runtime.
    pub code: u32,
    /// Time the process exited, if reported.
    pub exited_at: Option<DateTime<Utc>>,
    /// Error the runtime attached to the exit, if any.
    pub error: Option<String>,
}

impl ExitStatus {
    /// Creates a successful-delivery exit status with the given code.
    #[must_use]
    pub fn new(code: u32) -> Self {
        Self {
            code,
            exited_at: Some(Utc::now()),
            error: None,
        }
    }

    /// Returns the exit code as a signed process exit code.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub const fn exit_code(&self) -> i32 {
        self.code as i32
    }
}

/// Status of a task as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    /// Task is running.
    Running,
    /// Task has been created but not started.
    Created,
    /// Task has stopped.
    Stopped,
    /// Task is paused.
    Paused,
    /// Task is being paused.
    Pausing,
    /// Runtime reports the status as unknown.
    Unknown,
    /// Any status this crate does not recognise.
    Other(String),
}

impl TaskStatus {
    /// Maps a runtime status string to a [`TaskStatus`].
    #[must_use]
    pub fn parse(status: &str) -> Self {
        match status {
            "running" => Self::Running,
            "created" => Self::Created,
            "stopped" => Self::Stopped,
            "paused" => Self::Paused,
            "pausing" => Self::Pausing,
            "unknown" => Self::Unknown,
            other => Self::Other(other.to_string()),
        }
    }
}

/// User a process runs as.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessUser {
    /// Numeric user id.
    pub uid: u32,
    /// Numeric group id.
    pub gid: u32,
    /// Supplementary group ids.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_gids: Vec<u32>,
}

/// OCI process section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSpec {
    /// Whether a terminal is attached.
    #[serde(default)]
    pub terminal: bool,
    /// User the process runs as.
    #[serde(default)]
    pub user: ProcessUser,
    /// Command line.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment in `KEY=VALUE` form.
    #[serde(default)]
    pub env: Vec<String>,
    /// Working directory.
    #[serde(default)]
    pub cwd: String,
}

/// The parts of an OCI runtime spec the lifecycle reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSpec {
    /// Process section, absent on malformed specs.
    #[serde(default)]
    pub process: Option<ProcessSpec>,
    /// Container hostname.
    #[serde(default)]
    pub hostname: String,
    /// Mounts configured for the container.
    #[serde(default)]
    pub mounts: Vec<OciMount>,
}

/// Connection to a containerd daemon.
pub trait ContainerdClient: Send + Sync {
    /// Namespace the client uses when no other is requested.
    fn default_namespace(&self) -> &str;

    /// Creates a lease that expires after `expiration`.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime rejects the lease.
    fn create_lease(&self, namespace: &str, expiration: Duration) -> Result<Lease>;

    /// Releases a lease.
    ///
    /// # Errors
    ///
    /// Returns an error if the lease cannot be deleted.
    fn delete_lease(&self, namespace: &str, lease: &Lease) -> Result<()>;

    /// Checks that the connection is serving, bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the check itself fails.
    fn is_serving(&self, timeout: Duration) -> Result<bool>;

    /// Re-establishes the underlying connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be re-established.
    fn reconnect(&self) -> Result<()>;

    /// Loads an existing container by id.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if no such container exists.
    fn load_container(&self, scope: &Scope, id: &str) -> Result<Arc<dyn RuntimeContainer>>;

    /// Lists containers matching the filter.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing call fails.
    fn containers(
        &self,
        scope: &Scope,
        filter: &LabelFilter,
    ) -> Result<Vec<Arc<dyn RuntimeContainer>>>;
}

/// A containerd container.
pub trait RuntimeContainer: Send + Sync {
    /// Container id.
    fn id(&self) -> String;

    /// Labels attached at creation.
    ///
    /// # Errors
    ///
    /// Returns an error if the container metadata cannot be read.
    fn labels(&self) -> Result<HashMap<String, String>>;

    /// Returns the container's existing task.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if the container has no task.
    fn task(&self) -> Result<Arc<dyn RuntimeTask>>;

    /// Creates a new task for the container, with its own stdio discarded.
    ///
    /// Only the process exec'd into the task runs the command, so the
    /// caller's streams are handed to [`RuntimeTask::exec`] instead.
    ///
    /// # Errors
    ///
    /// Returns an error if the task cannot be created.
    fn new_task(&self) -> Result<Arc<dyn RuntimeTask>>;

    /// Returns the container's OCI spec.
    ///
    /// # Errors
    ///
    /// Returns an error if the spec cannot be read.
    fn spec(&self) -> Result<ContainerSpec>;

    /// Deletes the container together with its snapshot.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if the container is already gone.
    fn delete(&self) -> Result<()>;
}

/// A containerd task.
pub trait RuntimeTask: Send + Sync {
    /// Execs an additional process inside the task.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be created.
    fn exec(&self, exec_id: &str, spec: &ProcessSpec, io: TaskIo)
    -> Result<Arc<dyn RuntimeProcess>>;

    /// Returns the task status.
    ///
    /// # Errors
    ///
    /// Returns an error if the status cannot be read.
    fn status(&self) -> Result<TaskStatus>;

    /// Kills all processes of the task and deletes it.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if the task is already gone.
    fn delete(&self) -> Result<()>;
}

/// A process running inside a task.
pub trait RuntimeProcess: Send + Sync {
    /// Registers for the process exit notification.
    ///
    /// Must be called before [`RuntimeProcess::start`] so that a fast exit is
    /// not missed.
    ///
    /// # Errors
    ///
    /// Returns an error if the wait cannot be registered.
    fn wait(&self) -> Result<Receiver<ExitStatus>>;

    /// Starts the process.
    ///
    /// # Errors
    ///
    /// Returns an error if the process fails to start.
    fn start(&self) -> Result<()>;
}

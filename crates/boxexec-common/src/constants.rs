//! System-wide constants: label keys, timing budgets, and tool names.

use std::time::Duration;

/// Value of the owner label on every container this system creates.
pub const OWNER_TAG: &str = "chains";

/// Label key identifying the owning system.
pub const OWNER_LABEL: &str = "wk/owner";

/// Label key carrying the RFC 3339 deadline of the command.
pub const DEADLINE_LABEL: &str = "chains/deadline";

/// Label key carrying the command executor id.
pub const COMMAND_EXECUTOR_ID_LABEL: &str = "chains/commandExecutorId";

/// Label key carrying the chain executor id.
pub const CHAIN_EXECUTOR_ID_LABEL: &str = "chains/chainExecutorId";

/// Label key carrying the command result id.
pub const COMMAND_RESULT_ID_LABEL: &str = "chains/commandResultId";

/// Prefix of every generated container name.
pub const CONTAINER_NAME_PREFIX: &str = "chains";

/// Length of the random alphanumeric suffix appended to container names.
pub const RANDOM_SUFFIX_LENGTH: usize = 6;

/// Safety buffer added on top of the command timeout to form the deadline.
pub const TIMEOUT_BUFFER: Duration = Duration::from_secs(5 * 60);

/// Upper bound on the runtime liveness check performed before task creation.
pub const CONNECTION_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Exit code reported when the deadline elapses before the process exits.
pub const TIMED_OUT_EXIT_CODE: i32 = -1;

/// Suffix appended to the container id to form the exec process id.
pub const EXEC_ID_SUFFIX: &str = "-task";

/// Containerd-native CLI used to create containers with networking wired up.
pub const NERDCTL_BINARY: &str = "nerdctl";

/// Docker CLI used by the command-line docker client.
pub const DOCKER_BINARY: &str = "docker";

/// Namespace used when the configuration does not name one.
pub const DEFAULT_NAMESPACE: &str = "default";


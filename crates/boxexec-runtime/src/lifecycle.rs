//! Lifecycle contract shared by every backend.
//!
//! A lifecycle instance drives one container through
//! `Uninitialized → Created → Running → Finished → Cleaned`, each step at
//! most once. The helpers here hold the parts every backend does the same
//! way: naming, labels, and the exit-versus-deadline race.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::mpsc::{Receiver, RecvTimeoutError};

use boxexec_common::constants::{
    CHAIN_EXECUTOR_ID_LABEL, COMMAND_EXECUTOR_ID_LABEL, COMMAND_RESULT_ID_LABEL,
    CONTAINER_NAME_PREFIX, DEADLINE_LABEL, OWNER_LABEL, OWNER_TAG, TIMED_OUT_EXIT_CODE,
};
use boxexec_common::error::{BoxexecError, Result};
use boxexec_common::types::{CommandDetails, ContainerId, Deadline, random_suffix};

use crate::client::ExitStatus;
use crate::stdio::TaskIo;

/// One backend's implementation of the create/run/wait/kill contract.
pub trait Execution: Send {
    /// Creates the container that will run `command`.
    ///
    /// # Errors
    ///
    /// Returns an error if the lifecycle was already created or the
    /// runtime fails to create the container.
    fn create(&mut self, command: &[String]) -> Result<()>;

    /// Starts the command with the given streams.
    ///
    /// # Errors
    ///
    /// Returns an error if the lifecycle is not in the created state or
    /// the process cannot be started.
    fn run(&mut self, io: TaskIo) -> Result<()>;

    /// Waits for the command to exit or its deadline to pass, then cleans up.
    fn wait(&mut self) -> ExitOutcome;

    /// Force-terminates the command and removes its container.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime fails to delete the resources.
    fn kill(&mut self) -> Result<()>;

    /// Sets the environment, unless one is already configured.
    ///
    /// # Errors
    ///
    /// Returns [`BoxexecError::AlreadySet`] if the environment is non-empty.
    fn set_env(&mut self, env: Vec<String>) -> Result<()>;

    /// Sets the working directory, unless one is already configured.
    ///
    /// # Errors
    ///
    /// Returns [`BoxexecError::AlreadySet`] if a directory is configured.
    fn set_dir(&mut self, dir: String) -> Result<()>;

    /// Id of the created container, once there is one.
    fn container_id(&self) -> Option<ContainerId>;
}

/// Lifecycle state of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Nothing created yet.
    Uninitialized,
    /// Container exists, command not started.
    Created,
    /// Command started, exit not yet observed.
    Running,
    /// Exit observed or deadline passed; resources not yet released.
    Finished,
    /// Resources released.
    Cleaned,
}

impl Phase {
    /// Fails unless the lifecycle is in `expected`.
    ///
    /// # Errors
    ///
    /// Returns [`BoxexecError::InvalidState`] naming the attempted operation.
    pub fn expect(self, expected: Self, operation: &'static str) -> Result<()> {
        if self == expected {
            Ok(())
        } else {
            Err(BoxexecError::InvalidState {
                operation,
                state: self.to_string(),
            })
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Finished => write!(f, "finished"),
            Self::Cleaned => write!(f, "cleaned"),
        }
    }
}

/// Result of waiting for a command: its exit code and any error.
///
/// The three shapes are `(code, None)`, `(code, Some(runtime error))`, and
/// `(-1, Some(deadline exceeded))`.
#[derive(Debug)]
pub struct ExitOutcome {
    /// Exit code of the process, or `-1` when it never reported one.
    pub code: i32,
    /// Error reported alongside the exit, if any.
    pub error: Option<BoxexecError>,
}

impl ExitOutcome {
    /// Outcome for a command that never produced an exit status.
    #[must_use]
    pub const fn failed(error: BoxexecError) -> Self {
        Self {
            code: TIMED_OUT_EXIT_CODE,
            error: Some(error),
        }
    }

    /// Returns whether the command exited with code zero and no error.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.code == 0 && self.error.is_none()
    }

    /// Returns whether the deadline passed before the command exited.
    #[must_use]
    pub fn timed_out(&self) -> bool {
        self.error.as_ref().is_some_and(BoxexecError::is_cancelled)
    }

    /// Converts the outcome into the exit code, or the error if there was one.
    ///
    /// # Errors
    ///
    /// Returns the recorded error, discarding the code.
    pub fn into_result(self) -> Result<i32> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.code),
        }
    }

    /// Folds the result of the post-wait cleanup into this outcome.
    ///
    /// A cleanup failure becomes the outcome's error when the command itself
    /// reported none; otherwise the command's error wins and the cleanup
    /// failure is only logged.
    #[must_use]
    pub fn with_cleanup(mut self, cleanup: Result<()>) -> Self {
        if let Err(e) = cleanup {
            match &self.error {
                None => self.error = Some(e.context("cleaning up after wait")),
                Some(primary) => {
                    tracing::warn!(error = %e, primary = %primary, "cleanup failed after wait");
                }
            }
        }
        self
    }
}

/// Generates a fresh container name for the command.
///
/// Ids are rendered as absolute values so the name never holds two
/// consecutive hyphens; the random suffix keeps retries collision-free.
#[must_use]
pub fn container_name(details: &CommandDetails) -> String {
    format!(
        "{CONTAINER_NAME_PREFIX}-{}-{}-{}-{}",
        details.chain_executor_id.unsigned_abs(),
        details.executor_id.unsigned_abs(),
        details.result_id.unsigned_abs(),
        random_suffix()
    )
}

/// Builds the label set attached to every container at creation.
#[must_use]
pub fn build_labels(details: &CommandDetails, deadline: &Deadline) -> BTreeMap<String, String> {
    BTreeMap::from([
        (OWNER_LABEL.to_string(), OWNER_TAG.to_string()),
        (
            COMMAND_EXECUTOR_ID_LABEL.to_string(),
            details.executor_id.to_string(),
        ),
        (
            CHAIN_EXECUTOR_ID_LABEL.to_string(),
            details.chain_executor_id.to_string(),
        ),
        (
            COMMAND_RESULT_ID_LABEL.to_string(),
            details.result_id.to_string(),
        ),
        (DEADLINE_LABEL.to_string(), deadline.to_label()),
    ])
}

/// Blocks until the exit notification arrives or the deadline passes.
pub fn wait_for_exit(exits: &Receiver<ExitStatus>, deadline: &Deadline) -> ExitOutcome {
    match exits.recv_timeout(deadline.remaining()) {
        Ok(status) => ExitOutcome {
            code: status.exit_code(),
            error: status.error.map(|message| BoxexecError::Exit { message }),
        },
        Err(RecvTimeoutError::Timeout) => {
            tracing::warn!(%deadline, "time expired before receiving exit status from container/task");
            ExitOutcome::failed(BoxexecError::DeadlineExceeded {
                deadline: deadline.to_label(),
            })
        }
        Err(RecvTimeoutError::Disconnected) => ExitOutcome::failed(BoxexecError::Runtime {
            message: "exit notification channel closed without a status".into(),
        }),
    }
}

/// Stores `env` unless an environment is already configured.
///
/// # Errors
///
/// Returns [`BoxexecError::AlreadySet`] if `slot` is non-empty.
pub fn set_env_once(slot: &mut Vec<String>, env: Vec<String>) -> Result<()> {
    if !slot.is_empty() {
        return Err(BoxexecError::AlreadySet { field: "Env" });
    }
    *slot = env;
    Ok(())
}

/// Stores `dir` unless a working directory is already configured.
///
/// # Errors
///
/// Returns [`BoxexecError::AlreadySet`] if `slot` is non-empty.
pub fn set_dir_once(slot: &mut String, dir: String) -> Result<()> {
    if !slot.is_empty() {
        return Err(BoxexecError::AlreadySet {
            field: "WorkingDir",
        });
    }
    *slot = dir;
    Ok(())
}

//! [`DockerClient`] implemented over the `docker` command-line tool.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread::{self, JoinHandle};

use boxexec_common::constants::DOCKER_BINARY;
use boxexec_common::error::{BoxexecError, Result};
use boxexec_common::types::ContainerId;

use super::{CreateContainerOptions, DockerClient};
use crate::backend::tool;
use crate::client::ExitStatus;
use crate::mount::HostMount;
use crate::stdio::TaskIo;

/// Docker engine access through the `docker` binary.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: PathBuf,
}

impl DockerCli {
    /// Uses `docker` as found on `PATH` at invocation time.
    #[must_use]
    pub fn new() -> Self {
        Self {
            binary: PathBuf::from(DOCKER_BINARY),
        }
    }

    /// Uses the binary at `binary`.
    #[must_use]
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Resolves `docker` on `PATH` up front.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if `docker` is not installed.
    pub fn locate() -> Result<Self> {
        tool::locate(DOCKER_BINARY).map(Self::with_binary)
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds the `docker create` argument list.
#[must_use]
pub fn create_args(opts: &CreateContainerOptions) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "create".into(),
        "--name".into(),
        opts.name.clone(),
        "--interactive".into(),
    ];
    if !opts.user.is_empty() {
        args.extend(["--user".into(), opts.user.clone()]);
    }
    if !opts.working_dir.is_empty() {
        args.extend(["--workdir".into(), opts.working_dir.clone()]);
    }
    for e in &opts.env {
        args.extend(["-e".into(), e.clone()]);
    }
    for (key, value) in &opts.labels {
        args.extend(["--label".into(), format!("{key}={value}")]);
    }
    for m in &opts.mounts {
        args.extend(["--mount".into(), mount_arg(m)]);
    }
    for dns in &opts.dns {
        args.extend(["--dns".into(), dns.clone()]);
    }
    for search in &opts.dns_search {
        args.extend(["--dns-search".into(), search.clone()]);
    }
    for option in &opts.dns_options {
        args.extend(["--dns-option".into(), option.clone()]);
    }
    args.push(opts.image.clone());
    args.extend(opts.cmd.iter().cloned());
    args
}

fn mount_arg(m: &HostMount) -> String {
    let mut arg = format!("type={},source={},target={}", m.mount_type, m.source, m.target);
    if m.read_only {
        arg.push_str(",readonly");
    }
    arg
}

fn copy_stream(
    mut from: impl Read + Send + 'static,
    mut to: impl Write + Send + 'static,
) -> JoinHandle<()> {
    thread::spawn(move || {
        if let Err(e) = std::io::copy(&mut from, &mut to).and_then(|_| to.flush()) {
            tracing::debug!(error = %e, "stream copy ended");
        }
    })
}

impl DockerClient for DockerCli {
    fn create_container(&self, opts: &CreateContainerOptions) -> Result<ContainerId> {
        let id = tool::capture(DOCKER_BINARY, &self.binary, &create_args(opts))?;
        if id.is_empty() {
            return Err(BoxexecError::Runtime {
                message: "docker printed no container id".into(),
            });
        }
        Ok(ContainerId::new(id))
    }

    fn start_attached(&self, id: &ContainerId, io: TaskIo) -> Result<Receiver<ExitStatus>> {
        let TaskIo {
            stdin,
            stdout,
            stderr,
        } = io;
        let mut child = Command::new(&self.binary)
            .args(["start", "--attach", "--interactive", id.as_str()])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| BoxexecError::Io {
                path: self.binary.clone(),
                source: e,
            })?;

        // dropping the pipe closes the container's stdin when there is no input
        if let (Some(input), Some(pipe)) = (stdin, child.stdin.take()) {
            drop(copy_stream(input, pipe));
        }
        let copies: Vec<JoinHandle<()>> = [
            child.stdout.take().map(|out| copy_stream(out, stdout)),
            child.stderr.take().map(|err| copy_stream(err, stderr)),
        ]
        .into_iter()
        .flatten()
        .collect();

        let (tx, rx) = mpsc::channel();
        let id = id.clone();
        drop(thread::spawn(move || {
            let status = match child.wait() {
                Ok(status) => {
                    for copy in copies {
                        let _ = copy.join();
                    }
                    match status.code() {
                        #[allow(clippy::cast_sign_loss)]
                        Some(code) => ExitStatus::new(code as u32),
                        None => ExitStatus {
                            error: Some(format!("docker start terminated by signal: {status}")),
                            ..ExitStatus::new(u32::MAX)
                        },
                    }
                }
                Err(e) => ExitStatus {
                    error: Some(format!("waiting for docker start: {e}")),
                    ..ExitStatus::new(u32::MAX)
                },
            };
            tracing::debug!(id = %id, code = status.code, "attached container exited");
            // the receiver is gone once its lifecycle timed out
            let _ = tx.send(status);
        }));
        Ok(rx)
    }

    fn remove_container(&self, id: &ContainerId) -> Result<()> {
        let args = vec![
            "rm".to_string(),
            "--force".into(),
            "--volumes".into(),
            id.to_string(),
        ];
        match tool::capture(DOCKER_BINARY, &self.binary, &args) {
            Err(BoxexecError::ExternalTool { stderr, .. }) if stderr.contains("No such container") => {
                Err(BoxexecError::NotFound {
                    kind: "container",
                    id: id.to_string(),
                })
            }
            other => other.map(drop),
        }
    }
}

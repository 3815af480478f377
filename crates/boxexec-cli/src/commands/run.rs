//! `bxc run`: Run the configured command in a docker container.

use std::path::PathBuf;
use std::sync::Arc;

use boxexec_common::config::{Config, RuntimeKind};
use boxexec_runtime::backend::RuntimeClient;
use boxexec_runtime::backend::docker::DockerCli;
use boxexec_runtime::command::Command;
use boxexec_runtime::stdio::TaskIo;
use clap::Args;

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Environment variable (`KEY=VALUE`); only allowed when the
    /// configuration sets none.
    #[arg(short, long = "env")]
    pub env: Vec<String>,

    /// Working directory; only allowed when the configuration sets none.
    #[arg(short, long)]
    pub workdir: Option<String>,

    /// Path to the docker binary (defaults to the one on PATH).
    #[arg(long)]
    pub docker: Option<PathBuf>,
}

/// Executes the `run` command and returns the command's exit code.
///
/// # Errors
///
/// Returns an error if the configuration targets another runtime, the
/// container cannot be created or started, or the deadline passes.
pub fn execute(args: RunArgs, config: Config) -> anyhow::Result<i32> {
    if config.runtime != RuntimeKind::Docker {
        anyhow::bail!(
            "bxc run drives the docker CLI; configured runtime is {} (use `bxc plan` to inspect a containerd run)",
            config.runtime
        );
    }
    let docker = match args.docker {
        Some(path) => DockerCli::with_binary(path),
        None => DockerCli::locate()?,
    };

    let mut cmd = Command::from_config(RuntimeClient::Docker(Arc::new(docker)), &config)?;
    if !args.env.is_empty() {
        cmd.set_env(args.env)?;
    }
    if let Some(dir) = args.workdir {
        cmd.set_dir(dir)?;
    }

    let outcome = cmd.run(TaskIo::inherit());
    match outcome.error {
        None => Ok(outcome.code),
        Some(e) if outcome.code == boxexec_common::constants::TIMED_OUT_EXIT_CODE => Err(e.into()),
        Some(e) => {
            tracing::error!(code = outcome.code, error = %e, "command finished with an error");
            Ok(outcome.code)
        }
    }
}

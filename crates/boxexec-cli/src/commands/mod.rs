//! CLI command definitions and dispatch.

pub mod plan;
pub mod run;

use std::path::{Path, PathBuf};

use anyhow::Context;
use boxexec_common::config::{Config, RuntimeKind};
use clap::{Parser, Subcommand};

/// boxexec: run commands in throwaway containers.
#[derive(Parser, Debug)]
#[command(name = "bxc", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Path to the JSON task configuration.
    #[arg(long, short, global = true, env = "BOXEXEC_CONFIG", default_value = "boxexec.json")]
    pub config: PathBuf,

    /// Override the configured runtime (`containerd` or `docker`).
    #[arg(long, global = true)]
    pub runtime: Option<String>,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the configured command and exit with its exit code.
    Run(run::RunArgs),
    /// Print the container creation a containerd run would perform.
    Plan(plan::PlanArgs),
}

/// Dispatches the parsed CLI command and returns the process exit code.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded or the command
/// cannot be executed.
pub fn execute(cli: Cli) -> anyhow::Result<i32> {
    let config = load_config(&cli.config, cli.runtime.as_deref())?;
    match cli.command {
        Command::Run(args) => run::execute(args, config),
        Command::Plan(args) => plan::execute(args, &config).map(|()| 0),
    }
}

/// Loads the configuration file, applying a runtime override.
///
/// # Errors
///
/// Returns an error if the file is unreadable, malformed, or names an
/// unsupported runtime.
pub fn load_config(path: &Path, runtime: Option<&str>) -> anyhow::Result<Config> {
    let mut config = Config::from_file(path)
        .with_context(|| format!("loading configuration from {}", path.display()))?;
    if let Some(name) = runtime {
        config.runtime = name.parse::<RuntimeKind>()?;
    }
    tracing::debug!(path = %path.display(), runtime = %config.runtime, "configuration loaded");
    Ok(config)
}

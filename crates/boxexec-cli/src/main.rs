//! # bxc: boxexec CLI
//!
//! Runs a configured command in a throwaway container and exits with the
//! command's exit code.

mod commands;

use clap::Parser;

use crate::commands::Cli;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let code = commands::execute(cli)?;
    std::process::exit(code)
}

//! `bxc plan`: Display the container a containerd run would create.

use boxexec_common::config::Config;
use boxexec_common::constants::NERDCTL_BINARY;
use boxexec_common::types::Deadline;
use boxexec_runtime::backend::containerd::{
    CreateTaskOptions, configured_namespace, create_container_args,
};
use boxexec_runtime::lifecycle::{build_labels, container_name};
use clap::Args;

/// Arguments for the `plan` command.
#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Print the nerdctl arguments as a JSON array.
    #[arg(long)]
    pub json: bool,
}

/// Executes the `plan` command.
///
/// Computes a fresh name, deadline, and label set exactly as a containerd
/// run would, then prints the resulting `nerdctl` invocation and the
/// command the task would exec.
///
/// # Errors
///
/// Returns an error if the arguments cannot be serialized.
pub fn execute(args: PlanArgs, config: &Config) -> anyhow::Result<()> {
    let deadline = Deadline::after(config.task.timeout());
    let invocation = plan_invocation(config, &deadline);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&invocation)?);
        return Ok(());
    }

    println!("Container plan ({} runtime)", config.runtime);
    println!();
    println!(
        "  {}",
        invocation
            .iter()
            .map(|a| shell_quote(a))
            .collect::<Vec<_>>()
            .join(" ")
    );
    println!();
    println!("  exec:     {}", config.command_line().join(" "));
    println!("  workdir:  {}", config.task.working_dir);
    println!("  deadline: {deadline}");
    Ok(())
}

/// Builds the full `nerdctl` invocation, binary first.
fn plan_invocation(config: &Config, deadline: &Deadline) -> Vec<String> {
    let opts = CreateTaskOptions::from_config(config);
    let labels = build_labels(&opts.command_details, deadline);
    let name = container_name(&opts.command_details);
    std::iter::once(NERDCTL_BINARY.to_string())
        .chain(create_container_args(
            configured_namespace(config),
            &name,
            &opts,
            &labels,
        ))
        .collect()
}

fn shell_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=,@%+".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

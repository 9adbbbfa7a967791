//! CloudPuff - CloudFormation templates, stacks and AMIs
//!
//! This is the main entry point for the `cloudpuff` CLI, which exposes
//! every tool as a subcommand.

use cloudpuff::cli::{self, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();

    let exit_code = cli::run(&cli.global, &cli.command).await;

    std::process::exit(exit_code);
}

//! Launches or updates a CloudFormation stack

use clap::Parser;
use cloudpuff::cli::commands::launch_stack::LaunchStackArgs;
use cloudpuff::cli::{self, Commands, GlobalArgs};

#[derive(Parser, Debug)]
#[command(name = "cloudpuff-launch-stack")]
#[command(version)]
#[command(about = "Launches or updates a CloudFormation stack", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(flatten)]
    args: LaunchStackArgs,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let exit_code = cli::run(&cli.global, &Commands::LaunchStack(cli.args)).await;

    std::process::exit(exit_code);
}

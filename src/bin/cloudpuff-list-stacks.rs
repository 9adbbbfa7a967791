//! Lists all stacks and their outputs in CloudFormation

use clap::Parser;
use cloudpuff::cli::commands::list_stacks::ListStacksArgs;
use cloudpuff::cli::{self, Commands, GlobalArgs};

#[derive(Parser, Debug)]
#[command(name = "cloudpuff-list-stacks")]
#[command(version)]
#[command(about = "Lists all stacks and their outputs in CloudFormation", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(flatten)]
    args: ListStacksArgs,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let exit_code = cli::run(&cli.global, &Commands::ListStacks(cli.args)).await;

    std::process::exit(exit_code);
}

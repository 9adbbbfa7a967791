//! Launches a CloudFormation stack and creates AMIs from its instances

use clap::Parser;
use cloudpuff::cli::commands::create_ami::CreateAmiArgs;
use cloudpuff::cli::{self, Commands, GlobalArgs};

#[derive(Parser, Debug)]
#[command(name = "cloudpuff-create-ami")]
#[command(version)]
#[command(about = "Launches a CloudFormation stack and creates AMIs from its instances", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(flatten)]
    args: CreateAmiArgs,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let exit_code = cli::run(&cli.global, &Commands::CreateAmi(cli.args)).await;

    std::process::exit(exit_code);
}

//! Prints a Makefile rule listing the files a template depends on

use clap::Parser;
use cloudpuff::cli::commands::make_depends::MakeDependsArgs;
use cloudpuff::cli::{self, Commands, GlobalArgs};

#[derive(Parser, Debug)]
#[command(name = "cloudpuff-make-depends")]
#[command(version)]
#[command(about = "Prints a Makefile rule listing the files a template depends on", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(flatten)]
    args: MakeDependsArgs,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let exit_code = cli::run(&cli.global, &Commands::MakeDepends(cli.args)).await;

    std::process::exit(exit_code);
}

//! Compiles a CloudPuff template to a CloudFormation template

use clap::Parser;
use cloudpuff::cli::commands::compile_template::CompileTemplateArgs;
use cloudpuff::cli::{self, Commands, GlobalArgs};

#[derive(Parser, Debug)]
#[command(name = "cloudpuff-compile-template")]
#[command(version)]
#[command(about = "Compiles a CloudPuff template to a CloudFormation template", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(flatten)]
    args: CompileTemplateArgs,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let exit_code = cli::run(&cli.global, &Commands::CompileTemplate(cli.args)).await;

    std::process::exit(exit_code);
}

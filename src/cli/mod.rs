//! CLI module for CloudPuff
//!
//! This module provides the command-line interface shared by the
//! `cloudpuff` binary and the standalone `cloudpuff-*` tools, including
//! argument parsing, configuration loading, and subcommand handling.

pub mod commands;
pub mod completions;
pub mod output;
pub mod prompt;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::Config;
use crate::error::Error;
use crate::logging::init_logging;
use commands::CommandContext;
use output::OutputFormatter;

/// CloudPuff - CloudFormation templates, stacks and AMIs
///
/// Compiles YAML templates to CloudFormation, launches and lists stacks and
/// bakes AMIs from EC2 instances.
#[derive(Parser, Debug, Clone)]
#[command(name = "cloudpuff")]
#[command(author = "CloudPuff Contributors")]
#[command(version)]
#[command(about = "Compile CloudFormation templates, launch stacks and create AMIs", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub global: GlobalArgs,
}

/// Options shared by every command
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Displays debug output
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    /// Performs only read-only operations and reports what would change
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Path to configuration file
    #[arg(short = 'c', long, global = true, env = "CLOUDPUFF_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Launch a stack and create AMIs from its instances
    CreateAmi(commands::create_ami::CreateAmiArgs),

    /// Compile a template to CloudFormation JSON
    CompileTemplate(commands::compile_template::CompileTemplateArgs),

    /// Create or update a stack from a template
    LaunchStack(commands::launch_stack::LaunchStackArgs),

    /// List stacks along with their outputs and tags
    ListStacks(commands::list_stacks::ListStacksArgs),

    /// Print the files a template depends on, as a Makefile rule
    MakeDepends(commands::make_depends::MakeDependsArgs),

    /// Generate shell completions
    Completions(completions::CompletionsArgs),
}

impl Cli {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

/// Runs a command and returns the process exit code.
///
/// Logging and configuration are set up first. Errors are printed here,
/// with template errors prefixed the way users expect from the tools.
pub async fn run(global: &GlobalArgs, command: &Commands) -> i32 {
    init_logging(global.debug);

    let config = Config::load(global.config.as_deref()).unwrap_or_else(|e| {
        OutputFormatter::new(!global.no_color).warning(&format!("Failed to load config: {}", e));
        Config::default()
    });

    let mut ctx = CommandContext::new(global, config);

    let result = match command {
        Commands::CreateAmi(args) => args.execute(&mut ctx).await,
        Commands::CompileTemplate(args) => args.execute(&mut ctx).await,
        Commands::LaunchStack(args) => args.execute(&mut ctx).await,
        Commands::ListStacks(args) => args.execute(&mut ctx).await,
        Commands::MakeDepends(args) => args.execute(&mut ctx).await,
        Commands::Completions(args) => {
            completions::generate_completions(args.shell);
            Ok(0)
        }
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{}", error_message(&err));
            1
        }
    }
}

/// Formats an error for the console.
pub fn error_message(err: &anyhow::Error) -> String {
    match err.downcast_ref::<Error>() {
        Some(err @ Error::TemplateSyntax { .. }) => format!("Template syntax error: {}", err),
        Some(err) if err.is_template_error() => format!("Template error: {}", err),
        _ => format!("{:#}", err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["cloudpuff", "compile-template", "web.yaml"]).unwrap();
        assert!(matches!(cli.command, Commands::CompileTemplate(_)));
    }

    #[test]
    fn test_global_args() {
        let cli = Cli::try_parse_from([
            "cloudpuff",
            "list-stacks",
            "--json",
            "-d",
            "--dry-run",
            "--no-color",
        ])
        .unwrap();
        assert!(cli.global.debug);
        assert!(cli.global.dry_run);
        assert!(cli.global.no_color);
        assert!(matches!(cli.command, Commands::ListStacks(ref args) if args.json));
    }

    #[test]
    fn test_error_message() {
        let err = anyhow::Error::from(Error::template("Unknown tag !nope"));
        assert_eq!(error_message(&err), "Template error: Unknown tag !nope");

        let err = anyhow::Error::from(Error::TemplateSyntax {
            message: "mapping values are not allowed in this context".into(),
            filename: "web.yaml".into(),
            line: 2,
            column: 5,
            snippet: "    a: b: c\n        ^".into(),
        });
        assert!(error_message(&err).starts_with("Template syntax error: mapping values"));

        let err = anyhow::anyhow!("The --update option requires --stack-name.");
        assert_eq!(
            error_message(&err),
            "The --update option requires --stack-name."
        );
    }
}

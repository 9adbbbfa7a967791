//! Shell completions module for CloudPuff
//!
//! Provides shell completion scripts for bash, zsh, fish, powershell, and elvish.

use clap::{CommandFactory, Parser};
use clap_complete::{generate, Shell};
use std::io;

use crate::cli::Cli;

/// Arguments for the completions command
#[derive(Parser, Debug, Clone)]
pub struct CompletionsArgs {
    /// The shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

/// Generate shell completions and write to stdout
pub fn generate_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "cloudpuff", &mut io::stdout());
}

/// Get completions as a string
pub fn get_completions(shell: Shell) -> String {
    let mut cmd = Cli::command();
    let mut buf = Vec::new();
    generate(shell, &mut cmd, "cloudpuff", &mut buf);
    String::from_utf8(buf).unwrap_or_default()
}

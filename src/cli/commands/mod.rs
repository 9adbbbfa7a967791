//! Subcommands module for the CloudPuff CLI
//!
//! This module contains all the subcommand implementations.

pub mod compile_template;
pub mod create_ami;
pub mod launch_stack;
pub mod list_stacks;
pub mod make_depends;

use std::path::Path;

use anyhow::{bail, Result};
use chrono::Local;
use indexmap::IndexMap;

use crate::cli::output::OutputFormatter;
use crate::cli::GlobalArgs;
use crate::cloudformation::CloudFormation;
use crate::config::Config;
use crate::templates::TemplateCompiler;

/// Common context shared between commands
pub struct CommandContext {
    /// Configuration
    pub config: Config,
    /// Output formatter
    pub output: OutputFormatter,
    /// Only perform read-only operations
    pub dry_run: bool,
    /// Debug output requested
    pub debug: bool,
}

impl CommandContext {
    /// Create a new command context from the global arguments
    pub fn new(global: &GlobalArgs, config: Config) -> Self {
        let output = OutputFormatter::new(!global.no_color && config.output.color);

        Self {
            config,
            output,
            dry_run: global.dry_run,
            debug: global.debug,
        }
    }

    /// Get the region to connect to, falling back to the configured one
    pub fn region<'a>(&'a self, region: Option<&'a str>) -> &'a str {
        region.unwrap_or(self.config.aws.region.as_str())
    }

    /// Connect to CloudFormation using the configured poll interval
    pub async fn cloudformation(&self, region: Option<&str>) -> CloudFormation {
        CloudFormation::connect(self.region(region))
            .await
            .with_poll_interval(self.config.stack_poll_interval())
    }

    /// Report a stack that a dry run would have launched
    pub fn report_dry_run(
        &self,
        action: &str,
        stack_name: &str,
        params: &IndexMap<String, String>,
        tags: &IndexMap<String, String>,
    ) {
        self.output.progress(&format!(
            "Dry run: the stack \"{}\" would be {}.",
            stack_name, action
        ));

        for (heading, values) in [("Parameters", params), ("Tags", tags)] {
            if values.is_empty() {
                continue;
            }

            self.output.labelled(heading, "");
            for (key, value) in values {
                self.output.labelled(&format!("    {}", key), value);
            }
        }
    }
}

/// Compiles a template file, failing if it does not exist.
pub fn load_template(path: &Path, for_amis: bool) -> Result<TemplateCompiler> {
    if !path.exists() {
        bail!("The template file \"{}\" could not be found.", path.display());
    }

    let mut compiler = TemplateCompiler::new(for_amis);
    compiler.load_file(path)?;

    Ok(compiler)
}

/// Appends the current local date and time to a name, as used for new
/// stacks.
pub fn timestamped_name(base_name: &str) -> String {
    format!("{}-{}", base_name, Local::now().format("%Y%m%d%H%M%S"))
}

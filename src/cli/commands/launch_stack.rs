//! Launch-stack command
//!
//! Compiles a template and creates a new stack from it, or updates an
//! existing stack. Missing parameters are prompted for, and parameters
//! looked up from other stacks are filled in before launching.

use super::{load_template, timestamped_name, CommandContext};
use crate::cli::prompt::ParamPrompter;
use crate::cloudformation::{StackEvent, StackRequest, TemplateParameter};
use crate::error::Error;
use crate::params::{collect_template_params, parse_param_args, resolve_stack_params};
use anyhow::{bail, Result};
use clap::Parser;
use indexmap::IndexMap;
use std::path::PathBuf;
use tracing::debug;

/// Arguments for the launch-stack command
#[derive(Parser, Debug, Clone)]
pub struct LaunchStackArgs {
    /// The region to connect to
    #[arg(long)]
    pub region: Option<String>,

    /// Prevents rollback when there are errors launching a stack
    #[arg(long = "no-rollback")]
    pub no_rollback: bool,

    /// Update an existing stack
    #[arg(short = 'u', long)]
    pub update: bool,

    /// Keep all parameters from the old template, if updating. Only unknown
    /// parameters will be prompted for
    #[arg(short = 'k', long)]
    pub keep_params: bool,

    /// The optional name for the stack
    #[arg(long)]
    pub stack_name: Option<String>,

    /// A parameter to pass to the template
    #[arg(long = "param", value_name = "KEY=VALUE", action = clap::ArgAction::Append)]
    pub params: Vec<String>,

    /// The template file to launch from
    #[arg(long, value_name = "FILENAME")]
    pub template: PathBuf,
}

impl LaunchStackArgs {
    /// Execute the launch-stack command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        if self.update && self.stack_name.is_none() {
            bail!("The --update option requires --stack-name.");
        }

        let compiler = load_template(&self.template, false)?;
        let template_body = compiler.to_json()?;

        let cf = ctx.cloudformation(self.region.as_deref()).await;
        let mut template_params = cf.validate_template(&template_body).await?;

        let given = parse_param_args(&self.params)?;
        let lookup_params: Vec<&str> = compiler
            .stack_param_lookups
            .keys()
            .map(String::as_str)
            .collect();
        let prompter = ParamPrompter::new();

        let (stack_name, mut params) = match (&self.stack_name, self.update) {
            (Some(stack_name), true) => {
                let stack = cf.lookup_stack(stack_name).await?;
                let template_keys = apply_stack_defaults(&mut template_params, &stack.parameters);

                if self.keep_params {
                    template_params.retain(|param| !stack.parameters.contains_key(&param.key));
                }

                let mut params = collect_template_params(
                    given,
                    &template_params,
                    &lookup_params,
                    &compiler.required_params,
                    |param, required| prompter.prompt(param, required),
                )?;

                if self.keep_params {
                    for (key, value) in &stack.parameters {
                        if template_keys.contains(key) {
                            params.entry(key.clone()).or_insert_with(|| value.clone());
                        }
                    }
                }

                (stack_name.clone(), params)
            }
            (stack_name, _) => {
                let stack_name = match stack_name {
                    Some(stack_name) => stack_name.clone(),
                    None => timestamped_name(compiler.stack_name()?),
                };

                let params = collect_template_params(
                    given,
                    &template_params,
                    &lookup_params,
                    &compiler.required_params,
                    |param, required| prompter.prompt(param, required),
                )?;

                (stack_name, params)
            }
        };

        resolve_stack_params(&cf, &compiler.stack_param_lookups, &mut params).await?;
        let tags = compiler.get_tags(&params)?;

        let action = if self.update { "updated" } else { "created" };
        if ctx.dry_run {
            ctx.report_dry_run(action, &stack_name, &params, &tags);
            return Ok(0);
        }

        let request = StackRequest {
            stack_name: &stack_name,
            template_body: &template_body,
            params: &params,
            tags: &tags,
            rollback_on_error: !self.no_rollback && ctx.config.stacks.rollback,
            timeout_mins: ctx.config.stacks.timeout_mins,
        };

        let output = &ctx.output;
        let on_event = |event: &StackEvent| output.stack_event(event);

        if self.update {
            output.progress("Updating the CloudFormation stack.");
            output.progress("Please wait. This may take several minutes...");

            match cf.update_stack_and_wait(&request, on_event).await {
                Ok(_) => {}
                Err(Error::StackUpdateNotRequired) => {
                    println!();
                    output.success("The stack is already up-to-date!");
                    return Ok(0);
                }
                Err(err @ Error::StackFailed { .. }) => {
                    debug!("{}", err);
                    eprintln!();
                    output.error("Updating the stack has failed.");
                    eprintln!();
                    eprintln!("You can update the template and try again with:");
                    eprintln!();
                    output.command_hint(&format!(
                        "cloudpuff-launch-stack -u -k --stack-name={} --template {}",
                        stack_name,
                        self.template.display()
                    ));
                    return Ok(1);
                }
                Err(err) => return Err(err.into()),
            }
        } else {
            output.progress("Creating the CloudFormation stack.");
            output.progress("Please wait. This may take several minutes...");

            match cf.create_stack_and_wait(&request, on_event).await {
                Ok(_) => {}
                Err(err @ Error::StackFailed { .. }) => {
                    debug!("{}", err);
                    eprintln!();
                    output.error("Creating the stack has failed.");
                    eprintln!();
                    eprintln!("Delete the stack and try again.");
                    return Ok(1);
                }
                Err(err) => return Err(err.into()),
            }
        }

        println!();
        output.success("The stack has been launched!");
        println!();
        output.labelled("Stack ID", &stack_name);

        Ok(0)
    }
}

/// Uses an existing stack's parameter values as the defaults of the
/// template's parameters. Returns the keys of all template parameters.
fn apply_stack_defaults(
    template_params: &mut [TemplateParameter],
    stack_params: &IndexMap<String, String>,
) -> Vec<String> {
    template_params
        .iter_mut()
        .map(|param| {
            if let Some(value) = stack_params.get(&param.key) {
                param.default_value = Some(value.clone());
            }
            param.key.clone()
        })
        .collect()
}

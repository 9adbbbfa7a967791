//! Create-AMI command
//!
//! Launches a temporary stack from a template and creates AMIs from its EC2
//! instances.
//!
//! Every instance with a `Metadata.CloudPuff.AMINameFormat` value becomes
//! an AMI. The name format accepts variables, references and the
//! placeholders `{yyyy}`, `{mm}`, `{dd}`, `{HH}`, `{MM}` and `{SS}`, which
//! are replaced by the current date and time.
//!
//! An instance can also set `Metadata.CloudPuff.PreviousAMI` to the ID of
//! the last AMI built from it. With `--update-amis-file`, those IDs are
//! replaced by the new ones in the given file.

use super::{load_template, timestamped_name, CommandContext};
use crate::ami::{generate_ami_name, AmiCreator};
use crate::cli::prompt::ParamPrompter;
use crate::cli::output::OutputFormatter;
use crate::cloudformation::{CloudFormation, StackApi, StackEvent, StackInfo, StackRequest};
use crate::error::Error;
use crate::params::{collect_template_params, parse_param_args, resolve_stack_params};
use crate::templates::{generic_stack_name, AmiOutput, TemplateCompiler};
use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::Parser;
use indexmap::IndexMap;
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Tag marking stacks launched only to build AMIs.
pub const AMI_CREATION_TAG: &str = "cloudpuff_ami_creation";

/// Arguments for the create-ami command
#[derive(Parser, Debug, Clone)]
pub struct CreateAmiArgs {
    /// The region to connect to
    #[arg(long)]
    pub region: Option<String>,

    /// Prevents rollback when there are errors launching a stack
    #[arg(long = "no-rollback")]
    pub no_rollback: bool,

    /// A parameter to pass to the template
    #[arg(long = "param", value_name = "KEY=VALUE", action = clap::ArgAction::Append)]
    pub params: Vec<String>,

    /// The template file to launch from
    #[arg(long, value_name = "FILENAME")]
    pub template: PathBuf,

    /// A file containing the former AMI IDs to replace with the new IDs
    #[arg(long, value_name = "FILENAME")]
    pub update_amis_file: Option<PathBuf>,
}

impl CreateAmiArgs {
    /// Execute the create-ami command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let compiler = load_template(&self.template, true)?;
        let template_body = compiler.to_json()?;

        if compiler.ami_outputs.is_empty() {
            bail!(
                "The template must have at least one EC2 instance with a \
                 \"Metadata.CloudPuff.AMINameFormat\" value in order to generate AMIs."
            );
        }

        let cf = ctx.cloudformation(self.region.as_deref()).await;
        let template_params = cf.validate_template(&template_body).await?;

        let lookup_params: Vec<&str> = compiler
            .stack_param_lookups
            .keys()
            .map(String::as_str)
            .collect();
        let prompter = ParamPrompter::new();
        let mut params = collect_template_params(
            parse_param_args(&self.params)?,
            &template_params,
            &lookup_params,
            &compiler.required_params,
            |param, required| prompter.prompt(param, required),
        )?;
        resolve_stack_params(&cf, &compiler.stack_param_lookups, &mut params).await?;

        let stack_name = timestamped_name(&format!(
            "ami-creator-{}",
            generic_stack_name(&self.template)
        ));
        let mut tags = IndexMap::new();
        tags.insert(AMI_CREATION_TAG.to_string(), "1".to_string());

        if ctx.dry_run {
            ctx.report_dry_run("created", &stack_name, &params, &tags);
            for ami_output in &compiler.ami_outputs {
                ctx.output.progress(&format!(
                    "Dry run: an AMI would be created from \"{}\".",
                    ami_output.resource_name
                ));
            }
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
        println!();
        output.progress("Creating the CloudFormation stack.");
        output.progress("Please wait. This may take several minutes...");

        let stack_id = match cf
            .create_stack_and_wait(&request, |event: &StackEvent| output.stack_event(event))
            .await
        {
            Ok(stack_id) => stack_id,
            Err(err @ Error::StackFailed { .. }) => {
                output.error(&format!("Error creating the stack: {}", err));
                return Ok(1);
            }
            Err(err) => return Err(err.into()),
        };

        let ctx: &CommandContext = ctx;
        let compiler = &compiler;
        let id_map = with_temporary_stack(&cf, &stack_id, &ctx.output, |stack| async move {
            self.create_amis(ctx, &stack, compiler).await
        })
        .await?;

        if let Some(amis_file) = &self.update_amis_file {
            if !id_map.is_empty() {
                update_amis_file(amis_file, &id_map)?;
                info!("Updated AMI IDs in {}", amis_file.display());
            }
        }

        Ok(0)
    }

    /// Creates an AMI for each instance listed in the stack outputs and
    /// waits for all of them. Returns a map of previous AMI IDs to new ones.
    async fn create_amis(
        &self,
        ctx: &CommandContext,
        stack: &StackInfo,
        compiler: &TemplateCompiler,
    ) -> Result<IndexMap<String, String>> {
        let description = format!(
            "{} [{}]",
            compiler.description().unwrap_or_default(),
            Local::now().format("%Y-%m-%d")
        );

        let mut creator = AmiCreator::connect(ctx.region(self.region.as_deref())).await;
        let mut id_map = IndexMap::new();

        for ami_output in &compiler.ami_outputs {
            let Some((instance_id, name_format)) = ami_source(ctx, stack, ami_output) else {
                continue;
            };

            let ami_name = generate_ami_name(name_format);
            println!(
                "Creating AMI \"{}\" for EC2 instance \"{}\"",
                ami_name, instance_id
            );

            let pending_ami = creator
                .create_ami(instance_id, &ami_name, &description)
                .await?;

            if let Some(previous_ami) = stack.output(&ami_output.previous_ami_key) {
                debug!("AMI {} replaces {}", pending_ami.id, previous_ami);
                id_map.insert(previous_ami.to_string(), pending_ami.id);
            }
        }

        while creator.pending().await? {
            tokio::time::sleep(ctx.config.ami_poll_interval()).await;
        }

        for ami in creator.amis() {
            if ami.state != "available" {
                ctx.output.error(&format!(
                    "The AMI \"{}\" finished with the state \"{}\".",
                    ami.id, ami.state
                ));
                id_map.retain(|_, new_id| new_id != &ami.id);
            }
        }

        println!();
        println!("All AMIs have been created!");

        Ok(id_map)
    }
}

/// Runs `build` on a stack that exists only for building AMIs, then deletes
/// the stack whatever the outcome.
///
/// A failed deletion is reported but does not replace the result of
/// `build`.
async fn with_temporary_stack<A, F, Fut, T>(
    cf: &CloudFormation<A>,
    stack_id: &str,
    output: &OutputFormatter,
    build: F,
) -> Result<T>
where
    A: StackApi,
    F: FnOnce(StackInfo) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let result = match cf.lookup_stack(stack_id).await {
        Ok(stack) => build(stack).await,
        Err(err) => Err(err.into()),
    };

    if let Err(err) = cf.delete_stack(stack_id).await {
        warn!("Failed to delete stack {}: {}", stack_id, err);
        output.error(&format!(
            "Unable to delete the stack \"{}\": {}. Delete it manually.",
            stack_id, err
        ));
    }

    result
}

/// Returns the instance ID and name format for an AMI, reporting outputs
/// missing from the stack.
fn ami_source<'s>(
    ctx: &CommandContext,
    stack: &'s StackInfo,
    ami_output: &AmiOutput,
) -> Option<(&'s str, &'s str)> {
    let mut found = Vec::with_capacity(2);

    for key in [&ami_output.instance_id_key, &ami_output.name_format_key] {
        match stack.output(key) {
            Some(value) => found.push(value),
            None => ctx.output.error(&format!(
                "Could not create AMI for \"{}\". Output ID \"{}\" was not found.",
                ami_output.resource_name, key
            )),
        }
    }

    match found[..] {
        [instance_id, name_format] => Some((instance_id, name_format)),
        _ => None,
    }
}

/// Replaces previous AMI IDs with new ones in a file.
fn update_amis_file(path: &Path, id_map: &IndexMap<String, String>) -> Result<()> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Unable to read \"{}\"", path.display()))?;

    fs::write(path, replace_ami_ids(&content, id_map))
        .with_context(|| format!("Unable to write to \"{}\"", path.display()))?;

    Ok(())
}

fn replace_ami_ids(content: &str, id_map: &IndexMap<String, String>) -> String {
    id_map
        .iter()
        .fold(content.to_string(), |content, (old_id, new_id)| {
            content.replace(old_id.as_str(), new_id)
        })
}

//! List-stacks command
//!
//! Lists all stacks in a region along with their outputs and tags.

use super::CommandContext;
use crate::cloudformation::StackInfo;
use anyhow::Result;
use clap::Parser;
use indexmap::IndexMap;
use serde_json::{json, Value};

/// Arguments for the list-stacks command
#[derive(Parser, Debug, Clone)]
pub struct ListStacksArgs {
    /// The region to connect to
    #[arg(long)]
    pub region: Option<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Limit results to the given stack name(s)
    #[arg(value_name = "NAME")]
    pub stack_names: Vec<String>,
}

impl ListStacksArgs {
    /// Execute the list-stacks command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let cf = ctx.cloudformation(self.region.as_deref()).await;
        let stacks = cf.lookup_stacks(&[], &IndexMap::new()).await?;
        let stacks = filter_by_name(stacks, &self.stack_names);

        if self.json {
            println!("{}", serde_json::to_string_pretty(&stacks_json(&stacks))?);
        } else {
            ctx.output.stacks(&stacks);
        }

        Ok(0)
    }
}

/// Keeps only the named stacks. An empty list keeps everything.
fn filter_by_name(stacks: Vec<StackInfo>, names: &[String]) -> Vec<StackInfo> {
    if names.is_empty() {
        return stacks;
    }

    stacks
        .into_iter()
        .filter(|stack| names.contains(&stack.stack_name))
        .collect()
}

fn stacks_json(stacks: &[StackInfo]) -> Value {
    stacks
        .iter()
        .map(|stack| {
            json!({
                "name": stack.stack_name,
                "status": stack.status,
                "description": stack.description.as_deref().unwrap_or_default(),
                "arn": stack.stack_id,
                "created": stack.created.map(|created| created.to_rfc3339()).unwrap_or_default(),
                "tags": stack.tags,
                "outputs": stack.outputs,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn stack(name: &str) -> StackInfo {
        StackInfo {
            stack_id: format!("arn:aws:cloudformation:us-east-1:123:stack/{}/1", name),
            stack_name: name.into(),
            status: "CREATE_COMPLETE".into(),
            created: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single(),
            ..Default::default()
        }
    }

    #[test]
    fn test_filter_by_name() {
        let stacks = vec![stack("web"), stack("db"), stack("cache")];

        let names: Vec<String> = filter_by_name(stacks.clone(), &["db".into(), "web".into()])
            .into_iter()
            .map(|stack| stack.stack_name)
            .collect();
        assert_eq!(names, vec!["web", "db"]);

        assert_eq!(filter_by_name(stacks, &[]).len(), 3);
    }

    #[test]
    fn test_stacks_json() {
        let mut web = stack("web");
        web.outputs.insert("Url".into(), "https://example.com".into());

        assert_eq!(
            stacks_json(&[web]),
            json!([{
                "name": "web",
                "status": "CREATE_COMPLETE",
                "description": "",
                "arn": "arn:aws:cloudformation:us-east-1:123:stack/web/1",
                "created": "2024-05-01T12:00:00+00:00",
                "tags": {},
                "outputs": {"Url": "https://example.com"},
            }])
        );
    }
}

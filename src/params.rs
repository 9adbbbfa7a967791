//! Stack parameter handling shared by the launching commands.

use std::collections::HashMap;

use indexmap::IndexMap;
use tracing::debug;

use crate::cloudformation::{StackSource, TemplateParameter, USABLE_STACK_STATUSES};
use crate::error::{Error, Result};
use crate::templates::StackParamLookup;

/// Parses `KEY=VALUE` command line parameters.
///
/// Later values override earlier ones.
pub fn parse_param_args<S: AsRef<str>>(args: &[S]) -> Result<IndexMap<String, String>> {
    args.iter()
        .map(|arg| {
            let arg = arg.as_ref();
            let (key, value) = arg.split_once('=').ok_or_else(|| {
                Error::InvalidInput(format!(
                    "Invalid parameter \"{}\": expected KEY=VALUE",
                    arg
                ))
            })?;

            if key.is_empty() {
                return Err(Error::InvalidInput(format!(
                    "Invalid parameter \"{}\": the key is empty",
                    arg
                )));
            }

            Ok((key.to_string(), value.to_string()))
        })
        .collect()
}

/// Collects a value for every parameter declared by a template.
///
/// Values given on the command line win. Parameters listed in `ignore` are
/// skipped since they are filled in later from other stacks. Everything
/// else is asked for through `prompt`, along with whether the parameter is
/// required (parameters missing from `required_params` are).
pub fn collect_template_params<F>(
    mut params: IndexMap<String, String>,
    template_params: &[TemplateParameter],
    ignore: &[&str],
    required_params: &IndexMap<String, bool>,
    mut prompt: F,
) -> Result<IndexMap<String, String>>
where
    F: FnMut(&TemplateParameter, bool) -> Result<String>,
{
    for template_param in template_params {
        let key = template_param.key.as_str();

        if params.contains_key(key) || ignore.contains(&key) {
            continue;
        }

        let required = required_params.get(key).copied().unwrap_or(true);
        let value = prompt(template_param, required)?;
        params.insert(key.to_string(), value);
    }

    Ok(params)
}

/// Fills in parameters whose values come from other stacks' outputs.
///
/// Each lookup finds the single usable stack tagged with the lookup's
/// generic stack name and with tags matching the listed parameters, then
/// copies the named output. Stacks are looked up once per distinct set of
/// tags.
pub async fn resolve_stack_params(
    source: &dyn StackSource,
    lookups: &IndexMap<String, StackParamLookup>,
    params: &mut IndexMap<String, String>,
) -> Result<()> {
    let mut cache: HashMap<Vec<(String, String)>, IndexMap<String, String>> = HashMap::new();

    for (param_name, lookup) in lookups {
        let mut required_tags = IndexMap::new();
        required_tags.insert("GenericStackName".to_string(), lookup.stack_name.clone());

        for tag_name in &lookup.match_stack_tags {
            let value = params.get(tag_name).ok_or_else(|| {
                Error::InvalidInput(format!(
                    "The parameter \"{}\" needs a value to look up the stack \"{}\" for \"{}\"",
                    tag_name, lookup.stack_name, param_name
                ))
            })?;
            required_tags.insert(tag_name.clone(), value.clone());
        }

        let cache_key: Vec<(String, String)> = required_tags
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        if !cache.contains_key(&cache_key) {
            let mut stacks = source
                .lookup_stacks(&USABLE_STACK_STATUSES, &required_tags)
                .await?;

            let stack = match stacks.len() {
                0 => {
                    return Err(Error::StackLookup(format!(
                        "Could not find a stack \"{}\", as needed by the stack parameter \"{}\"",
                        lookup.stack_name, param_name
                    )))
                }
                1 => stacks.remove(0),
                _ => {
                    return Err(Error::StackLookup(format!(
                        "There were too many stacks named \"{}\" matching the criteria for \
                         the stack parameter \"{}\"",
                        lookup.stack_name, param_name
                    )))
                }
            };

            debug!("Using stack {} for parameter {}", stack.stack_name, param_name);
            cache.insert(cache_key.clone(), stack.outputs);
        }

        let value = cache
            .get(&cache_key)
            .and_then(|outputs| outputs.get(&lookup.output_name))
            .ok_or_else(|| Error::OutputNotFound {
                stack: lookup.stack_name.clone(),
                output: lookup.output_name.clone(),
            })?;

        params.insert(param_name.clone(), value.clone());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloudformation::{stack_has_tags, StackInfo};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakeStacks {
        stacks: Vec<StackInfo>,
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl StackSource for FakeStacks {
        async fn lookup_stacks(
            &self,
            statuses: &[&str],
            tags: &IndexMap<String, String>,
        ) -> Result<Vec<StackInfo>> {
            *self.calls.lock().unwrap() += 1;
            Ok(self
                .stacks
                .iter()
                .filter(|stack| statuses.contains(&stack.status.as_str()))
                .filter(|stack| stack_has_tags(&stack.tags, tags))
                .cloned()
                .collect())
        }
    }

    fn stack(name: &str, env: &str, outputs: &[(&str, &str)]) -> StackInfo {
        StackInfo {
            stack_name: format!("{}-{}", name, env),
            status: "CREATE_COMPLETE".into(),
            tags: [
                ("GenericStackName".to_string(), name.to_string()),
                ("Environment".to_string(), env.to_string()),
            ]
            .into_iter()
            .collect(),
            outputs: outputs
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
            ..Default::default()
        }
    }

    fn lookup(output: &str) -> StackParamLookup {
        StackParamLookup {
            stack_name: "network".into(),
            output_name: output.into(),
            match_stack_tags: vec!["Environment".into()],
        }
    }

    #[test]
    fn test_parse_param_args() {
        let params = parse_param_args(&["a=1", "b=x=y", "a=2", "empty="]).unwrap();
        assert_eq!(params["a"], "2");
        assert_eq!(params["b"], "x=y");
        assert_eq!(params["empty"], "");
        assert_eq!(params.len(), 3);

        assert!(parse_param_args(&["novalue"]).is_err());
        assert!(parse_param_args(&["=value"]).is_err());
    }

    fn template_param(key: &str, default_value: Option<&str>) -> TemplateParameter {
        TemplateParameter {
            key: key.into(),
            default_value: default_value.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_collect_template_params() {
        let given = parse_param_args(&["KeyName=ops"]).unwrap();
        let template_params = vec![
            template_param("KeyName", None),
            template_param("InstanceType", Some("t3.micro")),
            template_param("VpcId", None),
            template_param("Notes", None),
        ];
        let mut required_params = IndexMap::new();
        required_params.insert("Notes".to_string(), false);

        let mut asked = Vec::new();
        let params = collect_template_params(
            given,
            &template_params,
            &["VpcId"],
            &required_params,
            |param, required| {
                asked.push((param.key.clone(), required));
                Ok(param.default_value.clone().unwrap_or_default())
            },
        )
        .unwrap();

        assert_eq!(
            asked,
            vec![("InstanceType".to_string(), true), ("Notes".to_string(), false)]
        );
        assert_eq!(params["KeyName"], "ops");
        assert_eq!(params["InstanceType"], "t3.micro");
        assert_eq!(params["Notes"], "");
        assert!(!params.contains_key("VpcId"));
    }

    #[tokio::test]
    async fn test_resolve_stack_params() {
        let source = FakeStacks {
            stacks: vec![
                stack("network", "prod", &[("VpcId", "vpc-prod"), ("SubnetId", "subnet-prod")]),
                stack("network", "staging", &[("VpcId", "vpc-staging")]),
            ],
            calls: Mutex::new(0),
        };

        let mut lookups = IndexMap::new();
        lookups.insert("VpcId".to_string(), lookup("VpcId"));
        lookups.insert("SubnetId".to_string(), lookup("SubnetId"));

        let mut params = IndexMap::new();
        params.insert("Environment".to_string(), "prod".to_string());

        resolve_stack_params(&source, &lookups, &mut params).await.unwrap();

        assert_eq!(params["VpcId"], "vpc-prod");
        assert_eq!(params["SubnetId"], "subnet-prod");
        assert_eq!(*source.calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_resolve_stack_params_errors() {
        let source = FakeStacks {
            stacks: vec![
                stack("network", "prod", &[("VpcId", "vpc-prod")]),
                stack("network", "prod", &[("VpcId", "vpc-prod-2")]),
                stack("network", "staging", &[("VpcId", "vpc-staging")]),
            ],
            calls: Mutex::new(0),
        };

        let mut lookups = IndexMap::new();
        lookups.insert("VpcId".to_string(), lookup("VpcId"));

        let mut params = IndexMap::new();
        let err = resolve_stack_params(&source, &lookups, &mut params)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        params.insert("Environment".to_string(), "prod".to_string());
        let err = resolve_stack_params(&source, &lookups, &mut params)
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("There were too many stacks"));

        params.insert("Environment".to_string(), "dev".to_string());
        let err = resolve_stack_params(&source, &lookups, &mut params)
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("Could not find a stack \"network\""));

        let mut lookups = IndexMap::new();
        lookups.insert("SubnetId".to_string(), lookup("SubnetId"));
        params.insert("Environment".to_string(), "staging".to_string());
        let err = resolve_stack_params(&source, &lookups, &mut params)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unable to find the output \"SubnetId\" in the stack \"network\""
        );
    }
}

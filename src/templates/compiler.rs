//! Compiles CloudPuff templates into CloudFormation templates.

use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map as JsonMap, Value as JsonValue};
use tracing::debug;

use super::node::{Key, Map, Node};
use super::reader::TemplateReader;
use super::state::ProcessOptions;
use crate::error::{Error, Result};

/// Value of `AWSTemplateFormatVersion` in every compiled template.
pub const TEMPLATE_FORMAT_VERSION: &str = "2010-09-09";

/// Top-level sections copied into the compiled template, in output order.
pub const SECTIONS: [&str; 5] = ["Parameters", "Mappings", "Conditions", "Resources", "Outputs"];

/// Variable set to `"true"` while compiling a template for AMI creation.
pub const BUILDING_AMIS_VARIABLE: &str = "buildingAMIs";

/// Stack outputs generated for an instance that AMIs are built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmiOutput {
    /// Logical name of the instance resource
    pub resource_name: String,
    /// Output holding the instance ID
    pub instance_id_key: String,
    /// Output holding the AMI name format
    pub name_format_key: String,
    /// Output holding the previous AMI ID, when the template declares one
    pub previous_ami_key: String,
}

impl AmiOutput {
    pub fn new(resource_name: &str) -> Self {
        Self {
            resource_name: resource_name.to_string(),
            instance_id_key: format!("CloudPuff{}InstanceID", resource_name),
            name_format_key: format!("CloudPuff{}AMINameFormat", resource_name),
            previous_ami_key: format!("CloudPuff{}PreviousAMI", resource_name),
        }
    }
}

/// A parameter whose value comes from the output of another stack.
///
/// Declared in a template parameter as:
///
/// ```yaml
/// Parameters:
///   VpcId:
///     Type: String
///     LookupFromStack:
///       StackName: network
///       OutputName: VpcId
///       MatchStackTags: [Environment]
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackParamLookup {
    /// Generic name of the stack to read from
    pub stack_name: String,
    /// Output of that stack providing the value
    pub output_name: String,
    /// Parameters whose values must match tags of the same name on the stack
    pub match_stack_tags: Vec<String>,
}

impl StackParamLookup {
    fn from_node(param_name: &str, node: &Node) -> Result<Self> {
        let field = |name: &str| -> Result<String> {
            node.get(name)
                .and_then(Node::as_str)
                .map(str::to_string)
                .ok_or_else(|| {
                    Error::template(format!(
                        "Missing \"{}\" in LookupFromStack for parameter \"{}\"",
                        name, param_name
                    ))
                })
        };

        let match_stack_tags = match node.get("MatchStackTags") {
            None | Some(Node::Null) => Vec::new(),
            Some(Node::Str(tag)) => vec![tag.clone()],
            Some(tags) => tags
                .as_list()
                .unwrap_or_default()
                .iter()
                .map(|tag| {
                    tag.as_str().map(str::to_string).ok_or_else(|| {
                        Error::template(format!(
                            "MatchStackTags for parameter \"{}\" must be a list of names",
                            param_name
                        ))
                    })
                })
                .collect::<Result<Vec<_>>>()?,
        };

        Ok(Self {
            stack_name: field("StackName")?,
            output_name: field("OutputName")?,
            match_stack_tags,
        })
    }
}

/// Compiles a CloudPuff template to a CloudFormation template.
///
/// The compiled template is available through [`TemplateCompiler::doc`]
/// and [`TemplateCompiler::to_json`].
#[derive(Debug, Default)]
pub struct TemplateCompiler {
    /// Whether the template is compiled for AMI creation
    pub for_amis: bool,
    /// Compiled CloudFormation document
    pub doc: JsonMap<String, JsonValue>,
    /// The template's `Meta` section, with `Name` filled in
    pub meta: JsonMap<String, JsonValue>,
    /// Outputs to read AMI information from (only when compiling for AMIs)
    pub ami_outputs: Vec<AmiOutput>,
    /// Parameters to look up from other stacks' outputs
    pub stack_param_lookups: IndexMap<String, StackParamLookup>,
    /// Whether each parameter requires a non-empty value
    pub required_params: IndexMap<String, bool>,
}

impl TemplateCompiler {
    pub fn new(for_amis: bool) -> Self {
        Self {
            for_amis,
            ..Self::default()
        }
    }

    /// Compiles a template file.
    ///
    /// The generic stack name defaults to the file name (see
    /// [`generic_stack_name`]) and imports resolve relative to the file.
    pub fn load_file(&mut self, path: &Path) -> Result<()> {
        let source = fs::read_to_string(path)?;
        let stack_name = generic_stack_name(path);
        let base_dir = path.parent().filter(|dir| !dir.as_os_str().is_empty());

        self.load_string(&source, Some(&stack_name), Some(path), base_dir)
    }

    /// Compiles a template from a string.
    ///
    /// `stack_name` is the generic stack name used when the template has no
    /// `Meta.Name`.
    pub fn load_string(
        &mut self,
        source: &str,
        stack_name: Option<&str>,
        filename: Option<&Path>,
        base_dir: Option<&Path>,
    ) -> Result<()> {
        let mut reader = TemplateReader::new();
        let building_amis = if self.for_amis { "true" } else { "false" };
        reader
            .state
            .variables
            .insert(Key::from(BUILDING_AMIS_VARIABLE), Node::str(building_amis));

        reader.load_string(source, base_dir, filename)?;

        self.compile(reader, stack_name).map_err(|err| match filename {
            Some(filename) => err.with_filename(filename),
            None => err,
        })
    }

    fn compile(&mut self, reader: TemplateReader, stack_name: Option<&str>) -> Result<()> {
        let TemplateReader { mut doc, mut state } = reader;

        let mut meta = match doc.shift_remove(&Key::from("Meta")) {
            None | Some(Node::Null) => JsonMap::new(),
            Some(node @ Node::Map(_)) => match node.to_json()? {
                JsonValue::Object(meta) => meta,
                _ => JsonMap::new(),
            },
            Some(other) => {
                return Err(Error::template(format!(
                    "The Meta section must be a mapping, found {}",
                    other.kind()
                )))
            }
        };

        if !meta.contains_key("Name") {
            if let Some(stack_name) = stack_name {
                meta.insert("Name".into(), JsonValue::String(stack_name.to_string()));
            }
        }

        let mut compiled = JsonMap::new();
        compiled.insert(
            "AWSTemplateFormatVersion".into(),
            JsonValue::String(TEMPLATE_FORMAT_VERSION.to_string()),
        );

        if let Some(description) = meta.get("Description") {
            let mut description = description
                .as_str()
                .ok_or_else(|| Error::template("Meta.Description must be a string"))?
                .to_string();

            if let Some(version) = meta.get("Version") {
                description.push_str(&format!(" [v{}]", json_text(version)));
            }

            compiled.insert("Description".into(), JsonValue::String(description));
        }

        let mut sections: IndexMap<&str, Map> = IndexMap::new();

        for section in SECTIONS {
            let node = doc.shift_remove(&Key::from(section)).unwrap_or(Node::Null);

            // Inline If conditions are only valid where CloudFormation
            // evaluates conditions.
            let node = if section == "Conditions" || section == "Resources" {
                state.process_tree(node, None, ProcessOptions::HOIST_CONDITIONS)?
            } else {
                node
            };

            let map = match node {
                Node::Null => Map::new(),
                Node::Map(map) => map,
                other => {
                    return Err(Error::template(format!(
                        "The {} section must be a mapping, found {}",
                        section,
                        other.kind()
                    )))
                }
            };

            sections.insert(section, map);
        }

        for key in doc.keys() {
            debug!("Dropping unknown top-level key \"{}\"", key);
        }

        if let Some(conditions) = sections.get_mut("Conditions") {
            for (name, condition) in state.if_conditions.drain(..) {
                conditions.insert(Key::Text(name), condition);
            }
        }

        if let Some(parameters) = sections.get_mut("Parameters") {
            self.post_process_params(parameters)?;
        }

        let new_outputs = match sections.get("Resources") {
            Some(resources) => self.scan_cloudpuff_metadata(resources),
            None => Map::new(),
        };

        if let Some(outputs) = sections.get_mut("Outputs") {
            outputs.extend(new_outputs);
        }

        for (section, map) in sections {
            if !map.is_empty() {
                compiled.insert(section.to_string(), Node::Map(map).to_json()?);
            }
        }

        self.doc = compiled;
        self.meta = meta;

        Ok(())
    }

    /// Records and strips the CloudPuff-only keys of every parameter.
    fn post_process_params(&mut self, parameters: &mut Map) -> Result<()> {
        for (key, param) in parameters.iter_mut() {
            let name = key.to_string();
            let param = param.as_map_mut().ok_or_else(|| {
                Error::template(format!("Parameter \"{}\" must be a mapping", name))
            })?;

            if let Some(lookup) = param.shift_remove(&Key::from("LookupFromStack")) {
                if !lookup.is_blank() {
                    let lookup = StackParamLookup::from_node(&name, &lookup)?;
                    self.stack_param_lookups.insert(name.clone(), lookup);
                }
            }

            let required = match param.shift_remove(&Key::from("Required")) {
                None | Some(Node::Null) => true,
                Some(Node::Str(value)) => value.eq_ignore_ascii_case("true"),
                Some(other) => {
                    return Err(Error::template(format!(
                        "Required for parameter \"{}\" must be true or false, found {}",
                        name,
                        other.kind()
                    )))
                }
            };

            self.required_params.insert(name, required);
        }

        Ok(())
    }

    /// Finds instances with `Metadata.CloudPuff.AMINameFormat`.
    ///
    /// When compiling for AMIs, returns the outputs to add to the template
    /// and records them in [`TemplateCompiler::ami_outputs`].
    fn scan_cloudpuff_metadata(&mut self, resources: &Map) -> Map {
        let mut outputs = Map::new();

        if !self.for_amis {
            return outputs;
        }

        for (key, resource) in resources {
            if resource.get("Type").and_then(Node::as_str) != Some("AWS::EC2::Instance") {
                continue;
            }

            let Some(metadata) = resource.get("Metadata").and_then(|m| m.get("CloudPuff")) else {
                continue;
            };

            let Some(name_format) = metadata.get("AMINameFormat") else {
                continue;
            };

            let resource_name = key.to_string();
            let ami_output = AmiOutput::new(&resource_name);

            outputs.insert(
                Key::Text(ami_output.instance_id_key.clone()),
                Node::map([
                    ("Description", Node::str(format!("Instance ID for {}", resource_name))),
                    ("Value", Node::reference(Node::str(resource_name.as_str()))),
                ]),
            );
            outputs.insert(
                Key::Text(ami_output.name_format_key.clone()),
                Node::map([
                    (
                        "Description",
                        Node::str(format!("Name format for the AMI for {}", resource_name)),
                    ),
                    ("Value", name_format.clone()),
                ]),
            );

            if let Some(previous_ami) = metadata.get("PreviousAMI") {
                outputs.insert(
                    Key::Text(ami_output.previous_ami_key.clone()),
                    Node::map([
                        (
                            "Description",
                            Node::str(format!("Previous AMI ID created for {}", resource_name)),
                        ),
                        ("Value", previous_ami.clone()),
                    ]),
                );
            }

            debug!("Instance {} will be used to create an AMI", resource_name);
            self.ami_outputs.push(ami_output);
        }

        outputs
    }

    /// Returns the generic stack name, from `Meta.Name` or the file name.
    pub fn stack_name(&self) -> Result<&str> {
        self.meta
            .get("Name")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| Error::template("The template does not define Meta.Name"))
    }

    /// Returns the description of the compiled template, if any.
    pub fn description(&self) -> Option<&str> {
        self.doc.get("Description").and_then(JsonValue::as_str)
    }

    /// Renders the compiled template as JSON indented by four spaces.
    pub fn to_json(&self) -> Result<String> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.doc.serialize(&mut serializer)?;

        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Returns the tags to apply to a stack launched from this template.
    ///
    /// `Meta.Tags` values written as `@@Param` take the value of that stack
    /// parameter.
    pub fn get_tags(&self, params: &IndexMap<String, String>) -> Result<IndexMap<String, String>> {
        let mut tags = IndexMap::new();
        tags.insert("GenericStackName".to_string(), self.stack_name()?.to_string());

        if let Some(version) = self.meta.get("Version") {
            tags.insert("StackVersion".to_string(), json_text(version));
        }

        let meta_tags = match self.meta.get("Tags") {
            None | Some(JsonValue::Null) => return Ok(tags),
            Some(JsonValue::Object(meta_tags)) => meta_tags,
            Some(_) => return Err(Error::template("Meta.Tags must be a mapping")),
        };

        for (name, value) in meta_tags {
            let value = match value {
                JsonValue::String(value) => value.clone(),
                JsonValue::Object(object) if object.len() == 1 && object.contains_key("Ref") => {
                    let param = object.get("Ref").and_then(JsonValue::as_str).unwrap_or_default();
                    params.get(param).cloned().ok_or_else(|| Error::InvalidTag {
                        tag: name.clone(),
                        message: format!("the parameter \"{}\" has no value", param),
                    })?
                }
                other => {
                    return Err(Error::InvalidTag {
                        tag: name.clone(),
                        message: format!("expected a string, found {}", other),
                    })
                }
            };

            tags.insert(name.clone(), value);
        }

        Ok(tags)
    }
}

/// Derives the generic stack name from a template file name.
///
/// The extension is dropped and `_` and `.` become `-`, so
/// `web_server.prod.yaml` becomes `web-server-prod`.
pub fn generic_stack_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().replace(['_', '.'], "-"))
        .unwrap_or_default()
}

fn json_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(text) => text.clone(),
        other => other.to_string(),
    }
}

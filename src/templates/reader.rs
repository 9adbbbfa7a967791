//! YAML template reader.
//!
//! A template is a stream of YAML documents sharing one [`TemplateState`]:
//!
//! - `--- !vars` documents define variables. Variables may reference other
//!   variables of the same document.
//! - `--- !macros` documents define macros (`content` plus optional
//!   `defaultParams`), callable with `!call-macro`.
//! - Every other document is merged into [`TemplateReader::doc`].
//!
//! Mapping order is preserved, scalars that are not strings are read as
//! strings, and every string goes through the [`StringParser`]. A key named
//! `<` merges its mapping value into the enclosing mapping, which also works
//! for the result of `!call-macro`.
//!
//! Supported tags: `!import`, `!embed-file`, `!call-macro`, `!cloud-init`
//! and `!tags`.

use std::fs;
use std::path::{Component, Path, PathBuf};

use rand::Rng;
use serde::Deserialize;
use serde_yaml::value::TaggedValue;
use serde_yaml::{Mapping, Value};
use tracing::{debug, trace};

use super::node::{Key, Map, Node};
use super::state::{resolve, ProcessOptions, TemplateState};
use super::string_parser::StringParser;
use crate::error::{Error, Result};

/// Upper bound on passes made to resolve references inside a `!vars`
/// document.
const MAX_VARIABLE_PASSES: usize = 64;

/// Reads template files into a [`Node`] tree.
#[derive(Debug, Default)]
pub struct TemplateReader {
    /// Merged content of all regular documents.
    pub doc: Map,
    /// Variables, macros and bookkeeping shared by all documents.
    pub state: TemplateState,
}

impl TemplateReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a template from a file.
    ///
    /// Imports are resolved relative to the file's directory.
    pub fn load_file(&mut self, path: &Path) -> Result<()> {
        let source = fs::read_to_string(path)?;
        let base_dir = path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .map(Path::to_path_buf);

        self.load_string(&source, base_dir.as_deref(), Some(path))
    }

    /// Loads a template from a string.
    ///
    /// `base_dir` is used to resolve `!import` paths and `filename` to
    /// report errors.
    pub fn load_string(
        &mut self,
        source: &str,
        base_dir: Option<&Path>,
        filename: Option<&Path>,
    ) -> Result<()> {
        if let Some(filename) = filename {
            self.state.filename = Some(filename.to_path_buf());
        }

        if let Some(base_dir) = base_dir {
            self.state.base_dir = Some(base_dir.to_path_buf());
        }

        for document in serde_yaml::Deserializer::from_str(source) {
            let value = Value::deserialize(document)
                .map_err(|err| syntax_error(&err, source, filename))?;

            self.load_document(value).map_err(|err| match filename {
                Some(filename) => err.with_filename(filename),
                None => err,
            })?;
        }

        Ok(())
    }

    fn load_document(&mut self, value: Value) -> Result<()> {
        match value {
            Value::Null => Ok(()),
            Value::Tagged(tagged) => {
                let tag = tag_name(&tagged);

                match tag.as_str() {
                    "vars" => {
                        let doc = self.construct_document(tagged.value, "!vars")?;
                        let doc = self.resolve_variables(doc)?;
                        trace!("Loaded {} variables", doc.len());
                        self.state.variables.extend(doc);
                        Ok(())
                    }
                    "macros" => {
                        let doc = self.construct_document(tagged.value, "!macros")?;
                        trace!("Loaded {} macros", doc.len());
                        self.state.macros.extend(doc);
                        Ok(())
                    }
                    _ => {
                        let node = self.construct_tagged(*tagged)?;
                        self.merge_document(node)
                    }
                }
            }
            other => {
                let node = self.construct(other)?;
                self.merge_document(node)
            }
        }
    }

    fn construct_document(&mut self, value: Value, kind: &str) -> Result<Map> {
        match value {
            Value::Null => Ok(Map::new()),
            Value::Mapping(mapping) => self.construct_mapping(mapping),
            _ => Err(Error::template(format!(
                "{} documents must be mappings",
                kind
            ))),
        }
    }

    fn merge_document(&mut self, node: Node) -> Result<()> {
        match node {
            Node::Null => Ok(()),
            Node::Map(map) => {
                self.doc.extend(map);
                Ok(())
            }
            other => Err(Error::template(format!(
                "Template documents must be mappings, found {}",
                other.kind()
            ))),
        }
    }

    /// Resolves references between variables of one `!vars` document,
    /// repeating until the set of unresolved variables stops changing.
    fn resolve_variables(&mut self, mut doc: Map) -> Result<Map> {
        let mut previous = None;

        for _ in 0..MAX_VARIABLE_PASSES {
            if previous.as_ref() == Some(&self.state.unresolved_variables) {
                break;
            }

            let variables = doc.clone();
            doc = match self.state.process_tree(
                Node::Map(doc),
                Some(&variables),
                ProcessOptions::RESOLVE,
            )? {
                Node::Map(map) => map,
                other => {
                    return Err(Error::template(format!(
                        "!vars documents must be mappings, found {}",
                        other.kind()
                    )))
                }
            };
            previous = Some(self.state.unresolved_variables.clone());
        }

        Ok(doc)
    }

    fn parse_string(&mut self, s: &str) -> Result<Node> {
        StringParser::new(&mut self.state).parse_string(s)
    }

    fn construct(&mut self, value: Value) -> Result<Node> {
        match value {
            Value::Null => Ok(Node::Null),
            Value::Bool(b) => Ok(Node::Str(b.to_string())),
            Value::Number(n) => Ok(Node::Str(n.to_string())),
            Value::String(s) => self.parse_string(&s),
            Value::Sequence(items) => items
                .into_iter()
                .map(|item| self.construct(item))
                .collect::<Result<Vec<_>>>()
                .map(Node::List),
            Value::Mapping(mapping) => self.construct_mapping(mapping).map(Node::Map),
            Value::Tagged(tagged) => self.construct_tagged(*tagged),
        }
    }

    fn construct_key(&mut self, key: Value) -> Result<Key> {
        match key {
            Value::String(s) => {
                let node = self.parse_string(&s)?;
                Key::from_node(node)
            }
            Value::Bool(b) => Ok(Key::Text(b.to_string())),
            Value::Number(n) => Ok(Key::Text(n.to_string())),
            Value::Null => Ok(Key::Text(String::new())),
            _ => Err(Error::template("Mapping keys must be strings")),
        }
    }

    fn construct_mapping(&mut self, mapping: Mapping) -> Result<Map> {
        let (merges, entries): (Vec<_>, Vec<_>) = mapping
            .into_iter()
            .partition(|(key, _)| matches!(key, Value::String(s) if s == "<<"));

        let mut result = Map::new();

        // YAML merge keys: earlier sources win, explicit keys override.
        for (_, value) in merges {
            let sources = match value {
                Value::Sequence(items) => items,
                other => vec![other],
            };

            for source in sources {
                match self.construct(source)? {
                    Node::Map(map) => {
                        for (key, value) in map {
                            result.entry(key).or_insert(value);
                        }
                    }
                    other => {
                        return Err(Error::template(format!(
                            "Expected a mapping to merge, found {}",
                            other.kind()
                        )))
                    }
                }
            }
        }

        for (key, value) in entries {
            let key = self.construct_key(key)?;
            let value = self.construct(value)?;

            if key.as_str() == Some("<") {
                match value {
                    Node::Map(map) => result.extend(map),
                    Node::Null => {}
                    other => {
                        return Err(Error::template(format!(
                            "The value of a \"<\" key must be a mapping, found {}",
                            other.kind()
                        )))
                    }
                }
            } else {
                result.insert(key, value);
            }
        }

        Ok(result)
    }

    fn construct_tagged(&mut self, tagged: TaggedValue) -> Result<Node> {
        let tag = tag_name(&tagged);

        match tag.as_str() {
            "import" => self.construct_import(tagged.value),
            "embed-file" => self.construct_embed_file(tagged.value),
            "call-macro" => self.construct_call_macro(tagged.value),
            "cloud-init" => self.construct_cloud_init(tagged.value),
            "tags" => self.construct_tags(tagged.value),
            "vars" | "macros" => Err(Error::template(format!(
                "!{} can only be used on a document",
                tag
            ))),
            _ => Err(Error::template(format!("Unknown tag !{}", tag))),
        }
    }

    fn construct_tag_mapping(&mut self, value: Value, tag: &str) -> Result<Map> {
        match value {
            Value::Mapping(mapping) => self.construct_mapping(mapping),
            Value::Null => Ok(Map::new()),
            _ => Err(Error::template(format!("{} expects a mapping", tag))),
        }
    }

    fn construct_import(&mut self, value: Value) -> Result<Node> {
        let filenames = match value {
            Value::String(s) => s,
            _ => return Err(Error::template("!import expects a list of file names")),
        };

        for name in filenames.split_whitespace() {
            let mut path = PathBuf::from(name);

            if path.is_relative() {
                if let Some(base_dir) = &self.state.base_dir {
                    path = base_dir.join(path);
                }
            }

            if path.is_dir() {
                path = path.join("__main__.yaml");
            }

            let path = normalize_path(&path);
            debug!("Importing {}", path.display());
            self.state.imported_files.insert(path.clone());

            let mut reader = TemplateReader::new();
            reader.load_file(&path).map_err(|err| match err {
                Error::Io(err) => Error::template(format!(
                    "Unable to import file \"{}\": {}",
                    path.display(),
                    err
                )),
                other => other,
            })?;

            self.state.update(reader.state);
        }

        Ok(Node::Null)
    }

    fn construct_embed_file(&mut self, value: Value) -> Result<Node> {
        let values = self.construct_tag_mapping(value, "!embed-file")?;

        let filename = match values.get(&Key::from("filename")) {
            Some(Node::Str(filename)) if !filename.is_empty() => PathBuf::from(filename),
            _ => return Err(Error::template("Missing filename in !embed-file")),
        };

        let base64 = values
            .get(&Key::from("base64"))
            .and_then(Node::as_str)
            .is_some_and(is_truthy);

        debug!("Embedding {}", filename.display());
        self.state.embedded_files.insert(filename.clone());

        let content = fs::read_to_string(&filename).map_err(|_| {
            Error::template(format!(
                "Unable to read file \"{}\" for embedding",
                filename.display()
            ))
        })?;

        let lines = content.split_inclusive('\n').map(Node::str).collect();
        let result = Node::join(lines);

        if base64 {
            Ok(Node::func("Fn::Base64", result))
        } else {
            Ok(result)
        }
    }

    fn construct_call_macro(&mut self, value: Value) -> Result<Node> {
        let mut values = self.construct_tag_mapping(value, "!call-macro")?;

        let name = match values.shift_remove(&Key::from("macro")) {
            Some(Node::Str(name)) => name,
            _ => return Err(Error::template("Missing macro name in !call-macro")),
        };

        let invalid = || Error::template(format!("\"{}\" is not a valid macro", name));
        let definition = resolve(&name, &self.state.macros).map_err(|_| invalid())?;
        let content = definition.get("content").cloned().ok_or_else(invalid)?;

        let mut variables = self.state.variables.clone();

        if let Some(Node::Map(defaults)) = definition.get("defaultParams") {
            variables.extend(defaults.clone());
        }

        variables.extend(values);

        trace!("Expanding macro {}", name);
        self.state
            .process_tree(content, Some(&variables), ProcessOptions::RESOLVE)
    }

    fn construct_cloud_init(&mut self, value: Value) -> Result<Node> {
        let mut children = self.construct_tag_mapping(value, "!cloud-init")?;
        let mut parts = Vec::new();

        if let Some(config) = children.shift_remove(&Key::from("config")) {
            parts.push(("text/cloud-config", "cloud.cfg", config));
        }

        if let Some(script) = children.shift_remove(&Key::from("script")) {
            parts.push(("text/x-shellscript", "script.sh", script));
        }

        if parts.len() <= 1 {
            let (_, _, content) = parts
                .pop()
                .ok_or_else(|| Error::template("!cloud-init requires a config or a script"))?;
            return Ok(Node::func("Fn::Base64", content));
        }

        let token: u64 = rand::thread_rng().gen_range(0..i64::MAX as u64);
        let boundary = format!("{}{:019}==", "=".repeat(15), token);

        let mut lines = vec![
            Node::str(format!(
                "Content-Type: multipart/mixed; boundary=\"{}\"\n",
                boundary
            )),
            Node::str("MIME-Version: 1.0\n"),
            Node::str("\n"),
        ];

        for (content_type, filename, content) in parts {
            lines.push(Node::str(format!("--{}\n", boundary)));
            lines.push(Node::str(format!("Content-Type: {}\n", content_type)));
            lines.push(Node::str("MIME-Version: 1.0\n"));
            lines.push(Node::str(format!(
                "Content-Disposition: attachment; filename=\"{}\"\n",
                filename
            )));
            lines.push(Node::str("\n"));
            lines.extend(mime_content(content));
        }

        lines.push(Node::str(format!("--{}--\n", boundary)));

        Ok(Node::func("Fn::Base64", Node::join(lines)))
    }

    fn construct_tags(&mut self, value: Value) -> Result<Node> {
        let values = self.construct_tag_mapping(value, "!tags")?;

        let tags = values
            .into_iter()
            .map(|(key, value)| {
                let value = match value {
                    Node::Null => Node::str(""),
                    // Tag values are strings. Lists that still hold
                    // variables are left for later resolution.
                    Node::List(_) | Node::Uncollapsible(_) => match value.to_json() {
                        Ok(json) => Node::str(json.to_string()),
                        Err(_) => value,
                    },
                    other => other,
                };

                Node::map([("Key", key.into_node()), ("Value", value)])
            })
            .collect();

        Ok(Node::List(tags))
    }
}

/// Flattens a part of a MIME message into the lines of the outer join.
fn mime_content(content: Node) -> Vec<Node> {
    let joined = match &content {
        Node::Map(map) if map.len() == 1 => map
            .get(&Key::from("Fn::Join"))
            .and_then(Node::as_list)
            .and_then(|args| args.get(1))
            .and_then(Node::as_list)
            .map(<[Node]>::to_vec),
        _ => None,
    };

    match (joined, content) {
        (Some(lines), _) => lines,
        (None, Node::List(items)) => items,
        (None, other) => vec![other],
    }
}

fn tag_name(tagged: &TaggedValue) -> String {
    tagged.tag.to_string().trim_start_matches('!').to_string()
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "true" | "yes" | "on" | "1"
    )
}

/// Lexically normalizes a path, folding `.` and `..` components.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match result.components().next_back() {
                Some(Component::Normal(_)) => {
                    result.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => result.push(".."),
            },
            other => result.push(other.as_os_str()),
        }
    }

    if result.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        result
    }
}

fn syntax_error(err: &serde_yaml::Error, source: &str, filename: Option<&Path>) -> Error {
    let filename = filename
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "<string>".to_string());
    let full_message = err.to_string();

    let Some(location) = err.location() else {
        return Error::template(format!("{} in \"{}\"", full_message, filename));
    };

    let message = match full_message.find(" at line ") {
        Some(pos) => full_message[..pos].to_string(),
        None => full_message,
    };

    let line_text = source
        .lines()
        .nth(location.line().saturating_sub(1))
        .unwrap_or_default();
    let snippet = format!(
        "    {}\n    {}^",
        line_text,
        " ".repeat(location.column().saturating_sub(1))
    );

    Error::TemplateSyntax {
        message,
        filename,
        line: location.line(),
        column: location.column(),
        snippet,
    }
}

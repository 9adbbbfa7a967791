//! Intermediate tree produced by the template reader.
//!
//! A [`Node`] mirrors a JSON value but can also hold pending variable
//! references, strings that still contain unresolved variables and lists
//! that must never be merged. Only fully resolved trees can be rendered to
//! JSON.

use std::fmt;

use indexmap::IndexMap;
use serde_json::Value as JsonValue;

use crate::error::{Error, Result};

/// Ordered mapping used for every template mapping.
pub type Map = IndexMap<Key, Node>;

/// Key of a template mapping.
///
/// Most keys are plain text. A key written with a variable that was not
/// known when the key was read is kept as a sequence of parts until the
/// variable is resolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    /// Plain text key
    Text(String),
    /// Key still containing unresolved variables
    Parts(Vec<KeyPart>),
}

/// Component of a [`Key::Parts`] key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyPart {
    Text(String),
    Var(String),
}

impl Key {
    /// Returns the key text when the key is fully resolved.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Key::Text(text) => Some(text),
            Key::Parts(_) => None,
        }
    }

    /// Builds a key from a parsed node.
    pub fn from_node(node: Node) -> Result<Self> {
        match node {
            Node::Str(text) => Ok(Key::Text(text)),
            Node::Null => Ok(Key::Text(String::new())),
            Node::Var(name) => Ok(Key::Parts(vec![KeyPart::Var(name)])),
            Node::VarsStrings(items) => items
                .into_iter()
                .map(|item| match item {
                    Node::Str(text) => Ok(KeyPart::Text(text)),
                    Node::Var(name) => Ok(KeyPart::Var(name)),
                    other => Err(Error::template(format!(
                        "Mapping keys must be strings, found {}",
                        other.kind()
                    ))),
                })
                .collect::<Result<Vec<_>>>()
                .map(Key::Parts),
            other => Err(Error::template(format!(
                "Mapping keys must be strings, found {}",
                other.kind()
            ))),
        }
    }

    /// Converts the key back into a node, used when keys become values.
    pub fn into_node(self) -> Node {
        match self {
            Key::Text(text) => Node::Str(text),
            Key::Parts(parts) => {
                let items: Vec<Node> = parts
                    .into_iter()
                    .map(|part| match part {
                        KeyPart::Text(text) => Node::Str(text),
                        KeyPart::Var(name) => Node::Var(name),
                    })
                    .collect();
                if items.len() == 1 {
                    items.into_iter().next().unwrap_or(Node::Null)
                } else {
                    Node::VarsStrings(items)
                }
            }
        }
    }
}

impl From<&str> for Key {
    fn from(text: &str) -> Self {
        Key::Text(text.to_string())
    }
}

impl From<String> for Key {
    fn from(text: String) -> Self {
        Key::Text(text)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Text(text) => write!(f, "{}", text),
            Key::Parts(parts) => {
                for part in parts {
                    match part {
                        KeyPart::Text(text) => write!(f, "{}", text)?,
                        KeyPart::Var(name) => write!(f, "$${{{}}}", name)?,
                    }
                }
                Ok(())
            }
        }
    }
}

/// A value in a template tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// YAML null
    Null,
    /// Text; YAML numbers and booleans are read as text too
    Str(String),
    /// Ordered mapping
    Map(Map),
    /// Ordinary list
    List(Vec<Node>),
    /// Pieces of one string that still contains unresolved variables
    VarsStrings(Vec<Node>),
    /// List whose adjacent items must never be merged
    Uncollapsible(Vec<Node>),
    /// Pending reference to a variable, by dotted path
    Var(String),
    /// Inline `If` condition waiting to be hoisted into `Conditions`
    If(Box<Node>),
}

impl Node {
    /// Creates a text node.
    pub fn str(text: impl Into<String>) -> Self {
        Node::Str(text.into())
    }

    /// Creates a mapping node from key/value pairs.
    pub fn map<K, I>(entries: I) -> Self
    where
        K: Into<Key>,
        I: IntoIterator<Item = (K, Node)>,
    {
        Node::Map(
            entries
                .into_iter()
                .map(|(key, value)| (key.into(), value))
                .collect(),
        )
    }

    /// Creates a single-key mapping such as `{"Fn::Base64": value}`.
    pub fn func(name: impl Into<String>, value: Node) -> Self {
        Node::map([(Key::Text(name.into()), value)])
    }

    /// Creates `{"Ref": target}`.
    pub fn reference(target: Node) -> Self {
        Node::func("Ref", target)
    }

    /// Creates `{"Fn::Join": ["", items]}`.
    pub fn join(items: Vec<Node>) -> Self {
        Node::func(
            "Fn::Join",
            Node::List(vec![Node::str(""), Node::List(items)]),
        )
    }

    /// Creates the `AWS::NoValue` pseudo parameter reference.
    pub fn no_value() -> Self {
        Node::reference(Node::str("AWS::NoValue"))
    }

    /// Short description of the node kind, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Node::Null => "null",
            Node::Str(_) => "a string",
            Node::Map(_) => "a mapping",
            Node::List(_) | Node::VarsStrings(_) | Node::Uncollapsible(_) => "a list",
            Node::Var(_) => "a variable reference",
            Node::If(_) => "an If condition",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Node::Str(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Map> {
        match self {
            Node::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut Map> {
        match self {
            Node::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Returns the items of any list flavour.
    pub fn as_list(&self) -> Option<&[Node]> {
        match self {
            Node::List(items) | Node::VarsStrings(items) | Node::Uncollapsible(items) => {
                Some(items)
            }
            _ => None,
        }
    }

    /// Looks up a text key in a mapping node.
    pub fn get(&self, key: &str) -> Option<&Node> {
        self.as_map().and_then(|map| map.get(&Key::from(key)))
    }

    /// True for values that count as "nothing": null, empty text, empty
    /// lists and empty mappings.
    pub fn is_blank(&self) -> bool {
        match self {
            Node::Null => true,
            Node::Str(text) => text.is_empty(),
            Node::Map(map) => map.is_empty(),
            Node::List(items) | Node::VarsStrings(items) | Node::Uncollapsible(items) => {
                items.is_empty()
            }
            Node::Var(_) | Node::If(_) => false,
        }
    }

    /// Renders the tree as JSON.
    ///
    /// Fails on the first pending variable reference or unhoisted `If`
    /// condition.
    pub fn to_json(&self) -> Result<JsonValue> {
        match self {
            Node::Null => Ok(JsonValue::Null),
            Node::Str(text) => Ok(JsonValue::String(text.clone())),
            Node::Map(map) => {
                let mut object = serde_json::Map::with_capacity(map.len());
                for (key, value) in map {
                    let key = match key {
                        Key::Text(text) => text.clone(),
                        Key::Parts(parts) => return Err(unresolved_key(parts)),
                    };
                    object.insert(key, value.to_json()?);
                }
                Ok(JsonValue::Object(object))
            }
            Node::List(items) | Node::VarsStrings(items) | Node::Uncollapsible(items) => items
                .iter()
                .map(Node::to_json)
                .collect::<Result<Vec<_>>>()
                .map(JsonValue::Array),
            Node::Var(name) => Err(Error::template(format!("Unknown variable \"{}\"", name))),
            Node::If(_) => Err(Error::template(
                "If conditions can only be used in Resources and Conditions",
            )),
        }
    }
}

fn unresolved_key(parts: &[KeyPart]) -> Error {
    let name = parts
        .iter()
        .find_map(|part| match part {
            KeyPart::Var(name) => Some(name.as_str()),
            KeyPart::Text(_) => None,
        })
        .unwrap_or_default();
    Error::template(format!("Unknown variable \"{}\"", name))
}

impl From<&str> for Node {
    fn from(text: &str) -> Self {
        Node::Str(text.to_string())
    }
}

impl From<String> for Node {
    fn from(text: String) -> Self {
        Node::Str(text)
    }
}

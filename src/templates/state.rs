//! Shared state for reading a template: variables, macros and the
//! bookkeeping needed to resolve variable references.

use std::collections::BTreeSet;
use std::path::PathBuf;

use indexmap::{IndexMap, IndexSet};

use super::node::{Key, KeyPart, Map, Node};
use crate::error::{Error, Result};

/// How [`TemplateState::process_tree`] treats references it encounters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessOptions {
    /// Replace bare variable references with their values; unknown
    /// variables become errors.
    pub resolve_variables: bool,
    /// Hoist inline `If` conditions into named conditions.
    pub resolve_if_conditions: bool,
}

impl ProcessOptions {
    /// Resolve every variable reference.
    pub const RESOLVE: Self = Self {
        resolve_variables: true,
        resolve_if_conditions: false,
    };

    /// Only fold known variables into adjacent strings.
    pub const COLLAPSE: Self = Self {
        resolve_variables: false,
        resolve_if_conditions: false,
    };

    /// Fold known variables and hoist `If` conditions.
    pub const HOIST_CONDITIONS: Self = Self {
        resolve_variables: false,
        resolve_if_conditions: true,
    };

    fn without_conditions(self) -> Self {
        Self {
            resolve_if_conditions: false,
            ..self
        }
    }
}

/// State accumulated while reading one template and its imports.
#[derive(Debug, Clone, Default)]
pub struct TemplateState {
    pub variables: Map,
    pub macros: Map,
    pub unresolved_variables: BTreeSet<String>,
    pub imported_files: IndexSet<PathBuf>,
    pub embedded_files: IndexSet<PathBuf>,
    /// Conditions hoisted from inline `If` expressions, in discovery order.
    pub if_conditions: IndexMap<String, Node>,
    pub base_dir: Option<PathBuf>,
    pub filename: Option<PathBuf>,
}

impl TemplateState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges the state of an imported template into this one.
    ///
    /// Later definitions override earlier ones. Hoisted conditions stay
    /// with the template that owns them.
    pub fn update(&mut self, other: TemplateState) {
        self.macros.extend(other.macros);
        self.variables.extend(other.variables);
        self.unresolved_variables.extend(other.unresolved_variables);
        self.imported_files.extend(other.imported_files);
        self.embedded_files.extend(other.embedded_files);
    }

    /// Resolves a name against the state's variables.
    pub fn resolve_variable(&self, name: &str) -> Result<Node> {
        resolve(name, &self.variables)
    }

    /// Walks a tree, folding or resolving variable references.
    ///
    /// `variables` defaults to the state's own variables.
    pub fn process_tree(
        &mut self,
        node: Node,
        variables: Option<&Map>,
        options: ProcessOptions,
    ) -> Result<Node> {
        let mut resolver = Resolver {
            variables: variables.unwrap_or(&self.variables),
            unresolved: &mut self.unresolved_variables,
            if_conditions: &mut self.if_conditions,
        };
        resolver.process(node, options)
    }

    /// Folds known variables into adjacent strings of a list of parts.
    pub fn collapse_variables(&mut self, items: Vec<Node>, collapsible: bool) -> Vec<Node> {
        let mut resolver = Resolver {
            variables: &self.variables,
            unresolved: &mut self.unresolved_variables,
            if_conditions: &mut self.if_conditions,
        };
        resolver.collapse(items, collapsible)
    }

    /// Normalizes the parsed parts of a string into a single node.
    ///
    /// Known variables are folded in. One remaining part is returned as is,
    /// a mix of text and unresolved variables becomes
    /// [`Node::VarsStrings`] and anything else is joined with `Fn::Join`.
    /// No parts at all yields an empty list.
    pub fn normalize_parts(&mut self, parts: Vec<Node>) -> Result<Node> {
        let mut resolver = Resolver {
            variables: &self.variables,
            unresolved: &mut self.unresolved_variables,
            if_conditions: &mut self.if_conditions,
        };
        let items = resolver.process_items(parts, true, ProcessOptions::COLLAPSE)?;

        Ok(match normalize_vars_list(items) {
            Node::List(mut items) | Node::VarsStrings(mut items) if items.len() == 1 => {
                items.remove(0)
            }
            Node::List(items) if items.len() > 1 => Node::join(items),
            other => other,
        })
    }
}

/// Looks up a possibly dotted name in a mapping.
pub fn resolve(name: &str, tree: &Map) -> Result<Node> {
    let unknown = || Error::template(format!("Unknown variable \"{}\"", name));
    let mut parts = name.split('.');
    let first = parts.next().ok_or_else(unknown)?;
    let mut current = tree.get(&Key::from(first)).ok_or_else(unknown)?;

    for part in parts {
        current = current.get(part).ok_or_else(unknown)?;
    }

    Ok(current.clone())
}

/// Classifies a list of parts.
///
/// A list made only of strings and at least one variable reference becomes
/// [`Node::VarsStrings`]; every other list stays a plain list.
pub fn normalize_vars_list(items: Vec<Node>) -> Node {
    let mut has_vars = false;

    for item in &items {
        match item {
            Node::Var(_) => has_vars = true,
            Node::Str(_) => {}
            _ => return Node::List(items),
        }
    }

    if has_vars {
        Node::VarsStrings(items)
    } else {
        Node::List(items)
    }
}

/// Tree walker borrowing the parts of [`TemplateState`] it updates.
struct Resolver<'a> {
    variables: &'a Map,
    unresolved: &'a mut BTreeSet<String>,
    if_conditions: &'a mut IndexMap<String, Node>,
}

impl Resolver<'_> {
    fn process(&mut self, node: Node, options: ProcessOptions) -> Result<Node> {
        match node {
            Node::Map(map) => {
                let mut processed = Map::with_capacity(map.len());
                for (key, value) in map {
                    let key = self.process_key(key, options.resolve_variables)?;
                    let value = self.process(value, options)?;
                    processed.insert(key, value);
                }
                Ok(Node::Map(processed))
            }
            Node::List(items) => Ok(Node::List(self.process_items(items, true, options)?)),
            Node::VarsStrings(items) => {
                let items = self.process_items(items, true, options)?;
                if items.iter().all(|item| matches!(item, Node::Str(_))) {
                    Ok(Node::Str(
                        items.iter().filter_map(Node::as_str).collect::<String>(),
                    ))
                } else {
                    Ok(Node::join(items))
                }
            }
            Node::Uncollapsible(items) => Ok(Node::Uncollapsible(
                self.process_items(items, false, options)?,
            )),
            Node::Var(name) if options.resolve_variables => {
                let value = resolve(&name, self.variables)?;
                self.unresolved.remove(&name);
                Ok(value)
            }
            Node::If(condition) => {
                let condition = self.process(*condition, options.without_conditions())?;
                if options.resolve_if_conditions {
                    let name = format!("IfCondition{}", self.if_conditions.len() + 1);
                    self.if_conditions.insert(name.clone(), condition);
                    Ok(Node::Str(name))
                } else {
                    Ok(Node::If(Box::new(condition)))
                }
            }
            other => Ok(other),
        }
    }

    fn process_items(
        &mut self,
        items: Vec<Node>,
        collapsible: bool,
        options: ProcessOptions,
    ) -> Result<Vec<Node>> {
        self.collapse(items, collapsible)
            .into_iter()
            .map(|item| self.process(item, options))
            .collect()
    }

    fn process_key(&mut self, key: Key, resolve_variables: bool) -> Result<Key> {
        let parts = match key {
            Key::Parts(parts) if resolve_variables => parts,
            other => return Ok(other),
        };

        let mut text = String::new();
        for part in parts {
            match part {
                KeyPart::Text(piece) => text.push_str(&piece),
                KeyPart::Var(name) => match resolve(&name, self.variables)? {
                    Node::Str(value) => {
                        self.unresolved.remove(&name);
                        text.push_str(&value);
                    }
                    other => {
                        return Err(Error::template(format!(
                            "Variable \"{}\" used in a key must be a string, not {}",
                            name,
                            other.kind()
                        )))
                    }
                },
            }
        }
        Ok(Key::Text(text))
    }

    fn collapse(&mut self, items: Vec<Node>, collapsible: bool) -> Vec<Node> {
        let mut result: Vec<Node> = Vec::with_capacity(items.len());
        let mut collapse_string = false;

        for item in items {
            let mut collapse_next = false;

            let item = match item {
                Node::Var(name) => match resolve(&name, self.variables) {
                    Ok(value) => {
                        collapse_string = collapsible;
                        collapse_next = collapsible;
                        value
                    }
                    Err(_) => {
                        self.unresolved.insert(name.clone());
                        Node::Var(name)
                    }
                },
                other => other,
            };

            match item {
                Node::Str(text) => {
                    match result.last_mut() {
                        Some(Node::Str(last)) if collapse_string => last.push_str(&text),
                        _ => result.push(Node::Str(text)),
                    }
                    collapse_string = collapse_next;
                }
                other => {
                    result.push(other);
                    collapse_string = false;
                }
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn vars(entries: &[(&str, Node)]) -> Map {
        entries
            .iter()
            .map(|(key, value)| (Key::from(*key), value.clone()))
            .collect()
    }

    #[test]
    fn test_resolve_dotted_path() {
        let tree = vars(&[(
            "outer",
            Node::map([("inner", Node::map([("leaf", Node::str("value"))]))]),
        )]);
        assert_eq!(resolve("outer.inner.leaf", &tree).unwrap(), Node::str("value"));
        assert!(resolve("outer.missing", &tree).is_err());
        assert!(resolve("outer.inner.leaf.deeper", &tree).is_err());
    }

    #[test]
    fn test_collapse_folds_known_variables() {
        let mut state = TemplateState::new();
        state.variables = vars(&[("name", Node::str("world"))]);

        let items = state.collapse_variables(
            vec![
                Node::str("hello "),
                Node::Var("name".into()),
                Node::str("!"),
                Node::Var("other".into()),
            ],
            true,
        );

        assert_eq!(
            items,
            vec![Node::str("hello world!"), Node::Var("other".into())]
        );
        assert!(state.unresolved_variables.contains("other"));
    }

    #[test]
    fn test_collapse_uncollapsible_keeps_items() {
        let mut state = TemplateState::new();
        state.variables = vars(&[("name", Node::str("world"))]);

        let items = state.collapse_variables(
            vec![Node::str("a"), Node::Var("name".into()), Node::str("b")],
            false,
        );
        assert_eq!(
            items,
            vec![Node::str("a"), Node::str("world"), Node::str("b")]
        );
    }

    #[test]
    fn test_process_tree_resolves_vars_strings() {
        let mut state = TemplateState::new();
        let variables = vars(&[("var1", Node::str("value1"))]);

        let node = Node::VarsStrings(vec![Node::Var("var1".into()), Node::str("-foo")]);
        let result = state
            .process_tree(node, Some(&variables), ProcessOptions::RESOLVE)
            .unwrap();
        assert_eq!(result, Node::str("value1-foo"));
    }

    #[test]
    fn test_process_tree_unknown_variable() {
        let mut state = TemplateState::new();
        let err = state
            .process_tree(Node::Var("nope".into()), None, ProcessOptions::RESOLVE)
            .unwrap_err();
        assert_eq!(err.to_string(), "Unknown variable \"nope\"");
    }

    #[test]
    fn test_process_tree_mixed_vars_strings_become_join() {
        let mut state = TemplateState::new();
        let variables = vars(&[("ref", Node::reference(Node::str("MyRef")))]);

        let node = Node::VarsStrings(vec![
            Node::str("["),
            Node::Var("ref".into()),
            Node::str("] test"),
        ]);
        let result = state
            .process_tree(node, Some(&variables), ProcessOptions::RESOLVE)
            .unwrap();
        assert_eq!(
            result,
            Node::join(vec![
                Node::str("["),
                Node::reference(Node::str("MyRef")),
                Node::str("] test"),
            ])
        );
    }

    #[test]
    fn test_if_conditions_are_hoisted_in_order() {
        let mut state = TemplateState::new();
        let condition = Node::func(
            "Fn::Equals",
            Node::Uncollapsible(vec![Node::str("a"), Node::str("b")]),
        );
        let tree = Node::List(vec![
            Node::If(Box::new(condition.clone())),
            Node::If(Box::new(condition.clone())),
        ]);

        let result = state
            .process_tree(tree, None, ProcessOptions::HOIST_CONDITIONS)
            .unwrap();
        assert_eq!(
            result,
            Node::List(vec![Node::str("IfCondition1"), Node::str("IfCondition2")])
        );
        assert_eq!(state.if_conditions.len(), 2);
        assert_eq!(state.if_conditions["IfCondition1"], condition);
    }

    #[test]
    fn test_key_parts_resolved_when_requested() {
        let mut state = TemplateState::new();
        let variables = vars(&[("env", Node::str("prod"))]);
        let mut map = Map::new();
        map.insert(
            Key::Parts(vec![KeyPart::Text("Bucket".into()), KeyPart::Var("env".into())]),
            Node::str("x"),
        );

        let result = state
            .process_tree(Node::Map(map), Some(&variables), ProcessOptions::RESOLVE)
            .unwrap();
        assert_eq!(result.get("Bucketprod"), Some(&Node::str("x")));
    }

    #[test]
    fn test_normalize_parts() {
        let mut state = TemplateState::new();
        state.variables = vars(&[("known", Node::str("K"))]);

        assert_eq!(
            state.normalize_parts(vec![Node::str("a"), Node::Var("known".into())]).unwrap(),
            Node::str("aK")
        );
        assert_eq!(
            state
                .normalize_parts(vec![Node::str("a"), Node::Var("unknown".into())])
                .unwrap(),
            Node::VarsStrings(vec![Node::str("a"), Node::Var("unknown".into())])
        );
        assert_eq!(
            state
                .normalize_parts(vec![Node::str("a"), Node::reference(Node::str("R"))])
                .unwrap(),
            Node::join(vec![Node::str("a"), Node::reference(Node::str("R"))])
        );
        assert_eq!(state.normalize_parts(vec![]).unwrap(), Node::List(vec![]));
    }

    #[test]
    fn test_update_merges_state() {
        let mut state = TemplateState::new();
        state.variables = vars(&[("a", Node::str("1"))]);

        let mut other = TemplateState::new();
        other.variables = vars(&[("a", Node::str("2")), ("b", Node::str("3"))]);
        other.imported_files.insert(PathBuf::from("other.yaml"));

        state.update(other);
        assert_eq!(state.resolve_variable("a").unwrap(), Node::str("2"));
        assert_eq!(state.resolve_variable("b").unwrap(), Node::str("3"));
        assert!(state.imported_files.contains(&PathBuf::from("other.yaml")));
    }
}

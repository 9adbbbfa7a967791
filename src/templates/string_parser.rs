//! Parser for the inline syntax embedded in template strings.
//!
//! | Syntax | Result |
//! |--------|--------|
//! | `@@Name`, `@@{Name}` | `{"Ref": "Name"}` |
//! | `@@$$var`, `@@{$$a.b}` | `{"Ref": <variable value>}` |
//! | `$$name`, `$${dotted.path}` | variable value |
//! | `<% Func(a, b) %>` | `{"Fn::Func": [a, b]}` |
//! | `<% Func(a) { %> ... <% } %>` | `{"Fn::Func": [a, ...contents]}` |
//! | `<% If (expr) { %> ... <% ElseIf (expr) { %> ... <% Else { %> ... <% } %>` | nested `Fn::If` |
//!
//! Strings spanning several lines produce one part per line. A first line
//! of `__base64__` wraps the whole result in `Fn::Base64`.

use once_cell::sync::Lazy;
use regex::Regex;

use super::expression::parse_condition;
use super::node::Node;
use super::state::TemplateState;
use crate::error::{Error, Result};

static PARSE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        // Function calls, optionally opening a block.
        r"<%\s*(?P<func_name>[A-Za-z][A-Za-z0-9]+)\s*(?:\((?P<params>.*?)\))?(?P<func_open>\s*\{)?\s*%>\n?",
        // Block close.
        r"|(?P<func_close><%\s*\}\s*%>)\n?",
        // References.
        r"|@@\{(?P<bref>\$\$[A-Za-z0-9:_.]+|[A-Za-z0-9:_]+)\}",
        r"|@@(?P<ref>(?:\$\$)?[A-Za-z0-9:_]+)",
        // Variables.
        r"|\$\$(?:(?P<var_name>[A-Za-z0-9_]+)|\{(?P<var_path>[A-Za-z0-9_.]+)\})",
    ))
    .expect("Invalid template string regex")
});

static SELECT_PARAMS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"^(?P<index>\d+),\s*(?:\[(?P<array>.+)\]",
        r"|(?P<ref>@@\{(?:\$\$[A-Za-z0-9:_.]+|[A-Za-z0-9:_]+)\}|@@(?:\$\$)?[A-Za-z0-9:_]+)",
        r"|(?P<func>[A-Za-z]*\(.*\)))$",
    ))
    .expect("Invalid Select parameters regex")
});

static ARRAY_ITEM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r#""[^"]+"|'[^']+'"#,
        r"|\$\$(?:[A-Za-z0-9_]+|\{[A-Za-z0-9_.]+\})",
        r"|@@\{(?:\$\$[A-Za-z0-9:_.]+|[A-Za-z0-9:_]+)\}|@@(?:\$\$)?[A-Za-z0-9:_]+",
    ))
    .expect("Invalid Select array item regex")
});

/// An open construct while parsing a string.
#[derive(Debug)]
enum Frame {
    Root(Vec<Node>),
    Block {
        name: String,
        params: Vec<Node>,
        contents: Vec<Node>,
    },
    If(IfFrame),
}

#[derive(Debug)]
struct IfFrame {
    condition: Node,
    when_true: Vec<Node>,
    when_false: Vec<Node>,
    in_else: bool,
    /// Frames closed by the `<% } %>` that ends this block. An `ElseIf`
    /// closes itself along with every enclosing branch of the chain.
    pop_count: usize,
}

impl IfFrame {
    fn new(condition: Node, pop_count: usize) -> Self {
        Self {
            condition,
            when_true: Vec::new(),
            when_false: Vec::new(),
            in_else: false,
            pop_count,
        }
    }

    fn start_else(&mut self, func_name: &str) -> Result<()> {
        if self.when_true.is_empty() {
            return Err(Error::template(format!(
                "Found {} without a \"true\" value in the If",
                func_name
            )));
        }

        if self.in_else {
            return Err(Error::template(format!(
                "Found {} after an Else",
                func_name
            )));
        }

        self.in_else = true;
        Ok(())
    }
}

impl Frame {
    fn add(&mut self, node: Node) {
        match self {
            Frame::Root(contents) | Frame::Block { contents, .. } => contents.push(node),
            Frame::If(frame) if frame.in_else => frame.when_false.push(node),
            Frame::If(frame) => frame.when_true.push(node),
        }
    }

    fn pop_count(&self) -> usize {
        match self {
            Frame::If(frame) => frame.pop_count,
            _ => 1,
        }
    }
}

fn unbalanced() -> Error {
    Error::template("Unbalanced braces in template")
}

fn current(stack: &mut [Frame]) -> Result<&mut Frame> {
    stack.last_mut().ok_or_else(unbalanced)
}

/// Parses template strings against a [`TemplateState`].
pub struct StringParser<'s> {
    state: &'s mut TemplateState,
}

impl<'s> StringParser<'s> {
    pub fn new(state: &'s mut TemplateState) -> Self {
        Self { state }
    }

    /// Parses a full string scalar.
    pub fn parse_string(&mut self, s: &str) -> Result<Node> {
        if s.is_empty() {
            return Ok(Node::str(""));
        }

        let mut lines: Vec<&str> = s.split_inclusive('\n').collect();
        let base64 = lines
            .first()
            .is_some_and(|line| line.trim() == "__base64__");

        if base64 {
            lines.remove(0);
        }

        let mut stack = vec![Frame::Root(Vec::new())];

        for line in lines {
            self.parse_line(line, &mut stack)?;
        }

        let result = self.finish_root(stack)?;

        if base64 {
            Ok(Node::func("Fn::Base64", result))
        } else {
            Ok(result)
        }
    }

    /// Parses a standalone piece of text such as a function argument.
    fn parse_fragment(&mut self, s: &str) -> Result<Node> {
        let mut stack = vec![Frame::Root(Vec::new())];
        self.parse_line(s, &mut stack)?;

        match self.finish_root(stack)? {
            Node::List(items) if items.is_empty() => Ok(Node::str("")),
            node => Ok(node),
        }
    }

    fn finish_root(&mut self, mut stack: Vec<Frame>) -> Result<Node> {
        if stack.len() > 1 {
            return Err(unbalanced());
        }

        match stack.pop() {
            Some(Frame::Root(contents)) => self.state.normalize_parts(contents),
            _ => Err(unbalanced()),
        }
    }

    fn parse_line(&mut self, line: &str, stack: &mut Vec<Frame>) -> Result<()> {
        let mut prev = 0;

        for caps in PARSE_RE.captures_iter(line) {
            let Some(whole) = caps.get(0) else {
                continue;
            };

            if whole.start() > prev {
                current(stack)?.add(Node::str(&line[prev..whole.start()]));
            }

            if let Some(name) = caps.name("func_name") {
                self.handle_function(
                    name.as_str(),
                    caps.name("params").map(|m| m.as_str()),
                    caps.name("func_open").is_some(),
                    stack,
                )?;
            } else if caps.name("func_close").is_some() {
                self.close_block(stack)?;
            } else if let Some(name) = caps.name("bref").or_else(|| caps.name("ref")) {
                let node = self.reference(name.as_str());
                current(stack)?.add(node);
            } else if let Some(name) = caps.name("var_name").or_else(|| caps.name("var_path")) {
                current(stack)?.add(Node::Var(name.as_str().to_string()));
            }

            prev = whole.end();
        }

        if prev < line.len() {
            current(stack)?.add(Node::str(&line[prev..]));
        }

        Ok(())
    }

    fn reference(&mut self, name: &str) -> Node {
        match name.strip_prefix("$$") {
            Some(var_name) => {
                let target = match self.state.resolve_variable(var_name) {
                    Ok(value) => value,
                    Err(_) => {
                        self.state
                            .unresolved_variables
                            .insert(var_name.to_string());
                        Node::Var(var_name.to_string())
                    }
                };
                Node::reference(target)
            }
            None => Node::reference(Node::str(name)),
        }
    }

    fn handle_function(
        &mut self,
        name: &str,
        params: Option<&str>,
        opens_block: bool,
        stack: &mut Vec<Frame>,
    ) -> Result<()> {
        match name {
            "If" => {
                let condition = self.parse_if_condition(params)?;
                require_block(name, opens_block)?;
                stack.push(Frame::If(IfFrame::new(condition, 1)));
            }
            "ElseIf" => {
                let condition = self.parse_if_condition(params)?;
                let parent = match stack.last_mut() {
                    Some(Frame::If(frame)) => frame,
                    _ => {
                        return Err(Error::template(
                            "Found ElseIf without a matching If or ElseIf",
                        ))
                    }
                };
                parent.start_else(name)?;
                require_block(name, opens_block)?;
                let pop_count = parent.pop_count + 1;
                stack.push(Frame::If(IfFrame::new(condition, pop_count)));
            }
            "Else" => match stack.last_mut() {
                Some(Frame::If(frame)) => frame.start_else(name)?,
                _ => return Err(Error::template("Found Else without a matching If")),
            },
            "Base64" | "GetAZs" => {
                reject_block(name, opens_block)?;
                let param = self.single_param(name, params)?;
                current(stack)?.add(Node::func(format!("Fn::{}", name), param));
            }
            "Select" => {
                reject_block(name, opens_block)?;
                let params = self.parse_select(params.unwrap_or_default())?;
                current(stack)?.add(Node::func("Fn::Select", Node::List(params)));
            }
            "ImportValue" => {
                reject_block(name, opens_block)?;
                let params = self.parse_params(params)?;
                let value = self.state.normalize_parts(params)?;
                current(stack)?.add(Node::func("Fn::ImportValue", value));
            }
            _ => {
                let params = self.parse_params(params)?;

                if opens_block {
                    stack.push(Frame::Block {
                        name: name.to_string(),
                        params,
                        contents: Vec::new(),
                    });
                } else {
                    current(stack)?.add(Node::func(
                        format!("Fn::{}", name),
                        Node::Uncollapsible(params),
                    ));
                }
            }
        }

        Ok(())
    }

    fn close_block(&mut self, stack: &mut Vec<Frame>) -> Result<()> {
        let count = match stack.last() {
            Some(Frame::Root(_)) | None => return Err(unbalanced()),
            Some(frame) => frame.pop_count(),
        };

        for _ in 0..count {
            let node = match stack.pop() {
                Some(Frame::Block {
                    name,
                    mut params,
                    contents,
                }) => {
                    params.extend(contents);
                    Node::func(format!("Fn::{}", name), Node::Uncollapsible(params))
                }
                Some(Frame::If(frame)) => self.finish_if(frame)?,
                Some(Frame::Root(_)) | None => return Err(unbalanced()),
            };

            current(stack)?.add(node);
        }

        Ok(())
    }

    fn finish_if(&mut self, frame: IfFrame) -> Result<Node> {
        let when_true = self.state.normalize_parts(frame.when_true)?;
        let when_false = self.state.normalize_parts(frame.when_false)?;
        let when_false = if when_false.is_blank() {
            Node::no_value()
        } else {
            when_false
        };

        Ok(Node::func(
            "Fn::If",
            Node::Uncollapsible(vec![frame.condition, when_true, when_false]),
        ))
    }

    /// Parses the expression of an `If`/`ElseIf`.
    ///
    /// A single value names an existing condition; anything built from
    /// operators becomes an inline condition to be hoisted later.
    fn parse_if_condition(&mut self, params: Option<&str>) -> Result<Node> {
        let expr = params.ok_or_else(|| Error::template("Invalid parameter to If"))?;
        let condition = parse_condition(expr, |value| self.parse_fragment(value))?;

        match condition {
            Node::Map(_) => Ok(Node::If(Box::new(condition))),
            Node::Str(_) | Node::Var(_) => Ok(condition),
            _ => Err(Error::template("Invalid parameter to If")),
        }
    }

    fn parse_params(&mut self, params: Option<&str>) -> Result<Vec<Node>> {
        match params {
            None => Ok(Vec::new()),
            Some(params) if params.trim().is_empty() => Ok(Vec::new()),
            Some(params) => split_params(params)
                .into_iter()
                .map(|param| self.parse_fragment(strip_quotes(param)))
                .collect(),
        }
    }

    fn single_param(&mut self, name: &str, params: Option<&str>) -> Result<Node> {
        let mut params = self.parse_params(params)?;

        match params.len() {
            0 => Ok(Node::str("")),
            1 => Ok(params.remove(0)),
            _ => Err(Error::template(format!(
                "Too many parameters passed to {}",
                name
            ))),
        }
    }

    fn parse_select(&mut self, params: &str) -> Result<Vec<Node>> {
        let params = params.trim();
        let caps = SELECT_PARAMS_RE.captures(params).ok_or_else(|| {
            Error::template(format!(
                "Cannot parse parameters to Select function: \"{}\"",
                params
            ))
        })?;

        let index = Node::str(&caps["index"]);

        let container = if let Some(array) = caps.name("array") {
            let items = ARRAY_ITEM_RE
                .find_iter(array.as_str())
                .map(|item| self.parse_fragment(strip_quotes(item.as_str())))
                .collect::<Result<Vec<_>>>()?;
            Node::Uncollapsible(items)
        } else if let Some(func) = caps.name("func") {
            self.parse_fragment(&format!("<% {} %>", func.as_str()))?
        } else if let Some(reference) = caps.name("ref") {
            self.parse_fragment(reference.as_str())?
        } else {
            return Err(Error::template(format!(
                "Cannot parse parameters to Select function: \"{}\"",
                params
            )));
        };

        Ok(vec![index, container])
    }
}

fn require_block(name: &str, opens_block: bool) -> Result<()> {
    if opens_block {
        Ok(())
    } else {
        Err(Error::template(format!("{} must open a block", name)))
    }
}

fn reject_block(name: &str, opens_block: bool) -> Result<()> {
    if opens_block {
        Err(Error::template(format!("{} cannot open a block", name)))
    } else {
        Ok(())
    }
}

/// Splits function arguments on commas that are not inside quotes.
fn split_params(params: &str) -> Vec<&str> {
    let mut result = Vec::new();
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (i, c) in params.char_indices() {
        match (quote, c) {
            (None, '"' | '\'') => quote = Some(c),
            (Some(q), _) if q == c => quote = None,
            (None, ',') => {
                result.push(params[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }

    result.push(params[start..].trim());
    result
}

fn strip_quotes(s: &str) -> &str {
    let quoted = s.len() >= 2
        && ((s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\'')));

    if quoted {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates::node::Key;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn parse(s: &str) -> Result<Node> {
        let mut state = TemplateState::new();
        StringParser::new(&mut state).parse_string(s)
    }

    fn parse_json(s: &str) -> serde_json::Value {
        parse(s).unwrap().to_json().unwrap()
    }

    fn parse_with_var(s: &str, name: &str, value: Node) -> Result<Node> {
        let mut state = TemplateState::new();
        state.variables.insert(Key::from(name), value);
        StringParser::new(&mut state).parse_string(s)
    }

    #[test]
    fn test_plain_string() {
        assert_eq!(parse("hello").unwrap(), Node::str("hello"));
        assert_eq!(parse("").unwrap(), Node::str(""));
    }

    #[test]
    fn test_refs() {
        assert_eq!(
            parse_json("foo - @@Bar - baz"),
            json!({"Fn::Join": ["", ["foo - ", {"Ref": "Bar"}, " - baz"]]})
        );
        assert_eq!(parse_json("@@{AWS::Region}"), json!({"Ref": "AWS::Region"}));
    }

    #[test]
    fn test_ref_to_variable() {
        let node = parse_with_var("@@$$target", "target", Node::str("MyBucket")).unwrap();
        assert_eq!(node.to_json().unwrap(), json!({"Ref": "MyBucket"}));

        let node = parse("@@{$$a.b}").unwrap();
        assert_eq!(node, Node::reference(Node::Var("a.b".into())));
    }

    #[test]
    fn test_known_variables_fold_into_text() {
        let node = parse_with_var("foo - $$myvar - baz", "myvar", Node::str("abc")).unwrap();
        assert_eq!(node, Node::str("foo - abc - baz"));

        let node = parse_with_var("x$${myvar}y", "myvar", Node::str("abc")).unwrap();
        assert_eq!(node, Node::str("xabcy"));
    }

    #[test]
    fn test_unknown_variables_are_kept() {
        let node = parse("foo - $$myvar - baz").unwrap();
        assert_eq!(
            node,
            Node::VarsStrings(vec![
                Node::str("foo - "),
                Node::Var("myvar".into()),
                Node::str(" - baz"),
            ])
        );
    }

    #[test]
    fn test_function_params() {
        assert_eq!(
            parse_json("foo - <% FindInMap(a, @@b, c) %> - baz"),
            json!({"Fn::Join": ["", [
                "foo - ",
                {"Fn::FindInMap": ["a", {"Ref": "b"}, "c"]},
                " - baz"
            ]]})
        );
        assert_eq!(
            parse_json("<% GetAtt(\"MyResource\", \"MyProperty\") %>"),
            json!({"Fn::GetAtt": ["MyResource", "MyProperty"]})
        );
    }

    #[test]
    fn test_quoted_params_keep_commas() {
        assert_eq!(
            parse_json("<% Split(\",\", @@List) %>"),
            json!({"Fn::Split": [",", {"Ref": "List"}]})
        );
    }

    #[test]
    fn test_two_functions_on_one_line() {
        assert_eq!(
            parse_json("<% GetAtt(A, B) %>:<% GetAtt(C, D) %>"),
            json!({"Fn::Join": ["", [
                {"Fn::GetAtt": ["A", "B"]},
                ":",
                {"Fn::GetAtt": ["C", "D"]}
            ]]})
        );
    }

    #[test]
    fn test_get_azs() {
        assert_eq!(parse_json("<% GetAZs() %>"), json!({"Fn::GetAZs": ""}));
        assert_eq!(
            parse_json("<% GetAZs(\"us-east-1\") %>"),
            json!({"Fn::GetAZs": "us-east-1"})
        );
        assert_eq!(
            parse_json("<% GetAZs(@@MyReference) %>"),
            json!({"Fn::GetAZs": {"Ref": "MyReference"}})
        );
        assert_eq!(
            parse("<% GetAZs(a, b) %>").unwrap_err().to_string(),
            "Too many parameters passed to GetAZs"
        );
    }

    #[test]
    fn test_select() {
        let node = parse_with_var(
            "<% Select(2, [\"foo 'bar'\", '\"foo\" bar', $$myvar]) %>",
            "myvar",
            Node::str("abc"),
        )
        .unwrap();
        assert_eq!(
            node.to_json().unwrap(),
            json!({"Fn::Select": ["2", ["foo 'bar'", "\"foo\" bar", "abc"]]})
        );

        assert_eq!(
            parse_json("<% Select(2, @@MyReference) %>"),
            json!({"Fn::Select": ["2", {"Ref": "MyReference"}]})
        );
        assert_eq!(
            parse_json("<% Select(0, GetAZs(\"\")) %>"),
            json!({"Fn::Select": ["0", {"Fn::GetAZs": ""}]})
        );
        assert_eq!(
            parse("<% Select(foo) %>").unwrap_err().to_string(),
            "Cannot parse parameters to Select function: \"foo\""
        );
    }

    #[test]
    fn test_import_value() {
        assert_eq!(
            parse_json("<% ImportValue(\"shared-vpc\") %>"),
            json!({"Fn::ImportValue": "shared-vpc"})
        );
    }

    #[test]
    fn test_multiline_and_base64() {
        assert_eq!(
            parse_json("This is line one.\nThis is line two.\n"),
            json!({"Fn::Join": ["", ["This is line one.\n", "This is line two.\n"]]})
        );
        assert_eq!(
            parse_json("__base64__\nThis is line one.\nThis is line two.\n"),
            json!({"Fn::Base64": {"Fn::Join": ["", [
                "This is line one.\n",
                "This is line two.\n"
            ]]}})
        );
    }

    #[test]
    fn test_block_function() {
        assert_eq!(
            parse_json("<% Join(\",\") { %>\na\nb\n<% } %>\n"),
            json!({"Fn::Join": [",", "a\n", "b\n"]})
        );
    }

    #[test]
    fn test_if_with_condition_name() {
        assert_eq!(
            parse_json("<% If (a) { %>\nthis is 123.\n<% } %>\n"),
            json!({"Fn::If": ["a", "this is 123.\n", {"Ref": "AWS::NoValue"}]})
        );
    }

    #[test]
    fn test_if_else_chain() {
        assert_eq!(
            parse_json(
                "<% If (a) { %>\nvalue1\n<% ElseIf (b) { %>\nvalue2\n\
                 <% ElseIf (c) { %>\nvalue3\n<% Else { %>\nvalue4\n<% } %>\n"
            ),
            json!({"Fn::If": ["a", "value1\n", {"Fn::If": ["b", "value2\n", {
                "Fn::If": ["c", "value3\n", "value4\n"]
            }]}]})
        );
    }

    #[test]
    fn test_nested_if() {
        assert_eq!(
            parse_json(
                "<% If (a) { %>\nLine 1.\n<%   If (b) { %>\nLine 2.\n<%   } %>\nLine 3.\n<% } %>\n"
            ),
            json!({"Fn::If": [
                "a",
                {"Fn::Join": ["", [
                    "Line 1.\n",
                    {"Fn::If": ["b", "Line 2.\n", {"Ref": "AWS::NoValue"}]},
                    "Line 3.\n"
                ]]},
                {"Ref": "AWS::NoValue"}
            ]})
        );
    }

    #[test]
    fn test_if_expression_becomes_inline_condition() {
        let node = parse("<% If (@@a == b) { %>\nthe line.\n<% } %>\n").unwrap();
        let expected_condition = Node::func(
            "Fn::Equals",
            Node::Uncollapsible(vec![Node::reference(Node::str("a")), Node::str("b")]),
        );
        assert_eq!(
            node,
            Node::func(
                "Fn::If",
                Node::Uncollapsible(vec![
                    Node::If(Box::new(expected_condition)),
                    Node::str("the line.\n"),
                    Node::no_value(),
                ])
            )
        );
    }

    #[test]
    fn test_if_errors() {
        let message = |s: &str| parse(s).unwrap_err().to_string();

        assert_eq!(
            message("<% If (a) { %>\nvalue\n"),
            "Unbalanced braces in template"
        );
        assert_eq!(message("value\n<% } %>\n"), "Unbalanced braces in template");
        assert_eq!(
            message("<% Else { %>\nvalue\n<% } %>\n"),
            "Found Else without a matching If"
        );
        assert_eq!(
            message("<% ElseIf (b) { %>\nvalue\n<% } %>\n"),
            "Found ElseIf without a matching If or ElseIf"
        );
        assert_eq!(
            message("<% If (a) { %>\n<% Else { %>\nvalue\n<% } %>\n"),
            "Found Else without a \"true\" value in the If"
        );
        assert_eq!(
            message("<% If (a) { %>\nx\n<% Else { %>\ny\n<% Else { %>\nz\n<% } %>\n"),
            "Found Else after an Else"
        );
        assert_eq!(
            message("<% If { %>\nvalue\n<% } %>\n"),
            "Invalid parameter to If"
        );
        assert_eq!(
            message("<% Base64(a) { %>\nx\n<% } %>\n"),
            "Base64 cannot open a block"
        );
    }

    #[test]
    fn test_split_params() {
        assert_eq!(split_params("a, b,c"), vec!["a", "b", "c"]);
        assert_eq!(split_params("\"a,b\", 'c, d'"), vec!["\"a,b\"", "'c, d'"]);
    }
}

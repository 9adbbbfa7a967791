//! Parser for the boolean expressions used by `<% If (...) %>`.
//!
//! Expressions are parsed by precedence climbing: every sub-expression
//! continues for as long as the next operator binds at least as tightly as
//! the current minimum precedence, and a tighter operator starts a nested
//! sub-expression for the right-hand side.
//!
//! | Operator | Precedence | Output |
//! |----------|------------|--------|
//! | `\|\|`   | 1 | `{"Fn::Or": [lhs, rhs]}` |
//! | `&&`     | 2 | `{"Fn::And": [lhs, rhs]}` |
//! | `==`     | 3 | `{"Fn::Equals": [lhs, rhs]}` |
//! | `!=`     | 3 | `{"Fn::Not": [{"Fn::Equals": [lhs, rhs]}]}` |
//!
//! All operators are left-associative.

use once_cell::sync::Lazy;
use regex::Regex;

use super::node::Node;
use crate::error::{Error, Result};

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r#"\(|\)|\|\||&&|==|!="#,
        r#"|"[^"]*"|'[^']*'"#,
        r#"|[A-Za-z0-9_.:\-]+"#,
        r#"|@@\{(?:\$\$[A-Za-z0-9:_.]+|[A-Za-z0-9:_]+)\}"#,
        r#"|@@(?:\$\$)?[A-Za-z0-9:_]+"#,
        r#"|\$\$(?:[A-Za-z0-9_]+|\{[A-Za-z0-9_.]+\})"#,
    ))
    .expect("Invalid expression token regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Or,
    And,
    Equals,
    NotEquals,
}

impl Operator {
    fn from_token(token: &str) -> Option<Self> {
        match token {
            "||" => Some(Operator::Or),
            "&&" => Some(Operator::And),
            "==" => Some(Operator::Equals),
            "!=" => Some(Operator::NotEquals),
            _ => None,
        }
    }

    fn precedence(self) -> u8 {
        match self {
            Operator::Or => 1,
            Operator::And => 2,
            Operator::Equals | Operator::NotEquals => 3,
        }
    }

    fn apply(self, lhs: Node, rhs: Node) -> Node {
        let operands = Node::Uncollapsible(vec![lhs, rhs]);
        match self {
            Operator::Or => Node::func("Fn::Or", operands),
            Operator::And => Node::func("Fn::And", operands),
            Operator::Equals => Node::func("Fn::Equals", operands),
            Operator::NotEquals => Node::func(
                "Fn::Not",
                Node::List(vec![Node::func("Fn::Equals", operands)]),
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token<'a> {
    LeftParen,
    RightParen,
    Op(Operator, &'a str),
    Value(&'a str),
}

impl Token<'_> {
    fn text(&self) -> &str {
        match self {
            Token::LeftParen => "(",
            Token::RightParen => ")",
            Token::Op(_, text) | Token::Value(text) => text,
        }
    }
}

fn tokenize(expr: &str) -> Vec<Token<'_>> {
    TOKEN_RE
        .find_iter(expr)
        .map(|m| {
            let text = m.as_str();
            match text {
                "(" => Token::LeftParen,
                ")" => Token::RightParen,
                _ => match Operator::from_token(text) {
                    Some(op) => Token::Op(op, text),
                    None => Token::Value(text),
                },
            }
        })
        .collect()
}

/// Parses an `If` condition expression.
///
/// Every value is unquoted and handed to `parse_value`, which turns it into
/// a template node (typically by running it through the string parser).
pub fn parse_condition<F>(expr: &str, parse_value: F) -> Result<Node>
where
    F: FnMut(&str) -> Result<Node>,
{
    let tokens = tokenize(expr);
    let mut parser = ExpressionParser {
        tokens: &tokens,
        pos: 0,
        parse_value,
    };

    let result = parser.expression(1)?;

    match parser.peek() {
        None => Ok(result),
        Some(token) => Err(unexpected_token(token)),
    }
}

struct ExpressionParser<'t, 'a, F> {
    tokens: &'t [Token<'a>],
    pos: usize,
    parse_value: F,
}

impl<'t, 'a, F> ExpressionParser<'t, 'a, F>
where
    F: FnMut(&str) -> Result<Node>,
{
    fn peek(&self) -> Option<&'t Token<'a>> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) {
        self.pos += 1;
    }

    fn expression(&mut self, min_precedence: u8) -> Result<Node> {
        let mut lhs = self.atom()?;

        loop {
            let op = match self.peek() {
                Some(Token::Op(op, _)) if op.precedence() >= min_precedence => *op,
                _ => break,
            };

            self.advance();
            let rhs = self.expression(op.precedence() + 1)?;
            lhs = op.apply(lhs, rhs);
        }

        Ok(lhs)
    }

    fn atom(&mut self) -> Result<Node> {
        let token = self
            .peek()
            .cloned()
            .ok_or_else(|| Error::template("Unexpected end of expression"))?;

        match token {
            Token::LeftParen => {
                self.advance();
                let value = self.expression(1)?;

                if self.peek() != Some(&Token::RightParen) {
                    return Err(Error::template("Unmatched \"(\""));
                }

                self.advance();
                Ok(value)
            }
            Token::Op(_, text) => Err(Error::template(format!(
                "Unexpected operator \"{}\" found",
                text
            ))),
            Token::RightParen => Err(unexpected_token(&token)),
            Token::Value(text) => {
                self.advance();
                let text = unquote(text);

                if text.is_empty() {
                    Ok(Node::str(""))
                } else {
                    (self.parse_value)(text)
                }
            }
        }
    }
}

fn unexpected_token(token: &Token<'_>) -> Error {
    Error::template(format!("Unexpected token \"{}\" found", token.text()))
}

fn unquote(text: &str) -> &str {
    let quoted = text.len() >= 2
        && ((text.starts_with('"') && text.ends_with('"'))
            || (text.starts_with('\'') && text.ends_with('\'')));

    if quoted {
        &text[1..text.len() - 1]
    } else {
        text
    }
}

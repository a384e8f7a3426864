//! Boolean condition evaluation over the execution context.
//!
//! The language is deliberately small: equality (`==`, `!=`),
//! membership (`in`), boolean combinators (`&&`, `||`, `!`),
//! parentheses, literals, and root-anchored paths looked up the same
//! way as input-template expressions. Undefined paths evaluate to
//! `null` rather than raising, so a condition probing a missing field
//! is simply not met.
//!
//! Malformed expressions produce a typed [`ConditionError`]; callers
//! use [`evaluate_or_skip`] to degrade that to "not met" with a logged
//! diagnostic, so a bad condition never crashes the triggering
//! operation.

use crate::context::{ExecutionContext, Path};
use crate::error::ConditionError;
use serde_json::Value as JsonValue;
use tracing::warn;

/// Evaluates a condition expression against the context.
///
/// # Errors
///
/// Returns [`ConditionError`] when the expression is malformed.
pub fn evaluate(expression: &str, context: &ExecutionContext) -> Result<bool, ConditionError> {
    let tokens = tokenize(expression)?;
    if tokens.is_empty() {
        return Err(parse_error("empty expression"));
    }

    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        context,
    };
    let value = parser.or_expr()?;
    if parser.pos != tokens.len() {
        return Err(parse_error("unexpected trailing input"));
    }
    Ok(truthy(&value))
}

/// Evaluates an optional condition, treating absence as true and
/// evaluation errors as "not met" with a logged diagnostic.
#[must_use]
pub fn evaluate_or_skip(condition: Option<&str>, context: &ExecutionContext) -> bool {
    let Some(expression) = condition else {
        return true;
    };
    match evaluate(expression, context) {
        Ok(met) => met,
        Err(e) => {
            warn!(condition = expression, error = %e, "condition failed to evaluate, treating as not met");
            false
        }
    }
}

/// JS-flavored truthiness, matching how authors expect CMS conditions
/// to behave: `null`, `false`, `0`, and `""` are false.
fn truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Array(_) | JsonValue::Object(_) => true,
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Path(Path),
    Str(String),
    Num(f64),
    Bool(bool),
    Null,
    In,
    EqEq,
    NotEq,
    Bang,
    AndAnd,
    OrOr,
    LParen,
    RParen,
}

fn parse_error(message: impl Into<String>) -> ConditionError {
    ConditionError::Parse {
        message: message.into(),
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, ConditionError> {
    let mut tokens = Vec::new();
    let bytes = input.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '=' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token::EqEq);
                    i += 2;
                } else {
                    return Err(parse_error("single '=' (did you mean '==')"));
                }
            }
            '!' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token::NotEq);
                    i += 2;
                } else {
                    tokens.push(Token::Bang);
                    i += 1;
                }
            }
            '&' => {
                if bytes.get(i + 1) == Some(&b'&') {
                    tokens.push(Token::AndAnd);
                    i += 2;
                } else {
                    return Err(parse_error("single '&' (did you mean '&&')"));
                }
            }
            '|' => {
                if bytes.get(i + 1) == Some(&b'|') {
                    tokens.push(Token::OrOr);
                    i += 2;
                } else {
                    return Err(parse_error("single '|' (did you mean '||')"));
                }
            }
            '\'' | '"' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                let mut closed = false;
                while i < bytes.len() {
                    let ch = bytes[i] as char;
                    if ch == '\\' && i + 1 < bytes.len() {
                        s.push(bytes[i + 1] as char);
                        i += 2;
                    } else if ch == quote {
                        closed = true;
                        i += 1;
                        break;
                    } else {
                        s.push(ch);
                        i += 1;
                    }
                }
                if !closed {
                    return Err(parse_error("unterminated string literal"));
                }
                tokens.push(Token::Str(s));
            }
            '0'..='9' | '-' => {
                let start = i;
                if c == '-' {
                    i += 1;
                }
                while i < bytes.len() && matches!(bytes[i] as char, '0'..='9' | '.') {
                    i += 1;
                }
                let text = &input[start..i];
                let num: f64 = text
                    .parse()
                    .map_err(|_| parse_error(format!("invalid number '{text}'")))?;
                tokens.push(Token::Num(num));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < bytes.len()
                    && matches!(bytes[i] as char,
                        'a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '-' | '.' | '[' | ']')
                {
                    i += 1;
                }
                let word = &input[start..i];
                match word {
                    "in" => tokens.push(Token::In),
                    "true" => tokens.push(Token::Bool(true)),
                    "false" => tokens.push(Token::Bool(false)),
                    "null" => tokens.push(Token::Null),
                    _ => match Path::parse(word) {
                        Some(path) => tokens.push(Token::Path(path)),
                        None => {
                            return Err(parse_error(format!(
                                "unknown identifier '{word}' (paths must start with 'trigger' or 'steps')"
                            )));
                        }
                    },
                }
            }
            other => return Err(parse_error(format!("unexpected character '{other}'"))),
        }
    }

    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    context: &'a ExecutionContext,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&Token> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn or_expr(&mut self) -> Result<JsonValue, ConditionError> {
        let mut value = self.and_expr()?;
        while self.peek() == Some(&Token::OrOr) {
            self.pos += 1;
            let right = self.and_expr()?;
            value = JsonValue::Bool(truthy(&value) || truthy(&right));
        }
        Ok(value)
    }

    fn and_expr(&mut self) -> Result<JsonValue, ConditionError> {
        let mut value = self.cmp_expr()?;
        while self.peek() == Some(&Token::AndAnd) {
            self.pos += 1;
            let right = self.cmp_expr()?;
            value = JsonValue::Bool(truthy(&value) && truthy(&right));
        }
        Ok(value)
    }

    fn cmp_expr(&mut self) -> Result<JsonValue, ConditionError> {
        let left = self.unary_expr()?;
        enum CmpOp {
            Eq,
            Ne,
            In,
        }
        let op = match self.peek() {
            Some(Token::EqEq) => CmpOp::Eq,
            Some(Token::NotEq) => CmpOp::Ne,
            Some(Token::In) => CmpOp::In,
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.unary_expr()?;

        let result = match op {
            CmpOp::Eq => values_equal(&left, &right),
            CmpOp::Ne => !values_equal(&left, &right),
            CmpOp::In => contains(&left, &right),
        };
        Ok(JsonValue::Bool(result))
    }

    fn unary_expr(&mut self) -> Result<JsonValue, ConditionError> {
        if self.peek() == Some(&Token::Bang) {
            self.pos += 1;
            let value = self.unary_expr()?;
            return Ok(JsonValue::Bool(!truthy(&value)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<JsonValue, ConditionError> {
        match self.advance().cloned() {
            Some(Token::Path(path)) => {
                Ok(self.context.resolve_path(&path).unwrap_or(JsonValue::Null))
            }
            Some(Token::Str(s)) => Ok(JsonValue::String(s)),
            Some(Token::Num(n)) => Ok(serde_json::Number::from_f64(n)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null)),
            Some(Token::Bool(b)) => Ok(JsonValue::Bool(b)),
            Some(Token::Null) => Ok(JsonValue::Null),
            Some(Token::LParen) => {
                let value = self.or_expr()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(value),
                    _ => Err(parse_error("expected ')'")),
                }
            }
            Some(other) => Err(parse_error(format!("unexpected token {other:?}"))),
            None => Err(parse_error("unexpected end of expression")),
        }
    }
}

/// Value equality with numeric normalization (`1 == 1.0`).
fn values_equal(a: &JsonValue, b: &JsonValue) -> bool {
    if let (JsonValue::Number(x), JsonValue::Number(y)) = (a, b) {
        return x.as_f64() == y.as_f64();
    }
    a == b
}

/// Membership: element of an array, substring of a string, or key of
/// an object.
fn contains(needle: &JsonValue, haystack: &JsonValue) -> bool {
    match haystack {
        JsonValue::Array(items) => items.iter().any(|item| values_equal(needle, item)),
        JsonValue::String(s) => needle.as_str().is_some_and(|n| s.contains(n)),
        JsonValue::Object(map) => needle.as_str().is_some_and(|n| map.contains_key(n)),
        _ => false,
    }
}

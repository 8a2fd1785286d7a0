//! Restricted boolean expression language for condition nodes
//!
//! Grammar:
//!
//! ```text
//! expr    := or
//! or      := and (("or" | "||") and)*
//! and     := not (("and" | "&&") not)*
//! not     := ("not" | "!") not | compare
//! compare := operand (("==" | "!=" | "<" | "<=" | ">" | ">=") operand)?
//! operand := literal | path | "(" expr ")"
//! path    := ident ("." ident | "." digits | "[" digits "]" | "[" string "]")*
//! ```
//!
//! Literals are numbers, quoted strings, `true`/`false`/`null` and their
//! `True`/`False`/`None` spellings. There are no function calls or arithmetic.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::value::{compare_values, is_truthy, kind_of, values_equal};

const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExpressionError {
    #[error("Syntax error at position {position}: {message}")]
    Syntax { position: usize, message: String },

    #[error("Unknown variable: {0}")]
    UnknownVariable(String),

    #[error("Cannot compare {left} with {right}")]
    Incomparable { left: String, right: String },
}

impl ExpressionError {
    fn syntax(position: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            position,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Key(String),
    Index(usize),
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    Path(String, Vec<Segment>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare(CompareOp, Box<Expr>, Box<Expr>),
}

/// A parsed condition expression
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Expression {
    source: String,
    root: Expr,
}

impl Expression {
    pub fn parse(source: impl Into<String>) -> Result<Self, ExpressionError> {
        let source = source.into();
        let tokens = tokenize(&source)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
        };
        let root = parser.parse_or()?;

        if let Some((position, token)) = parser.tokens.get(parser.pos) {
            return Err(ExpressionError::syntax(
                *position,
                format!("unexpected token {:?}", token),
            ));
        }

        Ok(Self { source, root })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Names of the top-level variables the expression reads
    pub fn variables(&self) -> Vec<&str> {
        let mut names = Vec::new();
        collect_variables(&self.root, &mut names);
        names
    }

    /// Evaluate to a value; `resolve` maps a top-level variable name to its value
    pub fn evaluate<F>(&self, resolve: F) -> Result<Value, ExpressionError>
    where
        F: Fn(&str) -> Option<Value>,
    {
        eval(&self.root, &resolve)
    }

    /// Evaluate and apply truthiness
    pub fn evaluate_bool<F>(&self, resolve: F) -> Result<bool, ExpressionError>
    where
        F: Fn(&str) -> Option<Value>,
    {
        self.evaluate(resolve).map(|value| is_truthy(&value))
    }
}

impl PartialEq for Expression {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl TryFrom<String> for Expression {
    type Error = ExpressionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Expression> for String {
    fn from(expression: Expression) -> Self {
        expression.source
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn collect_variables<'a>(expr: &'a Expr, names: &mut Vec<&'a str>) {
    match expr {
        Expr::Literal(_) => {}
        Expr::Path(name, _) => {
            if !names.contains(&name.as_str()) {
                names.push(name);
            }
        }
        Expr::Not(inner) => collect_variables(inner, names),
        Expr::And(l, r) | Expr::Or(l, r) | Expr::Compare(_, l, r) => {
            collect_variables(l, names);
            collect_variables(r, names);
        }
    }
}

fn eval<F>(expr: &Expr, resolve: &F) -> Result<Value, ExpressionError>
where
    F: Fn(&str) -> Option<Value>,
{
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Path(name, segments) => {
            let mut value =
                resolve(name).ok_or_else(|| ExpressionError::UnknownVariable(name.clone()))?;

            for segment in segments {
                let next = match (segment, &value) {
                    (Segment::Key(key), Value::Object(map)) => map.get(key).cloned(),
                    (Segment::Index(i), Value::Array(items)) => items.get(*i).cloned(),
                    (Segment::Key(key), Value::Array(items)) => {
                        key.parse::<usize>().ok().and_then(|i| items.get(i).cloned())
                    }
                    _ => None,
                };
                value = next.unwrap_or(Value::Null);
            }

            Ok(value)
        }
        Expr::Not(inner) => Ok(Value::Bool(!is_truthy(&eval(inner, resolve)?))),
        Expr::And(l, r) => {
            if !is_truthy(&eval(l, resolve)?) {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(is_truthy(&eval(r, resolve)?)))
        }
        Expr::Or(l, r) => {
            if is_truthy(&eval(l, resolve)?) {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(is_truthy(&eval(r, resolve)?)))
        }
        Expr::Compare(op, l, r) => {
            let left = eval(l, resolve)?;
            let right = eval(r, resolve)?;
            compare(*op, &left, &right).map(Value::Bool)
        }
    }
}

fn compare(op: CompareOp, left: &Value, right: &Value) -> Result<bool, ExpressionError> {
    match op {
        CompareOp::Eq => return Ok(values_equal(left, right)),
        CompareOp::Ne => return Ok(!values_equal(left, right)),
        _ => {}
    }

    let ordering = compare_values(left, right).ok_or_else(|| ExpressionError::Incomparable {
        left: kind_of(left).to_string(),
        right: kind_of(right).to_string(),
    })?;

    Ok(match op {
        CompareOp::Lt => ordering == Ordering::Less,
        CompareOp::Le => ordering != Ordering::Greater,
        CompareOp::Gt => ordering == Ordering::Greater,
        CompareOp::Ge => ordering != Ordering::Less,
        CompareOp::Eq | CompareOp::Ne => unreachable!("equality handled above"),
    })
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(Value),
    Str(String),
    Ident(String),
    Compare(CompareOp),
    And,
    Or,
    Not,
    Minus,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Dot,
}

fn tokenize(source: &str) -> Result<Vec<(usize, Token)>, ExpressionError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let start = i;

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let two: String = chars[i..(i + 2).min(chars.len())].iter().collect();
        let token = match two.as_str() {
            "==" => Some(Token::Compare(CompareOp::Eq)),
            "!=" => Some(Token::Compare(CompareOp::Ne)),
            "<=" => Some(Token::Compare(CompareOp::Le)),
            ">=" => Some(Token::Compare(CompareOp::Ge)),
            "&&" => Some(Token::And),
            "||" => Some(Token::Or),
            _ => None,
        };

        if let Some(token) = token {
            tokens.push((start, token));
            i += 2;
            continue;
        }

        let token = match c {
            '<' => Token::Compare(CompareOp::Lt),
            '>' => Token::Compare(CompareOp::Gt),
            '!' => Token::Not,
            '-' => Token::Minus,
            '(' => Token::LParen,
            ')' => Token::RParen,
            '[' => Token::LBracket,
            ']' => Token::RBracket,
            '.' => Token::Dot,
            '"' | '\'' => {
                let (text, end) = read_string(&chars, i)?;
                i = end;
                tokens.push((start, Token::Str(text)));
                continue;
            }
            c if c.is_ascii_digit() => {
                let (number, end) = read_number(&chars, i)?;
                i = end;
                tokens.push((start, Token::Number(number)));
                continue;
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut end = i;
                while end < chars.len() && (chars[end].is_alphanumeric() || chars[end] == '_') {
                    end += 1;
                }
                let word: String = chars[i..end].iter().collect();
                i = end;
                let token = match word.as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    _ => Token::Ident(word),
                };
                tokens.push((start, token));
                continue;
            }
            other => {
                return Err(ExpressionError::syntax(
                    start,
                    format!("unexpected character '{}'", other),
                ));
            }
        };

        tokens.push((start, token));
        i += 1;
    }

    Ok(tokens)
}

fn read_string(chars: &[char], start: usize) -> Result<(String, usize), ExpressionError> {
    let quote = chars[start];
    let mut text = String::new();
    let mut i = start + 1;

    while i < chars.len() {
        match chars[i] {
            '\\' if i + 1 < chars.len() => {
                text.push(match chars[i + 1] {
                    'n' => '\n',
                    't' => '\t',
                    other => other,
                });
                i += 2;
            }
            c if c == quote => return Ok((text, i + 1)),
            c => {
                text.push(c);
                i += 1;
            }
        }
    }

    Err(ExpressionError::syntax(start, "unterminated string"))
}

fn read_number(chars: &[char], start: usize) -> Result<(Value, usize), ExpressionError> {
    let mut end = start;
    let mut is_float = false;

    while end < chars.len() {
        let c = chars[end];
        if c.is_ascii_digit() {
            end += 1;
        } else if c == '.'
            && !is_float
            && chars.get(end + 1).is_some_and(|next| next.is_ascii_digit())
        {
            is_float = true;
            end += 1;
        } else {
            break;
        }
    }

    let text: String = chars[start..end].iter().collect();
    let invalid = || ExpressionError::syntax(start, format!("invalid number '{}'", text));

    let value = if is_float {
        let f: f64 = text.parse().map_err(|_| invalid())?;
        serde_json::Number::from_f64(f).map(Value::Number).ok_or_else(invalid)?
    } else {
        match text.parse::<i64>() {
            Ok(i) => Value::from(i),
            Err(_) => {
                let f: f64 = text.parse().map_err(|_| invalid())?;
                serde_json::Number::from_f64(f).map(Value::Number).ok_or_else(invalid)?
            }
        }
    };

    Ok((value, end))
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, token)| token)
    }

    fn position(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|(position, _)| *position)
            .or_else(|| self.tokens.last().map(|(position, _)| position + 1))
            .unwrap_or(0)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(_, token)| token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), ExpressionError> {
        let position = self.position();
        match self.next() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(ExpressionError::syntax(
                position,
                format!("expected {:?}, found {:?}", expected, token),
            )),
            None => Err(ExpressionError::syntax(
                position,
                format!("expected {:?}, found end of input", expected),
            )),
        }
    }

    fn enter(&mut self) -> Result<(), ExpressionError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ExpressionError::syntax(
                self.position(),
                "expression nested too deeply",
            ));
        }
        Ok(())
    }

    fn parse_or(&mut self) -> Result<Expr, ExpressionError> {
        self.enter()?;
        let mut left = self.parse_and()?;

        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }

        self.depth -= 1;
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_not()?;

        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let right = self.parse_not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }

        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, ExpressionError> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            self.enter()?;
            let inner = self.parse_not()?;
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(inner)));
        }

        self.parse_compare()
    }

    fn parse_compare(&mut self) -> Result<Expr, ExpressionError> {
        let left = self.parse_operand()?;

        if let Some(Token::Compare(op)) = self.peek() {
            let op = *op;
            self.pos += 1;
            let right = self.parse_operand()?;
            return Ok(Expr::Compare(op, Box::new(left), Box::new(right)));
        }

        Ok(left)
    }

    fn parse_operand(&mut self) -> Result<Expr, ExpressionError> {
        let position = self.position();

        match self.next() {
            Some(Token::Number(value)) => Ok(Expr::Literal(value)),
            Some(Token::Minus) => match self.next() {
                Some(Token::Number(value)) => Ok(Expr::Literal(negate(&value))),
                _ => Err(ExpressionError::syntax(position, "'-' must precede a number")),
            },
            Some(Token::Str(text)) => Ok(Expr::Literal(Value::String(text))),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(word)) => Ok(match word.as_str() {
                "true" | "True" => Expr::Literal(Value::Bool(true)),
                "false" | "False" => Expr::Literal(Value::Bool(false)),
                "null" | "None" => Expr::Literal(Value::Null),
                _ => {
                    let segments = self.parse_segments()?;
                    Expr::Path(word, segments)
                }
            }),
            Some(token) => Err(ExpressionError::syntax(
                position,
                format!("unexpected token {:?}", token),
            )),
            None => Err(ExpressionError::syntax(position, "unexpected end of input")),
        }
    }

    fn parse_segments(&mut self) -> Result<Vec<Segment>, ExpressionError> {
        let mut segments = Vec::new();

        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.pos += 1;
                    let position = self.position();
                    match self.next() {
                        Some(Token::Ident(key)) => segments.push(Segment::Key(key)),
                        Some(Token::Number(Value::Number(n))) if n.is_u64() => {
                            segments.push(Segment::Index(n.as_u64().unwrap_or_default() as usize))
                        }
                        _ => {
                            return Err(ExpressionError::syntax(
                                position,
                                "expected field name after '.'",
                            ));
                        }
                    }
                }
                Some(Token::LBracket) => {
                    self.pos += 1;
                    let position = self.position();
                    match self.next() {
                        Some(Token::Number(Value::Number(n))) if n.is_u64() => {
                            segments.push(Segment::Index(n.as_u64().unwrap_or_default() as usize))
                        }
                        Some(Token::Str(key)) => segments.push(Segment::Key(key)),
                        _ => {
                            return Err(ExpressionError::syntax(
                                position,
                                "expected index or quoted key inside '[]'",
                            ));
                        }
                    }
                    self.expect(Token::RBracket)?;
                }
                _ => return Ok(segments),
            }
        }
    }
}

fn negate(value: &Value) -> Value {
    match value.as_i64() {
        Some(i) => Value::from(-i),
        None => value
            .as_f64()
            .and_then(|f| serde_json::Number::from_f64(-f))
            .map(Value::Number)
            .unwrap_or(Value::Null),
    }
}

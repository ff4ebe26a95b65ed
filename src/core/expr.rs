//! Guard expressions for conditional steps
//!
//! A guard is a small, strictly typed boolean expression such as
//! `contains(['master', 'development'], branch) && event == 'push'`.
//! Guards are parsed and type-checked when the workflow is loaded, so a
//! comparison like `contains(...) != 1` is rejected up front instead of
//! silently coercing a boolean into a number at run time.

use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Errors raised while parsing, checking or evaluating a guard
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExprError {
    #[error("unexpected character '{0}' at offset {1}")]
    UnexpectedChar(char, usize),

    #[error("unterminated string literal starting at offset {0}")]
    UnterminatedString(usize),

    #[error("invalid number literal '{0}' (quote version strings)")]
    InvalidNumber(String),

    #[error("unexpected {found}, expected {expected}")]
    UnexpectedToken { found: String, expected: String },

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("function '{name}' takes {expected} argument(s), got {got}")]
    Arity {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("type mismatch in '{op}': {left} vs {right}{hint}")]
    TypeMismatch {
        op: String,
        left: Type,
        right: Type,
        hint: String,
    },

    #[error("guard must evaluate to a boolean, found {0}")]
    NotBoolean(Type),

    #[error("unknown identifier '{0}' (expected branch, event, ref, run, matrix.<axis> or env.<NAME>)")]
    UnknownIdentifier(String),
}

/// Static type of an expression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Type {
    Bool,
    Number,
    String,
    List,
    Null,
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Type::Bool => "bool",
            Type::Number => "number",
            Type::String => "string",
            Type::List => "list",
            Type::Null => "null",
        };
        f.write_str(name)
    }
}

/// Runtime value of an expression
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<Value>),
    Null,
}

impl Value {
    pub fn type_of(&self) -> Type {
        match self {
            Value::Bool(_) => Type::Bool,
            Value::Number(_) => Type::Number,
            Value::String(_) => Type::String,
            Value::List(_) => Type::List,
            Value::Null => Type::Null,
        }
    }

    /// Render as the string a shell would see
    pub fn render(&self) -> String {
        match self {
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            Value::String(s) => s.clone(),
            Value::List(items) => items
                .iter()
                .map(Value::render)
                .collect::<Vec<_>>()
                .join(","),
            Value::Null => String::new(),
        }
    }
}

/// Parsed expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    List(Vec<Expr>),
    Ident(String),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Eq(Box<Expr>, Box<Expr>),
    Ne(Box<Expr>, Box<Expr>),
    Call { name: String, args: Vec<Expr> },
}

/// Variables and job status visible to a guard
#[derive(Debug, Clone, Copy)]
pub struct EvalScope<'a> {
    pub variables: &'a HashMap<String, String>,
    pub job_failed: bool,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Not,
    And,
    Or,
    EqEq,
    NotEq,
    Str(String),
    Num(f64),
    Ident(String),
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::LParen => "'('".into(),
            Token::RParen => "')'".into(),
            Token::LBracket => "'['".into(),
            Token::RBracket => "']'".into(),
            Token::Comma => "','".into(),
            Token::Not => "'!'".into(),
            Token::And => "'&&'".into(),
            Token::Or => "'||'".into(),
            Token::EqEq => "'=='".into(),
            Token::NotEq => "'!='".into(),
            Token::Str(s) => format!("string '{}'", s),
            Token::Num(n) => format!("number {}", n),
            Token::Ident(i) => format!("identifier '{}'", i),
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')
}

fn tokenize(input: &str) -> Result<Vec<Token>, ExprError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::NotEq);
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '=' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::EqEq);
                i += 2;
            }
            '&' if chars.get(i + 1) == Some(&'&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if chars.get(i + 1) == Some(&'|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '\'' | '"' => {
                let quote = c;
                let start = i;
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(ExprError::UnterminatedString(start)),
                        // '' inside a single-quoted string is an escaped quote
                        Some(&ch) if ch == quote && chars.get(i + 1) == Some(&quote) => {
                            value.push(quote);
                            i += 2;
                        }
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(&ch) => {
                            value.push(ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(value));
            }
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let number = text
                    .parse::<f64>()
                    .map_err(|_| ExprError::InvalidNumber(text.clone()))?;
                tokens.push(Token::Num(number));
            }
            c if is_ident_start(c) => {
                let start = i;
                while i < chars.len() && is_ident_char(chars[i]) {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(ExprError::UnexpectedChar(other, i)),
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), ExprError> {
        match self.next() {
            Some(ref t) if *t == expected => Ok(()),
            Some(t) => Err(ExprError::UnexpectedToken {
                found: t.describe(),
                expected: expected.describe(),
            }),
            None => Err(ExprError::UnexpectedToken {
                found: "end of expression".into(),
                expected: expected.describe(),
            }),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.next();
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_equality()?;
        while self.peek() == Some(&Token::And) {
            self.next();
            let right = self.parse_equality()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_unary()?;
        loop {
            match self.peek() {
                Some(Token::EqEq) => {
                    self.next();
                    let right = self.parse_unary()?;
                    left = Expr::Eq(Box::new(left), Box::new(right));
                }
                Some(Token::NotEq) => {
                    self.next();
                    let right = self.parse_unary()?;
                    left = Expr::Ne(Box::new(left), Box::new(right));
                }
                _ => return Ok(left),
            }
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ExprError> {
        if self.peek() == Some(&Token::Not) {
            self.next();
            let inner = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ExprError> {
        match self.next() {
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::LBracket) => {
                let mut items = Vec::new();
                if self.peek() == Some(&Token::RBracket) {
                    self.next();
                    return Ok(Expr::List(items));
                }
                loop {
                    items.push(self.parse_or()?);
                    match self.next() {
                        Some(Token::Comma) => continue,
                        Some(Token::RBracket) => break,
                        Some(t) => {
                            return Err(ExprError::UnexpectedToken {
                                found: t.describe(),
                                expected: "',' or ']'".into(),
                            })
                        }
                        None => {
                            return Err(ExprError::UnexpectedToken {
                                found: "end of expression".into(),
                                expected: "']'".into(),
                            })
                        }
                    }
                }
                Ok(Expr::List(items))
            }
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::Num(n)) => Ok(Expr::Literal(Value::Number(n))),
            Some(Token::Ident(name)) => match name.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" => Ok(Expr::Literal(Value::Null)),
                _ if self.peek() == Some(&Token::LParen) => {
                    self.next();
                    let mut args = Vec::new();
                    if self.peek() == Some(&Token::RParen) {
                        self.next();
                    } else {
                        loop {
                            args.push(self.parse_or()?);
                            match self.next() {
                                Some(Token::Comma) => continue,
                                Some(Token::RParen) => break,
                                Some(t) => {
                                    return Err(ExprError::UnexpectedToken {
                                        found: t.describe(),
                                        expected: "',' or ')'".into(),
                                    })
                                }
                                None => {
                                    return Err(ExprError::UnexpectedToken {
                                        found: "end of expression".into(),
                                        expected: "')'".into(),
                                    })
                                }
                            }
                        }
                    }
                    Ok(Expr::Call { name, args })
                }
                _ => Ok(Expr::Ident(name)),
            },
            Some(t) => Err(ExprError::UnexpectedToken {
                found: t.describe(),
                expected: "an operand".into(),
            }),
            None => Err(ExprError::UnexpectedToken {
                found: "end of expression".into(),
                expected: "an operand".into(),
            }),
        }
    }
}

const STATUS_FUNCTIONS: [&str; 3] = ["success", "failure", "always"];

impl Expr {
    /// Parse an expression, accepting an optional `${{ ... }}` wrapper
    pub fn parse(source: &str) -> Result<Expr, ExprError> {
        let trimmed = source.trim();
        let inner = trimmed
            .strip_prefix("${{")
            .and_then(|s| s.strip_suffix("}}"))
            .unwrap_or(trimmed);

        let mut parser = Parser {
            tokens: tokenize(inner)?,
            pos: 0,
        };
        let expr = parser.parse_or()?;
        if let Some(extra) = parser.peek() {
            return Err(ExprError::UnexpectedToken {
                found: extra.describe(),
                expected: "end of expression".into(),
            });
        }
        Ok(expr)
    }

    /// Infer the static type, rejecting mixed-type comparisons and
    /// identifiers that name neither a context variable nor one of `axes`
    pub fn check(&self, axes: &[String]) -> Result<Type, ExprError> {
        match self {
            Expr::Literal(v) => Ok(v.type_of()),
            Expr::List(items) => {
                for item in items {
                    item.check(axes)?;
                }
                Ok(Type::List)
            }
            Expr::Ident(name) => {
                if is_known_identifier(name, axes) {
                    Ok(Type::String)
                } else {
                    Err(ExprError::UnknownIdentifier(name.clone()))
                }
            }
            Expr::Not(inner) => match inner.check(axes)? {
                Type::Bool => Ok(Type::Bool),
                other => Err(ExprError::TypeMismatch {
                    op: "!".into(),
                    left: other,
                    right: Type::Bool,
                    hint: String::new(),
                }),
            },
            Expr::And(l, r) | Expr::Or(l, r) => {
                let op = if matches!(self, Expr::And(..)) { "&&" } else { "||" };
                let (lt, rt) = (l.check(axes)?, r.check(axes)?);
                if lt != Type::Bool || rt != Type::Bool {
                    return Err(ExprError::TypeMismatch {
                        op: op.into(),
                        left: lt,
                        right: rt,
                        hint: String::new(),
                    });
                }
                Ok(Type::Bool)
            }
            Expr::Eq(l, r) | Expr::Ne(l, r) => {
                let op = if matches!(self, Expr::Eq(..)) { "==" } else { "!=" };
                let (lt, rt) = (l.check(axes)?, r.check(axes)?);
                if lt != rt {
                    let hint = if lt == Type::Bool || rt == Type::Bool {
                        "; negate a boolean condition with '!' instead of comparing it".to_string()
                    } else {
                        String::new()
                    };
                    return Err(ExprError::TypeMismatch {
                        op: op.into(),
                        left: lt,
                        right: rt,
                        hint,
                    });
                }
                Ok(Type::Bool)
            }
            Expr::Call { name, args } => check_call(name, args, axes),
        }
    }

    /// Whether the expression references success(), failure() or always()
    pub fn uses_status_function(&self) -> bool {
        match self {
            Expr::Call { name, args } => {
                STATUS_FUNCTIONS.contains(&name.as_str())
                    || args.iter().any(Expr::uses_status_function)
            }
            Expr::List(items) => items.iter().any(Expr::uses_status_function),
            Expr::Not(inner) => inner.uses_status_function(),
            Expr::And(l, r) | Expr::Or(l, r) | Expr::Eq(l, r) | Expr::Ne(l, r) => {
                l.uses_status_function() || r.uses_status_function()
            }
            Expr::Literal(_) | Expr::Ident(_) => false,
        }
    }

    /// Evaluate against a scope; assumes `check` passed
    pub fn eval(&self, scope: &EvalScope<'_>) -> Value {
        match self {
            Expr::Literal(v) => v.clone(),
            Expr::List(items) => Value::List(items.iter().map(|i| i.eval(scope)).collect()),
            Expr::Ident(name) => Value::String(scope.variables.get(name).cloned().unwrap_or_default()),
            Expr::Not(inner) => Value::Bool(!truthy(&inner.eval(scope))),
            Expr::And(l, r) => Value::Bool(truthy(&l.eval(scope)) && truthy(&r.eval(scope))),
            Expr::Or(l, r) => Value::Bool(truthy(&l.eval(scope)) || truthy(&r.eval(scope))),
            Expr::Eq(l, r) => Value::Bool(l.eval(scope) == r.eval(scope)),
            Expr::Ne(l, r) => Value::Bool(l.eval(scope) != r.eval(scope)),
            Expr::Call { name, args } => {
                let values: Vec<Value> = args.iter().map(|a| a.eval(scope)).collect();
                call(name, &values, scope)
            }
        }
    }
}

fn truthy(value: &Value) -> bool {
    matches!(value, Value::Bool(true))
}

const CONTEXT_VARIABLES: [&str; 4] = ["branch", "event", "ref", "run"];

fn is_known_identifier(name: &str, axes: &[String]) -> bool {
    if CONTEXT_VARIABLES.contains(&name) {
        return true;
    }
    if let Some(var) = name.strip_prefix("env.") {
        return !var.is_empty();
    }
    name.strip_prefix("matrix.")
        .is_some_and(|axis| axes.iter().any(|a| a == axis))
}

fn check_call(name: &str, args: &[Expr], axes: &[String]) -> Result<Type, ExprError> {
    let arity = |expected: usize| {
        if args.len() != expected {
            Err(ExprError::Arity {
                name: name.to_string(),
                expected,
                got: args.len(),
            })
        } else {
            Ok(())
        }
    };

    match name {
        "success" | "failure" | "always" => {
            arity(0)?;
            Ok(Type::Bool)
        }
        "contains" => {
            arity(2)?;
            let haystack = args[0].check(axes)?;
            let needle = args[1].check(axes)?;
            if !matches!(haystack, Type::String | Type::List) || needle != Type::String {
                return Err(ExprError::TypeMismatch {
                    op: "contains".into(),
                    left: haystack,
                    right: needle,
                    hint: "; expected contains(string|list, string)".into(),
                });
            }
            Ok(Type::Bool)
        }
        "startsWith" | "endsWith" => {
            arity(2)?;
            let (lt, rt) = (args[0].check(axes)?, args[1].check(axes)?);
            if lt != Type::String || rt != Type::String {
                return Err(ExprError::TypeMismatch {
                    op: name.to_string(),
                    left: lt,
                    right: rt,
                    hint: String::new(),
                });
            }
            Ok(Type::Bool)
        }
        other => Err(ExprError::UnknownFunction(other.to_string())),
    }
}

fn call(name: &str, args: &[Value], scope: &EvalScope<'_>) -> Value {
    match (name, args) {
        ("success", _) => Value::Bool(!scope.job_failed),
        ("failure", _) => Value::Bool(scope.job_failed),
        ("always", _) => Value::Bool(true),
        ("contains", [Value::List(items), needle]) => {
            let needle = needle.render();
            Value::Bool(items.iter().any(|item| item.render() == needle))
        }
        ("contains", [haystack, needle]) => Value::Bool(haystack.render().contains(&needle.render())),
        ("startsWith", [s, prefix]) => Value::Bool(s.render().starts_with(&prefix.render())),
        ("endsWith", [s, suffix]) => Value::Bool(s.render().ends_with(&suffix.render())),
        _ => Value::Null,
    }
}

/// A type-checked step guard
#[derive(Debug, Clone)]
pub struct Guard {
    source: String,
    expr: Expr,
    status_aware: bool,
}

impl Guard {
    /// Parse and type-check a guard expression against the matrix axes
    pub fn parse(source: &str, axes: &[String]) -> Result<Self, ExprError> {
        let expr = Expr::parse(source)?;
        match expr.check(axes)? {
            Type::Bool => {}
            other => return Err(ExprError::NotBoolean(other)),
        }
        Ok(Self {
            source: source.to_string(),
            status_aware: expr.uses_status_function(),
            expr,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether the guard decides for itself after a failed step
    pub fn is_status_aware(&self) -> bool {
        self.status_aware
    }

    /// Whether the guarded step should run.
    ///
    /// Guards without a status function get an implicit `success() &&`.
    pub fn allows(&self, scope: &EvalScope<'_>) -> bool {
        if !self.status_aware && scope.job_failed {
            return false;
        }
        truthy(&self.expr.eval(scope))
    }
}

//! A small, sandboxed template language for user-configured texts.
//!
//! Comments, issue titles, asset fields and conditions are configured as
//! templates. A template is literal text with `${ expr }` placeholders;
//! `$${` produces a literal `${`. Expressions can only read the scope they are
//! given, so no user-provided code ever runs.
//!
//! ```text
//! expr    := or
//! or      := and ('||' and)*
//! and     := unary ('&&' unary)*
//! unary   := '!' unary | cmp
//! cmp     := pipe (('==' | '!=') pipe)?
//! pipe    := primary ('|' filter)*
//! filter  := ident ('(' (expr (',' expr)*)? ')')?
//! primary := path | string | number | true | false | null | '(' expr ')'
//! path    := ident ('.' ident | '[' (number | string) ']')*
//! ```
//!
//! Values follow JavaScript truthiness: `null`, `false`, `0` and `""` are
//! falsy, everything else is truthy. `||` and `&&` return one of their
//! operands, not a boolean.

use serde_json::{Map, Number, Value};

use crate::identity::encode_uri_component;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("unterminated placeholder starting at byte {0}")]
    Unterminated(usize),

    #[error("syntax error at byte {position}: {message}")]
    Syntax { position: usize, message: String },

    #[error("unknown filter `{name}` at byte {position}")]
    UnknownFilter { name: String, position: usize },
}

pub type Result<T> = std::result::Result<T, TemplateError>;

/// A parsed template, ready to render against any scope.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    parts: Vec<Part>,
}

#[derive(Debug, Clone, PartialEq)]
enum Part {
    Text(String),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    Path(Vec<Segment>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare {
        left: Box<Expr>,
        right: Box<Expr>,
        negate: bool,
    },
    Pipe {
        input: Box<Expr>,
        filter: Filter,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Key(String),
    Index(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Filter {
    Join,
    Map,
    Length,
    Upper,
    Lower,
    Trim,
    First,
    Last,
    Default,
    Json,
    UrlEncode,
}

impl Filter {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "join" => Filter::Join,
            "map" => Filter::Map,
            "length" => Filter::Length,
            "upper" => Filter::Upper,
            "lower" => Filter::Lower,
            "trim" => Filter::Trim,
            "first" => Filter::First,
            "last" => Filter::Last,
            "default" => Filter::Default,
            "json" => Filter::Json,
            "urlencode" => Filter::UrlEncode,
            _ => return None,
        })
    }

    /// Accepted argument counts (inclusive).
    fn arity(&self) -> (usize, usize) {
        match self {
            Filter::Join => (0, 1),
            Filter::Map | Filter::Default => (1, 1),
            _ => (0, 0),
        }
    }
}

impl Template {
    pub fn parse(source: &str) -> Result<Self> {
        let bytes = source.as_bytes();
        let mut parts = Vec::new();
        let mut text = String::new();
        let mut last = 0;
        let mut i = 0;

        while i < bytes.len() {
            if bytes[i] != b'$' {
                i += 1;
                continue;
            }
            let rest = &source[i..];
            if rest.starts_with("$${") {
                text.push_str(&source[last..i]);
                text.push_str("${");
                i += 3;
                last = i;
            } else if rest.starts_with("${") {
                text.push_str(&source[last..i]);
                if !text.is_empty() {
                    parts.push(Part::Text(std::mem::take(&mut text)));
                }
                let (tokens, end) = lex(source, i)?;
                let expr = Parser::new(tokens, end).parse()?;
                parts.push(Part::Expr(expr));
                i = end;
                last = i;
            } else {
                i += 1;
            }
        }

        text.push_str(&source[last..]);
        if !text.is_empty() {
            parts.push(Part::Text(text));
        }
        Ok(Self { parts })
    }

    pub fn render(&self, scope: &Value) -> String {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Text(text) => out.push_str(text),
                Part::Expr(expr) => out.push_str(&to_text(&eval(expr, scope))),
            }
        }
        out
    }
}

/// Parse and render `source` against `scope`.
pub fn render(source: &str, scope: &Value) -> Result<String> {
    Ok(Template::parse(source)?.render(scope))
}

/// Render a condition template and read the result as a boolean.
///
/// The condition is false when the trimmed output is empty, `false`, `0`,
/// `null` or `undefined`.
pub fn evaluate_condition(source: &str, scope: &Value) -> Result<bool> {
    let rendered = render(source, scope)?;
    Ok(!matches!(
        rendered.trim(),
        "" | "false" | "0" | "null" | "undefined"
    ))
}

/// Build a scope object from key/value pairs layered over `base`.
pub fn scope_with(base: Map<String, Value>, extra: impl IntoIterator<Item = (&'static str, Value)>) -> Value {
    let mut scope = base;
    for (key, value) in extra {
        scope.insert(key.to_string(), value);
    }
    Value::Object(scope)
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Str(String),
    Num(Value),
    Dot,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Pipe,
    Or,
    And,
    Not,
    Eq,
    Ne,
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    pos: usize,
}

/// Tokenise the placeholder opening at `start` (the `$`). Returns the tokens
/// and the byte offset just past the closing `}`.
fn lex(source: &str, start: usize) -> Result<(Vec<Token>, usize)> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut i = start + 2;

    let syntax = |position: usize, message: &str| TemplateError::Syntax {
        position,
        message: message.to_string(),
    };

    while i < bytes.len() {
        let c = bytes[i];
        let pos = i;
        let next = bytes.get(i + 1).copied();
        let simple = match c {
            b'}' => return Ok((tokens, i + 1)),
            b' ' | b'\t' | b'\n' | b'\r' => {
                i += 1;
                continue;
            }
            b'.' => Some(Tok::Dot),
            b',' => Some(Tok::Comma),
            b'(' => Some(Tok::LParen),
            b')' => Some(Tok::RParen),
            b'[' => Some(Tok::LBracket),
            b']' => Some(Tok::RBracket),
            _ => None,
        };
        if let Some(tok) = simple {
            tokens.push(Token { tok, pos });
            i += 1;
            continue;
        }

        match c {
            b'|' if next == Some(b'|') => {
                tokens.push(Token { tok: Tok::Or, pos });
                i += 2;
            }
            b'|' => {
                tokens.push(Token { tok: Tok::Pipe, pos });
                i += 1;
            }
            b'&' if next == Some(b'&') => {
                tokens.push(Token { tok: Tok::And, pos });
                i += 2;
            }
            b'=' if next == Some(b'=') => {
                tokens.push(Token { tok: Tok::Eq, pos });
                i += if bytes.get(i + 2) == Some(&b'=') { 3 } else { 2 };
            }
            b'!' if next == Some(b'=') => {
                tokens.push(Token { tok: Tok::Ne, pos });
                i += if bytes.get(i + 2) == Some(&b'=') { 3 } else { 2 };
            }
            b'!' => {
                tokens.push(Token { tok: Tok::Not, pos });
                i += 1;
            }
            b'"' | b'\'' => {
                let (value, end) = lex_string(source, i)?;
                tokens.push(Token { tok: Tok::Str(value), pos });
                i = end;
            }
            b'0'..=b'9' => {
                let (value, end) = lex_number(source, i)?;
                tokens.push(Token { tok: Tok::Num(value), pos });
                i = end;
            }
            b'-' if next.map(|n| n.is_ascii_digit()).unwrap_or(false) => {
                let (value, end) = lex_number(source, i)?;
                tokens.push(Token { tok: Tok::Num(value), pos });
                i = end;
            }
            c if c.is_ascii_alphabetic() || c == b'_' || c == b'$' => {
                let end = source[i..]
                    .find(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_' || ch == '$'))
                    .map(|off| i + off)
                    .unwrap_or(bytes.len());
                tokens.push(Token {
                    tok: Tok::Ident(source[i..end].to_string()),
                    pos,
                });
                i = end;
            }
            _ => {
                let ch = source[i..].chars().next().unwrap_or('?');
                return Err(syntax(pos, &format!("unexpected character `{ch}`")));
            }
        }
    }

    Err(TemplateError::Unterminated(start))
}

fn lex_string(source: &str, start: usize) -> Result<(String, usize)> {
    let bytes = source.as_bytes();
    let quote = bytes[start];
    let mut out = Vec::new();
    let mut i = start + 1;

    while i < bytes.len() {
        match bytes[i] {
            b'\\' => {
                let escaped = match bytes.get(i + 1) {
                    Some(b'n') => b'\n',
                    Some(b't') => b'\t',
                    Some(&other) => other,
                    None => break,
                };
                out.push(escaped);
                i += 2;
            }
            c if c == quote => {
                return Ok((String::from_utf8_lossy(&out).into_owned(), i + 1));
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }

    Err(TemplateError::Syntax {
        position: start,
        message: "unterminated string literal".to_string(),
    })
}

fn lex_number(source: &str, start: usize) -> Result<(Value, usize)> {
    let rest = &source[start..];
    let len = rest
        .char_indices()
        .find(|&(idx, ch)| !(ch.is_ascii_digit() || ch == '.' || (idx == 0 && ch == '-')))
        .map(|(idx, _)| idx)
        .unwrap_or(rest.len());
    let literal = &rest[..len];

    let value = if let Ok(int) = literal.parse::<i64>() {
        Value::Number(int.into())
    } else {
        literal
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| TemplateError::Syntax {
                position: start,
                message: format!("invalid number `{literal}`"),
            })?
    };
    Ok((value, start + len))
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<Token>,
    index: usize,
    /// Offset of the closing brace, used for "unexpected end" errors.
    end: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>, end: usize) -> Self {
        Self {
            tokens,
            index: 0,
            end: end.saturating_sub(1),
        }
    }

    fn parse(mut self) -> Result<Expr> {
        if self.tokens.is_empty() {
            return Err(self.error_here("empty placeholder"));
        }
        let expr = self.or()?;
        if self.peek().is_some() {
            return Err(self.error_here("unexpected token"));
        }
        Ok(expr)
    }

    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.index).map(|t| &t.tok)
    }

    fn position(&self) -> usize {
        self.tokens
            .get(self.index)
            .map(|t| t.pos)
            .unwrap_or(self.end)
    }

    fn error_here(&self, message: &str) -> TemplateError {
        TemplateError::Syntax {
            position: self.position(),
            message: message.to_string(),
        }
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek() == Some(tok) {
            self.index += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: &Tok, what: &str) -> Result<()> {
        if self.eat(tok) {
            Ok(())
        } else {
            Err(self.error_here(&format!("expected {what}")))
        }
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.index).cloned();
        if token.is_some() {
            self.index += 1;
        }
        token
    }

    fn or(&mut self) -> Result<Expr> {
        let mut left = self.and()?;
        while self.eat(&Tok::Or) {
            let right = self.and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr> {
        let mut left = self.unary()?;
        while self.eat(&Tok::And) {
            let right = self.unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr> {
        if self.eat(&Tok::Not) {
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        self.compare()
    }

    fn compare(&mut self) -> Result<Expr> {
        let left = self.pipe()?;
        let negate = if self.eat(&Tok::Eq) {
            false
        } else if self.eat(&Tok::Ne) {
            true
        } else {
            return Ok(left);
        };
        let right = self.pipe()?;
        Ok(Expr::Compare {
            left: Box::new(left),
            right: Box::new(right),
            negate,
        })
    }

    fn pipe(&mut self) -> Result<Expr> {
        let mut expr = self.primary()?;
        while self.eat(&Tok::Pipe) {
            let position = self.position();
            let name = match self.next() {
                Some(Token {
                    tok: Tok::Ident(name),
                    ..
                }) => name,
                _ => {
                    return Err(TemplateError::Syntax {
                        position,
                        message: "expected filter name".to_string(),
                    })
                }
            };
            let filter = Filter::from_name(&name).ok_or(TemplateError::UnknownFilter {
                name: name.clone(),
                position,
            })?;

            let mut args = Vec::new();
            if self.eat(&Tok::LParen) && !self.eat(&Tok::RParen) {
                loop {
                    args.push(self.or()?);
                    if self.eat(&Tok::Comma) {
                        continue;
                    }
                    self.expect(&Tok::RParen, "`)`")?;
                    break;
                }
            }

            let (min, max) = filter.arity();
            if args.len() < min || args.len() > max {
                return Err(TemplateError::Syntax {
                    position,
                    message: format!("filter `{name}` takes {min}..={max} argument(s), got {}", args.len()),
                });
            }

            expr = Expr::Pipe {
                input: Box::new(expr),
                filter,
                args,
            };
        }
        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr> {
        let position = self.position();
        let token = self.next().ok_or_else(|| TemplateError::Syntax {
            position,
            message: "unexpected end of expression".to_string(),
        })?;

        match token.tok {
            Tok::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Tok::Num(n) => Ok(Expr::Literal(n)),
            Tok::LParen => {
                let inner = self.or()?;
                self.expect(&Tok::RParen, "`)`")?;
                Ok(inner)
            }
            Tok::Ident(ident) => match ident.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" | "undefined" => Ok(Expr::Literal(Value::Null)),
                _ => self.path(ident),
            },
            _ => Err(TemplateError::Syntax {
                position,
                message: "expected a value".to_string(),
            }),
        }
    }

    fn path(&mut self, root: String) -> Result<Expr> {
        let mut segments = vec![Segment::Key(root)];
        loop {
            if self.eat(&Tok::Dot) {
                let position = self.position();
                match self.next() {
                    Some(Token {
                        tok: Tok::Ident(key),
                        ..
                    }) => segments.push(Segment::Key(key)),
                    _ => {
                        return Err(TemplateError::Syntax {
                            position,
                            message: "expected property name after `.`".to_string(),
                        })
                    }
                }
            } else if self.eat(&Tok::LBracket) {
                let position = self.position();
                let segment = match self.next().map(|t| t.tok) {
                    Some(Tok::Str(key)) => Segment::Key(key),
                    Some(Tok::Num(Value::Number(n))) if n.as_u64().is_some() => {
                        Segment::Index(n.as_u64().unwrap_or_default() as usize)
                    }
                    _ => {
                        return Err(TemplateError::Syntax {
                            position,
                            message: "expected index or quoted key".to_string(),
                        })
                    }
                };
                segments.push(segment);
                self.expect(&Tok::RBracket, "`]`")?;
            } else {
                return Ok(Expr::Path(segments));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

fn eval(expr: &Expr, scope: &Value) -> Value {
    match expr {
        Expr::Literal(value) => value.clone(),
        Expr::Path(segments) => lookup(scope, segments).cloned().unwrap_or(Value::Null),
        Expr::Not(inner) => Value::Bool(!truthy(&eval(inner, scope))),
        Expr::And(left, right) => {
            let left = eval(left, scope);
            if truthy(&left) {
                eval(right, scope)
            } else {
                left
            }
        }
        Expr::Or(left, right) => {
            let left = eval(left, scope);
            if truthy(&left) {
                left
            } else {
                eval(right, scope)
            }
        }
        Expr::Compare {
            left,
            right,
            negate,
        } => {
            let equal = loose_eq(&eval(left, scope), &eval(right, scope));
            Value::Bool(equal != *negate)
        }
        Expr::Pipe {
            input,
            filter,
            args,
        } => {
            let input = eval(input, scope);
            let args: Vec<Value> = args.iter().map(|a| eval(a, scope)).collect();
            apply_filter(*filter, input, &args)
        }
    }
}

fn lookup<'v>(scope: &'v Value, segments: &[Segment]) -> Option<&'v Value> {
    segments.iter().try_fold(scope, |value, segment| match segment {
        Segment::Key(key) => value.as_object().and_then(|map| map.get(key)),
        Segment::Index(idx) => value.as_array().and_then(|items| items.get(*idx)),
    })
}

fn apply_filter(filter: Filter, input: Value, args: &[Value]) -> Value {
    match filter {
        Filter::Join => {
            let separator = args.first().map(to_text).unwrap_or_else(|| ",".to_string());
            match input {
                Value::Array(items) => Value::String(
                    items.iter().map(to_text).collect::<Vec<_>>().join(&separator),
                ),
                other => Value::String(to_text(&other)),
            }
        }
        Filter::Map => {
            let field = args.first().map(to_text).unwrap_or_default();
            let segments: Vec<Segment> = field
                .split('.')
                .map(|key| Segment::Key(key.to_string()))
                .collect();
            match input {
                Value::Array(items) => Value::Array(
                    items
                        .iter()
                        .map(|item| lookup(item, &segments).cloned().unwrap_or(Value::Null))
                        .collect(),
                ),
                _ => Value::Array(Vec::new()),
            }
        }
        Filter::Length => {
            let len = match &input {
                Value::Array(items) => items.len(),
                Value::Object(map) => map.len(),
                Value::String(s) => s.chars().count(),
                Value::Null => 0,
                other => to_text(other).chars().count(),
            };
            Value::Number(Number::from(len as u64))
        }
        Filter::Upper => Value::String(to_text(&input).to_uppercase()),
        Filter::Lower => Value::String(to_text(&input).to_lowercase()),
        Filter::Trim => Value::String(to_text(&input).trim().to_string()),
        Filter::First => match input {
            Value::Array(items) => items.into_iter().next().unwrap_or(Value::Null),
            Value::String(s) => s
                .chars()
                .next()
                .map(|c| Value::String(c.to_string()))
                .unwrap_or(Value::Null),
            _ => Value::Null,
        },
        Filter::Last => match input {
            Value::Array(items) => items.into_iter().last().unwrap_or(Value::Null),
            Value::String(s) => s
                .chars()
                .last()
                .map(|c| Value::String(c.to_string()))
                .unwrap_or(Value::Null),
            _ => Value::Null,
        },
        Filter::Default => {
            if truthy(&input) {
                input
            } else {
                args.first().cloned().unwrap_or(Value::Null)
            }
        }
        Filter::Json => Value::String(serde_json::to_string(&input).unwrap_or_default()),
        Filter::UrlEncode => Value::String(encode_uri_component(&to_text(&input))),
    }
}

/// JavaScript-style truthiness.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (Value::Number(_), Value::String(_)) | (Value::String(_), Value::Number(_)) => {
            to_text(left) == to_text(right)
        }
        _ => left == right,
    }
}

/// Text form of a value: strings verbatim, `null` empty, arrays joined with
/// `,`, objects as compact JSON.
pub fn to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items.iter().map(to_text).collect::<Vec<_>>().join(","),
        Value::Object(_) => serde_json::to_string(value).unwrap_or_default(),
    }
}

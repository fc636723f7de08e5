//! Built-in script evaluator.
//!
//! A small expression-statement interpreter behind the [`ScriptEngine`]
//! seam: number/string/boolean/nil literals, global variables with
//! assignment, `..` concatenation, arithmetic, comparisons, and a trailing
//! `return`. Globals persist across evaluations within one instance, which
//! is what gives `[[[__LUA__(x = 1)]]]` … `[[[__LUA__(x)]]]` its cross-call
//! state. It is deliberately tiny — a real runtime can replace it through
//! the trait without the engine noticing.
//!
//! Statement-position expressions are allowed (and discarded), which is
//! looser than Lua; the engine's fallback path never depends on that.

use std::collections::HashMap;
use std::fmt;

use crate::script::{ScriptEngine, ScriptError};

// ============================================================================
// VALUES
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Nil,
    Bool(bool),
    Num(f64),
    Str(String),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Num(_) => "number",
            Value::Str(_) => "string",
        }
    }

    /// Textual representation, if the value has one. Nil and booleans do
    /// not, mirroring the original runtime's string-coercion rules.
    fn to_text(&self) -> Option<String> {
        match self {
            Value::Num(n) => Some(fmt_number(*n)),
            Value::Str(s) => Some(s.clone()),
            Value::Nil | Value::Bool(_) => None,
        }
    }
}

fn fmt_number(n: f64) -> String {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

// ============================================================================
// LEXER
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Num(f64),
    Str(String),
    Ident(String),
    Return,
    Nil,
    True,
    False,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Concat,
    LParen,
    RParen,
    Assign,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Semi,
}

impl fmt::Display for Tok {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Tok::Num(n) => return write!(f, "{}", fmt_number(*n)),
            Tok::Str(s) => return write!(f, "{s}"),
            Tok::Ident(name) => return write!(f, "{name}"),
            Tok::Return => "return",
            Tok::Nil => "nil",
            Tok::True => "true",
            Tok::False => "false",
            Tok::Plus => "+",
            Tok::Minus => "-",
            Tok::Star => "*",
            Tok::Slash => "/",
            Tok::Percent => "%",
            Tok::Concat => "..",
            Tok::LParen => "(",
            Tok::RParen => ")",
            Tok::Assign => "=",
            Tok::Eq => "==",
            Tok::Ne => "~=",
            Tok::Lt => "<",
            Tok::Le => "<=",
            Tok::Gt => ">",
            Tok::Ge => ">=",
            Tok::Semi => ";",
        };
        f.write_str(text)
    }
}

fn tokenize(source: &str) -> Result<Vec<Tok>, ScriptError> {
    let bytes = source.as_bytes();
    let mut toks = Vec::new();
    let mut p = 0;
    while p < bytes.len() {
        let c = bytes[p];
        match c {
            b' ' | b'\t' | b'\r' | b'\n' => p += 1,
            b'+' => {
                toks.push(Tok::Plus);
                p += 1;
            }
            b'-' => {
                toks.push(Tok::Minus);
                p += 1;
            }
            b'*' => {
                toks.push(Tok::Star);
                p += 1;
            }
            b'/' => {
                toks.push(Tok::Slash);
                p += 1;
            }
            b'%' => {
                toks.push(Tok::Percent);
                p += 1;
            }
            b'(' => {
                toks.push(Tok::LParen);
                p += 1;
            }
            b')' => {
                toks.push(Tok::RParen);
                p += 1;
            }
            b';' => {
                toks.push(Tok::Semi);
                p += 1;
            }
            b'.' => {
                if bytes.get(p + 1) == Some(&b'.') {
                    toks.push(Tok::Concat);
                    p += 2;
                } else {
                    return Err(ScriptError::load("unexpected symbol near '.'"));
                }
            }
            b'=' => {
                if bytes.get(p + 1) == Some(&b'=') {
                    toks.push(Tok::Eq);
                    p += 2;
                } else {
                    toks.push(Tok::Assign);
                    p += 1;
                }
            }
            b'~' => {
                if bytes.get(p + 1) == Some(&b'=') {
                    toks.push(Tok::Ne);
                    p += 2;
                } else {
                    return Err(ScriptError::load("unexpected symbol near '~'"));
                }
            }
            b'<' => {
                if bytes.get(p + 1) == Some(&b'=') {
                    toks.push(Tok::Le);
                    p += 2;
                } else {
                    toks.push(Tok::Lt);
                    p += 1;
                }
            }
            b'>' => {
                if bytes.get(p + 1) == Some(&b'=') {
                    toks.push(Tok::Ge);
                    p += 2;
                } else {
                    toks.push(Tok::Gt);
                    p += 1;
                }
            }
            b'"' | b'\'' => {
                let (tok, next) = lex_string(source, p)?;
                toks.push(tok);
                p = next;
            }
            b'0'..=b'9' => {
                let (tok, next) = lex_number(source, p)?;
                toks.push(tok);
                p = next;
            }
            c if c == b'_' || c.is_ascii_alphabetic() => {
                let start = p;
                while p < bytes.len() && (bytes[p] == b'_' || bytes[p].is_ascii_alphanumeric()) {
                    p += 1;
                }
                toks.push(match &source[start..p] {
                    "return" => Tok::Return,
                    "nil" => Tok::Nil,
                    "true" => Tok::True,
                    "false" => Tok::False,
                    name => Tok::Ident(name.to_string()),
                });
            }
            other => {
                return Err(ScriptError::load(format!(
                    "unexpected symbol near '{}'",
                    char::from(other)
                )));
            }
        }
    }
    Ok(toks)
}

fn lex_string(source: &str, start: usize) -> Result<(Tok, usize), ScriptError> {
    let bytes = source.as_bytes();
    let delim = bytes[start];
    let mut text = String::new();
    let mut p = start + 1;
    while p < bytes.len() {
        match bytes[p] {
            b'\\' => {
                let escaped = match bytes.get(p + 1) {
                    Some(b'n') => '\n',
                    Some(b't') => '\t',
                    Some(b'r') => '\r',
                    Some(b'\\') => '\\',
                    Some(b'"') => '"',
                    Some(b'\'') => '\'',
                    _ => return Err(ScriptError::load("invalid escape sequence")),
                };
                text.push(escaped);
                p += 2;
            }
            c if c == delim => return Ok((Tok::Str(text), p + 1)),
            b'\n' => return Err(ScriptError::load("unfinished string")),
            _ => {
                // Copy a full UTF-8 scalar so multibyte text survives.
                let rest = &source[p..];
                let ch = match rest.chars().next() {
                    Some(ch) => ch,
                    None => break,
                };
                text.push(ch);
                p += ch.len_utf8();
            }
        }
    }
    Err(ScriptError::load("unfinished string"))
}

fn lex_number(source: &str, start: usize) -> Result<(Tok, usize), ScriptError> {
    let bytes = source.as_bytes();
    let mut p = start;
    while p < bytes.len() && (bytes[p].is_ascii_digit() || bytes[p] == b'.') {
        p += 1;
    }
    if p < bytes.len() && (bytes[p] == b'e' || bytes[p] == b'E') {
        p += 1;
        if p < bytes.len() && (bytes[p] == b'+' || bytes[p] == b'-') {
            p += 1;
        }
        while p < bytes.len() && bytes[p].is_ascii_digit() {
            p += 1;
        }
    }
    match source[start..p].parse::<f64>() {
        Ok(n) => Ok((Tok::Num(n), p)),
        Err(_) => Err(ScriptError::load("malformed number")),
    }
}

// ============================================================================
// PARSER
// ============================================================================

#[derive(Debug, Clone)]
enum Expr {
    Lit(Value),
    Var(String),
    Unary(Tok, Box<Expr>),
    Binary(Tok, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone)]
enum Stmt {
    Assign(String, Expr),
    Discard(Expr),
    Return(Option<Expr>),
}

struct Parser {
    toks: Vec<Tok>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos)
    }

    fn unexpected(&self) -> ScriptError {
        match self.peek() {
            Some(tok) => ScriptError::load(format!("unexpected symbol near '{tok}'")),
            None => ScriptError::load("unexpected symbol near '<eof>'"),
        }
    }

    fn parse_program(&mut self) -> Result<Vec<Stmt>, ScriptError> {
        let mut stmts = Vec::new();
        loop {
            while self.peek() == Some(&Tok::Semi) {
                self.pos += 1;
            }
            if self.peek().is_none() {
                return Ok(stmts);
            }
            let stmt = self.parse_stmt()?;
            let was_return = matches!(stmt, Stmt::Return(_));
            stmts.push(stmt);
            if was_return {
                while self.peek() == Some(&Tok::Semi) {
                    self.pos += 1;
                }
                if self.peek().is_some() {
                    return Err(self.unexpected());
                }
                return Ok(stmts);
            }
        }
    }

    fn parse_stmt(&mut self) -> Result<Stmt, ScriptError> {
        if self.peek() == Some(&Tok::Return) {
            self.pos += 1;
            if self.peek().is_none() || self.peek() == Some(&Tok::Semi) {
                return Ok(Stmt::Return(None));
            }
            return Ok(Stmt::Return(Some(self.parse_expr()?)));
        }
        if let Some(Tok::Ident(name)) = self.peek() {
            if self.toks.get(self.pos + 1) == Some(&Tok::Assign) {
                let name = name.clone();
                self.pos += 2;
                return Ok(Stmt::Assign(name, self.parse_expr()?));
            }
        }
        Ok(Stmt::Discard(self.parse_expr()?))
    }

    fn parse_expr(&mut self) -> Result<Expr, ScriptError> {
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ScriptError> {
        let mut lhs = self.parse_concat()?;
        while let Some(op @ (Tok::Eq | Tok::Ne | Tok::Lt | Tok::Le | Tok::Gt | Tok::Ge)) =
            self.peek().cloned()
        {
            self.pos += 1;
            let rhs = self.parse_concat()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_concat(&mut self) -> Result<Expr, ScriptError> {
        let mut lhs = self.parse_additive()?;
        while self.peek() == Some(&Tok::Concat) {
            self.pos += 1;
            let rhs = self.parse_additive()?;
            lhs = Expr::Binary(Tok::Concat, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr, ScriptError> {
        let mut lhs = self.parse_multiplicative()?;
        while let Some(op @ (Tok::Plus | Tok::Minus)) = self.peek().cloned() {
            self.pos += 1;
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ScriptError> {
        let mut lhs = self.parse_unary()?;
        while let Some(op @ (Tok::Star | Tok::Slash | Tok::Percent)) = self.peek().cloned() {
            self.pos += 1;
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ScriptError> {
        if self.peek() == Some(&Tok::Minus) {
            self.pos += 1;
            return Ok(Expr::Unary(Tok::Minus, Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ScriptError> {
        let expr = match self.peek() {
            Some(Tok::Num(n)) => Expr::Lit(Value::Num(*n)),
            Some(Tok::Str(s)) => Expr::Lit(Value::Str(s.clone())),
            Some(Tok::Nil) => Expr::Lit(Value::Nil),
            Some(Tok::True) => Expr::Lit(Value::Bool(true)),
            Some(Tok::False) => Expr::Lit(Value::Bool(false)),
            Some(Tok::Ident(name)) => Expr::Var(name.clone()),
            Some(Tok::LParen) => {
                self.pos += 1;
                let inner = self.parse_expr()?;
                if self.peek() != Some(&Tok::RParen) {
                    return Err(self.unexpected());
                }
                self.pos += 1;
                return Ok(inner);
            }
            _ => return Err(self.unexpected()),
        };
        self.pos += 1;
        Ok(expr)
    }
}

// ============================================================================
// EVALUATION
// ============================================================================

/// The built-in interpreter: a persistent global environment plus the
/// lex/parse/execute pipeline above.
#[derive(Debug, Default)]
pub struct Interp {
    globals: HashMap<String, Value>,
}

impl Interp {
    pub fn new() -> Self {
        Self::default()
    }

    fn eval_expr(&self, expr: &Expr) -> Result<Value, ScriptError> {
        match expr {
            Expr::Lit(value) => Ok(value.clone()),
            // Unknown globals read as nil.
            Expr::Var(name) => Ok(self.globals.get(name).cloned().unwrap_or(Value::Nil)),
            Expr::Unary(_, inner) => match self.eval_expr(inner)? {
                Value::Num(n) => Ok(Value::Num(-n)),
                other => Err(arith_error(&other)),
            },
            Expr::Binary(op, lhs, rhs) => {
                let lhs = self.eval_expr(lhs)?;
                let rhs = self.eval_expr(rhs)?;
                self.eval_binary(op, lhs, rhs)
            }
        }
    }

    fn eval_binary(&self, op: &Tok, lhs: Value, rhs: Value) -> Result<Value, ScriptError> {
        match op {
            Tok::Concat => {
                let lhs = concat_text(&lhs)?;
                let rhs = concat_text(&rhs)?;
                Ok(Value::Str(lhs + &rhs))
            }
            Tok::Eq => Ok(Value::Bool(lhs == rhs)),
            Tok::Ne => Ok(Value::Bool(lhs != rhs)),
            Tok::Lt | Tok::Le | Tok::Gt | Tok::Ge => {
                let ordering = match (&lhs, &rhs) {
                    (Value::Num(a), Value::Num(b)) => a.partial_cmp(b),
                    (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
                    _ => {
                        return Err(ScriptError::eval(format!(
                            "attempt to compare {} with {}",
                            lhs.type_name(),
                            rhs.type_name()
                        )));
                    }
                };
                let holds = match (op, ordering) {
                    (Tok::Lt, Some(ord)) => ord.is_lt(),
                    (Tok::Le, Some(ord)) => ord.is_le(),
                    (Tok::Gt, Some(ord)) => ord.is_gt(),
                    (Tok::Ge, Some(ord)) => ord.is_ge(),
                    _ => false,
                };
                Ok(Value::Bool(holds))
            }
            _ => {
                let (a, b) = match (&lhs, &rhs) {
                    (Value::Num(a), Value::Num(b)) => (*a, *b),
                    (Value::Num(_), other) | (other, _) => return Err(arith_error(other)),
                };
                let result = match op {
                    Tok::Plus => a + b,
                    Tok::Minus => a - b,
                    Tok::Star => a * b,
                    Tok::Slash => a / b,
                    _ => a % b,
                };
                Ok(Value::Num(result))
            }
        }
    }

    fn exec(&mut self, stmts: &[Stmt]) -> Result<Value, ScriptError> {
        for stmt in stmts {
            match stmt {
                Stmt::Assign(name, expr) => {
                    let value = self.eval_expr(expr)?;
                    self.globals.insert(name.clone(), value);
                }
                Stmt::Discard(expr) => {
                    self.eval_expr(expr)?;
                }
                Stmt::Return(expr) => {
                    return match expr {
                        Some(expr) => self.eval_expr(expr),
                        None => Ok(Value::Nil),
                    };
                }
            }
        }
        Ok(Value::Nil)
    }
}

fn arith_error(value: &Value) -> ScriptError {
    ScriptError::eval(format!(
        "attempt to perform arithmetic on a {} value",
        value.type_name()
    ))
}

fn concat_text(value: &Value) -> Result<String, ScriptError> {
    match value {
        Value::Num(n) => Ok(fmt_number(*n)),
        Value::Str(s) => Ok(s.clone()),
        other => Err(ScriptError::eval(format!(
            "attempt to concatenate a {} value",
            other.type_name()
        ))),
    }
}

impl ScriptEngine for Interp {
    fn eval(&mut self, program: &str) -> Result<Option<String>, ScriptError> {
        let toks = tokenize(program)?;
        let mut parser = Parser { toks, pos: 0 };
        let stmts = parser.parse_program()?;
        let value = self.exec(&stmts)?;
        Ok(value.to_text())
    }
}

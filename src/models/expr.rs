//! Target-model summand expressions.
//!
//! A summand is a small algebraic expression in the time delay `t` and decay
//! constants `k0, k1, ...`, for example `k0*exp(-t/k0) - exp(-t/k1)`.
//!
//! Grammar (precedence low to high):
//!
//! ```text
//! expr   := term (('+' | '-') term)*
//! term   := unary (('*' | '/') unary)*
//! unary  := ('-' | '+') unary | power
//! power  := atom ('**' unary)?
//! atom   := number | 't' | k<N> | exp '(' expr ')' | '(' expr ')'
//! ```
//!
//! `exp` may also be spelled `np.exp` or `numpy.exp`. Anything else is rejected
//! at parse time; nothing is ever executed.

use std::fmt;

use crate::domain::{ComponentSelection, tau_name};
use crate::error::{Result, SvdgfError};

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Number(f64),
    Time,
    Decay(usize),
    Exp,
    Plus,
    Minus,
    Star,
    Slash,
    Pow,
    LParen,
    RParen,
}

/// A token plus the byte range it came from.
#[derive(Debug, Clone, Copy)]
struct Spanned {
    token: Token,
    start: usize,
    end: usize,
}

fn tokenize(src: &str) -> Result<Vec<Spanned>> {
    let bytes = src.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        let start = i;
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }

        let token = if c.is_ascii_digit() || (c == b'.' && bytes.get(i + 1).is_some_and(u8::is_ascii_digit)) {
            i = scan_number(bytes, i);
            let text = &src[start..i];
            let value = text
                .parse::<f64>()
                .map_err(|_| SvdgfError::parse(format!("malformed number '{text}'")))?;
            Token::Number(value)
        } else if c.is_ascii_alphabetic() || c == b'_' {
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_' || bytes[i] == b'.') {
                i += 1;
            }
            identifier(&src[start..i])?
        } else {
            i += 1;
            match c {
                b'+' => Token::Plus,
                b'-' => Token::Minus,
                b'*' if bytes.get(i) == Some(&b'*') => {
                    i += 1;
                    Token::Pow
                }
                b'*' => Token::Star,
                b'/' => Token::Slash,
                b'(' => Token::LParen,
                b')' => Token::RParen,
                b'^' => return Err(SvdgfError::parse("'^' is not a power operator; use '**'")),
                _ => {
                    let ch = src[start..].chars().next().unwrap_or('?');
                    return Err(SvdgfError::parse(format!("unexpected character '{ch}'")));
                }
            }
        };

        out.push(Spanned { token, start, end: i });
    }

    Ok(out)
}

fn scan_number(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    if i < bytes.len() && bytes[i] == b'.' {
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
    }
    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        let mut j = i + 1;
        if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
            j += 1;
        }
        if j < bytes.len() && bytes[j].is_ascii_digit() {
            while j < bytes.len() && bytes[j].is_ascii_digit() {
                j += 1;
            }
            i = j;
        }
    }
    i
}

fn identifier(word: &str) -> Result<Token> {
    match word {
        "t" => return Ok(Token::Time),
        "exp" | "np.exp" | "numpy.exp" => return Ok(Token::Exp),
        _ => {}
    }

    if let Some(digits) = word.strip_prefix('k') {
        if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
            if digits.len() > 1 && digits.starts_with('0') {
                return Err(SvdgfError::parse(format!(
                    "'{word}' has a leading zero; write k{}",
                    digits.trim_start_matches('0').parse::<usize>().unwrap_or(0)
                )));
            }
            let index = digits
                .parse::<usize>()
                .map_err(|_| SvdgfError::parse(format!("decay index in '{word}' is too large")))?;
            return Ok(Token::Decay(index));
        }
    }

    Err(SvdgfError::parse(format!(
        "unknown symbol '{word}' (allowed: t, k<N>, exp, numbers, + - * / ** and parentheses)"
    )))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

/// Expression tree. `Decay` holds a component index before binding and a
/// position in the decay-constant slice after binding.
#[derive(Debug, Clone, PartialEq)]
enum Node {
    Number(f64),
    Time,
    Decay(usize),
    Neg(Box<Node>),
    Exp(Box<Node>),
    Binary(BinOp, Box<Node>, Box<Node>),
}

impl Node {
    fn eval(&self, t: f64, taus: &[f64]) -> f64 {
        match self {
            Node::Number(v) => *v,
            Node::Time => t,
            Node::Decay(pos) => taus[*pos],
            Node::Neg(inner) => -inner.eval(t, taus),
            Node::Exp(inner) => inner.eval(t, taus).exp(),
            Node::Binary(op, lhs, rhs) => {
                let (a, b) = (lhs.eval(t, taus), rhs.eval(t, taus));
                match op {
                    BinOp::Add => a + b,
                    BinOp::Sub => a - b,
                    BinOp::Mul => a * b,
                    BinOp::Div => a / b,
                    BinOp::Pow => a.powf(b),
                }
            }
        }
    }

    fn map_decays(&self, f: &impl Fn(usize) -> usize) -> Node {
        match self {
            Node::Decay(c) => Node::Decay(f(*c)),
            Node::Neg(inner) => Node::Neg(Box::new(inner.map_decays(f))),
            Node::Exp(inner) => Node::Exp(Box::new(inner.map_decays(f))),
            Node::Binary(op, lhs, rhs) => {
                Node::Binary(*op, Box::new(lhs.map_decays(f)), Box::new(rhs.map_decays(f)))
            }
            other => other.clone(),
        }
    }
}

struct Parser<'a> {
    tokens: &'a [Spanned],
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).map(|s| s.token)
    }

    fn bump(&mut self) -> Option<Token> {
        let tok = self.peek();
        self.pos += 1;
        tok
    }

    fn expect(&mut self, want: Token, what: &str) -> Result<()> {
        match self.bump() {
            Some(tok) if tok == want => Ok(()),
            Some(tok) => Err(SvdgfError::parse(format!("expected {what}, found {}", describe(tok)))),
            None => Err(SvdgfError::parse(format!("expected {what}, found end of expression"))),
        }
    }

    fn expr(&mut self) -> Result<Node> {
        let mut lhs = self.term()?;
        while let Some(tok @ (Token::Plus | Token::Minus)) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            let op = if tok == Token::Plus { BinOp::Add } else { BinOp::Sub };
            lhs = Node::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Node> {
        let mut lhs = self.unary()?;
        while let Some(tok @ (Token::Star | Token::Slash)) = self.peek() {
            self.pos += 1;
            let rhs = self.unary()?;
            let op = if tok == Token::Star { BinOp::Mul } else { BinOp::Div };
            lhs = Node::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Node> {
        match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                Ok(Node::Neg(Box::new(self.unary()?)))
            }
            Some(Token::Plus) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<Node> {
        let base = self.atom()?;
        if self.peek() == Some(Token::Pow) {
            self.pos += 1;
            let exponent = self.unary()?;
            return Ok(Node::Binary(BinOp::Pow, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<Node> {
        match self.bump() {
            Some(Token::Number(v)) => Ok(Node::Number(v)),
            Some(Token::Time) => Ok(Node::Time),
            Some(Token::Decay(c)) => Ok(Node::Decay(c)),
            Some(Token::Exp) => {
                self.expect(Token::LParen, "'(' after exp")?;
                let inner = self.expr()?;
                self.expect(Token::RParen, "')'")?;
                Ok(Node::Exp(Box::new(inner)))
            }
            Some(Token::LParen) => {
                let inner = self.expr()?;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            Some(tok) => Err(SvdgfError::parse(format!("unexpected {}", describe(tok)))),
            None => Err(SvdgfError::parse("expression ends unexpectedly")),
        }
    }
}

fn describe(tok: Token) -> String {
    match tok {
        Token::Number(v) => format!("number {v}"),
        Token::Time => "'t'".to_string(),
        Token::Decay(c) => format!("'k{c}'"),
        Token::Exp => "'exp'".to_string(),
        Token::Plus => "'+'".to_string(),
        Token::Minus => "'-'".to_string(),
        Token::Star => "'*'".to_string(),
        Token::Slash => "'/'".to_string(),
        Token::Pow => "'**'".to_string(),
        Token::LParen => "'('".to_string(),
        Token::RParen => "')'".to_string(),
    }
}

/// A parsed summand, still referring to decay constants by component index.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    component: usize,
    raw: String,
    root: Option<Node>,
    decay_refs: Vec<usize>,
    substituted: String,
}

impl Expression {
    /// Parse `raw` as the summand of `component`. An empty string is the zero expression.
    pub fn parse(raw: &str, component: usize) -> Result<Self> {
        let tokens = tokenize(raw).map_err(|e| e.in_summand(component, raw))?;
        if tokens.is_empty() {
            return Ok(Self {
                component,
                raw: raw.to_string(),
                root: None,
                decay_refs: Vec::new(),
                substituted: String::new(),
            });
        }

        let mut parser = Parser {
            tokens: &tokens,
            pos: 0,
        };
        let root = parser.expr().map_err(|e| e.in_summand(component, raw))?;
        if let Some(extra) = parser.peek() {
            return Err(SvdgfError::parse(format!("unexpected trailing {}", describe(extra)))
                .in_summand(component, raw));
        }

        let mut decay_refs = Vec::new();
        let mut substituted = String::with_capacity(raw.len() + 16);
        let mut cursor = 0;
        for s in &tokens {
            if let Token::Decay(c) = s.token {
                if !decay_refs.contains(&c) {
                    decay_refs.push(c);
                }
                substituted.push_str(&raw[cursor..s.start]);
                substituted.push_str(&tau_name(c));
                cursor = s.end;
            }
        }
        substituted.push_str(&raw[cursor..]);

        Ok(Self {
            component,
            raw: raw.to_string(),
            root: Some(root),
            decay_refs,
            substituted: format!("({})", substituted.trim()),
        })
    }

    pub fn component(&self) -> usize {
        self.component
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn is_zero(&self) -> bool {
        self.root.is_none()
    }

    /// Components whose decay constants appear, in order of first appearance.
    pub fn decay_refs(&self) -> &[usize] {
        &self.decay_refs
    }

    /// Resolve decay references against `selection`.
    ///
    /// The resulting expression reads its decay constants from a slice ordered
    /// like `selection.indices()`.
    pub fn bind(&self, selection: &ComponentSelection) -> Result<BoundExpression> {
        if let Some(&missing) = self
            .decay_refs
            .iter()
            .find(|c| !selection.indices().contains(c))
        {
            return Err(SvdgfError::parse(format!(
                "k{missing} refers to component {missing}, which is not selected {selection}"
            ))
            .in_summand(self.component, &self.raw));
        }

        let root = self.root.as_ref().map(|node| {
            node.map_decays(&|c| {
                selection
                    .indices()
                    .iter()
                    .position(|&s| s == c)
                    .unwrap_or_default()
            })
        });
        Ok(BoundExpression { root })
    }

    /// Evaluate with decay constants looked up by component index.
    pub fn eval_with(&self, t: f64, tau_of: impl Fn(usize) -> f64) -> f64 {
        let Some(root) = &self.root else {
            return 0.0;
        };
        let max = self.decay_refs.iter().copied().max().map_or(0, |m| m + 1);
        let taus: Vec<f64> = (0..max).map(&tau_of).collect();
        root.eval(t, &taus)
    }
}

/// Grouped substituted form, e.g. `(tau_component0*exp(-t/tau_component0))`.
impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.root.is_none() {
            return f.write_str("0");
        }
        f.write_str(&self.substituted)
    }
}

/// An expression ready for evaluation inside the fit loop.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundExpression {
    root: Option<Node>,
}

impl BoundExpression {
    pub fn eval(&self, t: f64, taus: &[f64]) -> f64 {
        self.root.as_ref().map_or(0.0, |node| node.eval(t, taus))
    }

    pub fn is_zero(&self) -> bool {
        self.root.is_none()
    }
}

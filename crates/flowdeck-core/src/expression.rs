//! Restricted expression language for branch conditions
//!
//! Expressions are parsed into a small AST and evaluated against flow data.
//! There is no function call syntax and no assignment, so an expression can
//! only read the data bag.
//!
//! Supported syntax:
//! - literals: `12`, `1.5`, `'text'`, `"text"`, `true`, `false`, `null`
//! - paths: `data.user.age`, `user.age`, `items.0`, `items[0]`, `data['key']`
//!   (the leading `data` is optional), plus `.length` on arrays and strings
//! - operators: `!`, unary `-`, `== != === !==`, `< <= > >=`, `in`, `&&`, `||`
//! - parentheses
//!
//! Equality never coerces types; `==` and `===` behave the same. Nesting
//! (parentheses, unary operators and operator chains) is capped at
//! `MAX_DEPTH` levels so parsing and evaluation stay within a bounded stack.

use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::condition::values_equal;
use crate::state::FlowData;

/// Deepest nesting a parsed expression may have
pub const MAX_DEPTH: usize = 64;

/// Parse failure with the byte offset where it was detected
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message} at offset {offset}")]
pub struct ExpressionError {
    pub message: String,
    pub offset: usize,
}

impl ExpressionError {
    fn new(message: impl Into<String>, offset: usize) -> Self {
        Self {
            message: message.into(),
            offset,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Dot,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Not,
    Minus,
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryOp {
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Key(String),
    Index(usize),
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Literal(Value),
    Path(Vec<Segment>),
    Not(Box<Node>),
    Neg(Box<Node>),
    Binary(BinaryOp, Box<Node>, Box<Node>),
}

impl Node {
    fn depth(&self) -> usize {
        match self {
            Node::Literal(_) | Node::Path(_) => 1,
            Node::Not(inner) | Node::Neg(inner) => 1 + inner.depth(),
            Node::Binary(_, left, right) => 1 + left.depth().max(right.depth()),
        }
    }
}

/// A parsed expression, reusable across evaluations
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    root: Node,
}

impl Expression {
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            source_len: source.len(),
            nesting: 0,
        };
        let root = parser.parse_or()?;
        if let Some((_, offset)) = parser.tokens.get(parser.pos) {
            return Err(ExpressionError::new("unexpected trailing input", *offset));
        }
        Ok(Self {
            source: source.to_string(),
            root,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate to a JSON value
    pub fn evaluate(&self, data: &FlowData) -> Value {
        eval(&self.root, data)
    }

    /// Evaluate and apply truthiness
    pub fn matches(&self, data: &FlowData) -> bool {
        truthy(&self.evaluate(data))
    }
}

/// Parse and evaluate in one go; parse failures evaluate to `false`
pub fn evaluate_expression(source: &str, data: &FlowData) -> bool {
    match Expression::parse(source) {
        Ok(expr) => expr.matches(data),
        Err(e) => {
            warn!("Could not parse expression '{}': {}", source, e);
            false
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<(Token, usize)>, ExpressionError> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let peek = |i: usize| chars.get(i).map(|(_, c)| *c);

    while i < chars.len() {
        let (offset, c) = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && (chars[i].1.is_ascii_digit() || chars[i].1 == '.') {
                // A dot followed by a non-digit ends the number (e.g. `items.0.name`)
                if chars[i].1 == '.' && !peek(i + 1).is_some_and(|n| n.is_ascii_digit()) {
                    break;
                }
                i += 1;
            }
            let text: String = chars[start..i].iter().map(|(_, c)| *c).collect();
            let number = text
                .parse::<f64>()
                .map_err(|_| ExpressionError::new(format!("invalid number '{}'", text), offset))?;
            tokens.push((Token::Number(number), offset));
            continue;
        }

        if c == '\'' || c == '"' {
            let quote = c;
            i += 1;
            let mut text = String::new();
            loop {
                match peek(i) {
                    None => return Err(ExpressionError::new("unterminated string", offset)),
                    Some('\\') => {
                        if let Some(escaped) = peek(i + 1) {
                            text.push(escaped);
                        }
                        i += 2;
                    }
                    Some(ch) if ch == quote => {
                        i += 1;
                        break;
                    }
                    Some(ch) => {
                        text.push(ch);
                        i += 1;
                    }
                }
            }
            tokens.push((Token::Str(text), offset));
            continue;
        }

        if c.is_alphabetic() || c == '_' || c == '$' {
            let start = i;
            while i < chars.len()
                && (chars[i].1.is_alphanumeric() || chars[i].1 == '_' || chars[i].1 == '$')
            {
                i += 1;
            }
            let ident: String = chars[start..i].iter().map(|(_, c)| *c).collect();
            tokens.push((Token::Ident(ident), offset));
            continue;
        }

        let next = peek(i + 1);
        let (token, width) = match (c, next) {
            ('&', Some('&')) => (Token::And, 2),
            ('|', Some('|')) => (Token::Or, 2),
            ('=', Some('=')) => {
                if peek(i + 2) == Some('=') {
                    (Token::Eq, 3)
                } else {
                    (Token::Eq, 2)
                }
            }
            ('!', Some('=')) => {
                if peek(i + 2) == Some('=') {
                    (Token::Ne, 3)
                } else {
                    (Token::Ne, 2)
                }
            }
            ('<', Some('=')) => (Token::Le, 2),
            ('>', Some('=')) => (Token::Ge, 2),
            ('<', _) => (Token::Lt, 1),
            ('>', _) => (Token::Gt, 1),
            ('!', _) => (Token::Not, 1),
            ('-', _) => (Token::Minus, 1),
            ('.', _) => (Token::Dot, 1),
            ('[', _) => (Token::LBracket, 1),
            (']', _) => (Token::RBracket, 1),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            _ => {
                return Err(ExpressionError::new(
                    format!("unexpected character '{}'", c),
                    offset,
                ))
            }
        };
        tokens.push((token, offset));
        i += width;
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    source_len: usize,
    /// Open parentheses and unary operators on the parse stack
    nesting: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|(_, o)| *o)
            .unwrap_or(self.source_len)
    }

    fn too_deep(offset: usize) -> ExpressionError {
        ExpressionError::new("expression nested too deeply", offset)
    }

    /// Run `parse` one nesting level deeper
    fn nested(
        &mut self,
        offset: usize,
        parse: impl FnOnce(&mut Self) -> Result<Node, ExpressionError>,
    ) -> Result<Node, ExpressionError> {
        if self.nesting >= MAX_DEPTH {
            return Err(Self::too_deep(offset));
        }
        self.nesting += 1;
        let node = parse(self);
        self.nesting -= 1;
        node
    }

    fn binary(
        &self,
        op: BinaryOp,
        left: Node,
        right: Node,
        offset: usize,
    ) -> Result<Node, ExpressionError> {
        let node = Node::Binary(op, Box::new(left), Box::new(right));
        if node.depth() > MAX_DEPTH {
            return Err(Self::too_deep(offset));
        }
        Ok(node)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), ExpressionError> {
        let offset = self.offset();
        match self.advance() {
            Some(ref token) if *token == expected => Ok(()),
            other => Err(ExpressionError::new(
                format!("expected {:?}, found {:?}", expected, other),
                offset,
            )),
        }
    }

    fn parse_or(&mut self) -> Result<Node, ExpressionError> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            let offset = self.offset();
            self.advance();
            let right = self.parse_and()?;
            left = self.binary(BinaryOp::Or, left, right, offset)?;
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Node, ExpressionError> {
        let mut left = self.parse_equality()?;
        while self.peek() == Some(&Token::And) {
            let offset = self.offset();
            self.advance();
            let right = self.parse_equality()?;
            left = self.binary(BinaryOp::And, left, right, offset)?;
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Node, ExpressionError> {
        let mut left = self.parse_relational()?;
        loop {
            let op = match self.peek() {
                Some(Token::Eq) => BinaryOp::Eq,
                Some(Token::Ne) => BinaryOp::Ne,
                _ => return Ok(left),
            };
            let offset = self.offset();
            self.advance();
            let right = self.parse_relational()?;
            left = self.binary(op, left, right, offset)?;
        }
    }

    fn parse_relational(&mut self) -> Result<Node, ExpressionError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => BinaryOp::Lt,
                Some(Token::Le) => BinaryOp::Le,
                Some(Token::Gt) => BinaryOp::Gt,
                Some(Token::Ge) => BinaryOp::Ge,
                Some(Token::Ident(word)) if word == "in" => BinaryOp::In,
                _ => return Ok(left),
            };
            let offset = self.offset();
            self.advance();
            let right = self.parse_unary()?;
            left = self.binary(op, left, right, offset)?;
        }
    }

    fn parse_unary(&mut self) -> Result<Node, ExpressionError> {
        let offset = self.offset();
        match self.peek() {
            Some(Token::Not) => {
                self.advance();
                self.nested(offset, |p| Ok(Node::Not(Box::new(p.parse_unary()?))))
            }
            Some(Token::Minus) => {
                self.advance();
                self.nested(offset, |p| Ok(Node::Neg(Box::new(p.parse_unary()?))))
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<Node, ExpressionError> {
        let offset = self.offset();
        match self.advance() {
            Some(Token::Number(n)) => Ok(Node::Literal(number_value(n))),
            Some(Token::Str(s)) => Ok(Node::Literal(Value::String(s))),
            Some(Token::LParen) => self.nested(offset, |p| {
                let inner = p.parse_or()?;
                p.expect(Token::RParen)?;
                Ok(inner)
            }),
            Some(Token::Ident(word)) => match word.as_str() {
                "true" => Ok(Node::Literal(Value::Bool(true))),
                "false" => Ok(Node::Literal(Value::Bool(false))),
                "null" | "undefined" => Ok(Node::Literal(Value::Null)),
                "in" => Err(ExpressionError::new("unexpected 'in'", offset)),
                _ => self.parse_path(word),
            },
            other => Err(ExpressionError::new(
                format!("unexpected token {:?}", other),
                offset,
            )),
        }
    }

    fn parse_path(&mut self, head: String) -> Result<Node, ExpressionError> {
        let mut segments = Vec::new();
        if head != "data" {
            segments.push(Segment::Key(head));
        }

        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.advance();
                    let offset = self.offset();
                    match self.advance() {
                        Some(Token::Ident(key)) => segments.push(Segment::Key(key)),
                        Some(Token::Number(n)) if n.fract() == 0.0 && n >= 0.0 => {
                            segments.push(Segment::Index(n as usize))
                        }
                        other => {
                            return Err(ExpressionError::new(
                                format!("expected property name, found {:?}", other),
                                offset,
                            ))
                        }
                    }
                }
                Some(Token::LBracket) => {
                    self.advance();
                    let offset = self.offset();
                    match self.advance() {
                        Some(Token::Str(key)) => segments.push(Segment::Key(key)),
                        Some(Token::Number(n)) if n.fract() == 0.0 && n >= 0.0 => {
                            segments.push(Segment::Index(n as usize))
                        }
                        other => {
                            return Err(ExpressionError::new(
                                format!("expected literal index, found {:?}", other),
                                offset,
                            ))
                        }
                    }
                    self.expect(Token::RBracket)?;
                }
                _ => return Ok(Node::Path(segments)),
            }
        }
    }
}

fn number_value(n: f64) -> Value {
    serde_json::Number::from_f64(n)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn resolve_path(segments: &[Segment], data: &FlowData) -> Value {
    let mut current: Value = Value::Object(data.clone());
    for segment in segments {
        current = match (segment, &current) {
            (Segment::Key(key), Value::Object(map)) => map.get(key).cloned().unwrap_or(Value::Null),
            (Segment::Key(key), Value::Array(items)) if key == "length" => Value::from(items.len()),
            (Segment::Key(key), Value::String(s)) if key == "length" => {
                Value::from(s.chars().count())
            }
            (Segment::Key(key), Value::Array(items)) => key
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get(i).cloned())
                .unwrap_or(Value::Null),
            (Segment::Index(i), Value::Array(items)) => {
                items.get(*i).cloned().unwrap_or(Value::Null)
            }
            (Segment::Index(i), Value::Object(map)) => {
                map.get(&i.to_string()).cloned().unwrap_or(Value::Null)
            }
            _ => Value::Null,
        };
    }
    current
}

fn eval(node: &Node, data: &FlowData) -> Value {
    match node {
        Node::Literal(value) => value.clone(),
        Node::Path(segments) => resolve_path(segments, data),
        Node::Not(inner) => Value::Bool(!truthy(&eval(inner, data))),
        Node::Neg(inner) => match eval(inner, data).as_f64() {
            Some(n) => number_value(-n),
            None => Value::Null,
        },
        Node::Binary(BinaryOp::And, left, right) => {
            Value::Bool(truthy(&eval(left, data)) && truthy(&eval(right, data)))
        }
        Node::Binary(BinaryOp::Or, left, right) => {
            Value::Bool(truthy(&eval(left, data)) || truthy(&eval(right, data)))
        }
        Node::Binary(op, left, right) => {
            let l = eval(left, data);
            let r = eval(right, data);
            Value::Bool(apply_binary(*op, &l, &r))
        }
    }
}

fn apply_binary(op: BinaryOp, l: &Value, r: &Value) -> bool {
    match op {
        BinaryOp::Eq => values_equal(l, r),
        BinaryOp::Ne => !values_equal(l, r),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (l, r) {
                (Value::Number(a), Value::Number(b)) => {
                    a.as_f64().zip(b.as_f64()).and_then(|(a, b)| a.partial_cmp(&b))
                }
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => None,
            };
            match ordering {
                Some(ord) => match op {
                    BinaryOp::Lt => ord.is_lt(),
                    BinaryOp::Le => ord.is_le(),
                    BinaryOp::Gt => ord.is_gt(),
                    _ => ord.is_ge(),
                },
                None => false,
            }
        }
        BinaryOp::In => match r {
            Value::Array(items) => items.iter().any(|item| values_equal(item, l)),
            Value::Object(map) => l.as_str().is_some_and(|key| map.contains_key(key)),
            Value::String(haystack) => l.as_str().is_some_and(|needle| haystack.contains(needle)),
            _ => false,
        },
        BinaryOp::And | BinaryOp::Or => unreachable!("short-circuit operators handled in eval"),
    }
}

/// JavaScript-style truthiness
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

//! Abstract syntax tree for Conflux configuration files.
//!
//! A file is an ordered sequence of statements; a statement is either an
//! attribute (`name = expr`) or a block (`name.subname "label" { ... }`).
//! Every node carries a [`Span`] into the source it was parsed from.
//!
//! Blocks additionally expose a content [`fingerprint`]: a structural hash
//! that ignores spans, so formatting or comment edits leave it unchanged.
//! The controller uses fingerprints to skip re-evaluating untouched blocks
//! across reloads.

use crate::span::Span;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

/// A parsed configuration file.
#[derive(Debug, Clone, PartialEq)]
pub struct File {
    /// Name of the file, used in diagnostics (not necessarily a path).
    pub name: String,
    /// Top-level statements in source order.
    pub body: Body,
}

/// An ordered sequence of statements (a file or a block body).
pub type Body = Vec<Stmt>;

/// A single statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// `name = expr`
    Attribute(Attribute),
    /// `name.subname "label" { ... }`
    Block(Block),
}

impl Stmt {
    /// The source span of this statement.
    pub fn span(&self) -> Span {
        match self {
            Stmt::Attribute(attr) => attr.span,
            Stmt::Block(block) => block.span,
        }
    }
}

/// An attribute assignment inside a block body.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub value: Expr,
    pub span: Span,
}

/// A named, optionally labeled, brace-delimited configuration unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    /// Dot-separated name segments (`["prometheus", "scrape"]`).
    pub name: Vec<String>,
    /// User-chosen instance label, if present.
    pub label: Option<String>,
    pub body: Body,
    pub span: Span,
}

impl Block {
    /// The dot-joined block name (`prometheus.scrape`).
    pub fn full_name(&self) -> String {
        self.name.join(".")
    }

    /// The block identifier: name plus label when present
    /// (`prometheus.scrape.default`).
    pub fn id(&self) -> String {
        match &self.label {
            Some(label) => format!("{}.{}", self.full_name(), label),
            None => self.full_name(),
        }
    }

    /// Structural content hash, ignoring source spans.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        hash_block(self, &mut hasher);
        hasher.finish()
    }
}

/// A dot-separated identifier path (`discovery.static.targets`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Path(pub Vec<String>);

impl Path {
    pub fn new(segments: Vec<String>) -> Self {
        Self(segments)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The path formed by the first `n` segments.
    pub fn prefix(&self, n: usize) -> Path {
        Path(self.0[..n.min(self.0.len())].to_vec())
    }
}

impl From<&str> for Path {
    fn from(s: &str) -> Self {
        Path(s.split('.').map(|p| p.to_string()).collect())
    }
}

impl std::fmt::Display for Path {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

/// An expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }

    /// If this expression is a bare identifier or a chain of field accesses
    /// rooted at one, return it as a dotted path.
    pub fn as_path(&self) -> Option<Path> {
        match &self.kind {
            ExprKind::Ident(name) => Some(Path(vec![name.clone()])),
            ExprKind::Access { object, field } => {
                let mut path = object.as_path()?;
                path.0.push(field.clone());
                Some(path)
            }
            _ => None,
        }
    }
}

/// Expression variants.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Duration(Duration),
    /// A scope identifier.
    Ident(String),
    /// Member access: `object.field`
    Access { object: Box<Expr>, field: String },
    /// Indexing: `object[index]`
    Index { object: Box<Expr>, index: Box<Expr> },
    /// Function call: `name(args...)` (name may be dotted).
    Call { func: Path, args: Vec<Expr> },
    /// List literal: `[a, b, c]`
    List(Vec<Expr>),
    /// Object literal: `{ key = value, ... }`
    Object(Vec<(String, Expr)>),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Conditional: `cond ? then : otherwise`
    Conditional {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl std::fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BinaryOp::Or => "||",
            BinaryOp::And => "&&",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
        };
        write!(f, "{}", s)
    }
}

// === Structural hashing ===
//
// Spans are deliberately excluded so that formatting-only edits keep the
// same fingerprint.

fn hash_body(body: &Body, h: &mut impl Hasher) {
    body.len().hash(h);
    for stmt in body {
        match stmt {
            Stmt::Attribute(attr) => {
                0u8.hash(h);
                attr.name.hash(h);
                hash_expr(&attr.value, h);
            }
            Stmt::Block(block) => {
                1u8.hash(h);
                hash_block(block, h);
            }
        }
    }
}

fn hash_block(block: &Block, h: &mut impl Hasher) {
    block.name.hash(h);
    block.label.hash(h);
    hash_body(&block.body, h);
}

fn hash_expr(expr: &Expr, h: &mut impl Hasher) {
    std::mem::discriminant(&expr.kind).hash(h);
    match &expr.kind {
        ExprKind::Null => {}
        ExprKind::Bool(b) => b.hash(h),
        ExprKind::Int(n) => n.hash(h),
        ExprKind::Float(x) => x.to_bits().hash(h),
        ExprKind::String(s) => s.hash(h),
        ExprKind::Duration(d) => d.hash(h),
        ExprKind::Ident(name) => name.hash(h),
        ExprKind::Access { object, field } => {
            hash_expr(object, h);
            field.hash(h);
        }
        ExprKind::Index { object, index } => {
            hash_expr(object, h);
            hash_expr(index, h);
        }
        ExprKind::Call { func, args } => {
            func.hash(h);
            args.len().hash(h);
            for arg in args {
                hash_expr(arg, h);
            }
        }
        ExprKind::List(items) => {
            items.len().hash(h);
            for item in items {
                hash_expr(item, h);
            }
        }
        ExprKind::Object(fields) => {
            fields.len().hash(h);
            for (key, value) in fields {
                key.hash(h);
                hash_expr(value, h);
            }
        }
        ExprKind::Unary { op, operand } => {
            std::mem::discriminant(op).hash(h);
            hash_expr(operand, h);
        }
        ExprKind::Binary { op, left, right } => {
            op.hash(h);
            hash_expr(left, h);
            hash_expr(right, h);
        }
        ExprKind::Conditional {
            cond,
            then,
            otherwise,
        } => {
            hash_expr(cond, h);
            hash_expr(then, h);
            hash_expr(otherwise, h);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::parser::parse_file;

    fn only_block(source: &str) -> super::Block {
        let file = parse_file("test.cfx", source).unwrap();
        match file.body.into_iter().next().unwrap() {
            super::Stmt::Block(block) => block,
            other => panic!("expected block, got {:?}", other),
        }
    }

    #[test]
    fn test_fingerprint_ignores_comments_and_whitespace() {
        let a = only_block("local.echo \"a\" {\n  text = \"hi\"\n}");
        let b = only_block("local.echo \"a\" {\n  // a comment\n  text   = \"hi\"\n}");
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let a = only_block("local.echo \"a\" { text = \"hi\" }");
        let b = only_block("local.echo \"a\" { text = \"bye\" }");
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_block_id() {
        let block = only_block("prometheus.scrape \"jobs\" { }");
        assert_eq!(block.full_name(), "prometheus.scrape");
        assert_eq!(block.id(), "prometheus.scrape.jobs");
    }
}

//! Hand-written recursive descent parser for Conflux configuration files.
//!
//! ## Architecture
//!
//! - `stream`: TokenStream wrapper with lookahead and span tracking
//! - `error`: ParseError kinds and constructors
//! - `expr`: expression parser using Pratt precedence climbing
//! - statement parsing (attributes and blocks) lives in this module
//!
//! Statement-level errors are collected with resynchronization so that one
//! malformed block does not hide every later diagnostic.

mod error;
mod expr;
mod stream;

pub use error::{ParseError, ParseErrorKind};
use stream::TokenStream;

use crate::ast::{Attribute, Block, Body, Expr, File, Stmt};
use crate::lexer::Token;
use logos::Logos;
use std::ops::Range;

/// Parse a complete configuration file.
///
/// `name` is used for diagnostics only. Returns every parse error found,
/// recovering at statement boundaries.
pub fn parse_file(name: &str, source: &str) -> Result<File, Vec<ParseError>> {
    let (tokens, mut errors) = lex(source);

    let mut stream = TokenStream::new(&tokens, source.len());
    let mut body = Vec::new();

    while !stream.at_end() {
        match parse_stmt(&mut stream) {
            Ok(stmt) => body.push(stmt),
            Err(err) => {
                errors.push(err);
                stream.synchronize();
            }
        }
    }

    if errors.is_empty() {
        Ok(File {
            name: name.to_string(),
            body,
        })
    } else {
        Err(errors)
    }
}

/// Parse a standalone expression (used by tests and tooling).
pub fn parse_expr_text(source: &str) -> Result<Expr, Vec<ParseError>> {
    let (tokens, errors) = lex(source);
    if !errors.is_empty() {
        return Err(errors);
    }

    let mut stream = TokenStream::new(&tokens, source.len());
    let parsed = expr::parse_expr(&mut stream).map_err(|e| vec![e])?;
    if !stream.at_end() {
        return Err(vec![ParseError::unexpected_token(
            stream.peek(),
            "after expression",
            stream.current_span(),
        )]);
    }
    Ok(parsed)
}

/// Tokenize the source, turning unlexable slices into parse errors.
fn lex(source: &str) -> (Vec<(Token, Range<usize>)>, Vec<ParseError>) {
    let mut tokens = Vec::new();
    let mut errors = Vec::new();
    for (result, range) in Token::lexer(source).spanned() {
        match result {
            Ok(token) => tokens.push((token, range)),
            Err(()) => errors.push(ParseError::invalid_token(crate::span::Span::new(
                range.start as u32,
                range.end as u32,
            ))),
        }
    }
    (tokens, errors)
}

/// Parse one statement: `ident ... = expr` or `ident(.ident)* "label"? { body }`.
fn parse_stmt(stream: &mut TokenStream) -> Result<Stmt, ParseError> {
    let start = stream.current_pos();
    let span = stream.current_span();

    let first = match stream.advance() {
        Some(Token::Ident(s)) => s.clone(),
        other => {
            return Err(ParseError::unexpected_token(
                other,
                "at start of statement",
                span,
            ));
        }
    };

    // Attribute: `name = expr`
    if matches!(stream.peek(), Some(Token::Eq)) {
        stream.advance();
        let value = expr::parse_expr(stream)?;
        let span = stream.span_from(start);
        return Ok(Stmt::Attribute(Attribute {
            name: first,
            value,
            span,
        }));
    }

    // Block: `name(.name)* "label"? { body }`
    let mut name = vec![first];
    while matches!(stream.peek(), Some(Token::Dot)) {
        stream.advance();
        let span = stream.current_span();
        match stream.advance() {
            Some(Token::Ident(s)) => name.push(s.clone()),
            other => {
                return Err(ParseError::unexpected_token(other, "in block name", span));
            }
        }
    }

    let label = match stream.peek() {
        Some(Token::String(s)) => {
            let label = s.clone();
            stream.advance();
            Some(label)
        }
        _ => None,
    };

    if let Some(ref l) = label {
        if l.is_empty() {
            return Err(ParseError::invalid_syntax(
                "block label must not be empty",
                stream.span_from(start),
            ));
        }
    }

    stream.expect(Token::LBrace)?;
    let body = parse_body(stream)?;
    stream.expect(Token::RBrace)?;

    let span = stream.span_from(start);
    Ok(Stmt::Block(Block {
        name,
        label,
        body,
        span,
    }))
}

/// Parse statements until the closing brace of the enclosing block.
fn parse_body(stream: &mut TokenStream) -> Result<Body, ParseError> {
    let mut body = Vec::new();
    while !stream.at_end() && !matches!(stream.peek(), Some(Token::RBrace)) {
        body.push(parse_stmt(stream)?);
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ExprKind;

    #[test]
    fn test_parse_attribute_and_block() {
        let file = parse_file(
            "test.cfx",
            r#"
            local.echo "hello" {
                text    = "hi there"
                repeat  = 3
                timeout = 250ms
            }
            "#,
        )
        .unwrap();

        assert_eq!(file.body.len(), 1);
        let Stmt::Block(block) = &file.body[0] else {
            panic!("expected block");
        };
        assert_eq!(block.id(), "local.echo.hello");
        assert_eq!(block.body.len(), 3);
    }

    #[test]
    fn test_nested_blocks() {
        let file = parse_file(
            "test.cfx",
            r#"
            syslog.listener "main" {
                tcp {
                    address = ":5514"
                }
                tcp {
                    address = ":5515"
                }
            }
            "#,
        )
        .unwrap();

        let Stmt::Block(block) = &file.body[0] else {
            panic!("expected block");
        };
        assert_eq!(block.body.len(), 2);
        assert!(matches!(&block.body[0], Stmt::Block(b) if b.full_name() == "tcp"));
    }

    #[test]
    fn test_unlabeled_block() {
        let file = parse_file("test.cfx", "logging { level = \"debug\" }").unwrap();
        let Stmt::Block(block) = &file.body[0] else {
            panic!("expected block");
        };
        assert_eq!(block.id(), "logging");
        assert!(block.label.is_none());
    }

    #[test]
    fn test_empty_label_rejected() {
        let errors = parse_file("test.cfx", "local.echo \"\" { }").unwrap_err();
        assert_eq!(errors[0].kind, ParseErrorKind::InvalidSyntax);
    }

    #[test]
    fn test_missing_brace_reports_position() {
        let errors = parse_file("test.cfx", "local.echo \"x\" text = 1").unwrap_err();
        assert!(!errors.is_empty());
        assert!(errors[0].message.contains('{'));
    }

    #[test]
    fn test_error_recovery_finds_later_errors() {
        let errors = parse_file(
            "test.cfx",
            r#"
            broken.block "a" = 1 }
            also.broken = = 2
            "#,
        )
        .unwrap_err();
        assert!(errors.len() >= 2);
    }

    #[test]
    fn test_reference_expression_in_attribute() {
        let file = parse_file(
            "test.cfx",
            r#"
            local.fanout "f" {
                targets = discovery.static.default.targets
            }
            "#,
        )
        .unwrap();
        let Stmt::Block(block) = &file.body[0] else {
            panic!("expected block");
        };
        let Stmt::Attribute(attr) = &block.body[0] else {
            panic!("expected attribute");
        };
        assert!(matches!(attr.value.kind, ExprKind::Access { .. }));
    }
}

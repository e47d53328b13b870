//! Expression parser: Pratt precedence climbing over the token stream.

use super::{ParseError, TokenStream};
use crate::ast::{BinaryOp, Expr, ExprKind, Path, UnaryOp};
use crate::lexer::Token;

/// Binary operator metadata (precedence, operator).
///
/// Higher precedence binds tighter; every binary operator associates to
/// the left. Single source of truth for binary operator parsing.
fn binary_op_info(token: &Token) -> Option<(u8, BinaryOp)> {
    match token {
        Token::OrOr => Some((10, BinaryOp::Or)),
        Token::AndAnd => Some((20, BinaryOp::And)),
        Token::EqEq => Some((30, BinaryOp::Eq)),
        Token::BangEq => Some((30, BinaryOp::Ne)),
        Token::Lt => Some((30, BinaryOp::Lt)),
        Token::LtEq => Some((30, BinaryOp::Le)),
        Token::Gt => Some((30, BinaryOp::Gt)),
        Token::GtEq => Some((30, BinaryOp::Ge)),
        Token::Plus => Some((40, BinaryOp::Add)),
        Token::Minus => Some((40, BinaryOp::Sub)),
        Token::Star => Some((50, BinaryOp::Mul)),
        Token::Slash => Some((50, BinaryOp::Div)),
        Token::Percent => Some((50, BinaryOp::Mod)),
        _ => None,
    }
}

/// Parse a full expression, including the conditional form.
///
/// `cond ? then : otherwise` has the lowest precedence and associates to
/// the right through its else branch.
pub fn parse_expr(stream: &mut TokenStream) -> Result<Expr, ParseError> {
    let start = stream.current_pos();
    let cond = parse_pratt(stream, 0)?;

    if matches!(stream.peek(), Some(Token::Question)) {
        stream.advance();
        let then = parse_expr(stream)?;
        stream.expect(Token::Colon)?;
        let otherwise = parse_expr(stream)?;
        let span = stream.span_from(start);
        return Ok(Expr::new(
            ExprKind::Conditional {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            },
            span,
        ));
    }

    Ok(cond)
}

/// Pratt parser core for binary operators.
fn parse_pratt(stream: &mut TokenStream, min_prec: u8) -> Result<Expr, ParseError> {
    let start = stream.current_pos();
    let mut left = parse_prefix(stream)?;

    while let Some(token) = stream.peek() {
        if let Some((prec, op)) = binary_op_info(token) {
            if prec < min_prec {
                break;
            }

            stream.advance();

            let right = parse_pratt(stream, prec + 1)?;

            let span = stream.span_from(start);
            left = Expr::new(
                ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            );
        } else {
            break;
        }
    }

    Ok(left)
}

/// Parse prefix expressions (unary operators, then postfix chains).
fn parse_prefix(stream: &mut TokenStream) -> Result<Expr, ParseError> {
    match stream.peek() {
        Some(Token::Minus) | Some(Token::Bang) => parse_unary(stream),
        _ => parse_postfix(stream),
    }
}

fn parse_unary(stream: &mut TokenStream) -> Result<Expr, ParseError> {
    let start = stream.current_pos();
    let span = stream.current_span();
    let op = match stream.advance() {
        Some(Token::Minus) => UnaryOp::Neg,
        Some(Token::Bang) => UnaryOp::Not,
        other => {
            return Err(ParseError::unexpected_token(other, "as unary operator", span));
        }
    };

    let operand = parse_prefix(stream)?;
    let span = stream.span_from(start);

    Ok(Expr::new(
        ExprKind::Unary {
            op,
            operand: Box::new(operand),
        },
        span,
    ))
}

/// Parse postfix chains: member access, indexing, and calls.
fn parse_postfix(stream: &mut TokenStream) -> Result<Expr, ParseError> {
    let start = stream.current_pos();
    let mut expr = parse_atom(stream)?;

    loop {
        match stream.peek() {
            Some(Token::Dot) => {
                stream.advance();
                let span = stream.current_span();
                let field = match stream.advance() {
                    Some(Token::Ident(s)) => s.clone(),
                    other => {
                        return Err(ParseError::unexpected_token(other, "after '.'", span));
                    }
                };
                let span = stream.span_from(start);
                expr = Expr::new(
                    ExprKind::Access {
                        object: Box::new(expr),
                        field,
                    },
                    span,
                );
            }
            Some(Token::LBracket) => {
                stream.advance();
                let index = parse_expr(stream)?;
                stream.expect(Token::RBracket)?;
                let span = stream.span_from(start);
                expr = Expr::new(
                    ExprKind::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                    },
                    span,
                );
            }
            Some(Token::LParen) => {
                // Calls only apply to simple dotted names.
                let Some(func) = expr.as_path() else {
                    return Err(ParseError::invalid_syntax(
                        "only named functions can be called",
                        stream.current_span(),
                    ));
                };
                let args = parse_call_args(stream)?;
                let span = stream.span_from(start);
                expr = Expr::new(ExprKind::Call { func, args }, span);
            }
            _ => break,
        }
    }

    Ok(expr)
}

/// Parse function call arguments.
fn parse_call_args(stream: &mut TokenStream) -> Result<Vec<Expr>, ParseError> {
    stream.expect(Token::LParen)?;

    let mut args = Vec::new();
    while !matches!(stream.peek(), Some(Token::RParen)) {
        args.push(parse_expr(stream)?);
        if matches!(stream.peek(), Some(Token::RParen)) {
            break;
        }
        stream.expect(Token::Comma)?;
    }

    stream.expect(Token::RParen)?;
    Ok(args)
}

/// Parse atoms: literals, identifiers, list/object literals, parens.
fn parse_atom(stream: &mut TokenStream) -> Result<Expr, ParseError> {
    let span = stream.current_span();
    match stream.peek() {
        Some(Token::Null) => {
            stream.advance();
            Ok(Expr::new(ExprKind::Null, span))
        }
        Some(Token::Bool(b)) => {
            let b = *b;
            stream.advance();
            Ok(Expr::new(ExprKind::Bool(b), span))
        }
        Some(Token::Int(n)) => {
            let n = *n;
            stream.advance();
            Ok(Expr::new(ExprKind::Int(n), span))
        }
        Some(Token::Float(x)) => {
            let x = *x;
            stream.advance();
            Ok(Expr::new(ExprKind::Float(x), span))
        }
        Some(Token::Duration(d)) => {
            let d = *d;
            stream.advance();
            Ok(Expr::new(ExprKind::Duration(d), span))
        }
        Some(Token::String(s)) => {
            let s = s.clone();
            stream.advance();
            Ok(Expr::new(ExprKind::String(s), span))
        }
        Some(Token::Ident(name)) => {
            let name = name.clone();
            stream.advance();
            Ok(Expr::new(ExprKind::Ident(name), span))
        }
        Some(Token::LBracket) => parse_list(stream),
        Some(Token::LBrace) => parse_object(stream),
        Some(Token::LParen) => {
            stream.advance();
            let inner = parse_expr(stream)?;
            stream.expect(Token::RParen)?;
            Ok(inner)
        }
        other => Err(ParseError::unexpected_token(other, "in expression", span)),
    }
}

/// Parse a list literal: `[a, b, c]` with optional trailing comma.
fn parse_list(stream: &mut TokenStream) -> Result<Expr, ParseError> {
    let start = stream.current_pos();
    stream.expect(Token::LBracket)?;

    let mut items = Vec::new();
    while !matches!(stream.peek(), Some(Token::RBracket)) {
        items.push(parse_expr(stream)?);
        if matches!(stream.peek(), Some(Token::RBracket)) {
            break;
        }
        stream.expect(Token::Comma)?;
    }

    stream.expect(Token::RBracket)?;
    Ok(Expr::new(ExprKind::List(items), stream.span_from(start)))
}

/// Parse an object literal: `{ key = value, "key" = value }`.
fn parse_object(stream: &mut TokenStream) -> Result<Expr, ParseError> {
    let start = stream.current_pos();
    stream.expect(Token::LBrace)?;

    let mut fields = Vec::new();
    while !matches!(stream.peek(), Some(Token::RBrace)) {
        let span = stream.current_span();
        let key = match stream.advance() {
            Some(Token::Ident(s)) => s.clone(),
            Some(Token::String(s)) => s.clone(),
            other => {
                return Err(ParseError::unexpected_token(
                    other,
                    "as object literal key",
                    span,
                ));
            }
        };
        stream.expect(Token::Eq)?;
        let value = parse_expr(stream)?;
        fields.push((key, value));

        if !matches!(stream.peek(), Some(Token::RBrace)) {
            stream.expect(Token::Comma)?;
        }
    }

    stream.expect(Token::RBrace)?;
    Ok(Expr::new(ExprKind::Object(fields), stream.span_from(start)))
}

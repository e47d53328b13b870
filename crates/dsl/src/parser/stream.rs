//! Token stream wrapper for the hand-written parser.

use crate::lexer::Token;
use crate::span::Span;
use std::ops::Range;

/// Token stream with lookahead and span tracking.
///
/// Each token is paired with its byte range in the source, so errors and
/// AST nodes carry accurate locations.
pub struct TokenStream<'src> {
    tokens: &'src [(Token, Range<usize>)],
    pos: usize,
    /// Total length of the source, used for the EOF span.
    source_len: usize,
}

impl<'src> TokenStream<'src> {
    pub fn new(tokens: &'src [(Token, Range<usize>)], source_len: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            source_len,
        }
    }

    /// Peek at the current token without consuming it.
    pub fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(tok, _)| tok)
    }

    /// Peek at the nth token ahead without consuming.
    pub fn peek_nth(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.pos + n).map(|(tok, _)| tok)
    }

    /// Advance to the next token and return the consumed one.
    pub fn advance(&mut self) -> Option<&Token> {
        let token = self.tokens.get(self.pos).map(|(tok, _)| tok);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Check whether the current token has the same discriminant as
    /// `expected` (payloads are ignored).
    pub fn check(&self, expected: &Token) -> bool {
        matches!(self.peek(), Some(t) if std::mem::discriminant(t) == std::mem::discriminant(expected))
    }

    /// Expect a specific token and advance past it.
    pub fn expect(&mut self, expected: Token) -> Result<Span, super::ParseError> {
        if self.check(&expected) {
            let start = self.pos;
            self.advance();
            Ok(self.span_from(start))
        } else {
            Err(super::ParseError::expected_token(
                &expected,
                self.peek(),
                self.current_span(),
            ))
        }
    }

    /// Whether the end of the token stream has been reached.
    pub fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    /// Current position in the token stream (an index, not a byte offset).
    pub fn current_pos(&self) -> usize {
        self.pos
    }

    /// Span covering the tokens from position `start` through the last
    /// consumed token.
    pub fn span_from(&self, start: usize) -> Span {
        let start_byte = self
            .tokens
            .get(start)
            .map(|(_, r)| r.start)
            .unwrap_or(self.source_len);
        let end_byte = if self.pos > 0 {
            self.tokens
                .get(self.pos - 1)
                .map(|(_, r)| r.end)
                .unwrap_or(self.source_len)
        } else {
            start_byte
        };
        Span::new(start_byte as u32, end_byte as u32)
    }

    /// Span of the current token, or a zero-width span at EOF.
    pub fn current_span(&self) -> Span {
        match self.tokens.get(self.pos) {
            Some((_, r)) => Span::new(r.start as u32, r.end as u32),
            None => {
                let end = self
                    .tokens
                    .last()
                    .map(|(_, r)| r.end)
                    .unwrap_or(self.source_len);
                Span::new(end as u32, end as u32)
            }
        }
    }

    /// Skip tokens until the next plausible statement boundary.
    ///
    /// Used for error recovery: resynchronizes on an identifier that either
    /// starts a new statement at brace depth zero or follows a closing brace.
    pub fn synchronize(&mut self) {
        let mut depth = 0usize;
        while !self.at_end() {
            match self.peek() {
                Some(Token::LBrace) => {
                    depth += 1;
                    self.advance();
                }
                Some(Token::RBrace) => {
                    depth = depth.saturating_sub(1);
                    self.advance();
                    if depth == 0 {
                        break;
                    }
                }
                Some(Token::Ident(_)) if depth == 0 => break,
                _ => {
                    self.advance();
                }
            }
        }
    }
}

//! Lexical analysis for Conflux configuration files.
//!
//! Tokenization uses logos. Comments (`//`, `#`, `/* */`) are stripped
//! during lexing and never reach the parser, so a comment-only edit
//! produces an identical token stream.

use logos::Logos;
use std::time::Duration;

/// A token of the Conflux configuration language.
///
/// Block names (`declare`, `import.file`, `foreach`, component types) are
/// ordinary identifiers; the language has no reserved words beyond the
/// literal keywords `true`, `false` and `null`.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip r"//[^\n]*")]
#[logos(skip r"#[^\n]*")]
#[logos(skip r"/\*([^*]|\*[^/])*\*/")]
pub enum Token {
    // === Literals ===
    /// Boolean literal `true` or `false`
    #[token("true", |_| true)]
    #[token("false", |_| false)]
    Bool(bool),

    /// Null literal
    #[token("null")]
    Null,

    /// Duration literal: one or more `<decimal><unit>` segments, e.g.
    /// `250ms`, `1h30m`, `1.5s`. Units: ns, us, ms, s, m, h.
    #[regex(r"([0-9]+(\.[0-9]+)?(ns|us|ms|s|m|h))+", |lex| parse_duration(lex.slice()), priority = 12)]
    Duration(Duration),

    /// Integer literal
    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Int(i64),

    /// Float literal (e.g., 3.14, 5.67e-8, 1e10)
    #[regex(r"[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    #[regex(r"[0-9]+[eE][+-]?[0-9]+", |lex| lex.slice().parse::<f64>().ok())]
    Float(f64),

    /// String literal: double-quoted with C-like escapes, or a raw string
    /// delimited by backticks (no escape processing).
    #[regex(r#""([^"\\]|\\.)*""#, |lex| {
        let s = lex.slice();
        unescape_string(&s[1..s.len() - 1])
    })]
    #[regex(r"`[^`]*`", |lex| {
        let s = lex.slice();
        Some(s[1..s.len() - 1].to_string())
    })]
    String(String),

    /// Identifier
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    // === Operators ===
    /// Operator `=`
    #[token("=")]
    Eq,
    /// Operator `==`
    #[token("==")]
    EqEq,
    /// Operator `!=`
    #[token("!=")]
    BangEq,
    /// Operator `<`
    #[token("<")]
    Lt,
    /// Operator `<=`
    #[token("<=")]
    LtEq,
    /// Operator `>`
    #[token(">")]
    Gt,
    /// Operator `>=`
    #[token(">=")]
    GtEq,
    /// Operator `+`
    #[token("+")]
    Plus,
    /// Operator `-`
    #[token("-")]
    Minus,
    /// Operator `*`
    #[token("*")]
    Star,
    /// Operator `/`
    #[token("/")]
    Slash,
    /// Operator `%`
    #[token("%")]
    Percent,
    /// Operator `&&`
    #[token("&&")]
    AndAnd,
    /// Operator `||`
    #[token("||")]
    OrOr,
    /// Operator `!`
    #[token("!")]
    Bang,
    /// Operator `?`
    #[token("?")]
    Question,
    /// Operator `:`
    #[token(":")]
    Colon,
    /// Operator `.`
    #[token(".")]
    Dot,
    /// Operator `,`
    #[token(",")]
    Comma,

    // === Delimiters ===
    /// Delimiter `{`
    #[token("{")]
    LBrace,
    /// Delimiter `}`
    #[token("}")]
    RBrace,
    /// Delimiter `[`
    #[token("[")]
    LBracket,
    /// Delimiter `]`
    #[token("]")]
    RBracket,
    /// Delimiter `(`
    #[token("(")]
    LParen,
    /// Delimiter `)`
    #[token(")")]
    RParen,
}

/// Parse a chained duration literal (`1h30m`, `250ms`) into a Duration.
fn parse_duration(s: &str) -> Option<Duration> {
    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(rest.len());
        let (num, tail) = rest.split_at(digits);
        let value: f64 = num.parse().ok()?;
        let unit_len = if tail.starts_with("ns") || tail.starts_with("us") || tail.starts_with("ms")
        {
            2
        } else if tail.starts_with('s') || tail.starts_with('m') || tail.starts_with('h') {
            1
        } else {
            return None;
        };
        let (unit, remainder) = tail.split_at(unit_len);
        let seconds = match unit {
            "ns" => value * 1e-9,
            "us" => value * 1e-6,
            "ms" => value * 1e-3,
            "s" => value,
            "m" => value * 60.0,
            "h" => value * 3600.0,
            _ => return None,
        };
        total += Duration::from_secs_f64(seconds);
        rest = remainder;
    }
    Some(total)
}

/// Unescape the content of a double-quoted string literal.
fn unescape_string(s: &str) -> Option<String> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => result.push('\n'),
                Some('r') => result.push('\r'),
                Some('t') => result.push('\t'),
                Some('0') => result.push('\0'),
                Some('\\') => result.push('\\'),
                Some('"') => result.push('"'),
                Some('\'') => result.push('\''),
                Some('`') => result.push('`'),
                Some(_) | None => return None,
            }
        } else {
            result.push(c);
        }
    }
    Some(result)
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Bool(b) => write!(f, "{}", b),
            Token::Null => write!(f, "null"),
            Token::Duration(d) => write!(f, "{:?}", d),
            Token::Int(n) => write!(f, "{}", n),
            Token::Float(x) => write!(f, "{}", x),
            Token::String(s) => write!(f, "{:?}", s),
            Token::Ident(id) => write!(f, "{}", id),
            Token::Eq => write!(f, "="),
            Token::EqEq => write!(f, "=="),
            Token::BangEq => write!(f, "!="),
            Token::Lt => write!(f, "<"),
            Token::LtEq => write!(f, "<="),
            Token::Gt => write!(f, ">"),
            Token::GtEq => write!(f, ">="),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::Percent => write!(f, "%"),
            Token::AndAnd => write!(f, "&&"),
            Token::OrOr => write!(f, "||"),
            Token::Bang => write!(f, "!"),
            Token::Question => write!(f, "?"),
            Token::Colon => write!(f, ":"),
            Token::Dot => write!(f, "."),
            Token::Comma => write!(f, ","),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test helper: lex source and panic on any error.
    fn lex(source: &str) -> Vec<Token> {
        Token::lexer(source)
            .collect::<Result<Vec<_>, _>>()
            .expect("lexing failed")
    }

    fn ident(s: &str) -> Token {
        Token::Ident(s.to_string())
    }

    fn string(s: &str) -> Token {
        Token::String(s.to_string())
    }

    #[test]
    fn test_identifiers_and_dots() {
        let tokens = lex("prometheus.scrape.default");
        assert_eq!(
            tokens,
            vec![
                ident("prometheus"),
                Token::Dot,
                ident("scrape"),
                Token::Dot,
                ident("default"),
            ]
        );
    }

    #[test]
    fn test_numbers() {
        let tokens = lex("42 3.14 5.67e-8 1e10");
        assert_eq!(
            tokens,
            vec![
                Token::Int(42),
                Token::Float(3.14),
                Token::Float(5.67e-8),
                Token::Float(1e10),
            ]
        );
    }

    #[test]
    fn test_durations() {
        let tokens = lex("250ms 1h30m 1.5s 10ns");
        assert_eq!(
            tokens,
            vec![
                Token::Duration(Duration::from_millis(250)),
                Token::Duration(Duration::from_secs(90 * 60)),
                Token::Duration(Duration::from_millis(1500)),
                Token::Duration(Duration::from_nanos(10)),
            ]
        );
    }

    #[test]
    fn test_strings_and_escapes() {
        let tokens = lex(r#""hello" "a\nb" `raw \n`"#);
        assert_eq!(
            tokens,
            vec![string("hello"), string("a\nb"), string(r"raw \n")]
        );
    }

    #[test]
    fn test_block_header() {
        let tokens = lex(r#"prometheus.scrape "default" {"#);
        assert_eq!(
            tokens,
            vec![
                ident("prometheus"),
                Token::Dot,
                ident("scrape"),
                string("default"),
                Token::LBrace,
            ]
        );
    }

    #[test]
    fn test_operators() {
        let tokens = lex("= == != < <= > >= + - * / % && || ! ? :");
        assert_eq!(
            tokens,
            vec![
                Token::Eq,
                Token::EqEq,
                Token::BangEq,
                Token::Lt,
                Token::LtEq,
                Token::Gt,
                Token::GtEq,
                Token::Plus,
                Token::Minus,
                Token::Star,
                Token::Slash,
                Token::Percent,
                Token::AndAnd,
                Token::OrOr,
                Token::Bang,
                Token::Question,
                Token::Colon,
            ]
        );
    }

    #[test]
    fn test_comments_are_skipped() {
        let tokens = lex("a // line\n# hash\n/* block\nspanning */ b");
        assert_eq!(tokens, vec![ident("a"), ident("b")]);
    }

    #[test]
    fn test_booleans_and_null() {
        let tokens = lex("true false null");
        assert_eq!(
            tokens,
            vec![Token::Bool(true), Token::Bool(false), Token::Null]
        );
    }

    #[test]
    fn test_invalid_token_is_error() {
        let results: Vec<_> = Token::lexer("a @ b").collect();
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert!(results[2].is_ok());
    }
}

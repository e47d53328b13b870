//! Source location tracking for error reporting.

use serde::{Deserialize, Serialize};

/// Compact source location reference.
///
/// Points to a byte range in the source text of one configuration file.
/// File identity is carried by the enclosing [`crate::ast::File`]; errors
/// render file names at the boundary that knows them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Span {
    /// Byte offset of start position
    pub start: u32,
    /// Byte offset of end position (exclusive)
    pub end: u32,
}

impl Span {
    /// Create a new span.
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// Merge two spans into the smallest span covering both.
    pub fn to(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    /// Compute the 1-based line and column of the span start within `source`.
    pub fn line_col(&self, source: &str) -> (u32, u32) {
        let start = (self.start as usize).min(source.len());
        let mut line = 1;
        let mut col = 1;
        for c in source[..start].chars() {
            if c == '\n' {
                line += 1;
                col = 1;
            } else {
                col += 1;
            }
        }
        (line, col)
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_col() {
        let source = "abc\ndef\nghi";
        assert_eq!(Span::new(0, 1).line_col(source), (1, 1));
        assert_eq!(Span::new(5, 6).line_col(source), (2, 2));
        assert_eq!(Span::new(8, 11).line_col(source), (3, 1));
    }

    #[test]
    fn test_merge() {
        assert_eq!(Span::new(3, 5).to(Span::new(8, 10)), Span::new(3, 10));
    }
}

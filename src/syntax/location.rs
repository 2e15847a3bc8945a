//! Byte offset to line/column conversion
//!
//! The lexer works on byte offsets; diagnostics want 1-based line and column
//! numbers. [`LineIndex`] records where every line starts so the conversion is
//! a binary search.

use crate::errors::SourceLocation;

/// Line index for fast byte offset to line/column conversion
#[derive(Debug, Clone)]
pub struct LineIndex {
    /// Byte offsets where each line starts
    line_starts: Vec<usize>,
}

impl LineIndex {
    pub fn new(source: &str) -> Self {
        let mut line_starts = vec![0];
        for (i, ch) in source.char_indices() {
            if ch == '\n' {
                line_starts.push(i + 1);
            }
        }
        Self { line_starts }
    }

    /// Convert a byte offset to a 1-based (line, column) location.
    pub fn location(&self, offset: usize) -> SourceLocation {
        let line = match self.line_starts.binary_search(&offset) {
            Ok(line) => line,
            Err(line) => line.saturating_sub(1),
        };

        let line_start = self.line_starts[line];
        SourceLocation::new(line + 1, offset.saturating_sub(line_start) + 1)
    }

    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offsets_to_locations() {
        let index = LineIndex::new("x = 1\n  y = 2\n");

        assert_eq!(index.location(0), SourceLocation::new(1, 1));
        assert_eq!(index.location(4), SourceLocation::new(1, 5));
        assert_eq!(index.location(6), SourceLocation::new(2, 1));
        assert_eq!(index.location(8), SourceLocation::new(2, 3));
        assert_eq!(index.line_count(), 3);
    }
}

//! Source locations for TML diagnostics.
//!
//! Every AST node carries a [`FileSpan`]; borrow errors point back into the
//! source through these spans.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// A unique identifier for a source file
#[derive(Copy, Clone, Debug, Default, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize, Display)]
#[display("file#{_0}")]
pub struct FileId(pub u32);

impl FileId {
    /// Creates a file id from its raw index.
    #[must_use]
    pub fn new(id: u32) -> Self {
        Self(id)
    }
}

/// A byte offset span in a source file
#[derive(Copy, Clone, Debug, Default, Hash, Eq, PartialEq, Serialize, Deserialize, Display)]
#[display("{start}..{end}")]
pub struct Span {
    /// Inclusive start offset
    pub start: u32,
    /// Exclusive end offset
    pub end: u32,
}

impl Span {
    /// Creates a span covering `start..end`.
    #[must_use]
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// Byte range suitable for slicing the source text.
    #[must_use]
    pub fn range(&self) -> Range<usize> {
        self.start as usize..self.end as usize
    }

    /// Length in bytes.
    #[must_use]
    pub fn len(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    /// Returns `true` for a zero-width span.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Smallest span covering both `self` and `other`.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        Self {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    /// Returns `true` if `other` lies entirely within `self`.
    #[must_use]
    pub fn contains(&self, other: Self) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// A span with associated file
#[derive(Copy, Clone, Debug, Default, Hash, Eq, PartialEq, Serialize, Deserialize, Display)]
#[display("{file}:{span}")]
pub struct FileSpan {
    /// The file this span points into
    pub file: FileId,
    /// Offsets within the file
    pub span: Span,
}

impl FileSpan {
    /// Creates a span within `file`.
    #[must_use]
    pub fn new(file: FileId, span: Span) -> Self {
        Self { file, span }
    }

    /// Byte range within the file.
    #[must_use]
    pub fn range(&self) -> Range<usize> {
        self.span.range()
    }

    /// Merges two spans of the same file. Spans from different files keep `self`.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        if self.file == other.file {
            Self::new(self.file, self.span.merge(other.span))
        } else {
            self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_covers_both() {
        let merged = Span::new(4, 8).merge(Span::new(2, 5));
        assert_eq!(merged, Span::new(2, 8));
        assert_eq!(merged.len(), 6);
        assert!(merged.contains(Span::new(3, 7)));
    }

    #[test]
    fn test_merge_across_files_keeps_self() {
        let lhs = FileSpan::new(FileId(0), Span::new(0, 1));
        let rhs = FileSpan::new(FileId(1), Span::new(5, 9));
        assert_eq!(lhs.merge(rhs), lhs);
    }

    #[test]
    fn test_display() {
        let span = FileSpan::new(FileId(3), Span::new(10, 12));
        assert_eq!(span.to_string(), "file#3:10..12");
    }
}

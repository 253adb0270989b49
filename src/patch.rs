//! Byte spans and insertion application.
//!
//! The patcher works on raw source text: the planner produces a list of
//! point insertions (byte offset + text), and [`apply_insertions`] renders
//! the new file content. Insertions are applied in reverse source order so
//! earlier offsets are unaffected by later ones.
//!
//! Invariant: removing every inserted range from the output reconstructs
//! the original input byte-for-byte.

use std::fmt;

/// Byte offsets into file content, half-open: `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Span {
    /// Start byte offset (inclusive).
    pub start: usize,
    /// End byte offset (exclusive).
    pub end: usize,
}

impl Span {
    /// Create a new span.
    ///
    /// # Panics
    /// Panics if `start > end`.
    pub fn new(start: usize, end: usize) -> Self {
        assert!(
            start <= end,
            "Span start ({}) must be <= end ({})",
            start,
            end
        );
        Span { start, end }
    }

    /// Length of the span in bytes.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Check if the span is empty.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Check if this span overlaps with another.
    ///
    /// Adjacent spans (one ends where another starts) do NOT overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Check if this span contains another span entirely.
    pub fn contains(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Slice the spanned bytes out of `source`.
    pub fn slice<'a>(&self, source: &'a str) -> &'a str {
        &source[self.start..self.end]
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// A planned point insertion into a source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Insertion {
    /// Byte offset in the original text where the insertion goes.
    pub offset: usize,
    /// The text to insert.
    pub text: String,
    /// 1-based line number of the insertion point in the original text.
    pub line: u32,
}

/// Apply insertions to `source`, producing the patched text.
///
/// The insertions must be sorted by ascending offset with no duplicate
/// offsets; the planner guarantees this (one insertion per node).
///
/// # Panics
/// Panics if an offset is out of bounds or if offsets are not strictly
/// ascending.
pub fn apply_insertions(source: &str, insertions: &[Insertion]) -> String {
    for pair in insertions.windows(2) {
        assert!(
            pair[0].offset < pair[1].offset,
            "insertions must have strictly ascending offsets ({} then {})",
            pair[0].offset,
            pair[1].offset
        );
    }

    let extra: usize = insertions.iter().map(|ins| ins.text.len()).sum();
    let mut out = String::with_capacity(source.len() + extra);

    // Applied in reverse conceptually; a single forward pass over sorted
    // insertions is equivalent and avoids shifting.
    let mut pos = 0;
    for ins in insertions {
        assert!(ins.offset <= source.len(), "insertion offset out of bounds");
        out.push_str(&source[pos..ins.offset]);
        out.push_str(&ins.text);
        pos = ins.offset;
    }
    out.push_str(&source[pos..]);
    out
}

/// Remove previously applied insertions from patched text.
///
/// Used to check the losslessness invariant: for any insertion list,
/// `remove_insertions(apply_insertions(src, ins), ins) == src`.
pub fn remove_insertions(patched: &str, insertions: &[Insertion]) -> String {
    let mut out = String::with_capacity(patched.len());
    let mut pos = 0;
    let mut shift = 0;
    for ins in insertions {
        let start = ins.offset + shift;
        out.push_str(&patched[pos..start]);
        pos = start + ins.text.len();
        shift += ins.text.len();
    }
    out.push_str(&patched[pos..]);
    out
}

// ============================================================================
// Tests
// ============================================================================

//! Logical-line scanning of Python source.
//!
//! The tree builder works on logical lines, not physical ones: a statement
//! continues across newlines inside brackets, after a backslash, and inside
//! triple-quoted strings. The scanner finds logical line boundaries without
//! interpreting the statements themselves, tracking string literals (all
//! prefix and quote forms), comments, and bracket depth.

use memchr::memchr;

use crate::cst::ParseError;
use crate::patch::Span;

/// Classification of a logical line by its first significant character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// Whitespace only.
    Blank,
    /// A `#` comment, possibly indented.
    Comment,
    /// Anything else.
    Code,
}

/// One logical line of source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogicalLine {
    /// Bytes of the line, including its trailing newline.
    pub span: Span,
    /// 1-based physical line number where the logical line starts.
    pub line: u32,
    /// Byte offset of the first non-whitespace character (or of the
    /// newline for blank lines).
    pub content_start: usize,
    pub kind: LineKind,
}

impl LogicalLine {
    /// Leading whitespace of the line.
    pub fn indent<'a>(&self, source: &'a str) -> &'a str {
        &source[self.span.start..self.content_start]
    }

    /// Width of the leading whitespace in bytes.
    pub fn indent_len(&self) -> usize {
        self.content_start - self.span.start
    }

    /// The line text from the first significant character onward.
    pub fn content<'a>(&self, source: &'a str) -> &'a str {
        &source[self.content_start..self.span.end]
    }
}

/// Split source into logical lines.
///
/// The concatenation of the returned spans reproduces the input exactly.
pub fn scan_logical_lines(source: &str) -> Result<Vec<LogicalLine>, ParseError> {
    let bytes = source.as_bytes();
    let mut lines = Vec::new();
    let mut i = 0;
    let mut physical: u32 = 1;

    while i < bytes.len() {
        let start = i;
        let start_line = physical;
        let mut open: Vec<(u8, u32)> = Vec::new();

        loop {
            if i >= bytes.len() {
                if let Some((bracket, line)) = open.pop() {
                    return Err(ParseError::UnmatchedBracket {
                        bracket: bracket as char,
                        line,
                    });
                }
                break;
            }
            match bytes[i] {
                b'#' => {
                    i = memchr(b'\n', &bytes[i..]).map_or(bytes.len(), |n| i + n);
                }
                b'\'' | b'"' => {
                    let (end, newlines) = skip_string(bytes, i)
                        .ok_or(ParseError::UnterminatedString { line: physical })?;
                    physical += newlines;
                    i = end;
                }
                b'(' | b'[' | b'{' => {
                    open.push((bytes[i], physical));
                    i += 1;
                }
                b')' | b']' | b'}' => {
                    if open.pop().is_none() {
                        return Err(ParseError::UnmatchedBracket {
                            bracket: bytes[i] as char,
                            line: physical,
                        });
                    }
                    i += 1;
                }
                b'\\' if bytes.get(i + 1) == Some(&b'\n') => {
                    physical += 1;
                    i += 2;
                }
                b'\n' => {
                    physical += 1;
                    i += 1;
                    if open.is_empty() {
                        break;
                    }
                }
                _ => i += 1,
            }
        }

        let mut content_start = start;
        while content_start < i
            && (bytes[content_start] == b' ' || bytes[content_start] == b'\t')
        {
            content_start += 1;
        }
        let kind = match bytes.get(content_start) {
            Some(b'#') => LineKind::Comment,
            Some(b'\n') | None => LineKind::Blank,
            Some(_) if content_start >= i => LineKind::Blank,
            Some(_) => LineKind::Code,
        };
        lines.push(LogicalLine {
            span: Span::new(start, i),
            line: start_line,
            content_start,
            kind,
        });
    }
    Ok(lines)
}

/// Skip a string literal whose opening quote is at `quote_pos`. Returns the
/// offset just past the closing quote and the number of newlines crossed,
/// or `None` for an unterminated literal.
///
/// Prefix letters (`r`, `b`, `f`, `u` and combinations) sit before
/// `quote_pos` and need no handling here; a backslash always consumes the
/// next character, which matches how the tokenizer finds the end of raw
/// strings too.
pub(crate) fn skip_string(bytes: &[u8], quote_pos: usize) -> Option<(usize, u32)> {
    let quote = bytes[quote_pos];
    let triple = bytes[quote_pos..].starts_with(&[quote, quote, quote]);
    let mut i = quote_pos + if triple { 3 } else { 1 };
    let mut newlines = 0;

    while i < bytes.len() {
        let c = bytes[i];
        if c == b'\\' {
            if bytes.get(i + 1) == Some(&b'\n') {
                newlines += 1;
            }
            i += 2;
        } else if c == b'\n' {
            if !triple {
                return None;
            }
            newlines += 1;
            i += 1;
        } else if c == quote {
            if triple {
                if bytes[i..].starts_with(&[quote, quote, quote]) {
                    return Some((i + 3, newlines));
                }
                i += 1;
            } else {
                return Some((i + 1, newlines));
            }
        } else {
            i += 1;
        }
    }
    None
}

/// Iterator over the significant bytes of a span: everything outside
/// string literals and comments. String contents (quotes included) and
/// comment text yield nothing, so callers can match on delimiters without
/// tripping over quoted ones.
pub struct Significant<'a> {
    bytes: &'a [u8],
    pos: usize,
    end: usize,
}

impl<'a> Significant<'a> {
    pub fn new(source: &'a str, span: Span) -> Self {
        Significant {
            bytes: source.as_bytes(),
            pos: span.start,
            end: span.end,
        }
    }
}

impl Iterator for Significant<'_> {
    type Item = (usize, u8);

    fn next(&mut self) -> Option<(usize, u8)> {
        while self.pos < self.end {
            match self.bytes[self.pos] {
                b'#' => {
                    self.pos = memchr(b'\n', &self.bytes[self.pos..self.end])
                        .map_or(self.end, |n| self.pos + n);
                }
                b'\'' | b'"' => {
                    // The caller sees a well-formed line; an unterminated
                    // literal would have failed the scan already.
                    self.pos = match skip_string(self.bytes, self.pos) {
                        Some((end, _)) => end,
                        None => self.end,
                    };
                }
                b'\\' if self.bytes.get(self.pos + 1) == Some(&b'\n') => {
                    self.pos += 2;
                }
                c => {
                    let at = self.pos;
                    self.pos += 1;
                    return Some((at, c));
                }
            }
        }
        None
    }
}

// ============================================================================
// Tests
// ============================================================================

//! Unified diff rendering for planned insertions.
//!
//! Preview mode shows what write mode would do, as a standard unified
//! diff. The planner only ever inserts, so the diff can be derived
//! directly from the insertion list instead of re-diffing the two texts:
//! an insertion of whole lines becomes a run of `+` lines, and an
//! insertion inside a line becomes a `-`/`+` pair for that line.

use crate::patch::Insertion;

/// Context lines shown around each change.
const CONTEXT: usize = 3;

#[derive(Debug, Default, Clone)]
struct LineEdit {
    /// Whole lines inserted before this line.
    added_before: Vec<String>,
    /// The line's replacement text, when an insertion lands inside it.
    replaced: Option<String>,
}

impl LineEdit {
    fn is_change(&self) -> bool {
        !self.added_before.is_empty() || self.replaced.is_some()
    }
}

/// Render a unified diff of `insertions` applied to `source`.
///
/// Returns an empty string when there is nothing to show.
pub fn unified_diff(path: &str, source: &str, insertions: &[Insertion]) -> String {
    if insertions.is_empty() {
        return String::new();
    }

    let lines = split_lines(source);
    let mut edits = vec![LineEdit::default(); lines.len() + 1];
    let mut intra: Vec<Vec<&Insertion>> = vec![Vec::new(); lines.len()];

    for ins in insertions {
        let index = line_index(&lines, ins.offset);
        let at_line_start = index
            .map(|i| ins.offset == lines[i].0)
            .unwrap_or(true);
        if at_line_start && ins.text.ends_with('\n') {
            let slot = index.unwrap_or(lines.len());
            edits[slot]
                .added_before
                .extend(ins.text.lines().map(str::to_string));
        } else if let Some(i) = index {
            intra[i].push(ins);
        }
    }
    for (i, line_insertions) in intra.iter().enumerate() {
        if !line_insertions.is_empty() {
            edits[i].replaced = Some(splice(source, lines[i], line_insertions));
        }
    }

    render_hunks(path, source, &lines, &edits)
}

/// Byte ranges of each line, newline excluded.
fn split_lines(source: &str) -> Vec<(usize, usize)> {
    let mut lines = Vec::new();
    let mut start = 0;
    for at in memchr::memchr_iter(b'\n', source.as_bytes()) {
        lines.push((start, at));
        start = at + 1;
    }
    if start < source.len() {
        lines.push((start, source.len()));
    }
    lines
}

/// Index of the line containing `offset`, or `None` past the last line.
fn line_index(lines: &[(usize, usize)], offset: usize) -> Option<usize> {
    lines.iter().position(|(_, end)| offset <= *end)
}

/// Apply ascending in-line insertions to one line in a single pass.
fn splice(source: &str, (start, end): (usize, usize), insertions: &[&Insertion]) -> String {
    let line = &source[start..end];
    let mut out = String::with_capacity(line.len());
    let mut pos = 0;
    for ins in insertions {
        let at = ins.offset - start;
        out.push_str(&line[pos..at]);
        out.push_str(&ins.text);
        pos = at;
    }
    out.push_str(&line[pos..]);
    out
}

fn render_hunks(
    path: &str,
    source: &str,
    lines: &[(usize, usize)],
    edits: &[LineEdit],
) -> String {
    // Group changed slots into hunks; gaps of up to twice the context
    // width stay in one hunk.
    let changed: Vec<usize> = (0..edits.len())
        .filter(|i| edits[*i].is_change())
        .collect();
    if changed.is_empty() {
        return String::new();
    }

    let mut out = format!("--- a/{}\n+++ b/{}\n", path, path);
    let mut shift = 0usize;
    let mut i = 0;
    while i < changed.len() {
        let mut last = i;
        while last + 1 < changed.len() && changed[last + 1] - changed[last] <= 2 * CONTEXT {
            last += 1;
        }

        let first_slot = changed[i];
        let last_slot = changed[last];
        let from = first_slot.saturating_sub(CONTEXT);
        let to = (last_slot + CONTEXT).min(lines.len().saturating_sub(1));

        let mut old_count = 0usize;
        let mut new_count = 0usize;
        let mut body = String::new();
        for slot in from..=to.max(last_slot) {
            if let Some(edit) = edits.get(slot) {
                for added in &edit.added_before {
                    body.push('+');
                    body.push_str(added);
                    body.push('\n');
                    new_count += 1;
                }
            }
            if slot >= lines.len() {
                break;
            }
            let (start, end) = lines[slot];
            let text = &source[start..end];
            match edits.get(slot).and_then(|e| e.replaced.as_ref()) {
                Some(replacement) => {
                    body.push('-');
                    body.push_str(text);
                    body.push('\n');
                    body.push('+');
                    body.push_str(replacement);
                    body.push('\n');
                    old_count += 1;
                    new_count += 1;
                }
                None => {
                    body.push(' ');
                    body.push_str(text);
                    body.push('\n');
                    old_count += 1;
                    new_count += 1;
                }
            }
        }

        let old_start = if old_count == 0 { from } else { from + 1 };
        let new_start = old_start + shift;
        out.push_str(&format!(
            "@@ -{},{} +{},{} @@\n",
            old_start, old_count, new_start, new_count
        ));
        out.push_str(&body);

        shift += new_count - old_count;
        i = last + 1;
    }
    out
}

// ============================================================================
// Tests
// ============================================================================

//! Site index: locating merged signatures for function definitions.
//!
//! The merger produces signatures keyed by the file path and line recorded
//! at trace time; the planner walks function definitions found in today's
//! source. The two drift apart as files are edited, so lookup matches by
//! name first and then picks the candidate whose recorded line is nearest
//! to the definition's current line, within a fixed window. Every entry can
//! be claimed at most once; duplicate definitions of the same name fall
//! through to the next unclaimed candidate.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::merge::{CallSiteKey, MergedSignature};

/// Maximum line drift tolerated between the recorded definition line and
/// the line found in the current source.
pub const MAX_LINE_DRIFT: u32 = 5;

/// One merged signature awaiting a matching definition.
#[derive(Debug, Clone)]
pub struct SiteEntry {
    /// 1-based definition line at trace time.
    pub line: u32,
    /// Function name, `Class.method` for methods.
    pub func_name: String,
    /// The merged signature for this site.
    pub signature: MergedSignature,
    claimed: bool,
}

impl SiteEntry {
    /// Whether a definition has already claimed this entry.
    pub fn is_claimed(&self) -> bool {
        self.claimed
    }

    fn bare_name(&self) -> &str {
        match self.func_name.rsplit_once('.') {
            Some((_, bare)) => bare,
            None => &self.func_name,
        }
    }
}

/// All merged signatures, grouped by recorded path.
#[derive(Debug, Default)]
pub struct SiteIndex {
    by_path: BTreeMap<String, Vec<SiteEntry>>,
}

impl SiteIndex {
    /// Build the index from merger output.
    pub fn new(merged: BTreeMap<CallSiteKey, MergedSignature>) -> Self {
        let mut by_path: BTreeMap<String, Vec<SiteEntry>> = BTreeMap::new();
        for (key, signature) in merged {
            by_path.entry(key.path.clone()).or_default().push(SiteEntry {
                line: key.line,
                func_name: key.func_name,
                signature,
                claimed: false,
            });
        }
        // Entries arrive sorted by (line, func_name) from the BTreeMap key
        // order; keep them that way so nearest-line scans are stable.
        Self { by_path }
    }

    /// Number of indexed sites across all paths.
    pub fn len(&self) -> usize {
        self.by_path.values().map(Vec::len).sum()
    }

    /// Whether the index holds no sites.
    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }

    /// Find and claim the signature for a definition.
    ///
    /// `qualified` is `Class.method` for methods (with `name` the bare
    /// method name); for module-level functions both are the plain name.
    /// Qualified candidates are preferred over bare-name ones, exact line
    /// matches over drifted ones, and an entry already claimed by an
    /// earlier definition is never reused.
    pub fn claim(
        &mut self,
        path: &str,
        name: &str,
        qualified: &str,
        line: u32,
    ) -> Option<&MergedSignature> {
        let entries = self.entries_for_mut(path)?;

        let mut best: Option<(usize, u32, bool)> = None;
        for (index, entry) in entries.iter().enumerate() {
            if entry.claimed {
                continue;
            }
            let exact_name = entry.func_name == qualified;
            if !exact_name && entry.bare_name() != name {
                continue;
            }
            let drift = entry.line.abs_diff(line);
            if drift > MAX_LINE_DRIFT {
                continue;
            }
            let better = match best {
                None => true,
                // Qualified-name matches beat bare-name matches, then
                // smaller drift wins.
                Some((_, best_drift, best_exact)) => {
                    exact_name > best_exact
                        || (exact_name == best_exact && drift < best_drift)
                }
            };
            if better {
                best = Some((index, drift, exact_name));
            }
        }

        let (index, drift, _) = best?;
        if drift > 0 {
            debug!(
                path,
                name = qualified,
                recorded = entries[index].line,
                found = line,
                "matched with line drift"
            );
        }
        entries[index].claimed = true;
        Some(&entries[index].signature)
    }

    /// Log every indexed site for `path` that no definition claimed.
    pub fn report_unclaimed(&self, path: &str) {
        if let Some(entries) = self.entries_for(path) {
            for entry in entries.iter().filter(|e| !e.claimed) {
                warn!(
                    path,
                    func = %entry.func_name,
                    line = entry.line,
                    "no matching definition for observed site"
                );
            }
        }
    }

    /// Count of unclaimed sites for `path`.
    pub fn unclaimed_count(&self, path: &str) -> usize {
        self.entries_for(path)
            .map(|entries| entries.iter().filter(|e| !e.claimed).count())
            .unwrap_or(0)
    }

    fn entries_for(&self, path: &str) -> Option<&Vec<SiteEntry>> {
        let key = self.resolve_path(path)?;
        self.by_path.get(&key)
    }

    fn entries_for_mut(&mut self, path: &str) -> Option<&mut Vec<SiteEntry>> {
        let key = self.resolve_path(path)?;
        self.by_path.get_mut(&key)
    }

    /// Resolve a source path against the recorded paths: an exact match,
    /// or a unique component-aligned suffix match in either direction
    /// (`src/pkg/mod.py` vs a recorded `pkg/mod.py` and vice versa).
    fn resolve_path(&self, path: &str) -> Option<String> {
        if self.by_path.contains_key(path) {
            return Some(path.to_string());
        }
        let mut matches = self
            .by_path
            .keys()
            .filter(|recorded| paths_match(recorded, path));
        let found = matches.next()?.clone();
        if matches.next().is_some() {
            warn!(path, "multiple recorded paths match, skipping lookup");
            return None;
        }
        Some(found)
    }
}

/// Component-aligned suffix comparison between two slash-separated paths.
fn paths_match(a: &str, b: &str) -> bool {
    let a_parts: Vec<&str> = a.split('/').filter(|p| !p.is_empty() && *p != ".").collect();
    let b_parts: Vec<&str> = b.split('/').filter(|p| !p.is_empty() && *p != ".").collect();
    let n = a_parts.len().min(b_parts.len());
    n > 0 && a_parts[a_parts.len() - n..] == b_parts[b_parts.len() - n..]
}

// ============================================================================
// Tests
// ============================================================================

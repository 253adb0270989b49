//! Merging observation records into canonical per-function signatures.
//!
//! Records are grouped by call site key (path, line, function name); every
//! type comment in a group is parsed and the shapes are folded position by
//! position with [`unify`]. The fold is commutative and associative, so the
//! merged signature is identical no matter how the records were ordered or
//! batched in the input file.

use std::collections::BTreeMap;

use tracing::warn;

use crate::parse::{parse_type_comment, ObservationRecord};
use crate::types::{unify, ArgKind, Argument, MergeOptions, TypeDescriptor};

/// Identity of one observed function definition.
///
/// Ordered so merged output iterates deterministically by path, then line,
/// then name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CallSiteKey {
    /// Source path as recorded at trace time.
    pub path: String,
    /// 1-based definition line at trace time.
    pub line: u32,
    /// Function name, `Class.method` for methods.
    pub func_name: String,
}

impl CallSiteKey {
    fn of(record: &ObservationRecord) -> Self {
        CallSiteKey {
            path: record.path.clone(),
            line: record.line,
            func_name: record.func_name.clone(),
        }
    }

    /// The bare function name with any `Class.` qualifier removed.
    pub fn bare_name(&self) -> &str {
        match self.func_name.rsplit_once('.') {
            Some((_, bare)) => bare,
            None => &self.func_name,
        }
    }
}

/// The canonical signature for one call site after merging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedSignature {
    /// Per-position argument descriptors, widest observed arity.
    pub args: Vec<Argument>,
    /// Unified return descriptor.
    pub ret: TypeDescriptor,
    /// Total samples across the merged records.
    pub samples: u64,
}

impl MergedSignature {
    /// Whether any position carries real observed evidence.
    ///
    /// A signature of all-[`TypeDescriptor::Unknown`] positions says
    /// nothing; the planner skips such sites instead of annotating them
    /// with bare `Any`s.
    pub fn has_evidence(&self) -> bool {
        self.args.iter().any(|arg| arg.descriptor.has_evidence())
            || self.ret.has_evidence()
    }

    /// Render as a type comment body, e.g. `(int, *str) -> bool`.
    pub fn render_comment(&self) -> String {
        let args: Vec<String> = self.args.iter().map(|arg| arg.render()).collect();
        format!("({}) -> {}", args.join(", "), self.ret.render())
    }
}

/// Merge parsed records into one signature per call site.
///
/// Records whose type comments all fail to parse contribute nothing and
/// their site is dropped with a warning.
pub fn merge_records(
    records: &[ObservationRecord],
    opts: &MergeOptions,
) -> BTreeMap<CallSiteKey, MergedSignature> {
    let mut grouped: BTreeMap<CallSiteKey, (Vec<&str>, u64)> = BTreeMap::new();
    for record in records {
        let entry = grouped
            .entry(CallSiteKey::of(record))
            .or_insert_with(|| (Vec::new(), 0));
        entry
            .0
            .extend(record.type_comments.iter().map(String::as_str));
        entry.1 += record.samples;
    }

    let mut merged = BTreeMap::new();
    for (key, (comments, samples)) in grouped {
        match merge_comments(&key, &comments, opts) {
            Some((args, ret)) => {
                merged.insert(key, MergedSignature { args, ret, samples });
            }
            None => {
                warn!(
                    path = %key.path,
                    line = key.line,
                    func = %key.func_name,
                    "no usable type comments for site, dropping"
                );
            }
        }
    }
    merged
}

fn merge_comments(
    key: &CallSiteKey,
    comments: &[&str],
    opts: &MergeOptions,
) -> Option<(Vec<Argument>, TypeDescriptor)> {
    let mut shapes = Vec::with_capacity(comments.len());
    for comment in comments {
        match parse_type_comment(comment) {
            Ok(shape) => shapes.push(shape),
            Err(err) => {
                warn!(
                    path = %key.path,
                    line = key.line,
                    func = %key.func_name,
                    "discarding comment: {err}"
                );
            }
        }
    }
    let mut iter = shapes.into_iter();
    let first = iter.next()?;
    let merged = iter.fold(first, |acc, shape| merge_shapes(key, acc, shape, opts));
    Some(merged)
}

type Shape = (Vec<Argument>, TypeDescriptor);

/// Fold two observed shapes into one.
///
/// Shorter arities are right-padded with [`TypeDescriptor::Unknown`], so a
/// call observed both with and without a defaulted argument keeps the
/// longer shape with the real evidence for the extra position. Star-kind
/// conflicts at a position widen that position to plain `Any`.
fn merge_shapes(key: &CallSiteKey, a: Shape, b: Shape, opts: &MergeOptions) -> Shape {
    let (mut args_a, ret_a) = a;
    let (mut args_b, ret_b) = b;
    let arity = args_a.len().max(args_b.len());
    args_a.resize_with(arity, || Argument::positional(TypeDescriptor::Unknown));
    args_b.resize_with(arity, || Argument::positional(TypeDescriptor::Unknown));

    let args = args_a
        .into_iter()
        .zip(args_b)
        .enumerate()
        .map(|(position, (left, right))| merge_argument(key, position, left, right, opts))
        .collect();
    (args, unify(ret_a, ret_b, opts))
}

fn merge_argument(
    key: &CallSiteKey,
    position: usize,
    left: Argument,
    right: Argument,
    opts: &MergeOptions,
) -> Argument {
    // A padded Unknown position has no kind evidence; defer to the other
    // side's kind.
    let kind = match (left.kind, right.kind) {
        (a, b) if a == b => a,
        (a, ArgKind::Positional) if !right.descriptor.has_evidence() => a,
        (ArgKind::Positional, b) if !left.descriptor.has_evidence() => b,
        (a, b) => {
            warn!(
                path = %key.path,
                line = key.line,
                func = %key.func_name,
                position,
                "star kind conflict ({} vs {}), widening to Any",
                a.prefix(),
                b.prefix()
            );
            return Argument::positional(TypeDescriptor::Any);
        }
    };
    Argument {
        descriptor: unify(left.descriptor, right.descriptor, opts),
        kind,
    }
}

// ============================================================================
// Tests
// ============================================================================

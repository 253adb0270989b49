//! Annotation planning: turning merged signatures into insertions.
//!
//! For each function in a parsed module the planner looks up a signature
//! in the site index, reconciles the observed argument list against the
//! parameters actually in the header, and emits pure point insertions.
//! Functions are skipped, never half-annotated: any existing annotation,
//! a compact single-line suite (comment style), an evidence-free
//! signature, or an arity the source cannot absorb leaves the function
//! untouched with a recorded reason.

use std::fmt;

use tracing::{debug, warn};

use crate::cst::{FunctionDef, Module, Param, ParamKind};
use crate::merge::MergedSignature;
use crate::patch::Insertion;
use crate::sites::SiteIndex;
use crate::types::{ArgKind, Argument, TypeDescriptor};

/// Where annotations go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Style {
    /// A `# type: (...) -> R` comment as the first suite line.
    #[default]
    Comment,
    /// PEP 526 parameter and return annotations in the header.
    Inline,
}

/// Why a function with a matched signature was left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The header or suite already carries annotations of either style.
    AlreadyAnnotated,
    /// The suite sits on the header line; a comment cannot be placed.
    CompactBody,
    /// Every observed position is evidence-free; annotating would write
    /// nothing but `Any`.
    NoEvidence,
    /// The parameter list has forms the header parser does not model.
    OpaqueParams,
    /// Observed arity cannot be reconciled with the header's parameters.
    ArityMismatch,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SkipReason::AlreadyAnnotated => "already annotated",
            SkipReason::CompactBody => "suite on the header line",
            SkipReason::NoEvidence => "no observed evidence",
            SkipReason::OpaqueParams => "unsupported parameter form",
            SkipReason::ArityMismatch => "argument count mismatch",
        };
        f.write_str(text)
    }
}

/// One function the planner annotated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedSite {
    /// Qualified name, `Class.method` for methods.
    pub name: String,
    /// 1-based line of the `def`.
    pub line: u32,
    /// The signature as it will appear, e.g. `(int, int) -> int`.
    pub signature: String,
}

/// One function left untouched, with the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedSite {
    pub name: String,
    pub line: u32,
    pub reason: SkipReason,
}

/// The planner's verdict for one file.
#[derive(Debug, Clone, Default)]
pub struct FilePlan {
    /// Point insertions in ascending offset order.
    pub insertions: Vec<Insertion>,
    pub annotated: Vec<PlannedSite>,
    pub skipped: Vec<SkippedSite>,
    /// Functions scanned without any matching observed site.
    pub unmatched: Vec<(String, u32)>,
}

impl FilePlan {
    /// Whether the plan changes the file at all.
    pub fn is_empty(&self) -> bool {
        self.insertions.is_empty()
    }
}

/// Plan annotations for one parsed module.
///
/// Claims matching entries in `sites` as it goes; entries left unclaimed
/// afterwards had no surviving definition in the source.
pub fn plan_file(
    module: &Module,
    source: &str,
    path: &str,
    sites: &mut SiteIndex,
    style: Style,
) -> FilePlan {
    let mut plan = FilePlan::default();

    module.for_each_function(|classes, def| {
        let qualified = qualify(classes, &def.name);
        let signature = match sites.claim(path, &def.name, &qualified, def.line) {
            Some(signature) => signature.clone(),
            None => {
                plan.unmatched.push((qualified, def.line));
                return;
            }
        };
        match plan_function(source, def, classes, &qualified, &signature, style) {
            Ok((insertions, rendered)) => {
                debug!(path, func = %qualified, line = def.line, sig = %rendered, "annotating");
                plan.insertions.extend(insertions);
                plan.annotated.push(PlannedSite {
                    name: qualified,
                    line: def.line,
                    signature: rendered,
                });
            }
            Err(reason) => {
                debug!(path, func = %qualified, line = def.line, %reason, "skipping");
                plan.skipped.push(SkippedSite {
                    name: qualified,
                    line: def.line,
                    reason,
                });
            }
        }
    });

    plan.insertions.sort_by_key(|ins| ins.offset);
    plan
}

fn qualify(classes: &[String], name: &str) -> String {
    if classes.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", classes.join("."), name)
    }
}

fn plan_function(
    source: &str,
    def: &FunctionDef,
    classes: &[String],
    qualified: &str,
    signature: &MergedSignature,
    style: Style,
) -> Result<(Vec<Insertion>, String), SkipReason> {
    if def.is_annotated() {
        return Err(SkipReason::AlreadyAnnotated);
    }
    if !signature.has_evidence() {
        return Err(SkipReason::NoEvidence);
    }
    if def.has_opaque_params() {
        return Err(SkipReason::OpaqueParams);
    }
    if style == Style::Comment && def.compact_body {
        return Err(SkipReason::CompactBody);
    }

    let params = annotatable_params(def, classes);
    let args = align_signature(&params, signature).map_err(|err| {
        warn!(
            func = qualified,
            line = def.line,
            "cannot reconcile signature: {err}"
        );
        SkipReason::ArityMismatch
    })?;

    let rendered_args: Vec<String> = args.iter().map(Argument::render).collect();
    let rendered = format!("({}) -> {}", rendered_args.join(", "), signature.ret.render());

    let insertions = match style {
        Style::Comment => vec![Insertion {
            offset: def.body_start,
            text: format!("{}# type: {}\n", def.body_indent, rendered),
            line: line_at(source, def, def.body_start),
        }],
        Style::Inline => {
            let mut insertions = Vec::new();
            for (param, arg) in params.iter().zip(&args) {
                insertions.push(Insertion {
                    offset: param.name_end,
                    text: format!(": {}", arg.descriptor.render()),
                    line: line_at(source, def, param.name_end),
                });
            }
            insertions.push(Insertion {
                offset: def.close_paren_offset + 1,
                text: format!(" -> {}", signature.ret.render()),
                line: line_at(source, def, def.close_paren_offset),
            });
            insertions
        }
    };
    Ok((insertions, rendered))
}

/// Parameters a signature describes: markers dropped, and a leading
/// `self`/`cls` of a method dropped too, since observed shapes never
/// include the receiver.
fn annotatable_params<'a>(def: &'a FunctionDef, classes: &[String]) -> Vec<&'a Param> {
    let mut params: Vec<&Param> = def.value_params().collect();
    if !classes.is_empty() {
        if let Some(first) = params.first() {
            if first.kind == ParamKind::Normal && (first.name == "self" || first.name == "cls")
            {
                params.remove(0);
            }
        }
    }
    params
}

#[derive(Debug)]
enum AlignError {
    Count { header: usize, observed: usize },
    Kind { position: usize },
}

impl fmt::Display for AlignError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlignError::Count { header, observed } => write!(
                f,
                "header has {} parameters but {} were observed",
                header, observed
            ),
            AlignError::Kind { position } => {
                write!(f, "star kind differs at position {}", position)
            }
        }
    }
}

/// Align observed arguments to header parameters, one per parameter.
///
/// A header `*args`/`**kwargs` never fed at runtime gets a star `Any`
/// slot; trailing parameters with unobserved defaults get plain `Any`.
/// More observed arguments than header parameters is unreconcilable.
fn align_signature(
    params: &[&Param],
    signature: &MergedSignature,
) -> Result<Vec<Argument>, AlignError> {
    let mut args = signature.args.clone();

    for (position, param) in params.iter().enumerate() {
        let wanted = match param.kind {
            ParamKind::Star => ArgKind::Star,
            ParamKind::StarStar => ArgKind::StarStar,
            _ => ArgKind::Positional,
        };
        if wanted != ArgKind::Positional
            && !args.iter().any(|arg| arg.kind == wanted)
        {
            let at = position.min(args.len());
            args.insert(
                at,
                Argument {
                    descriptor: TypeDescriptor::Any,
                    kind: wanted,
                },
            );
        }
    }
    while args.len() < params.len() {
        // Defaulted parameters the traces never exercised.
        let at = args
            .iter()
            .position(|arg| arg.kind != ArgKind::Positional)
            .unwrap_or(args.len());
        args.insert(at, Argument::positional(TypeDescriptor::Any));
    }
    if args.len() != params.len() {
        return Err(AlignError::Count {
            header: params.len(),
            observed: args.len(),
        });
    }

    for (position, (param, arg)) in params.iter().zip(&args).enumerate() {
        let wanted = match param.kind {
            ParamKind::Star => ArgKind::Star,
            ParamKind::StarStar => ArgKind::StarStar,
            _ => ArgKind::Positional,
        };
        if arg.kind != wanted {
            return Err(AlignError::Kind { position });
        }
    }
    Ok(args)
}

/// 1-based line number of `offset`, counting from the function header.
fn line_at(source: &str, def: &FunctionDef, offset: usize) -> u32 {
    let from = def.header_span.start.min(offset);
    let newlines = memchr::memchr_iter(b'\n', source[from..offset].as_bytes()).count();
    def.line + newlines as u32
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cst::parse_module;
    use crate::merge::merge_records;
    use crate::parse::ObservationRecord;
    use crate::patch::apply_insertions;
    use crate::types::MergeOptions;

    fn sites(entries: &[(&str, u32, &str, &str)]) -> SiteIndex {
        let records: Vec<ObservationRecord> = entries
            .iter()
            .map(|(path, line, func, comment)| ObservationRecord {
                path: path.to_string(),
                line: *line,
                func_name: func.to_string(),
                type_comments: vec![comment.to_string()],
                samples: 1,
            })
            .collect();
        SiteIndex::new(merge_records(&records, &MergeOptions::default()))
    }

    fn plan(source: &str, style: Style, entries: &[(&str, u32, &str, &str)]) -> FilePlan {
        let module = parse_module(source).unwrap();
        let mut index = sites(entries);
        plan_file(&module, source, "mod.py", &mut index, style)
    }

    fn patch(source: &str, style: Style, entries: &[(&str, u32, &str, &str)]) -> String {
        let file_plan = plan(source, style, entries);
        apply_insertions(source, &file_plan.insertions)
    }

    mod comment_style {
        use super::*;

        #[test]
        fn gcd_end_to_end() {
            let src = "\
def gcd(a, b):
    while b:
        a, b = b, a % b
    return a
";
            let out = patch(src, Style::Comment, &[("mod.py", 1, "gcd", "(int, int) -> int")]);
            assert_eq!(
                out,
                "\
def gcd(a, b):
    # type: (int, int) -> int
    while b:
        a, b = b, a % b
    return a
"
            );
        }

        #[test]
        fn comment_goes_before_docstring() {
            let src = "def f(a):\n    '''doc'''\n    return a\n";
            let out = patch(src, Style::Comment, &[("mod.py", 1, "f", "(int) -> int")]);
            assert_eq!(
                out,
                "def f(a):\n    # type: (int) -> int\n    '''doc'''\n    return a\n"
            );
        }

        #[test]
        fn method_signature_omits_self() {
            let src = "\
class Greeter:
    def greet(self, name):
        return 'hi ' + name
";
            let out = patch(
                src,
                Style::Comment,
                &[("mod.py", 2, "Greeter.greet", "(str) -> str")],
            );
            assert!(out.contains("        # type: (str) -> str\n"));
        }

        #[test]
        fn compact_body_is_skipped() {
            let src = "def f(a): return a\n";
            let file_plan = plan(src, Style::Comment, &[("mod.py", 1, "f", "(int) -> int")]);
            assert!(file_plan.is_empty());
            assert_eq!(file_plan.skipped[0].reason, SkipReason::CompactBody);
        }

        #[test]
        fn indentation_follows_body() {
            let src = "def f(a):\n\treturn a\n";
            let out = patch(src, Style::Comment, &[("mod.py", 1, "f", "(int) -> int")]);
            assert_eq!(out, "def f(a):\n\t# type: (int) -> int\n\treturn a\n");
        }

        #[test]
        fn multi_line_header_inserts_after_colon_line() {
            let src = "def f(a,\n      b):\n    return a\n";
            let out = patch(src, Style::Comment, &[("mod.py", 1, "f", "(int, int) -> int")]);
            assert_eq!(
                out,
                "def f(a,\n      b):\n    # type: (int, int) -> int\n    return a\n"
            );
        }
    }

    mod inline_style {
        use super::*;

        #[test]
        fn params_and_return() {
            let src = "def gcd(a, b):\n    return a\n";
            let out = patch(src, Style::Inline, &[("mod.py", 1, "gcd", "(int, int) -> int")]);
            assert_eq!(out, "def gcd(a: int, b: int) -> int:\n    return a\n");
        }

        #[test]
        fn star_params_keep_bare_names() {
            let src = "def f(a, *args, **kwargs):\n    pass\n";
            let out = patch(
                src,
                Style::Inline,
                &[("mod.py", 1, "f", "(int, *str, **Any) -> None")],
            );
            assert_eq!(
                out,
                "def f(a: int, *args: str, **kwargs: Any) -> None:\n    pass\n"
            );
        }

        #[test]
        fn compact_body_is_fine_inline() {
            let src = "def f(a): return a\n";
            let out = patch(src, Style::Inline, &[("mod.py", 1, "f", "(int) -> int")]);
            assert_eq!(out, "def f(a: int) -> int: return a\n");
        }

        #[test]
        fn self_is_left_bare() {
            let src = "class C:\n    def m(self, x):\n        return x\n";
            let out = patch(src, Style::Inline, &[("mod.py", 2, "C.m", "(int) -> int")]);
            assert_eq!(
                out,
                "class C:\n    def m(self, x: int) -> int:\n        return x\n"
            );
        }
    }

    mod reconciliation {
        use super::*;

        #[test]
        fn unobserved_default_pads_any() {
            let src = "def f(a, flag=False):\n    return a\n";
            let out = patch(src, Style::Comment, &[("mod.py", 1, "f", "(int) -> int")]);
            assert!(out.contains("# type: (int, Any) -> int\n"));
        }

        #[test]
        fn unfed_star_params_get_star_any() {
            let src = "def f(a, *args, **kwargs):\n    pass\n";
            let out = patch(src, Style::Comment, &[("mod.py", 1, "f", "(int) -> None")]);
            assert!(out.contains("# type: (int, *Any, **Any) -> None\n"));
        }

        #[test]
        fn keyword_only_params_count() {
            let src = "def f(a, *, b):\n    pass\n";
            let out = patch(src, Style::Comment, &[("mod.py", 1, "f", "(int, str) -> None")]);
            assert!(out.contains("# type: (int, str) -> None\n"));
        }

        #[test]
        fn excess_observed_args_skip() {
            let src = "def f(a):\n    return a\n";
            let file_plan = plan(
                src,
                Style::Comment,
                &[("mod.py", 1, "f", "(int, str, float) -> int")],
            );
            assert_eq!(file_plan.skipped[0].reason, SkipReason::ArityMismatch);
            assert!(file_plan.is_empty());
        }
    }

    mod skips {
        use super::*;

        #[test]
        fn already_annotated_inline() {
            let src = "def f(a: int) -> int:\n    return a\n";
            let file_plan = plan(src, Style::Comment, &[("mod.py", 1, "f", "(int) -> int")]);
            assert_eq!(file_plan.skipped[0].reason, SkipReason::AlreadyAnnotated);
        }

        #[test]
        fn already_annotated_comment() {
            let src = "def f(a):\n    # type: (int) -> int\n    return a\n";
            let file_plan = plan(src, Style::Comment, &[("mod.py", 1, "f", "(int) -> int")]);
            assert_eq!(file_plan.skipped[0].reason, SkipReason::AlreadyAnnotated);
        }

        #[test]
        fn degenerate_signature_is_skipped() {
            let src = "def f():\n    raise RuntimeError\n";
            let file_plan = plan(
                src,
                Style::Comment,
                &[("mod.py", 1, "f", "() -> mypy_extensions.NoReturn")],
            );
            assert_eq!(file_plan.skipped[0].reason, SkipReason::NoEvidence);
        }

        #[test]
        fn unmatched_functions_are_recorded() {
            let src = "def lonely():\n    pass\n";
            let file_plan = plan(src, Style::Comment, &[]);
            assert_eq!(file_plan.unmatched, vec![("lonely".to_string(), 1)]);
        }
    }

    mod idempotency {
        use super::*;

        #[test]
        fn second_run_is_a_no_op() {
            let src = "def gcd(a, b):\n    while b:\n        pass\n    return a\n";
            let entries = [("mod.py", 1u32, "gcd", "(int, int) -> int")];
            let once = patch(src, Style::Comment, &entries);
            let again_plan = plan(&once, Style::Comment, &entries);
            assert!(again_plan.is_empty());
            assert_eq!(again_plan.skipped[0].reason, SkipReason::AlreadyAnnotated);
        }

        #[test]
        fn inline_second_run_is_a_no_op() {
            let src = "def f(a):\n    return a\n";
            let entries = [("mod.py", 1u32, "f", "(int) -> int")];
            let once = patch(src, Style::Inline, &entries);
            let again_plan = plan(&once, Style::Inline, &entries);
            assert!(again_plan.is_empty());
        }
    }

    mod drift {
        use super::*;

        #[test]
        fn claims_within_window() {
            let src = "# moved\n# down\n\ndef f(a):\n    return a\n";
            let out = patch(src, Style::Comment, &[("mod.py", 1, "f", "(int) -> int")]);
            assert!(out.contains("# type: (int) -> int\n"));
        }

        #[test]
        fn unclaimed_sites_stay_in_index() {
            let src = "def f(a):\n    return a\n";
            let module = parse_module(src).unwrap();
            let mut index = sites(&[
                ("mod.py", 1, "f", "(int) -> int"),
                ("mod.py", 40, "gone", "(str) -> str"),
            ]);
            let _ = plan_file(&module, src, "mod.py", &mut index, Style::Comment);
            assert_eq!(index.unclaimed_count("mod.py"), 1);
        }
    }
}

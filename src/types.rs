//! The canonical representation of observed types.
//!
//! A [`TypeDescriptor`] is the normalized, comparable form of one observed
//! (or padded) type. Descriptors are combined with [`unify`], which is
//! commutative and associative after normalization: unions are flattened on
//! construction, deduplicated, and kept in a fixed total order (primitives
//! before containers before generics before forward refs, then
//! lexicographic), so merge output is deterministic regardless of
//! observation order.
//!
//! `Optional(T)` is the canonical form of a two-member union containing
//! `None`. `Unknown` marks the absence of evidence (an unobserved
//! parameter position); it is absorbed by anything and renders as `Any`.

use std::fmt;

/// Options controlling type unification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOptions {
    /// Collapse a union to `Any` once it has more than this many members.
    ///
    /// `None` (the default) keeps unions unrestricted.
    pub max_union_members: Option<usize>,
}

/// A builtin container shape with its element descriptors.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Container {
    List(Box<TypeDescriptor>),
    Set(Box<TypeDescriptor>),
    FrozenSet(Box<TypeDescriptor>),
    /// Key and value descriptors.
    Dict(Box<TypeDescriptor>, Box<TypeDescriptor>),
    /// Fixed-arity tuple; the vector length is the arity.
    Tuple(Vec<TypeDescriptor>),
    /// Variable-length tuple `Tuple[T, ...]`, the downgrade target for
    /// arity-mismatched fixed tuples.
    UniformTuple(Box<TypeDescriptor>),
}

impl Container {
    /// The `typing` head name for this container kind.
    pub fn head(&self) -> &'static str {
        match self {
            Container::List(_) => "List",
            Container::Set(_) => "Set",
            Container::FrozenSet(_) => "FrozenSet",
            Container::Dict(_, _) => "Dict",
            Container::Tuple(_) | Container::UniformTuple(_) => "Tuple",
        }
    }
}

/// The canonical representation of a single observed type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeDescriptor {
    /// A bare class name: `int`, `str`, `None`, `MyClass`.
    Primitive(String),
    /// A builtin container with element descriptors.
    Container(Container),
    /// Any other parametrized name, e.g. `Iterator[int]`.
    Generic {
        name: String,
        args: Vec<TypeDescriptor>,
    },
    /// A flat union; never contains a nested union, members deduplicated
    /// and sorted. Built only through [`union_of`].
    Union(Vec<TypeDescriptor>),
    /// Sugar for `Union[inner, None]`; the canonical form of that shape.
    Optional(Box<TypeDescriptor>),
    /// A dotted qualified name such as `pkg.mod.Class`.
    ForwardRef(String),
    /// Explicit `Any` evidence.
    Any,
    /// No evidence at all (unobserved position). Renders as `Any`.
    Unknown,
}

impl TypeDescriptor {
    /// Shorthand for a named primitive.
    pub fn primitive(name: impl Into<String>) -> Self {
        TypeDescriptor::Primitive(name.into())
    }

    /// The `None` type.
    pub fn none() -> Self {
        TypeDescriptor::Primitive("None".to_string())
    }

    /// Whether this descriptor is the `None` type.
    pub fn is_none_type(&self) -> bool {
        matches!(self, TypeDescriptor::Primitive(name) if name == "None")
    }

    /// Whether this descriptor carries any observed evidence.
    pub fn has_evidence(&self) -> bool {
        !matches!(self, TypeDescriptor::Unknown)
    }

    /// Render the canonical type expression.
    ///
    /// Both annotation styles use this identical form, so rendering followed
    /// by parsing is lossless for every descriptor the merger can produce
    /// (`Unknown` is normalized to `Any` first).
    pub fn render(&self) -> String {
        self.to_string()
    }

    /// Ordering rank used for union member order.
    fn rank(&self) -> u8 {
        match self {
            TypeDescriptor::Primitive(_) => 0,
            TypeDescriptor::Container(_) => 1,
            TypeDescriptor::Generic { .. } => 2,
            TypeDescriptor::ForwardRef(_) => 3,
            TypeDescriptor::Any => 4,
            TypeDescriptor::Optional(_) => 5,
            TypeDescriptor::Union(_) => 6,
            TypeDescriptor::Unknown => 7,
        }
    }

    /// Total order key for deterministic union member ordering.
    fn order_key(&self) -> (u8, String) {
        (self.rank(), self.to_string())
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDescriptor::Primitive(name) => write!(f, "{}", name),
            TypeDescriptor::Container(c) => match c {
                Container::List(e) => write!(f, "List[{}]", e),
                Container::Set(e) => write!(f, "Set[{}]", e),
                Container::FrozenSet(e) => write!(f, "FrozenSet[{}]", e),
                Container::Dict(k, v) => write!(f, "Dict[{}, {}]", k, v),
                Container::Tuple(items) => {
                    if items.is_empty() {
                        write!(f, "Tuple[()]")
                    } else {
                        write!(f, "Tuple[{}]", join(items))
                    }
                }
                Container::UniformTuple(e) => write!(f, "Tuple[{}, ...]", e),
            },
            TypeDescriptor::Generic { name, args } => {
                if args.is_empty() {
                    write!(f, "{}", name)
                } else {
                    write!(f, "{}[{}]", name, join(args))
                }
            }
            TypeDescriptor::Union(members) => write!(f, "Union[{}]", join(members)),
            TypeDescriptor::Optional(inner) => write!(f, "Optional[{}]", inner),
            TypeDescriptor::ForwardRef(name) => write!(f, "{}", name),
            TypeDescriptor::Any | TypeDescriptor::Unknown => write!(f, "Any"),
        }
    }
}

fn join(items: &[TypeDescriptor]) -> String {
    items
        .iter()
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

// ============================================================================
// Arguments
// ============================================================================

/// How an argument position is passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgKind {
    /// An ordinary positional (or keyword-capable) argument.
    Positional,
    /// A `*args` argument.
    Star,
    /// A `**kwargs` argument.
    StarStar,
}

impl ArgKind {
    /// The textual prefix for this kind in a type comment.
    pub fn prefix(&self) -> &'static str {
        match self {
            ArgKind::Positional => "",
            ArgKind::Star => "*",
            ArgKind::StarStar => "**",
        }
    }
}

/// One argument slot of a signature: a descriptor plus its passing kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Argument {
    pub descriptor: TypeDescriptor,
    pub kind: ArgKind,
}

impl Argument {
    /// An argument with positional kind.
    pub fn positional(descriptor: TypeDescriptor) -> Self {
        Argument {
            descriptor,
            kind: ArgKind::Positional,
        }
    }

    /// Render with the `*`/`**` prefix for comment-form signatures.
    pub fn render(&self) -> String {
        format!("{}{}", self.kind.prefix(), self.descriptor.render())
    }
}

// ============================================================================
// Unification
// ============================================================================

/// Unify two descriptors into one.
///
/// Identical descriptors collapse; `Unknown` is absorbed by anything; `Any`
/// is absorbed by any concrete type; `None` paired with `T` yields
/// `Optional[T]`; same-kind containers and same-name generics unify
/// element-wise; everything else forms a flat union.
pub fn unify(a: TypeDescriptor, b: TypeDescriptor, opts: &MergeOptions) -> TypeDescriptor {
    match try_merge(a, b, opts) {
        Ok(merged) => merged,
        Err((a, b)) => union_of(vec![a, b], opts),
    }
}

/// Attempt a structural merge of two descriptors without forming a union.
///
/// Returns the inputs unchanged when no merge rule applies, so the caller
/// can fall back to union construction.
fn try_merge(
    a: TypeDescriptor,
    b: TypeDescriptor,
    opts: &MergeOptions,
) -> Result<TypeDescriptor, (TypeDescriptor, TypeDescriptor)> {
    use TypeDescriptor as T;

    if a == b {
        return Ok(a);
    }
    match (a, b) {
        (T::Unknown, t) | (t, T::Unknown) => Ok(t),
        (T::Any, t) | (t, T::Any) => Ok(t),
        (T::Container(x), T::Container(y)) => merge_containers(x, y, opts)
            .map_err(|(x, y)| (T::Container(x), T::Container(y))),
        (
            T::Generic { name: an, args: aa },
            T::Generic { name: bn, args: ba },
        ) => {
            if an == bn && aa.len() == ba.len() {
                let args = aa
                    .into_iter()
                    .zip(ba)
                    .map(|(x, y)| unify(x, y, opts))
                    .collect();
                Ok(T::Generic { name: an, args })
            } else {
                Err((
                    T::Generic { name: an, args: aa },
                    T::Generic { name: bn, args: ba },
                ))
            }
        }
        // Numeric widening: bool < int < float.
        (T::Primitive(x), T::Primitive(y)) => match (x.as_str(), y.as_str()) {
            ("bool", "int") | ("int", "bool") => Ok(T::primitive("int")),
            ("int", "float") | ("float", "int") => Ok(T::primitive("float")),
            ("bool", "float") | ("float", "bool") => Ok(T::primitive("float")),
            _ => Err((T::Primitive(x), T::Primitive(y))),
        },
        // A bare head name is subsumed by its parametrized form.
        (T::Primitive(name), T::Container(c)) | (T::Container(c), T::Primitive(name)) => {
            if name == c.head() {
                Ok(T::Container(c))
            } else {
                Err((T::Primitive(name), T::Container(c)))
            }
        }
        (T::Primitive(p), T::Generic { name, args }) | (T::Generic { name, args }, T::Primitive(p)) => {
            if p == name {
                Ok(T::Generic { name, args })
            } else {
                Err((T::Primitive(p), T::Generic { name, args }))
            }
        }
        (a, b) => Err((a, b)),
    }
}

/// Merge two containers of matching kind; mismatched kinds are returned for
/// union fallback. Mismatched tuple arity downgrades to `Tuple[T, ...]`.
fn merge_containers(
    a: Container,
    b: Container,
    opts: &MergeOptions,
) -> Result<TypeDescriptor, (Container, Container)> {
    use Container as C;
    let merged = match (a, b) {
        (C::List(x), C::List(y)) => C::List(Box::new(unify(*x, *y, opts))),
        (C::Set(x), C::Set(y)) => C::Set(Box::new(unify(*x, *y, opts))),
        (C::FrozenSet(x), C::FrozenSet(y)) => C::FrozenSet(Box::new(unify(*x, *y, opts))),
        (C::Dict(ak, av), C::Dict(bk, bv)) => C::Dict(
            Box::new(unify(*ak, *bk, opts)),
            Box::new(unify(*av, *bv, opts)),
        ),
        (C::Tuple(xs), C::Tuple(ys)) => {
            if xs.len() == ys.len() {
                C::Tuple(
                    xs.into_iter()
                        .zip(ys)
                        .map(|(x, y)| unify(x, y, opts))
                        .collect(),
                )
            } else {
                // Arity mismatch downgrades to a uniform sequence type.
                C::UniformTuple(Box::new(unify_all(
                    xs.into_iter().chain(ys),
                    opts,
                )))
            }
        }
        (C::Tuple(xs), C::UniformTuple(e)) | (C::UniformTuple(e), C::Tuple(xs)) => {
            C::UniformTuple(Box::new(unify_all(xs.into_iter().chain([*e]), opts)))
        }
        (C::UniformTuple(x), C::UniformTuple(y)) => {
            C::UniformTuple(Box::new(unify(*x, *y, opts)))
        }
        (a, b) => return Err((a, b)),
    };
    Ok(TypeDescriptor::Container(merged))
}

/// Unify an arbitrary non-empty sequence of descriptors.
///
/// An empty sequence yields `Unknown`.
pub fn unify_all(
    items: impl IntoIterator<Item = TypeDescriptor>,
    opts: &MergeOptions,
) -> TypeDescriptor {
    items
        .into_iter()
        .fold(TypeDescriptor::Unknown, |acc, item| unify(acc, item, opts))
}

/// Build the canonical union of the given descriptors.
///
/// Members are flattened (nested unions and `Optional` expanded), merged
/// pairwise where a structural rule applies, deduplicated, and sorted by
/// the fixed total order. A resulting two-member union containing `None`
/// normalizes to `Optional`; a single member collapses to itself; an empty
/// input yields `Unknown`. When `max_union_members` is set and exceeded,
/// the union collapses to `Any`.
pub fn union_of(items: Vec<TypeDescriptor>, opts: &MergeOptions) -> TypeDescriptor {
    let mut flat = Vec::new();
    flatten_into(items, &mut flat);

    let mut members: Vec<TypeDescriptor> = Vec::new();
    let mut saw_any = false;
    for item in flat {
        match item {
            TypeDescriptor::Unknown => continue,
            TypeDescriptor::Any => {
                saw_any = true;
                continue;
            }
            item => {
                let mut merged_at = None;
                for (i, existing) in members.iter().enumerate() {
                    if let Ok(merged) = try_merge(existing.clone(), item.clone(), opts) {
                        merged_at = Some((i, merged));
                        break;
                    }
                }
                match merged_at {
                    Some((i, merged)) => members[i] = merged,
                    None => members.push(item),
                }
            }
        }
    }

    if members.is_empty() {
        return if saw_any {
            TypeDescriptor::Any
        } else {
            TypeDescriptor::Unknown
        };
    }

    members.sort_by_key(|m| m.order_key());
    members.dedup();

    if let Some(max) = opts.max_union_members {
        if members.len() > max {
            return TypeDescriptor::Any;
        }
    }

    if members.len() == 1 {
        return members.pop().expect("non-empty");
    }
    if members.len() == 2 {
        if let Some(pos) = members.iter().position(TypeDescriptor::is_none_type) {
            let inner = members.swap_remove(1 - pos);
            return TypeDescriptor::Optional(Box::new(inner));
        }
    }
    TypeDescriptor::Union(members)
}

fn flatten_into(items: Vec<TypeDescriptor>, out: &mut Vec<TypeDescriptor>) {
    for item in items {
        match item {
            TypeDescriptor::Union(members) => flatten_into(members, out),
            TypeDescriptor::Optional(inner) => {
                flatten_into(vec![*inner], out);
                out.push(TypeDescriptor::none());
            }
            other => out.push(other),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn p(name: &str) -> TypeDescriptor {
        TypeDescriptor::primitive(name)
    }

    fn list(e: TypeDescriptor) -> TypeDescriptor {
        TypeDescriptor::Container(Container::List(Box::new(e)))
    }

    fn tuple(items: Vec<TypeDescriptor>) -> TypeDescriptor {
        TypeDescriptor::Container(Container::Tuple(items))
    }

    fn opts() -> MergeOptions {
        MergeOptions::default()
    }

    mod unify_rules {
        use super::*;

        #[test]
        fn identical_descriptors_collapse() {
            assert_eq!(unify(p("int"), p("int"), &opts()), p("int"));
        }

        #[test]
        fn none_with_type_yields_optional() {
            let out = unify(p("int"), TypeDescriptor::none(), &opts());
            assert_eq!(out, TypeDescriptor::Optional(Box::new(p("int"))));
            assert_eq!(out.render(), "Optional[int]");
        }

        #[test]
        fn none_ordering_is_irrelevant() {
            let a = unify(TypeDescriptor::none(), p("str"), &opts());
            let b = unify(p("str"), TypeDescriptor::none(), &opts());
            assert_eq!(a, b);
        }

        #[test]
        fn unknown_is_absorbed() {
            assert_eq!(unify(TypeDescriptor::Unknown, p("str"), &opts()), p("str"));
            assert_eq!(
                unify(p("str"), TypeDescriptor::Unknown, &opts()),
                p("str")
            );
            assert_eq!(
                unify(TypeDescriptor::Unknown, TypeDescriptor::Unknown, &opts()),
                TypeDescriptor::Unknown
            );
        }

        #[test]
        fn any_is_absorbed_by_concrete() {
            assert_eq!(unify(TypeDescriptor::Any, p("int"), &opts()), p("int"));
        }

        #[test]
        fn different_primitives_form_a_union() {
            let out = unify(p("str"), p("bytes"), &opts());
            assert_eq!(out, TypeDescriptor::Union(vec![p("bytes"), p("str")]));
        }

        #[test]
        fn numeric_widening() {
            assert_eq!(unify(p("bool"), p("int"), &opts()), p("int"));
            assert_eq!(unify(p("int"), p("float"), &opts()), p("float"));
        }

        #[test]
        fn same_kind_containers_unify_elementwise() {
            let out = unify(list(p("bool")), list(p("int")), &opts());
            assert_eq!(out, list(p("int")));
        }

        #[test]
        fn different_kind_containers_form_a_union() {
            let set = TypeDescriptor::Container(Container::Set(Box::new(p("int"))));
            let out = unify(list(p("int")), set.clone(), &opts());
            assert_eq!(out, TypeDescriptor::Union(vec![list(p("int")), set]));
        }

        #[test]
        fn matching_tuple_arity_unifies_positionwise() {
            let out = unify(
                tuple(vec![p("int"), p("str")]),
                tuple(vec![p("bool"), p("str")]),
                &opts(),
            );
            assert_eq!(out, tuple(vec![p("int"), p("str")]));
        }

        #[test]
        fn mismatched_tuple_arity_downgrades_to_uniform() {
            let out = unify(
                tuple(vec![p("int"), p("int")]),
                tuple(vec![p("int")]),
                &opts(),
            );
            assert_eq!(
                out,
                TypeDescriptor::Container(Container::UniformTuple(Box::new(p("int"))))
            );
            assert_eq!(out.render(), "Tuple[int, ...]");
        }

        #[test]
        fn generics_unify_argwise() {
            let a = TypeDescriptor::Generic {
                name: "Iterator".to_string(),
                args: vec![p("bool")],
            };
            let b = TypeDescriptor::Generic {
                name: "Iterator".to_string(),
                args: vec![p("int")],
            };
            assert_eq!(
                unify(a, b, &opts()),
                TypeDescriptor::Generic {
                    name: "Iterator".to_string(),
                    args: vec![p("int")],
                }
            );
        }

        #[test]
        fn bare_head_subsumed_by_parametrized_form() {
            let out = unify(p("List"), list(p("int")), &opts());
            assert_eq!(out, list(p("int")));
        }
    }

    mod union_normalization {
        use super::*;

        #[test]
        fn nested_unions_are_flattened() {
            let inner = union_of(vec![p("bytes"), p("str")], &opts());
            let out = union_of(vec![inner, p("memoryview")], &opts());
            match out {
                TypeDescriptor::Union(members) => {
                    assert_eq!(members, vec![p("bytes"), p("memoryview"), p("str")]);
                }
                other => panic!("expected Union, got {:?}", other),
            }
        }

        #[test]
        fn member_order_is_deterministic() {
            let a = union_of(vec![p("str"), list(p("int")), p("bytes")], &opts());
            let b = union_of(vec![list(p("int")), p("bytes"), p("str")], &opts());
            assert_eq!(a, b);
            assert_eq!(a.render(), "Union[bytes, str, List[int]]");
        }

        #[test]
        fn optional_flattens_through_union() {
            let o = TypeDescriptor::Optional(Box::new(p("int")));
            let out = union_of(vec![o, p("str")], &opts());
            assert_eq!(out.render(), "Union[None, int, str]");
        }

        #[test]
        fn single_member_collapses() {
            assert_eq!(union_of(vec![p("int"), p("int")], &opts()), p("int"));
        }

        #[test]
        fn empty_union_is_unknown() {
            assert_eq!(union_of(vec![], &opts()), TypeDescriptor::Unknown);
        }

        #[test]
        fn diversity_guard_off_by_default() {
            let out = union_of(
                vec![p("a1"), p("b2"), p("c3"), p("d4"), p("e5")],
                &opts(),
            );
            assert!(matches!(&out, TypeDescriptor::Union(m) if m.len() == 5));
        }

        #[test]
        fn diversity_guard_collapses_to_any() {
            let guarded = MergeOptions {
                max_union_members: Some(3),
            };
            let out = union_of(
                vec![p("a1"), p("b2"), p("c3"), p("d4")],
                &guarded,
            );
            assert_eq!(out, TypeDescriptor::Any);

            // At the threshold the union survives.
            let out = union_of(vec![p("a1"), p("b2"), p("c3")], &guarded);
            assert!(matches!(&out, TypeDescriptor::Union(m) if m.len() == 3));
        }
    }

    mod determinism {
        use super::*;

        #[test]
        fn unify_all_is_order_independent() {
            let items = [
                p("int"),
                TypeDescriptor::none(),
                p("str"),
                list(p("bool")),
                list(p("int")),
                TypeDescriptor::Any,
            ];
            // All 6 rotations plus a reversal cover enough permutations to
            // catch order-dependent folding.
            let baseline = unify_all(items.iter().cloned(), &opts());
            for rot in 0..items.len() {
                let mut perm: Vec<_> = items[rot..].to_vec();
                perm.extend_from_slice(&items[..rot]);
                assert_eq!(unify_all(perm.iter().cloned(), &opts()), baseline);
                perm.reverse();
                assert_eq!(unify_all(perm, &opts()), baseline);
            }
        }
    }

    mod rendering {
        use super::*;

        #[test]
        fn container_forms() {
            let d = TypeDescriptor::Container(Container::Dict(
                Box::new(p("str")),
                Box::new(list(p("int"))),
            ));
            assert_eq!(d.render(), "Dict[str, List[int]]");
        }

        #[test]
        fn empty_tuple_special_case() {
            assert_eq!(tuple(vec![]).render(), "Tuple[()]");
        }

        #[test]
        fn unknown_renders_as_any() {
            assert_eq!(TypeDescriptor::Unknown.render(), "Any");
        }

        #[test]
        fn forward_ref_keeps_qualification() {
            let d = TypeDescriptor::ForwardRef("pkg.mod.Thing".to_string());
            assert_eq!(d.render(), "pkg.mod.Thing");
        }
    }
}

//! Node types for the full-fidelity source tree.
//!
//! Every byte of the input is attributable to exactly one node span; the
//! concatenation of top-level spans reconstructs the file. Statements the
//! annotator never touches stay as opaque spans, and only function and
//! class definitions get structure.

use crate::patch::Span;

/// One node of the tree. Spans of sibling nodes tile their parent exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Function(Box<FunctionDef>),
    Class(Box<ClassDef>),
    /// Any other statement, kept as raw bytes.
    Statement(Span),
    /// Blank lines and standalone comments.
    Trivia(Span),
}

impl Node {
    /// Full byte range of the node, children included.
    pub fn span(&self) -> Span {
        match self {
            Node::Function(def) => def.span,
            Node::Class(def) => def.span,
            Node::Statement(span) | Node::Trivia(span) => *span,
        }
    }
}

/// How a parameter participates in the call shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Plain or keyword parameter.
    Normal,
    /// `*args`.
    Star,
    /// `**kwargs`.
    StarStar,
    /// Bare `*` keyword-only marker; never annotated.
    MarkerStar,
    /// `/` positional-only marker; never annotated.
    MarkerSlash,
    /// A parameter form the header parser does not model. The whole
    /// function is skipped for inline annotation.
    Opaque,
}

impl ParamKind {
    /// Whether the parameter is a real value slot rather than a marker.
    pub fn takes_value(&self) -> bool {
        matches!(self, ParamKind::Normal | ParamKind::Star | ParamKind::StarStar)
    }
}

/// One parameter of a function header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    /// Parameter name without star prefixes; empty for markers.
    pub name: String,
    /// Byte offset just past the name, where an inline `: T` goes.
    pub name_end: usize,
    pub kind: ParamKind,
    /// Whether the parameter already has a `: T` annotation.
    pub annotated: bool,
    /// Whether the parameter has a `= default`.
    pub has_default: bool,
    /// Bytes of the whole parameter, defaults included.
    pub span: Span,
}

/// A `def` (or `async def`) with everything the planner needs to place
/// annotations without reformatting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionDef {
    /// Decorators through end of body.
    pub span: Span,
    /// Bare function name.
    pub name: String,
    /// 1-based physical line of the `def` keyword.
    pub line: u32,
    pub is_async: bool,
    /// Leading whitespace of the `def` line.
    pub indent: String,
    /// Decorator lines preceding the header, in order.
    pub decorators: Vec<Span>,
    /// The `def` logical line, from indent through trailing newline.
    pub header_span: Span,
    /// Parameter list contents between the parentheses.
    pub params_span: Span,
    pub params: Vec<Param>,
    /// Offset of the `)` closing the parameter list.
    pub close_paren_offset: usize,
    /// Offset of the header `:`.
    pub colon_offset: usize,
    /// Whether the header carries a `-> T` return annotation.
    pub has_return_annotation: bool,
    /// Whether a `# type:` comment already exists on the header line or in
    /// the parameter list.
    pub has_type_comment: bool,
    /// Whether the suite sits on the header line (`def f(): return 1`).
    pub compact_body: bool,
    /// Offset where the first suite line begins; equals `header_span.end`
    /// for normal suites and `span.end` for compact ones.
    pub body_start: usize,
    /// Indentation of the first code line of the suite; empty for compact
    /// bodies.
    pub body_indent: String,
    pub body: Vec<Node>,
}

impl FunctionDef {
    /// Whether any inline annotation is already present.
    pub fn is_annotated(&self) -> bool {
        self.has_return_annotation
            || self.has_type_comment
            || self.params.iter().any(|p| p.annotated)
    }

    /// Value-taking parameters, markers excluded.
    pub fn value_params(&self) -> impl Iterator<Item = &Param> {
        self.params.iter().filter(|p| p.kind.takes_value())
    }

    /// Whether any parameter failed header parsing.
    pub fn has_opaque_params(&self) -> bool {
        self.params.iter().any(|p| p.kind == ParamKind::Opaque)
    }
}

/// A `class` definition; only its name and children matter here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDef {
    /// Decorators through end of body.
    pub span: Span,
    pub name: String,
    /// 1-based physical line of the `class` keyword.
    pub line: u32,
    /// The `class` logical line, decorators excluded.
    pub header_span: Span,
    pub body: Vec<Node>,
}

/// A parsed source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    /// Top-level nodes in source order.
    pub nodes: Vec<Node>,
    /// Total byte length of the source.
    pub len: usize,
}

impl Module {
    /// Reassemble the source text from node spans.
    ///
    /// For an unmodified tree this is byte-identical to the input.
    pub fn reconstruct(&self, source: &str) -> String {
        let mut out = String::with_capacity(self.len);
        for node in &self.nodes {
            out.push_str(node.span().slice(source));
        }
        out
    }

    /// Visit every function in source order, with the enclosing class
    /// names (outermost first).
    pub fn for_each_function<F>(&self, mut visit: F)
    where
        F: FnMut(&[String], &FunctionDef),
    {
        let mut classes = Vec::new();
        for node in &self.nodes {
            walk(node, &mut classes, &mut visit);
        }
    }
}

fn walk<F>(node: &Node, classes: &mut Vec<String>, visit: &mut F)
where
    F: FnMut(&[String], &FunctionDef),
{
    match node {
        Node::Function(def) => {
            visit(classes, def);
            // Nested defs are visited with their class context only;
            // enclosing function names do not qualify.
            for child in &def.body {
                walk(child, classes, visit);
            }
        }
        Node::Class(def) => {
            classes.push(def.name.clone());
            for child in &def.body {
                walk(child, classes, visit);
            }
            classes.pop();
        }
        Node::Statement(_) | Node::Trivia(_) => {}
    }
}

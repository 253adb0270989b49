//! Full-fidelity Python source trees.
//!
//! [`parse_module`] builds a tree in which every byte of the input belongs
//! to exactly one node, so the file can be reassembled unchanged and edits
//! reduce to pure insertions at known offsets. Only `def` and `class`
//! statements get structure; everything else is carried as opaque spans.
//! This is not a Python parser: it understands just enough (strings,
//! brackets, indentation, headers) to locate functions and their suites.

pub mod nodes;
pub mod scanner;

use thiserror::Error;

pub use nodes::{ClassDef, FunctionDef, Module, Node, Param, ParamKind};
pub use scanner::{scan_logical_lines, LineKind, LogicalLine, Significant};

use crate::patch::Span;

/// Errors from source scanning and header parsing. All are file-local.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unterminated string literal starting on line {line}")]
    UnterminatedString { line: u32 },

    #[error("unmatched '{bracket}' on line {line}")]
    UnmatchedBracket { bracket: char, line: u32 },

    #[error("malformed definition header on line {line}: {message}")]
    MalformedHeader { line: u32, message: String },
}

/// Parse a source file into a full-fidelity tree.
pub fn parse_module(source: &str) -> Result<Module, ParseError> {
    let lines = scan_logical_lines(source)?;
    let mut pos = 0;
    let mut nodes = Vec::new();
    // A file that dedents below its first line's indentation ends the
    // block early; keep going until every line is consumed.
    while pos < lines.len() {
        let mut chunk = parse_block(source, &lines, &mut pos, 0)?;
        if chunk.is_empty() {
            nodes.push(Node::Statement(lines[pos].span));
            pos += 1;
        } else {
            nodes.append(&mut chunk);
        }
    }
    Ok(Module {
        nodes,
        len: source.len(),
    })
}

/// Parse one suite: nodes at a common indentation, deeper lines included.
///
/// `min_indent` is the least indentation a line must have to belong to the
/// suite; the first code line fixes the suite's actual indentation.
fn parse_block(
    source: &str,
    lines: &[LogicalLine],
    pos: &mut usize,
    min_indent: usize,
) -> Result<Vec<Node>, ParseError> {
    let mut nodes: Vec<Node> = Vec::new();
    let mut block_indent: Option<usize> = None;

    while *pos < lines.len() {
        let line = lines[*pos];
        match line.kind {
            LineKind::Blank | LineKind::Comment => {
                // Trailing trivia belongs to whichever suite owns the next
                // code line.
                let required = block_indent.unwrap_or(min_indent);
                let next_code = lines[*pos..].iter().find(|l| l.kind == LineKind::Code);
                match next_code {
                    Some(code) if code.indent_len() >= required => {
                        nodes.push(Node::Trivia(line.span));
                        *pos += 1;
                    }
                    Some(_) => break,
                    None if min_indent == 0 => {
                        nodes.push(Node::Trivia(line.span));
                        *pos += 1;
                    }
                    None => break,
                }
            }
            LineKind::Code => {
                let indent = line.indent_len();
                if indent < min_indent {
                    break;
                }
                match block_indent {
                    Some(existing) if indent < existing => break,
                    Some(_) => {}
                    None => block_indent = Some(indent),
                }
                nodes.push(parse_statement(source, lines, pos)?);
            }
        }
    }
    Ok(nodes)
}

/// Parse one statement starting at the current code line: a decorated
/// definition, a bare definition, or an opaque span.
fn parse_statement(
    source: &str,
    lines: &[LogicalLine],
    pos: &mut usize,
) -> Result<Node, ParseError> {
    let line = lines[*pos];
    let content = line.content(source);

    if content.starts_with('@') {
        return parse_decorated(source, lines, pos);
    }
    if let Some(def_line) = definition_line(source, &line) {
        return parse_definition(source, lines, pos, def_line, Vec::new(), line.span.start);
    }
    *pos += 1;
    Ok(Node::Statement(line.span))
}

#[derive(Debug, Clone, Copy)]
enum DefKeyword {
    Def { is_async: bool },
    Class,
}

/// If the line opens a definition, say which kind.
fn definition_line(source: &str, line: &LogicalLine) -> Option<DefKeyword> {
    let content = line.content(source);
    if let Some(rest) = word_prefix(content, "async") {
        if word_prefix(rest.trim_start_matches([' ', '\t']), "def").is_some() {
            return Some(DefKeyword::Def { is_async: true });
        }
        return None;
    }
    if word_prefix(content, "def").is_some() {
        return Some(DefKeyword::Def { is_async: false });
    }
    if word_prefix(content, "class").is_some() {
        return Some(DefKeyword::Class);
    }
    None
}

/// Strip `word` from the front of `text` when followed by a non-name
/// character.
fn word_prefix<'a>(text: &'a str, word: &str) -> Option<&'a str> {
    let rest = text.strip_prefix(word)?;
    match rest.bytes().next() {
        Some(c) if c.is_ascii_alphanumeric() || c == b'_' => None,
        _ => Some(rest),
    }
}

/// Collect decorator lines, then parse the definition they decorate. A
/// decorator run not followed by a definition degrades to opaque
/// statements.
fn parse_decorated(
    source: &str,
    lines: &[LogicalLine],
    pos: &mut usize,
) -> Result<Node, ParseError> {
    let start = *pos;
    let mut decorators = Vec::new();
    let mut j = *pos;
    while j < lines.len() {
        let line = lines[j];
        match line.kind {
            LineKind::Blank | LineKind::Comment => j += 1,
            LineKind::Code if line.content(source).starts_with('@') => {
                decorators.push(line.span);
                j += 1;
            }
            LineKind::Code => break,
        }
    }

    let keyword = if j < lines.len() && lines[j].indent_len() == lines[start].indent_len() {
        definition_line(source, &lines[j])
    } else {
        None
    };
    let Some(keyword) = keyword else {
        *pos += 1;
        return Ok(Node::Statement(lines[start].span));
    };
    *pos = j;
    parse_definition(source, lines, pos, keyword, decorators, lines[start].span.start)
}

fn parse_definition(
    source: &str,
    lines: &[LogicalLine],
    pos: &mut usize,
    keyword: DefKeyword,
    decorators: Vec<Span>,
    node_start: usize,
) -> Result<Node, ParseError> {
    let header = lines[*pos];
    *pos += 1;

    match keyword {
        DefKeyword::Class => {
            let name = header_name(source, &header, "class")?;
            let body = parse_block(source, lines, pos, header.indent_len() + 1)?;
            let end = body.last().map_or(header.span.end, |n| n.span().end);
            Ok(Node::Class(Box::new(ClassDef {
                span: Span::new(node_start, end),
                name,
                line: header.line,
                header_span: header.span,
                body,
            })))
        }
        DefKeyword::Def { is_async } => {
            let mut def = parse_def_header(source, &header, is_async)?;
            def.decorators = decorators;

            if def.compact_body {
                def.span = Span::new(node_start, header.span.end);
                def.body_start = header.span.end;
                return Ok(Node::Function(Box::new(def)));
            }

            let body = parse_block(source, lines, pos, header.indent_len() + 1)?;
            let end = body.last().map_or(header.span.end, |n| n.span().end);
            def.span = Span::new(node_start, end);
            def.body_start = header.span.end;
            def.body_indent = body
                .iter()
                .find(|n| !matches!(n, Node::Trivia(_)))
                .map(|n| span_indent(source, n.span()))
                .unwrap_or_else(|| format!("{}    ", header.indent(source)));
            if !def.has_type_comment {
                def.has_type_comment = leading_type_comment(source, &body);
            }
            def.body = body;
            Ok(Node::Function(Box::new(def)))
        }
    }
}

/// Leading whitespace of the line a span starts on.
fn span_indent(source: &str, span: Span) -> String {
    source[span.start..]
        .chars()
        .take_while(|c| *c == ' ' || *c == '\t')
        .collect()
}

/// Whether the suite opens with a `# type:` comment line, before any code.
fn leading_type_comment(source: &str, body: &[Node]) -> bool {
    for node in body {
        match node {
            Node::Trivia(span) => {
                if span.slice(source).trim_start().starts_with("# type:") {
                    return true;
                }
            }
            _ => break,
        }
    }
    false
}

/// Extract the definition name following `keyword` on a header line.
fn header_name(
    source: &str,
    header: &LogicalLine,
    keyword: &str,
) -> Result<String, ParseError> {
    let content = header.content(source);
    let rest = match word_prefix(content, keyword) {
        Some(rest) => rest.trim_start_matches([' ', '\t']),
        None => {
            return Err(ParseError::MalformedHeader {
                line: header.line,
                message: format!("expected '{}'", keyword),
            })
        }
    };
    let name: String = rest
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    if name.is_empty() {
        return Err(ParseError::MalformedHeader {
            line: header.line,
            message: "missing name".to_string(),
        });
    }
    Ok(name)
}

/// Parse a `def` logical line into a [`FunctionDef`] with an empty body.
fn parse_def_header(
    source: &str,
    header: &LogicalLine,
    is_async: bool,
) -> Result<FunctionDef, ParseError> {
    let malformed = |message: &str| ParseError::MalformedHeader {
        line: header.line,
        message: message.to_string(),
    };

    let mut content = header.content(source);
    if is_async {
        content = word_prefix(content, "async")
            .map(|rest| rest.trim_start_matches([' ', '\t']))
            .ok_or_else(|| malformed("expected 'async'"))?;
    }
    let name = header_name(
        source,
        &LogicalLine {
            content_start: header.span.end - content.len(),
            ..*header
        },
        "def",
    )?;

    // Walk significant bytes to find the parameter list, the return
    // annotation arrow and the suite colon, ignoring anything quoted.
    let mut sig = Significant::new(
        source,
        Span::new(header.content_start, header.span.end),
    );
    let open_paren = sig
        .by_ref()
        .find(|(_, c)| *c == b'(')
        .map(|(at, _)| at)
        .ok_or_else(|| malformed("missing '('"))?;

    let mut depth = 1usize;
    let mut close_paren = None;
    for (at, c) in sig.by_ref() {
        match c {
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => {
                depth -= 1;
                if depth == 0 {
                    close_paren = Some(at);
                    break;
                }
            }
            _ => {}
        }
    }
    let close_paren = close_paren.ok_or_else(|| malformed("missing ')'"))?;

    let mut has_return_annotation = false;
    let mut colon = None;
    let mut prev = 0u8;
    for (at, c) in sig.by_ref() {
        match c {
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth -= 1,
            b'>' if depth == 0 && prev == b'-' => has_return_annotation = true,
            b':' if depth == 0 => {
                colon = Some(at);
                break;
            }
            _ => {}
        }
        prev = c;
    }
    let colon = colon.ok_or_else(|| malformed("missing ':'"))?;

    let compact_body = sig.any(|(_, c)| !matches!(c, b' ' | b'\t' | b'\n'));

    let params_span = Span::new(open_paren + 1, close_paren);
    let params = parse_params(source, params_span);
    let has_type_comment = contains_type_comment(source, header.span);

    Ok(FunctionDef {
        span: header.span,
        name,
        line: header.line,
        is_async,
        indent: header.indent(source).to_string(),
        decorators: Vec::new(),
        header_span: header.span,
        params_span,
        params,
        close_paren_offset: close_paren,
        colon_offset: colon,
        has_return_annotation,
        has_type_comment,
        compact_body,
        body_start: header.span.end,
        body_indent: String::new(),
        body: Vec::new(),
    })
}

/// Whether any comment inside the span reads `# type:` — a per-signature
/// comment trailing the header or per-argument comments in the list.
fn contains_type_comment(source: &str, span: Span) -> bool {
    let bytes = source.as_bytes();
    let mut i = span.start;
    while i < span.end {
        match bytes[i] {
            b'#' => {
                let end = memchr::memchr(b'\n', &bytes[i..span.end])
                    .map_or(span.end, |n| i + n);
                if source[i..end].starts_with("# type:") {
                    return true;
                }
                i = end;
            }
            b'\'' | b'"' => match scanner::skip_string(bytes, i) {
                Some((end, _)) => i = end,
                None => break,
            },
            _ => i += 1,
        }
    }
    false
}

/// Split the parameter list into [`Param`]s.
///
/// Forms the splitter does not model (py2 tuple parameters) come back as
/// [`ParamKind::Opaque`]; the planner then leaves the function's inline
/// annotation alone rather than guessing offsets.
fn parse_params(source: &str, params_span: Span) -> Vec<Param> {
    let mut segments: Vec<(usize, usize)> = Vec::new();
    let mut seg_start = params_span.start;
    let mut depth = 0usize;
    for (at, c) in Significant::new(source, params_span) {
        match c {
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth = depth.saturating_sub(1),
            b',' if depth == 0 => {
                segments.push((seg_start, at));
                seg_start = at + 1;
            }
            _ => {}
        }
    }
    segments.push((seg_start, params_span.end));

    let mut params = Vec::new();
    for (start, end) in segments {
        if let Some(param) = parse_param(source, Span::new(start, end)) {
            params.push(param);
        }
    }
    params
}

fn parse_param(source: &str, segment: Span) -> Option<Param> {
    let bytes = source.as_bytes();
    let mut i = segment.start;
    while i < segment.end && matches!(bytes[i], b' ' | b'\t' | b'\n' | b'\\') {
        i += 1;
    }
    if i >= segment.end {
        // Empty segment from a trailing comma.
        return None;
    }
    let first = i;

    let kind = match bytes[i] {
        b'(' => {
            return Some(Param {
                name: String::new(),
                name_end: segment.end,
                kind: ParamKind::Opaque,
                annotated: false,
                has_default: false,
                span: Span::new(first, segment.end),
            });
        }
        b'/' => {
            return Some(Param {
                name: String::new(),
                name_end: i + 1,
                kind: ParamKind::MarkerSlash,
                annotated: false,
                has_default: false,
                span: Span::new(first, segment.end),
            });
        }
        b'*' => {
            if bytes.get(i + 1) == Some(&b'*') {
                i += 2;
                ParamKind::StarStar
            } else {
                i += 1;
                ParamKind::Star
            }
        }
        _ => ParamKind::Normal,
    };
    while i < segment.end && matches!(bytes[i], b' ' | b'\t' | b'\n' | b'\\') {
        i += 1;
    }

    let name_start = i;
    while i < segment.end && is_name_byte(bytes[i]) {
        i += 1;
    }
    let name = source[name_start..i].to_string();
    if name.is_empty() {
        return Some(Param {
            name,
            name_end: name_start,
            kind: if kind == ParamKind::Star {
                ParamKind::MarkerStar
            } else {
                ParamKind::Opaque
            },
            annotated: false,
            has_default: false,
            span: Span::new(first, segment.end),
        });
    }
    let name_end = i;

    // The first of ':' or '=' at list depth decides: a colon is an
    // annotation, an equals means the colon (if any) belongs to a lambda
    // default.
    let mut annotated = false;
    let mut has_default = false;
    let mut depth = 0usize;
    for (_, c) in Significant::new(source, Span::new(name_end, segment.end)) {
        match c {
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth = depth.saturating_sub(1),
            b':' if depth == 0 && !has_default => annotated = true,
            b'=' if depth == 0 => has_default = true,
            _ => {}
        }
    }

    Some(Param {
        name,
        name_end,
        kind,
        annotated,
        has_default,
        span: Span::new(first, segment.end),
    })
}

fn is_name_byte(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_' || c >= 0x80
}

// ============================================================================
// Tests
// ============================================================================

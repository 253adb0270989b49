//! Parsing of observation records and type comment strings.
//!
//! Observation records are runtime-collected samples dumped as JSON. Each
//! record carries one or more type comment strings of the form
//! `(arg1, ..., argN) -> ret`; this module parses those strings into
//! [`TypeDescriptor`] values with an explicit tokenizer and recursive
//! descent parser. The parser and the descriptor pretty-printer are mutual
//! inverses: `parse_type_expr(d.render()) == d` for every descriptor the
//! merger can produce.
//!
//! Runtime class names that are not valid Python names (iterator internals,
//! bound methods, timezone classes with slashes) are rewritten to usable
//! types before parsing, following the fixup table of the original
//! collector ecosystem.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::error::WeldError;
use crate::types::{union_of, ArgKind, Argument, MergeOptions, TypeDescriptor};

// ============================================================================
// Observation records
// ============================================================================

/// One runtime-sampled record for a single function.
///
/// Immutable once read. Multiple records may share `path` + `line` +
/// `func_name`; the merger folds them into one signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationRecord {
    /// Source file path as recorded at trace time.
    pub path: String,
    /// 1-based line of the function definition at trace time.
    pub line: u32,
    /// Function name; methods are qualified as `Class.method`.
    pub func_name: String,
    /// One type comment string per observed call shape.
    pub type_comments: Vec<String>,
    /// Number of samples behind this record.
    pub samples: u64,
}

/// Deserialize observation records from a JSON file.
///
/// The file must hold a JSON list. Individual malformed records are
/// discarded with a warning; an unreadable file or a non-list document is
/// fatal for the run.
pub fn load_observations(path: &Path) -> Result<Vec<ObservationRecord>, WeldError> {
    let text = fs::read_to_string(path)
        .map_err(|e| WeldError::observation_file(path.display().to_string(), e))?;
    parse_observations(&text)
        .map_err(|message| WeldError::ObservationFile {
            path: path.display().to_string(),
            message,
        })
}

/// Deserialize observation records from JSON text.
///
/// Returns the valid records; malformed entries are logged and skipped.
pub fn parse_observations(text: &str) -> Result<Vec<ObservationRecord>, String> {
    let document: serde_json::Value =
        serde_json::from_str(text).map_err(|e| e.to_string())?;
    let items = match document {
        serde_json::Value::Array(items) => items,
        other => {
            return Err(format!(
                "expected a JSON list of records, got {}",
                json_kind(&other)
            ))
        }
    };

    let mut records = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        match validate_record(item) {
            Ok(record) => records.push(record),
            Err(message) => {
                warn!("{}", WeldError::malformed_observation(index, message));
            }
        }
    }
    Ok(records)
}

fn validate_record(item: serde_json::Value) -> Result<ObservationRecord, String> {
    let record: ObservationRecord =
        serde_json::from_value(item).map_err(|e| e.to_string())?;
    if record.line == 0 {
        return Err("`line` must be a positive 1-based line number".to_string());
    }
    if record.samples == 0 {
        return Err("`samples` must be positive".to_string());
    }
    if record.func_name.is_empty() {
        return Err("`func_name` must be non-empty".to_string());
    }
    Ok(record)
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a bool",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "a list",
        serde_json::Value::Object(_) => "an object",
    }
}

// ============================================================================
// Type comment grammar
// ============================================================================

/// Error raised on any type comment parse error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid type comment '{comment}': {message}")]
pub struct CommentParseError {
    /// The comment text that produced the error.
    pub comment: String,
    /// Description of the error.
    pub message: String,
}

/// Result type for type comment parsing.
pub type CommentParseResult<T> = Result<T, CommentParseError>;

/// Tokens of the type comment grammar.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    /// A (possibly dotted) identifier such as `List`, `int` or `pkg.mod.C`.
    Name(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Star,
    Arrow,
    Ellipsis,
    End,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Name(name) => format!("name '{}'", name),
            Token::LParen => "'('".to_string(),
            Token::RParen => "')'".to_string(),
            Token::LBracket => "'['".to_string(),
            Token::RBracket => "']'".to_string(),
            Token::Comma => "','".to_string(),
            Token::Star => "'*'".to_string(),
            Token::Arrow => "'->'".to_string(),
            Token::Ellipsis => "'...'".to_string(),
            Token::End => "end of comment".to_string(),
        }
    }
}

/// Runtime type names that are not valid Python names or are otherwise
/// unusable, and their replacements.
const TYPE_FIXUPS: &[(&str, &str)] = &[
    ("dictionary-keyiterator", "Iterator"),
    ("dictionary-valueiterator", "Iterator"),
    ("dictionary-itemiterator", "Iterator"),
    ("pyannotate_runtime.collect_types.UnknownType", "Any"),
    (
        "pyannotate_runtime.collect_types.NoReturnType",
        "mypy_extensions.NoReturn",
    ),
    ("function", "Callable"),
    ("functools.partial", "Callable"),
    ("long", "int"),
    ("unicode", "Text"),
    ("generator", "Iterator"),
    ("listiterator", "Iterator"),
    ("instancemethod", "Callable"),
    ("itertools.imap", "Iterator"),
    ("operator.methodcaller", "Callable"),
    ("method", "Callable"),
    ("method-wrapper", "Callable"),
    ("mappingproxy", "Mapping"),
    ("file", "IO[bytes]"),
    ("instance", "Any"),
    ("collections.defaultdict", "Dict"),
];

fn apply_fixups(name: String) -> String {
    for (from, to) in TYPE_FIXUPS {
        if name == *from {
            return (*to).to_string();
        }
    }
    // Timezone classes are named after the zone, with a slash.
    if name.starts_with("pytz.tzfile.") {
        return "datetime.tzinfo".to_string();
    }
    // Not a valid Python name; many places generate these, so substitute
    // Any rather than failing the whole comment.
    if name.contains('-') || name.contains('/') {
        return "Any".to_string();
    }
    name
}

fn is_name_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

/// Translate a type comment into a list of tokens.
fn tokenize(s: &str) -> CommentParseResult<Vec<Token>> {
    let bytes = s.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b' ' => i += 1,
            b'(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            b')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            b'[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            b']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            b',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            b'*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            b'-' if bytes.get(i + 1) == Some(&b'>') => {
                tokens.push(Token::Arrow);
                i += 2;
            }
            b'.' if bytes[i..].starts_with(b"...") => {
                tokens.push(Token::Ellipsis);
                i += 3;
            }
            c if is_name_char(c) || c == b'-' => {
                let (name, next) = scan_name(bytes, i);
                tokens.push(Token::Name(apply_fixups(name)));
                i = next;
            }
            c => {
                return Err(CommentParseError {
                    comment: s.to_string(),
                    message: format!("unexpected character '{}'", c as char),
                })
            }
        }
    }
    tokens.push(Token::End);
    Ok(tokens)
}

/// Scan a possibly dotted name starting at `start`. Spaces around dots are
/// tolerated (and dropped), matching the collector's output quirks.
fn scan_name(bytes: &[u8], start: usize) -> (String, usize) {
    let mut name = Vec::new();
    let mut i = start;
    loop {
        // One segment: word chars, '-' (runtime iterator names), '/'
        // (timezone names); '-' never consumes the '->' arrow.
        while i < bytes.len() {
            let c = bytes[i];
            let part_of_arrow = c == b'-' && bytes.get(i + 1) == Some(&b'>');
            if (is_name_char(c) || c == b'-' || c == b'/') && !part_of_arrow {
                name.push(c);
                i += 1;
            } else {
                break;
            }
        }
        // Dotted continuation, skipping spaces; '...' is never a dot.
        let mut j = i;
        while j < bytes.len() && bytes[j] == b' ' {
            j += 1;
        }
        if j < bytes.len() && bytes[j] == b'.' && !bytes[j..].starts_with(b"...") {
            name.push(b'.');
            i = j + 1;
            while i < bytes.len() && bytes[i] == b' ' {
                i += 1;
            }
        } else {
            break;
        }
    }
    (String::from_utf8_lossy(&name).into_owned(), i)
}

/// Parse a full type comment of the form `(arg1, ..., argN) -> ret`.
pub fn parse_type_comment(
    comment: &str,
) -> CommentParseResult<(Vec<Argument>, TypeDescriptor)> {
    Parser::new(comment)?.parse_signature()
}

/// Parse a single type expression, e.g. `Optional[List[int]]`.
pub fn parse_type_expr(text: &str) -> CommentParseResult<TypeDescriptor> {
    let mut parser = Parser::new(text)?;
    let descriptor = parser.parse_type()?;
    parser.expect(&Token::End)?;
    Ok(descriptor)
}

/// Recursive descent parser over the token list.
struct Parser<'a> {
    comment: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(comment: &'a str) -> CommentParseResult<Self> {
        Ok(Parser {
            comment,
            tokens: tokenize(comment)?,
            pos: 0,
        })
    }

    fn parse_signature(mut self) -> CommentParseResult<(Vec<Argument>, TypeDescriptor)> {
        self.expect(&Token::LParen)?;
        let mut args = Vec::new();
        let mut seen_star = false;
        let mut seen_star_star = false;
        while self.lookup() != &Token::RParen {
            if self.lookup() == &Token::Star {
                self.advance();
                let star_star = if self.lookup() == &Token::Star {
                    self.advance();
                    true
                } else {
                    false
                };
                if star_star {
                    if seen_star_star {
                        return Err(self.fail("duplicate '**' argument"));
                    }
                    seen_star_star = true;
                } else {
                    if seen_star || seen_star_star {
                        return Err(self.fail("'*' argument after another starred argument"));
                    }
                    seen_star = true;
                }
                let descriptor = self.parse_type()?;
                args.push(Argument {
                    descriptor,
                    kind: if star_star {
                        ArgKind::StarStar
                    } else {
                        ArgKind::Star
                    },
                });
            } else {
                if seen_star || seen_star_star {
                    return Err(self.fail("positional argument after a starred argument"));
                }
                args.push(Argument::positional(self.parse_type()?));
            }
            if self.lookup() == &Token::Comma {
                self.advance();
            } else if self.lookup() != &Token::RParen {
                return Err(self.fail("expected ',' or ')'"));
            }
        }
        self.expect(&Token::RParen)?;
        self.expect(&Token::Arrow)?;
        let ret = self.parse_type()?;
        self.expect(&Token::End)?;
        Ok((args, ret))
    }

    fn parse_type(&mut self) -> CommentParseResult<TypeDescriptor> {
        let token = self.next();
        let name = match token {
            Token::Name(name) => name,
            other => {
                let message = format!("expected a type, got {}", other.describe());
                return Err(self.fail(&message));
            }
        };
        match name.as_str() {
            "Any" => Ok(TypeDescriptor::Any),
            // Exception-only calls contribute no return evidence.
            "mypy_extensions.NoReturn" => Ok(TypeDescriptor::Unknown),
            "Tuple" if self.lookup() == &Token::LBracket => {
                self.advance();
                self.parse_tuple_body()
            }
            "Union" if self.lookup() == &Token::LBracket => {
                self.advance();
                let items = self.parse_type_list()?;
                self.expect(&Token::RBracket)?;
                if items.is_empty() {
                    return Err(self.fail("empty Union"));
                }
                Ok(union_of(items, &MergeOptions::default()))
            }
            "Optional" if self.lookup() == &Token::LBracket => {
                self.advance();
                let items = self.parse_type_list()?;
                self.expect(&Token::RBracket)?;
                if items.len() != 1 {
                    return Err(self.fail("Optional takes exactly one argument"));
                }
                let inner = items.into_iter().next().expect("one item");
                Ok(union_of(
                    vec![inner, TypeDescriptor::none()],
                    &MergeOptions::default(),
                ))
            }
            "List" | "Set" | "FrozenSet" if self.lookup() == &Token::LBracket => {
                self.advance();
                let items = self.parse_type_list()?;
                self.expect(&Token::RBracket)?;
                if items.len() != 1 {
                    let message = format!("{} takes exactly one argument", name);
                    return Err(self.fail(&message));
                }
                let element = Box::new(items.into_iter().next().expect("one item"));
                Ok(TypeDescriptor::Container(match name.as_str() {
                    "List" => crate::types::Container::List(element),
                    "Set" => crate::types::Container::Set(element),
                    _ => crate::types::Container::FrozenSet(element),
                }))
            }
            "Dict" if self.lookup() == &Token::LBracket => {
                self.advance();
                let mut items = self.parse_type_list()?;
                self.expect(&Token::RBracket)?;
                if items.len() != 2 {
                    return Err(self.fail("Dict takes exactly two arguments"));
                }
                let value = Box::new(items.pop().expect("two items"));
                let key = Box::new(items.pop().expect("two items"));
                Ok(TypeDescriptor::Container(crate::types::Container::Dict(
                    key, value,
                )))
            }
            _ if self.lookup() == &Token::LBracket => {
                self.advance();
                let args = self.parse_type_list()?;
                self.expect(&Token::RBracket)?;
                Ok(TypeDescriptor::Generic { name, args })
            }
            _ if name.contains('.') => Ok(TypeDescriptor::ForwardRef(name)),
            _ => Ok(TypeDescriptor::Primitive(name)),
        }
    }

    /// Body of `Tuple[...]` after the opening bracket: the empty-tuple
    /// special case `Tuple[()]`, the uniform form `Tuple[T, ...]`, or a
    /// fixed-arity element list.
    fn parse_tuple_body(&mut self) -> CommentParseResult<TypeDescriptor> {
        use crate::types::Container;

        if self.lookup() == &Token::LParen {
            self.advance();
            self.expect(&Token::RParen)?;
            self.expect(&Token::RBracket)?;
            return Ok(TypeDescriptor::Container(Container::Tuple(Vec::new())));
        }
        let first = self.parse_type()?;
        if self.lookup() == &Token::Comma {
            self.advance();
            if self.lookup() == &Token::Ellipsis {
                self.advance();
                self.expect(&Token::RBracket)?;
                return Ok(TypeDescriptor::Container(Container::UniformTuple(
                    Box::new(first),
                )));
            }
            let mut items = vec![first];
            loop {
                items.push(self.parse_type()?);
                if self.lookup() == &Token::Comma {
                    self.advance();
                } else {
                    break;
                }
            }
            self.expect(&Token::RBracket)?;
            Ok(TypeDescriptor::Container(Container::Tuple(items)))
        } else {
            self.expect(&Token::RBracket)?;
            Ok(TypeDescriptor::Container(Container::Tuple(vec![first])))
        }
    }

    /// A comma-separated type list ending at `)` or `]` (not consumed).
    fn parse_type_list(&mut self) -> CommentParseResult<Vec<TypeDescriptor>> {
        let mut items = Vec::new();
        while self.lookup() != &Token::RParen && self.lookup() != &Token::RBracket {
            items.push(self.parse_type()?);
            if self.lookup() == &Token::Comma {
                self.advance();
            } else if self.lookup() != &Token::RParen && self.lookup() != &Token::RBracket {
                return Err(self.fail("expected ',', ')' or ']'"));
            }
        }
        Ok(items)
    }

    fn lookup(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn next(&mut self) -> Token {
        let token = self.tokens[self.pos].clone();
        self.advance();
        token
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
    }

    fn expect(&mut self, token: &Token) -> CommentParseResult<()> {
        if self.lookup() == token {
            self.advance();
            Ok(())
        } else {
            let message = format!(
                "expected {}, got {}",
                token.describe(),
                self.lookup().describe()
            );
            Err(self.fail(&message))
        }
    }

    fn fail(&self, message: &str) -> CommentParseError {
        CommentParseError {
            comment: self.comment.to_string(),
            message: message.to_string(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

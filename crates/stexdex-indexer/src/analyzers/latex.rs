//! Minimal LaTeX tokenizing: comments, control words and macro arguments
//!
//! Argument specs follow the usual notation: `*` optional star, `[` optional bracket
//! argument, `{` mandatory brace argument.

use std::sync::LazyLock;

use regex::Regex;

/// `\\` pairs are consumed so the second backslash never starts a control word.
static CONTROL_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\(?:\\|([A-Za-z]+))").expect("control word pattern"));

static MACRO_TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\\[A-Za-z]+\*?").expect("macro token pattern"));

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct SyntaxError {
    pub offset: usize,
    pub message: String,
}

impl SyntaxError {
    fn new(offset: usize, message: impl Into<String>) -> Self {
        SyntaxError {
            offset,
            message: message.into(),
        }
    }
}

/// A macro with its parsed arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation<'t> {
    pub name: &'t str,
    /// Byte offset of the backslash.
    pub start: usize,
    /// Byte offset just past the last argument.
    pub end: usize,
    pub star: bool,
    /// One entry per `[` or `{` in the argument pattern; absent optional arguments are `None`.
    pub args: Vec<Option<&'t str>>,
}

impl<'t> Invocation<'t> {
    pub fn arg(&self, index: usize) -> Option<&'t str> {
        self.args.get(index).copied().flatten()
    }
}

/// Blank out `%` comments, keeping byte offsets and line breaks intact.
pub fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    let mut in_comment = false;
    while let Some(c) = chars.next() {
        if in_comment {
            if c == '\n' {
                in_comment = false;
                out.push('\n');
            } else {
                out.extend(std::iter::repeat_n(' ', c.len_utf8()));
            }
            continue;
        }
        match c {
            '\\' => {
                out.push(c);
                if let Some(escaped) = chars.next() {
                    out.push(escaped);
                }
            }
            '%' => {
                in_comment = true;
                out.push(' ');
            }
            _ => out.push(c),
        }
    }
    out
}

/// Control words in document order: `(offset of the backslash, name)`.
pub fn control_words(text: &str) -> impl Iterator<Item = (usize, &str)> {
    CONTROL_WORD.captures_iter(text).filter_map(|caps| {
        let name = caps.get(1)?;
        Some((name.start() - 1, name.as_str()))
    })
}

/// Parse the arguments of the macro `name` found at `start`.
///
/// Returns `Ok(None)` when a mandatory argument is missing, which is how sTeX macros
/// used without arguments read.
pub fn parse_invocation<'t>(
    text: &'t str,
    start: usize,
    name: &'t str,
    spec: &str,
) -> Result<Option<Invocation<'t>>, SyntaxError> {
    parse_from(text, start, name, start + 1 + name.len(), spec)
}

/// Like [`parse_invocation`], reading the arguments from `pos` on. Used for environments,
/// whose arguments follow `\begin{name}`.
pub fn parse_from<'t>(
    text: &'t str,
    start: usize,
    name: &'t str,
    mut pos: usize,
    spec: &str,
) -> Result<Option<Invocation<'t>>, SyntaxError> {
    let mut star = false;
    let mut args = Vec::new();

    for kind in spec.chars() {
        match kind {
            '*' => {
                if text[pos..].starts_with('*') {
                    star = true;
                    pos += 1;
                }
            }
            '[' => {
                let next = skip_whitespace(text, pos);
                if text[next..].starts_with('[') {
                    let (inner, after) = read_group(text, next, '[', ']')?;
                    args.push(Some(inner));
                    pos = after;
                } else {
                    args.push(None);
                }
            }
            '{' => {
                let next = skip_whitespace(text, pos);
                if !text[next..].starts_with('{') {
                    return Ok(None);
                }
                let (inner, after) = read_group(text, next, '{', '}')?;
                args.push(Some(inner));
                pos = after;
            }
            _ => {}
        }
    }

    Ok(Some(Invocation {
        name,
        start,
        end: pos,
        star,
        args,
    }))
}

fn skip_whitespace(text: &str, pos: usize) -> usize {
    let rest = &text[pos..];
    pos + (rest.len() - rest.trim_start().len())
}

/// Content of the group opening at `open_at` and the offset after its closing delimiter.
/// Braces nest inside either kind of group; escaped delimiters do not count.
fn read_group(text: &str, open_at: usize, open: char, close: char) -> Result<(&str, usize), SyntaxError> {
    let body = open_at + open.len_utf8();
    let mut brace_depth = 0usize;
    let mut chars = text[body..].char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => {
                chars.next();
            }
            '{' if open != '{' => brace_depth += 1,
            '}' if open != '{' && brace_depth > 0 => brace_depth -= 1,
            c if c == open && open == '{' => brace_depth += 1,
            c if c == close && brace_depth == 0 => {
                let end = body + i;
                return Ok((&text[body..end], end + close.len_utf8()));
            }
            c if c == close && open == '{' => brace_depth -= 1,
            _ => {}
        }
    }
    Err(SyntaxError::new(open_at, format!("unterminated '{open}' argument")))
}

/// `key=value` pairs of an option list; bare keys get an empty value.
pub fn key_values(options: &str) -> Vec<(&str, &str)> {
    options
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once('=') {
            Some((key, value)) => (key.trim(), value.trim().trim_matches(|c| c == '{' || c == '}')),
            None => (entry, ""),
        })
        .collect()
}

/// Plain words of a LaTeX fragment: macro names and braces removed, whitespace collapsed.
pub fn plain_text(fragment: &str) -> String {
    let without_macros = MACRO_TOKEN.replace_all(fragment, " ");
    without_macros
        .replace(['{', '}', '~'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

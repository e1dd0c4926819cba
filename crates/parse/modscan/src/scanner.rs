//! Direct module references of a single source file.
//!
//! The scanner walks the file line by line with one line of lookback,
//! modelled as a two-state machine: either no override is pending, or the
//! previous non-blank line was a `#[path = "..."]` directive that applies to
//! the next `mod` declaration. Attribute-only lines and `//` comments between
//! the directive and the declaration keep the override pending.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ScanError;
use crate::path::normalize;

/// Lookback state carried between lines.
#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    /// No `#[path]` directive is pending.
    AwaitingDirective,
    /// A `#[path]` directive naming this path precedes the current line.
    PathOverride(String),
}

/// How one trimmed line participates in module discovery.
#[derive(Debug, PartialEq, Eq)]
enum Line<'a> {
    /// Only outer attributes, one of which is `#[path = "..."]`.
    PathDirective(&'a str),
    /// Only outer attributes, none of them a path override.
    Attribute,
    /// An out-of-line `mod` declaration and its inline override, if any.
    ModDecl { name: &'a str, path: Option<&'a str> },
    /// Anything else.
    Other,
}

/// Read `path` and return the files it references through `mod` declarations.
///
/// Results are in first-occurrence order with duplicates collapsed.
pub fn scan(path: &Path) -> Result<Vec<PathBuf>, ScanError> {
    let text = fs::read_to_string(path).map_err(|source| ScanError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    scan_source(path, &text)
}

/// Scan already-loaded source text as if it were the contents of `path`.
///
/// `path` anchors relative lookups: implicit modules resolve to a sibling
/// `M.<ext>` or a nested `M/mod.<ext>` next to it, and overrides are taken
/// relative to its directory.
pub fn scan_source(path: &Path, text: &str) -> Result<Vec<PathBuf>, ScanError> {
    let dir = path.parent().unwrap_or_else(|| Path::new(""));
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("rs");

    let mut seen = HashSet::new();
    let mut refs = Vec::new();
    let mut state = State::AwaitingDirective;

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with("//") {
            continue;
        }

        state = match (classify(line), state) {
            (Line::PathDirective(p), _) => State::PathOverride(p.to_owned()),
            (Line::Attribute, pending) => pending,
            (Line::ModDecl { name, path: inline }, pending) => {
                let target = match (inline, pending) {
                    (Some(p), _) => dir.join(p),
                    (None, State::PathOverride(p)) => dir.join(p),
                    (None, State::AwaitingDirective) => resolve_implicit(path, dir, name, ext)?,
                };
                let target = normalize(&target);
                if seen.insert(target.clone()) {
                    refs.push(target);
                }
                State::AwaitingDirective
            }
            (Line::Other, _) => State::AwaitingDirective,
        };
    }

    Ok(refs)
}

/// Map a module name to `dir/M.<ext>`, falling back to `dir/M/mod.<ext>`.
fn resolve_implicit(from: &Path, dir: &Path, module: &str, ext: &str) -> Result<PathBuf, ScanError> {
    let sibling = dir.join(format!("{module}.{ext}"));
    if sibling.is_file() {
        return Ok(sibling);
    }
    let nested = dir.join(module).join(format!("mod.{ext}"));
    if nested.is_file() {
        return Ok(nested);
    }
    Err(ScanError::UnresolvedModule {
        module: module.to_owned(),
        from: from.to_path_buf(),
        tried: [sibling, nested],
    })
}

fn classify(line: &str) -> Line<'_> {
    let mut rest = line;
    let mut path = None;
    let mut saw_attribute = false;

    while let Some(after) = rest.strip_prefix("#[") {
        let Some(end) = attribute_end(after) else {
            return Line::Other;
        };
        if let Some(p) = path_override(&after[..end]) {
            path = Some(p);
        }
        saw_attribute = true;
        rest = after[end + 1..].trim_start();
    }

    if saw_attribute && (rest.is_empty() || rest.starts_with("//")) {
        return match path {
            Some(p) => Line::PathDirective(p),
            None => Line::Attribute,
        };
    }

    match module_name(rest) {
        Some(name) => Line::ModDecl { name, path },
        None => Line::Other,
    }
}

/// Byte offset of the `]` closing an attribute body.
///
/// Nested brackets and string literals inside the body are skipped.
fn attribute_end(body: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in body.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '[' => depth += 1,
            ']' if depth == 0 => return Some(i),
            ']' => depth -= 1,
            _ => {}
        }
    }
    None
}

/// Extract `P` from an attribute body `path = "P"`.
fn path_override(body: &str) -> Option<&str> {
    let value = body
        .trim()
        .strip_prefix("path")?
        .trim_start()
        .strip_prefix('=')?
        .trim();
    let inner = value.strip_prefix('"')?.strip_suffix('"')?;
    (!inner.is_empty() && !inner.contains('"')).then_some(inner)
}

/// Name of an out-of-line module declaration: `[pub[(..)]] mod NAME;`.
fn module_name(decl: &str) -> Option<&str> {
    let mut rest = decl;
    if let Some(after) = rest.strip_prefix("pub") {
        let trimmed = after.trim_start();
        if let Some(restricted) = trimmed.strip_prefix('(') {
            let close = restricted.find(')')?;
            rest = restricted[close + 1..].trim_start();
        } else if after.starts_with(char::is_whitespace) {
            rest = trimmed;
        } else {
            return None;
        }
    }

    let after_kw = rest.strip_prefix("mod")?;
    if !after_kw.starts_with(char::is_whitespace) {
        return None;
    }
    let after_kw = after_kw.trim_start();
    let end = after_kw
        .find(|c: char| !(c.is_alphanumeric() || c == '_'))
        .unwrap_or(after_kw.len());
    let name = &after_kw[..end];
    if name.is_empty() {
        return None;
    }
    after_kw[end..].trim_start().starts_with(';').then_some(name)
}

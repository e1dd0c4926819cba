//! `#![crate_id = "name#version"]` header parsing.

use std::fmt;
use std::fs;
use std::path::Path;

use crate::error::ScanError;

/// Version assumed when a header omits one, or the header is absent.
pub const DEFAULT_VERSION: &str = "0.0";

/// Name and version a crate declares for itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CrateId {
    /// Crate name: ASCII letters, digits and `_`.
    pub name: String,
    /// Version string: ASCII letters, digits, `_`, `.` and `-`.
    pub version: String,
}

impl fmt::Display for CrateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.version)
    }
}

/// Parse the first `#![crate_id = "..."]` header in `text`.
pub fn parse_crate_id(text: &str) -> Option<CrateId> {
    text.lines().find_map(parse_line)
}

/// Identity for `path`: its header if present, else the file stem at
/// [`DEFAULT_VERSION`].
pub fn crate_id_for(path: &Path, text: &str) -> CrateId {
    parse_crate_id(text).unwrap_or_else(|| CrateId {
        name: path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default(),
        version: DEFAULT_VERSION.to_owned(),
    })
}

/// Read `path` and derive its crate identity.
pub fn read_crate_id(path: &Path) -> Result<CrateId, ScanError> {
    let text = fs::read_to_string(path).map_err(|source| ScanError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(crate_id_for(path, &text))
}

fn parse_line(line: &str) -> Option<CrateId> {
    let start = line.find("#![crate_id")?;
    let rest = &line[start + "#![crate_id".len()..];
    let rest = &rest[rest.find('=')? + 1..];
    let rest = &rest[rest.find('"')? + 1..];

    let name_len = rest
        .find(|c: char| !is_name_char(c))
        .unwrap_or(rest.len());
    if name_len == 0 {
        return None;
    }
    let name = &rest[..name_len];
    let mut rest = &rest[name_len..];

    let mut version = DEFAULT_VERSION;
    if let Some(after) = rest.strip_prefix('#') {
        let len = after
            .find(|c: char| !(is_name_char(c) || c == '.' || c == '-'))
            .unwrap_or(after.len());
        if len == 0 {
            return None;
        }
        version = &after[..len];
        rest = &after[len..];
    }

    rest.strip_prefix('"')?.trim_start().starts_with(']').then(|| CrateId {
        name: name.to_owned(),
        version: version.to_owned(),
    })
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

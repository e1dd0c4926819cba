//! Content-derived library artifact names.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anvil_modscan::{CrateId, read_crate_id};
use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

/// Memoized crate root → archive name mapping for one invocation.
#[derive(Debug, Default)]
pub struct CrateIdentityCache {
    keys: HashMap<PathBuf, String>,
}

impl CrateIdentityCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Archive name for the crate rooted at `path`, e.g.
    /// `libzinc-3a7bd3e2-0.1.rlib`.
    ///
    /// The file is read on first request only.
    pub fn identity_for(&mut self, path: &Path) -> Result<String> {
        if let Some(key) = self.keys.get(path) {
            return Ok(key.clone());
        }
        let id = read_crate_id(path)
            .with_context(|| format!("failed to read crate identity of {}", path.display()))?;
        let key = cache_key(&id);
        self.keys.insert(path.to_path_buf(), key.clone());
        Ok(key)
    }

    /// Number of memoized entries.
    pub fn len(&self) -> usize {
        self.keys.len()
    }
}

/// `lib<name>-<hash8>-<version>.rlib`, where `hash8` is the first eight hex
/// digits of the SHA-256 of `<name>-<version>`.
pub fn cache_key(id: &CrateId) -> String {
    let digest = Sha256::digest(format!("{}-{}", id.name, id.version).as_bytes());
    let hex = format!("{digest:x}");
    format!("lib{}-{}-{}.rlib", id.name, &hex[..8], id.version)
}

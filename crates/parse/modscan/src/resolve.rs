//! Transitive closure over module references.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::error::ScanError;
use crate::path::normalize;
use crate::scanner::scan;

/// Files a compilation unit depends on, in stable path order.
pub type DependencySet = BTreeSet<PathBuf>;

/// Follows `mod` references from a root file, memoizing per-file scans.
///
/// One resolver can serve many roots: a file shared between compilation
/// units is read once.
#[derive(Debug, Default)]
pub struct DependencyResolver {
    scanned: HashMap<PathBuf, Vec<PathBuf>>,
}

impl DependencyResolver {
    /// Create an empty resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct references of `file`, scanning it on first use.
    pub fn direct(&mut self, file: &Path) -> Result<&[PathBuf], ScanError> {
        if !self.scanned.contains_key(file) {
            let refs = scan(file)?;
            self.scanned.insert(file.to_path_buf(), refs);
        }
        Ok(&self.scanned[file])
    }

    /// Every file reachable from `root` through module references.
    ///
    /// The root itself is a member only when some reachable file references
    /// it back. Cycles terminate because each file is expanded once.
    pub fn resolve_transitive(&mut self, root: &Path) -> Result<DependencySet, ScanError> {
        let root = normalize(root);
        let mut deps = DependencySet::new();
        let mut visited = HashSet::from([root.clone()]);
        let mut work = vec![root];

        while let Some(file) = work.pop() {
            let refs = self.direct(&file)?.to_vec();
            for dep in refs {
                if !dep.is_file() {
                    return Err(ScanError::MissingInclude { path: dep, from: file });
                }
                deps.insert(dep.clone());
                if visited.insert(dep.clone()) {
                    work.push(dep);
                }
            }
        }

        Ok(deps)
    }

    /// Number of files scanned so far.
    pub fn scanned_files(&self) -> usize {
        self.scanned.len()
    }
}

/// Resolve `root` with a throwaway resolver.
pub fn resolve_transitive(root: &Path) -> Result<DependencySet, ScanError> {
    DependencyResolver::new().resolve_transitive(root)
}

//! Command manifest and timestamp helpers for staleness checks.
//!
//! Timestamps alone miss a class of changes: a new flag, a different
//! optimization level or another linker script leave every input untouched.
//! The manifest records, per output, the fingerprint of the command that
//! last produced it, so a node whose command changed is rebuilt.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Current schema version. Bump when the manifest format changes.
const MANIFEST_VERSION: u32 = 1;

/// Output path → fingerprint of the command that produced it.
#[derive(Debug, Serialize, Deserialize)]
pub struct CommandManifest {
    /// Schema version for forward compatibility.
    pub version: u32,
    /// Recorded command fingerprints, keyed by output path.
    pub commands: BTreeMap<PathBuf, String>,
}

impl Default for CommandManifest {
    fn default() -> Self {
        Self {
            version: MANIFEST_VERSION,
            commands: BTreeMap::new(),
        }
    }
}

impl CommandManifest {
    /// Load the manifest at `path`.
    ///
    /// A missing, corrupt or differently-versioned file yields an empty
    /// manifest.
    pub fn load(path: &Path) -> Self {
        let Ok(data) = fs::read_to_string(path) else {
            return Self::default();
        };
        match serde_json::from_str::<Self>(&data) {
            Ok(manifest) if manifest.version == MANIFEST_VERSION => manifest,
            _ => Self::default(),
        }
    }

    /// Save the manifest atomically (write to tmp, then rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        let mut tmp_path = path.as_os_str().to_owned();
        tmp_path.push(".tmp");
        let tmp_path = PathBuf::from(tmp_path);

        let json =
            serde_json::to_string_pretty(self).context("failed to serialize command manifest")?;
        fs::write(&tmp_path, json).context("failed to write temporary command manifest")?;
        fs::rename(&tmp_path, path).context("failed to atomically replace command manifest")?;
        Ok(())
    }

    /// Returns `true` if a command other than `fingerprint` last produced
    /// `output`. Outputs with no record are never reported as changed.
    pub fn changed(&self, output: &Path, fingerprint: &str) -> bool {
        self.commands
            .get(output)
            .is_some_and(|recorded| recorded != fingerprint)
    }

    /// Record the command that just produced `output`.
    pub fn record(&mut self, output: &Path, fingerprint: String) {
        self.commands.insert(output.to_path_buf(), fingerprint);
    }
}

/// Modification time of `path`, or `None` if it does not exist.
pub fn file_mtime(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

//! Fixed directory layout of a firmware project.

use std::path::{Path, PathBuf};

/// Build outputs directory, relative to the project root.
const BUILD_DIR: &str = "build";
/// Marker recording the platform the build directory was produced for.
const PLATFORM_MARKER: &str = ".platform";
/// Marker recording the last-built application.
const APP_MARKER: &str = ".app";
/// Command manifest file name.
const MANIFEST_FILE: &str = ".anvil-manifest.json";

/// Paths derived from the project root.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    /// Layout rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The project root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `src/`
    pub fn source_dir(&self) -> PathBuf {
        self.root.join("src")
    }

    /// `build/`
    pub fn build_dir(&self) -> PathBuf {
        self.root.join(BUILD_DIR)
    }

    /// `build/intermediate/`
    pub fn intermediate_dir(&self) -> PathBuf {
        self.build_dir().join("intermediate")
    }

    /// Hardware abstraction sources of one platform: `src/hal/<platform>/`.
    pub fn platform_dir(&self, platform: &str) -> PathBuf {
        self.source_dir().join("hal").join(platform)
    }

    /// `apps/`
    pub fn apps_dir(&self) -> PathBuf {
        self.root.join("apps")
    }

    /// Source of application `app`: `apps/<app>.rs`.
    pub fn app_source(&self, app: &str) -> PathBuf {
        self.apps_dir().join(format!("{app}.rs"))
    }

    /// `build/.platform`
    pub fn platform_marker(&self) -> PathBuf {
        self.build_dir().join(PLATFORM_MARKER)
    }

    /// `build/.app`
    pub fn app_marker(&self) -> PathBuf {
        self.build_dir().join(APP_MARKER)
    }

    /// `build/.anvil-manifest.json`
    pub fn manifest_path(&self) -> PathBuf {
        self.build_dir().join(MANIFEST_FILE)
    }

    /// Resolve a script-supplied path: absolute paths are kept, relative
    /// ones are taken from the project root.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        anvil_modscan::normalize(&self.root.join(path))
    }

    /// `path` relative to the root when it lies inside it, for display.
    pub fn display<'a>(&self, path: &'a Path) -> std::path::Display<'a> {
        path.strip_prefix(&self.root).unwrap_or(path).display()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_paths() {
        let layout = Layout::new("/p");
        assert_eq!(layout.intermediate_dir(), PathBuf::from("/p/build/intermediate"));
        assert_eq!(layout.platform_dir("lpc17xx"), PathBuf::from("/p/src/hal/lpc17xx"));
        assert_eq!(layout.app_source("blink"), PathBuf::from("/p/apps/blink.rs"));
        assert_eq!(layout.app_marker(), PathBuf::from("/p/build/.app"));
    }

    #[test]
    fn resolve_and_display() {
        let layout = Layout::new("/p");
        assert_eq!(layout.resolve("src/./main.rs"), PathBuf::from("/p/src/main.rs"));
        assert_eq!(layout.resolve("/opt/link.ld"), PathBuf::from("/opt/link.ld"));
        assert_eq!(layout.display(Path::new("/p/build/app.o")).to_string(), "build/app.o");
        assert_eq!(layout.display(Path::new("/tmp/x")).to_string(), "/tmp/x");
    }
}

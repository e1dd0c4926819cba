//! Project configuration, platform selection and flag computation.
//!
//! Parses `anvil.toml` from the project root, validates the requested
//! platform and application against it, and derives the per-platform flag
//! sets handed to every compile and link step.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::BuildError;
use crate::layout::Layout;
use crate::verbose::vprintln;

/// Configuration file looked up in the project root.
pub const CONFIG_FILE: &str = "anvil.toml";

/// Top-level configuration loaded from `anvil.toml`.
#[derive(Debug, Default, Deserialize)]
pub struct ProjectConfig {
    /// `[toolchain]`
    #[serde(default)]
    pub toolchain: Toolchain,
    /// `[flags]`
    #[serde(default)]
    pub flags: BaseFlags,
    /// `[arch.<name>]`
    #[serde(default)]
    pub arch: BTreeMap<String, ArchConfig>,
    /// `[platforms.<name>]`
    #[serde(default)]
    pub platforms: BTreeMap<String, PlatformConfig>,
    /// `[build]`
    #[serde(default)]
    pub build: BuildSection,
}

/// `[toolchain]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct Toolchain {
    /// Cross toolchain prefix, e.g. `arm-none-eabi`.
    pub prefix: Option<String>,
    /// Rust compiler binary.
    #[serde(default = "default_rustc")]
    pub rustc: String,
    /// Root of the toolchain's per-architecture support libraries.
    pub libs: Option<PathBuf>,
    /// Build for the host: no target triple, cpu or thumb flags.
    #[serde(default)]
    pub native: bool,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            prefix: None,
            rustc: default_rustc(),
            libs: None,
            native: false,
        }
    }
}

impl Toolchain {
    /// Binary name of a binutils/gcc tool, e.g. `arm-none-eabi-ld`.
    pub fn tool(&self, name: &str) -> String {
        match &self.prefix {
            Some(prefix) if !prefix.is_empty() => format!("{prefix}-{name}"),
            _ => name.to_owned(),
        }
    }
}

fn default_rustc() -> String {
    "rustc".into()
}

/// `[flags]` section: flags shared by every platform.
#[derive(Debug, Default, Deserialize)]
pub struct BaseFlags {
    /// Base Rust compiler flags.
    #[serde(default)]
    pub rustc: Vec<String>,
    /// Base linker flags.
    #[serde(default)]
    pub linker: Vec<String>,
    /// Features enabled on every platform, passed as `--cfg cfg_<name>`.
    #[serde(default)]
    pub features: Vec<String>,
}

/// `[arch.<name>]` entry.
#[derive(Debug, Deserialize)]
pub struct ArchConfig {
    /// Compiler target triple.
    pub target: String,
    /// CPU name for `-Ctarget-cpu` and `-mcpu`.
    pub cpu: String,
    /// Subdirectory of the toolchain libs holding this architecture's
    /// libraries (default: the architecture name).
    #[serde(default, rename = "lib-dir")]
    pub lib_dir: Option<String>,
}

/// `[platforms.<name>]` entry.
#[derive(Debug, Deserialize)]
pub struct PlatformConfig {
    /// Architecture key into `[arch]`.
    pub arch: String,
    /// Configuration name passed as `--cfg <config>`.
    pub config: String,
    /// Platform-specific features.
    #[serde(default)]
    pub features: Vec<String>,
}

/// `[build]` section.
#[derive(Debug, Deserialize)]
pub struct BuildSection {
    /// Build script, relative to the project root.
    #[serde(default = "default_script")]
    pub script: PathBuf,
}

impl Default for BuildSection {
    fn default() -> Self {
        Self {
            script: default_script(),
        }
    }
}

fn default_script() -> PathBuf {
    PathBuf::from("anvil.rhai")
}

/// Locate the project root: `start` or its nearest ancestor with `anvil.toml`.
pub fn find_project_root(start: &Path) -> Result<PathBuf> {
    let mut dir = start.to_path_buf();
    loop {
        if dir.join(CONFIG_FILE).is_file() {
            return Ok(dir);
        }
        if !dir.pop() {
            return Err(BuildError::NoProjectRoot(start.to_path_buf()).into());
        }
    }
}

/// Read and parse `anvil.toml` from `root`.
pub fn load(root: &Path) -> Result<ProjectConfig> {
    let path = root.join(CONFIG_FILE);
    let contents = fs::read_to_string(&path).map_err(|e| BuildError::InvalidConfig {
        path: path.clone(),
        message: e.to_string(),
    })?;
    parse(&path, &contents)
}

fn parse(path: &Path, contents: &str) -> Result<ProjectConfig> {
    let config: ProjectConfig = toml::from_str(contents).map_err(|e| BuildError::InvalidConfig {
        path: path.to_path_buf(),
        message: e.message().to_owned(),
    })?;
    Ok(config)
}

/// Validated platform and application choice for one invocation.
#[derive(Debug, Clone)]
pub struct Selection {
    /// Platform key into `[platforms]`.
    pub platform: String,
    /// Architecture key of that platform.
    pub arch: String,
    /// Application name, i.e. the stem of `apps/<app>.rs`.
    pub app: String,
    /// Debug build: no optimization.
    pub debug: bool,
}

/// Validate the requested platform and application.
///
/// Errors name every valid choice so the user can correct the selection.
pub fn select(
    config: &ProjectConfig,
    layout: &Layout,
    platform: Option<&str>,
    app: Option<&str>,
    debug: bool,
) -> Result<Selection> {
    let platforms: Vec<String> = config.platforms.keys().cloned().collect();
    let Some(platform) = platform.filter(|p| !p.is_empty()) else {
        return Err(BuildError::NoPlatform { available: platforms }.into());
    };
    let Some(platform_cfg) = config.platforms.get(platform) else {
        return Err(BuildError::UnknownPlatform {
            name: platform.to_owned(),
            available: platforms,
        }
        .into());
    };
    if !config.arch.contains_key(&platform_cfg.arch) {
        return Err(BuildError::UnknownArch {
            arch: platform_cfg.arch.clone(),
            platform: platform.to_owned(),
            available: config.arch.keys().cloned().collect(),
        }
        .into());
    }

    let Some(app) = app.filter(|a| !a.is_empty()) else {
        return Err(BuildError::NoApplication {
            available: available_apps(layout)?,
        }
        .into());
    };
    let app_source = layout.app_source(app);
    if !app_source.is_file() {
        return Err(BuildError::ApplicationNotFound {
            name: app.to_owned(),
            path: app_source,
        }
        .into());
    }

    Ok(Selection {
        platform: platform.to_owned(),
        arch: platform_cfg.arch.clone(),
        app: app.to_owned(),
        debug,
    })
}

/// Applications under `apps/`, sorted.
pub fn available_apps(layout: &Layout) -> Result<Vec<String>> {
    let dir = layout.apps_dir();
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut apps = Vec::new();
    for entry in fs::read_dir(&dir).with_context(|| format!("failed to list {}", dir.display()))? {
        let path = entry?.path();
        if path.extension().is_some_and(|e| e == "rs") {
            if let Some(stem) = path.file_stem() {
                apps.push(stem.to_string_lossy().into_owned());
            }
        }
    }
    apps.sort();
    Ok(apps)
}

/// Flag sets shared by every step of one build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Flags {
    /// Rust compiler flags, excluding the optimization level.
    pub rustc: Vec<String>,
    /// Global optimization level; a rule's `optimize` option replaces it.
    pub opt_level: String,
    /// Linker flags.
    pub linker: Vec<String>,
    /// C compiler flags.
    pub cc: Vec<String>,
}

/// Derive the flag sets for a validated selection.
pub fn compute_flags(config: &ProjectConfig, selection: &Selection) -> Result<Flags> {
    let platform = config
        .platforms
        .get(&selection.platform)
        .with_context(|| format!("platform {} vanished after selection", selection.platform))?;
    let arch = config
        .arch
        .get(&selection.arch)
        .with_context(|| format!("arch {} vanished after selection", selection.arch))?;
    let native = config.toolchain.native;

    let mut rustc = config.flags.rustc.clone();
    if !native {
        rustc.push("--target".into());
        rustc.push(arch.target.clone());
        rustc.push(format!("-Ctarget-cpu={}", arch.cpu));
    }
    rustc.push("--cfg".into());
    rustc.push(platform.config.clone());
    rustc.push("--cfg".into());
    rustc.push(format!("arch_{}", selection.arch));
    for feature in config.flags.features.iter().chain(&platform.features) {
        rustc.push("--cfg".into());
        rustc.push(format!("cfg_{feature}"));
    }

    let mut linker = config.flags.linker.clone();
    if let Some(libs) = &config.toolchain.libs {
        let lib_dir = arch.lib_dir.as_deref().unwrap_or(&selection.arch);
        linker.push(format!("-L{}", libs.join(lib_dir).display()));
    }

    let cc = if native {
        Vec::new()
    } else {
        vec!["-mthumb".into(), format!("-mcpu={}", arch.cpu)]
    };

    Ok(Flags {
        rustc,
        opt_level: if selection.debug { "0" } else { "2" }.into(),
        linker,
        cc,
    })
}

/// Make the build directory ready for `platform`.
///
/// A build directory produced for another platform is removed first. The
/// intermediate directory is created and the platform marker rewritten.
/// Returns `true` when a stale build directory was purged.
pub fn prepare_build_dir(layout: &Layout, platform: &str) -> Result<bool> {
    let build_dir = layout.build_dir();
    let marker = layout.platform_marker();

    let previous = fs::read_to_string(&marker).ok();
    let purged = match previous.as_deref().map(str::trim) {
        Some(prev) if prev != platform => {
            vprintln!("  platform changed ({prev} -> {platform}), purging {}", build_dir.display());
            fs::remove_dir_all(&build_dir)
                .with_context(|| format!("failed to purge {}", build_dir.display()))?;
            true
        }
        _ => false,
    };

    let intermediate = layout.intermediate_dir();
    fs::create_dir_all(&intermediate)
        .with_context(|| format!("failed to create {}", intermediate.display()))?;
    fs::write(&marker, platform)
        .with_context(|| format!("failed to write {}", marker.display()))?;
    Ok(purged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const SAMPLE: &str = r#"
[toolchain]
prefix = "arm-none-eabi"
libs = "/opt/arm/lib/gcc/arm-none-eabi/4.8"

[flags]
rustc = ["-g"]
features = ["tft_lcd"]

[arch.cortex_m3]
target = "thumbv7m-none-eabi"
cpu = "cortex-m3"
lib-dir = "thumb/v7-m"

[platforms.lpc17xx]
arch = "cortex_m3"
config = "mcu_lpc17xx"
features = ["mcu_has_spi"]

[platforms.broken]
arch = "cortex_m9"
config = "mcu_broken"
"#;

    fn sample() -> ProjectConfig {
        parse(Path::new("anvil.toml"), SAMPLE).unwrap()
    }

    fn project_with_app(app: &str) -> tempfile::TempDir {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("apps")).unwrap();
        fs::write(tmp.path().join("apps").join(format!("{app}.rs")), "").unwrap();
        tmp
    }

    fn config_kind(err: &anyhow::Error) -> ErrorKind {
        err.downcast_ref::<BuildError>().unwrap().kind()
    }

    #[test]
    fn tool_names_use_prefix() {
        let cfg = sample();
        assert_eq!(cfg.toolchain.tool("ld"), "arm-none-eabi-ld");
        assert_eq!(Toolchain::default().tool("ld"), "ld");
        assert_eq!(cfg.toolchain.rustc, "rustc");
        assert_eq!(cfg.build.script, PathBuf::from("anvil.rhai"));
    }

    #[test]
    fn flags_for_cross_platform() {
        let cfg = sample();
        let tmp = project_with_app("blink");
        let layout = Layout::new(tmp.path());
        let sel = select(&cfg, &layout, Some("lpc17xx"), Some("blink"), false).unwrap();
        let flags = compute_flags(&cfg, &sel).unwrap();

        assert_eq!(
            flags.rustc,
            [
                "-g",
                "--target",
                "thumbv7m-none-eabi",
                "-Ctarget-cpu=cortex-m3",
                "--cfg",
                "mcu_lpc17xx",
                "--cfg",
                "arch_cortex_m3",
                "--cfg",
                "cfg_tft_lcd",
                "--cfg",
                "cfg_mcu_has_spi",
            ]
        );
        assert_eq!(flags.opt_level, "2");
        assert_eq!(flags.linker, ["-L/opt/arm/lib/gcc/arm-none-eabi/4.8/thumb/v7-m"]);
        assert_eq!(flags.cc, ["-mthumb", "-mcpu=cortex-m3"]);
    }

    #[test]
    fn native_debug_flags() {
        let mut cfg = sample();
        cfg.toolchain.native = true;
        cfg.toolchain.libs = None;
        let tmp = project_with_app("blink");
        let layout = Layout::new(tmp.path());
        let sel = select(&cfg, &layout, Some("lpc17xx"), Some("blink"), true).unwrap();
        let flags = compute_flags(&cfg, &sel).unwrap();

        assert!(!flags.rustc.iter().any(|f| f == "--target"));
        assert_eq!(flags.opt_level, "0");
        assert!(flags.linker.is_empty());
        assert!(flags.cc.is_empty());
    }

    #[test]
    fn selection_errors_list_choices() {
        let cfg = sample();
        let tmp = project_with_app("blink");
        let layout = Layout::new(tmp.path());

        let err = select(&cfg, &layout, None, Some("blink"), false).unwrap_err();
        assert_eq!(config_kind(&err), ErrorKind::Configuration);
        assert!(err.to_string().contains("broken, lpc17xx"));

        let err = select(&cfg, &layout, Some("mc13"), Some("blink"), false).unwrap_err();
        assert!(err.to_string().contains("undefined platform mc13"));

        let err = select(&cfg, &layout, Some("broken"), Some("blink"), false).unwrap_err();
        assert!(err.to_string().contains("undefined arch cortex_m9"));

        let err = select(&cfg, &layout, Some("lpc17xx"), None, false).unwrap_err();
        assert!(err.to_string().contains("available applications: blink"));

        let err = select(&cfg, &layout, Some("lpc17xx"), Some("usart"), false).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::ApplicationNotFound { name, .. }) if name == "usart"
        ));
    }

    #[test]
    fn invalid_toml_is_configuration_error() {
        let err = parse(Path::new("anvil.toml"), "[platforms.x]\narch = 3\n").unwrap_err();
        assert_eq!(config_kind(&err), ErrorKind::Configuration);
    }

    #[test]
    fn root_found_from_subdirectory() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join(CONFIG_FILE), "").unwrap();
        let nested = tmp.path().join("src/hal");
        fs::create_dir_all(&nested).unwrap();

        assert_eq!(find_project_root(&nested).unwrap(), tmp.path());
        assert!(load(tmp.path()).unwrap().platforms.is_empty());
    }

    #[test]
    fn platform_switch_purges_build_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = Layout::new(tmp.path());

        assert!(!prepare_build_dir(&layout, "lpc17xx").unwrap());
        let artifact = layout.build_dir().join("app.o");
        fs::write(&artifact, "obj").unwrap();

        assert!(!prepare_build_dir(&layout, "lpc17xx").unwrap());
        assert!(artifact.exists());

        assert!(prepare_build_dir(&layout, "stm32f4").unwrap());
        assert!(!artifact.exists());
        assert!(layout.intermediate_dir().is_dir());
        assert_eq!(fs::read_to_string(layout.platform_marker()).unwrap(), "stm32f4");
    }
}

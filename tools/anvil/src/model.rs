//! Rule declarations produced by build script evaluation.
//!
//! These are pure data types with no Rhai dependencies. The engine fills a
//! [`BuildScript`], which the registry then resolves into rules whose
//! dependencies are concrete paths.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

/// Kind of artifact a rule produces, and so which tool builds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// Rust compilation unit, via rustc.
    RustCompile,
    /// Native C translation unit, via gcc.
    CCompile,
    /// Linked image, via ld and a linker script.
    Link,
    /// Disassembly listing, via objdump.
    Listing,
    /// Flat binary image, via objcopy.
    Binary,
    /// Empty static archive, via ar.
    Archive,
}

impl RuleKind {
    /// Progress verb shown when a step of this kind runs.
    pub fn verb(self) -> &'static str {
        match self {
            Self::RustCompile | Self::CCompile => "Compiling",
            Self::Link => "Linking",
            Self::Listing => "Listing",
            Self::Binary => "Extracting",
            Self::Archive => "Archiving",
        }
    }

    /// Script function that declares a rule of this kind.
    pub fn function(self) -> &'static str {
        match self {
            Self::RustCompile => "compile_rust",
            Self::CCompile => "compile_c",
            Self::Link => "link_binary",
            Self::Listing => "listing",
            Self::Binary => "make_binary",
            Self::Archive => "provide_stdlibs",
        }
    }
}

/// A dependency as written in the script: another rule, or a file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DepRef {
    /// Output of the named rule.
    Rule(String),
    /// Literal path, relative to the project root unless absolute.
    Path(PathBuf),
}

impl fmt::Display for DepRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rule(name) => write!(f, "rule({name})"),
            Self::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Per-rule tool options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleOptions {
    /// `--crate-type` value.
    pub crate_type: Option<String>,
    /// Optimization level replacing the global one.
    pub optimize: Option<String>,
    /// Link-time optimization for object outputs.
    pub lto: bool,
    /// Extra LLVM pass, passed as `-Cpasses=`.
    pub llvm_pass: Option<String>,
    /// Lints to allow.
    pub ignore_warnings: Vec<String>,
    /// Write into the build directory instead of naming the output.
    pub out_dir: bool,
}

impl Default for RuleOptions {
    fn default() -> Self {
        Self {
            crate_type: None,
            optimize: None,
            lto: true,
            llvm_pass: None,
            ignore_warnings: Vec::new(),
            out_dir: false,
        }
    }
}

/// One rule as declared by the script, before references are resolved.
#[derive(Debug, Clone)]
pub struct RuleDecl {
    /// Symbolic rule name.
    pub name: String,
    /// Artifact kind.
    pub kind: RuleKind,
    /// Output path.
    pub produce: PathBuf,
    /// Primary input: a source file, or the artifact a listing or binary is
    /// derived from.
    pub source: Option<DepRef>,
    /// Extra prerequisites, in declaration order.
    pub deps: Vec<DepRef>,
    /// Linker script, for link rules.
    pub script: Option<DepRef>,
    /// Tool options.
    pub options: RuleOptions,
}

/// Everything a build script declares.
#[derive(Debug, Default, Clone)]
pub struct BuildScript {
    /// Rule declarations, in evaluation order.
    pub rules: Vec<RuleDecl>,
    /// Target built when none is named on the command line.
    pub default_target: Option<DepRef>,
}

//! Typed build failures.
//!
//! Functions return `anyhow::Result`; the variants here are the failures a
//! caller (or a test) may want to tell apart, recovered with
//! `err.downcast_ref::<BuildError>()`.

use std::fmt;
use std::path::PathBuf;
use std::process::ExitStatus;

use anvil_modscan::ScanError;
use thiserror::Error;

/// Coarse classification of a [`BuildError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad or missing selection or project configuration. Raised before any
    /// graph is built.
    Configuration,
    /// A reference, module, source or target that cannot be resolved.
    Resolution,
    /// An external tool failed to start, exited non-zero, or produced nothing.
    ToolInvocation,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Configuration => "configuration error",
            Self::Resolution => "resolution error",
            Self::ToolInvocation => "tool invocation error",
        })
    }
}

/// A fatal build failure.
#[derive(Debug, Error)]
pub enum BuildError {
    /// No platform was selected.
    #[error("undefined platform, available platforms: {}", .available.join(", "))]
    NoPlatform {
        /// Platforms declared in `anvil.toml`.
        available: Vec<String>,
    },

    /// The selected platform is not declared.
    #[error("undefined platform {name}, available platforms: {}", .available.join(", "))]
    UnknownPlatform {
        /// The requested platform.
        name: String,
        /// Platforms declared in `anvil.toml`.
        available: Vec<String>,
    },

    /// A platform names an architecture that is not declared.
    #[error("undefined arch {arch} for platform {platform}, available architectures: {}", .available.join(", "))]
    UnknownArch {
        /// The missing architecture.
        arch: String,
        /// The platform referencing it.
        platform: String,
        /// Architectures declared in `anvil.toml`.
        available: Vec<String>,
    },

    /// No application was selected.
    #[error("undefined application, available applications: {}", .available.join(", "))]
    NoApplication {
        /// Applications found under `apps/`.
        available: Vec<String>,
    },

    /// The selected application has no source file.
    #[error("application {name} not found: {} does not exist", path.display())]
    ApplicationNotFound {
        /// The requested application.
        name: String,
        /// Where its source was expected.
        path: PathBuf,
    },

    /// `anvil.toml` could not be read or parsed.
    #[error("invalid configuration {}: {message}", path.display())]
    InvalidConfig {
        /// The offending file.
        path: PathBuf,
        /// What went wrong.
        message: String,
    },

    /// No `anvil.toml` in the start directory or any ancestor.
    #[error("could not find anvil.toml in {} or any parent directory", .0.display())]
    NoProjectRoot(PathBuf),

    /// A rule declaration lacks an option its kind requires.
    #[error("{function}({rule}) requires `{field}`")]
    MissingField {
        /// The incomplete rule.
        rule: String,
        /// Script function that declared it.
        function: &'static str,
        /// The missing option key.
        field: &'static str,
    },

    /// A symbolic dependency names a rule that has not been declared yet.
    #[error("missing rule {name} (referenced by {referenced_by})")]
    MissingRule {
        /// The unknown rule name.
        name: String,
        /// The rule holding the reference.
        referenced_by: String,
    },

    /// A requested target is neither a rule name nor a known output.
    #[error("no rule or output named {0}")]
    UnknownTarget(String),

    /// A leaf prerequisite does not exist and nothing produces it.
    #[error("missing source {} needed by {needed_by}", path.display())]
    MissingSource {
        /// The missing file.
        path: PathBuf,
        /// The rule that needs it.
        needed_by: String,
    },

    /// The task graph contains a cycle.
    #[error("dependency cycle among: {0}")]
    Cycle(String),

    /// Two rules produce the same file.
    #[error("rules {first} and {second} both produce {}", output.display())]
    DuplicateOutput {
        /// The contested output.
        output: PathBuf,
        /// Rule registered first.
        first: String,
        /// Rule registered second.
        second: String,
    },

    /// An `out_dir` archive rule declares a name rustc will not write.
    #[error("rule {rule} declares {} but rustc writes {}", declared.display(), expected.display())]
    OutputName {
        /// The compile rule.
        rule: String,
        /// Declared `produce` path.
        declared: PathBuf,
        /// Path derived from the crate identity.
        expected: PathBuf,
    },

    /// Module discovery failed for a Rust compile rule.
    #[error("resolving modules for rule {rule}")]
    Module {
        /// The compile rule.
        rule: String,
        /// Underlying scanner failure.
        #[source]
        source: ScanError,
    },

    /// A tool could not be started.
    #[error("failed to run {program} for rule {rule}")]
    ToolSpawn {
        /// Program name.
        program: String,
        /// The rule being built.
        rule: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A tool exited unsuccessfully.
    #[error("{program} failed for rule {rule} ({status}):\n{stderr}")]
    ToolFailed {
        /// Program name.
        program: String,
        /// The rule being built.
        rule: String,
        /// Exit status.
        status: ExitStatus,
        /// Captured standard error.
        stderr: String,
    },

    /// A tool exited successfully but its output file is missing.
    #[error("{program} did not produce {} for rule {rule}", output.display())]
    NoOutput {
        /// Program name.
        program: String,
        /// The rule being built.
        rule: String,
        /// The expected output.
        output: PathBuf,
    },
}

impl BuildError {
    /// The class this failure belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoPlatform { .. }
            | Self::UnknownPlatform { .. }
            | Self::UnknownArch { .. }
            | Self::NoApplication { .. }
            | Self::ApplicationNotFound { .. }
            | Self::InvalidConfig { .. }
            | Self::NoProjectRoot(_)
            | Self::MissingField { .. } => ErrorKind::Configuration,
            Self::MissingRule { .. }
            | Self::UnknownTarget(_)
            | Self::MissingSource { .. }
            | Self::Cycle(_)
            | Self::DuplicateOutput { .. }
            | Self::OutputName { .. }
            | Self::Module { .. } => ErrorKind::Resolution,
            Self::ToolSpawn { .. } | Self::ToolFailed { .. } | Self::NoOutput { .. } => {
                ErrorKind::ToolInvocation
            }
        }
    }
}

/// Kind of the first [`BuildError`] in an error chain, if any.
pub fn kind_of(err: &anyhow::Error) -> Option<ErrorKind> {
    err.chain()
        .find_map(|e| e.downcast_ref::<BuildError>())
        .map(BuildError::kind)
}

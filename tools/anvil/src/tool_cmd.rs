//! External tool invocations.
//!
//! A [`ToolCommand`] is plain data: program, arguments and an optional file
//! receiving standard output. Graph nodes carry one each, the plan printer
//! serializes them, and the command manifest fingerprints them. Execution
//! goes through the [`ToolRunner`] trait so the scheduler can be driven
//! without a real toolchain.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::BuildError;

/// One fully-specified external process invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolCommand {
    /// Program to run.
    pub program: String,
    /// Arguments, in order.
    pub args: Vec<String>,
    /// File receiving the program's standard output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<PathBuf>,
}

impl ToolCommand {
    /// SHA-256 over program, arguments and stdout redirection.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.program.as_bytes());
        for arg in &self.args {
            hasher.update([0u8]);
            hasher.update(arg.as_bytes());
        }
        if let Some(path) = &self.stdout {
            hasher.update([1u8]);
            hasher.update(path.to_string_lossy().as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }

    /// Shell-like rendering for logs.
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        if let Some(path) = &self.stdout {
            line.push_str(" > ");
            line.push_str(&path.to_string_lossy());
        }
        line
    }
}

/// Typed builder for tool invocations.
///
/// Methods append in call order, so the argument order of a command is the
/// order its template calls them.
pub struct ToolCommandBuilder {
    program: String,
    args: Vec<String>,
    stdout: Option<PathBuf>,
}

impl ToolCommandBuilder {
    /// Start a command for `program`.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdout: None,
        }
    }

    /// Escape hatch for any argument.
    pub fn arg(&mut self, arg: impl Into<String>) -> &mut Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Append a path argument.
    pub fn path(&mut self, path: &Path) -> &mut Self {
        self.args.push(path.to_string_lossy().into_owned());
        self
    }

    /// Append path arguments.
    pub fn paths<'a>(&mut self, paths: impl IntoIterator<Item = &'a PathBuf>) -> &mut Self {
        for path in paths {
            self.path(path);
        }
        self
    }

    /// Set the crate type (`--crate-type <ty>`).
    pub fn crate_type(&mut self, ty: &str) -> &mut Self {
        self.arg("--crate-type").arg(ty)
    }

    /// Set the emit kind (`--emit <kind>`).
    pub fn emit(&mut self, kind: &str) -> &mut Self {
        self.arg("--emit").arg(kind)
    }

    /// Set the optimization level (`-Copt-level=<level>`).
    pub fn opt_level(&mut self, level: &str) -> &mut Self {
        self.arg(format!("-Copt-level={level}"))
    }

    /// Enable link-time optimization (`-Clto`).
    pub fn lto(&mut self) -> &mut Self {
        self.arg("-Clto")
    }

    /// Run an extra LLVM pass (`-Cpasses=<pass>`).
    pub fn passes(&mut self, pass: &str) -> &mut Self {
        self.arg(format!("-Cpasses={pass}"))
    }

    /// Allow a lint (`--allow <lint>`).
    pub fn allow(&mut self, lint: &str) -> &mut Self {
        self.arg("--allow").arg(lint)
    }

    /// Add a library search path (`-L <dir>`).
    pub fn search_path(&mut self, dir: &Path) -> &mut Self {
        self.arg("-L").path(dir)
    }

    /// Set the output directory (`--out-dir <dir>`).
    pub fn out_dir(&mut self, dir: &Path) -> &mut Self {
        self.arg("--out-dir").path(dir)
    }

    /// Set the output file (`-o <file>`).
    pub fn output(&mut self, file: &Path) -> &mut Self {
        self.arg("-o").path(file)
    }

    /// Redirect standard output into `file`.
    pub fn capture_stdout(&mut self, file: &Path) -> &mut Self {
        self.stdout = Some(file.to_path_buf());
        self
    }

    /// Finish the command.
    pub fn build(&self) -> ToolCommand {
        ToolCommand {
            program: self.program.clone(),
            args: self.args.clone(),
            stdout: self.stdout.clone(),
        }
    }
}

/// Executes tool commands on behalf of the scheduler.
///
/// Implementations are shared between worker threads.
pub trait ToolRunner: Sync {
    /// Run `cmd` for `rule`, which is expected to produce `output`.
    /// Returns once the process has exited.
    fn run(&self, rule: &str, output: &Path, cmd: &ToolCommand) -> Result<()>;
}

/// Runs commands as child processes.
pub struct ProcessRunner;

impl ProcessRunner {
    /// Run `cmd` and return its standard output.
    pub fn capture(&self, rule: &str, cmd: &ToolCommand) -> Result<String> {
        let output = spawn(rule, cmd)?;
        forward_stderr(&output.stderr);
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl ToolRunner for ProcessRunner {
    fn run(&self, rule: &str, _output: &Path, cmd: &ToolCommand) -> Result<()> {
        let output = spawn(rule, cmd)?;
        match &cmd.stdout {
            Some(path) => fs::write(path, &output.stdout)
                .with_context(|| format!("failed to write {}", path.display()))?,
            None if !output.stdout.is_empty() => io::stdout().write_all(&output.stdout)?,
            None => {}
        }
        forward_stderr(&output.stderr);
        Ok(())
    }
}

fn spawn(rule: &str, cmd: &ToolCommand) -> Result<std::process::Output> {
    let output = Command::new(&cmd.program)
        .args(&cmd.args)
        .output()
        .map_err(|source| BuildError::ToolSpawn {
            program: cmd.program.clone(),
            rule: rule.to_owned(),
            source,
        })?;
    if !output.status.success() {
        return Err(BuildError::ToolFailed {
            program: cmd.program.clone(),
            rule: rule.to_owned(),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
        .into());
    }
    Ok(output)
}

/// Warnings from a successful tool run still reach the user.
fn forward_stderr(stderr: &[u8]) {
    if !stderr.is_empty() {
        let _ = io::stderr().write_all(stderr);
    }
}

//! Command-line interface definitions for anvil.

use std::path::PathBuf;

use clap::builder::FalseyValueParser;
use clap::{ArgAction, Parser, Subcommand};

/// Dependency-aware build orchestrator for bare-metal Rust firmware.
#[derive(Parser)]
#[command(name = "anvil", version, about)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Project root (default: nearest ancestor containing anvil.toml).
    #[arg(long, short = 'C', global = true)]
    pub root: Option<PathBuf>,

    /// Target platform, as named in anvil.toml.
    #[arg(long, global = true, env = "PLATFORM")]
    pub platform: Option<String>,

    /// Application to build (a file under apps/, without extension).
    #[arg(long, global = true, env = "APP")]
    pub app: Option<String>,

    /// Build without optimization. `DEBUG` counts unless empty or one of
    /// `0`, `false`, `no`, `off`.
    #[arg(long, global = true, env = "DEBUG", action = ArgAction::SetTrue, value_parser = FalseyValueParser::new())]
    pub debug: bool,

    /// Force rebuild, treating every step as stale.
    #[arg(long, short = 'f', global = true)]
    pub force: bool,

    /// Suppress per-step output; show only errors and the final summary.
    #[arg(long, short = 'q', global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Enable verbose output with stale reasons, commands and timings.
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Maximum number of parallel tool invocations (default: CPU count).
    #[arg(long, short = 'j', global = true)]
    pub jobs: Option<usize>,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Command {
    /// Bring targets up to date (default: the script's default target).
    Build(TargetArgs),
    /// Show the steps a build would run, without running them.
    Plan(PlanArgs),
    /// Print the files a source file transitively includes.
    Deps(DepsArgs),
    /// Print crate identity and archive name for source files.
    CrateId(CrateIdArgs),
    /// Build a target and print its section size report.
    Size(SizeArgs),
    /// Remove build artifacts.
    Clean,
}

/// Targets to bring up to date.
#[derive(Parser)]
pub struct TargetArgs {
    /// Rule names or output paths.
    pub targets: Vec<String>,
}

/// Arguments for the `plan` subcommand.
#[derive(Parser)]
pub struct PlanArgs {
    /// Rule names or output paths.
    pub targets: Vec<String>,

    /// Emit the plan as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `deps` subcommand.
#[derive(Parser)]
pub struct DepsArgs {
    /// Root source file.
    pub file: PathBuf,
}

/// Arguments for the `crate-id` subcommand.
#[derive(Parser)]
pub struct CrateIdArgs {
    /// Crate root source files.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}

/// Arguments for the `size` subcommand.
#[derive(Parser)]
pub struct SizeArgs {
    /// Rule name or output path of a linked image.
    pub target: String,
}

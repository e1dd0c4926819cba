//! anvil: build orchestrator for cross-compiled firmware.
//!
//! Declarative rules from `anvil.rhai` become a task graph whose nodes each
//! run one external tool. Rust compile steps depend on every module file
//! their source pulls in, found by scanning source text.
//!
//! Pipeline: load anvil.toml → select platform/app → evaluate anvil.rhai →
//!           register rules → build task graph → run stale steps.

mod cache;
mod cli;
mod config;
mod context;
mod engine;
mod error;
mod graph;
mod identity;
mod layout;
mod model;
mod registry;
mod scheduler;
mod size;
mod tool_cmd;
mod verbose;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;

use cache::CommandManifest;
use context::{BuildContext, LoadOptions};
use graph::{TaskGraph, TaskNode};
use scheduler::{ExecOptions, NodeState};
use tool_cmd::ProcessRunner;
use verbose::wprintln;

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    verbose::init(cli.quiet, cli.verbose);

    let result = match cli.command {
        cli::Command::Build(ref args) => cmd_build(&cli, &args.targets).map(drop),
        cli::Command::Plan(ref args) => cmd_plan(&cli, args),
        cli::Command::Deps(ref args) => cmd_deps(&args.file),
        cli::Command::CrateId(ref args) => cmd_crate_id(&args.files),
        cli::Command::Size(ref args) => cmd_size(&cli, &args.target),
        cli::Command::Clean => cmd_clean(&cli),
    };

    // Lead the report with the failure class.
    result.map_err(|e| match error::kind_of(&e) {
        Some(kind) => e.context(kind),
        None => e,
    })
}

// ===========================================================================
// Context loading
// ===========================================================================

fn project_root(cli: &cli::Cli) -> Result<PathBuf> {
    match &cli.root {
        Some(root) => Ok(root.clone()),
        None => {
            let cwd = std::env::current_dir().context("failed to get current directory")?;
            config::find_project_root(&cwd)
        }
    }
}

fn load_context(cli: &cli::Cli, prepare: bool) -> Result<BuildContext> {
    let root = project_root(cli)?;
    BuildContext::load(
        &root,
        &LoadOptions {
            platform: cli.platform.as_deref(),
            app: cli.app.as_deref(),
            debug: cli.debug,
            prepare,
        },
    )
}

// ===========================================================================
// Commands
// ===========================================================================

/// Bring targets up to date. Returns the graph and the node ids built.
fn cmd_build(cli: &cli::Cli, names: &[String]) -> Result<(BuildContext, TaskGraph, Vec<usize>)> {
    let mut ctx = load_context(cli, true)?;
    let graph = ctx.build_graph()?;
    let targets = ctx.targets(&graph, names)?;

    let manifest_path = ctx.layout.manifest_path();
    let mut manifest = CommandManifest::load(&manifest_path);
    let opts = ExecOptions {
        force: cli.force,
        jobs: cli.jobs.unwrap_or(0),
    };
    let result = scheduler::execute(&graph, &targets, &mut manifest, &ProcessRunner, &opts);

    // Steps that finished keep their records even when the build failed.
    if let Err(e) = manifest.save(&manifest_path) {
        wprintln!("failed to save command manifest: {e:#}");
    }
    let summary = result?;

    println!(
        "\nBuild complete. ({} of {} steps rebuilt in {:.2?})",
        summary.executed.len(),
        summary.considered,
        summary.elapsed
    );
    Ok((ctx, graph, targets))
}

/// One scheduled step as reported by `plan --json`.
#[derive(Serialize)]
struct PlanEntry<'a> {
    #[serde(flatten)]
    node: &'a TaskNode,
    stale: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

/// Print the steps a build would run, in execution order.
fn cmd_plan(cli: &cli::Cli, args: &cli::PlanArgs) -> Result<()> {
    let mut ctx = load_context(cli, false)?;
    let graph = ctx.build_graph()?;
    let targets = ctx.targets(&graph, &args.targets)?;
    let schedule = scheduler::schedule(&graph, &targets)?;
    let manifest = CommandManifest::load(&ctx.layout.manifest_path());
    let states = scheduler::predict(&graph, &schedule, &manifest, cli.force);

    if args.json {
        let entries: Vec<PlanEntry<'_>> = states
            .into_iter()
            .map(|(id, state)| {
                let (stale, reason) = match state {
                    NodeState::Clean => (false, None),
                    NodeState::Stale(reason) => (true, Some(reason)),
                };
                PlanEntry {
                    node: graph.node(id),
                    stale,
                    reason,
                }
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    let stale = states.iter().filter(|(_, s)| s.is_stale()).count();
    for (id, state) in &states {
        let node = graph.node(*id);
        let output = ctx.layout.display(&node.output).to_string();
        let note = match state {
            NodeState::Clean => "up to date",
            NodeState::Stale(reason) => reason.as_str(),
        };
        println!("{}", verbose::step_line(node.verb(), &output, Some(note)));
        if verbose::is_verbose() {
            for prereq in &node.prerequisites {
                let prereq = ctx.layout.display(prereq).to_string();
                println!("{}", verbose::detail_line("<-", &prereq));
            }
            if let graph::Action::Tool(cmd) = &node.action {
                println!("{}", verbose::detail_line("$", &cmd.command_line()));
            }
        }
    }
    println!("\n{stale} of {} steps would run.", states.len());
    Ok(())
}

/// Print the files `file` transitively pulls in through `mod` declarations.
fn cmd_deps(file: &Path) -> Result<()> {
    let deps = anvil_modscan::resolve_transitive(file)
        .with_context(|| format!("failed to resolve modules of {}", file.display()))?;
    for path in &deps {
        println!("{}", path.display());
    }
    Ok(())
}

/// Print the crate identity and archive name of each file.
fn cmd_crate_id(files: &[PathBuf]) -> Result<()> {
    let mut identities = identity::CrateIdentityCache::new();
    for file in files {
        let id = anvil_modscan::read_crate_id(file)?;
        let key = identities.identity_for(file)?;
        println!("{}: {id} -> {key}", file.display());
    }
    Ok(())
}

/// Build `target` and report the section sizes of its output.
fn cmd_size(cli: &cli::Cli, target: &str) -> Result<()> {
    let (ctx, graph, targets) = cmd_build(cli, &[target.to_owned()])?;
    for id in targets {
        println!();
        size::report_size(&ctx.config.toolchain, &graph.node(id).output)?;
    }
    Ok(())
}

/// Remove the build directory.
fn cmd_clean(cli: &cli::Cli) -> Result<()> {
    let root = project_root(cli)?;
    let build_dir = layout::Layout::new(&root).build_dir();
    if build_dir.exists() {
        fs::remove_dir_all(&build_dir)
            .with_context(|| format!("failed to remove {}", build_dir.display()))?;
        println!("Removed {}", build_dir.display());
    } else {
        println!("Nothing to clean.");
    }
    Ok(())
}

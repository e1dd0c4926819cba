//! Task graph construction.
//!
//! Each registered rule becomes one [`TaskNode`]: its output, the full set
//! of files it must be rebuilt after, and the single tool invocation that
//! produces it. Edges are implicit: a prerequisite produced by another node
//! is a dependency on that node.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anvil_modscan::DependencyResolver;
use anyhow::Result;
use serde::Serialize;

use crate::config::{Flags, Toolchain};
use crate::error::BuildError;
use crate::identity::CrateIdentityCache;
use crate::layout::Layout;
use crate::model::RuleKind;
use crate::registry::{Registry, Rule};
use crate::tool_cmd::{ToolCommand, ToolCommandBuilder};

/// Name of the node tracking the last-built application.
pub const FINGERPRINT_RULE: &str = "app-fingerprint";

/// What running a node does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Invoke an external tool.
    Tool(ToolCommand),
    /// Write the application name into the marker file.
    Fingerprint {
        /// Application being built.
        app: String,
    },
}

/// One unit of work in the task graph.
#[derive(Debug, Clone, Serialize)]
pub struct TaskNode {
    /// Rule the node was built from.
    pub rule: String,
    /// Artifact kind; `None` for the application fingerprint.
    pub kind: Option<RuleKind>,
    /// File the action produces.
    pub output: PathBuf,
    /// Files that must be up to date first, deduplicated, in declaration
    /// order.
    pub prerequisites: Vec<PathBuf>,
    /// The action.
    pub action: Action,
}

impl TaskNode {
    /// Progress verb for this node.
    pub fn verb(&self) -> &'static str {
        self.kind.map_or("Recording", RuleKind::verb)
    }
}

/// Task nodes indexed by rule name and output path.
#[derive(Debug, Default)]
pub struct TaskGraph {
    nodes: Vec<TaskNode>,
    by_output: HashMap<PathBuf, usize>,
    by_rule: HashMap<String, usize>,
}

impl TaskGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node, rejecting a second producer of the same output.
    pub fn add(&mut self, node: TaskNode) -> Result<usize> {
        if let Some(&existing) = self.by_output.get(&node.output) {
            return Err(BuildError::DuplicateOutput {
                output: node.output,
                first: self.nodes[existing].rule.clone(),
                second: node.rule,
            }
            .into());
        }
        let id = self.nodes.len();
        self.by_output.insert(node.output.clone(), id);
        if node.kind.is_some() {
            self.by_rule.insert(node.rule.clone(), id);
        }
        self.nodes.push(node);
        Ok(id)
    }

    /// All nodes, in registration order.
    pub fn nodes(&self) -> &[TaskNode] {
        &self.nodes
    }

    /// Node by id.
    pub fn node(&self, id: usize) -> &TaskNode {
        &self.nodes[id]
    }

    /// Node producing `path`, if any.
    pub fn producer_of(&self, path: &Path) -> Option<usize> {
        self.by_output.get(path).copied()
    }

    /// Node for a command-line target: a rule name, or an output path
    /// relative to the project root.
    pub fn find_target(&self, target: &str, layout: &Layout) -> Result<usize> {
        if let Some(&id) = self.by_rule.get(target) {
            return Ok(id);
        }
        self.producer_of(&layout.resolve(target))
            .ok_or_else(|| BuildError::UnknownTarget(target.to_owned()).into())
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }
}

/// Turns registered rules into task nodes for one platform.
pub struct GraphBuilder<'a> {
    layout: &'a Layout,
    flags: &'a Flags,
    toolchain: &'a Toolchain,
    resolver: &'a mut DependencyResolver,
    identities: &'a mut CrateIdentityCache,
}

impl<'a> GraphBuilder<'a> {
    /// Builder using the given flags and toolchain.
    pub fn new(
        layout: &'a Layout,
        flags: &'a Flags,
        toolchain: &'a Toolchain,
        resolver: &'a mut DependencyResolver,
        identities: &'a mut CrateIdentityCache,
    ) -> Self {
        Self {
            layout,
            flags,
            toolchain,
            resolver,
            identities,
        }
    }

    /// Graph holding the application fingerprint and one node per rule.
    pub fn build(&mut self, registry: &Registry, app: &str) -> Result<TaskGraph> {
        let mut graph = TaskGraph::new();
        graph.add(self.fingerprint(app))?;
        for rule in registry.rules() {
            graph.add(self.node_for(rule)?)?;
        }
        Ok(graph)
    }

    /// The node for one rule.
    pub fn node_for(&mut self, rule: &Rule) -> Result<TaskNode> {
        match rule.kind {
            RuleKind::RustCompile => self.rust_compile(rule),
            RuleKind::CCompile => self.c_compile(rule),
            RuleKind::Link => self.link(rule),
            RuleKind::Listing => self.listing(rule),
            RuleKind::Binary => self.binary(rule),
            RuleKind::Archive => Ok(self.archive(rule)),
        }
    }

    /// Marker node storing the application name in `build/.app`.
    pub fn fingerprint(&self, app: &str) -> TaskNode {
        TaskNode {
            rule: FINGERPRINT_RULE.to_owned(),
            kind: None,
            output: self.layout.app_marker(),
            prerequisites: Vec::new(),
            action: Action::Fingerprint { app: app.to_owned() },
        }
    }

    fn rust_compile(&mut self, rule: &Rule) -> Result<TaskNode> {
        let source = required_source(rule)?;
        if !source.is_file() {
            return Err(BuildError::MissingSource {
                path: source.to_path_buf(),
                needed_by: rule.name.clone(),
            }
            .into());
        }
        let modules = self
            .resolver
            .resolve_transitive(source)
            .map_err(|source| BuildError::Module {
                rule: rule.name.clone(),
                source,
            })?;

        let opts = &rule.options;
        let build_dir = self.layout.build_dir();
        let extension = rule.produce.extension().and_then(|e| e.to_str());
        // rustc names the archive itself under --out-dir.
        if opts.out_dir && extension == Some("rlib") {
            let expected = build_dir.join(self.identities.identity_for(source)?);
            if expected != rule.produce {
                return Err(BuildError::OutputName {
                    rule: rule.name.clone(),
                    declared: rule.produce.clone(),
                    expected,
                }
                .into());
            }
        }

        let mut cmd = ToolCommandBuilder::new(&self.toolchain.rustc);
        cmd.args(&self.flags.rustc)
            .opt_level(opts.optimize.as_deref().unwrap_or(self.flags.opt_level.as_str()));
        if opts.lto && extension == Some("o") {
            cmd.lto();
        }
        if let Some(ty) = &opts.crate_type {
            cmd.crate_type(ty);
        }
        if let Some(kind) = emit_kind(extension) {
            cmd.emit(kind);
        }
        cmd.search_path(&build_dir);
        if let Some(pass) = &opts.llvm_pass {
            cmd.passes(pass);
        }
        if opts.out_dir {
            cmd.out_dir(&build_dir);
        } else {
            cmd.output(&rule.produce);
        }
        for lint in &opts.ignore_warnings {
            cmd.allow(lint);
        }
        cmd.path(source);

        let mut prerequisites = Vec::new();
        push_unique(&mut prerequisites, source);
        extend_unique(&mut prerequisites, &rule.deps);
        extend_unique(&mut prerequisites, &modules);
        Ok(node(rule, prerequisites, cmd.build()))
    }

    fn c_compile(&self, rule: &Rule) -> Result<TaskNode> {
        let source = required_source(rule)?;
        let cmd = ToolCommandBuilder::new(self.toolchain.tool("gcc"))
            .args(&self.flags.cc)
            .output(&rule.produce)
            .arg("-c")
            .path(source)
            .build();

        let mut prerequisites = Vec::new();
        push_unique(&mut prerequisites, source);
        extend_unique(&mut prerequisites, &rule.deps);
        Ok(node(rule, prerequisites, cmd))
    }

    fn link(&self, rule: &Rule) -> Result<TaskNode> {
        let script = rule.script.as_deref().ok_or_else(|| BuildError::MissingField {
            rule: rule.name.clone(),
            function: RuleKind::Link.function(),
            field: "script",
        })?;
        let objects: Vec<PathBuf> = rule.deps.iter().filter(|d| *d != script).cloned().collect();
        let stem = rule
            .produce
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| rule.name.clone());
        let map_file = self.layout.build_dir().join(format!("{stem}.map"));

        let cmd = ToolCommandBuilder::new(self.toolchain.tool("ld"))
            .arg("-Map")
            .path(&map_file)
            .output(&rule.produce)
            .arg("-T")
            .path(script)
            .paths(&objects)
            .args(&self.flags.linker)
            .args(["--gc-sections", "-lgcc"])
            .build();

        let mut prerequisites = Vec::new();
        extend_unique(&mut prerequisites, &rule.deps);
        push_unique(&mut prerequisites, script);
        Ok(node(rule, prerequisites, cmd))
    }

    fn listing(&self, rule: &Rule) -> Result<TaskNode> {
        let input = required_source(rule)?;
        let cmd = ToolCommandBuilder::new(self.toolchain.tool("objdump"))
            .arg("-D")
            .path(input)
            .capture_stdout(&rule.produce)
            .build();
        Ok(node(rule, derived_prerequisites(input, rule), cmd))
    }

    fn binary(&self, rule: &Rule) -> Result<TaskNode> {
        let input = required_source(rule)?;
        let cmd = ToolCommandBuilder::new(self.toolchain.tool("objcopy"))
            .path(input)
            .path(&rule.produce)
            .args(["-O", "binary"])
            .build();
        Ok(node(rule, derived_prerequisites(input, rule), cmd))
    }

    fn archive(&self, rule: &Rule) -> TaskNode {
        let cmd = ToolCommandBuilder::new(self.toolchain.tool("ar"))
            .arg("cr")
            .path(&rule.produce)
            .build();
        let mut prerequisites = Vec::new();
        extend_unique(&mut prerequisites, &rule.deps);
        node(rule, prerequisites, cmd)
    }
}

fn node(rule: &Rule, prerequisites: Vec<PathBuf>, cmd: ToolCommand) -> TaskNode {
    TaskNode {
        rule: rule.name.clone(),
        kind: Some(rule.kind),
        output: rule.produce.clone(),
        prerequisites,
        action: Action::Tool(cmd),
    }
}

/// Emit kind implied by the output extension; other outputs use rustc's
/// default for the crate type.
fn emit_kind(extension: Option<&str>) -> Option<&'static str> {
    match extension? {
        "o" => Some("obj"),
        "ll" => Some("llvm-ir"),
        "s" => Some("asm"),
        _ => None,
    }
}

fn required_source(rule: &Rule) -> Result<&Path> {
    rule.source.as_deref().ok_or_else(|| {
        BuildError::MissingField {
            rule: rule.name.clone(),
            function: rule.kind.function(),
            field: "source",
        }
        .into()
    })
}

fn derived_prerequisites(input: &Path, rule: &Rule) -> Vec<PathBuf> {
    let mut prerequisites = Vec::new();
    push_unique(&mut prerequisites, input);
    extend_unique(&mut prerequisites, &rule.deps);
    prerequisites
}

fn push_unique(list: &mut Vec<PathBuf>, path: &Path) {
    if !list.iter().any(|p| p == path) {
        list.push(path.to_path_buf());
    }
}

fn extend_unique<'p>(list: &mut Vec<PathBuf>, paths: impl IntoIterator<Item = &'p PathBuf>) {
    for path in paths {
        push_unique(list, path);
    }
}

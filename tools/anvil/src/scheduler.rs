//! DAG scheduler for the task graph.
//!
//! Only the part of the graph reachable from the requested targets is
//! scheduled. Staleness is decided on the main thread once every
//! prerequisite node has finished; stale tool nodes are dispatched to a
//! bounded pool of worker threads, each running one external process at a
//! time. The first failure stops dispatch, in-flight jobs are drained, and
//! the error is returned.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, mpsc};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use serde::Serialize;

use crate::cache::{CommandManifest, file_mtime};
use crate::error::BuildError;
use crate::graph::{Action, TaskGraph, TaskNode};
use crate::tool_cmd::ToolRunner;
use crate::verbose::{Timer, dprintln, is_verbose, step_line, vprintln};

/// Whether a node's action must run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum NodeState {
    /// Output is up to date.
    Clean,
    /// Output must be rebuilt, with a human-readable reason.
    Stale(String),
}

impl NodeState {
    /// Returns `true` for [`NodeState::Stale`].
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Stale(_))
    }
}

/// Decide whether `node` must run.
///
/// `rebuilt` holds outputs already rebuilt during this invocation; a node
/// consuming one of them is stale even if timestamps cannot tell the
/// difference.
pub fn staleness(
    node: &TaskNode,
    manifest: &CommandManifest,
    rebuilt: &HashSet<PathBuf>,
    force: bool,
) -> NodeState {
    if force {
        return NodeState::Stale("forced".into());
    }

    let cmd = match &node.action {
        Action::Fingerprint { app } => {
            return match fs::read_to_string(&node.output) {
                Ok(recorded) if recorded.trim() == app => NodeState::Clean,
                Ok(recorded) => NodeState::Stale(format!(
                    "application changed ({} -> {app})",
                    recorded.trim()
                )),
                Err(_) => NodeState::Stale("no recorded application".into()),
            };
        }
        Action::Tool(cmd) => cmd,
    };

    let Some(output_mtime) = file_mtime(&node.output) else {
        return NodeState::Stale("output missing".into());
    };
    for prereq in &node.prerequisites {
        if rebuilt.contains(prereq) {
            return NodeState::Stale(format!("{} was rebuilt", prereq.display()));
        }
        match file_mtime(prereq) {
            Some(mtime) if mtime > output_mtime => {
                return NodeState::Stale(format!("{} is newer", prereq.display()));
            }
            Some(_) => {}
            None => return NodeState::Stale(format!("{} is missing", prereq.display())),
        }
    }
    if manifest.changed(&node.output, &cmd.fingerprint()) {
        return NodeState::Stale("command changed".into());
    }
    NodeState::Clean
}

/// The subgraph needed for a set of targets.
#[derive(Debug)]
pub struct Schedule {
    /// Reachable nodes in dependency order.
    pub order: Vec<usize>,
    /// For every reachable node, the nodes producing its prerequisites.
    pub deps: BTreeMap<usize, Vec<usize>>,
}

impl Schedule {
    /// Reverse edges: node → nodes waiting on it.
    fn dependents(&self) -> HashMap<usize, Vec<usize>> {
        let mut dependents: HashMap<usize, Vec<usize>> = HashMap::new();
        for (&id, deps) in &self.deps {
            for &dep in deps {
                dependents.entry(dep).or_default().push(id);
            }
        }
        dependents
    }
}

/// Collect the nodes reachable from `targets` and order them.
///
/// Fails when a leaf prerequisite is missing and no node produces it, or
/// when the reachable subgraph has a cycle.
pub fn schedule(graph: &TaskGraph, targets: &[usize]) -> Result<Schedule> {
    let mut deps: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    let mut stack = targets.to_vec();

    while let Some(id) = stack.pop() {
        if deps.contains_key(&id) {
            continue;
        }
        let node = graph.node(id);
        let mut producers = Vec::new();
        for prereq in &node.prerequisites {
            match graph.producer_of(prereq) {
                Some(producer) => {
                    if !producers.contains(&producer) {
                        producers.push(producer);
                    }
                    stack.push(producer);
                }
                None if !prereq.exists() => {
                    return Err(BuildError::MissingSource {
                        path: prereq.clone(),
                        needed_by: node.rule.clone(),
                    }
                    .into());
                }
                None => {}
            }
        }
        deps.insert(id, producers);
    }

    // Kahn's algorithm; lowest id first keeps the order stable across runs.
    let mut in_degree: HashMap<usize, usize> = deps.iter().map(|(&id, d)| (id, d.len())).collect();
    let mut schedule = Schedule {
        order: Vec::with_capacity(deps.len()),
        deps,
    };
    let dependents = schedule.dependents();
    let mut ready: BTreeSet<usize> = in_degree
        .iter()
        .filter(|&(_, &n)| n == 0)
        .map(|(&id, _)| id)
        .collect();

    while let Some(id) = ready.pop_first() {
        schedule.order.push(id);
        for &dependent in dependents.get(&id).into_iter().flatten() {
            if let Some(n) = in_degree.get_mut(&dependent) {
                *n -= 1;
                if *n == 0 {
                    ready.insert(dependent);
                }
            }
        }
    }

    if schedule.order.len() < schedule.deps.len() {
        let scheduled: HashSet<usize> = schedule.order.iter().copied().collect();
        let stuck: Vec<&str> = schedule
            .deps
            .keys()
            .filter(|id| !scheduled.contains(id))
            .map(|&id| graph.node(id).rule.as_str())
            .collect();
        return Err(BuildError::Cycle(stuck.join(", ")).into());
    }
    Ok(schedule)
}

/// Predicted state of every scheduled node, in schedule order.
///
/// A node downstream of a stale node is reported stale as well.
pub fn predict(
    graph: &TaskGraph,
    schedule: &Schedule,
    manifest: &CommandManifest,
    force: bool,
) -> Vec<(usize, NodeState)> {
    let mut rebuilt = HashSet::new();
    schedule
        .order
        .iter()
        .map(|&id| {
            let node = graph.node(id);
            let state = staleness(node, manifest, &rebuilt, force);
            if state.is_stale() {
                rebuilt.insert(node.output.clone());
            }
            (id, state)
        })
        .collect()
}

/// Execution knobs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecOptions {
    /// Treat every node as stale.
    pub force: bool,
    /// Worker threads; 0 picks the available parallelism.
    pub jobs: usize,
}

/// What an execution did.
#[derive(Debug, Default)]
pub struct BuildSummary {
    /// Nodes reachable from the targets.
    pub considered: usize,
    /// Rules whose action ran, in completion order.
    pub executed: Vec<String>,
    /// Wall-clock time.
    pub elapsed: Duration,
}

/// Result sent back from a worker thread.
enum Outcome {
    Done { node: usize, duration: Duration },
    Failed { error: anyhow::Error },
}

/// Bring `targets` up to date.
///
/// Successful nodes are recorded in `manifest` even when the build fails.
pub fn execute(
    graph: &TaskGraph,
    targets: &[usize],
    manifest: &mut CommandManifest,
    runner: &dyn ToolRunner,
    opts: &ExecOptions,
) -> Result<BuildSummary> {
    let _t = Timer::start("execute");
    let schedule = schedule(graph, targets)?;
    let total = schedule.order.len();
    let dependents = schedule.dependents();
    let mut in_degree: HashMap<usize, usize> =
        schedule.deps.iter().map(|(&id, d)| (id, d.len())).collect();
    let mut ready_queue: Vec<usize> = schedule
        .order
        .iter()
        .copied()
        .filter(|id| in_degree[id] == 0)
        .collect();

    let num_workers = match opts.jobs {
        0 => std::thread::available_parallelism().map_or(4, |n| n.get()),
        n => n,
    };
    vprintln!("  task graph: {total} of {} nodes reachable, {num_workers} workers", graph.len());

    let (job_tx, job_rx) = mpsc::channel::<usize>();
    let (result_tx, result_rx) = mpsc::channel::<Outcome>();
    let job_rx = Mutex::new(job_rx);
    let job_rx_ref = &job_rx;

    let start = Instant::now();
    let run: Result<(Vec<String>, Vec<(String, Duration)>)> = std::thread::scope(|s| {
        for _ in 0..num_workers {
            let tx = result_tx.clone();
            s.spawn(move || {
                loop {
                    let job = match job_rx_ref.lock() {
                        Ok(rx) => rx.recv(),
                        Err(_) => break,
                    };
                    let Ok(id) = job else { break };

                    let node = graph.node(id);
                    let Action::Tool(cmd) = &node.action else {
                        continue;
                    };
                    let started = Instant::now();
                    let outcome = match runner.run(&node.rule, &node.output, cmd) {
                        Ok(()) => Outcome::Done {
                            node: id,
                            duration: started.elapsed(),
                        },
                        Err(error) => Outcome::Failed { error },
                    };
                    if tx.send(outcome).is_err() {
                        break;
                    }
                }
            });
        }
        drop(result_tx);

        let mut completed = 0usize;
        let mut in_flight = 0usize;
        let mut rebuilt: HashSet<PathBuf> = HashSet::new();
        let mut executed = Vec::new();
        let mut timings = Vec::new();
        let mut failure: Option<anyhow::Error> = None;

        let mut release = |id: usize, ready: &mut Vec<usize>| {
            for &dependent in dependents.get(&id).into_iter().flatten() {
                if let Some(n) = in_degree.get_mut(&dependent) {
                    *n -= 1;
                    if *n == 0 {
                        ready.push(dependent);
                    }
                }
            }
        };

        'dag: while completed < total {
            let batch: Vec<usize> = ready_queue.drain(..).collect();
            for id in batch {
                let node = graph.node(id);
                match staleness(node, manifest, &rebuilt, opts.force) {
                    NodeState::Clean => {
                        vprintln!("{}", step_line("Skipping", &output_name(node), Some("up to date")));
                        completed += 1;
                        release(id, &mut ready_queue);
                        continue;
                    }
                    NodeState::Stale(reason) => {
                        vprintln!("{}", step_line("Stale", &output_name(node), Some(reason.as_str())));
                    }
                }

                dprintln!("{}", step_line(node.verb(), &output_name(node), None));
                if let Err(error) = prepare_output_dir(node) {
                    failure = Some(error);
                    break 'dag;
                }
                match &node.action {
                    Action::Fingerprint { app } => {
                        if let Err(error) = fs::write(&node.output, app)
                            .with_context(|| format!("failed to write {}", node.output.display()))
                        {
                            failure = Some(error);
                            break 'dag;
                        }
                        rebuilt.insert(node.output.clone());
                        completed += 1;
                        release(id, &mut ready_queue);
                    }
                    Action::Tool(cmd) => {
                        vprintln!("    {}", cmd.command_line());
                        if job_tx.send(id).is_err() {
                            failure = Some(anyhow::anyhow!("worker threads terminated unexpectedly"));
                            break 'dag;
                        }
                        in_flight += 1;
                    }
                }
            }

            if in_flight == 0 {
                if completed >= total {
                    break;
                }
                if ready_queue.is_empty() {
                    failure = Some(anyhow::anyhow!(
                        "{} of {total} nodes cannot be scheduled",
                        total - completed
                    ));
                    break;
                }
                continue;
            }

            match result_rx.recv() {
                Ok(Outcome::Done { node: id, duration }) => {
                    in_flight -= 1;
                    let node = graph.node(id);
                    if let Err(error) = finish(node, manifest) {
                        failure = Some(error);
                        break;
                    }
                    rebuilt.insert(node.output.clone());
                    executed.push(node.rule.clone());
                    timings.push((node.rule.clone(), duration));
                    completed += 1;
                    release(id, &mut ready_queue);
                }
                Ok(Outcome::Failed { error }) => {
                    in_flight -= 1;
                    failure = Some(error);
                    break;
                }
                Err(_) => {
                    failure = Some(anyhow::anyhow!("worker threads terminated unexpectedly"));
                    break;
                }
            }
        }

        // Close the job channel so idle workers exit, then wait out running jobs.
        drop(job_tx);
        if let Some(error) = failure {
            while in_flight > 0 {
                match result_rx.recv() {
                    Ok(Outcome::Done { node: id, .. }) => {
                        // A step that finished cleanly keeps its record.
                        let _ = finish(graph.node(id), manifest);
                    }
                    Ok(Outcome::Failed { .. }) => {}
                    Err(_) => break,
                }
                in_flight -= 1;
            }
            return Err(error);
        }
        Ok((executed, timings))
    });

    let (executed, timings) = run?;
    print_slowest(timings);

    Ok(BuildSummary {
        considered: total,
        executed,
        elapsed: start.elapsed(),
    })
}

fn output_name(node: &TaskNode) -> String {
    node.output.file_name().map_or_else(
        || node.output.display().to_string(),
        |name| name.to_string_lossy().into_owned(),
    )
}

fn prepare_output_dir(node: &TaskNode) -> Result<()> {
    if let Some(dir) = node.output.parent() {
        fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }
    Ok(())
}

/// Verify a tool produced its output and record the command that did.
fn finish(node: &TaskNode, manifest: &mut CommandManifest) -> Result<()> {
    let Action::Tool(cmd) = &node.action else {
        bail!("{} is not a tool step", node.rule);
    };
    if !node.output.exists() {
        return Err(BuildError::NoOutput {
            program: cmd.program.clone(),
            rule: node.rule.clone(),
            output: node.output.clone(),
        }
        .into());
    }
    manifest.record(&node.output, cmd.fingerprint());
    Ok(())
}

fn print_slowest(mut timings: Vec<(String, Duration)>) {
    if timings.len() < 2 {
        return;
    }
    let top_n = if is_verbose() { 5 } else { 3 };
    timings.sort_by(|a, b| b.1.cmp(&a.1));
    timings.truncate(top_n);

    dprintln!();
    dprintln!("  Slowest steps:");
    for (name, duration) in &timings {
        dprintln!("    {name:<24} {duration:.1?}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Flags, Toolchain};
    use crate::error::ErrorKind;
    use crate::graph::GraphBuilder;
    use crate::identity::CrateIdentityCache;
    use crate::layout::Layout;
    use crate::model::{DepRef, RuleDecl, RuleKind, RuleOptions};
    use crate::registry::Registry;
    use crate::tool_cmd::{ToolCommand, ToolCommandBuilder};
    use anvil_modscan::DependencyResolver;
    use std::path::Path;
    use std::time::SystemTime;

    /// Records invocations and creates the expected output.
    #[derive(Default)]
    struct RecordingRunner {
        log: Mutex<Vec<String>>,
        fail: Option<&'static str>,
        skip_output: Option<&'static str>,
    }

    impl RecordingRunner {
        fn failing(rule: &'static str) -> Self {
            Self {
                fail: Some(rule),
                ..Self::default()
            }
        }

        fn log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    impl ToolRunner for RecordingRunner {
        fn run(&self, rule: &str, output: &Path, _cmd: &ToolCommand) -> Result<()> {
            self.log.lock().unwrap().push(rule.to_owned());
            if self.fail == Some(rule) {
                bail!("{rule} exploded");
            }
            if self.skip_output != Some(rule) {
                fs::write(output, rule).unwrap();
            }
            Ok(())
        }
    }

    fn set_age(path: &Path, secs_ago: u64) {
        let when = SystemTime::now() - Duration::from_secs(secs_ago);
        fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(when)
            .unwrap();
    }

    fn write(path: &Path, text: &str, secs_ago: u64) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
        set_age(path, secs_ago);
    }

    fn tool_node(rule: &str, output: &Path, prerequisites: &[&Path]) -> TaskNode {
        TaskNode {
            rule: rule.into(),
            kind: Some(RuleKind::Archive),
            output: output.to_path_buf(),
            prerequisites: prerequisites.iter().map(|p| p.to_path_buf()).collect(),
            action: Action::Tool(ToolCommandBuilder::new("tool").path(output).build()),
        }
    }

    fn run(
        graph: &TaskGraph,
        targets: &[usize],
        manifest: &mut CommandManifest,
        runner: &RecordingRunner,
    ) -> Result<BuildSummary> {
        execute(graph, targets, manifest, runner, &ExecOptions { force: false, jobs: 2 })
    }

    #[test]
    fn missing_output_is_stale() {
        let tmp = tempfile::tempdir().unwrap();
        let node = tool_node("a", &tmp.path().join("a.o"), &[]);
        let state = staleness(&node, &CommandManifest::default(), &HashSet::new(), false);
        assert_eq!(state, NodeState::Stale("output missing".into()));
    }

    #[test]
    fn fresh_output_is_clean_and_not_run() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("a.rs");
        let out = tmp.path().join("a.o");
        write(&src, "", 100);
        write(&out, "", 10);

        let mut graph = TaskGraph::new();
        let id = graph.add(tool_node("a", &out, &[&src])).unwrap();
        let runner = RecordingRunner::default();
        let summary = run(&graph, &[id], &mut CommandManifest::default(), &runner).unwrap();

        assert!(runner.log().is_empty());
        assert!(summary.executed.is_empty());
        assert_eq!(summary.considered, 1);
    }

    #[test]
    fn newer_prerequisite_makes_stale() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("a.rs");
        let out = tmp.path().join("a.o");
        write(&out, "", 100);
        write(&src, "", 10);

        let node = tool_node("a", &out, &[&src]);
        let state = staleness(&node, &CommandManifest::default(), &HashSet::new(), false);
        assert!(matches!(state, NodeState::Stale(reason) if reason.ends_with("is newer")));
    }

    #[test]
    fn changed_command_makes_stale() {
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("a.o");
        write(&out, "", 0);
        let node = tool_node("a", &out, &[]);

        let mut manifest = CommandManifest::default();
        assert_eq!(staleness(&node, &manifest, &HashSet::new(), false), NodeState::Clean);

        manifest.record(&out, "an older command".into());
        assert_eq!(
            staleness(&node, &manifest, &HashSet::new(), false),
            NodeState::Stale("command changed".into())
        );
        assert!(staleness(&node, &manifest, &HashSet::new(), true).is_stale());
    }

    #[test]
    fn fingerprint_tracks_application_name() {
        let tmp = tempfile::tempdir().unwrap();
        let marker = tmp.path().join("build/.app");
        let node = TaskNode {
            rule: "app-fingerprint".into(),
            kind: None,
            output: marker.clone(),
            prerequisites: Vec::new(),
            action: Action::Fingerprint { app: "blink".into() },
        };
        let manifest = CommandManifest::default();
        let none = HashSet::new();

        assert!(staleness(&node, &manifest, &none, false).is_stale());

        let mut graph = TaskGraph::new();
        let id = graph.add(node.clone()).unwrap();
        let runner = RecordingRunner::default();
        let summary = run(&graph, &[id], &mut CommandManifest::default(), &runner).unwrap();
        assert_eq!(fs::read_to_string(&marker).unwrap(), "blink");
        assert!(runner.log().is_empty());
        assert!(summary.executed.is_empty());

        assert_eq!(staleness(&node, &manifest, &none, false), NodeState::Clean);
        fs::write(&marker, "usart\n").unwrap();
        assert_eq!(
            staleness(&node, &manifest, &none, false),
            NodeState::Stale("application changed (usart -> blink)".into())
        );
    }

    #[test]
    fn dependents_run_after_prerequisites() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("app.rs");
        write(&src, "", 100);
        let obj = tmp.path().join("build/app.o");
        let elf = tmp.path().join("build/app.elf");
        let bin = tmp.path().join("build/app.bin");

        let mut graph = TaskGraph::new();
        let bin_id = graph.add(tool_node("bin", &bin, &[&elf])).unwrap();
        graph.add(tool_node("elf", &elf, &[&obj])).unwrap();
        graph.add(tool_node("obj", &obj, &[&src])).unwrap();

        let runner = RecordingRunner::default();
        let mut manifest = CommandManifest::default();
        let summary = run(&graph, &[bin_id], &mut manifest, &runner).unwrap();

        assert_eq!(runner.log(), ["obj", "elf", "bin"]);
        assert_eq!(summary.executed, ["obj", "elf", "bin"]);
        assert_eq!(manifest.commands.len(), 3);

        // Second run: everything clean.
        let again = RecordingRunner::default();
        let summary = run(&graph, &[bin_id], &mut manifest, &again).unwrap();
        assert!(again.log().is_empty());
        assert_eq!(summary.considered, 3);
    }

    #[test]
    fn unrequested_nodes_are_left_alone() {
        let tmp = tempfile::tempdir().unwrap();
        let mut graph = TaskGraph::new();
        let a = graph.add(tool_node("a", &tmp.path().join("a.a"), &[])).unwrap();
        graph.add(tool_node("b", &tmp.path().join("b.a"), &[])).unwrap();

        let runner = RecordingRunner::default();
        run(&graph, &[a], &mut CommandManifest::default(), &runner).unwrap();
        assert_eq!(runner.log(), ["a"]);
    }

    #[test]
    fn failure_aborts_dependents() {
        let tmp = tempfile::tempdir().unwrap();
        let obj = tmp.path().join("app.o");
        let elf = tmp.path().join("app.elf");
        let mut graph = TaskGraph::new();
        graph.add(tool_node("obj", &obj, &[])).unwrap();
        let elf_id = graph.add(tool_node("elf", &elf, &[&obj])).unwrap();

        let runner = RecordingRunner::failing("obj");
        let mut manifest = CommandManifest::default();
        let err = run(&graph, &[elf_id], &mut manifest, &runner).unwrap_err();

        assert_eq!(err.to_string(), "obj exploded");
        assert_eq!(runner.log(), ["obj"]);
        assert!(!elf.exists());
        assert!(manifest.commands.is_empty());
    }

    #[test]
    fn failure_keeps_finished_records() {
        let tmp = tempfile::tempdir().unwrap();
        let good = tmp.path().join("good.a");
        let bad = tmp.path().join("bad.a");
        let top = tmp.path().join("top.a");
        let mut graph = TaskGraph::new();
        graph.add(tool_node("good", &good, &[])).unwrap();
        graph.add(tool_node("bad", &bad, &[])).unwrap();
        let top_id = graph.add(tool_node("top", &top, &[&good, &bad])).unwrap();

        let runner = RecordingRunner::failing("bad");
        let mut manifest = CommandManifest::default();
        assert!(run(&graph, &[top_id], &mut manifest, &runner).is_err());

        assert!(!runner.log().contains(&"top".to_owned()));
        // `good` ran on another worker; if it finished it is recorded.
        if good.exists() {
            assert!(manifest.commands.contains_key(&good));
        }
        assert!(!manifest.commands.contains_key(&bad));
    }

    #[test]
    fn tool_without_output_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let mut graph = TaskGraph::new();
        let id = graph.add(tool_node("ghost", &tmp.path().join("ghost.o"), &[])).unwrap();
        let runner = RecordingRunner {
            skip_output: Some("ghost"),
            ..RecordingRunner::default()
        };

        let err = run(&graph, &[id], &mut CommandManifest::default(), &runner).unwrap_err();
        let build_err = err.downcast_ref::<BuildError>().unwrap();
        assert!(matches!(build_err, BuildError::NoOutput { .. }));
        assert_eq!(build_err.kind(), ErrorKind::ToolInvocation);
    }

    #[test]
    fn missing_leaf_is_resolution_error() {
        let tmp = tempfile::tempdir().unwrap();
        let mut graph = TaskGraph::new();
        let id = graph
            .add(tool_node("a", &tmp.path().join("a.o"), &[&tmp.path().join("gone.rs")]))
            .unwrap();

        let err = schedule(&graph, &[id]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::MissingSource { needed_by, .. }) if needed_by == "a"
        ));
    }

    #[test]
    fn cycle_is_detected_before_running() {
        let tmp = tempfile::tempdir().unwrap();
        let x = tmp.path().join("x.a");
        let y = tmp.path().join("y.a");
        let mut graph = TaskGraph::new();
        let a = graph.add(tool_node("a", &x, &[&y])).unwrap();
        graph.add(tool_node("b", &y, &[&x])).unwrap();

        let runner = RecordingRunner::default();
        let err = run(&graph, &[a], &mut CommandManifest::default(), &runner).unwrap_err();
        assert_eq!(err.downcast_ref::<BuildError>().unwrap().kind(), ErrorKind::Resolution);
        assert!(err.to_string().contains("a, b"));
        assert!(runner.log().is_empty());
    }

    #[test]
    fn prediction_propagates_downstream() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("a.rs");
        let obj = tmp.path().join("a.o");
        let elf = tmp.path().join("a.elf");
        write(&obj, "", 100);
        write(&src, "", 50);
        write(&elf, "", 10);

        let mut graph = TaskGraph::new();
        let obj_id = graph.add(tool_node("obj", &obj, &[&src])).unwrap();
        let elf_id = graph.add(tool_node("elf", &elf, &[&obj])).unwrap();
        let plan = schedule(&graph, &[elf_id]).unwrap();
        let states = predict(&graph, &plan, &CommandManifest::default(), false);

        assert_eq!(states.len(), 2);
        assert_eq!(states[0].0, obj_id);
        assert!(states[0].1.is_stale());
        assert!(matches!(&states[1].1, NodeState::Stale(reason) if reason.ends_with("was rebuilt")));
    }

    #[test]
    fn compile_then_link_end_to_end() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = Layout::new(tmp.path());
        write(&tmp.path().join("app.rs"), "fn main() {}\n", 100);
        write(&tmp.path().join("link.ld"), "SECTIONS {}\n", 100);

        let mut registry = Registry::new(layout.clone());
        registry
            .register(&RuleDecl {
                name: "A".into(),
                kind: RuleKind::RustCompile,
                produce: "app.o".into(),
                source: Some(DepRef::Path("app.rs".into())),
                deps: Vec::new(),
                script: None,
                options: RuleOptions::default(),
            })
            .unwrap();
        registry
            .register(&RuleDecl {
                name: "B".into(),
                kind: RuleKind::Link,
                produce: "app.elf".into(),
                source: None,
                deps: vec![DepRef::Rule("A".into()), DepRef::Path("link.ld".into())],
                script: Some(DepRef::Path("link.ld".into())),
                options: RuleOptions::default(),
            })
            .unwrap();

        let flags = Flags {
            opt_level: "2".into(),
            ..Flags::default()
        };
        let toolchain = Toolchain::default();
        let mut resolver = DependencyResolver::new();
        let mut identities = CrateIdentityCache::new();
        let graph = GraphBuilder::new(&layout, &flags, &toolchain, &mut resolver, &mut identities)
            .build(&registry, "app")
            .unwrap();
        let b = graph.find_target("B", &layout).unwrap();

        let link = graph.node(b);
        let script = tmp.path().join("link.ld");
        assert!(link.prerequisites.contains(&script));
        let Action::Tool(cmd) = &link.action else { panic!("expected tool") };
        let script_arg = script.to_string_lossy().into_owned();
        assert_eq!(cmd.args.iter().filter(|a| **a == script_arg).count(), 1);
        let t = cmd.args.iter().position(|a| a == "-T").unwrap();
        assert_eq!(cmd.args[t + 1], script_arg);

        let runner = RecordingRunner::default();
        let summary = run(&graph, &[b], &mut CommandManifest::default(), &runner).unwrap();
        assert_eq!(runner.log(), ["A", "B"]);
        assert_eq!(summary.considered, 2);
    }
}

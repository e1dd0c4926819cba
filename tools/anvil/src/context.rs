//! Build state for one invocation.
//!
//! A [`BuildContext`] is assembled once: configuration is loaded, the
//! selection validated, flags computed, the build script evaluated and
//! every rule registered. After that the registry is read-only; the
//! identity cache and dependency resolver memoize lookups for the rest of
//! the run.

use std::path::{Path, PathBuf};

use anvil_modscan::DependencyResolver;
use anyhow::Result;

use crate::config::{self, Flags, ProjectConfig, Selection};
use crate::engine::{self, ScriptEnv};
use crate::error::BuildError;
use crate::graph::{GraphBuilder, TaskGraph};
use crate::identity::CrateIdentityCache;
use crate::layout::Layout;
use crate::registry::Registry;
use crate::verbose::{Timer, vprintln};

/// What to select when loading a context.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOptions<'a> {
    /// Requested platform.
    pub platform: Option<&'a str>,
    /// Requested application.
    pub app: Option<&'a str>,
    /// Debug build.
    pub debug: bool,
    /// Prepare the build directory (purge on platform change, write the
    /// platform marker). Read-only commands leave it untouched.
    pub prepare: bool,
}

/// Everything a build needs, constructed once per invocation.
pub struct BuildContext {
    /// Project layout.
    pub layout: Layout,
    /// Parsed `anvil.toml`.
    pub config: ProjectConfig,
    /// Validated platform and application.
    pub selection: Selection,
    /// Flags for the selection.
    pub flags: Flags,
    /// Rules declared by the build script.
    pub registry: Registry,
    /// Output of the script's default target, if it declared one.
    pub default_target: Option<PathBuf>,
    /// Crate identities resolved so far, shared by `rlib_name()` and the
    /// graph builder.
    pub identities: CrateIdentityCache,
    /// Module scans performed so far.
    pub resolver: DependencyResolver,
}

impl BuildContext {
    /// Load configuration and evaluate the build script for the project at
    /// `root`.
    pub fn load(root: &Path, opts: &LoadOptions<'_>) -> Result<Self> {
        let _t = Timer::start("load");
        let layout = Layout::new(root);
        let config = config::load(root)?;
        let selection = config::select(&config, &layout, opts.platform, opts.app, opts.debug)?;
        let flags = config::compute_flags(&config, &selection)?;
        vprintln!(
            "  platform {} ({}), app {}, opt-level {}",
            selection.platform,
            selection.arch,
            selection.app,
            flags.opt_level
        );

        if opts.prepare {
            config::prepare_build_dir(&layout, &selection.platform)?;
        }

        let env = ScriptEnv {
            layout: layout.clone(),
            platform: selection.platform.clone(),
            app: selection.app.clone(),
        };
        let script_path = layout.resolve(&config.build.script);
        let mut identities = CrateIdentityCache::new();
        let script = engine::evaluate_script(&script_path, &env, &mut identities)?;
        let registry = Registry::from_script(layout.clone(), &script)?;
        let default_target = script
            .default_target
            .as_ref()
            .map(|target| registry.resolve(target, "default_target"))
            .transpose()?;
        vprintln!(
            "  {} rules declared by {}",
            registry.len(),
            layout.display(&script_path)
        );

        Ok(Self {
            layout,
            config,
            selection,
            flags,
            registry,
            default_target,
            identities,
            resolver: DependencyResolver::new(),
        })
    }

    /// Build the task graph for every registered rule.
    pub fn build_graph(&mut self) -> Result<TaskGraph> {
        let _t = Timer::start("graph");
        let graph = GraphBuilder::new(
            &self.layout,
            &self.flags,
            &self.config.toolchain,
            &mut self.resolver,
            &mut self.identities,
        )
        .build(&self.registry, &self.selection.app)?;
        vprintln!(
            "  {} nodes, {} source files scanned",
            graph.len(),
            self.resolver.scanned_files()
        );
        Ok(graph)
    }

    /// Node ids for command-line targets.
    ///
    /// With no names given, the script's default target is used; without
    /// one, every rule.
    pub fn targets(&self, graph: &TaskGraph, names: &[String]) -> Result<Vec<usize>> {
        if !names.is_empty() {
            return names
                .iter()
                .map(|name| graph.find_target(name, &self.layout))
                .collect();
        }
        if let Some(output) = &self.default_target {
            let id = graph.producer_of(output).ok_or_else(|| {
                BuildError::UnknownTarget(self.layout.display(output).to_string())
            })?;
            return Ok(vec![id]);
        }
        Ok(graph
            .nodes()
            .iter()
            .enumerate()
            .filter(|(_, node)| node.kind.is_some())
            .map(|(id, _)| id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, kind_of};
    use std::fs;

    const CONFIG: &str = r#"
[toolchain]
prefix = "arm-none-eabi"

[arch.cortex_m3]
target = "thumbv7m-none-eabi"
cpu = "cortex-m3"

[platforms.lpc17xx]
arch = "cortex_m3"
config = "mcu_lpc17xx"
"#;

    const SCRIPT: &str = r#"
provide_stdlibs();
compile_rust("app", #{ produce: build_dir("app.o"), source: app_source(), deps: app_marker() });
link_binary("image", #{
    produce: build_dir(app_name() + ".elf"),
    deps: [rule("app"), rule("librustrt")],
    script: platform_dir("layout.ld"),
});
make_binary("bin", #{ produce: build_dir(app_name() + ".bin"), source: rule("image") });
default_target(rule("bin"));
"#;

    fn project() -> tempfile::TempDir {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        fs::write(root.join("anvil.toml"), CONFIG).unwrap();
        fs::write(root.join("anvil.rhai"), SCRIPT).unwrap();
        fs::create_dir_all(root.join("apps")).unwrap();
        fs::write(root.join("apps/blink.rs"), "mod pins;\n").unwrap();
        fs::write(root.join("apps/pins.rs"), "").unwrap();
        fs::create_dir_all(root.join("src/hal/lpc17xx")).unwrap();
        fs::write(root.join("src/hal/lpc17xx/layout.ld"), "").unwrap();
        tmp
    }

    fn opts(prepare: bool) -> LoadOptions<'static> {
        LoadOptions {
            platform: Some("lpc17xx"),
            app: Some("blink"),
            debug: false,
            prepare,
        }
    }

    #[test]
    fn loads_and_builds_graph() {
        let tmp = project();
        let mut ctx = BuildContext::load(tmp.path(), &opts(true)).unwrap();
        assert_eq!(ctx.registry.len(), 5);
        assert!(tmp.path().join("build/intermediate").is_dir());

        let graph = ctx.build_graph().unwrap();
        // Fingerprint node plus one per rule.
        assert_eq!(graph.len(), 6);

        let targets = ctx.targets(&graph, &[]).unwrap();
        assert_eq!(targets, [graph.find_target("bin", &ctx.layout).unwrap()]);

        let app = graph.node(graph.find_target("app", &ctx.layout).unwrap());
        assert!(app.prerequisites.contains(&tmp.path().join("apps/pins.rs")));
        assert!(app.prerequisites.contains(&tmp.path().join("build/.app")));
    }

    #[test]
    fn explicit_targets_and_all_rules() {
        let tmp = project();
        let mut ctx = BuildContext::load(tmp.path(), &opts(false)).unwrap();
        assert!(!tmp.path().join("build").exists());

        let graph = ctx.build_graph().unwrap();
        let named = ctx
            .targets(&graph, &["image".to_owned(), "build/blink.bin".to_owned()])
            .unwrap();
        assert_eq!(named.len(), 2);

        ctx.default_target = None;
        assert_eq!(ctx.targets(&graph, &[]).unwrap().len(), 5);
    }

    #[test]
    fn script_and_graph_share_identities() {
        let tmp = project();
        fs::write(tmp.path().join("src/lib.rs"), "#![crate_id = \"zinc#0.1\"]\n").unwrap();
        fs::write(
            tmp.path().join("anvil.rhai"),
            r#"
            compile_rust("zinc", #{
                produce: build_dir(rlib_name(source_dir("lib.rs"))),
                source: source_dir("lib.rs"),
                crate_type: "lib",
                out_dir: true,
            });
            "#,
        )
        .unwrap();

        let mut ctx = BuildContext::load(tmp.path(), &opts(false)).unwrap();
        assert_eq!(ctx.identities.len(), 1);
        let graph = ctx.build_graph().unwrap();
        assert_eq!(ctx.identities.len(), 1);
        let zinc = graph.node(graph.find_target("zinc", &ctx.layout).unwrap());
        assert_eq!(zinc.output, tmp.path().join("build/libzinc-c95b9298-0.1.rlib"));
    }

    #[test]
    fn selection_errors_precede_script() {
        let tmp = project();
        fs::write(tmp.path().join("anvil.rhai"), "this is not rhai").unwrap();

        let err = BuildContext::load(
            tmp.path(),
            &LoadOptions {
                platform: Some("stm32"),
                ..opts(true)
            },
        )
        .err()
        .unwrap();
        assert_eq!(kind_of(&err), Some(ErrorKind::Configuration));
        assert!(err.to_string().contains("undefined platform stm32"));
        assert!(!tmp.path().join("build").exists());
    }
}

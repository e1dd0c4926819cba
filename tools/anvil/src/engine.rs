//! Rhai scripting engine for build rules.
//!
//! Sets up a Rhai engine with one declaration function per artifact kind
//! plus path and identity helpers, evaluates `anvil.rhai`, and produces a
//! [`BuildScript`]. Declarations are collected in evaluation order; symbolic
//! references are left for the registry to resolve.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Result, anyhow};
use rhai::{Array, Dynamic, Engine, EvalAltResult, Map};

use crate::error::BuildError;
use crate::identity::CrateIdentityCache;
use crate::layout::Layout;
use crate::model::{BuildScript, DepRef, RuleDecl, RuleKind, RuleOptions};
use crate::verbose::vprintln;

/// State shared between the engine's registered closures.
type Shared<T> = Arc<Mutex<T>>;

type ScriptResult<T> = Result<T, Box<EvalAltResult>>;

/// Empty archives the Rust runtime expects to link against.
const STDLIBS: [(&str, &str); 2] = [
    ("librustrt", "build/librustrt.a"),
    ("libbacktrace", "build/libbacktrace.a"),
];

/// The selection a script is evaluated for.
#[derive(Debug, Clone)]
pub struct ScriptEnv {
    /// Project layout.
    pub layout: Layout,
    /// Selected platform.
    pub platform: String,
    /// Selected application.
    pub app: String,
}

/// Evaluate the build script at `path`.
///
/// `identities` backs the `rlib_name()` helper; names it resolves stay
/// memoized for the graph builder.
pub fn evaluate_script(
    path: &Path,
    env: &ScriptEnv,
    identities: &mut CrateIdentityCache,
) -> Result<BuildScript> {
    let script = Arc::new(Mutex::new(BuildScript::default()));
    let shared = Arc::new(Mutex::new(std::mem::take(identities)));
    let mut engine = Engine::new();
    engine.set_max_expr_depths(64, 64);

    engine
        .register_type_with_name::<DepRef>("DepRef")
        .register_fn("to_string", |dep: &mut DepRef| dep.to_string());
    register_rule_api(&mut engine, &script);
    register_helpers(&mut engine, env, &shared);

    let invalid = |message: String| BuildError::InvalidConfig {
        path: path.to_path_buf(),
        message,
    };
    let ast = engine
        .compile_file(path.to_path_buf())
        .map_err(|e| invalid(e.to_string()))?;
    engine
        .run_ast(&ast)
        .map_err(|e| invalid(e.to_string()))?;

    // Drop the engine to release all Arc references held by closures.
    drop(engine);

    *identities = into_inner(shared, "identity cache")?;
    vprintln!("  {} crate identities resolved", identities.len());
    into_inner(script, "build script")
}

fn into_inner<T>(shared: Shared<T>, what: &str) -> Result<T> {
    Arc::try_unwrap(shared)
        .map_err(|_| anyhow!("{what} still referenced after script evaluation"))?
        .into_inner()
        .map_err(|e| anyhow!("poisoned mutex: {e}"))
}

/// A closure that panicked mid-update already aborted evaluation.
fn lock<T>(shared: &Mutex<T>) -> MutexGuard<'_, T> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Rule declarations
// ---------------------------------------------------------------------------

fn register_rule_api(engine: &mut Engine, script: &Shared<BuildScript>) {
    for kind in [
        RuleKind::RustCompile,
        RuleKind::CCompile,
        RuleKind::Link,
        RuleKind::Listing,
        RuleKind::Binary,
    ] {
        let script = Arc::clone(script);
        engine.register_fn(kind.function(), move |name: &str, opts: Map| -> ScriptResult<()> {
            let decl = rule_decl(kind, name, opts)?;
            lock(&script).rules.push(decl);
            Ok(())
        });
    }

    let s = Arc::clone(script);
    engine.register_fn("provide_stdlibs", move || {
        let mut script = lock(&s);
        for (name, produce) in STDLIBS {
            script.rules.push(RuleDecl {
                name: name.into(),
                kind: RuleKind::Archive,
                produce: produce.into(),
                source: None,
                deps: Vec::new(),
                script: None,
                options: RuleOptions::default(),
            });
        }
    });

    let s = Arc::clone(script);
    engine.register_fn("default_target", move |target: &str| {
        lock(&s).default_target = Some(DepRef::Path(target.into()));
    });
    let s = Arc::clone(script);
    engine.register_fn("default_target", move |target: DepRef| {
        lock(&s).default_target = Some(target);
    });

    engine.register_fn("rule", |name: &str| DepRef::Rule(name.into()));
}

/// Build a declaration from a script option map.
fn rule_decl(kind: RuleKind, name: &str, opts: Map) -> ScriptResult<RuleDecl> {
    let call = format!("{}({name})", kind.function());
    let mut produce = None;
    let mut decl = RuleDecl {
        name: name.into(),
        kind,
        produce: PathBuf::new(),
        source: None,
        deps: Vec::new(),
        script: None,
        options: RuleOptions::default(),
    };

    for (key, value) in opts {
        let key = key.as_str();
        match key {
            "produce" => produce = Some(PathBuf::from(string(value, &call, key)?)),
            "source" => decl.source = Some(dep_ref(value, &call, key)?),
            "deps" => decl.deps = dep_list(value, &call)?,
            "script" => decl.script = Some(dep_ref(value, &call, key)?),
            "crate_type" => decl.options.crate_type = Some(string(value, &call, key)?),
            "optimize" => decl.options.optimize = Some(opt_level(value, &call)?),
            "lto" => decl.options.lto = boolean(&value, &call, key)?,
            "llvm_pass" => decl.options.llvm_pass = Some(string(value, &call, key)?),
            "ignore_warnings" => decl.options.ignore_warnings = string_list(value, &call, key)?,
            "out_dir" => decl.options.out_dir = boolean(&value, &call, key)?,
            other => return Err(format!("{call}: unknown option `{other}`").into()),
        }
    }

    decl.produce = produce.ok_or_else(|| format!("{call} requires `produce`"))?;
    Ok(decl)
}

fn mismatch(call: &str, key: &str, expected: &str, value: &Dynamic) -> Box<EvalAltResult> {
    format!("{call}: `{key}` must be {expected}, got {}", value.type_name()).into()
}

fn string(value: Dynamic, call: &str, key: &str) -> ScriptResult<String> {
    if value.is_string() {
        Ok(value.into_string()?)
    } else {
        Err(mismatch(call, key, "a string", &value))
    }
}

fn boolean(value: &Dynamic, call: &str, key: &str) -> ScriptResult<bool> {
    value
        .as_bool()
        .map_err(|_| mismatch(call, key, "a boolean", value))
}

/// `optimize` accepts `2` as well as `"s"`.
fn opt_level(value: Dynamic, call: &str) -> ScriptResult<String> {
    match value.as_int() {
        Ok(level) => Ok(level.to_string()),
        Err(_) => string(value, call, "optimize"),
    }
}

fn string_list(value: Dynamic, call: &str, key: &str) -> ScriptResult<Vec<String>> {
    if value.is_array() {
        value
            .cast::<Array>()
            .into_iter()
            .map(|item| string(item, call, key))
            .collect()
    } else {
        Ok(vec![string(value, call, key)?])
    }
}

/// A path string or a `rule("name")` reference.
fn dep_ref(value: Dynamic, call: &str, key: &str) -> ScriptResult<DepRef> {
    if value.is::<DepRef>() {
        Ok(value.cast::<DepRef>())
    } else if value.is_string() {
        Ok(DepRef::Path(value.into_string()?.into()))
    } else {
        Err(mismatch(call, key, "a path or rule()", &value))
    }
}

/// `deps` takes a single reference or an array of them.
fn dep_list(value: Dynamic, call: &str) -> ScriptResult<Vec<DepRef>> {
    if value.is_array() {
        value
            .cast::<Array>()
            .into_iter()
            .map(|item| dep_ref(item, call, "deps"))
            .collect()
    } else {
        Ok(vec![dep_ref(value, call, "deps")?])
    }
}

// ---------------------------------------------------------------------------
// Helper functions available in scripts
// ---------------------------------------------------------------------------

fn register_helpers(engine: &mut Engine, env: &ScriptEnv, identities: &Shared<CrateIdentityCache>) {
    // Directory helpers come in two forms: `build_dir()` and
    // `build_dir("app.o")`.
    let dirs: [(&str, PathBuf); 5] = [
        ("root_dir", env.layout.root().to_path_buf()),
        ("source_dir", env.layout.source_dir()),
        ("build_dir", env.layout.build_dir()),
        ("intermediate_dir", env.layout.intermediate_dir()),
        ("platform_dir", env.layout.platform_dir(&env.platform)),
    ];
    for (name, dir) in dirs {
        let base = dir.clone();
        engine.register_fn(name, move || path_string(&base));
        engine.register_fn(name, move |rel: &str| path_string(&dir.join(rel)));
    }

    let app = env.app.clone();
    engine.register_fn("app_name", move || app.clone());
    let platform = env.platform.clone();
    engine.register_fn("platform_name", move || platform.clone());
    let app_source = env.layout.app_source(&env.app);
    engine.register_fn("app_source", move || path_string(&app_source));
    let app_marker = env.layout.app_marker();
    engine.register_fn("app_marker", move || path_string(&app_marker));

    // rlib_name("src/lib.rs") -> "libzinc-c95b9298-0.1.rlib"
    let layout = env.layout.clone();
    let cache = Arc::clone(identities);
    engine.register_fn("rlib_name", move |path: &str| -> ScriptResult<String> {
        lock(&cache)
            .identity_for(&layout.resolve(path))
            .map_err(|e| format!("rlib_name({path}): {e:#}").into())
    });

    // env("VAR") -> string
    engine.register_fn("env", |var: &str| -> String {
        std::env::var(var).unwrap_or_default()
    });
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

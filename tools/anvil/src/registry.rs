//! Build rule registry.
//!
//! Rules are registered in script order. Symbolic references are rewritten to
//! the referenced rule's output path at registration time, so a reference
//! must name a rule declared earlier.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Result;
use serde::Serialize;

use crate::error::BuildError;
use crate::layout::Layout;
use crate::model::{BuildScript, DepRef, RuleDecl, RuleKind, RuleOptions};
use crate::verbose::wprintln;

/// A registered rule: every reference is an absolute path.
#[derive(Debug, Clone, Serialize)]
pub struct Rule {
    /// Symbolic name.
    pub name: String,
    /// Artifact kind.
    pub kind: RuleKind,
    /// Output path.
    pub produce: PathBuf,
    /// Primary input.
    pub source: Option<PathBuf>,
    /// Extra prerequisites, in declaration order.
    pub deps: Vec<PathBuf>,
    /// Linker script.
    pub script: Option<PathBuf>,
    /// Tool options.
    pub options: RuleOptions,
}

/// Append-only rule table keyed by symbolic name.
#[derive(Debug)]
pub struct Registry {
    layout: Layout,
    rules: Vec<Rule>,
    index: HashMap<String, usize>,
}

impl Registry {
    /// Empty registry resolving paths against `layout`.
    pub fn new(layout: Layout) -> Self {
        Self {
            layout,
            rules: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Register every rule of an evaluated script, in order.
    pub fn from_script(layout: Layout, script: &BuildScript) -> Result<Self> {
        let mut registry = Self::new(layout);
        for decl in &script.rules {
            registry.register(decl)?;
        }
        Ok(registry)
    }

    /// Resolve and store one declaration.
    ///
    /// Re-registering a name replaces the earlier rule in place and logs a
    /// warning.
    pub fn register(&mut self, decl: &RuleDecl) -> Result<()> {
        let function = decl.kind.function();
        let needs_source = !matches!(decl.kind, RuleKind::Link | RuleKind::Archive);
        if needs_source && decl.source.is_none() {
            return Err(missing_field(decl, function, "source"));
        }
        if decl.kind == RuleKind::Link && decl.script.is_none() {
            return Err(missing_field(decl, function, "script"));
        }

        let resolve = |dep: &DepRef| self.resolve(dep, &decl.name);
        let rule = Rule {
            name: decl.name.clone(),
            kind: decl.kind,
            produce: self.layout.resolve(&decl.produce),
            source: decl.source.as_ref().map(resolve).transpose()?,
            deps: decl.deps.iter().map(resolve).collect::<Result<_>>()?,
            script: decl.script.as_ref().map(resolve).transpose()?,
            options: decl.options.clone(),
        };

        if let Some(&slot) = self.index.get(&rule.name) {
            wprintln!(
                "rule {} declared more than once; the later declaration replaces the earlier one",
                rule.name
            );
            self.rules[slot] = rule;
        } else {
            self.index.insert(rule.name.clone(), self.rules.len());
            self.rules.push(rule);
        }
        Ok(())
    }

    /// Rule registered under `name`.
    pub fn lookup(&self, name: &str) -> Option<&Rule> {
        self.index.get(name).map(|&i| &self.rules[i])
    }

    /// Path a reference stands for. Rule references must already be
    /// registered.
    pub fn resolve(&self, dep: &DepRef, referenced_by: &str) -> Result<PathBuf> {
        match dep {
            DepRef::Rule(name) => self
                .lookup(name)
                .map(|rule| rule.produce.clone())
                .ok_or_else(|| {
                    BuildError::MissingRule {
                        name: name.clone(),
                        referenced_by: referenced_by.to_owned(),
                    }
                    .into()
                }),
            DepRef::Path(path) => Ok(self.layout.resolve(path)),
        }
    }

    /// Registered rules, in first-registration order.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Number of registered rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }
}

fn missing_field(decl: &RuleDecl, function: &'static str, field: &'static str) -> anyhow::Error {
    BuildError::MissingField {
        rule: decl.name.clone(),
        function,
        field,
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn decl(name: &str, kind: RuleKind, produce: &str) -> RuleDecl {
        RuleDecl {
            name: name.into(),
            kind,
            produce: produce.into(),
            source: None,
            deps: Vec::new(),
            script: None,
            options: RuleOptions::default(),
        }
    }

    fn compile(name: &str, produce: &str, source: &str) -> RuleDecl {
        RuleDecl {
            source: Some(DepRef::Path(source.into())),
            ..decl(name, RuleKind::RustCompile, produce)
        }
    }

    #[test]
    fn symbolic_deps_become_output_paths() {
        let mut registry = Registry::new(Layout::new("/p"));
        registry.register(&compile("app", "build/app.o", "apps/app.rs")).unwrap();
        registry
            .register(&RuleDecl {
                deps: vec![DepRef::Rule("app".into()), DepRef::Path("link.ld".into())],
                script: Some(DepRef::Path("link.ld".into())),
                ..decl("image", RuleKind::Link, "build/app.elf")
            })
            .unwrap();

        let image = registry.lookup("image").unwrap();
        assert_eq!(image.produce, Path::new("/p/build/app.elf"));
        assert_eq!(image.deps, [PathBuf::from("/p/build/app.o"), PathBuf::from("/p/link.ld")]);
        assert_eq!(image.script.as_deref(), Some(Path::new("/p/link.ld")));
    }

    #[test]
    fn forward_reference_is_missing_rule() {
        let mut registry = Registry::new(Layout::new("/p"));
        let err = registry
            .register(&RuleDecl {
                deps: vec![DepRef::Rule("later".into())],
                ..compile("app", "build/app.o", "apps/app.rs")
            })
            .unwrap_err();

        match err.downcast_ref::<BuildError>() {
            Some(BuildError::MissingRule { name, referenced_by }) => {
                assert_eq!(name, "later");
                assert_eq!(referenced_by, "app");
            }
            other => panic!("expected MissingRule, got {other:?}"),
        }
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn redeclaration_replaces_in_place() {
        let mut registry = Registry::new(Layout::new("/p"));
        registry.register(&compile("a", "build/a.o", "a.rs")).unwrap();
        registry.register(&compile("b", "build/b.o", "b.rs")).unwrap();
        registry.register(&compile("a", "build/a2.o", "a.rs")).unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.rules()[0].name, "a");
        assert_eq!(registry.lookup("a").unwrap().produce, Path::new("/p/build/a2.o"));
    }

    #[test]
    fn required_fields() {
        let mut registry = Registry::new(Layout::new("/p"));
        let err = registry
            .register(&decl("app", RuleKind::RustCompile, "build/app.o"))
            .unwrap_err();
        assert_eq!(err.to_string(), "compile_rust(app) requires `source`");

        let err = registry
            .register(&decl("image", RuleKind::Link, "build/app.elf"))
            .unwrap_err();
        assert_eq!(err.to_string(), "link_binary(image) requires `script`");

        registry
            .register(&decl("rt", RuleKind::Archive, "build/librustrt.a"))
            .unwrap();
    }
}

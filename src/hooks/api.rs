//! Interface offered to hook functions.

use std::path::PathBuf;

use anyhow::Result;

use crate::depend::graph::ModuleGraph;
use crate::hooks::files::HookFile;
use crate::hooks::parser::Literal;

/// Everything a hook asked for, applied by the engine afterwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HookEffects {
    pub added_imports: Vec<String>,
    pub removed_imports: Vec<String>,
    pub datas: Vec<HookFile>,
    pub binaries: Vec<HookFile>,
    pub attrs: Vec<(String, Literal)>,
}

impl HookEffects {
    pub fn is_empty(&self) -> bool {
        self.added_imports.is_empty()
            && self.removed_imports.is_empty()
            && self.datas.is_empty()
            && self.binaries.is_empty()
            && self.attrs.is_empty()
    }
}

/// View of the hooked module handed to a [`HookFunction`].
///
/// The graph is read-only here; requested changes are collected and
/// applied once the function returns.
pub struct HookApi<'g> {
    module: String,
    graph: &'g dyn ModuleGraph,
    effects: HookEffects,
}

impl<'g> HookApi<'g> {
    pub fn new(module: impl Into<String>, graph: &'g dyn ModuleGraph) -> Self {
        HookApi {
            module: module.into(),
            graph,
            effects: HookEffects::default(),
        }
    }

    /// Name of the hooked module.
    pub fn module_name(&self) -> &str {
        &self.module
    }

    /// Modules the hooked module currently imports.
    pub fn imports(&self) -> Vec<String> {
        self.graph.imports_of(&self.module)
    }

    pub fn add_imports<S: AsRef<str>>(&mut self, names: &[S]) {
        self.effects
            .added_imports
            .extend(names.iter().map(|n| n.as_ref().to_string()));
    }

    pub fn del_imports<S: AsRef<str>>(&mut self, names: &[S]) {
        self.effects
            .removed_imports
            .extend(names.iter().map(|n| n.as_ref().to_string()));
    }

    /// Add data files as `(destination name, source path)`.
    pub fn add_datas(&mut self, files: impl IntoIterator<Item = (String, PathBuf)>) {
        self.effects.datas.extend(files);
    }

    /// Add binaries as `(destination name, source path)`.
    pub fn add_binaries(&mut self, files: impl IntoIterator<Item = (String, PathBuf)>) {
        self.effects.binaries.extend(files);
    }

    /// Record an attribute for the hooked module.
    pub fn set_attr(&mut self, name: impl Into<String>, value: Literal) {
        self.effects.attrs.push((name.into(), value));
    }

    pub fn into_effects(self) -> HookEffects {
        self.effects
    }
}

/// The `hook(hook_api)` function of a hook script.
pub trait HookFunction: Send + Sync {
    fn call(&self, api: &mut HookApi<'_>) -> Result<()>;
}

//! Running one hook script against the graph.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::builder::errors::BuildWarning;
use crate::depend::graph::{GraphError, ModuleGraph};
use crate::hooks::api::{HookApi, HookFunction};
use crate::hooks::files::{format_binaries_and_datas, HookFile};
use crate::hooks::parser::{Literal, StaticHook};

/// Files and attributes one hook contributed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HookOutcome {
    pub binaries: Vec<HookFile>,
    pub datas: Vec<HookFile>,
    pub attrs: Vec<(String, Literal)>,
    pub warnings: Vec<BuildWarning>,
}

/// A hook script bound to the module it hooks.
pub struct ImportHook {
    module: String,
    hook: StaticHook,
    function: Option<Arc<dyn HookFunction>>,
}

impl ImportHook {
    /// Read the hook script at `path` for `module`.
    pub fn load(
        module: impl Into<String>,
        path: &Path,
        function: Option<Arc<dyn HookFunction>>,
    ) -> Result<Self> {
        tracing::info!(
            "Processing hook   {}",
            path.file_name().unwrap_or(path.as_os_str()).to_string_lossy()
        );
        Ok(ImportHook {
            module: module.into(),
            hook: StaticHook::load(path)?,
            function,
        })
    }

    pub fn new(
        module: impl Into<String>,
        hook: StaticHook,
        function: Option<Arc<dyn HookFunction>>,
    ) -> Self {
        ImportHook {
            module: module.into(),
            hook,
            function,
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    /// Apply the hook: its function first, then hidden imports, datas,
    /// binaries and attributes.
    pub fn update_dependencies(&self, graph: &mut dyn ModuleGraph) -> Result<HookOutcome> {
        let mut outcome = HookOutcome::default();
        let base = self.hook.path.parent().unwrap_or(Path::new("."));

        match &self.function {
            Some(function) => self.process_hook_function(function.as_ref(), graph, &mut outcome)?,
            None if self.hook.has_hook_function => {
                tracing::warn!(
                    "hook {} defines hook() but no function is registered for it; skipping",
                    self.hook.path.display()
                );
            }
            None => {}
        }

        if let Some(hidden) = &self.hook.hiddenimports {
            for item in hidden {
                self.process_one_hiddenimport(item, graph, &mut outcome);
            }
        }
        if let Some(datas) = &self.hook.datas {
            outcome.datas.extend(
                format_binaries_and_datas(datas, base)
                    .with_context(|| format!("in hook {}", self.hook.path.display()))?,
            );
        }
        if let Some(binaries) = &self.hook.binaries {
            outcome.binaries.extend(
                format_binaries_and_datas(binaries, base)
                    .with_context(|| format!("in hook {}", self.hook.path.display()))?,
            );
        }
        if let Some(attrs) = &self.hook.attrs {
            // Recorded only; module attributes are not rewritten.
            tracing::debug!("hook for `{}` declares {} attrs", self.module, attrs.len());
            outcome.attrs.extend(attrs.iter().cloned());
        }
        Ok(outcome)
    }

    fn process_hook_function(
        &self,
        function: &dyn HookFunction,
        graph: &mut dyn ModuleGraph,
        outcome: &mut HookOutcome,
    ) -> Result<()> {
        let effects = {
            let mut api = HookApi::new(&self.module, &*graph);
            function
                .call(&mut api)
                .with_context(|| format!("hook function of {} failed", self.hook.path.display()))?;
            api.into_effects()
        };

        outcome.datas.extend(effects.datas);
        outcome.binaries.extend(effects.binaries);
        outcome.attrs.extend(effects.attrs);
        for item in &effects.added_imports {
            self.process_one_hiddenimport(item, graph, outcome);
        }
        for item in &effects.removed_imports {
            if graph.remove_reference(&self.module, item) {
                tracing::debug!("removed import of `{}` from `{}`", item, self.module);
            }
        }
        Ok(())
    }

    fn process_one_hiddenimport(
        &self,
        item: &str,
        graph: &mut dyn ModuleGraph,
        outcome: &mut HookOutcome,
    ) {
        match graph.import_module(&self.module, item) {
            Ok(_) => {}
            Err(GraphError::ModuleNotFound { .. }) => {
                let warning = BuildWarning::StaleHook {
                    module: self.module.clone(),
                    import: item.to_string(),
                };
                warning.emit();
                outcome.warnings.push(warning);
            }
        }
    }
}

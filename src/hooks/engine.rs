//! Hook engine.
//!
//! Owns the hook registries for one build: the discovered scripts, the
//! excluded-imports table (complete before any hook runs) and the files
//! hooks contributed. Hooks run for every hooked module present in the
//! graph; modules pulled in by a hook get their own hooks run in a later
//! pass, so each module's hooks run exactly once.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;

use crate::builder::errors::BuildWarning;
use crate::core::toc::{EntryKind, Toc, TocEntry};
use crate::depend::graph::ModuleGraph;
use crate::hooks::api::HookFunction;
use crate::hooks::cache::HooksCache;
use crate::hooks::excluded::ExcludedImports;
use crate::hooks::files::AdditionalFilesCache;
use crate::hooks::import_hook::ImportHook;
use crate::hooks::parser::Literal;
use crate::util::fs::absolute;

pub struct HookEngine {
    cache: HooksCache,
    excluded: ExcludedImports,
    functions: HashMap<PathBuf, Arc<dyn HookFunction>>,
    files: AdditionalFilesCache,
    attrs: BTreeMap<String, Vec<(String, Literal)>>,
    warnings: Vec<BuildWarning>,
}

impl HookEngine {
    /// Set up an engine for `cache`, reading every excluded import.
    pub fn new(cache: HooksCache) -> Result<Self> {
        let excluded = ExcludedImports::new(&cache)?;
        Ok(HookEngine {
            cache,
            excluded,
            functions: HashMap::new(),
            files: AdditionalFilesCache::new(),
            attrs: BTreeMap::new(),
            warnings: Vec::new(),
        })
    }

    /// Built-in directories are scanned before user directories.
    pub fn from_dirs(builtin: &[PathBuf], user: &[PathBuf]) -> Result<Self> {
        let mut cache = HooksCache::from_dirs(builtin);
        cache.add_custom_paths(user);
        HookEngine::new(cache)
    }

    /// Supply the `hook()` function of the script at `script`.
    pub fn register_function(&mut self, script: &Path, function: Arc<dyn HookFunction>) {
        self.functions.insert(absolute(script), function);
    }

    pub fn hooks(&self) -> &HooksCache {
        &self.cache
    }

    pub fn excluded_imports(&self) -> &ExcludedImports {
        &self.excluded
    }

    /// Run the hooks of every hooked module in `graph`.
    pub fn run(&mut self, graph: &mut dyn ModuleGraph) -> Result<()> {
        let mut pending = self.cache.clone();
        loop {
            let ready: Vec<String> = pending
                .modules()
                .filter(|m| graph.contains(m))
                .map(String::from)
                .collect();
            if ready.is_empty() {
                return Ok(());
            }

            for module in &ready {
                let scripts = pending.get(module).map(<[PathBuf]>::to_vec).unwrap_or_default();
                let mut binaries = BTreeSet::new();
                let mut datas = BTreeSet::new();
                for script in &scripts {
                    let function = self.functions.get(script).cloned();
                    let hook = ImportHook::load(module.as_str(), script, function)?;
                    let outcome = hook.update_dependencies(graph)?;
                    binaries.extend(outcome.binaries);
                    datas.extend(outcome.datas);
                    if !outcome.attrs.is_empty() {
                        self.attrs
                            .entry(module.clone())
                            .or_default()
                            .extend(outcome.attrs);
                    }
                    self.warnings.extend(outcome.warnings);
                }
                self.files.add(
                    module,
                    binaries.into_iter().collect(),
                    datas.into_iter().collect(),
                );
            }
            pending.remove(ready.as_slice());
        }
    }

    pub fn files(&self) -> &AdditionalFilesCache {
        &self.files
    }

    /// Attributes hooks declared, per module.
    pub fn attrs(&self) -> &BTreeMap<String, Vec<(String, Literal)>> {
        &self.attrs
    }

    /// Binaries contributed by all hooks that ran.
    pub fn binaries(&self) -> Toc {
        self.collect(EntryKind::Binary)
    }

    /// Data files contributed by all hooks that ran.
    pub fn datas(&self) -> Toc {
        self.collect(EntryKind::Data)
    }

    fn collect(&self, kind: EntryKind) -> Toc {
        let mut toc = Toc::new();
        for module in self.files.modules() {
            let files = match kind {
                EntryKind::Binary => self.files.binaries(module),
                _ => self.files.datas(module),
            };
            for (dest, source) in files {
                toc.append(TocEntry::new(dest.clone(), source, kind));
            }
        }
        toc
    }

    pub fn warnings(&self) -> &[BuildWarning] {
        &self.warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::depend::graph::ImportGraph;
    use crate::hooks::api::HookApi;
    use crate::test_support::write_file;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Records what the hooked module imports when the hook runs.
    #[derive(Default)]
    struct Observer {
        seen: Mutex<Vec<Vec<String>>>,
    }

    impl HookFunction for Observer {
        fn call(&self, api: &mut HookApi<'_>) -> Result<()> {
            if let Ok(mut seen) = self.seen.lock() {
                seen.push(api.imports());
            }
            Ok(())
        }
    }

    fn lib(tmp: &TempDir, names: &[&str]) -> PathBuf {
        for name in names {
            write_file(tmp.path(), &format!("lib/{}.py", name), "");
        }
        tmp.path().join("lib")
    }

    #[test]
    fn test_builtin_hook_effects_visible_to_user_hook() {
        let tmp = TempDir::new().unwrap();
        let builtin = tmp.path().join("builtin");
        let user = tmp.path().join("user");
        write_file(&builtin, "hook-foo.py", "hiddenimports = ['bar']\n");
        let user_hook = write_file(&user, "hook-foo.py", "def hook(hook_api):\n    pass\n");

        let mut engine = HookEngine::from_dirs(&[builtin], &[user]).unwrap();
        let observer = Arc::new(Observer::default());
        engine.register_function(&user_hook, observer.clone());

        let mut graph = ImportGraph::new(vec![lib(&tmp, &["foo", "bar"])]);
        graph.add_module("foo", None);
        engine.run(&mut graph).unwrap();

        assert_eq!(*observer.seen.lock().unwrap(), vec![vec!["bar".to_string()]]);
    }

    #[test]
    fn test_hooks_of_imported_modules_run_in_a_later_pass() {
        let tmp = TempDir::new().unwrap();
        let hooks = tmp.path().join("hooks");
        write_file(&hooks, "hook-foo.py", "hiddenimports = ['bar']\n");
        let cfg = write_file(&hooks, "bar.cfg", "");
        write_file(
            &hooks,
            "hook-bar.py",
            "excludedimports = ['baz']\nhiddenimports = ['baz']\ndatas = [('bar.cfg', 'bar')]\n",
        );

        let mut engine = HookEngine::from_dirs(&[hooks], &[]).unwrap();
        let mut graph = ImportGraph::new(vec![lib(&tmp, &["foo", "bar", "baz"])])
            .with_excluded(engine.excluded_imports().clone());
        graph.add_module("foo", None);
        engine.run(&mut graph).unwrap();

        assert!(engine.files().contains("foo"));
        assert!(engine.files().contains("bar"));
        // `bar` excludes `baz` for itself.
        assert!(!graph.contains("baz"));
        let datas = engine.datas();
        assert_eq!(datas.get("bar/bar.cfg").unwrap().source(), Some(cfg.as_path()));
        assert!(engine.warnings().is_empty());
    }

    #[test]
    fn test_hooks_for_absent_modules_do_not_run() {
        let tmp = TempDir::new().unwrap();
        let hooks = tmp.path().join("hooks");
        write_file(&hooks, "hook-unused.py", "hiddenimports = ['nothing']\n");

        let mut engine = HookEngine::from_dirs(&[hooks], &[]).unwrap();
        let mut graph = ImportGraph::new(Vec::new());
        graph.add_module("app", None);
        engine.run(&mut graph).unwrap();

        assert!(!engine.files().contains("unused"));
        assert!(engine.warnings().is_empty());
    }
}

//! Module import graph.
//!
//! Nodes are modules and scripts, edges are imports. Entry scripts and
//! explicitly declared modules are roots; everything reachable from a root
//! ends up in the bundle.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use thiserror::Error;

use crate::core::toc::{EntryKind, Toc, TocEntry};
use crate::hooks::excluded::ExcludedImports;

/// Failure to resolve an import.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("no module named `{name}`")]
    ModuleNotFound { name: String },
}

/// Graph operations available to hooks.
pub trait ModuleGraph {
    /// Whether `name` is a node of the graph.
    fn contains(&self, name: &str) -> bool;

    /// Modules imported by `name`, in the order the imports were added.
    fn imports_of(&self, name: &str) -> Vec<String>;

    /// Import `name` on behalf of `caller`, adding the module to the graph
    /// if needed. Returns `Ok(false)` when the import is excluded.
    fn import_module(&mut self, caller: &str, name: &str) -> Result<bool, GraphError>;

    /// Drop the import of `name` by `caller`. Returns whether an edge was
    /// removed.
    fn remove_reference(&mut self, caller: &str, name: &str) -> bool;
}

/// A node of the import graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleNode {
    pub name: String,
    /// Source file; `None` for namespace packages
    pub path: Option<PathBuf>,
    pub kind: EntryKind,
}

/// petgraph-backed [`ModuleGraph`] resolving new modules on a search path.
#[derive(Debug, Clone, Default)]
pub struct ImportGraph {
    graph: DiGraph<ModuleNode, ()>,
    nodes: HashMap<String, NodeIndex>,
    roots: Vec<NodeIndex>,
    search_paths: Vec<PathBuf>,
    excluded: ExcludedImports,
}

impl ImportGraph {
    /// Modules not declared explicitly are looked up in `search_paths`.
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        ImportGraph {
            search_paths,
            ..ImportGraph::default()
        }
    }

    /// Apply `excluded` to every import added from now on.
    pub fn with_excluded(mut self, excluded: ExcludedImports) -> Self {
        self.excluded = excluded;
        self
    }

    fn add_node(&mut self, node: ModuleNode) -> NodeIndex {
        if let Some(&idx) = self.nodes.get(&node.name) {
            self.graph[idx] = node;
            return idx;
        }
        let name = node.name.clone();
        let idx = self.graph.add_node(node);
        self.nodes.insert(name, idx);
        idx
    }

    fn add_root(&mut self, node: ModuleNode) {
        let idx = self.add_node(node);
        if !self.roots.contains(&idx) {
            self.roots.push(idx);
        }
    }

    /// Add an entry script.
    pub fn add_script(&mut self, name: impl Into<String>, path: impl Into<PathBuf>) {
        self.add_root(ModuleNode {
            name: name.into(),
            path: Some(path.into()),
            kind: EntryKind::PySource,
        });
    }

    /// Add an explicitly declared module.
    pub fn add_module(&mut self, name: impl Into<String>, path: Option<PathBuf>) {
        self.add_root(ModuleNode {
            name: name.into(),
            path,
            kind: EntryKind::PyModule,
        });
    }

    /// Locate `name` on the search path: a package `__init__.py`, a
    /// module file, or a namespace package directory.
    pub fn find_module(&self, name: &str) -> Option<Option<PathBuf>> {
        let rel: PathBuf = name.split('.').collect();
        for dir in &self.search_paths {
            let pkg = dir.join(&rel);
            let init = pkg.join("__init__.py");
            if init.is_file() {
                return Some(Some(init));
            }
            let module = pkg.with_extension("py");
            if module.is_file() {
                return Some(Some(module));
            }
            if pkg.is_dir() {
                return Some(None);
            }
        }
        None
    }

    fn ensure_node(&mut self, name: &str) -> Result<NodeIndex, GraphError> {
        if let Some(&idx) = self.nodes.get(name) {
            return Ok(idx);
        }
        let path = self.find_module(name).ok_or_else(|| GraphError::ModuleNotFound {
            name: name.to_string(),
        })?;
        tracing::debug!("adding module `{}` to the graph", name);
        let idx = self.add_node(ModuleNode {
            name: name.to_string(),
            path,
            kind: EntryKind::PyModule,
        });

        // A submodule cannot be imported without its parent package.
        if let Some((parent, _)) = name.rsplit_once('.') {
            if let Ok(parent_idx) = self.ensure_node(parent) {
                self.graph.update_edge(idx, parent_idx, ());
            }
        }
        Ok(idx)
    }

    /// Names of all nodes in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.graph.node_indices().map(|idx| self.graph[idx].name.as_str())
    }

    fn reachable(&self) -> HashSet<NodeIndex> {
        let mut seen = HashSet::new();
        for &root in &self.roots {
            let mut dfs = Dfs::new(&self.graph, root);
            while let Some(idx) = dfs.next(&self.graph) {
                seen.insert(idx);
            }
        }
        seen
    }

    fn collect(&self, kind: EntryKind) -> Toc {
        let reachable = self.reachable();
        self.graph
            .node_indices()
            .filter(|idx| reachable.contains(idx))
            .map(|idx| &self.graph[idx])
            .filter(|node| node.kind == kind)
            .map(|node| match &node.path {
                Some(path) => TocEntry::new(node.name.clone(), path, node.kind),
                None => TocEntry::new(node.name.clone(), Path::new("-"), node.kind),
            })
            .collect()
    }

    /// Reachable pure modules, in insertion order.
    pub fn modules(&self) -> Toc {
        self.collect(EntryKind::PyModule)
    }

    /// Entry scripts, in insertion order.
    pub fn scripts(&self) -> Toc {
        self.collect(EntryKind::PySource)
    }
}

impl ModuleGraph for ImportGraph {
    fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    fn imports_of(&self, name: &str) -> Vec<String> {
        let Some(&idx) = self.nodes.get(name) else {
            return Vec::new();
        };
        // petgraph lists the most recently added edge first.
        let mut imports: Vec<String> = self
            .graph
            .neighbors(idx)
            .map(|n| self.graph[n].name.clone())
            .collect();
        imports.reverse();
        imports
    }

    fn import_module(&mut self, caller: &str, name: &str) -> Result<bool, GraphError> {
        let Some(&from) = self.nodes.get(caller) else {
            return Err(GraphError::ModuleNotFound {
                name: caller.to_string(),
            });
        };
        if self.excluded.is_excluded(name, caller) {
            tracing::debug!("import of `{}` from `{}` is excluded", name, caller);
            return Ok(false);
        }
        let to = self.ensure_node(name)?;
        if !self.graph.contains_edge(from, to) {
            self.graph.add_edge(from, to, ());
        }
        Ok(true)
    }

    fn remove_reference(&mut self, caller: &str, name: &str) -> bool {
        let (Some(&from), Some(&to)) = (self.nodes.get(caller), self.nodes.get(name)) else {
            return false;
        };
        match self.graph.find_edge(from, to) {
            Some(edge) => {
                self.graph.remove_edge(edge);
                true
            }
            None => false,
        }
    }
}

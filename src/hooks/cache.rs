//! Discovery of hook scripts.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::util::fs::absolute;

const HOOK_PREFIX: &str = "hook-";
const HOOK_SUFFIX: &str = ".py";

/// Module name → hook scripts for it, in the order they run.
///
/// Directories are scanned in registration order and scripts within a
/// directory lexicographically, so built-in hooks (registered first) run
/// before user hooks for the same module.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HooksCache {
    hooks: BTreeMap<String, Vec<PathBuf>>,
}

impl HooksCache {
    /// Scan `dir` for hook scripts.
    pub fn new(dir: &Path) -> Self {
        let mut cache = HooksCache::default();
        cache.load_dir(dir);
        cache
    }

    /// Scan several directories in order.
    pub fn from_dirs<P: AsRef<Path>>(dirs: &[P]) -> Self {
        let mut cache = HooksCache::default();
        cache.add_custom_paths(dirs);
        cache
    }

    fn load_dir(&mut self, dir: &Path) {
        if !dir.is_dir() {
            tracing::error!("Hook directory {} not found", absolute(dir).display());
            return;
        }
        let pattern = dir.join(format!("{}*{}", HOOK_PREFIX, HOOK_SUFFIX));
        let mut files: Vec<PathBuf> = match glob::glob(&pattern.to_string_lossy()) {
            Ok(paths) => paths.filter_map(|p| p.ok()).collect(),
            Err(e) => {
                tracing::error!("invalid hook directory {}: {}", dir.display(), e);
                return;
            }
        };
        files.sort();

        for file in files {
            let Some(module) = file
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_prefix(HOOK_PREFIX))
                .and_then(|n| n.strip_suffix(HOOK_SUFFIX))
                .map(str::to_string)
            else {
                continue;
            };
            tracing::debug!("found hook {} for `{}`", file.display(), module);
            self.hooks.entry(module).or_default().push(absolute(&file));
        }
    }

    /// Scan additional directories; their hooks run after those already
    /// cached.
    pub fn add_custom_paths<P: AsRef<Path>>(&mut self, dirs: &[P]) {
        for dir in dirs {
            self.load_dir(dir.as_ref());
        }
    }

    /// Forget the hooks of `modules`.
    pub fn remove<S: AsRef<str>>(&mut self, modules: &[S]) {
        let unique: BTreeSet<&str> = modules.iter().map(AsRef::as_ref).collect();
        for module in unique {
            self.hooks.remove(module);
        }
    }

    pub fn get(&self, module: &str) -> Option<&[PathBuf]> {
        self.hooks.get(module).map(Vec::as_slice)
    }

    pub fn contains(&self, module: &str) -> bool {
        self.hooks.contains_key(module)
    }

    pub fn modules(&self) -> impl Iterator<Item = &str> {
        self.hooks.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[PathBuf])> {
        self.hooks.iter().map(|(m, p)| (m.as_str(), p.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

//! Excluded-imports table.
//!
//! `excludedimports` is read from every hook script before any hook runs,
//! so exclusions apply no matter in which order modules get imported.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result};
use regex::Regex;

use crate::hooks::cache::HooksCache;
use crate::hooks::parser::{assignment_source, parse_literal, string_list};
use crate::hooks::HookError;

/// Excluded module name → modules whose hooks exclude it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExcludedImports {
    excluders: BTreeMap<String, BTreeSet<String>>,
}

impl ExcludedImports {
    /// Scan every hook in `cache`.
    ///
    /// All hook scripts of a module contribute; their declarations are
    /// merged.
    pub fn new(cache: &HooksCache) -> Result<Self> {
        tracing::info!("Loading excluded imports...");
        let parser = Regex::new(r"(?m)excludedimports = (.+)$")?;
        let mut table = ExcludedImports::default();

        for (module, files) in cache.iter() {
            let mut excluded = BTreeSet::new();
            for file in files {
                let source = std::fs::read_to_string(file)
                    .with_context(|| format!("failed to read hook {}", file.display()))?;
                let Some(code) = parser.captures(&source).and_then(|c| c.get(1)) else {
                    continue;
                };
                // The declaration may continue over several lines.
                let text = assignment_source(&source, "excludedimports")
                    .unwrap_or_else(|| code.as_str().to_string());
                let literal = parse_literal(&text).map_err(|message| HookError::Literal {
                    path: file.clone(),
                    field: "excludedimports",
                    message,
                })?;
                excluded.extend(string_list(file, "excludedimports", &literal)?);
            }
            if excluded.is_empty() {
                continue;
            }
            tracing::info!(
                "  Excluded imports for `{}` -> {}",
                module,
                excluded.iter().cloned().collect::<Vec<_>>().join(", ")
            );
            for name in excluded {
                table.add(name, module);
            }
        }
        Ok(table)
    }

    /// Record that `excluder`'s hooks exclude `name`.
    pub fn add(&mut self, name: impl Into<String>, excluder: &str) {
        self.excluders
            .entry(name.into())
            .or_default()
            .insert(excluder.to_string());
    }

    /// Modules excluding `name`.
    pub fn excluders(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.excluders.get(name)
    }

    /// Whether importing `name` from `caller` is excluded.
    ///
    /// An exclusion of a package covers its submodules, and an excluder
    /// covers its own submodules as callers.
    pub fn is_excluded(&self, name: &str, caller: &str) -> bool {
        package_chain(name).any(|excluded| {
            self.excluders.get(excluded).is_some_and(|excluders| {
                package_chain(caller).any(|c| excluders.contains(c))
            })
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BTreeSet<String>)> {
        self.excluders.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.excluders.is_empty()
    }
}

/// `a.b.c`, `a.b`, `a`.
fn package_chain(name: &str) -> impl Iterator<Item = &str> {
    std::iter::successors(Some(name), |&n| n.rfind('.').map(|i| &n[..i]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::write_file;
    use tempfile::TempDir;

    #[test]
    fn test_all_hook_files_of_a_module_contribute() {
        let tmp = TempDir::new().unwrap();
        let builtin = tmp.path().join("builtin");
        let user = tmp.path().join("user");
        write_file(&builtin, "hook-foo.py", "excludedimports = ['tkinter']\n");
        write_file(&user, "hook-foo.py", "excludedimports = ['PyQt5', 'tkinter']\n");
        write_file(&user, "hook-bar.py", "hiddenimports = ['x']\n");

        let cache = HooksCache::from_dirs(&[&builtin, &user]);
        let table = ExcludedImports::new(&cache).unwrap();

        assert!(table.excluders("tkinter").unwrap().contains("foo"));
        // Declared only by the second hook script for `foo`.
        assert!(table.excluders("PyQt5").unwrap().contains("foo"));
        assert!(table.excluders("x").is_none());
    }

    #[test]
    fn test_multiline_declaration() {
        let tmp = TempDir::new().unwrap();
        write_file(
            tmp.path(),
            "hook-foo.py",
            "excludedimports = [\n    'tkinter',\n    'PyQt5',\n]\n",
        );
        let table = ExcludedImports::new(&HooksCache::new(tmp.path())).unwrap();
        assert!(table.excluders("PyQt5").unwrap().contains("foo"));
    }

    #[test]
    fn test_is_excluded_covers_packages() {
        let mut table = ExcludedImports::default();
        table.add("tkinter", "foo");

        assert!(table.is_excluded("tkinter", "foo"));
        assert!(table.is_excluded("tkinter.ttk", "foo.gui"));
        assert!(!table.is_excluded("tkinter", "bar"));
        assert!(!table.is_excluded("tk", "foo"));
    }

    #[test]
    fn test_unparsable_declaration_is_an_error() {
        let tmp = TempDir::new().unwrap();
        write_file(tmp.path(), "hook-foo.py", "excludedimports = compute()\n");
        let cache = HooksCache::new(tmp.path());
        let err = ExcludedImports::new(&cache).unwrap_err();
        assert!(err.downcast_ref::<HookError>().is_some());
    }
}

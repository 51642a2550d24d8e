//! Files contributed by hooks.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use walkdir::WalkDir;

use crate::hooks::HookError;

/// A file to bundle: `(destination name, source path)`.
pub type HookFile = (String, PathBuf);

fn dest_name(dest_dir: &str, rel: &Path) -> String {
    let rel = rel.to_string_lossy().replace('\\', "/");
    let dir = dest_dir.trim_end_matches(['/', '\\']);
    if dir.is_empty() || dir == "." {
        rel
    } else {
        format!("{}/{}", dir.replace('\\', "/"), rel)
    }
}

/// Expand `(source glob, destination directory)` pairs into concrete files.
///
/// Relative globs are resolved against `base`. A matched directory
/// contributes every file below it, keeping its inner layout. The result
/// is sorted by destination.
pub fn format_binaries_and_datas(list: &[(String, String)], base: &Path) -> Result<Vec<HookFile>> {
    let mut files = BTreeSet::new();
    for (pattern, dest_dir) in list {
        if dest_dir.is_empty() {
            return Err(HookError::EmptyDestination {
                pattern: pattern.clone(),
            }
            .into());
        }
        let full = if Path::new(pattern).is_absolute() {
            PathBuf::from(pattern)
        } else {
            base.join(pattern)
        };
        let matches: Vec<PathBuf> = glob::glob(&full.to_string_lossy())
            .with_context(|| format!("invalid glob `{}`", pattern))?
            .filter_map(|p| p.ok())
            .collect();
        if matches.is_empty() {
            return Err(HookError::NoMatch {
                pattern: pattern.clone(),
            }
            .into());
        }

        for matched in matches {
            if matched.is_dir() {
                for entry in WalkDir::new(&matched).sort_by_file_name() {
                    let entry = entry
                        .with_context(|| format!("failed to walk {}", matched.display()))?;
                    if !entry.file_type().is_file() {
                        continue;
                    }
                    let rel = entry.path().strip_prefix(&matched).unwrap_or(entry.path());
                    files.insert((dest_name(dest_dir, rel), entry.path().to_path_buf()));
                }
            } else if let Some(file_name) = matched.file_name() {
                files.insert((dest_name(dest_dir, Path::new(file_name)), matched.clone()));
            }
        }
    }
    Ok(files.into_iter().collect())
}

/// Binaries and datas contributed per module by its hooks, kept so they
/// can be retrieved again without re-running the hooks.
#[derive(Debug, Clone, Default)]
pub struct AdditionalFilesCache {
    binaries: BTreeMap<String, Vec<HookFile>>,
    datas: BTreeMap<String, Vec<HookFile>>,
}

impl AdditionalFilesCache {
    pub fn new() -> Self {
        AdditionalFilesCache::default()
    }

    pub fn add(&mut self, module: &str, binaries: Vec<HookFile>, datas: Vec<HookFile>) {
        self.binaries.insert(module.to_string(), binaries);
        self.datas.insert(module.to_string(), datas);
    }

    pub fn contains(&self, module: &str) -> bool {
        self.binaries.contains_key(module) || self.datas.contains_key(module)
    }

    pub fn binaries(&self, module: &str) -> &[HookFile] {
        self.binaries.get(module).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn datas(&self, module: &str) -> &[HookFile] {
        self.datas.get(module).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Modules with recorded files.
    pub fn modules(&self) -> impl Iterator<Item = &str> {
        self.binaries.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::write_file;
    use tempfile::TempDir;

    fn pair(src: &str, dest: &str) -> (String, String) {
        (src.to_string(), dest.to_string())
    }

    #[test]
    fn test_globs_and_directories_expand() {
        let tmp = TempDir::new().unwrap();
        let a = write_file(tmp.path(), "data/a.json", "{}");
        let b = write_file(tmp.path(), "data/b.json", "{}");
        write_file(tmp.path(), "data/skip.txt", "");
        let icon = write_file(tmp.path(), "res/icons/app.png", "");

        let files = format_binaries_and_datas(
            &[pair("data/*.json", "foo/data"), pair("res", ".")],
            tmp.path(),
        )
        .unwrap();
        assert_eq!(
            files,
            vec![
                ("foo/data/a.json".to_string(), a),
                ("foo/data/b.json".to_string(), b),
                ("icons/app.png".to_string(), icon),
            ]
        );
    }

    #[test]
    fn test_empty_destination_and_no_match_fail() {
        let tmp = TempDir::new().unwrap();
        write_file(tmp.path(), "x.dat", "");

        let err = format_binaries_and_datas(&[pair("x.dat", "")], tmp.path()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HookError>(),
            Some(HookError::EmptyDestination { .. })
        ));

        let err = format_binaries_and_datas(&[pair("*.so", "lib")], tmp.path()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HookError>(),
            Some(HookError::NoMatch { .. })
        ));
    }

    #[test]
    fn test_additional_files_cache() {
        let mut cache = AdditionalFilesCache::new();
        cache.add("foo", vec![("libfoo.so".into(), "/lib/libfoo.so".into())], Vec::new());

        assert!(cache.contains("foo"));
        assert_eq!(cache.binaries("foo").len(), 1);
        assert!(cache.datas("foo").is_empty());
        assert!(cache.binaries("bar").is_empty());
    }
}

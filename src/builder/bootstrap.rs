//! Modules the loader needs before the object archive can be opened.
//!
//! They are shipped with the loader as sources under
//! `<loader dir>/bootstrap/`, compiled into the work directory and embedded
//! directly in the resource archive. The object archive never carries them.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::archive::cipher::KEY_MODULE;
use crate::builder::compile::CodeCompiler;
use crate::core::toc::{EntryKind, Toc, TocEntry};
use crate::util::fs::{ensure_dir, mtime_nanos, write_atomic};

/// Bootstrap modules, in the order the loader imports them.
pub const BOOTSTRAP_MODULES: &[&str] = &[
    "struct",
    "pyimod01_os_path",
    "pyimod02_archive",
    "pyimod03_importers",
];

/// Script run by the loader before any user script.
pub const BOOT_SCRIPT: &str = "pyiboot01_bootstrap";

/// Whether `name` must stay out of the object archive.
pub fn is_bootstrap_module(name: &str) -> bool {
    name == KEY_MODULE || BOOTSTRAP_MODULES.contains(&name)
}

/// Directory holding the bootstrap sources.
pub fn bootstrap_dir(loader_dir: &Path) -> PathBuf {
    loader_dir.join("bootstrap")
}

/// Source entries of the bootstrap modules.
pub fn bootstrap_sources(loader_dir: &Path) -> Toc {
    let dir = bootstrap_dir(loader_dir);
    BOOTSTRAP_MODULES
        .iter()
        .map(|name| TocEntry::new(*name, dir.join(format!("{}.py", name)), EntryKind::PyModule))
        .collect()
}

/// The boot script entry, when the loader ships one.
pub fn boot_script(loader_dir: &Path) -> Option<TocEntry> {
    let path = bootstrap_dir(loader_dir).join(format!("{}.py", BOOT_SCRIPT));
    path.is_file()
        .then(|| TocEntry::new(BOOT_SCRIPT, path, EntryKind::PySource))
}

/// Compile source entries into `<out_dir>/<name>.pyc` holding bare code
/// objects, and return entries pointing at the compiled files.
///
/// Files newer than their source are reused so downstream build records
/// stay valid.
pub fn compile_to_dir(toc: &Toc, out_dir: &Path, compiler: &dyn CodeCompiler) -> Result<Toc> {
    ensure_dir(out_dir)?;
    let mut compiled = Toc::new();
    for entry in toc {
        let Some(source) = entry.source() else {
            continue;
        };
        let target = out_dir.join(format!("{}.pyc", entry.name));
        let fresh = match (mtime_nanos(&target), mtime_nanos(source)) {
            (Some(built), Some(src)) => built >= src,
            _ => false,
        };
        if !fresh {
            tracing::debug!("compiling {} -> {}", source.display(), target.display());
            let code = compiler.compile_file(&entry.name, source)?;
            write_atomic(&target, &code)
                .with_context(|| format!("failed to write {}", target.display()))?;
        }
        compiled.append(TocEntry::new(entry.name.clone(), target, EntryKind::PyModule));
    }
    Ok(compiled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{write_file, FakeCompiler};
    use tempfile::TempDir;

    #[test]
    fn test_bootstrap_names() {
        assert!(is_bootstrap_module("pyimod02_archive"));
        assert!(is_bootstrap_module(KEY_MODULE));
        assert!(!is_bootstrap_module("json"));
    }

    #[test]
    fn test_compile_to_dir_reuses_fresh_output() {
        let tmp = TempDir::new().unwrap();
        let src = write_file(tmp.path(), "loader/bootstrap/struct.py", "x = 1\n");
        let toc: Toc = vec![TocEntry::new("struct", &src, EntryKind::PyModule)].into();
        let out = tmp.path().join("build");
        let compiler = FakeCompiler::default();

        let first = compile_to_dir(&toc, &out, &compiler).unwrap();
        let pyc = first.get("struct").unwrap().source().unwrap().to_path_buf();
        assert_eq!(pyc, out.join("struct.pyc"));
        assert_eq!(compiler.calls(), 1);

        compile_to_dir(&toc, &out, &compiler).unwrap();
        assert_eq!(compiler.calls(), 1);
    }
}

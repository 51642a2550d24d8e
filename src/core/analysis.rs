//! Result of analysing an application.
//!
//! Dependency resolution itself happens elsewhere; an `Analysis` is the
//! container the assemblers consume: one manifest per entry category plus
//! already-compiled code objects.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::core::toc::{EntryKind, Toc, TocEntry};

/// Manifests produced by analysing one application.
#[derive(Debug, Clone, Default)]
pub struct Analysis {
    /// Entry-point scripts (`PYSOURCE`), in execution order
    pub scripts: Toc,

    /// Pure modules (`PYMODULE`) destined for the object archive
    pub pure: Toc,

    /// Native libraries and extension modules
    pub binaries: Toc,

    /// Data files
    pub datas: Toc,

    /// Zip files placed on the import path
    pub zipfiles: Toc,

    /// Pointers to files owned by another executable (filled by MERGE)
    pub dependencies: Toc,

    /// Pre-compiled code objects by module name
    pub code_cache: BTreeMap<String, Vec<u8>>,
}

impl Analysis {
    pub fn new() -> Self {
        Analysis::default()
    }

    /// Source file of the user's entry script.
    ///
    /// Loader boot scripts run first, so this is the last script.
    pub fn entry_script(&self) -> Option<&Path> {
        self.scripts.last().and_then(TocEntry::source)
    }

    /// Add a script.
    pub fn add_script(&mut self, name: impl Into<String>, path: impl Into<PathBuf>) {
        self.scripts
            .append(TocEntry::new(name, path, EntryKind::PySource));
    }

    /// Add a pure module.
    pub fn add_module(&mut self, name: impl Into<String>, path: impl Into<PathBuf>) {
        self.pure.append(TocEntry::new(name, path, EntryKind::PyModule));
    }

    /// Add a shared library.
    pub fn add_binary(&mut self, name: impl Into<String>, path: impl Into<PathBuf>) {
        self.binaries
            .append(TocEntry::new(name, path, EntryKind::Binary));
    }

    /// Add a data file.
    pub fn add_data(&mut self, name: impl Into<String>, path: impl Into<PathBuf>) {
        self.datas.append(TocEntry::new(name, path, EntryKind::Data));
    }

    /// Everything the resource archive carries besides the scripts and the
    /// object archive, in packaging order.
    pub fn payload(&self) -> Toc {
        let mut toc = Toc::new();
        toc.extend(self.binaries.iter().cloned());
        toc.extend(self.zipfiles.iter().cloned());
        toc.extend(self.datas.iter().cloned());
        toc.extend(self.dependencies.iter().cloned());
        toc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_script_is_last_script() {
        let mut analysis = Analysis::new();
        assert!(analysis.entry_script().is_none());

        analysis.add_script("pyiboot01_bootstrap", "/loader/bootstrap/pyiboot01_bootstrap.py");
        analysis.add_script("app", "/src/app.py");
        assert_eq!(analysis.entry_script(), Some(Path::new("/src/app.py")));
    }

    #[test]
    fn test_payload_order() {
        let mut analysis = Analysis::new();
        analysis.add_data("logo.png", "/src/logo.png");
        analysis.add_binary("libz.so", "/usr/lib/libz.so");
        analysis
            .dependencies
            .append(TocEntry::dependency("../other:libx.so"));

        let names: Vec<_> = analysis.payload().names().map(String::from).collect();
        assert_eq!(names, ["libz.so", "logo.png", "../other:libx.so"]);
    }
}

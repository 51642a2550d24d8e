//! Target definitions - what gets built.
//!
//! A Target is one buildable artifact: an object archive, a resource
//! archive, an executable or a collected directory. Targets are assembled
//! in dependency order and wrapped by the build cache.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::builder::errors::BuildWarning;
use crate::builder::guts::Guts;
use crate::core::toc::{EntryKind, Toc, TocEntry};

/// The kind of target being built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TargetKind {
    /// Object archive of compiled modules
    Pyz,
    /// Resource archive
    Pkg,
    /// Executable (loader stub + resource archive)
    Exe,
    /// Directory tree
    Collect,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Pyz => "PYZ",
            TargetKind::Pkg => "PKG",
            TargetKind::Exe => "EXE",
            TargetKind::Collect => "COLLECT",
        }
    }

    /// Entry kind used when this target's output is referenced by a
    /// downstream manifest.
    pub fn entry_kind(&self) -> EntryKind {
        match self {
            TargetKind::Pyz => EntryKind::Pyz,
            TargetKind::Pkg => EntryKind::Pkg,
            TargetKind::Exe | TargetKind::Collect => EntryKind::Executable,
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A buildable artifact.
pub trait Target {
    /// What kind of target this is.
    fn kind(&self) -> TargetKind;

    /// Primary output file or directory.
    fn output(&self) -> &Path;

    /// Secondary outputs that must also exist for a build to be reused.
    fn extra_outputs(&self) -> Vec<PathBuf> {
        Vec::new()
    }

    /// Snapshot of every input that determines the output.
    fn guts(&self) -> Guts;

    /// Targets that own their whole output tree are never reused.
    fn always_rebuild(&self) -> bool {
        false
    }

    /// Write the output.
    fn assemble(&mut self) -> Result<()>;

    /// Files this target needs embedded by a downstream target.
    fn dependencies(&self) -> Toc {
        Toc::new()
    }

    /// Non-fatal conditions raised by the last assembly.
    fn warnings(&self) -> &[BuildWarning] {
        &[]
    }

    /// File name of the persisted build record, unique per kind and output.
    fn record_name(&self) -> String {
        let file_name = self
            .output()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!("{}-{}.toc", self.kind(), file_name)
    }

    /// This target's output as a manifest entry.
    fn as_entry(&self) -> TocEntry {
        let name = self
            .output()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        TocEntry::new(name, self.output(), self.kind().entry_kind())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy(PathBuf);

    impl Target for Dummy {
        fn kind(&self) -> TargetKind {
            TargetKind::Pkg
        }

        fn output(&self) -> &Path {
            &self.0
        }

        fn guts(&self) -> Guts {
            Guts::new()
        }

        fn assemble(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_record_name_and_entry() {
        let target = Dummy(PathBuf::from("/build/app/app.pkg"));
        assert_eq!(target.record_name(), "PKG-app.pkg.toc");

        let entry = target.as_entry();
        assert_eq!(entry.name, "app.pkg");
        assert_eq!(entry.kind, EntryKind::Pkg);
        assert_eq!(entry.source(), Some(Path::new("/build/app/app.pkg")));
    }
}

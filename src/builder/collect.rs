//! Directory assembler.
//!
//! Materializes a manifest as a directory tree under the distribution
//! root. The output directory is owned entirely by this target, so it is
//! wiped and repopulated on every build.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::builder::bincache::BinaryCache;
use crate::builder::errors::{BuildError, BuildWarning};
use crate::builder::exe::Exe;
use crate::builder::guts::Guts;
use crate::builder::utils::{
    add_suffix_to_extensions, check_path_overlap, skip_egg_entry, validate_toc_names,
};
use crate::core::target::{Target, TargetKind};
use crate::core::toc::{EntryKind, Toc, TocEntry};
use crate::util::fs::{absolute, copy_stat, ensure_dir, is_inside, set_executable};

/// Something a directory is collected from.
pub enum CollectInput<'a> {
    Toc(&'a Toc),
    Target(&'a dyn Target),
    /// An executable, together with its manifest, side-by-side archive
    /// and deferred binaries
    Exe(&'a Exe),
}

/// Builds a directory tree.
pub struct Collect {
    output: PathBuf,
    distpath: PathBuf,
    protected: Vec<PathBuf>,
    toc: Toc,
    bincache: BinaryCache,
    warnings: Vec<BuildWarning>,
}

impl Collect {
    /// Collect into `<distpath>/<name>`.
    ///
    /// `protected` lists directories the output must never contain
    /// (the work directory, the bundle description's directory).
    pub fn new(
        name: &str,
        distpath: &Path,
        protected: &[&Path],
        inputs: &[CollectInput<'_>],
    ) -> Self {
        let mut toc = Toc::new();
        for input in inputs {
            match input {
                CollectInput::Toc(t) => toc.extend(t.iter().cloned()),
                CollectInput::Target(target) => {
                    toc.append(target.as_entry());
                    toc.extend(target.dependencies());
                }
                CollectInput::Exe(exe) => {
                    toc.append(exe.as_entry());
                    if let Some(manifest) = exe
                        .toc()
                        .iter()
                        .find(|e| e.kind == EntryKind::Binary && e.name.ends_with(".manifest"))
                    {
                        toc.append(manifest.clone());
                    }
                    if !exe.options().append_pkg {
                        let pkgname = exe.pkgname();
                        let name = pkgname
                            .file_name()
                            .map(|n| n.to_string_lossy().into_owned())
                            .unwrap_or_default();
                        toc.append(TocEntry::new(name, pkgname, EntryKind::Pkg));
                    }
                    toc.extend(exe.dependencies());
                }
            }
        }

        Collect {
            output: absolute(&distpath.join(name)),
            distpath: absolute(distpath),
            protected: protected.iter().map(|p| absolute(p)).collect(),
            toc,
            bincache: BinaryCache::passthrough(),
            warnings: Vec::new(),
        }
    }

    pub fn with_binary_cache(mut self, cache: BinaryCache) -> Self {
        self.bincache = cache;
        self
    }

    pub fn toc(&self) -> &Toc {
        &self.toc
    }

    fn reset_output(&self) -> Result<()> {
        let protected: Vec<&Path> = self.protected.iter().map(PathBuf::as_path).collect();
        check_path_overlap(&self.output, &protected)?;

        if is_inside(&self.output, &self.distpath) && self.output.is_dir() {
            tracing::debug!("removing previous output {}", self.output.display());
            std::fs::remove_dir_all(&self.output)
                .with_context(|| format!("failed to remove {}", self.output.display()))?;
        }
        ensure_dir(&self.output)
    }

    fn copy_entry(&mut self, entry: &TocEntry) -> Result<()> {
        let Some(source) = entry.source().filter(|p| p.is_file()) else {
            return Err(BuildError::MissingInput {
                name: entry.name.clone(),
                path: entry.path.clone().unwrap_or_default(),
            }
            .into());
        };
        let is_binary = matches!(entry.kind, EntryKind::Binary | EntryKind::Extension);
        let source = if is_binary {
            self.bincache.process(source)?
        } else {
            source.to_path_buf()
        };

        let dest = self.output.join(&entry.name);
        if let Some(parent) = dest.parent() {
            ensure_dir(parent)?;
        }
        tracing::debug!("copying {} to {}", source.display(), dest.display());
        std::fs::copy(&source, &dest).with_context(|| {
            format!("failed to copy {} to {}", source.display(), dest.display())
        })?;

        if let Err(e) = copy_stat(&source, &dest) {
            let warning = BuildWarning::PermissionPropagation {
                path: dest.clone(),
                reason: e.to_string(),
            };
            warning.emit();
            self.warnings.push(warning);
        }
        if is_binary {
            set_executable(&dest)?;
        }
        Ok(())
    }
}

impl Target for Collect {
    fn kind(&self) -> TargetKind {
        TargetKind::Collect
    }

    fn output(&self) -> &Path {
        &self.output
    }

    fn guts(&self) -> Guts {
        Guts::new()
            .field("name", &self.output)
            .toc("toc", &self.toc)
    }

    fn always_rebuild(&self) -> bool {
        true
    }

    fn assemble(&mut self) -> Result<()> {
        tracing::info!("Building COLLECT {}", self.output.display());
        self.warnings.clear();

        // Refuse before touching the output directory at all.
        validate_toc_names(&self.toc)?;
        let entries = add_suffix_to_extensions(&self.toc)?;
        self.reset_output()?;

        for entry in entries {
            if skip_egg_entry(&entry) {
                tracing::debug!("skipping {}: served from its egg", entry.name);
                continue;
            }
            if matches!(entry.kind, EntryKind::Dependency | EntryKind::Option) {
                continue;
            }
            self.copy_entry(&entry)?;
        }

        tracing::info!("Building COLLECT {} completed successfully.", self.output.display());
        Ok(())
    }

    fn warnings(&self) -> &[BuildWarning] {
        &self.warnings
    }
}

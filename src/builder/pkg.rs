//! Resource archive assembler.
//!
//! Packs a manifest into a CArchive: scripts, bootstrap modules, the
//! object archive, binaries, data files and loader options. Binaries are
//! de-duplicated by internal name and by source file, and optionally run
//! through the strip/compact cache.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::archive::carchive::CArchiveWriter;
use crate::builder::bincache::BinaryCache;
use crate::builder::errors::{BuildError, BuildWarning};
use crate::builder::guts::Guts;
use crate::builder::utils::{add_suffix_to_extensions, skip_egg_entry, validate_toc_names};
use crate::core::target::{Target, TargetKind};
use crate::core::toc::{EntryKind, Toc, TocEntry};
use crate::util::fs::{absolute, ensure_dir};

/// Which entry kinds are stored zlib-compressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressionPolicy {
    uncompressed: BTreeSet<&'static str>,
}

impl Default for CompressionPolicy {
    /// Compress everything except the already compressed object archive.
    fn default() -> Self {
        CompressionPolicy {
            uncompressed: BTreeSet::from([EntryKind::Pyz.as_str()]),
        }
    }
}

impl CompressionPolicy {
    /// Store nothing compressed.
    pub fn none() -> Self {
        CompressionPolicy {
            uncompressed: EntryKind::ALL.iter().map(EntryKind::as_str).collect(),
        }
    }

    /// Override the policy for one kind.
    pub fn set(mut self, kind: EntryKind, compress: bool) -> Self {
        if compress {
            self.uncompressed.remove(kind.as_str());
        } else {
            self.uncompressed.insert(kind.as_str());
        }
        self
    }

    pub fn compresses(&self, kind: EntryKind) -> bool {
        !matches!(kind, EntryKind::Option | EntryKind::Dependency)
            && !self.uncompressed.contains(kind.as_str())
    }
}

/// Builds a resource archive.
pub struct Pkg {
    output: PathBuf,
    toc: Toc,
    compression: CompressionPolicy,
    exclude_binaries: bool,
    strip: bool,
    upx: bool,
    bincache: BinaryCache,
    pylib_name: String,
    python_version: u32,
    dependencies: Toc,
    warnings: Vec<BuildWarning>,
}

impl Pkg {
    /// Prepare an archive at `output` holding `toc`.
    ///
    /// `pylib_name` is the runtime library the loader must open.
    pub fn new(
        output: impl Into<PathBuf>,
        toc: Toc,
        pylib_name: impl Into<String>,
        python_version: u32,
    ) -> Self {
        Pkg {
            output: output.into(),
            toc,
            compression: CompressionPolicy::default(),
            exclude_binaries: false,
            strip: false,
            upx: false,
            bincache: BinaryCache::passthrough(),
            pylib_name: pylib_name.into(),
            python_version,
            dependencies: Toc::new(),
            warnings: Vec::new(),
        }
    }

    pub fn with_compression(mut self, policy: CompressionPolicy) -> Self {
        self.compression = policy;
        self
    }

    /// Leave binaries out of the archive and hand them to the caller
    /// through [`Target::dependencies`].
    pub fn exclude_binaries(mut self, exclude: bool) -> Self {
        self.exclude_binaries = exclude;
        self.dependencies = if exclude {
            self.toc
                .iter()
                .filter(|e| matches!(e.kind, EntryKind::Binary | EntryKind::Extension))
                .cloned()
                .collect()
        } else {
            Toc::new()
        };
        self
    }

    /// Run binaries through `cache`; `strip`/`upx` record the flags it was
    /// configured with.
    pub fn with_binary_cache(mut self, cache: BinaryCache, strip: bool, upx: bool) -> Self {
        self.bincache = cache;
        self.strip = strip;
        self.upx = upx;
        self
    }

    pub fn toc(&self) -> &Toc {
        &self.toc
    }

    /// Decide which entries get written, in order.
    fn select(&mut self, entries: Vec<TocEntry>) -> Vec<TocEntry> {
        let mut seen_names: HashMap<String, PathBuf> = HashMap::new();
        let mut seen_paths: HashMap<PathBuf, String> = HashMap::new();
        let mut selected = Vec::with_capacity(entries.len());

        for entry in entries {
            if skip_egg_entry(&entry) {
                tracing::debug!("skipping {}: served from its egg", entry.name);
                continue;
            }
            if !entry.kind.is_binary() {
                selected.push(entry);
                continue;
            }
            if self.exclude_binaries && entry.kind != EntryKind::Dependency {
                tracing::debug!("deferring {} to the caller", entry.name);
                continue;
            }

            let source = entry.source().map(absolute).unwrap_or_default();
            if let Some(kept) = seen_names.get(&entry.name) {
                let warning = BuildWarning::DuplicateBinary {
                    name: entry.name.clone(),
                    kept: kept.clone(),
                    skipped: source,
                };
                warning.emit();
                self.warnings.push(warning);
                continue;
            }
            if entry.kind != EntryKind::Dependency {
                if let Some(kept_name) = seen_paths.get(&source) {
                    let warning = BuildWarning::DuplicateSourcePath {
                        path: source,
                        kept_name: kept_name.clone(),
                        skipped_name: entry.name.clone(),
                    };
                    warning.emit();
                    self.warnings.push(warning);
                    continue;
                }
                seen_paths.insert(source.clone(), entry.name.clone());
            }
            seen_names.insert(entry.name.clone(), source);
            selected.push(entry);
        }
        selected
    }
}

impl Target for Pkg {
    fn kind(&self) -> TargetKind {
        TargetKind::Pkg
    }

    fn output(&self) -> &Path {
        &self.output
    }

    fn guts(&self) -> Guts {
        Guts::new()
            .field("name", &self.output)
            .field("cdict", &self.compression.uncompressed)
            .toc("toc", &self.toc)
            .field("exclude_binaries", self.exclude_binaries)
            .field("strip_binaries", self.strip)
            .field("upx_binaries", self.upx)
            .field("pylib_name", &self.pylib_name)
            .field("python_version", self.python_version)
    }

    fn assemble(&mut self) -> Result<()> {
        tracing::info!("Building PKG (CArchive) {}", self.output.display());
        self.warnings.clear();

        // Nothing may be written when a single name is unsafe.
        validate_toc_names(&self.toc)?;

        let widened = add_suffix_to_extensions(&self.toc)?;
        let selected = self.select(widened);
        for entry in &selected {
            let missing = match (entry.kind, entry.source()) {
                (EntryKind::Option | EntryKind::Dependency, _) => false,
                (_, Some(path)) => !path.is_file(),
                (_, None) => true,
            };
            if missing {
                return Err(BuildError::MissingInput {
                    name: entry.name.clone(),
                    path: entry.path.clone().unwrap_or_default(),
                }
                .into());
            }
        }
        let selected = self.bincache.process_entries(selected)?;

        if let Some(parent) = self.output.parent() {
            ensure_dir(parent)?;
        }
        let mut writer =
            CArchiveWriter::create(&self.output, &self.pylib_name, self.python_version)?;
        for entry in &selected {
            let type_code = entry.kind.type_code();
            match entry.source() {
                Some(source)
                    if !matches!(entry.kind, EntryKind::Option | EntryKind::Dependency) =>
                {
                    tracing::debug!(
                        "adding {} ({}) to {}",
                        entry.name,
                        entry.kind,
                        self.output.display()
                    );
                    let compress = self.compression.compresses(entry.kind);
                    writer.add_file(&entry.name, source, compress, type_code)?;
                }
                _ => writer.add_marker(&entry.name, type_code)?,
            }
        }
        writer.finish()?;

        tracing::info!(
            "Building PKG (CArchive) {} completed successfully.",
            self.output.display()
        );
        Ok(())
    }

    fn dependencies(&self) -> Toc {
        self.dependencies.clone()
    }

    fn warnings(&self) -> &[BuildWarning] {
        &self.warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::carchive::CArchiveReader;
    use crate::test_support::write_file;
    use tempfile::TempDir;

    #[test]
    fn test_script_and_binary_scenario() {
        let tmp = TempDir::new().unwrap();
        let app = write_file(tmp.path(), "src/app.py", "print('hello')\n");
        let lib = write_file(tmp.path(), "src/mylib.so", [0x7fu8, b'E', b'L', b'F', 0, 1]);
        let toc: Toc = vec![
            TocEntry::new("app.py", &app, EntryKind::PySource),
            TocEntry::new("mylib.so", &lib, EntryKind::Binary),
        ]
        .into();

        let mut pkg = Pkg::new(tmp.path().join("app.pkg"), toc, "libpython3.11.so.1.0", 311);
        pkg.assemble().unwrap();

        let reader = CArchiveReader::open(pkg.output()).unwrap();
        let codes: Vec<_> = reader.entries().iter().map(|e| e.type_code).collect();
        assert_eq!(codes, [b's', b'b']);
        assert!(reader.entries()[0].compressed);
        assert_eq!(
            reader.extract_by_name("app.py").unwrap(),
            std::fs::read(&app).unwrap()
        );
        assert_eq!(reader.pylib_name(), "libpython3.11.so.1.0");
    }

    #[test]
    fn test_duplicate_binaries_keep_first() {
        let tmp = TempDir::new().unwrap();
        let a = write_file(tmp.path(), "a/libx.so", "A");
        let b = write_file(tmp.path(), "b/libx.so", "B");
        // Two dotted names widening to the same file, plus one file added
        // under two names.
        let ext1 = write_file(tmp.path(), "site/m.abi3.so", "E1");
        let ext2 = write_file(tmp.path(), "other/m.abi3.so", "E2");
        let toc: Toc = vec![
            TocEntry::new("libx.so", &a, EntryKind::Binary),
            TocEntry::new("libx-alias.so", &a, EntryKind::Binary),
            TocEntry::new("m", &ext1, EntryKind::Extension),
            TocEntry::new("m.abi3.so", &ext2, EntryKind::Extension),
            TocEntry::new("libother.so", &b, EntryKind::Binary),
        ]
        .into();

        let mut pkg = Pkg::new(tmp.path().join("app.pkg"), toc, "libpy.so", 311);
        pkg.assemble().unwrap();

        let reader = CArchiveReader::open(pkg.output()).unwrap();
        let names: Vec<_> = reader.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["libx.so", "m.abi3.so", "libother.so"]);
        assert_eq!(reader.extract_by_name("m.abi3.so").unwrap(), b"E1");

        assert_eq!(pkg.warnings().len(), 2);
        assert!(matches!(pkg.warnings()[0], BuildWarning::DuplicateSourcePath { .. }));
        assert!(matches!(pkg.warnings()[1], BuildWarning::DuplicateBinary { .. }));
    }

    #[test]
    fn test_options_and_dependencies_are_markers() {
        let tmp = TempDir::new().unwrap();
        let toc: Toc = vec![
            TocEntry::option("pyi-windows-manifest-filename app.exe.manifest"),
            TocEntry::dependency("../other:libx.so"),
        ]
        .into();

        let mut pkg = Pkg::new(tmp.path().join("app.pkg"), toc, "libpy.so", 311);
        pkg.assemble().unwrap();

        let reader = CArchiveReader::open(pkg.output()).unwrap();
        let entries = reader.entries();
        assert_eq!(entries[0].type_code, b'o');
        assert_eq!(entries[1].type_code, b'd');
        assert_eq!(entries[1].name, "../other:libx.so");
        assert!(entries.iter().all(|e| e.compressed_len == 0));
    }

    #[test]
    fn test_unsafe_names_abort_before_writing() {
        let tmp = TempDir::new().unwrap();
        let data = write_file(tmp.path(), "d.txt", "x");
        let ext = write_file(tmp.path(), "m.so", "ELF");
        let out_dir = tmp.path().join("out");
        std::fs::create_dir(&out_dir).unwrap();

        let cases = [
            ("../escape", &data, EntryKind::Data),
            ("/abs/path", &data, EntryKind::Data),
            (".abs.path", &ext, EntryKind::Extension),
        ];
        for (bad, source, kind) in cases {
            let toc: Toc = vec![
                TocEntry::new("fine.txt", &data, EntryKind::Data),
                TocEntry::new(bad, source, kind),
            ]
            .into();
            let mut pkg = Pkg::new(out_dir.join("app.pkg"), toc, "libpy.so", 311);
            let err = pkg.assemble().unwrap_err();
            assert!(matches!(
                err.downcast_ref::<BuildError>(),
                Some(BuildError::Structural { .. })
            ));
            assert!(!pkg.output().exists());
        }
        assert!(!tmp.path().join("escape").exists());
    }

    #[test]
    fn test_exclude_binaries_defers_them() {
        let tmp = TempDir::new().unwrap();
        let lib = write_file(tmp.path(), "libx.so", "X");
        let data = write_file(tmp.path(), "d.txt", "D");
        let toc: Toc = vec![
            TocEntry::new("libx.so", &lib, EntryKind::Binary),
            TocEntry::new("d.txt", &data, EntryKind::Data),
        ]
        .into();

        let mut pkg =
            Pkg::new(tmp.path().join("app.pkg"), toc, "libpy.so", 311).exclude_binaries(true);
        pkg.assemble().unwrap();

        assert!(pkg.dependencies().contains("libx.so"));
        let reader = CArchiveReader::open(pkg.output()).unwrap();
        assert!(reader.find("libx.so").is_none());
        assert!(reader.find("d.txt").is_some());
    }

    #[test]
    fn test_missing_input_and_egg_entries() {
        let tmp = TempDir::new().unwrap();
        let egg = write_file(tmp.path(), "dist.egg", "zip");

        let toc: Toc =
            vec![TocEntry::new("pkg/mod.py", egg.join("pkg/mod.py"), EntryKind::Data)].into();
        let mut pkg = Pkg::new(tmp.path().join("a.pkg"), toc, "libpy.so", 311);
        pkg.assemble().unwrap();
        assert!(CArchiveReader::open(pkg.output()).unwrap().entries().is_empty());

        let gone = tmp.path().join("gone.dat");
        let toc: Toc = vec![TocEntry::new("gone.dat", gone, EntryKind::Data)].into();
        let mut pkg = Pkg::new(tmp.path().join("b.pkg"), toc, "libpy.so", 311);
        let err = pkg.assemble().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::MissingInput { .. })
        ));
    }

    #[test]
    fn test_compression_policy() {
        let policy = CompressionPolicy::default();
        assert!(policy.compresses(EntryKind::Data));
        assert!(!policy.compresses(EntryKind::Pyz));
        assert!(!policy.compresses(EntryKind::Option));
        assert!(!CompressionPolicy::none().compresses(EntryKind::Binary));
        assert!(CompressionPolicy::none()
            .set(EntryKind::Binary, true)
            .compresses(EntryKind::Binary));
    }
}

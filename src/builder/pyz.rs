//! Object archive assembler.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;

use crate::archive::cipher::{Cipher, KEY_MODULE};
use crate::archive::pyz::PyzWriter;
use crate::builder::bootstrap::{compile_to_dir, is_bootstrap_module};
use crate::builder::compile::{CodeCompiler, EMPTY_MODULE};
use crate::builder::guts::Guts;
use crate::core::target::{Target, TargetKind};
use crate::core::toc::{EntryKind, Toc, TocEntry};
use crate::util::hash::sha256_bytes;

/// Packs pure modules into an object archive.
pub struct Pyz {
    output: PathBuf,
    toc: Toc,
    code_cache: BTreeMap<String, Vec<u8>>,
    dependencies: Toc,
    cipher: Option<Cipher>,
    compiler: Arc<dyn CodeCompiler>,
}

impl Pyz {
    /// Prepare an object archive at `output` from the code-bearing entries
    /// of `toc`.
    ///
    /// `bootstrap` lists the loader's bootstrap sources; they are compiled
    /// into `workpath` and exposed through [`Target::dependencies`] instead
    /// of being archived. With a `key`, a key module is generated and put
    /// first among them.
    pub fn new(
        workpath: &Path,
        output: impl Into<PathBuf>,
        toc: &Toc,
        code_cache: BTreeMap<String, Vec<u8>>,
        bootstrap: &Toc,
        key: Option<&str>,
        compiler: Arc<dyn CodeCompiler>,
    ) -> Result<Self> {
        let cipher = key.map(Cipher::new);

        let mut sources = bootstrap.clone();
        if let Some(cipher) = &cipher {
            let key_module = cipher.write_key_module(workpath)?;
            sources.prepend(TocEntry::new(KEY_MODULE, key_module, EntryKind::PyModule));
        }
        let dependencies = compile_to_dir(&sources, workpath, compiler.as_ref())?;

        let toc = toc
            .difference(&dependencies)
            .into_iter()
            .filter(|e| {
                matches!(e.kind, EntryKind::PyModule | EntryKind::PySource)
                    && !is_bootstrap_module(&e.name)
            })
            .collect();

        Ok(Pyz {
            output: output.into(),
            toc,
            code_cache,
            dependencies,
            cipher,
            compiler,
        })
    }

    /// Entries that will be archived.
    pub fn toc(&self) -> &Toc {
        &self.toc
    }

    fn code_for(&self, entry: &TocEntry) -> Result<Vec<u8>> {
        if let Some(code) = self.code_cache.get(&entry.name) {
            return Ok(code.clone());
        }
        match entry.source() {
            Some(path) if path.as_os_str() != "-" => self.compiler.compile_file(&entry.name, path),
            _ => self
                .compiler
                .compile_source(&entry.name, Path::new(&entry.name), EMPTY_MODULE),
        }
    }
}

/// Namespace packages have no source; regular packages are `__init__`.
fn is_package(entry: &TocEntry) -> bool {
    match entry.source() {
        None => true,
        Some(path) if path.as_os_str() == "-" => true,
        Some(path) => path.file_stem().is_some_and(|stem| stem == "__init__"),
    }
}

impl Target for Pyz {
    fn kind(&self) -> TargetKind {
        TargetKind::Pyz
    }

    fn output(&self) -> &Path {
        &self.output
    }

    fn guts(&self) -> Guts {
        let cipher = self.cipher.as_ref().map(|c| sha256_bytes(c.key_hex().as_bytes()));
        Guts::new()
            .field("name", &self.output)
            .toc("toc", &self.toc)
            .field("cipher", cipher)
    }

    fn assemble(&mut self) -> Result<()> {
        tracing::info!("Building PYZ (ZlibArchive) {}", self.output.display());

        let mut writer =
            PyzWriter::create(&self.output, self.compiler.magic(), self.cipher.clone())?;
        for entry in &self.toc {
            let code = self.code_for(entry)?;
            tracing::debug!("adding {} to {}", entry.name, self.output.display());
            writer.add(&entry.name, is_package(entry), &code)?;
        }
        writer.finish()?;

        tracing::info!(
            "Building PYZ (ZlibArchive) {} completed successfully.",
            self.output.display()
        );
        Ok(())
    }

    fn dependencies(&self) -> Toc {
        self.dependencies.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::pyz::PyzReader;
    use crate::builder::bootstrap::bootstrap_sources;
    use crate::builder::errors::BuildError;
    use crate::test_support::{write_file, FakeCompiler, LoaderFixture};
    use tempfile::TempDir;

    fn setup(tmp: &TempDir) -> (PathBuf, Toc, LoaderFixture) {
        let loader = LoaderFixture::new(tmp.path());
        let workpath = tmp.path().join("build");
        std::fs::create_dir_all(&workpath).unwrap();

        let init = write_file(tmp.path(), "src/mylib/__init__.py", "VALUE = 1\n");
        let util = write_file(tmp.path(), "src/mylib/util.py", "def f(): pass\n");
        let toc: Toc = vec![
            TocEntry::new("mylib", init, EntryKind::PyModule),
            TocEntry::new("mylib.util", util, EntryKind::PyModule),
            TocEntry::new("pyimod02_archive", "/elsewhere.py", EntryKind::PyModule),
            TocEntry::option("v"),
        ]
        .into();
        (workpath, toc, loader)
    }

    #[test]
    fn test_bootstrap_modules_are_excluded() {
        let tmp = TempDir::new().unwrap();
        let (workpath, toc, loader) = setup(&tmp);
        let compiler = Arc::new(FakeCompiler::default());

        let mut pyz = Pyz::new(
            &workpath,
            workpath.join("PYZ-00.pyz"),
            &toc,
            BTreeMap::new(),
            &bootstrap_sources(loader.dir()),
            None,
            compiler,
        )
        .unwrap();
        assert_eq!(pyz.toc().names().collect::<Vec<_>>(), ["mylib", "mylib.util"]);
        assert!(pyz.dependencies().contains("pyimod02_archive"));

        pyz.assemble().unwrap();
        let reader = PyzReader::open(pyz.output()).unwrap();
        assert!(reader.find("mylib").unwrap().is_package);
        assert!(reader.find("pyimod02_archive").is_none());
        assert!(reader.extract("mylib.util", None).unwrap().ends_with(b"def f(): pass\n"));
    }

    #[test]
    fn test_code_cache_and_namespace_packages() {
        let tmp = TempDir::new().unwrap();
        let (workpath, _, loader) = setup(&tmp);
        let toc: Toc = vec![
            TocEntry::new("cached", "/does/not/exist.py", EntryKind::PyModule),
            TocEntry::new("nspkg", "-", EntryKind::PyModule),
        ]
        .into();
        let mut cache = BTreeMap::new();
        cache.insert("cached".to_string(), b"precompiled".to_vec());

        let mut pyz = Pyz::new(
            &workpath,
            workpath.join("PYZ-00.pyz"),
            &toc,
            cache,
            &bootstrap_sources(loader.dir()),
            None,
            Arc::new(FakeCompiler::default()),
        )
        .unwrap();
        pyz.assemble().unwrap();

        let reader = PyzReader::open(pyz.output()).unwrap();
        assert_eq!(reader.extract("cached", None).unwrap(), b"precompiled");
        assert!(reader.find("nspkg").unwrap().is_package);
        assert!(reader.extract("nspkg", None).unwrap().ends_with(EMPTY_MODULE));
    }

    #[test]
    fn test_cipher_inserts_key_module_first() {
        let tmp = TempDir::new().unwrap();
        let (workpath, toc, loader) = setup(&tmp);

        let mut pyz = Pyz::new(
            &workpath,
            workpath.join("PYZ-00.pyz"),
            &toc,
            BTreeMap::new(),
            &bootstrap_sources(loader.dir()),
            Some("s3cret"),
            Arc::new(FakeCompiler::default()),
        )
        .unwrap();
        assert_eq!(pyz.dependencies().names().next(), Some(KEY_MODULE));

        pyz.assemble().unwrap();
        let reader = PyzReader::open(pyz.output()).unwrap();
        assert!(reader.extract("mylib", None).is_err());
        assert!(reader
            .extract("mylib", Some(&Cipher::new("s3cret")))
            .is_ok());
    }

    #[test]
    fn test_missing_source_and_syntax_error_are_distinct() {
        let tmp = TempDir::new().unwrap();
        let (workpath, _, loader) = setup(&tmp);
        let broken = write_file(tmp.path(), "src/broken.py", "def (:\n");

        for (toc, missing) in [
            (
                Toc::from(vec![TocEntry::new("gone", "/nope/gone.py", EntryKind::PyModule)]),
                true,
            ),
            (
                Toc::from(vec![TocEntry::new("broken", &broken, EntryKind::PyModule)]),
                false,
            ),
        ] {
            let mut pyz = Pyz::new(
                &workpath,
                workpath.join("PYZ-00.pyz"),
                &toc,
                BTreeMap::new(),
                &bootstrap_sources(loader.dir()),
                None,
                Arc::new(FakeCompiler::default()),
            )
            .unwrap();
            let err = pyz.assemble().unwrap_err();
            match err.downcast_ref::<BuildError>() {
                Some(BuildError::MissingInput { .. }) => assert!(missing),
                Some(BuildError::Compile { .. }) => assert!(!missing),
                other => panic!("unexpected error {:?}", other),
            }
        }
    }
}

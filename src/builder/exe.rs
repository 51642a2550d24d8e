//! Executable assembler.
//!
//! An executable is a pre-built native loader stub followed by a resource
//! archive. The stub variant is picked from the console/debug axes; the
//! archive is appended (one file) or copied next to the executable.
//!
//! Platform resources (icons, version info, embedded resources) are
//! applied to a scratch copy of the stub through a [`ResourcePatcher`].

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::builder::bincache::BinaryCache;
use crate::builder::errors::{BuildError, BuildWarning};
use crate::builder::guts::Guts;
use crate::builder::pkg::{CompressionPolicy, Pkg};
use crate::core::platform::Platform;
use crate::core::target::{Target, TargetKind};
use crate::core::toc::{EntryKind, Toc, TocEntry};
use crate::util::fs::{copy_stat, ensure_dir, set_executable, write_atomic};
use crate::util::process::{find_executable, ProcessBuilder};

/// Resources to embed in the executable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExeResources {
    /// Icon file (`.ico`/`.icns`), or `file,index` to borrow one
    pub icon: Option<String>,
    /// Version resource description
    pub version: Option<PathBuf>,
    /// Extra resources as `file[,type[,name[,language]]]`
    pub resources: Vec<String>,
}

impl ExeResources {
    pub fn is_empty(&self) -> bool {
        self.icon.is_none() && self.version.is_none() && self.resources.is_empty()
    }
}

/// Platform-specific editing of loader stubs.
pub trait ResourcePatcher: Send + Sync {
    /// Apply `resources` to the stub copy at `exe`.
    fn patch(&self, exe: &Path, resources: &ExeResources) -> Result<Vec<BuildWarning>>;

    /// Repair signature metadata of the stub copy at `exe` before the
    /// archive is appended, so the result can be code-signed afterwards.
    fn fix_signature(&self, _exe: &Path) -> Result<()> {
        Ok(())
    }
}

/// Patcher for platforms without resource support: every request is
/// reported and ignored.
#[derive(Debug, Clone, Default)]
pub struct IgnoringPatcher;

impl ResourcePatcher for IgnoringPatcher {
    fn patch(&self, _exe: &Path, resources: &ExeResources) -> Result<Vec<BuildWarning>> {
        Ok(ignored(resources, true))
    }
}

fn ignored(resources: &ExeResources, include_icon: bool) -> Vec<BuildWarning> {
    let mut warnings = Vec::new();
    let reason = "platform not capable".to_string();
    if include_icon && resources.icon.is_some() {
        warnings.push(BuildWarning::IgnoredResource {
            what: "icon".into(),
            reason: reason.clone(),
        });
    }
    if resources.version.is_some() {
        warnings.push(BuildWarning::IgnoredResource {
            what: "version resource".into(),
            reason: reason.clone(),
        });
    }
    for res in &resources.resources {
        warnings.push(BuildWarning::IgnoredResource {
            what: format!("resource {}", res),
            reason: reason.clone(),
        });
    }
    warnings
}

/// macOS: drops the stub's signature so the appended archive does not
/// invalidate it and a later `codesign` run succeeds.
#[derive(Debug, Clone, Default)]
pub struct CodesignPatcher;

impl ResourcePatcher for CodesignPatcher {
    fn patch(&self, _exe: &Path, resources: &ExeResources) -> Result<Vec<BuildWarning>> {
        let mut warnings = ignored(resources, false);
        if resources.icon.is_some() {
            // Icons belong to the .app bundle, not to the executable.
            warnings.push(BuildWarning::IgnoredResource {
                what: "icon".into(),
                reason: "icons are applied to app bundles only".into(),
            });
        }
        Ok(warnings)
    }

    fn fix_signature(&self, exe: &Path) -> Result<()> {
        let Some(codesign) = find_executable("codesign") else {
            tracing::warn!("`codesign` not found; {} keeps its stub signature", exe.display());
            return Ok(());
        };
        tracing::info!("Fixing EXE for code signing {}", exe.display());
        ProcessBuilder::new(codesign)
            .arg("--remove-signature")
            .arg(exe)
            .exec_and_check()?;
        Ok(())
    }
}

/// The patcher matching `platform`.
pub fn default_patcher(platform: &Platform) -> Arc<dyn ResourcePatcher> {
    if platform.is_macos() {
        Arc::new(CodesignPatcher)
    } else {
        Arc::new(IgnoringPatcher)
    }
}

/// User-facing executable options.
#[derive(Debug, Clone)]
pub struct ExeOptions {
    pub name: String,
    pub console: bool,
    pub debug: bool,
    /// One-dir mode: binaries stay out of the archive and are collected
    pub exclude_binaries: bool,
    /// Append the archive to the executable instead of copying it beside
    pub append_pkg: bool,
    pub strip: bool,
    pub upx: bool,
    pub uac_admin: bool,
    pub uac_uiaccess: bool,
    /// Application manifest to use instead of the generated one (Windows)
    pub manifest: Option<PathBuf>,
    pub resources: ExeResources,
    pub compression: CompressionPolicy,
}

impl ExeOptions {
    pub fn new(name: impl Into<String>) -> Self {
        ExeOptions {
            name: name.into(),
            console: true,
            debug: false,
            exclude_binaries: false,
            append_pkg: true,
            strip: false,
            upx: false,
            uac_admin: false,
            uac_uiaccess: false,
            manifest: None,
            resources: ExeResources::default(),
            compression: CompressionPolicy::default(),
        }
    }
}

/// Shared build environment of executables.
#[derive(Clone)]
pub struct ExeEnv {
    pub workpath: PathBuf,
    pub distpath: PathBuf,
    pub loader_dir: PathBuf,
    pub platform: Platform,
    pub pylib_name: String,
    pub python_version: u32,
    pub bincache: BinaryCache,
    pub patcher: Arc<dyn ResourcePatcher>,
}

/// Something an executable is composed from.
pub enum ExeInput<'a> {
    /// Entries taken as they are
    Toc(&'a Toc),
    /// A finished target and the files it needs embedded
    Target(&'a dyn Target),
}

/// Compose a manifest from manifests and targets.
pub fn compose_toc(inputs: &[ExeInput<'_>]) -> Toc {
    let mut toc = Toc::new();
    for input in inputs {
        match input {
            ExeInput::Toc(t) => toc.extend(t.iter().cloned()),
            ExeInput::Target(target) => {
                toc.append(target.as_entry());
                toc.extend(target.dependencies());
            }
        }
    }
    toc
}

/// Builds an executable.
pub struct Exe {
    opts: ExeOptions,
    output: PathBuf,
    pkgname: PathBuf,
    stub: PathBuf,
    scratch: PathBuf,
    toc: Toc,
    pkg: Pkg,
    bincache: BinaryCache,
    patcher: Arc<dyn ResourcePatcher>,
    warnings: Vec<BuildWarning>,
}

impl Exe {
    pub fn new(opts: ExeOptions, env: &ExeEnv, inputs: &[ExeInput<'_>]) -> Result<Self> {
        let mut base = Path::new(&opts.name)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| opts.name.clone());
        if env.platform.is_windows() && base.len() > 4 && base.ends_with(".exe") {
            base.truncate(base.len() - 4);
        }

        let dir = if opts.exclude_binaries {
            &env.workpath
        } else {
            &env.distpath
        };
        let output = dir.join(format!("{}{}", base, env.platform.exe_suffix()));
        let pkgname = dir.join(format!("{}.pkg", base));

        let mut toc = compose_toc(inputs);
        if env.platform.is_windows() {
            let exe_file = format!("{}{}", base, env.platform.exe_suffix());
            let manifest_name = format!("{}.manifest", exe_file);
            let manifest = match &opts.manifest {
                Some(path) => path.clone(),
                None => {
                    let path = env.workpath.join(&manifest_name);
                    write_if_changed(
                        &path,
                        &windows_manifest(&base, opts.uac_admin, opts.uac_uiaccess),
                    )?;
                    path
                }
            };
            toc.append(TocEntry::new(manifest_name.clone(), manifest, EntryKind::Binary));
            if !opts.exclude_binaries {
                // One-file mode: tell the loader where the manifest lives
                // so the executable can be renamed.
                toc.append(TocEntry::option(format!(
                    "pyi-windows-manifest-filename {}",
                    manifest_name
                )));
            }
        }

        let pkg = Pkg::new(
            env.workpath.join(format!("PKG-{}.pkg", base)),
            toc.clone(),
            env.pylib_name.clone(),
            env.python_version,
        )
        .with_compression(opts.compression.clone())
        .exclude_binaries(opts.exclude_binaries)
        .with_binary_cache(env.bincache.clone(), opts.strip, opts.upx);

        let stub = env
            .loader_dir
            .join(env.platform.dir_name())
            .join(env.platform.loader_name(opts.console, opts.debug));
        tracing::debug!("loader stub {}", stub.display());

        Ok(Exe {
            scratch: env.workpath.join(format!("{}.stub", base)),
            opts,
            output,
            pkgname,
            stub,
            toc,
            pkg,
            bincache: env.bincache.clone(),
            patcher: env.patcher.clone(),
            warnings: Vec::new(),
        })
    }

    /// The resource archive this executable carries. Build it first.
    pub fn pkg(&self) -> &Pkg {
        &self.pkg
    }

    pub fn pkg_mut(&mut self) -> &mut Pkg {
        &mut self.pkg
    }

    pub fn toc(&self) -> &Toc {
        &self.toc
    }

    pub fn options(&self) -> &ExeOptions {
        &self.opts
    }

    /// Side-by-side archive location when it is not appended.
    pub fn pkgname(&self) -> &Path {
        &self.pkgname
    }

    pub fn stub(&self) -> &Path {
        &self.stub
    }

    /// Copy the stub to a scratch file and let the patcher edit it.
    fn patched_stub(&mut self) -> Result<PathBuf> {
        if let Some(parent) = self.scratch.parent() {
            ensure_dir(parent)?;
        }
        std::fs::copy(&self.stub, &self.scratch)
            .with_context(|| format!("failed to copy loader to {}", self.scratch.display()))?;
        set_executable(&self.scratch)?;

        if !self.opts.resources.is_empty() {
            let warnings = self.patcher.patch(&self.scratch, &self.opts.resources)?;
            for warning in &warnings {
                warning.emit();
            }
            self.warnings.extend(warnings);
        }
        self.patcher.fix_signature(&self.scratch)?;
        Ok(self.scratch.clone())
    }
}

fn write_if_changed(path: &Path, content: &str) -> Result<()> {
    if std::fs::read_to_string(path).ok().as_deref() != Some(content) {
        write_atomic(path, content.as_bytes())?;
    }
    Ok(())
}

/// Default application manifest for Windows executables.
fn windows_manifest(name: &str, uac_admin: bool, uac_uiaccess: bool) -> String {
    let level = if uac_admin {
        "requireAdministrator"
    } else {
        "asInvoker"
    };
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<assembly xmlns="urn:schemas-microsoft-com:asm.v1" manifestVersion="1.0">
  <assemblyIdentity name="{name}" processorArchitecture="*" type="win32" version="1.0.0.0"/>
  <trustInfo xmlns="urn:schemas-microsoft-com:asm.v3">
    <security>
      <requestedPrivileges>
        <requestedExecutionLevel level="{level}" uiAccess="{uiaccess}"/>
      </requestedPrivileges>
    </security>
  </trustInfo>
</assembly>
"#,
        name = name,
        level = level,
        uiaccess = uac_uiaccess,
    )
}

fn append_file(out: &mut impl Write, path: &Path) -> Result<()> {
    let mut input =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    std::io::copy(&mut input, out).with_context(|| format!("failed to copy {}", path.display()))?;
    Ok(())
}

impl Target for Exe {
    fn kind(&self) -> TargetKind {
        TargetKind::Exe
    }

    fn output(&self) -> &Path {
        &self.output
    }

    fn extra_outputs(&self) -> Vec<PathBuf> {
        if self.opts.append_pkg {
            Vec::new()
        } else {
            vec![self.pkgname.clone()]
        }
    }

    fn guts(&self) -> Guts {
        let res = &self.opts.resources;
        Guts::new()
            .field("name", &self.output)
            .field("console", self.opts.console)
            .field("debug", self.opts.debug)
            .field("exclude_binaries", self.opts.exclude_binaries)
            .field("icon", &res.icon)
            .field("versrsrc", &res.version)
            .field("uac_admin", self.opts.uac_admin)
            .field("uac_uiaccess", self.opts.uac_uiaccess)
            .field("manifest", &self.opts.manifest)
            .field("append_pkg", self.opts.append_pkg)
            .field("pkgname", &self.pkgname)
            .toc("toc", &self.toc)
            .field("resources", &res.resources)
            .field("strip", self.opts.strip)
            .field("upx", self.opts.upx)
            .file("exefiles", &self.stub)
            .file("pkg", self.pkg.output())
    }

    fn assemble(&mut self) -> Result<()> {
        tracing::info!("Building EXE from {}", self.output.display());
        self.warnings.clear();

        if !self.stub.is_file() {
            return Err(BuildError::PrerequisiteMissing {
                path: self.stub.clone(),
            }
            .into());
        }
        if let Some(parent) = self.output.parent() {
            ensure_dir(parent)?;
        }

        let stub = self.patched_stub()?;
        let stub = self.bincache.process(&stub)?;

        let file = File::create(&self.output)
            .with_context(|| format!("failed to create {}", self.output.display()))?;
        let mut out = BufWriter::new(file);
        append_file(&mut out, &stub)?;
        if self.opts.append_pkg {
            tracing::info!("Appending archive to EXE {}", self.output.display());
            append_file(&mut out, self.pkg.output())?;
        } else {
            tracing::info!("Copying archive to {}", self.pkgname.display());
            std::fs::copy(self.pkg.output(), &self.pkgname).with_context(|| {
                format!("failed to copy archive to {}", self.pkgname.display())
            })?;
            if let Err(e) = copy_stat(self.pkg.output(), &self.pkgname) {
                let warning = BuildWarning::PermissionPropagation {
                    path: self.pkgname.clone(),
                    reason: e.to_string(),
                };
                warning.emit();
                self.warnings.push(warning);
            }
        }
        out.flush()
            .with_context(|| format!("failed to write {}", self.output.display()))?;
        drop(out);

        set_executable(&self.output)?;

        if self.scratch.exists() {
            let _ = std::fs::remove_file(&self.scratch);
        }
        Ok(())
    }

    fn dependencies(&self) -> Toc {
        self.pkg.dependencies()
    }

    fn warnings(&self) -> &[BuildWarning] {
        &self.warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::carchive::CArchiveReader;
    use crate::builder::guts::BuildCache;
    use crate::test_support::{write_file, LoaderFixture, RecordingPatcher};
    use tempfile::TempDir;

    fn env(tmp: &TempDir, loader: &LoaderFixture, patcher: Arc<dyn ResourcePatcher>) -> ExeEnv {
        ExeEnv {
            workpath: tmp.path().join("build"),
            distpath: tmp.path().join("dist"),
            loader_dir: loader.dir().to_path_buf(),
            platform: loader.platform().clone(),
            pylib_name: "libpython3.11.so.1.0".into(),
            python_version: 311,
            bincache: BinaryCache::passthrough(),
            patcher,
        }
    }

    fn scripts(tmp: &TempDir) -> Toc {
        let app = write_file(tmp.path(), "src/app.py", "print('hi')\n");
        vec![TocEntry::new("app", app, EntryKind::PySource)].into()
    }

    #[test]
    fn test_onefile_appends_archive_to_stub() {
        let tmp = TempDir::new().unwrap();
        let loader = LoaderFixture::new(tmp.path());
        let env = env(&tmp, &loader, Arc::new(IgnoringPatcher));
        let toc = scripts(&tmp);
        std::fs::create_dir_all(&env.workpath).unwrap();

        let mut exe = Exe::new(ExeOptions::new("app"), &env, &[ExeInput::Toc(&toc)]).unwrap();
        assert!(exe.output().starts_with(&env.distpath));

        let cache = BuildCache::new(&env.workpath);
        cache.build(exe.pkg_mut()).unwrap();
        assert!(cache.build(&mut exe).unwrap());

        let bytes = std::fs::read(exe.output()).unwrap();
        let stub = std::fs::read(loader.stub(true, false)).unwrap();
        assert!(bytes.starts_with(&stub));

        let reader = CArchiveReader::open(exe.output()).unwrap();
        assert_eq!(reader.start(), stub.len());
        assert_eq!(reader.extract_by_name("app").unwrap(), b"print('hi')\n");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(exe.output()).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }

        // Nothing changed: reused.
        assert!(!cache.build(&mut exe).unwrap());
    }

    #[test]
    fn test_side_by_side_archive_and_debug_stub() {
        let tmp = TempDir::new().unwrap();
        let loader = LoaderFixture::new(tmp.path());
        let env = env(&tmp, &loader, Arc::new(IgnoringPatcher));
        let toc = scripts(&tmp);

        let mut opts = ExeOptions::new("app");
        opts.debug = true;
        opts.append_pkg = false;
        opts.exclude_binaries = true;
        let mut exe = Exe::new(opts, &env, &[ExeInput::Toc(&toc)]).unwrap();
        assert!(exe.output().starts_with(&env.workpath));
        assert_eq!(exe.stub(), loader.stub(true, true));

        exe.pkg_mut().assemble().unwrap();
        exe.assemble().unwrap();

        assert_eq!(
            std::fs::read(exe.output()).unwrap(),
            std::fs::read(loader.stub(true, true)).unwrap()
        );
        assert!(CArchiveReader::open(exe.pkgname()).is_ok());
        assert_eq!(exe.extra_outputs(), vec![exe.pkgname().to_path_buf()]);
    }

    #[test]
    fn test_missing_stub_is_prerequisite_error() {
        let tmp = TempDir::new().unwrap();
        let loader = LoaderFixture::new(tmp.path());
        std::fs::remove_file(loader.stub(true, false)).unwrap();
        let env = env(&tmp, &loader, Arc::new(IgnoringPatcher));
        let toc = scripts(&tmp);

        let mut exe = Exe::new(ExeOptions::new("app"), &env, &[ExeInput::Toc(&toc)]).unwrap();
        exe.pkg_mut().assemble().unwrap();
        let err = exe.assemble().unwrap_err();
        let build_err = err.downcast_ref::<BuildError>().unwrap();
        assert!(matches!(build_err, BuildError::PrerequisiteMissing { .. }));
        assert!(build_err.aborts_pipeline());
    }

    #[test]
    fn test_resources_go_through_the_patcher() {
        let tmp = TempDir::new().unwrap();
        let loader = LoaderFixture::new(tmp.path());
        let patcher = Arc::new(RecordingPatcher::default());
        let env = env(&tmp, &loader, patcher.clone());
        let toc = scripts(&tmp);

        let mut opts = ExeOptions::new("app");
        opts.resources.icon = Some("app.ico".into());
        let mut exe = Exe::new(opts, &env, &[ExeInput::Toc(&toc)]).unwrap();
        exe.pkg_mut().assemble().unwrap();
        exe.assemble().unwrap();

        let patched = patcher.patched.lock().unwrap();
        assert_eq!(patched.len(), 1);
        assert!(patched[0].0.ends_with("app.stub"));
        assert_eq!(patched[0].1.icon.as_deref(), Some("app.ico"));
        assert_eq!(*patcher.signed.lock().unwrap(), vec![patched[0].0.clone()]);
        // The scratch copy is removed afterwards.
        assert!(!patched[0].0.exists());
    }

    #[test]
    fn test_signature_is_fixed_on_the_stub_before_appending() {
        let tmp = TempDir::new().unwrap();
        let loader = LoaderFixture::new(tmp.path());
        let patcher = Arc::new(RecordingPatcher::default());
        let env = env(&tmp, &loader, patcher.clone());
        let toc = scripts(&tmp);

        let mut exe = Exe::new(ExeOptions::new("app"), &env, &[ExeInput::Toc(&toc)]).unwrap();
        exe.pkg_mut().assemble().unwrap();
        exe.assemble().unwrap();

        assert!(patcher.patched.lock().unwrap().is_empty());
        let signed = patcher.signed.lock().unwrap();
        assert_eq!(signed.len(), 1);
        assert!(signed[0].ends_with("app.stub"));
        assert_ne!(signed[0], exe.output());
    }

    #[test]
    fn test_ignoring_patcher_warns() {
        let resources = ExeResources {
            icon: Some("a.ico".into()),
            version: Some(PathBuf::from("version.txt")),
            resources: vec!["res.dll,1,2".into()],
        };
        let warnings = IgnoringPatcher.patch(Path::new("x"), &resources).unwrap();
        assert_eq!(warnings.len(), 3);
        assert!(warnings
            .iter()
            .all(|w| matches!(w, BuildWarning::IgnoredResource { .. })));
    }

    #[test]
    fn test_newer_pkg_forces_rebuild() {
        let tmp = TempDir::new().unwrap();
        let loader = LoaderFixture::new(tmp.path());
        let env = env(&tmp, &loader, Arc::new(IgnoringPatcher));
        let toc = scripts(&tmp);

        let mut exe = Exe::new(ExeOptions::new("app"), &env, &[ExeInput::Toc(&toc)]).unwrap();
        let cache = BuildCache::new(&env.workpath);
        cache.build(exe.pkg_mut()).unwrap();
        cache.build(&mut exe).unwrap();

        let pkg = std::fs::OpenOptions::new()
            .write(true)
            .open(exe.pkg().output())
            .unwrap();
        pkg.set_modified(std::time::SystemTime::now() + std::time::Duration::from_secs(60))
            .unwrap();
        assert!(cache.should_rebuild(&exe));
    }

    #[test]
    fn test_compose_toc_from_targets() {
        let tmp = TempDir::new().unwrap();
        let lib = write_file(tmp.path(), "libx.so", "X");
        let toc: Toc = vec![TocEntry::new("libx.so", lib, EntryKind::Binary)].into();
        let pkg =
            Pkg::new(tmp.path().join("inner.pkg"), toc, "libpy.so", 311).exclude_binaries(true);

        let composed = compose_toc(&[ExeInput::Target(&pkg)]);
        assert_eq!(composed.names().collect::<Vec<_>>(), ["inner.pkg", "libx.so"]);
        assert_eq!(composed.get("inner.pkg").unwrap().kind, EntryKind::Pkg);
    }
}

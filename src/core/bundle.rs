//! Bundle description (`Frost.toml`) parsing.
//!
//! A bundle names one application: its entry scripts, the pure modules
//! and native/data files to ship, and how the executable is built. Relative
//! paths are resolved against the directory holding `Frost.toml`.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::analysis::Analysis;
use crate::core::toc::{Toc, TocEntry};

/// How the application is laid out on disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BundleMode {
    /// A single executable carrying everything
    #[default]
    Onefile,
    /// An executable next to its libraries and data files
    Onedir,
}

/// The `[bundle]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleSettings {
    pub name: String,

    #[serde(default)]
    pub mode: BundleMode,

    /// Use the console loader instead of the windowed one
    #[serde(default = "default_true")]
    pub console: bool,

    /// Use the debug loader
    #[serde(default)]
    pub debug: bool,

    #[serde(default)]
    pub strip: bool,

    #[serde(default)]
    pub upx: bool,

    /// Passphrase for encrypting the object archive
    #[serde(default)]
    pub key: Option<String>,

    /// Application manifest to embed instead of the generated one
    #[serde(default)]
    pub manifest: Option<PathBuf>,

    /// Runtime options handed to the interpreter (`v`, `W ignore`, ...)
    #[serde(default)]
    pub options: Vec<String>,

    /// Extra directories searched for imported modules
    #[serde(default)]
    pub pathex: Vec<PathBuf>,

    /// Extra hook directories, applied after the configured ones
    #[serde(default)]
    pub hookspath: Vec<PathBuf>,

    /// Append the resource archive to the executable instead of writing
    /// it beside it
    #[serde(default = "default_true")]
    pub append_pkg: bool,

    #[serde(default)]
    pub icon: Option<String>,

    /// Version resource file
    #[serde(default)]
    pub version: Option<PathBuf>,

    /// Extra executable resources
    #[serde(default)]
    pub resources: Vec<String>,

    #[serde(default)]
    pub uac_admin: bool,

    #[serde(default)]
    pub uac_uiaccess: bool,
}

fn default_true() -> bool {
    true
}

/// A named file of the bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleFile {
    pub name: String,
    pub path: PathBuf,

    /// Modules this file imports
    #[serde(default)]
    pub imports: Vec<String>,
}

/// A pure module; the path may be omitted for namespace packages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleModule {
    pub name: String,

    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default)]
    pub imports: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawBundle {
    bundle: BundleSettings,
    #[serde(default)]
    scripts: Vec<BundleFile>,
    #[serde(default)]
    modules: Vec<BundleModule>,
    #[serde(default)]
    binaries: Vec<BundleFile>,
    #[serde(default)]
    datas: Vec<BundleFile>,
}

/// A parsed `Frost.toml` with paths made absolute.
#[derive(Debug, Clone)]
pub struct Bundle {
    pub settings: BundleSettings,
    pub scripts: Vec<BundleFile>,
    pub modules: Vec<BundleModule>,
    pub binaries: Vec<BundleFile>,
    pub datas: Vec<BundleFile>,
    root: PathBuf,
    path: PathBuf,
}

impl Bundle {
    /// Load a bundle description from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read bundle description: {}", path.display()))?;
        Self::parse(&content, path)
    }

    /// Parse bundle content; `path` locates the file for relative paths.
    pub fn parse(content: &str, path: &Path) -> Result<Self> {
        let raw: RawBundle = toml::from_str(content)
            .with_context(|| format!("failed to parse {}", path.display()))?;

        let root = crate::util::fs::absolute(path.parent().unwrap_or(Path::new(".")));
        let name = raw.bundle.name.trim().to_string();
        if name.is_empty() || name.contains(['/', '\\']) {
            bail!(
                "invalid bundle name `{}` in {}\n\
                 hint: the name becomes the executable's file name",
                raw.bundle.name,
                path.display()
            );
        }
        if raw.scripts.is_empty() {
            bail!(
                "bundle `{}` declares no scripts\n\
                 hint: add a [[scripts]] entry naming the entry point",
                name
            );
        }

        let resolve = |p: &Path| if p.is_absolute() { p.to_path_buf() } else { root.join(p) };
        let resolve_files = |files: Vec<BundleFile>| -> Vec<BundleFile> {
            files
                .into_iter()
                .map(|f| BundleFile {
                    path: resolve(f.path.as_path()),
                    ..f
                })
                .collect()
        };

        let mut settings = raw.bundle;
        settings.name = name;
        settings.manifest = settings.manifest.as_deref().map(resolve);
        settings.version = settings.version.as_deref().map(resolve);
        settings.pathex = settings.pathex.iter().map(|p| resolve(p.as_path())).collect();
        settings.hookspath = settings.hookspath.iter().map(|p| resolve(p.as_path())).collect();

        let modules = raw
            .modules
            .into_iter()
            .map(|m| BundleModule {
                path: m.path.as_deref().map(resolve),
                ..m
            })
            .collect();
        let scripts = resolve_files(raw.scripts);
        let binaries = resolve_files(raw.binaries);
        let datas = resolve_files(raw.datas);

        Ok(Bundle {
            settings,
            scripts,
            modules,
            binaries,
            datas,
            root,
            path: path.to_path_buf(),
        })
    }

    /// Directory holding `Frost.toml`.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    /// Directories searched for imported modules: `pathex`, then the
    /// bundle directory.
    pub fn search_paths(&self) -> Vec<PathBuf> {
        let mut paths = self.settings.pathex.clone();
        paths.push(self.root.clone());
        paths
    }

    /// Runtime options as `OPTION` entries.
    pub fn options(&self) -> Toc {
        self.settings
            .options
            .iter()
            .map(|o| TocEntry::option(o.clone()))
            .collect()
    }

    /// The declared binaries and data files as an analysis.
    pub fn declared_files(&self) -> Analysis {
        let mut analysis = Analysis::new();
        for file in &self.binaries {
            analysis.add_binary(file.name.clone(), file.path.clone());
        }
        for file in &self.datas {
            analysis.add_data(file.name.clone(), file.path.clone());
        }
        analysis
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::toc::EntryKind;

    const BUNDLE: &str = r#"
[bundle]
name = "app"
mode = "onedir"
console = false
options = ["v", "W ignore"]
pathex = ["lib"]

[[scripts]]
name = "app"
path = "src/app.py"
imports = ["mylib"]

[[modules]]
name = "mylib"
path = "src/mylib/__init__.py"

[[modules]]
name = "ns"

[[binaries]]
name = "libfoo.so"
path = "/opt/native/libfoo.so"

[[datas]]
name = "assets/logo.png"
path = "assets/logo.png"
"#;

    #[test]
    fn test_parse_resolves_relative_paths() {
        let bundle = Bundle::parse(BUNDLE, Path::new("/work/app/Frost.toml")).unwrap();
        assert_eq!(bundle.name(), "app");
        assert_eq!(bundle.settings.mode, BundleMode::Onedir);
        assert!(!bundle.settings.console);
        assert!(bundle.settings.append_pkg);
        assert_eq!(bundle.scripts[0].path, Path::new("/work/app/src/app.py"));
        assert_eq!(bundle.scripts[0].imports, ["mylib"]);
        assert_eq!(bundle.modules[1].path, None);
        assert_eq!(bundle.binaries[0].path, Path::new("/opt/native/libfoo.so"));
        assert_eq!(
            bundle.search_paths(),
            [PathBuf::from("/work/app/lib"), PathBuf::from("/work/app")]
        );
    }

    #[test]
    fn test_defaults() {
        let bundle = Bundle::parse(
            "[bundle]\nname = \"tool\"\n[[scripts]]\nname = \"tool\"\npath = \"tool.py\"\n",
            Path::new("/p/Frost.toml"),
        )
        .unwrap();
        assert_eq!(bundle.settings.mode, BundleMode::Onefile);
        assert!(bundle.settings.console);
        assert!(!bundle.settings.debug);
        assert!(bundle.settings.key.is_none());
        assert!(bundle.options().is_empty());
    }

    #[test]
    fn test_options_and_declared_files() {
        let bundle = Bundle::parse(BUNDLE, Path::new("/work/app/Frost.toml")).unwrap();
        let options = bundle.options();
        assert_eq!(options.len(), 2);
        assert!(options.iter().all(|e| e.kind == EntryKind::Option));
        assert!(options.contains("W ignore"));

        let files = bundle.declared_files();
        assert_eq!(files.binaries.len(), 1);
        assert_eq!(
            files.datas.get("assets/logo.png").unwrap().source(),
            Some(Path::new("/work/app/assets/logo.png"))
        );
    }

    #[test]
    fn test_rejects_bundle_without_scripts() {
        let err = Bundle::parse("[bundle]\nname = \"app\"\n", Path::new("Frost.toml")).unwrap_err();
        assert!(err.to_string().contains("declares no scripts"));
    }

    #[test]
    fn test_rejects_unknown_mode() {
        let content = "[bundle]\nname = \"app\"\nmode = \"zip\"\n";
        assert!(Bundle::parse(content, Path::new("Frost.toml")).is_err());
    }
}

//! Implementation of `frost build`.
//!
//! Turns a `Frost.toml` bundle description into an executable: the import
//! graph and hooks decide what ships, then the object archive, resource
//! archive and executable are assembled (and collected into a directory
//! for one-dir bundles). Every target goes through the build cache, so
//! an unchanged bundle is not rebuilt.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};

use crate::builder::bootstrap::{boot_script, bootstrap_sources};
use crate::builder::{
    default_patcher, BinaryCache, BuildCache, BuildWarning, CodeCompiler, Collect, CollectInput,
    Exe, ExeEnv, ExeInput, ExeOptions, ExeResources, InterpreterCompiler, Pyz, ResourcePatcher,
};
use crate::core::bundle::{Bundle, BundleMode};
use crate::core::{Analysis, Os, Platform, Target, TargetKind};
use crate::depend::{ImportGraph, ModuleGraph};
use crate::hooks::HookEngine;
use crate::util::config::Config;
use crate::util::fs::{ensure_dir, remove_dir_all_if_exists};
use crate::util::GlobalContext;

/// Python version assumed when the configuration names none.
pub const DEFAULT_PYTHON_VERSION: u32 = 311;

/// File name of the object archive inside the work directory.
const PYZ_NAME: &str = "PYZ-00.pyz";

/// Options for the build command.
#[derive(Debug, Clone, Default)]
pub struct FreezeOptions {
    /// Path to `Frost.toml`
    pub bundle_path: PathBuf,

    /// Remove the work directory before building
    pub clean: bool,

    /// Override the configured work directory
    pub workpath: Option<PathBuf>,

    /// Override the configured output directory
    pub distpath: Option<PathBuf>,

    /// Number of parallel jobs for binary processing
    pub jobs: Option<usize>,
}

/// External tools the pipeline drives.
#[derive(Clone)]
pub struct FreezeTools {
    pub compiler: Arc<dyn CodeCompiler>,
    pub patcher: Arc<dyn ResourcePatcher>,
    pub platform: Platform,

    /// Root of the stripped/compacted binary cache
    pub bincache_dir: PathBuf,
}

/// What happened to one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetReport {
    pub kind: TargetKind,
    pub output: PathBuf,
    /// `false` when the previous output was reused
    pub rebuilt: bool,
}

/// Result of a build.
#[derive(Debug, Clone, Default)]
pub struct FreezeResult {
    /// The deliverable: the executable, or the collected directory
    pub output: PathBuf,
    pub workpath: PathBuf,
    pub targets: Vec<TargetReport>,
    pub warnings: Vec<BuildWarning>,
}

impl FreezeResult {
    /// Whether any target had to be assembled.
    pub fn rebuilt_any(&self) -> bool {
        self.targets.iter().any(|t| t.rebuilt)
    }
}

/// Work and output directories of a bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildDirs {
    /// Intermediate files and build records, private to the bundle
    pub workpath: PathBuf,
    /// Final deliverables
    pub distpath: PathBuf,
}

/// Resolve where `bundle` is built.
///
/// Command-line overrides win over the configuration; relative paths are
/// taken from the bundle directory. The work directory gets a
/// subdirectory per bundle.
pub fn build_dirs(bundle: &Bundle, config: &Config, opts: &FreezeOptions) -> BuildDirs {
    let resolve = |over: &Option<PathBuf>, configured: &Option<PathBuf>, default: &str| {
        let dir = over
            .as_ref()
            .or(configured.as_ref())
            .cloned()
            .unwrap_or_else(|| PathBuf::from(default));
        if dir.is_absolute() {
            dir
        } else {
            bundle.root().join(dir)
        }
    };
    BuildDirs {
        workpath: resolve(&opts.workpath, &config.build.workpath, "build").join(bundle.name()),
        distpath: resolve(&opts.distpath, &config.build.distpath, "dist"),
    }
}

/// Runtime library name for `platform` and a `major * 100 + minor` version.
pub fn default_python_library(platform: &Platform, version: u32) -> String {
    let (major, minor) = (version / 100, version % 100);
    match platform.os {
        Os::Windows => format!("python{}{}.dll", major, minor),
        Os::MacOs => format!("libpython{}.{}.dylib", major, minor),
        Os::Cygwin => format!("libpython{}.{}.dll", major, minor),
        Os::Linux | Os::Other => format!("libpython{}.{}.so.1.0", major, minor),
    }
}

fn loader_dir(config: &Config) -> Result<PathBuf> {
    match &config.loader.dir {
        Some(dir) => Ok(dir.clone()),
        None => bail!(
            "no loader directory configured\n\
             hint: set `dir` under [loader] in .frost/config.toml to the pre-built loader stubs"
        ),
    }
}

/// Build the bundle described by `opts.bundle_path`.
pub fn freeze(ctx: &GlobalContext, opts: &FreezeOptions) -> Result<FreezeResult> {
    let config = ctx.load_config();
    let bundle = Bundle::load(&opts.bundle_path)?;
    loader_dir(&config)?;

    let platform = Platform::host();
    let compiler = InterpreterCompiler::new(config.python.interpreter.as_deref())?;
    let tools = FreezeTools {
        compiler: Arc::new(compiler),
        patcher: default_patcher(&platform),
        platform,
        bincache_dir: ctx.bincache_dir(),
    };
    freeze_bundle(&bundle, &config, opts, &tools)
}

/// Build with explicit tools.
pub fn freeze_with(
    config: &Config,
    opts: &FreezeOptions,
    tools: &FreezeTools,
) -> Result<FreezeResult> {
    let bundle = Bundle::load(&opts.bundle_path)?;
    freeze_bundle(&bundle, config, opts, tools)
}

fn freeze_bundle(
    bundle: &Bundle,
    config: &Config,
    opts: &FreezeOptions,
    tools: &FreezeTools,
) -> Result<FreezeResult> {
    let loader_dir = loader_dir(config)?;

    let dirs = build_dirs(bundle, config, opts);
    if opts.clean {
        tracing::info!("Removing temporary files in {}", dirs.workpath.display());
        remove_dir_all_if_exists(&dirs.workpath)?;
    }
    ensure_dir(&dirs.workpath)?;
    ensure_dir(&dirs.distpath)?;

    if let Some(jobs) = opts.jobs.or(config.build.jobs) {
        if let Err(e) = rayon::ThreadPoolBuilder::new().num_threads(jobs).build_global() {
            tracing::debug!("thread pool already configured: {}", e);
        }
    }

    let mut result = FreezeResult {
        workpath: dirs.workpath.clone(),
        ..FreezeResult::default()
    };

    let (analysis, engine) = analyze(bundle, config, &loader_dir)?;
    result.warnings.extend(engine.warnings().iter().cloned());

    let settings = &bundle.settings;
    let cache = BuildCache::new(&dirs.workpath);

    let mut pyz = Pyz::new(
        &dirs.workpath,
        dirs.workpath.join(PYZ_NAME),
        &analysis.pure,
        analysis.code_cache.clone(),
        &bootstrap_sources(&loader_dir),
        settings.key.as_deref(),
        tools.compiler.clone(),
    )?;
    build_step(&cache, &mut pyz, &mut result)?;

    let strip = settings.strip || config.build.strip;
    let upx = settings.upx || config.build.upx;
    let bincache = if strip || upx {
        BinaryCache::new(
            &tools.bincache_dir,
            strip,
            upx,
            config.build.upx_dir.as_deref(),
            &tools.platform,
        )
    } else {
        BinaryCache::passthrough()
    };

    let python_version = config
        .loader
        .python_version
        .unwrap_or(DEFAULT_PYTHON_VERSION);
    let env = ExeEnv {
        workpath: dirs.workpath.clone(),
        distpath: dirs.distpath.clone(),
        loader_dir,
        platform: tools.platform.clone(),
        pylib_name: config
            .loader
            .python_library
            .clone()
            .unwrap_or_else(|| default_python_library(&tools.platform, python_version)),
        python_version,
        bincache: bincache.clone(),
        patcher: tools.patcher.clone(),
    };

    let onedir = settings.mode == BundleMode::Onedir;
    let mut exe_opts = ExeOptions::new(bundle.name());
    exe_opts.console = settings.console;
    exe_opts.debug = settings.debug;
    exe_opts.exclude_binaries = onedir;
    exe_opts.append_pkg = settings.append_pkg;
    exe_opts.strip = strip;
    exe_opts.upx = upx;
    exe_opts.uac_admin = settings.uac_admin;
    exe_opts.uac_uiaccess = settings.uac_uiaccess;
    exe_opts.manifest = settings.manifest.clone();
    exe_opts.resources = ExeResources {
        icon: settings.icon.clone(),
        version: settings.version.clone(),
        resources: settings.resources.clone(),
    };

    let options = bundle.options();
    // One-dir bundles ship binaries and data files beside the executable.
    let payload = if onedir {
        analysis.dependencies.clone()
    } else {
        analysis.payload()
    };
    let inputs = [
        ExeInput::Toc(&analysis.scripts),
        ExeInput::Target(&pyz),
        ExeInput::Toc(&payload),
        ExeInput::Toc(&options),
    ];
    let mut exe = Exe::new(exe_opts, &env, &inputs)?;
    build_step(&cache, exe.pkg_mut(), &mut result)?;
    build_step(&cache, &mut exe, &mut result)?;

    if onedir {
        let protected = [dirs.workpath.as_path(), bundle.root()];
        let mut collect = Collect::new(
            bundle.name(),
            &dirs.distpath,
            &protected,
            &[
                CollectInput::Exe(&exe),
                CollectInput::Toc(&analysis.binaries),
                CollectInput::Toc(&analysis.zipfiles),
                CollectInput::Toc(&analysis.datas),
            ],
        )
        .with_binary_cache(bincache);
        build_step(&cache, &mut collect, &mut result)?;
        result.output = collect.output().to_path_buf();
    } else {
        result.output = exe.output().to_path_buf();
    }

    Ok(result)
}

/// Build one target through the cache and record the outcome.
fn build_step(
    cache: &BuildCache,
    target: &mut dyn Target,
    result: &mut FreezeResult,
) -> Result<()> {
    let rebuilt = cache.build(target).with_context(|| {
        format!(
            "failed to build {} {}",
            target.kind(),
            target.output().display()
        )
    })?;
    result.warnings.extend(target.warnings().iter().cloned());
    result.targets.push(TargetReport {
        kind: target.kind(),
        output: target.output().to_path_buf(),
        rebuilt,
    });
    Ok(())
}

/// Resolve the bundle's modules and run its hooks.
fn analyze(bundle: &Bundle, config: &Config, loader_dir: &Path) -> Result<(Analysis, HookEngine)> {
    let builtin: Vec<PathBuf> = Some(loader_dir.join("hooks"))
        .into_iter()
        .filter(|dir| dir.is_dir())
        .collect();
    let mut user = config.hooks.dirs.clone();
    user.extend(bundle.settings.hookspath.iter().cloned());
    let mut engine = HookEngine::from_dirs(&builtin, &user)?;

    let mut graph =
        ImportGraph::new(bundle.search_paths()).with_excluded(engine.excluded_imports().clone());
    for script in &bundle.scripts {
        graph.add_script(script.name.clone(), script.path.clone());
    }
    for module in &bundle.modules {
        graph.add_module(module.name.clone(), module.path.clone());
    }

    let declared_imports = bundle
        .scripts
        .iter()
        .map(|s| (&s.name, &s.imports))
        .chain(bundle.modules.iter().map(|m| (&m.name, &m.imports)));
    for (caller, imports) in declared_imports {
        for name in imports {
            if let Err(e) = graph.import_module(caller, name) {
                tracing::warn!("`{}` imports `{}`, but {}", caller, name, e);
            }
        }
    }

    engine.run(&mut graph)?;

    let mut analysis = bundle.declared_files();
    if let Some(boot) = boot_script(loader_dir) {
        analysis.scripts.append(boot);
    }
    analysis.scripts.extend(graph.scripts());
    analysis.pure = graph.modules();
    analysis.binaries.extend(engine.binaries());
    analysis.datas.extend(engine.datas());

    tracing::debug!(
        "analysis: {} scripts, {} modules, {} binaries, {} data files",
        analysis.scripts.len(),
        analysis.pure.len(),
        analysis.binaries.len(),
        analysis.datas.len()
    );
    Ok((analysis, engine))
}

/// Remove the bundle's work directory and its deliverables.
///
/// Returns the paths that were removed.
pub fn clean(config: &Config, opts: &FreezeOptions, platform: &Platform) -> Result<Vec<PathBuf>> {
    let bundle = Bundle::load(&opts.bundle_path)?;
    let dirs = build_dirs(&bundle, config, opts);

    let exe = dirs
        .distpath
        .join(format!("{}{}", bundle.name(), platform.exe_suffix()));
    let candidates = [
        dirs.workpath,
        dirs.distpath.join(bundle.name()),
        exe,
        dirs.distpath.join(format!("{}.pkg", bundle.name())),
    ];

    let mut removed = Vec::new();
    for path in candidates {
        if path.is_dir() {
            remove_dir_all_if_exists(&path)?;
        } else if path.is_file() {
            std::fs::remove_file(&path)
                .with_context(|| format!("failed to remove {}", path.display()))?;
        } else {
            continue;
        }
        removed.push(path);
    }
    Ok(removed)
}

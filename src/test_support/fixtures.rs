//! Filesystem fixtures for common test scenarios.

use std::path::{Path, PathBuf};

use crate::builder::bootstrap::{BOOTSTRAP_MODULES, BOOT_SCRIPT};
use crate::core::platform::Platform;

/// Write `content` to `root/rel`, creating parent directories.
pub fn write_file(root: &Path, rel: &str, content: impl AsRef<[u8]>) -> PathBuf {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    path
}

/// A loader directory with all four stub variants for the host platform
/// and the bootstrap module sources.
#[derive(Debug, Clone)]
pub struct LoaderFixture {
    dir: PathBuf,
    platform: Platform,
}

impl LoaderFixture {
    pub fn new(root: &Path) -> Self {
        let dir = root.join("loader");
        let platform = Platform::host();
        for (console, debug) in [(true, false), (false, false), (true, true), (false, true)] {
            let name = platform.loader_name(console, debug);
            write_file(
                &dir.join(platform.dir_name()),
                &name,
                format!("STUB:{}\n", name),
            );
        }
        let bootstrap = dir.join("bootstrap");
        for name in BOOTSTRAP_MODULES.iter().chain([&BOOT_SCRIPT]) {
            write_file(&bootstrap, &format!("{}.py", name), format!("# {}\n", name));
        }
        LoaderFixture { dir, platform }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    /// Path of a stub variant.
    pub fn stub(&self, console: bool, debug: bool) -> PathBuf {
        self.dir
            .join(self.platform.dir_name())
            .join(self.platform.loader_name(console, debug))
    }
}

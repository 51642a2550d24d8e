//! Target platform description.

use std::fmt;

/// Operating system family the bundle is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Os {
    Linux,
    MacOs,
    Windows,
    Cygwin,
    Other,
}

impl Os {
    /// Name used for the loader directory (`<os>-<arch>`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Os::Linux => "Linux",
            Os::MacOs => "Darwin",
            Os::Windows => "Windows",
            Os::Cygwin => "Cygwin",
            Os::Other => "Unknown",
        }
    }
}

/// Host/target platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Platform {
    pub os: Os,
    pub arch: String,
}

impl Platform {
    pub fn new(os: Os, arch: impl Into<String>) -> Self {
        Platform {
            os,
            arch: arch.into(),
        }
    }

    /// The platform this binary was compiled for.
    pub fn host() -> Self {
        let os = match std::env::consts::OS {
            "linux" => Os::Linux,
            "macos" => Os::MacOs,
            "windows" => Os::Windows,
            "cygwin" => Os::Cygwin,
            _ => Os::Other,
        };
        let arch = match std::env::consts::ARCH {
            "x86" => "32bit",
            "x86_64" => "64bit",
            other => other,
        };
        Platform::new(os, arch)
    }

    /// Directory name holding this platform's loader stubs.
    pub fn dir_name(&self) -> String {
        format!("{}-{}", self.os.as_str(), self.arch)
    }

    pub fn is_windows(&self) -> bool {
        matches!(self.os, Os::Windows | Os::Cygwin)
    }

    pub fn is_macos(&self) -> bool {
        self.os == Os::MacOs
    }

    /// Suffix appended to executables.
    pub fn exe_suffix(&self) -> &'static str {
        if self.is_windows() {
            ".exe"
        } else {
            ""
        }
    }

    /// Whether a separate windowed (no console) loader exists.
    pub fn supports_windowed(&self) -> bool {
        self.os == Os::Windows || self.is_macos()
    }

    /// Whether binary compaction with UPX is applied on this platform.
    pub fn supports_upx(&self) -> bool {
        self.is_windows()
    }

    /// File name of the loader stub for the given console/debug axes.
    pub fn loader_name(&self, console: bool, debug: bool) -> String {
        let mut name = String::from("run");
        if !console && self.supports_windowed() {
            name.push('w');
        }
        if debug {
            name.push_str("_d");
        }
        name.push_str(self.exe_suffix());
        name
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dir_name())
    }
}

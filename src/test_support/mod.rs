//! Test utilities and fakes for Frost unit tests.
//!
//! Compilation and resource patching normally shell out to external
//! tools; the fakes here keep unit tests hermetic.

pub mod fixtures;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::Result;

use crate::builder::compile::CodeCompiler;
use crate::builder::errors::{BuildError, BuildWarning};
use crate::builder::exe::{ExeResources, ResourcePatcher};

pub use fixtures::*;

/// Marker that makes [`FakeCompiler`] report a syntax error.
pub const SYNTAX_ERROR: &str = "def (:";

/// Compiler producing `CODE:<module>\n` followed by the source bytes.
#[derive(Debug, Default)]
pub struct FakeCompiler {
    calls: AtomicUsize,
}

impl FakeCompiler {
    /// Number of compilations performed.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CodeCompiler for FakeCompiler {
    fn magic(&self) -> [u8; 4] {
        [0x42, 0x0d, 0x0d, 0x0a]
    }

    fn compile_source(&self, module: &str, filename: &Path, source: &[u8]) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if String::from_utf8_lossy(source).contains(SYNTAX_ERROR) {
            return Err(BuildError::Compile {
                module: module.to_string(),
                path: filename.to_path_buf(),
                message: "invalid syntax (line 1)".into(),
            }
            .into());
        }
        let mut code = format!("CODE:{}\n", module).into_bytes();
        code.extend_from_slice(source);
        Ok(code)
    }
}

/// Patcher that records what it was asked to do.
#[derive(Debug, Default)]
pub struct RecordingPatcher {
    pub patched: Mutex<Vec<(PathBuf, ExeResources)>>,
    pub signed: Mutex<Vec<PathBuf>>,
}

impl ResourcePatcher for RecordingPatcher {
    fn patch(&self, exe: &Path, resources: &ExeResources) -> Result<Vec<BuildWarning>> {
        if let Ok(mut patched) = self.patched.lock() {
            patched.push((exe.to_path_buf(), resources.clone()));
        }
        Ok(Vec::new())
    }

    fn fix_signature(&self, exe: &Path) -> Result<()> {
        if let Ok(mut signed) = self.signed.lock() {
            signed.push(exe.to_path_buf());
        }
        Ok(())
    }
}

//! Turning module sources into code objects.
//!
//! The bytecode format belongs to the target interpreter, so compilation
//! is delegated to it. The `CodeCompiler` trait is the seam; assemblers
//! only see bytes and the magic number identifying their format.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::builder::errors::BuildError;
use crate::util::process::{find_python, ProcessBuilder};

/// Source text of an empty (namespace) module.
pub const EMPTY_MODULE: &[u8] = b"#\n";

/// Exit status the helper script uses to signal a syntax error.
const SYNTAX_ERROR_EXIT: i32 = 3;

const COMPILE_SCRIPT: &str = r#"
import marshal, sys
source = sys.stdin.buffer.read()
try:
    code = compile(source, sys.argv[1], 'exec', dont_inherit=True)
except SyntaxError as e:
    sys.stderr.write('%s (line %s)' % (e.msg, e.lineno))
    sys.exit(3)
sys.stdout.buffer.write(marshal.dumps(code))
"#;

const MAGIC_SCRIPT: &str =
    "import importlib.util, sys; sys.stdout.buffer.write(importlib.util.MAGIC_NUMBER)";

/// Produces code objects for modules.
pub trait CodeCompiler: Send + Sync {
    /// Magic number of the produced bytecode format.
    fn magic(&self) -> [u8; 4];

    /// Compile `source`, reporting errors against `filename`.
    fn compile_source(&self, module: &str, filename: &Path, source: &[u8]) -> Result<Vec<u8>>;

    /// Compile a source file.
    ///
    /// A missing file is a `MissingInput` error, distinct from a
    /// `Compile` error raised for invalid source.
    fn compile_file(&self, module: &str, path: &Path) -> Result<Vec<u8>> {
        if !path.is_file() {
            return Err(BuildError::MissingInput {
                name: module.to_string(),
                path: path.to_path_buf(),
            }
            .into());
        }
        let source =
            std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        self.compile_source(module, path, &source)
    }
}

/// Compiles with an external interpreter.
#[derive(Debug, Clone)]
pub struct InterpreterCompiler {
    python: PathBuf,
    magic: [u8; 4],
}

impl InterpreterCompiler {
    /// Use `python`, or the first interpreter found on PATH.
    pub fn new(python: Option<&Path>) -> Result<Self> {
        let python = match python {
            Some(p) => p.to_path_buf(),
            None => find_python().context(
                "no Python interpreter found; set `[python] interpreter` in the frost config",
            )?,
        };

        let output = ProcessBuilder::new(&python)
            .args(["-c", MAGIC_SCRIPT])
            .exec_and_check()
            .context("failed to query the interpreter's bytecode magic")?;
        let magic: [u8; 4] = output
            .stdout
            .get(..4)
            .and_then(|b| b.try_into().ok())
            .context("interpreter returned a malformed magic number")?;

        tracing::debug!("using {} (magic {})", python.display(), hex::encode(magic));
        Ok(InterpreterCompiler { python, magic })
    }

    pub fn python(&self) -> &Path {
        &self.python
    }
}

impl CodeCompiler for InterpreterCompiler {
    fn magic(&self) -> [u8; 4] {
        self.magic
    }

    fn compile_source(&self, module: &str, filename: &Path, source: &[u8]) -> Result<Vec<u8>> {
        let output = ProcessBuilder::new(&self.python)
            .arg("-c")
            .arg(COMPILE_SCRIPT)
            .arg(filename)
            .stdin(source.to_vec())
            .exec()?;

        match output.status.code() {
            Some(0) => Ok(output.stdout),
            Some(SYNTAX_ERROR_EXIT) => Err(BuildError::Compile {
                module: module.to_string(),
                path: filename.to_path_buf(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into()),
            code => anyhow::bail!(
                "interpreter failed to compile `{}` (exit code {:?}): {}",
                module,
                code,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        }
    }
}

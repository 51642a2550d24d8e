//! Target assemblers.
//!
//! This module implements the build stages (PYZ, PKG, EXE, COLLECT), the
//! cross-executable MERGE step and the incremental build cache they share.

pub mod bincache;
pub mod bootstrap;
pub mod collect;
pub mod compile;
pub mod errors;
pub mod exe;
pub mod guts;
pub mod merge;
pub mod pkg;
pub mod pyz;
pub mod utils;

pub use bincache::BinaryCache;
pub use collect::{Collect, CollectInput};
pub use compile::{CodeCompiler, InterpreterCompiler};
pub use errors::{BuildError, BuildWarning};
pub use exe::{default_patcher, Exe, ExeEnv, ExeInput, ExeOptions, ExeResources, ResourcePatcher};
pub use guts::{BuildCache, BuildRecord, Guts};
pub use merge::{merge, MergeTarget};
pub use pkg::{CompressionPolicy, Pkg};
pub use pyz::Pyz;

//! Hook system.
//!
//! Hooks are per-module plugin scripts named `hook-<module>.py`. They add
//! hidden imports, data files and binaries the import analysis cannot see,
//! and may exclude imports from being followed. Scripts are read
//! statically; a script defining a `hook(hook_api)` function has it
//! supplied as a registered [`HookFunction`].

pub mod api;
pub mod cache;
pub mod engine;
pub mod excluded;
pub mod files;
pub mod import_hook;
pub mod parser;

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

pub use api::{HookApi, HookEffects, HookFunction};
pub use cache::HooksCache;
pub use engine::HookEngine;
pub use excluded::ExcludedImports;
pub use files::{format_binaries_and_datas, AdditionalFilesCache};
pub use import_hook::ImportHook;
pub use parser::{Literal, StaticHook};

/// Malformed hook declaration.
#[derive(Debug, Error, Diagnostic)]
pub enum HookError {
    #[error("cannot read `{field}` from hook {}: {message}", path.display())]
    #[diagnostic(
        code(frost::hooks::literal),
        help("hook fields must be assigned plain literals")
    )]
    Literal {
        path: PathBuf,
        field: &'static str,
        message: String,
    },

    #[error("empty destination for `{pattern}` is not allowed")]
    #[diagnostic(
        code(frost::hooks::empty_destination),
        help("use \".\" to place files at the top level")
    )]
    EmptyDestination { pattern: String },

    #[error("unable to find `{pattern}` when adding binary and data files")]
    #[diagnostic(code(frost::hooks::no_match))]
    NoMatch { pattern: String },
}

impl HookError {
    /// Convert to a user-friendly diagnostic.
    pub fn to_diagnostic(&self) -> crate::util::diagnostic::Diagnostic {
        use crate::util::diagnostic::Diagnostic as Diag;
        match self {
            HookError::Literal { path, field, message } => {
                Diag::error(format!("cannot read `{}` from hook", field))
                    .with_location(path.clone())
                    .with_context(message.clone())
                    .with_suggestion(crate::util::diagnostic::suggestions::STALE_HOOK)
            }
            HookError::EmptyDestination { pattern } => {
                Diag::error(format!("empty destination for `{}`", pattern))
                    .with_suggestion("help: Use \".\" to place files at the top level")
            }
            HookError::NoMatch { pattern } => {
                Diag::error(format!("unable to find `{}`", pattern))
                    .with_context("no file matched the hook's pattern")
            }
        }
    }
}

//! Build error and warning types.
//!
//! Fatal failures are `BuildError`s and travel through `anyhow` like any
//! other error; callers recover the kind with `downcast_ref::<BuildError>()`.
//! Non-fatal conditions are `BuildWarning`s: logged where detected and kept
//! on the assembler that raised them.

use std::path::PathBuf;

use miette::Diagnostic as MietteDiagnostic;
use thiserror::Error;

use crate::util::diagnostic::{suggestions, Diagnostic};

/// Fatal error raised while assembling a target.
#[derive(Debug, Error, MietteDiagnostic)]
pub enum BuildError {
    /// Malformed entry or an internal name escaping the output root.
    #[error("{message}")]
    #[diagnostic(code(frost::build::structural))]
    Structural {
        message: String,
        entry: Option<String>,
    },

    /// A required source file does not exist.
    #[error("input file for `{name}` not found: {}", path.display())]
    #[diagnostic(code(frost::build::missing_input))]
    MissingInput { name: String, path: PathBuf },

    /// A module failed to compile.
    #[error("failed to compile `{module}` ({}): {message}", path.display())]
    #[diagnostic(code(frost::build::compile), help("fix the syntax error and rebuild"))]
    Compile {
        module: String,
        path: PathBuf,
        message: String,
    },

    /// The pre-built native loader for this platform/mode is absent.
    #[error("no pre-compiled loader found at {}", path.display())]
    #[diagnostic(
        code(frost::build::missing_loader),
        help("build the native loader for this platform and point `[loader] dir` at it")
    )]
    PrerequisiteMissing { path: PathBuf },
}

impl BuildError {
    /// A structural error not tied to a particular entry.
    pub fn structural(message: impl Into<String>) -> Self {
        BuildError::Structural {
            message: message.into(),
            entry: None,
        }
    }

    /// An internal name that would place a file outside the output root.
    pub fn unsafe_name(name: &str) -> Self {
        BuildError::Structural {
            message: format!(
                "security alert: refusing to store `{}` outside of the output directory",
                name
            ),
            entry: Some(name.to_string()),
        }
    }

    /// Whether this error must abort the whole pipeline rather than only
    /// the current target.
    pub fn aborts_pipeline(&self) -> bool {
        matches!(
            self,
            BuildError::Structural { .. } | BuildError::PrerequisiteMissing { .. }
        )
    }

    /// Convert to a user-friendly diagnostic.
    pub fn to_diagnostic(&self) -> Diagnostic {
        match self {
            BuildError::Structural { message, entry } => {
                let mut diag = Diagnostic::error(message.clone());
                if let Some(entry) = entry {
                    diag = diag
                        .with_context(format!("offending entry: `{}`", entry))
                        .with_suggestion(suggestions::UNSAFE_NAME);
                }
                diag
            }
            BuildError::MissingInput { name, path } => {
                Diagnostic::error(format!("input file for `{}` not found", name))
                    .with_location(path.clone())
            }
            BuildError::Compile {
                module,
                path,
                message,
            } => Diagnostic::error(format!("failed to compile `{}`", module))
                .with_location(path.clone())
                .with_context(message.clone())
                .with_suggestion(suggestions::COMPILE_FAILED),
            BuildError::PrerequisiteMissing { path } => {
                Diagnostic::error("no pre-compiled loader for this platform")
                    .with_location(path.clone())
                    .with_suggestion(suggestions::MISSING_LOADER)
            }
        }
    }
}

/// Non-fatal condition detected during a build.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildWarning {
    /// Two binaries share an internal name; the first one is kept.
    #[error(
        "two binaries added with the same internal name `{name}`; skipping {}",
        skipped.display()
    )]
    DuplicateBinary {
        name: String,
        kept: PathBuf,
        skipped: PathBuf,
    },

    /// One binary file was added under two internal names; the first is kept.
    #[error(
        "binary {} added under two names; keeping `{kept_name}`, skipping `{skipped_name}`",
        path.display()
    )]
    DuplicateSourcePath {
        path: PathBuf,
        kept_name: String,
        skipped_name: String,
    },

    /// A hook referenced a hidden import that cannot be found.
    #[error("hidden import `{import}` not found (probably old hook for `{module}`)")]
    StaleHook { module: String, import: String },

    /// Copying permission bits or timestamps failed.
    #[error("failed to copy flags of {}: {reason}", path.display())]
    PermissionPropagation { path: PathBuf, reason: String },

    /// A requested executable resource cannot be applied on this platform.
    #[error("ignoring {what}: {reason}")]
    IgnoredResource { what: String, reason: String },
}

impl BuildWarning {
    /// Log the warning through `tracing`.
    pub fn emit(&self) {
        tracing::warn!("{}", self);
    }

    /// Convert to a user-friendly diagnostic.
    pub fn to_diagnostic(&self) -> Diagnostic {
        let diag = Diagnostic::warning(self.to_string());
        match self {
            BuildWarning::DuplicateBinary { kept, .. } => {
                diag.with_context(format!("was placed previously from {}", kept.display()))
            }
            BuildWarning::StaleHook { .. } => diag.with_suggestion(suggestions::STALE_HOOK),
            _ => diag,
        }
    }
}

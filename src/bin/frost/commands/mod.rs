//! Command implementations

pub mod build;
pub mod clean;
pub mod hooks;
pub mod inspect;

use std::path::PathBuf;

use anyhow::{bail, Result};

use frost::util::diagnostic::suggestions;
use frost::util::GlobalContext;

/// The bundle description named on the command line, or the nearest one.
pub fn bundle_path(ctx: &GlobalContext, explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path);
    }
    match ctx.find_bundle() {
        Some(path) => Ok(path),
        None => bail!(
            "could not find `Frost.toml` in `{}` or any parent directory\n{}",
            ctx.cwd().display(),
            suggestions::NO_BUNDLE
        ),
    }
}

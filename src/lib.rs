//! Frost - bundles a Python application and its dependencies into a
//! standalone executable
//!
//! This crate provides the core library functionality for Frost,
//! including the archive formats, the incremental assemblers, import
//! analysis and the hook system.

pub mod archive;
pub mod builder;
pub mod core;
pub mod depend;
pub mod hooks;
pub mod ops;
pub mod util;

/// Test utilities and fakes for Frost unit tests.
///
/// This module is only available when compiling with `--cfg test` or
/// running tests. It provides fakes for code compilation and resource
/// patching plus filesystem fixtures.
#[cfg(test)]
pub mod test_support;

pub use crate::core::{
    analysis::Analysis, bundle::Bundle, target::Target, toc::EntryKind, toc::Toc, toc::TocEntry,
};

pub use util::context::GlobalContext;

//! Core data structures for Frost.
//!
//! - Tables of contents (the manifests every stage consumes)
//! - Analysis results and bundle descriptions
//! - Targets and the target platform

pub mod analysis;
pub mod bundle;
pub mod platform;
pub mod target;
pub mod toc;

pub use analysis::Analysis;
pub use bundle::{Bundle, BundleMode};
pub use platform::{Os, Platform};
pub use target::{Target, TargetKind};
pub use toc::{EntryKind, Toc, TocEntry};

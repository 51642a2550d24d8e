//! High-level operations.
//!
//! This module contains the implementation of Frost commands.

pub mod freeze;
pub mod inspect;

pub use freeze::{
    build_dirs, clean, freeze, freeze_with, BuildDirs, FreezeOptions, FreezeResult, FreezeTools,
    TargetReport,
};
pub use inspect::{
    format_listing, inspect, Archive, ArchiveKind, ArchiveListing, InspectOptions, InspectResult,
    ListedEntry,
};

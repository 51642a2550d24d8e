//! Dependency analysis.

pub mod graph;

pub use graph::{GraphError, ImportGraph, ModuleGraph};

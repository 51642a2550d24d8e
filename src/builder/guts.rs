//! Incremental build records.
//!
//! Every target describes its inputs as a list of named fields ("guts"),
//! each paired with a comparator. After a successful assembly the fields,
//! the build time and the observed output mtimes are persisted as JSON in
//! the work directory. The next run compares against that record and only
//! reassembles when something changed.
//!
//! The check is conservative: any doubt (missing record, unreadable
//! record, vanished file) leads to a rebuild.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::target::{Target, TargetKind};
use crate::core::toc::Toc;
use crate::util::fs::{mtime_nanos, system_time_nanos, write_atomic};

/// How a recorded field is compared with its current value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    /// Plain equality
    Eq,
    /// Same entries, and every referenced file exists and is not newer
    /// than the last build
    Toc,
    /// Same path, and the file exists and is not newer than the last build
    File,
    /// Recorded for reference only
    Skip,
}

/// One named input.
#[derive(Debug, Clone)]
pub struct GutsField {
    pub name: &'static str,
    /// `None` when the value could not be serialized; such a field never
    /// matches a record
    pub value: Option<Value>,
    pub comparator: Comparator,
}

/// The inputs of a target.
#[derive(Debug, Clone, Default)]
pub struct Guts {
    fields: Vec<GutsField>,
}

impl Guts {
    pub fn new() -> Self {
        Guts::default()
    }

    /// Add a field compared by equality.
    pub fn field(mut self, name: &'static str, value: impl Serialize) -> Self {
        self.push(name, value, Comparator::Eq);
        self
    }

    /// Add a manifest whose files are checked for freshness.
    pub fn toc(mut self, name: &'static str, toc: &Toc) -> Self {
        self.push(name, toc, Comparator::Toc);
        self
    }

    /// Add an input file checked for freshness.
    pub fn file(mut self, name: &'static str, path: &Path) -> Self {
        self.push(name, path, Comparator::File);
        self
    }

    /// Add a field that is recorded but never compared.
    pub fn skip(mut self, name: &'static str, value: impl Serialize) -> Self {
        self.push(name, value, Comparator::Skip);
        self
    }

    fn push(&mut self, name: &'static str, value: impl Serialize, comparator: Comparator) {
        let value = match serde_json::to_value(value) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("cannot record build input `{}`: {}", name, e);
                None
            }
        };
        self.fields.push(GutsField {
            name,
            value,
            comparator,
        });
    }

    pub fn fields(&self) -> &[GutsField] {
        &self.fields
    }

    /// Name of the first field that invalidates `record`, if any.
    pub fn invalidated_by(&self, record: &BuildRecord) -> Option<&'static str> {
        self.fields.iter().find_map(|field| {
            let stale = match (record.guts.get(field.name), &field.value) {
                (_, _) if field.comparator == Comparator::Skip => false,
                (None, _) | (_, None) => true,
                (Some(old), Some(value)) => match field.comparator {
                    Comparator::Skip | Comparator::Eq => old != value,
                    Comparator::Toc => old != value || toc_is_stale(value, record.built_at),
                    Comparator::File => old != value || file_is_stale(value, record.built_at),
                },
            };
            stale.then_some(field.name)
        })
    }

    fn to_map(&self) -> BTreeMap<String, Value> {
        self.fields
            .iter()
            .map(|f| (f.name.to_string(), f.value.clone().unwrap_or(Value::Null)))
            .collect()
    }
}

fn is_stale(path: &Path, built_at: u64) -> bool {
    match mtime_nanos(path) {
        Some(mtime) => mtime > built_at,
        None => true,
    }
}

fn file_is_stale(value: &Value, built_at: u64) -> bool {
    match value.as_str() {
        Some(path) => is_stale(Path::new(path), built_at),
        None => false,
    }
}

fn toc_is_stale(value: &Value, built_at: u64) -> bool {
    let Ok(toc) = serde_json::from_value::<Toc>(value.clone()) else {
        return true;
    };
    toc.iter()
        .filter_map(|entry| entry.source())
        .any(|path| {
            let stale = is_stale(path, built_at);
            if stale {
                tracing::debug!("{} changed or vanished since the last build", path.display());
            }
            stale
        })
}

/// Persisted record of one successful assembly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildRecord {
    /// Kind of the target that produced it
    pub target: TargetKind,

    /// When assembly started, in nanoseconds since the epoch
    pub built_at: u64,

    /// Output files with their mtime right after assembly
    pub outputs: BTreeMap<PathBuf, Option<u64>>,

    /// Recorded input fields
    pub guts: BTreeMap<String, Value>,
}

impl BuildRecord {
    /// Load a record; a missing or unreadable record yields `None`.
    pub fn load(path: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str(&content) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::debug!("ignoring corrupt build record {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Persist the record atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).context("failed to serialize build record")?;
        write_atomic(path, content.as_bytes())
            .with_context(|| format!("failed to write build record {}", path.display()))
    }
}

/// Decides whether targets need reassembly and records finished builds.
#[derive(Debug, Clone)]
pub struct BuildCache {
    workpath: PathBuf,
}

impl BuildCache {
    /// Records are kept in `workpath`.
    pub fn new(workpath: impl Into<PathBuf>) -> Self {
        BuildCache {
            workpath: workpath.into(),
        }
    }

    pub fn workpath(&self) -> &Path {
        &self.workpath
    }

    /// Location of the record for `target`.
    pub fn record_path(&self, target: &dyn Target) -> PathBuf {
        self.workpath.join(target.record_name())
    }

    /// Whether `target` must be assembled.
    pub fn should_rebuild(&self, target: &dyn Target) -> bool {
        let name = target.output().display().to_string();

        if target.always_rebuild() {
            return true;
        }
        if !target.output().exists() {
            tracing::info!("Rebuilding {} because {} missing", target.kind(), name);
            return true;
        }
        if let Some(missing) = target.extra_outputs().into_iter().find(|p| !p.exists()) {
            tracing::info!(
                "Rebuilding {} because {} missing",
                target.kind(),
                missing.display()
            );
            return true;
        }

        let Some(record) = BuildRecord::load(&self.record_path(target)) else {
            tracing::info!("Building {} because no build record exists", target.kind());
            return true;
        };
        if record.target != target.kind() {
            return true;
        }

        if let Some(field) = target.guts().invalidated_by(&record) {
            tracing::info!("Building {} because {} changed", target.kind(), field);
            return true;
        }

        // An output touched or replaced behind our back is not ours anymore.
        for (path, recorded) in &record.outputs {
            if mtime_nanos(path) != *recorded {
                tracing::info!(
                    "Building {} because {} was modified externally",
                    target.kind(),
                    path.display()
                );
                return true;
            }
        }

        tracing::debug!("{} {} is up to date", target.kind(), name);
        false
    }

    /// Persist a record for a target assembled at `built_at`.
    pub fn record(&self, target: &dyn Target, built_at: u64) -> Result<()> {
        let mut outputs = BTreeMap::new();
        outputs.insert(target.output().to_path_buf(), mtime_nanos(target.output()));
        for extra in target.extra_outputs() {
            let mtime = mtime_nanos(&extra);
            outputs.insert(extra, mtime);
        }

        let record = BuildRecord {
            target: target.kind(),
            built_at,
            outputs,
            guts: target.guts().to_map(),
        };
        record.save(&self.record_path(target))
    }

    /// Assemble `target` unless its previous output can be reused.
    ///
    /// Returns whether the target was assembled.
    pub fn build(&self, target: &mut dyn Target) -> Result<bool> {
        if !self.should_rebuild(target) {
            tracing::info!(
                "Skipping {} {}, nothing changed",
                target.kind(),
                target.output().display()
            );
            return Ok(false);
        }

        // A failed assembly must not leave the previous record behind,
        // or a half-written output could later pass as up to date.
        let record_path = self.record_path(target);
        if record_path.exists() {
            std::fs::remove_file(&record_path)
                .with_context(|| format!("failed to remove {}", record_path.display()))?;
        }

        // Taken before assembly so inputs edited mid-build count as newer.
        let built_at = system_time_nanos(SystemTime::now());
        target.assemble()?;
        if !target.always_rebuild() {
            self.record(target, built_at)?;
        }
        Ok(true)
    }
}

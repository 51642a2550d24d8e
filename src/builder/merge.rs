//! Cross-executable dependency merging.
//!
//! Several executables built side by side often ship the same libraries
//! and data files. Merging keeps each source file in the first executable
//! that references it; every later executable drops its copy and gets a
//! `DEPENDENCY` entry pointing at the owner instead.
//!
//! A dependency name has the form `<relative path>:<internal name>`, where
//! the relative path leads from the dependent executable to the owner.

use std::collections::HashMap;
use std::path::{PathBuf, MAIN_SEPARATOR, MAIN_SEPARATOR_STR};

use anyhow::Result;

use crate::builder::errors::BuildError;
use crate::core::analysis::Analysis;
use crate::core::toc::{EntryKind, Toc, TocEntry};
use crate::util::fs::absolute;

/// One executable taking part in a merge.
pub struct MergeTarget<'a> {
    pub analysis: &'a mut Analysis,
    /// Identifier as derived from the entry script, e.g. `tools/app`
    pub id: String,
    /// Name the executable is actually deployed as
    pub filename: String,
}

impl<'a> MergeTarget<'a> {
    pub fn new(
        analysis: &'a mut Analysis,
        id: impl Into<String>,
        filename: impl Into<String>,
    ) -> Self {
        MergeTarget {
            analysis,
            id: id.into(),
            filename: filename.into(),
        }
    }
}

fn normcase(path: &str) -> String {
    if cfg!(windows) {
        path.to_lowercase().replace('/', "\\")
    } else {
        path.to_string()
    }
}

/// Character-wise longest common prefix.
fn common_prefix<'s>(items: &'s [String]) -> &'s str {
    let Some(first) = items.first() else {
        return "";
    };
    let mut len = first.len();
    for other in &items[1..] {
        len = first
            .char_indices()
            .zip(other.chars())
            .take_while(|((_, a), b)| a == b)
            .last()
            .map(|((i, c), _)| i + c.len_utf8())
            .unwrap_or(0)
            .min(len);
    }
    &first[..len]
}

/// Directory part of a path string, with a trailing separator.
fn dirname_with_sep(path: &str) -> String {
    let head = match path.rfind(MAIN_SEPARATOR) {
        Some(i) => &path[..=i],
        None => "",
    };
    let trimmed = head.trim_end_matches(MAIN_SEPARATOR);
    let mut dir = if trimmed.is_empty() { head } else { trimmed }.to_string();
    if !dir.ends_with(MAIN_SEPARATOR) {
        dir.push(MAIN_SEPARATOR);
    }
    dir
}

/// Path leading from the executable identified by `start` to the one
/// identified by `to`, both relative to the common root.
pub fn relative_id_path(start: &str, to: &str) -> String {
    let depth = start.split(MAIN_SEPARATOR).count().saturating_sub(1);
    if depth == 0 {
        return to.to_string();
    }
    let mut parts = vec![".."; depth];
    parts.push(to);
    parts.join(MAIN_SEPARATOR_STR)
}

fn entry_script(analysis: &Analysis) -> Result<String> {
    let script = analysis.entry_script().ok_or_else(|| {
        BuildError::structural("cannot merge an analysis without an entry script")
    })?;
    Ok(absolute(script).to_string_lossy().into_owned())
}

/// Deduplicate binaries and data files across `targets`.
///
/// Targets are processed in order, so earlier targets own shared files.
pub fn merge(targets: &mut [MergeTarget<'_>]) -> Result<()> {
    let scripts = targets
        .iter()
        .map(|t| entry_script(t.analysis).map(|s| normcase(&s)))
        .collect::<Result<Vec<_>>>()?;
    let prefix = dirname_with_sep(common_prefix(&scripts));
    tracing::debug!("merging {} executables under {}", targets.len(), prefix);

    let renames: HashMap<String, String> = targets
        .iter()
        .map(|t| (normcase(&t.id), t.filename.clone()))
        .collect();

    let mut owners: HashMap<PathBuf, String> = HashMap::new();
    for target in targets.iter_mut() {
        let script = entry_script(target.analysis)?;
        let stripped = if normcase(&script).starts_with(&prefix) {
            script.get(prefix.len()..).unwrap_or(&script).to_string()
        } else {
            script
        };
        let mut id = match stripped.rfind('.') {
            Some(dot) if !stripped[dot..].contains(MAIN_SEPARATOR) => stripped[..dot].to_string(),
            _ => stripped,
        };
        if let Some(filename) = renames.get(&normcase(&id)) {
            id = filename.clone();
        }
        set_dependencies(target.analysis, &id, &mut owners);
    }
    Ok(())
}

fn set_dependencies(analysis: &mut Analysis, id: &str, owners: &mut HashMap<PathBuf, String>) {
    let mut dependencies = Vec::new();
    for toc in [&mut analysis.binaries, &mut analysis.datas] {
        let mut kept = Toc::new();
        for entry in toc.iter() {
            let Some(source) = entry.path.clone() else {
                kept.append(entry.clone());
                continue;
            };
            match owners.get(&source) {
                None => {
                    owners.insert(source, id.to_string());
                    kept.append(entry.clone());
                }
                Some(owner) if owner == id => kept.append(entry.clone()),
                Some(owner) => {
                    let name = format!("{}:{}", relative_id_path(id, owner), entry.name);
                    tracing::debug!("{} borrows {} from {}", id, entry.name, owner);
                    dependencies.push(TocEntry::new(name, source, EntryKind::Dependency));
                }
            }
        }
        *toc = kept;
    }
    analysis.dependencies.extend(dependencies);
}

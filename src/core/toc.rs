//! Tables of contents - the ordered manifests every stage consumes.
//!
//! A `Toc` is an insertion-ordered list of `(name, path, kind)` entries,
//! unique by internal name. Order matters: it becomes the archive layout
//! and decides which entry a loader finds first.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::builder::errors::BuildError;

/// What an entry is and how the archive writer treats it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    /// Compiled pure module
    #[serde(rename = "PYMODULE")]
    PyModule,
    /// Script executed at startup
    #[serde(rename = "PYSOURCE")]
    PySource,
    /// Native extension module
    #[serde(rename = "EXTENSION")]
    Extension,
    /// Object archive
    #[serde(rename = "PYZ")]
    Pyz,
    /// Nested resource archive
    #[serde(rename = "PKG")]
    Pkg,
    /// Plain data file
    #[serde(rename = "DATA")]
    Data,
    /// Shared library
    #[serde(rename = "BINARY")]
    Binary,
    /// Zip file placed on the import path
    #[serde(rename = "ZIPFILE")]
    ZipFile,
    /// Executable file
    #[serde(rename = "EXECUTABLE")]
    Executable,
    /// Pointer to a file materialized by another executable
    #[serde(rename = "DEPENDENCY")]
    Dependency,
    /// Loader directive; never a file
    #[serde(rename = "OPTION")]
    Option,
}

impl EntryKind {
    /// Every kind, in declaration order.
    pub const ALL: [EntryKind; 11] = [
        EntryKind::PyModule,
        EntryKind::PySource,
        EntryKind::Extension,
        EntryKind::Pyz,
        EntryKind::Pkg,
        EntryKind::Data,
        EntryKind::Binary,
        EntryKind::ZipFile,
        EntryKind::Executable,
        EntryKind::Dependency,
        EntryKind::Option,
    ];

    /// Canonical upper-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::PyModule => "PYMODULE",
            EntryKind::PySource => "PYSOURCE",
            EntryKind::Extension => "EXTENSION",
            EntryKind::Pyz => "PYZ",
            EntryKind::Pkg => "PKG",
            EntryKind::Data => "DATA",
            EntryKind::Binary => "BINARY",
            EntryKind::ZipFile => "ZIPFILE",
            EntryKind::Executable => "EXECUTABLE",
            EntryKind::Dependency => "DEPENDENCY",
            EntryKind::Option => "OPTION",
        }
    }

    /// Single-byte type code stored in the resource archive index.
    pub fn type_code(&self) -> u8 {
        match self {
            EntryKind::PyModule => b'm',
            EntryKind::PySource => b's',
            EntryKind::Extension | EntryKind::Binary | EntryKind::Executable => b'b',
            EntryKind::Pyz => b'z',
            EntryKind::Pkg => b'a',
            EntryKind::Data => b'x',
            EntryKind::ZipFile => b'Z',
            EntryKind::Dependency => b'd',
            EntryKind::Option => b'o',
        }
    }

    /// Kind for a type code read back from an archive.
    ///
    /// `b` is shared by several kinds and maps to `Binary`.
    pub fn from_type_code(code: u8) -> Option<EntryKind> {
        Some(match code {
            b'm' => EntryKind::PyModule,
            b's' => EntryKind::PySource,
            b'b' => EntryKind::Binary,
            b'z' => EntryKind::Pyz,
            b'a' => EntryKind::Pkg,
            b'x' => EntryKind::Data,
            b'Z' => EntryKind::ZipFile,
            b'd' => EntryKind::Dependency,
            b'o' => EntryKind::Option,
            _ => return None,
        })
    }

    /// Native code the binary pipeline (dedup, strip, compact) handles.
    pub fn is_binary(&self) -> bool {
        matches!(
            self,
            EntryKind::Binary | EntryKind::Extension | EntryKind::Dependency
        )
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryKind {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntryKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| BuildError::structural(format!("unknown entry kind `{}`", s)))
    }
}

/// A single manifest entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TocEntry {
    /// Internal name (destination inside the bundle)
    pub name: String,

    /// Source file on disk; always `None` for options
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Entry kind
    pub kind: EntryKind,
}

impl TocEntry {
    /// Create an entry. Options never carry a path.
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, kind: EntryKind) -> Self {
        let path = if kind == EntryKind::Option {
            None
        } else {
            Some(path.into())
        };
        TocEntry {
            name: name.into(),
            path,
            kind,
        }
    }

    /// Create a loader directive.
    pub fn option(directive: impl Into<String>) -> Self {
        TocEntry {
            name: directive.into(),
            path: None,
            kind: EntryKind::Option,
        }
    }

    /// Create a pointer to a file another executable materializes.
    ///
    /// The name has the form `<relative path>:<internal name>`.
    pub fn dependency(name: impl Into<String>) -> Self {
        TocEntry {
            name: name.into(),
            path: None,
            kind: EntryKind::Dependency,
        }
    }

    /// Build an entry from loosely typed parts, validating the kind.
    pub fn from_parts(name: &str, path: Option<&str>, kind: &str) -> Result<Self, BuildError> {
        let kind: EntryKind = kind.parse()?;
        if name.is_empty() {
            return Err(BuildError::structural("manifest entry without a name"));
        }
        let path = path.filter(|p| !p.is_empty());
        match (kind, path) {
            (EntryKind::Option, Some(p)) => Err(BuildError::Structural {
                message: format!("option `{}` must not carry a source path ({})", name, p),
                entry: Some(name.to_string()),
            }),
            (EntryKind::Option, None) => Ok(TocEntry::option(name)),
            (_, path) => Ok(TocEntry {
                name: name.to_string(),
                path: path.map(PathBuf::from),
                kind,
            }),
        }
    }

    /// Source path, if any.
    pub fn source(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl fmt::Display for TocEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "({}, {}, {})", self.name, path.display(), self.kind),
            None => write!(f, "({}, -, {})", self.name, self.kind),
        }
    }
}

/// Ordered, name-unique manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<TocEntry>", into = "Vec<TocEntry>")]
pub struct Toc {
    entries: Vec<TocEntry>,
    index: HashMap<String, usize>,
}

impl Toc {
    /// Create an empty manifest.
    pub fn new() -> Self {
        Toc::default()
    }

    /// Append an entry.
    ///
    /// An entry whose name is already present replaces the earlier one in
    /// its original position.
    pub fn append(&mut self, entry: TocEntry) {
        match self.index.get(&entry.name) {
            Some(&pos) => self.entries[pos] = entry,
            None => {
                self.index.insert(entry.name.clone(), self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    /// Append every entry of `other`, in order.
    pub fn extend<I: IntoIterator<Item = TocEntry>>(&mut self, other: I) {
        for entry in other {
            self.append(entry);
        }
    }

    /// Put `entry` first, removing any earlier entry with the same name.
    pub fn prepend(&mut self, entry: TocEntry) {
        self.remove(&entry.name);
        self.entries.insert(0, entry);
        self.reindex();
    }

    /// Entries whose name does not appear in `other`.
    pub fn difference(&self, other: &Toc) -> Toc {
        self.entries
            .iter()
            .filter(|entry| !other.contains(&entry.name))
            .cloned()
            .collect()
    }

    /// Whether an entry with this internal name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Look up an entry by internal name.
    pub fn get(&self, name: &str) -> Option<&TocEntry> {
        self.index.get(name).map(|&pos| &self.entries[pos])
    }

    /// Remove an entry by internal name.
    pub fn remove(&mut self, name: &str) -> Option<TocEntry> {
        let pos = self.index.remove(name)?;
        let entry = self.entries.remove(pos);
        self.reindex();
        Some(entry)
    }

    /// Keep only the entries matching `keep`.
    pub fn retain<F: FnMut(&TocEntry) -> bool>(&mut self, keep: F) {
        self.entries.retain(keep);
        self.reindex();
    }

    /// Iterate over entries in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, TocEntry> {
        self.entries.iter()
    }

    /// Entries as a slice.
    pub fn entries(&self) -> &[TocEntry] {
        &self.entries
    }

    /// Internal names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    /// Last entry, if any.
    pub fn last(&self) -> Option<&TocEntry> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn reindex(&mut self) {
        self.index = self
            .entries
            .iter()
            .enumerate()
            .map(|(pos, entry)| (entry.name.clone(), pos))
            .collect();
    }
}

impl From<Vec<TocEntry>> for Toc {
    fn from(entries: Vec<TocEntry>) -> Self {
        entries.into_iter().collect()
    }
}

impl From<Toc> for Vec<TocEntry> {
    fn from(toc: Toc) -> Self {
        toc.entries
    }
}

impl FromIterator<TocEntry> for Toc {
    fn from_iter<I: IntoIterator<Item = TocEntry>>(iter: I) -> Self {
        let mut toc = Toc::new();
        toc.extend(iter);
        toc
    }
}

impl IntoIterator for Toc {
    type Item = TocEntry;
    type IntoIter = std::vec::IntoIter<TocEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'a> IntoIterator for &'a Toc {
    type Item = &'a TocEntry;
    type IntoIter = std::slice::Iter<'a, TocEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, path: &str, kind: EntryKind) -> TocEntry {
        TocEntry::new(name, path, kind)
    }

    #[test]
    fn test_extend_other_wins_on_collision() {
        let mut a: Toc = vec![
            entry("app", "/src/app.py", EntryKind::PySource),
            entry("libz.so", "/usr/lib/libz.so", EntryKind::Binary),
        ]
        .into();
        let b: Toc = vec![
            entry("libz.so", "/opt/lib/libz.so", EntryKind::Binary),
            entry("logo.png", "/src/logo.png", EntryKind::Data),
        ]
        .into();

        a.extend(b.clone());

        for name in b.names() {
            assert_eq!(a.names().filter(|n| *n == name).count(), 1);
        }
        assert_eq!(
            a.get("libz.so").unwrap().source(),
            Some(Path::new("/opt/lib/libz.so"))
        );
        // Replacement keeps the original position.
        assert_eq!(a.names().collect::<Vec<_>>(), ["app", "libz.so", "logo.png"]);
    }

    #[test]
    fn test_difference() {
        let a: Toc = vec![
            entry("pyimod01_os_path", "/l/pyimod01_os_path.py", EntryKind::PyModule),
            entry("json", "/lib/json/__init__.py", EntryKind::PyModule),
        ]
        .into();
        let b: Toc = vec![entry(
            "pyimod01_os_path",
            "/elsewhere.py",
            EntryKind::PyModule,
        )]
        .into();

        let diff = a.difference(&b);
        assert_eq!(diff.names().collect::<Vec<_>>(), ["json"]);
        assert!(a.difference(&a).is_empty());
    }

    #[test]
    fn test_prepend_moves_entry_first() {
        let mut toc: Toc = vec![
            entry("a", "/a.py", EntryKind::PyModule),
            entry("key", "/old.py", EntryKind::PyModule),
        ]
        .into();
        toc.prepend(entry("key", "/key.py", EntryKind::PyModule));

        assert_eq!(toc.names().collect::<Vec<_>>(), ["key", "a"]);
        assert_eq!(toc.get("a").unwrap().source(), Some(Path::new("/a.py")));
    }

    #[test]
    fn test_remove_and_retain_keep_index_consistent() {
        let mut toc: Toc = vec![
            entry("a", "/a", EntryKind::Data),
            entry("b", "/b", EntryKind::Binary),
            entry("c", "/c", EntryKind::Data),
        ]
        .into();

        assert!(toc.remove("a").is_some());
        assert_eq!(toc.get("c").unwrap().source(), Some(Path::new("/c")));

        toc.retain(|e| e.kind == EntryKind::Data);
        assert!(!toc.contains("b"));
        assert_eq!(toc.get("c").unwrap().name, "c");
    }

    #[test]
    fn test_option_entries_have_no_path() {
        let opt = TocEntry::new("v", "/ignored", EntryKind::Option);
        assert!(opt.path.is_none());

        let err = TocEntry::from_parts("v", Some("/x"), "OPTION").unwrap_err();
        assert!(matches!(err, BuildError::Structural { .. }));
    }

    #[test]
    fn test_from_parts_rejects_unknown_kind() {
        let err = TocEntry::from_parts("app", Some("/src/app.py"), "SCRIPT").unwrap_err();
        assert!(err.to_string().contains("unknown entry kind"));

        let ok = TocEntry::from_parts("app", Some("/src/app.py"), "pysource").unwrap();
        assert_eq!(ok.kind, EntryKind::PySource);
    }

    #[test]
    fn test_type_codes() {
        assert_eq!(EntryKind::PySource.type_code(), b's');
        assert_eq!(EntryKind::Extension.type_code(), b'b');
        assert_eq!(EntryKind::ZipFile.type_code(), b'Z');
        assert_eq!(EntryKind::from_type_code(b'x'), Some(EntryKind::Data));
        assert_eq!(EntryKind::from_type_code(b'?'), None);
    }

    #[test]
    fn test_serde_keeps_order_and_kind_names() {
        let toc: Toc = vec![
            entry("b", "/b", EntryKind::Binary),
            TocEntry::option("v"),
        ]
        .into();
        let json = serde_json::to_string(&toc).unwrap();
        assert!(json.contains("\"BINARY\""));
        let back: Toc = serde_json::from_str(&json).unwrap();
        assert_eq!(back, toc);
    }
}

//! Implementation of `frost inspect`: read built archives back.
//!
//! Accepts a resource archive (standalone, or appended to an executable)
//! or an object archive, lists its entries and extracts single entries.
//! Object archives embedded in a resource archive are opened too, so a
//! module can be extracted straight from an executable.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use crate::archive::carchive::CArchiveReader;
use crate::archive::cipher::Cipher;
use crate::archive::pyz::{PyzReader, PYZ_MAGIC};
use crate::core::toc::EntryKind;

/// Kind of archive that was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    /// Resource archive
    Pkg,
    /// Object archive
    Pyz,
}

/// One listed entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedEntry {
    pub name: String,
    /// Entry kind name, or the raw type code when it is unknown
    pub kind: String,
    pub position: u32,
    pub stored_len: u32,
    /// Unknown for object archive entries
    pub len: Option<u32>,
    pub compressed: bool,
}

/// Contents of an archive.
#[derive(Debug, Clone)]
pub struct ArchiveListing {
    pub kind: ArchiveKind,
    /// Offset of the archive inside the file (non-zero when appended)
    pub start: usize,
    pub pylib_name: Option<String>,
    pub python_version: Option<u32>,
    pub entries: Vec<ListedEntry>,
    /// Object archives embedded in a resource archive, by entry name
    pub nested: Vec<(String, ArchiveListing)>,
}

/// An opened archive.
pub enum Archive {
    Pkg(CArchiveReader),
    Pyz(PyzReader),
}

impl Archive {
    pub fn open(path: &Path) -> Result<Self> {
        let data =
            std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_bytes(data).with_context(|| format!("cannot open {}", path.display()))
    }

    /// Detect the archive kind from its contents.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        if data.starts_with(&PYZ_MAGIC) {
            return Ok(Archive::Pyz(PyzReader::from_bytes(data)?));
        }
        match CArchiveReader::from_bytes(data) {
            Ok(reader) => Ok(Archive::Pkg(reader)),
            Err(e) => Err(e.context("not a frost archive")),
        }
    }

    pub fn kind(&self) -> ArchiveKind {
        match self {
            Archive::Pkg(_) => ArchiveKind::Pkg,
            Archive::Pyz(_) => ArchiveKind::Pyz,
        }
    }

    /// List the entries, descending into embedded object archives.
    pub fn listing(&self) -> Result<ArchiveListing> {
        match self {
            Archive::Pkg(reader) => {
                let mut nested = Vec::new();
                for entry in reader.entries() {
                    if entry.type_code == EntryKind::Pyz.type_code() {
                        let inner = Archive::Pyz(PyzReader::from_bytes(reader.extract(entry)?)?);
                        nested.push((entry.name.clone(), inner.listing()?));
                    }
                }
                Ok(ArchiveListing {
                    kind: ArchiveKind::Pkg,
                    start: reader.start(),
                    pylib_name: Some(reader.pylib_name().to_string()),
                    python_version: Some(reader.python_version()),
                    entries: reader
                        .entries()
                        .iter()
                        .map(|e| ListedEntry {
                            name: e.name.clone(),
                            kind: match EntryKind::from_type_code(e.type_code) {
                                Some(kind) => kind.to_string(),
                                None => char::from(e.type_code).to_string(),
                            },
                            position: e.position,
                            stored_len: e.compressed_len,
                            len: Some(e.uncompressed_len),
                            compressed: e.compressed,
                        })
                        .collect(),
                    nested,
                })
            }
            Archive::Pyz(reader) => Ok(ArchiveListing {
                kind: ArchiveKind::Pyz,
                start: 0,
                pylib_name: None,
                python_version: None,
                entries: reader
                    .entries()
                    .iter()
                    .map(|e| ListedEntry {
                        name: e.name.clone(),
                        kind: if e.is_package { "PACKAGE" } else { "PYMODULE" }.to_string(),
                        position: e.position,
                        stored_len: e.length,
                        len: None,
                        compressed: true,
                    })
                    .collect(),
                nested: Vec::new(),
            }),
        }
    }

    /// Contents of the entry `name`, decompressed.
    ///
    /// `key` decrypts object archive entries. A name not found in a
    /// resource archive is looked up in its embedded object archives.
    pub fn extract(&self, name: &str, key: Option<&str>) -> Result<Vec<u8>> {
        let cipher = key.map(Cipher::new);
        match self {
            Archive::Pyz(reader) => reader.extract(name, cipher.as_ref()),
            Archive::Pkg(reader) => {
                if let Some(entry) = reader.find(name) {
                    return reader.extract(entry);
                }
                for entry in reader.entries() {
                    if entry.type_code != EntryKind::Pyz.type_code() {
                        continue;
                    }
                    let inner = PyzReader::from_bytes(reader.extract(entry)?)?;
                    if inner.find(name).is_some() {
                        return inner
                            .extract(name, cipher.as_ref())
                            .with_context(|| format!("in {}", entry.name));
                    }
                }
                bail!("no entry named `{}` in archive", name)
            }
        }
    }
}

/// Options for the inspect command.
#[derive(Debug, Clone, Default)]
pub struct InspectOptions {
    pub archive: PathBuf,

    /// Entry to extract instead of listing
    pub extract: Option<String>,

    /// Where the extracted entry is written
    pub output: Option<PathBuf>,

    /// Passphrase for encrypted object archives
    pub key: Option<String>,
}

/// What the inspect command produced.
#[derive(Debug, Clone)]
pub enum InspectResult {
    Listing(ArchiveListing),
    Extracted { name: String, output: PathBuf, len: usize },
}

pub fn inspect(opts: &InspectOptions) -> Result<InspectResult> {
    let archive = Archive::open(&opts.archive)?;
    let Some(name) = &opts.extract else {
        return Ok(InspectResult::Listing(archive.listing()?));
    };

    let data = archive.extract(name, opts.key.as_deref())?;
    let output = match &opts.output {
        Some(output) => output.clone(),
        // Internal names may hold directories; keep only the file name.
        None => Path::new(name)
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(name)),
    };
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        crate::util::fs::ensure_dir(parent)?;
    }
    std::fs::write(&output, &data)
        .with_context(|| format!("failed to write {}", output.display()))?;
    Ok(InspectResult::Extracted {
        name: name.clone(),
        output,
        len: data.len(),
    })
}

/// Render a listing as a table.
pub fn format_listing(listing: &ArchiveListing) -> String {
    let mut out = String::new();
    match listing.kind {
        ArchiveKind::Pkg => {
            let _ = writeln!(
                out,
                "resource archive at offset {}, python {}, library {}",
                listing.start,
                listing.python_version.unwrap_or_default(),
                listing.pylib_name.as_deref().unwrap_or("-")
            );
            let _ = writeln!(
                out,
                "{:>10} {:>10} {:>10} {:>4}  {:<10} name",
                "pos", "stored", "length", "zip", "kind"
            );
            for e in &listing.entries {
                let _ = writeln!(
                    out,
                    "{:>10} {:>10} {:>10} {:>4}  {:<10} {}",
                    e.position,
                    e.stored_len,
                    e.len.unwrap_or_default(),
                    u8::from(e.compressed),
                    e.kind,
                    e.name
                );
            }
        }
        ArchiveKind::Pyz => {
            let _ = writeln!(out, "object archive, {} modules", listing.entries.len());
            for e in &listing.entries {
                let _ = writeln!(
                    out,
                    "{:>10} {:>10}  {:<10} {}",
                    e.position, e.stored_len, e.kind, e.name
                );
            }
        }
    }
    for (name, nested) in &listing.nested {
        let _ = writeln!(out, "\n{}:", name);
        out.push_str(&format_listing(nested));
    }
    out
}

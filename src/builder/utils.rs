//! Helpers shared by the assemblers.

use std::path::{Component, Path};

use crate::builder::errors::BuildError;
use crate::core::toc::{EntryKind, Toc, TocEntry};

/// Reject internal names that would land outside the output root.
///
/// Both `/` and `\` count as separators regardless of host so an archive
/// built on one platform is safe to unpack on another.
pub fn validate_dest_name(name: &str) -> Result<(), BuildError> {
    if name.is_empty() {
        return Err(BuildError::structural("entry with an empty internal name"));
    }
    let traversal = name.split(['/', '\\']).any(|part| part == "..");
    let absolute = name.starts_with('/')
        || name.starts_with('\\')
        || Path::new(name).is_absolute()
        || has_drive_prefix(name)
        || Path::new(name)
            .components()
            .any(|c| matches!(c, Component::RootDir | Component::Prefix(_)));
    if traversal || absolute {
        return Err(BuildError::unsafe_name(name));
    }
    Ok(())
}

fn has_drive_prefix(name: &str) -> bool {
    let bytes = name.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Validate every entry of a manifest before anything is written.
///
/// Dependency and option entries are never materialized, so their names
/// are exempt.
pub fn validate_toc_names(toc: &Toc) -> Result<(), BuildError> {
    toc.iter()
        .filter(|e| !matches!(e.kind, EntryKind::Dependency | EntryKind::Option))
        .try_for_each(|e| validate_dest_name(&e.name))
}

/// Whether `path` points into a `.egg` file.
///
/// Such entries are served from the egg itself and have no file of
/// their own on disk.
pub fn is_in_egg(path: &Path) -> bool {
    path.ancestors().any(|ancestor| {
        ancestor
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("egg"))
            && ancestor.is_file()
    })
}

/// Whether an entry must be skipped because it lives inside an egg.
pub fn skip_egg_entry(entry: &TocEntry) -> bool {
    match entry.source() {
        Some(path) => !path.exists() && is_in_egg(path),
        None => false,
    }
}

/// Suffix of an extension module file: everything from the first dot of
/// its file name (`.cpython-311-x86_64-linux-gnu.so`, `.pyd`, ...).
pub fn extension_suffix(path: &Path) -> Option<String> {
    let file_name = path.file_name()?.to_str()?;
    file_name.find('.').map(|pos| file_name[pos..].to_string())
}

/// Turn dotted extension module names into file paths carrying the
/// platform suffix of their source file.
///
/// Returns a plain list: two modules may widen to the same file name and
/// the resource archive writer reports such collisions itself. A widened
/// name is validated again, since a leading dot turns into a root.
pub fn add_suffix_to_extensions(toc: &Toc) -> Result<Vec<TocEntry>, BuildError> {
    toc.iter()
        .map(|entry| {
            if entry.kind != EntryKind::Extension {
                return Ok(entry.clone());
            }
            let Some(suffix) = entry.source().and_then(extension_suffix) else {
                return Ok(entry.clone());
            };
            if entry.name.ends_with(&suffix) {
                return Ok(entry.clone());
            }
            let name = format!("{}{}", entry.name.replace('.', "/"), suffix);
            validate_dest_name(&name)?;
            Ok(TocEntry {
                name,
                ..entry.clone()
            })
        })
        .collect()
}

/// Refuse to wipe `path` when it contains one of `protected`.
pub fn check_path_overlap(path: &Path, protected: &[&Path]) -> Result<(), BuildError> {
    match protected.iter().find(|p| p.starts_with(path)) {
        Some(inner) => Err(BuildError::Structural {
            message: format!(
                "output directory {} contains {} and cannot be cleaned",
                path.display(),
                inner.display()
            ),
            entry: None,
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_validate_dest_name() {
        assert!(validate_dest_name("lib/libz.so").is_ok());
        assert!(validate_dest_name("a..b/c").is_ok());

        for bad in ["../escape", "a/../../b", "a\\..\\b", "/etc/passwd", "\\x", "C:evil", ""] {
            assert!(validate_dest_name(bad).is_err(), "{} accepted", bad);
        }
    }

    #[test]
    fn test_validate_toc_names_skips_dependencies() {
        let toc: Toc = vec![
            TocEntry::dependency("../other:libx.so"),
            TocEntry::new("ok.dat", "/src/ok.dat", EntryKind::Data),
        ]
        .into();
        assert!(validate_toc_names(&toc).is_ok());
    }

    #[test]
    fn test_add_suffix_to_extensions() {
        let toc: Toc = vec![
            TocEntry::new(
                "pkg.speedups",
                "/site/pkg/speedups.cpython-311-x86_64-linux-gnu.so",
                EntryKind::Extension,
            ),
            TocEntry::new("already.pyd", "/site/already.pyd", EntryKind::Extension),
            TocEntry::new("libz.so", "/usr/lib/libz.so", EntryKind::Binary),
        ]
        .into();

        let names: Vec<_> = add_suffix_to_extensions(&toc)
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(
            names,
            [
                "pkg/speedups.cpython-311-x86_64-linux-gnu.so",
                "already.pyd",
                "libz.so"
            ]
        );
    }

    #[test]
    fn test_widened_extension_names_are_validated() {
        let toc: Toc = vec![TocEntry::new(
            ".tmp.escape",
            "/site/escape.cpython-311-x86_64-linux-gnu.so",
            EntryKind::Extension,
        )]
        .into();
        assert!(matches!(
            add_suffix_to_extensions(&toc),
            Err(BuildError::Structural { .. })
        ));
    }

    #[test]
    fn test_egg_detection() {
        let tmp = TempDir::new().unwrap();
        let egg = tmp.path().join("dist.egg");
        std::fs::write(&egg, "zip").unwrap();

        let inside = egg.join("pkg").join("mod.py");
        assert!(is_in_egg(&inside));
        assert!(skip_egg_entry(&TocEntry::new("pkg.mod", &inside, EntryKind::PyModule)));
        assert!(!is_in_egg(&tmp.path().join("plain").join("mod.py")));
    }

    #[test]
    fn test_check_path_overlap() {
        let dist = Path::new("/proj/dist");
        assert!(check_path_overlap(dist, &[Path::new("/proj/build")]).is_ok());
        assert!(check_path_overlap(Path::new("/proj"), &[Path::new("/proj/build")]).is_err());
    }
}

//! Cache of stripped/compacted binaries.
//!
//! Stripping and UPX compaction are slow and their result only depends on
//! the input file and the transform flags. Processed copies are kept under
//! `<cache root>/bincache<strip><upx>/<key>/<file name>` where the key is a
//! fingerprint of the absolute source path and the flags. A `.sha256`
//! sidecar next to each copy records the source content it was made from.
//!
//! Entries share no state, so a manifest's binaries are processed in
//! parallel.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rayon::prelude::*;

use crate::core::platform::Platform;
use crate::core::toc::{EntryKind, TocEntry};
use crate::util::fs::{absolute, copy_stat, ensure_dir, write_atomic};
use crate::util::hash::{sha256_file, Fingerprint};
use crate::util::process::{find_strip, find_upx, ProcessBuilder};

/// Strip/compact transform with a persistent cache.
#[derive(Debug, Clone)]
pub struct BinaryCache {
    dir: PathBuf,
    strip: Option<PathBuf>,
    upx: Option<PathBuf>,
}

impl BinaryCache {
    /// Set up a cache under `root`.
    ///
    /// Requested tools that cannot be found are reported and skipped. UPX
    /// is only applied where the platform supports it.
    pub fn new(
        root: &Path,
        strip: bool,
        upx: bool,
        upx_dir: Option<&Path>,
        platform: &Platform,
    ) -> Self {
        let upx = upx && platform.supports_upx();
        let dir = root.join(format!("bincache{}{}", u8::from(strip), u8::from(upx)));

        let strip = if strip {
            let tool = find_strip();
            if tool.is_none() {
                tracing::warn!("`strip` not found; binaries will not be stripped");
            }
            tool
        } else {
            None
        };
        let upx = if upx {
            let tool = find_upx(upx_dir);
            if tool.is_none() {
                tracing::warn!("`upx` not found; binaries will not be compacted");
            }
            tool
        } else {
            None
        };

        BinaryCache { dir, strip, upx }
    }

    /// A cache that passes every file through untouched.
    pub fn passthrough() -> Self {
        BinaryCache {
            dir: PathBuf::new(),
            strip: None,
            upx: None,
        }
    }

    /// Whether no transform will ever be applied.
    pub fn is_passthrough(&self) -> bool {
        self.strip.is_none() && self.upx.is_none()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the processed copy of `source`, producing it if needed.
    pub fn process(&self, source: &Path) -> Result<PathBuf> {
        if self.is_passthrough() {
            return Ok(source.to_path_buf());
        }

        let source = absolute(source);
        let mut fp = Fingerprint::new();
        fp.update_path(&source)
            .update_bool(self.strip.is_some())
            .update_bool(self.upx.is_some());
        let entry_dir = self.dir.join(fp.finish_short());

        let file_name = source
            .file_name()
            .with_context(|| format!("{} has no file name", source.display()))?;
        let cached = entry_dir.join(file_name);
        let sidecar = entry_dir.join(format!("{}.sha256", file_name.to_string_lossy()));

        let digest = sha256_file(&source)?;
        let recorded = std::fs::read_to_string(&sidecar).ok();
        if cached.is_file() && recorded.as_deref() == Some(digest.as_str()) {
            tracing::debug!("reusing processed {}", cached.display());
            return Ok(cached);
        }

        ensure_dir(&entry_dir)?;
        std::fs::copy(&source, &cached).with_context(|| {
            format!("failed to copy {} to {}", source.display(), cached.display())
        })?;
        if let Some(strip) = &self.strip {
            run_tool(ProcessBuilder::new(strip).arg(&cached));
        }
        if let Some(upx) = &self.upx {
            run_tool(ProcessBuilder::new(upx).args(["--best", "-q"]).arg(&cached));
        }
        if let Err(e) = copy_stat(&source, &cached) {
            tracing::debug!("could not copy metadata to {}: {}", cached.display(), e);
        }

        write_atomic(&sidecar, digest.as_bytes())?;
        Ok(cached)
    }

    /// Replace the sources of binary entries with their processed copies.
    ///
    /// Order is preserved.
    pub fn process_entries(&self, entries: Vec<TocEntry>) -> Result<Vec<TocEntry>> {
        if self.is_passthrough() {
            return Ok(entries);
        }
        entries
            .into_par_iter()
            .map(|entry| {
                let is_native = matches!(entry.kind, EntryKind::Binary | EntryKind::Extension);
                let source = entry
                    .source()
                    .filter(|source| is_native && source.is_file())
                    .map(Path::to_path_buf);
                let Some(source) = source else {
                    return Ok(entry);
                };
                let processed = self.process(&source)?;
                Ok(TocEntry {
                    path: Some(processed),
                    ..entry
                })
            })
            .collect()
    }
}

/// Run a transform tool; a failure leaves the file as it was.
fn run_tool(cmd: ProcessBuilder) {
    match cmd.exec_and_check() {
        Ok(_) => tracing::debug!("ran {}", cmd.display_command()),
        Err(e) => tracing::warn!("{:#}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::write_file;
    use tempfile::TempDir;

    #[test]
    fn test_passthrough_keeps_paths() {
        let cache = BinaryCache::passthrough();
        let entries = vec![TocEntry::new("libz.so", "/usr/lib/libz.so", EntryKind::Binary)];
        assert_eq!(cache.process_entries(entries.clone()).unwrap(), entries);
    }

    #[test]
    fn test_cache_dir_encodes_flags() {
        let tmp = TempDir::new().unwrap();
        let linux = Platform::new(crate::core::platform::Os::Linux, "64bit");
        let cache = BinaryCache::new(tmp.path(), true, true, None, &linux);
        // UPX is never applied on Linux.
        assert!(cache.dir().ends_with("bincache10"));
    }

    #[cfg(unix)]
    #[test]
    fn test_processed_copy_is_reused_until_source_changes() {
        let tmp = TempDir::new().unwrap();
        let lib = write_file(tmp.path(), "lib/libfake.so", "not really an ELF");
        // `true` accepts any arguments and leaves the file alone.
        let Some(tool) = crate::util::process::find_executable("true") else {
            return;
        };
        let cache = BinaryCache {
            dir: tmp.path().join("bincache10"),
            strip: Some(tool),
            upx: None,
        };

        let first = cache.process(&lib).unwrap();
        assert_ne!(first, lib);
        assert_eq!(std::fs::read(&first).unwrap(), b"not really an ELF");
        let sidecar = first.with_file_name("libfake.so.sha256");
        let stamp = std::fs::metadata(&sidecar).unwrap().modified().unwrap();

        assert_eq!(cache.process(&lib).unwrap(), first);
        assert_eq!(std::fs::metadata(&sidecar).unwrap().modified().unwrap(), stamp);

        std::fs::write(&lib, "changed").unwrap();
        let again = cache.process(&lib).unwrap();
        assert_eq!(std::fs::read(again).unwrap(), b"changed");
    }
}

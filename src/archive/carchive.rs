//! Resource archive (CArchive) format.
//!
//! Layout, all integers big-endian:
//!
//! ```text
//! +-------------------+
//! | entry payloads    |  raw or zlib-compressed, in manifest order
//! +-------------------+
//! | table of contents |  one record per entry
//! +-------------------+
//! | cookie            |  fixed size, always the last 88 bytes
//! +-------------------+
//! ```
//!
//! A TOC record is `entry_len:i32 pos:i32 clen:i32 ulen:i32 cflag:u8
//! typecode:u8 name` with the name NUL-terminated and padded so the whole
//! record is a multiple of 16 bytes. The cookie carries the magic, the
//! archive length, the TOC position and length, the runtime version and
//! the runtime library name. All positions are relative to the start of
//! the archive, which lets the loader find it when the archive is
//! appended to an executable.

use std::fs::File;
use std::io::{BufWriter, Cursor, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::builder::errors::BuildError;
use crate::builder::utils::validate_dest_name;

/// Magic identifying the cookie.
pub const MAGIC: [u8; 8] = *b"MEI\x0c\x0b\x0a\x0b\x0e";

/// Bytes reserved for the runtime library name.
pub const PYLIB_NAME_LEN: usize = 64;

/// Total cookie size.
pub const COOKIE_LEN: usize = MAGIC.len() + 4 * 4 + PYLIB_NAME_LEN;

/// Fixed part of a TOC record.
const ENTRY_HEADER_LEN: usize = 4 * 4 + 2;

/// One record of the archive index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CTocEntry {
    pub name: String,
    /// Offset of the payload from the archive start
    pub position: u32,
    /// Stored length
    pub compressed_len: u32,
    /// Length after decompression
    pub uncompressed_len: u32,
    pub compressed: bool,
    pub type_code: u8,
}

impl CTocEntry {
    fn write_to<W: Write>(&self, out: &mut W) -> Result<()> {
        let name = self.name.as_bytes();
        let mut name_len = name.len() + 1;
        let rem = (ENTRY_HEADER_LEN + name_len) % 16;
        if rem != 0 {
            name_len += 16 - rem;
        }

        out.write_u32::<BigEndian>(to_u32(ENTRY_HEADER_LEN + name_len)?)?;
        out.write_u32::<BigEndian>(self.position)?;
        out.write_u32::<BigEndian>(self.compressed_len)?;
        out.write_u32::<BigEndian>(self.uncompressed_len)?;
        out.write_u8(u8::from(self.compressed))?;
        out.write_u8(self.type_code)?;
        out.write_all(name)?;
        out.write_all(&vec![0u8; name_len - name.len()])?;
        Ok(())
    }

    fn read_from(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        let remaining = cursor.get_ref().len().saturating_sub(cursor.position() as usize);
        let entry_len = cursor.read_u32::<BigEndian>()? as usize;
        if entry_len < ENTRY_HEADER_LEN || entry_len > remaining {
            bail!("corrupt archive index: record of {} bytes", entry_len);
        }
        let position = cursor.read_u32::<BigEndian>()?;
        let compressed_len = cursor.read_u32::<BigEndian>()?;
        let uncompressed_len = cursor.read_u32::<BigEndian>()?;
        let compressed = cursor.read_u8()? != 0;
        let type_code = cursor.read_u8()?;

        let mut raw = vec![0u8; entry_len - ENTRY_HEADER_LEN];
        cursor.read_exact(&mut raw)?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        let name = String::from_utf8(raw[..end].to_vec())
            .context("archive entry name is not valid UTF-8")?;

        Ok(CTocEntry {
            name,
            position,
            compressed_len,
            uncompressed_len,
            compressed,
            type_code,
        })
    }
}

fn to_u32(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| BuildError::structural("archive exceeds 4 GiB").into())
}

/// Streams entries into a new resource archive.
pub struct CArchiveWriter {
    out: BufWriter<File>,
    path: PathBuf,
    pos: u64,
    toc: Vec<CTocEntry>,
    pylib_name: String,
    python_version: u32,
}

impl CArchiveWriter {
    /// Create (truncate) the archive at `path`.
    pub fn create(path: &Path, pylib_name: &str, python_version: u32) -> Result<Self> {
        if pylib_name.len() >= PYLIB_NAME_LEN {
            return Err(BuildError::structural(format!(
                "runtime library name `{}` exceeds {} bytes",
                pylib_name,
                PYLIB_NAME_LEN - 1
            ))
            .into());
        }
        let file = File::create(path)
            .with_context(|| format!("failed to create archive {}", path.display()))?;
        Ok(CArchiveWriter {
            out: BufWriter::new(file),
            path: path.to_path_buf(),
            pos: 0,
            toc: Vec::new(),
            pylib_name: pylib_name.to_string(),
            python_version,
        })
    }

    /// Append an entry with in-memory contents.
    pub fn add(&mut self, name: &str, data: &[u8], compress: bool, type_code: u8) -> Result<()> {
        validate_dest_name(name)?;

        let stored = if compress {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
            encoder.write_all(data)?;
            encoder.finish()?
        } else {
            data.to_vec()
        };
        self.push(name, &stored, data.len(), compress, type_code)
    }

    /// Append an entry read from `source`.
    pub fn add_file(
        &mut self,
        name: &str,
        source: &Path,
        compress: bool,
        type_code: u8,
    ) -> Result<()> {
        let data = std::fs::read(source)
            .with_context(|| format!("failed to read {}", source.display()))?;
        self.add(name, &data, compress, type_code)
    }

    /// Append a zero-length record carrying only its name.
    ///
    /// Used for loader options and dependency pointers, whose names may
    /// legitimately contain `..`.
    pub fn add_marker(&mut self, name: &str, type_code: u8) -> Result<()> {
        if name.is_empty() {
            return Err(BuildError::structural("marker entry with an empty name").into());
        }
        self.push(name, &[], 0, false, type_code)
    }

    fn push(
        &mut self,
        name: &str,
        stored: &[u8],
        uncompressed_len: usize,
        compressed: bool,
        type_code: u8,
    ) -> Result<()> {
        self.out
            .write_all(stored)
            .with_context(|| format!("failed to write to {}", self.path.display()))?;
        self.toc.push(CTocEntry {
            name: name.to_string(),
            position: to_u32(self.pos as usize)?,
            compressed_len: to_u32(stored.len())?,
            uncompressed_len: to_u32(uncompressed_len)?,
            compressed,
            type_code,
        });
        self.pos += stored.len() as u64;
        Ok(())
    }

    /// Entries written so far.
    pub fn entries(&self) -> &[CTocEntry] {
        &self.toc
    }

    /// Write the index and cookie and flush.
    pub fn finish(mut self) -> Result<Vec<CTocEntry>> {
        let toc_pos = self.pos;
        let mut index = Vec::new();
        for entry in &self.toc {
            entry.write_to(&mut index)?;
        }
        self.out.write_all(&index)?;

        let total = toc_pos as usize + index.len() + COOKIE_LEN;
        self.out.write_all(&MAGIC)?;
        self.out.write_u32::<BigEndian>(to_u32(total)?)?;
        self.out.write_u32::<BigEndian>(to_u32(toc_pos as usize)?)?;
        self.out.write_u32::<BigEndian>(to_u32(index.len())?)?;
        self.out.write_u32::<BigEndian>(self.python_version)?;
        let mut pylib = [0u8; PYLIB_NAME_LEN];
        pylib[..self.pylib_name.len()].copy_from_slice(self.pylib_name.as_bytes());
        self.out.write_all(&pylib)?;

        self.out
            .flush()
            .with_context(|| format!("failed to flush {}", self.path.display()))?;
        Ok(self.toc)
    }
}

/// Reads a resource archive, standalone or appended to an executable.
#[derive(Debug)]
pub struct CArchiveReader {
    data: Vec<u8>,
    start: usize,
    toc: Vec<CTocEntry>,
    pylib_name: String,
    python_version: u32,
}

impl CArchiveReader {
    pub fn open(path: &Path) -> Result<Self> {
        let data =
            std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_bytes(data).with_context(|| format!("{} is not a frost archive", path.display()))
    }

    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        let cookie_pos = find_cookie(&data).context("archive cookie not found")?;
        let mut cursor = Cursor::new(&data[cookie_pos + MAGIC.len()..]);
        let total = cursor.read_u32::<BigEndian>()? as usize;
        let toc_pos = cursor.read_u32::<BigEndian>()? as usize;
        let toc_len = cursor.read_u32::<BigEndian>()? as usize;
        let python_version = cursor.read_u32::<BigEndian>()?;
        let mut pylib = [0u8; PYLIB_NAME_LEN];
        cursor.read_exact(&mut pylib)?;
        let end = pylib.iter().position(|&b| b == 0).unwrap_or(PYLIB_NAME_LEN);
        let pylib_name = String::from_utf8_lossy(&pylib[..end]).into_owned();

        let archive_end = cookie_pos + COOKIE_LEN;
        let Some(start) = archive_end.checked_sub(total) else {
            bail!("archive length {} exceeds file size", total);
        };
        let toc_range = start
            .checked_add(toc_pos)
            .and_then(|begin| Some(begin..begin.checked_add(toc_len)?));
        let Some(toc_bytes) = toc_range.and_then(|range| data.get(range)) else {
            bail!("archive index out of bounds");
        };

        let mut toc = Vec::new();
        let mut cursor = Cursor::new(toc_bytes);
        while (cursor.position() as usize) < toc_len {
            toc.push(CTocEntry::read_from(&mut cursor)?);
        }

        Ok(CArchiveReader {
            data,
            start,
            toc,
            pylib_name,
            python_version,
        })
    }

    pub fn entries(&self) -> &[CTocEntry] {
        &self.toc
    }

    pub fn find(&self, name: &str) -> Option<&CTocEntry> {
        self.toc.iter().find(|e| e.name == name)
    }

    pub fn pylib_name(&self) -> &str {
        &self.pylib_name
    }

    pub fn python_version(&self) -> u32 {
        self.python_version
    }

    /// Offset of the archive inside the file it was read from.
    pub fn start(&self) -> usize {
        self.start
    }

    /// Contents of an entry, decompressed.
    pub fn extract(&self, entry: &CTocEntry) -> Result<Vec<u8>> {
        let begin = self.start + entry.position as usize;
        let end = begin.checked_add(entry.compressed_len as usize);
        let Some(stored) = end.and_then(|end| self.data.get(begin..end)) else {
            bail!("entry `{}` lies outside the archive", entry.name);
        };
        if !entry.compressed {
            return Ok(stored.to_vec());
        }
        // The recorded length is only a hint; never trust it for allocation.
        let mut out = Vec::with_capacity((entry.uncompressed_len as usize).min(stored.len()));
        ZlibDecoder::new(stored)
            .read_to_end(&mut out)
            .with_context(|| format!("failed to decompress `{}`", entry.name))?;
        Ok(out)
    }

    /// Contents of the entry named `name`.
    pub fn extract_by_name(&self, name: &str) -> Result<Vec<u8>> {
        match self.find(name) {
            Some(entry) => self.extract(entry),
            None => bail!("no entry named `{}` in archive", name),
        }
    }
}

/// Position of the cookie: normally the last bytes of the file, but
/// tolerate trailing data such as a code signature.
fn find_cookie(data: &[u8]) -> Option<usize> {
    if data.len() < COOKIE_LEN {
        return None;
    }
    let tail = data.len() - COOKIE_LEN;
    if data[tail..tail + MAGIC.len()] == MAGIC {
        return Some(tail);
    }
    let window_start = tail.saturating_sub(8192);
    data[window_start..=tail]
        .windows(MAGIC.len())
        .rposition(|w| w == MAGIC)
        .map(|pos| window_start + pos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_sample(path: &Path) -> Vec<CTocEntry> {
        let mut writer = CArchiveWriter::create(path, "libpython3.11.so.1.0", 311).unwrap();
        writer.add("app", b"print('hi')\n", true, b's').unwrap();
        writer.add("libz.so", &[0x7f, b'E', b'L', b'F'], false, b'b').unwrap();
        writer.add_marker("v", b'o').unwrap();
        writer.finish().unwrap()
    }

    #[test]
    fn test_write_and_read_back() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("app.pkg");
        let written = write_sample(&path);

        let reader = CArchiveReader::open(&path).unwrap();
        assert_eq!(reader.entries(), written.as_slice());
        assert_eq!(reader.pylib_name(), "libpython3.11.so.1.0");
        assert_eq!(reader.python_version(), 311);
        assert_eq!(reader.extract_by_name("app").unwrap(), b"print('hi')\n");
        assert_eq!(reader.extract_by_name("libz.so").unwrap(), b"\x7fELF");
        assert!(reader.extract_by_name("v").unwrap().is_empty());
    }

    #[test]
    fn test_offsets_are_monotonic_and_disjoint() {
        let tmp = TempDir::new().unwrap();
        let entries = write_sample(&tmp.path().join("app.pkg"));
        for pair in entries.windows(2) {
            assert_eq!(pair[0].position + pair[0].compressed_len, pair[1].position);
        }
    }

    #[test]
    fn test_index_records_are_16_byte_aligned() {
        let entry = CTocEntry {
            name: "abc".into(),
            position: 0,
            compressed_len: 0,
            uncompressed_len: 0,
            compressed: false,
            type_code: b'x',
        };
        let mut buf = Vec::new();
        entry.write_to(&mut buf).unwrap();
        assert_eq!(buf.len() % 16, 0);
        assert_eq!(
            CTocEntry::read_from(&mut Cursor::new(buf.as_slice())).unwrap(),
            entry
        );
    }

    #[test]
    fn test_reads_archive_appended_to_executable() {
        let tmp = TempDir::new().unwrap();
        let pkg = tmp.path().join("app.pkg");
        write_sample(&pkg);

        let mut exe = b"#!stub loader bytes".to_vec();
        exe.extend(std::fs::read(&pkg).unwrap());

        let reader = CArchiveReader::from_bytes(exe).unwrap();
        assert_eq!(reader.start(), b"#!stub loader bytes".len());
        assert_eq!(reader.extract_by_name("app").unwrap(), b"print('hi')\n");
    }

    #[test]
    fn test_unsafe_names_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let mut writer =
            CArchiveWriter::create(&tmp.path().join("a.pkg"), "libpy.so", 311).unwrap();
        let err = writer.add("../escape", b"x", false, b'x').unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::Structural { .. })
        ));
        assert!(writer.entries().is_empty());
    }

    #[test]
    fn test_rejects_record_longer_than_index() {
        let mut buf = u32::MAX.to_be_bytes().to_vec();
        buf.extend_from_slice(&[0u8; ENTRY_HEADER_LEN + 14]);
        let err = CTocEntry::read_from(&mut Cursor::new(buf.as_slice())).unwrap_err();
        assert!(err.to_string().contains("corrupt archive index"));
    }

    #[test]
    fn test_rejects_corrupt_index_length() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("app.pkg");
        write_sample(&path);

        // Point the cookie's index length past the end of the file.
        let mut data = std::fs::read(&path).unwrap();
        let field = data.len() - COOKIE_LEN + MAGIC.len() + 8;
        data[field..field + 4].copy_from_slice(&u32::MAX.to_be_bytes());
        assert!(CArchiveReader::from_bytes(data).is_err());
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(CArchiveReader::from_bytes(vec![0u8; 200]).is_err());
    }
}

//! Object archive (PYZ) format.
//!
//! ```text
//! "PYZ\0" | interpreter magic (4) | index position (u32)
//! blob 0 | blob 1 | ...          zlib-compressed code objects, optionally sealed
//! index                          u32 count, then per entry:
//!                                u16 name length, name, u8 is_package,
//!                                u32 position, u32 length
//! ```
//!
//! Every blob is compressed on its own so the loader can import a single
//! module without inflating the rest.

use std::fs::File;
use std::io::{BufWriter, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::archive::cipher::Cipher;

/// Magic at the start of every object archive.
pub const PYZ_MAGIC: [u8; 4] = *b"PYZ\0";

const HEADER_LEN: u64 = 12;

/// Smallest index record: name length, package flag, position, length.
const MIN_RECORD_LEN: usize = 2 + 1 + 4 + 4;

/// One record of the object archive index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PyzEntry {
    pub name: String,
    pub is_package: bool,
    pub position: u32,
    pub length: u32,
}

/// Streams compiled modules into a new object archive.
pub struct PyzWriter {
    out: BufWriter<File>,
    path: PathBuf,
    pos: u64,
    entries: Vec<PyzEntry>,
    cipher: Option<Cipher>,
}

impl PyzWriter {
    /// Create the archive; `code_magic` identifies the bytecode version.
    pub fn create(path: &Path, code_magic: [u8; 4], cipher: Option<Cipher>) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("failed to create archive {}", path.display()))?;
        let mut out = BufWriter::new(file);
        out.write_all(&PYZ_MAGIC)?;
        out.write_all(&code_magic)?;
        out.write_u32::<BigEndian>(0)?;
        Ok(PyzWriter {
            out,
            path: path.to_path_buf(),
            pos: HEADER_LEN,
            entries: Vec::new(),
            cipher,
        })
    }

    /// Add a compiled module.
    pub fn add(&mut self, name: &str, is_package: bool, code: &[u8]) -> Result<()> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
        encoder.write_all(code)?;
        let mut blob = encoder.finish()?;
        if let Some(cipher) = &self.cipher {
            blob = cipher.encrypt(&blob)?;
        }

        self.out
            .write_all(&blob)
            .with_context(|| format!("failed to write to {}", self.path.display()))?;
        self.entries.push(PyzEntry {
            name: name.to_string(),
            is_package,
            position: u32_of(self.pos)?,
            length: u32_of(blob.len() as u64)?,
        });
        self.pos += blob.len() as u64;
        Ok(())
    }

    /// Write the index, patch the header and flush.
    pub fn finish(mut self) -> Result<Vec<PyzEntry>> {
        let toc_pos = u32_of(self.pos)?;
        self.out.write_u32::<BigEndian>(u32_of(self.entries.len() as u64)?)?;
        for entry in &self.entries {
            let name = entry.name.as_bytes();
            let Ok(name_len) = u16::try_from(name.len()) else {
                bail!("module name `{}` is too long", entry.name);
            };
            self.out.write_u16::<BigEndian>(name_len)?;
            self.out.write_all(name)?;
            self.out.write_u8(u8::from(entry.is_package))?;
            self.out.write_u32::<BigEndian>(entry.position)?;
            self.out.write_u32::<BigEndian>(entry.length)?;
        }

        self.out.seek(SeekFrom::Start(8))?;
        self.out.write_u32::<BigEndian>(toc_pos)?;
        self.out
            .flush()
            .with_context(|| format!("failed to flush {}", self.path.display()))?;
        Ok(self.entries)
    }
}

fn u32_of(value: u64) -> Result<u32> {
    u32::try_from(value).context("object archive exceeds 4 GiB")
}

/// Reads an object archive.
#[derive(Debug)]
pub struct PyzReader {
    data: Vec<u8>,
    code_magic: [u8; 4],
    entries: Vec<PyzEntry>,
}

impl PyzReader {
    pub fn open(path: &Path) -> Result<Self> {
        let data =
            std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_bytes(data)
            .with_context(|| format!("{} is not an object archive", path.display()))
    }

    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        if data.len() < HEADER_LEN as usize || data[..4] != PYZ_MAGIC {
            bail!("bad magic");
        }
        let mut code_magic = [0u8; 4];
        code_magic.copy_from_slice(&data[4..8]);
        let toc_pos = Cursor::new(&data[8..12]).read_u32::<BigEndian>()? as usize;

        let Some(index) = data.get(toc_pos..) else {
            bail!("index position {} out of bounds", toc_pos);
        };
        let mut cursor = Cursor::new(index);
        let count = cursor.read_u32::<BigEndian>()? as usize;
        if count > (index.len() - 4) / MIN_RECORD_LEN {
            bail!("corrupt index: {} entries do not fit in {} bytes", count, index.len());
        }
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let name_len = cursor.read_u16::<BigEndian>()? as usize;
            let mut name = vec![0u8; name_len];
            cursor.read_exact(&mut name)?;
            entries.push(PyzEntry {
                name: String::from_utf8(name).context("module name is not valid UTF-8")?,
                is_package: cursor.read_u8()? != 0,
                position: cursor.read_u32::<BigEndian>()?,
                length: cursor.read_u32::<BigEndian>()?,
            });
        }

        Ok(PyzReader {
            data,
            code_magic,
            entries,
        })
    }

    pub fn code_magic(&self) -> [u8; 4] {
        self.code_magic
    }

    pub fn entries(&self) -> &[PyzEntry] {
        &self.entries
    }

    pub fn find(&self, name: &str) -> Option<&PyzEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Code object of `name`, decrypted with `cipher` when given.
    pub fn extract(&self, name: &str, cipher: Option<&Cipher>) -> Result<Vec<u8>> {
        let Some(entry) = self.find(name) else {
            bail!("no module `{}` in object archive", name);
        };
        let begin = entry.position as usize;
        let end = begin.checked_add(entry.length as usize);
        let Some(blob) = end.and_then(|end| self.data.get(begin..end)) else {
            bail!("module `{}` lies outside the archive", name);
        };

        let compressed = match cipher {
            Some(cipher) => cipher.decrypt(blob)?,
            None => blob.to_vec(),
        };
        let mut code = Vec::new();
        ZlibDecoder::new(compressed.as_slice())
            .read_to_end(&mut code)
            .with_context(|| format!("failed to decompress `{}`", name))?;
        Ok(code)
    }
}

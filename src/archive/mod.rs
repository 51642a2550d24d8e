//! On-disk archive formats read by the native loader.

pub mod carchive;
pub mod cipher;
pub mod pyz;

pub use carchive::{CArchiveReader, CArchiveWriter, CTocEntry};
pub use cipher::Cipher;
pub use pyz::{PyzEntry, PyzReader, PyzWriter};

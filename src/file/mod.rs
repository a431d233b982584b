//! Access to the raw bytes of a module file.
//!
//! A [`File`] wraps either a memory-mapped file on disk or an owned in-memory buffer behind the
//! [`Backend`] trait. The module reader only ever sees a byte slice, so both sources are parsed
//! by the same code. Holding a [`File`] keeps the underlying handle open; dropping it releases
//! the handle, which is how the scoped resources of a rewrite session (the loaded plugin module
//! and the cached platform target modules) are released deterministically.
//!
//! Writing is handled by [`output::Output`], which stages the new bytes in a temporary file next
//! to the destination and renames it into place on commit.
//!
//! # Examples
//!
//! ```rust,no_run
//! use modcompat::File;
//! use std::path::Path;
//!
//! let file = File::from_file(Path::new("plugin.pmod"))?;
//! println!("{} bytes, sha1 {}", file.len(), file.digest());
//! # Ok::<(), modcompat::Error>(())
//! ```

pub mod io;
pub mod output;
pub mod parser;

mod memory;
mod physical;

use std::{fmt::Write, path::Path};

use sha1::{Digest, Sha1};

use crate::{Error::Empty, Result};
use memory::Memory;
use physical::Physical;

/// Backend trait for the source of module bytes.
pub trait Backend: Send + Sync {
    /// Returns a slice of the data at the given offset and length.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the range exceeds the data.
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]>;

    /// Returns the entire data buffer.
    fn data(&self) -> &[u8];

    /// Returns the total length of the data buffer.
    fn len(&self) -> usize;
}

/// An opened module file, backed by a memory mapping or an owned buffer.
pub struct File {
    data: Box<dyn Backend>,
}

impl File {
    /// Memory-map the file at `path`.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be opened, or
    /// [`crate::Error::Empty`] for a zero-length file.
    pub fn from_file(path: &Path) -> Result<File> {
        let input = Physical::new(path)?;
        Self::load(input)
    }

    /// Wrap an in-memory buffer.
    ///
    /// # Errors
    /// Returns [`crate::Error::Empty`] for an empty buffer.
    pub fn from_mem(data: Vec<u8>) -> Result<File> {
        let input = Memory::new(data);
        Self::load(input)
    }

    fn load<T: Backend + 'static>(data: T) -> Result<File> {
        if data.len() == 0 {
            return Err(Empty);
        }

        Ok(File {
            data: Box::new(data),
        })
    }

    /// Total size of the file in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the file has no data. Never true for a successfully opened file.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The complete file contents.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.data.data()
    }

    /// A bounds-checked slice of the file contents.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the range exceeds the file.
    pub fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        self.data.data_slice(offset, len)
    }

    /// Lowercase hex SHA-1 of the file contents.
    #[must_use]
    pub fn digest(&self) -> String {
        digest_hex(self.data())
    }
}

/// Lowercase hex SHA-1 of `data`.
#[must_use]
pub fn digest_hex(data: &[u8]) -> String {
    let hash = Sha1::digest(data);

    let mut hex = String::with_capacity(hash.len() * 2);
    for byte in hash {
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn from_mem() {
        let file = File::from_mem(vec![1, 2, 3, 4]).unwrap();
        assert_eq!(file.len(), 4);
        assert!(!file.is_empty());
        assert_eq!(file.data_slice(1, 2).unwrap(), &[2, 3]);
        assert!(file.data_slice(3, 2).is_err());
    }

    #[test]
    fn empty_input() {
        assert!(matches!(File::from_mem(Vec::new()), Err(Error::Empty)));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.pmod");
        std::fs::write(&path, b"").unwrap();
        assert!(File::from_file(&path).is_err());
    }

    #[test]
    fn digest() {
        assert_eq!(
            digest_hex(b"abc"),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );

        let file = File::from_mem(b"abc".to_vec()).unwrap();
        assert_eq!(file.digest(), digest_hex(b"abc"));
    }
}

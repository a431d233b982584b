//! Memory-mapped file backend.
//!
//! Plugin modules and the platform target modules are read through a read-only memory mapping.
//! The mapping (and the underlying file handle) lives exactly as long as the [`Physical`] value,
//! so dropping it releases the handle deterministically.

use std::{fs, path::Path};

use memmap2::Mmap;

use super::Backend;
use crate::{Error::FileError, Result};

/// Input backend backed by a read-only memory mapping of a file on disk.
#[derive(Debug)]
pub struct Physical {
    data: Mmap,
}

impl Physical {
    /// Open and map `path`.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be opened or mapped.
    pub fn new(path: impl AsRef<Path>) -> Result<Physical> {
        let file = fs::File::open(path).map_err(FileError)?;

        // The mapping is read-only and the file is not modified while mapped; rewritten modules
        // are always written to a fresh temporary file and renamed over the destination.
        let mmap = unsafe { Mmap::map(&file) }.map_err(FileError)?;

        Ok(Physical { data: mmap })
    }
}

impl Backend for Physical {
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let Some(offset_end) = offset.checked_add(len) else {
            return Err(out_of_bounds_error!());
        };

        if offset_end > self.data.len() {
            return Err(out_of_bounds_error!());
        }

        Ok(&self.data[offset..offset_end])
    }

    fn data(&self) -> &[u8] {
        self.data.as_ref()
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn physical() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.bin");
        std::fs::write(&path, [0x50, 0x4D, 0x4F, 0x44, 0x01, 0x00]).unwrap();

        let physical = Physical::new(&path).unwrap();
        assert_eq!(physical.len(), 6);
        assert_eq!(physical.data()[0], 0x50);
        assert_eq!(physical.data_slice(4, 2).unwrap(), &[0x01, 0x00]);
        assert!(physical.data_slice(4, 3).is_err());
        assert!(physical.data_slice(usize::MAX, 1).is_err());
    }

    #[test]
    fn physical_invalid_file_path() {
        let result = Physical::new("/nonexistent/path/to/plugin.pmod");
        match result.unwrap_err() {
            Error::FileError(io_error) => {
                assert_eq!(io_error.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("Expected FileError, got {other:?}"),
        }
    }
}

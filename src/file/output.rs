//! Atomic module output.
//!
//! [`Output`] stages the bytes of a rewritten module in a memory-mapped temporary file placed
//! next to the destination, and only moves it over the destination path in
//! [`Output::commit`]. A crash or error before the commit leaves the destination untouched; the
//! temporary file is removed when an uncommitted [`Output`] is dropped.
//!
//! Outside the crate the staging is reached through [`crate::Module::save`].
//!
//! # Examples
//!
//! ```rust,no_run
//! use modcompat::Module;
//! use std::path::Path;
//!
//! let module = Module::from_file(Path::new("plugin.pmod"))?;
//! module.save(Path::new("plugin_compat.pmod"))?;
//! # Ok::<(), modcompat::Error>(())
//! ```

use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use memmap2::{MmapMut, MmapOptions};

use crate::{Error, Result};

static STAGING_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A staged, memory-mapped output file that is moved into place on commit.
pub struct Output {
    mmap: Option<MmapMut>,
    staging_path: PathBuf,
    target_path: PathBuf,
    committed: bool,
}

impl Output {
    /// Create a staging file of `size` bytes for `target_path`.
    ///
    /// The staging file lives in the same directory as the target so the final rename never
    /// crosses a filesystem boundary.
    ///
    /// # Errors
    /// Returns [`crate::Error::WriteFailed`] if the staging file cannot be created, sized or
    /// mapped.
    pub fn create<P: AsRef<Path>>(target_path: P, size: u64) -> Result<Self> {
        let target_path = target_path.as_ref().to_path_buf();
        let staging_path = staging_path_for(&target_path)?;

        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&staging_path)
            .map_err(|e| Error::WriteFailed {
                message: format!(
                    "Failed to create staging file {}: {e}",
                    staging_path.display()
                ),
            })?;

        let cleanup = |message: String| {
            let _ = std::fs::remove_file(&staging_path);
            Error::WriteFailed { message }
        };

        if let Err(e) = file.set_len(size) {
            return Err(cleanup(format!("Failed to set file size: {e}")));
        }

        // The staging file was created exclusively by this call and is not shared.
        let mmap = match unsafe { MmapOptions::new().map_mut(&file) } {
            Ok(mmap) => mmap,
            Err(e) => return Err(cleanup(format!("Failed to create memory mapping: {e}"))),
        };

        Ok(Self {
            mmap: Some(mmap),
            staging_path,
            target_path,
            committed: false,
        })
    }

    /// Copy `data` into the staged file at `offset`.
    ///
    /// # Errors
    /// Returns [`crate::Error::WriteFailed`] if the write would exceed the staged size.
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let Some(mmap) = self.mmap.as_mut() else {
            return Err(Error::WriteFailed {
                message: "Output was already released".to_string(),
            });
        };

        let start = usize::try_from(offset).map_err(|_| Error::WriteFailed {
            message: format!("Offset {offset} does not fit the address space"),
        })?;
        let end = start
            .checked_add(data.len())
            .filter(|end| *end <= mmap.len())
            .ok_or_else(|| Error::WriteFailed {
                message: format!(
                    "Write would exceed file size: offset={}, len={}, file_size={}",
                    offset,
                    data.len(),
                    mmap.len()
                ),
            })?;

        mmap[start..end].copy_from_slice(data);
        Ok(())
    }

    /// Size of the staged file in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.mmap.as_ref().map_or(0, |mmap| mmap.len() as u64)
    }

    /// Path of the staging file.
    #[must_use]
    pub fn staging_path(&self) -> &Path {
        &self.staging_path
    }

    /// Final destination of the module.
    #[must_use]
    pub fn target_path(&self) -> &Path {
        &self.target_path
    }

    /// Flush the staged bytes and atomically move them over the destination.
    ///
    /// # Errors
    /// Returns [`crate::Error::WriteFailed`] if flushing or the rename fails. The staging file
    /// is removed in that case and the destination is left as it was.
    pub fn commit(mut self) -> Result<()> {
        if let Some(mmap) = self.mmap.take() {
            mmap.flush().map_err(|e| Error::WriteFailed {
                message: format!("Failed to flush memory mapping: {e}"),
            })?;
        }

        std::fs::rename(&self.staging_path, &self.target_path).map_err(|e| {
            Error::WriteFailed {
                message: format!(
                    "Failed to move {} to {}: {e}",
                    self.staging_path.display(),
                    self.target_path.display()
                ),
            }
        })?;

        self.committed = true;
        Ok(())
    }
}

impl Drop for Output {
    fn drop(&mut self) {
        // Unmap before removing so the file is not held open on platforms that forbid it.
        self.mmap.take();
        if !self.committed {
            let _ = std::fs::remove_file(&self.staging_path);
        }
    }
}

/// Write `data` to `path` through a staged [`Output`].
///
/// # Errors
/// Returns [`crate::Error::WriteFailed`] if any step fails; `path` is then left untouched.
pub fn write_atomic<P: AsRef<Path>>(path: P, data: &[u8]) -> Result<()> {
    let mut output = Output::create(path, data.len() as u64)?;
    output.write_at(0, data)?;
    output.commit()
}

fn staging_path_for(target_path: &Path) -> Result<PathBuf> {
    let Some(file_name) = target_path.file_name() else {
        return Err(Error::WriteFailed {
            message: format!("{} is not a file path", target_path.display()),
        });
    };

    let sequence = STAGING_COUNTER.fetch_add(1, Ordering::Relaxed);
    let staging_name = format!(
        ".{}.{}-{}.tmp",
        file_name.to_string_lossy(),
        std::process::id(),
        sequence
    );

    Ok(target_path.with_file_name(staging_name))
}

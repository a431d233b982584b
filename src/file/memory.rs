//! In-memory backend for modules that were produced or received as a byte buffer.

use super::Backend;
use crate::Result;

/// Input backend that owns a byte buffer.
#[derive(Debug)]
pub struct Memory {
    data: Vec<u8>,
}

impl Memory {
    /// Wrap an owned byte buffer.
    pub fn new(data: Vec<u8>) -> Memory {
        Memory { data }
    }
}

impl Backend for Memory {
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
        self.data.as_slice()
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory() {
        let mut data = vec![0xCC_u8; 64];
        data[10..15].copy_from_slice(&[0xBB; 5]);

        let memory = Memory::new(data);
        assert_eq!(memory.len(), 64);
        assert_eq!(memory.data()[0], 0xCC);
        assert_eq!(
            memory.data_slice(10, 5).unwrap(),
            &[0xBB, 0xBB, 0xBB, 0xBB, 0xBB]
        );
        assert!(memory.data_slice(usize::MAX, 2).is_err());
        assert!(memory.data_slice(60, 5).is_err());
    }
}

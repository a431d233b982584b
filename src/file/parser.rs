//! Low-level byte stream parser for module and bytecode decoding.
//!
//! This module provides the [`crate::file::parser::Parser`] type, a cursor-based binary data
//! parser used for reading the module header, heaps, tables, signatures and instruction streams.
//! It offers bounds-checked access with support for the compressed encodings used by signature
//! blobs and heap length prefixes.
//!
//! # Architecture
//!
//! The parser maintains a position within a byte slice:
//!
//! - **Position tracking** - Maintains current offset for sequential parsing operations
//! - **Bounds checking** - All operations validate data availability before reading
//! - **Type-safe reading** - Strongly typed methods for common data types
//!
//! # Examples
//!
//! ```rust
//! use modcompat::Parser;
//!
//! let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
//! let mut parser = Parser::new(&data);
//!
//! let first = parser.read_le::<u32>()?;
//! assert_eq!(first, 0x04030201);
//!
//! parser.seek(6)?;
//! let last_bytes = parser.read_le::<u16>()?;
//! assert_eq!(last_bytes, 0x0807);
//! # Ok::<(), modcompat::Error>(())
//! ```

use crate::{
    file::io::{read_le_at, WireIO},
    module::{TableId, Token},
    Result,
};

/// A generic binary data parser for reading module structures.
///
/// `Parser` provides a cursor-based interface for reading little-endian binary data. The parser
/// maintains an internal position cursor and provides bounds checking to prevent buffer overruns
/// when reading malformed or truncated modules.
///
/// # Examples
///
/// ```rust
/// use modcompat::Parser;
///
/// let data = [0x0C, 0x49];
/// let mut parser = Parser::new(&data);
///
/// assert_eq!(parser.read_compressed_uint()?, 12);
/// let token = parser.read_compressed_token()?;
/// assert_eq!(token.row(), 18);
/// # Ok::<(), modcompat::Error>(())
/// ```
pub struct Parser<'a> {
    /// The binary data being parsed
    data: &'a [u8],
    /// Current position within the data buffer
    position: usize,
}

impl<'a> Parser<'a> {
    /// Create a new [`crate::file::parser::Parser`] from a byte slice.
    ///
    /// # Arguments
    /// * `data` - The byte slice to read from
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Parser { data, position: 0 }
    }

    /// Returns the length of the underlying data buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the parser has no data.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns `true` if there is more data available to parse.
    #[must_use]
    pub fn has_more_data(&self) -> bool {
        self.position < self.data.len()
    }

    /// Move the cursor to an absolute position.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `pos` is beyond the end of the data.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos >= self.data.len() {
            return Err(out_of_bounds_error!());
        }

        self.position = pos;
        Ok(())
    }

    /// Move the cursor forward by `step` bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the new position would exceed the data.
    pub fn advance_by(&mut self, step: usize) -> Result<()> {
        let end = self.end_of(step)?;
        self.position = end;
        Ok(())
    }

    /// Current cursor position.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// Number of bytes left after the cursor.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    /// Read a primitive in little-endian byte order and advance the cursor.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if not enough data is left.
    pub fn read_le<T: WireIO>(&mut self) -> Result<T> {
        read_le_at::<T>(self.data, &mut self.position)
    }

    /// Read a compressed unsigned integer as defined by ECMA-335 §II.23.2.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] on truncated input, or
    /// [`crate::Error::Malformed`] if the first byte has an invalid prefix.
    pub fn read_compressed_uint(&mut self) -> Result<u32> {
        let first_byte = self.read_le::<u8>()?;

        if (first_byte & 0x80) == 0 {
            return Ok(u32::from(first_byte));
        }

        if (first_byte & 0xC0) == 0x80 {
            let second_byte = self.read_le::<u8>()?;
            let value = ((u32::from(first_byte) & 0x3F) << 8) | u32::from(second_byte);
            return Ok(value);
        }

        if (first_byte & 0xE0) == 0xC0 {
            let b1 = u32::from(self.read_le::<u8>()?);
            let b2 = u32::from(self.read_le::<u8>()?);
            let b3 = u32::from(self.read_le::<u8>()?);
            let value = ((u32::from(first_byte) & 0x1F) << 24) | (b1 << 16) | (b2 << 8) | b3;
            return Ok(value);
        }

        Err(malformed_error!("Invalid compressed uint - {}", first_byte))
    }

    /// Read a compressed `TypeDefOrRef` coded index and expand it into a [`Token`].
    ///
    /// The two low bits select the table (`0` = TypeDef, `1` = TypeRef), the remaining bits
    /// hold the row.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for coded indices into any other table.
    pub fn read_compressed_token(&mut self) -> Result<Token> {
        let compressed_token = self.read_compressed_uint()?;

        let table = match compressed_token & 0x3 {
            0x0 => TableId::TypeDef,
            0x1 => TableId::TypeRef,
            _ => {
                return Err(malformed_error!(
                    "Invalid compressed token - {}",
                    compressed_token
                ))
            }
        };

        Ok(Token::from_parts(table, compressed_token >> 2))
    }

    /// Read a string prefixed by its compressed byte length.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the length exceeds the data, or
    /// [`crate::Error::Malformed`] for invalid UTF-8.
    pub fn read_compressed_string_utf8(&mut self) -> Result<String> {
        let length = self.read_compressed_uint()? as usize;
        let string_data = self.read_bytes(length)?;

        String::from_utf8(string_data.to_vec()).map_err(|e| {
            malformed_error!(
                "Invalid UTF-8 compressed string at offset {}-{}: {}",
                self.position - length,
                self.position,
                e.utf8_error()
            )
        })
    }

    fn end_of(&self, length: usize) -> Result<usize> {
        let end = self
            .position
            .checked_add(length)
            .ok_or(out_of_bounds_error!())?;

        if end > self.data.len() {
            return Err(out_of_bounds_error!());
        }

        Ok(end)
    }

    /// Borrow the next `length` bytes and advance the cursor past them.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if fewer than `length` bytes remain.
    pub fn read_bytes(&mut self, length: usize) -> Result<&'a [u8]> {
        let end = self.end_of(length)?;
        let bytes = &self.data[self.position..end];
        self.position = end;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_read_compressed_uint() {
        let test_cases = vec![
            (vec![0x03], 3),                             // 1-byte format
            (vec![0x7F], 0x7F),                          // 1-byte format, max value
            (vec![0x80, 0x80], 0x80),                    // 2-byte format, min value
            (vec![0xBF, 0xFF], 0x3FFF),                  // 2-byte format, max value
            (vec![0xC0, 0x00, 0x00, 0x00], 0x00),        // 4-byte format, min value
            (vec![0xDF, 0xFF, 0xFF, 0xFF], 0x1FFF_FFFF), // 4-byte format, max value
        ];

        for (input, expected) in test_cases {
            let mut parser = Parser::new(&input);
            let result = parser.read_compressed_uint().unwrap();
            assert_eq!(result, expected);
        }

        let mut parser = Parser::new(&[]);
        assert!(matches!(
            parser.read_compressed_uint(),
            Err(Error::OutOfBounds { .. })
        ));

        let mut parser = Parser::new(&[0xE0]);
        assert!(matches!(
            parser.read_compressed_uint(),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn test_read_compressed_token() {
        // TypeRef row 18: (18 << 2) | 1
        let mut parser = Parser::new(&[0x49]);
        let token = parser.read_compressed_token().unwrap();
        assert_eq!(token.table(), TableId::TypeRef as u8);
        assert_eq!(token.row(), 18);

        // TypeDef row 3: (3 << 2) | 0
        let mut parser = Parser::new(&[0x0C]);
        let token = parser.read_compressed_token().unwrap();
        assert_eq!(token.table(), TableId::TypeDef as u8);
        assert_eq!(token.row(), 3);

        // TypeSpec is not part of the module format
        let mut parser = Parser::new(&[0x0E]);
        assert!(parser.read_compressed_token().is_err());
    }

    #[test]
    fn test_compressed_string() {
        let mut parser = Parser::new(&[0x03, b'f', b'o', b'o', 0x05, b'x']);
        assert_eq!(parser.read_compressed_string_utf8().unwrap(), "foo");
        assert!(matches!(
            parser.read_compressed_string_utf8(),
            Err(Error::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_advance_past_end() {
        let mut parser = Parser::new(&[0x01, 0x02]);
        assert!(matches!(parser.advance_by(3), Err(Error::OutOfBounds { .. })));
        assert_eq!(parser.pos(), 0);

        parser.advance_by(2).unwrap();
        assert!(!parser.has_more_data());
        assert!(matches!(parser.advance_by(1), Err(Error::OutOfBounds { .. })));
        assert!(matches!(
            parser.advance_by(usize::MAX),
            Err(Error::OutOfBounds { .. })
        ));
        assert_eq!(parser.pos(), 2);
    }

    #[test]
    fn test_navigation() {
        let data = [0x01, 0x02, 0x03, 0x04];
        let mut parser = Parser::new(&data);

        assert_eq!(parser.len(), 4);
        assert!(!parser.is_empty());
        parser.advance_by(3).unwrap();
        assert_eq!(parser.pos(), 3);
        assert_eq!(parser.remaining(), 1);
        assert!(parser.advance_by(2).is_err());
        parser.seek(0).unwrap();
        assert_eq!(parser.read_bytes(2).unwrap(), &[0x01, 0x02]);
        assert!(parser.seek(4).is_err());
        assert!(parser.has_more_data());
    }
}

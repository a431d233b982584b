//! The `#Strings`, `#Blob` and `#US` heaps.
//!
//! Reading resolves heap indices into owned values, so a loaded [`crate::Module`] holds no
//! borrow of the file it came from. Writing rebuilds `#Strings` and `#Blob` from scratch with
//! de-duplication in first-use order, which makes the output a pure function of the in-memory
//! model. The user string heap is different: `ldstr` operands embed byte offsets into it, so it
//! is carried through unchanged and only ever appended to.

use std::collections::{BTreeMap, HashMap};

use crate::{
    file::{io::write_compressed_uint, parser::Parser},
    module::{TableId, Token},
    Result,
};

/// Read access to a `#Strings` heap.
pub(crate) struct StringsView<'a> {
    data: &'a [u8],
}

impl<'a> StringsView<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        StringsView { data }
    }

    /// The NUL-terminated string starting at `index`. Index 0 is always the empty string.
    pub(crate) fn get(&self, index: u32) -> Result<String> {
        if index == 0 {
            return Ok(String::new());
        }

        let start = index as usize;
        if start >= self.data.len() {
            return Err(malformed_error!(
                "String index {} exceeds heap of {} bytes",
                index,
                self.data.len()
            ));
        }

        let Some(length) = self.data[start..].iter().position(|byte| *byte == 0) else {
            return Err(malformed_error!("String at index {} is not terminated", index));
        };

        std::str::from_utf8(&self.data[start..start + length])
            .map(str::to_string)
            .map_err(|e| malformed_error!("Invalid UTF-8 string at index {}: {}", index, e))
    }
}

/// Read access to a `#Blob` heap.
pub(crate) struct BlobView<'a> {
    data: &'a [u8],
}

impl<'a> BlobView<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        BlobView { data }
    }

    /// The blob starting at `index`. Index 0 is always the empty blob.
    pub(crate) fn get(&self, index: u32) -> Result<&'a [u8]> {
        if index == 0 {
            return Ok(&[]);
        }

        let start = index as usize;
        if start >= self.data.len() {
            return Err(malformed_error!(
                "Blob index {} exceeds heap of {} bytes",
                index,
                self.data.len()
            ));
        }

        let mut parser = Parser::new(self.data);
        parser.seek(start)?;
        let length = parser.read_compressed_uint()? as usize;
        parser.read_bytes(length)
    }
}

/// Builder for a de-duplicated `#Strings` heap.
pub(crate) struct StringsBuilder {
    data: Vec<u8>,
    index: HashMap<String, u32>,
}

impl StringsBuilder {
    pub(crate) fn new() -> Self {
        StringsBuilder {
            data: vec![0],
            index: HashMap::new(),
        }
    }

    /// Index of `value`, adding it on first use.
    pub(crate) fn add(&mut self, value: &str) -> Result<u32> {
        if value.is_empty() {
            return Ok(0);
        }
        if value.contains('\0') {
            return Err(malformed_error!(
                "String '{}' contains a NUL character",
                value.escape_debug()
            ));
        }
        if let Some(index) = self.index.get(value) {
            return Ok(*index);
        }

        let index = u32::try_from(self.data.len())
            .map_err(|_| malformed_error!("#Strings heap exceeds 4 GiB"))?;
        self.data.extend_from_slice(value.as_bytes());
        self.data.push(0);
        self.index.insert(value.to_string(), index);
        Ok(index)
    }

    pub(crate) fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

/// Builder for a de-duplicated `#Blob` heap.
pub(crate) struct BlobBuilder {
    data: Vec<u8>,
    index: HashMap<Vec<u8>, u32>,
}

impl BlobBuilder {
    pub(crate) fn new() -> Self {
        BlobBuilder {
            data: vec![0],
            index: HashMap::new(),
        }
    }

    /// Index of `blob`, adding it on first use.
    pub(crate) fn add(&mut self, blob: &[u8]) -> Result<u32> {
        if blob.is_empty() {
            return Ok(0);
        }
        if let Some(index) = self.index.get(blob) {
            return Ok(*index);
        }

        let index = u32::try_from(self.data.len())
            .map_err(|_| malformed_error!("#Blob heap exceeds 4 GiB"))?;
        write_compressed_uint(blob.len() as u32, &mut self.data)?;
        self.data.extend_from_slice(blob);
        self.index.insert(blob.to_vec(), index);
        Ok(index)
    }

    pub(crate) fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

/// The user string heap (`ldstr` operands).
///
/// Entries are compressed-length-prefixed UTF-8 strings addressed by byte offset; offset 0 is
/// reserved for the empty entry. Existing offsets never move.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UserStrings {
    data: Vec<u8>,
    entries: BTreeMap<u32, String>,
}

impl UserStrings {
    /// An empty heap holding only the reserved entry.
    #[must_use]
    pub fn new() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(0, String::new());
        UserStrings {
            data: vec![0],
            entries,
        }
    }

    /// Parse a heap, indexing every entry.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the heap does not start with the reserved entry,
    /// an entry is truncated, or an entry is not valid UTF-8.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Ok(UserStrings::default());
        }
        if data[0] != 0 {
            return Err(malformed_error!("#US heap must start with the reserved empty entry"));
        }

        let mut entries = BTreeMap::new();
        let mut parser = Parser::new(data);
        while parser.has_more_data() {
            let offset = parser.pos() as u32;
            entries.insert(offset, parser.read_compressed_string_utf8()?);
        }

        Ok(UserStrings {
            data: data.to_vec(),
            entries,
        })
    }

    /// The string at heap offset `offset`, if an entry starts there.
    #[must_use]
    pub fn get(&self, offset: u32) -> Option<&str> {
        self.entries.get(&offset).map(String::as_str)
    }

    /// The string an `ldstr` token refers to.
    #[must_use]
    pub fn get_token(&self, token: Token) -> Option<&str> {
        if !token.is_table(TableId::UserString) || token.row() == 0 {
            return None;
        }
        self.get(token.row())
    }

    /// Token of `value`, appending it to the heap if it is not present yet.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the heap would exceed the 24-bit token row range.
    pub fn intern(&mut self, value: &str) -> Result<Token> {
        if let Some((offset, _)) = self
            .entries
            .iter()
            .find(|(offset, entry)| **offset != 0 && entry.as_str() == value)
        {
            return Ok(Token::from_parts(TableId::UserString, *offset));
        }

        if self.data.is_empty() {
            self.data.push(0);
            self.entries.insert(0, String::new());
        }

        let offset = self.data.len() as u32;
        if offset > 0x00FF_FFFF {
            return Err(malformed_error!("#US heap exceeds the token row range"));
        }

        write_compressed_uint(value.len() as u32, &mut self.data)?;
        self.data.extend_from_slice(value.as_bytes());
        self.entries.insert(offset, value.to_string());
        Ok(Token::from_parts(TableId::UserString, offset))
    }

    /// All entries with their offsets, excluding the reserved one.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
        self.entries
            .iter()
            .filter(|(offset, _)| **offset != 0)
            .map(|(offset, value)| (*offset, value.as_str()))
    }

    /// Number of entries, excluding the reserved one.
    #[must_use]
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Returns `true` if the heap has no entries besides the reserved one.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The raw heap bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strings_roundtrip() {
        let mut builder = StringsBuilder::new();
        assert_eq!(builder.add("").unwrap(), 0);
        let game = builder.add("Game").unwrap();
        let player = builder.add("Player").unwrap();
        assert_eq!(builder.add("Game").unwrap(), game);
        assert!(builder.add("bad\0name").is_err());

        let data = builder.into_bytes();
        let view = StringsView::new(&data);
        assert_eq!(view.get(game).unwrap(), "Game");
        assert_eq!(view.get(player).unwrap(), "Player");
        assert_eq!(view.get(0).unwrap(), "");
        assert_eq!(view.get(game + 1).unwrap(), "ame");
        assert!(view.get(data.len() as u32).is_err());
    }

    #[test]
    fn strings_unterminated() {
        let data = [0x00, b'a', b'b'];
        assert!(StringsView::new(&data).get(1).is_err());
    }

    #[test]
    fn blobs_roundtrip() {
        let mut builder = BlobBuilder::new();
        assert_eq!(builder.add(&[]).unwrap(), 0);
        let first = builder.add(&[0x20, 0x00, 0x01]).unwrap();
        let second = builder.add(&[0x06, 0x08]).unwrap();
        assert_eq!(builder.add(&[0x20, 0x00, 0x01]).unwrap(), first);

        let data = builder.into_bytes();
        let view = BlobView::new(&data);
        assert_eq!(view.get(first).unwrap(), &[0x20, 0x00, 0x01]);
        assert_eq!(view.get(second).unwrap(), &[0x06, 0x08]);
        assert!(view.get(0).unwrap().is_empty());
        assert!(view.get(100).is_err());
    }

    #[test]
    fn user_strings() {
        let mut heap = UserStrings::new();
        assert!(heap.is_empty());

        let hello = heap.intern("hello").unwrap();
        let world = heap.intern("world").unwrap();
        assert_eq!(hello, Token(0x7000_0001));
        assert_eq!(world, Token(0x7000_0007));
        assert_eq!(heap.intern("hello").unwrap(), hello);
        assert_eq!(heap.get_token(world), Some("world"));
        assert_eq!(heap.get(2), None);
        assert_eq!(heap.len(), 2);

        let reparsed = UserStrings::from_bytes(heap.as_bytes()).unwrap();
        assert_eq!(reparsed, heap);
    }

    #[test]
    fn user_strings_invalid() {
        assert!(UserStrings::from_bytes(&[0x01]).is_err());
        assert!(UserStrings::from_bytes(&[0x00, 0x05, b'a']).is_err());

        let mut empty = UserStrings::from_bytes(&[]).unwrap();
        assert!(empty.as_bytes().is_empty());
        assert_eq!(empty.intern("x").unwrap(), Token(0x7000_0001));
        assert_eq!(empty.as_bytes(), &[0x00, 0x01, b'x']);
    }
}

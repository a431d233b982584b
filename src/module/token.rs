use std::fmt;
use std::hash::{Hash, Hasher};

use strum::{Display, EnumIter};

/// Identifiers of the metadata tables a [`Token`] can point into.
///
/// The numeric values follow ECMA-335 so tokens read the same way as in CIL metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[repr(u8)]
pub enum TableId {
    /// References to types declared in other modules
    TypeRef = 0x01,
    /// Types declared in this module
    TypeDef = 0x02,
    /// Fields declared in this module
    Field = 0x04,
    /// Methods declared in this module
    MethodDef = 0x06,
    /// Method parameters
    Param = 0x08,
    /// References to fields and methods of referenced types
    MemberRef = 0x0A,
    /// References to other modules
    ModuleRef = 0x1A,
    /// User string heap (`ldstr` operands), the row is the heap offset
    UserString = 0x70,
}

impl TableId {
    /// Map the high byte of a token back to its table.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<TableId> {
        match value {
            0x01 => Some(TableId::TypeRef),
            0x02 => Some(TableId::TypeDef),
            0x04 => Some(TableId::Field),
            0x06 => Some(TableId::MethodDef),
            0x08 => Some(TableId::Param),
            0x0A => Some(TableId::MemberRef),
            0x1A => Some(TableId::ModuleRef),
            0x70 => Some(TableId::UserString),
            _ => None,
        }
    }
}

/// A metadata token representing a reference to a metadata table entry.
///
/// Tokens consist of a 32-bit value where:
/// - The high byte (bits 24-31) indicates the table type
/// - The low 24 bits (bits 0-23) indicate the 1-based row index within that table
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Token(pub u32);

impl Token {
    /// Creates a new token from a raw 32-bit value
    #[must_use]
    pub fn new(value: u32) -> Self {
        Token(value)
    }

    /// Creates a token for `row` (1-based) in `table`
    #[must_use]
    pub fn from_parts(table: TableId, row: u32) -> Self {
        Token((u32::from(table as u8) << 24) | (row & 0x00FF_FFFF))
    }

    /// Creates a token for the zero-based `index` into `table`
    #[must_use]
    pub fn from_index(table: TableId, index: usize) -> Self {
        Self::from_parts(table, index as u32 + 1)
    }

    /// Returns the raw token value
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Extracts the table type from the token (high byte)
    #[must_use]
    pub fn table(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// Extracts the table identifier, if the high byte names a known table
    #[must_use]
    pub fn table_id(&self) -> Option<TableId> {
        TableId::from_u8(self.table())
    }

    /// Returns `true` if the token points into `table`
    #[must_use]
    pub fn is_table(&self, table: TableId) -> bool {
        self.table() == table as u8
    }

    /// Extracts the row index from the token (low 24 bits)
    #[must_use]
    pub fn row(&self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    /// Zero-based index of the row, `None` for row 0
    #[must_use]
    pub fn index(&self) -> Option<usize> {
        (self.row() as usize).checked_sub(1)
    }

    /// Returns true if this is a null token (value 0)
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl From<u32> for Token {
    fn from(value: u32) -> Self {
        Token(value)
    }
}

impl From<Token> for u32 {
    fn from(token: Token) -> Self {
        token.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Token(0x{:08x}, table: 0x{:02x}, row: {})",
            self.0,
            self.table(),
            self.row()
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

impl Hash for Token {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

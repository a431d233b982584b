//! Endian-aware primitive reads and writes for the module format.
//!
//! The module format is little-endian throughout. This module provides the [`WireIO`] trait that
//! abstracts over the fixed-size primitives, bounds-checked readers that advance an offset, and
//! the matching writers that append to a growable buffer. The compressed integer encoding used
//! by signatures and heap length prefixes (ECMA-335 §II.23.2) is implemented here as well, so
//! that reader and writer share a single definition of the wire shape.
//!
//! # Key Components
//!
//! - [`WireIO`] - Conversion between primitives and their byte representation
//! - [`read_le_at`] - Bounds-checked little-endian read that advances an offset
//! - [`write_le`] - Little-endian append into a `Vec<u8>`
//! - [`write_compressed_uint`] / [`compressed_uint_size`] - Compressed unsigned integers

use crate::Result;

/// Trait for primitives that can be read from and written to the module byte format.
///
/// Implemented for all integer and floating point primitives used by the module tables,
/// instruction operands and constant blobs.
pub trait WireIO: Sized {
    /// Fixed-size byte array type for this primitive
    type Bytes: Sized + for<'a> TryFrom<&'a [u8]> + AsRef<[u8]>;

    /// Decode from little-endian bytes
    fn from_le_bytes(bytes: Self::Bytes) -> Self;

    /// Encode into little-endian bytes
    fn to_le_bytes(self) -> Self::Bytes;
}

macro_rules! impl_wire_io {
    ($($ty:ty => $len:expr),* $(,)?) => {
        $(
            impl WireIO for $ty {
                type Bytes = [u8; $len];

                fn from_le_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_le_bytes(bytes)
                }

                fn to_le_bytes(self) -> Self::Bytes {
                    <$ty>::to_le_bytes(self)
                }
            }
        )*
    };
}

impl_wire_io! {
    u8 => 1,
    i8 => 1,
    u16 => 2,
    i16 => 2,
    u32 => 4,
    i32 => 4,
    u64 => 8,
    i64 => 8,
    f32 => 4,
    f64 => 8,
}

/// Reads a value of type `T` in little-endian byte order at `offset`, advancing the offset.
///
/// # Arguments
///
/// * `data` - The byte buffer to read from
/// * `offset` - Mutable reference to the offset position (advanced after reading)
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
pub fn read_le_at<T: WireIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    let Some(end) = offset.checked_add(type_len) else {
        return Err(out_of_bounds_error!());
    };
    if end > data.len() {
        return Err(out_of_bounds_error!());
    }

    let Ok(read) = data[*offset..end].try_into() else {
        return Err(out_of_bounds_error!());
    };

    *offset = end;
    Ok(T::from_le_bytes(read))
}

/// Reads a value of type `T` in little-endian byte order from the start of `data`.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if `data` is shorter than `T`.
pub fn read_le<T: WireIO>(data: &[u8]) -> Result<T> {
    let mut offset = 0_usize;
    read_le_at(data, &mut offset)
}

/// Appends `value` in little-endian byte order to `buffer`.
pub fn write_le<T: WireIO>(buffer: &mut Vec<u8>, value: T) {
    buffer.extend_from_slice(value.to_le_bytes().as_ref());
}

/// Overwrites the bytes at `offset` with `value` in little-endian byte order.
///
/// Used to back-patch length prefixes and offsets once the final value is known.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if the write would exceed the buffer.
pub fn patch_le_at<T: WireIO>(buffer: &mut [u8], offset: usize, value: T) -> Result<()> {
    let bytes = value.to_le_bytes();
    let bytes = bytes.as_ref();
    let Some(end) = offset.checked_add(bytes.len()) else {
        return Err(out_of_bounds_error!());
    };
    if end > buffer.len() {
        return Err(out_of_bounds_error!());
    }

    buffer[offset..end].copy_from_slice(bytes);
    Ok(())
}

/// Largest value representable in the compressed unsigned integer encoding.
pub const COMPRESSED_UINT_MAX: u32 = 0x1FFF_FFFF;

/// Appends `value` using the ECMA-335 compressed unsigned integer encoding.
///
/// | Range                  | Encoding |
/// |------------------------|----------|
/// | `0x00..=0x7F`          | 1 byte   |
/// | `0x80..=0x3FFF`        | 2 bytes  |
/// | `0x4000..=0x1FFF_FFFF` | 4 bytes  |
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] for values above [`COMPRESSED_UINT_MAX`].
pub fn write_compressed_uint(value: u32, buffer: &mut Vec<u8>) -> Result<()> {
    if value <= 0x7F {
        buffer.push(value as u8);
    } else if value <= 0x3FFF {
        buffer.push(((value >> 8) as u8) | 0x80);
        buffer.push(value as u8);
    } else if value <= COMPRESSED_UINT_MAX {
        buffer.push(((value >> 24) as u8) | 0xC0);
        buffer.push((value >> 16) as u8);
        buffer.push((value >> 8) as u8);
        buffer.push(value as u8);
    } else {
        return Err(malformed_error!(
            "Value 0x{:08X} exceeds the compressed integer range",
            value
        ));
    }

    Ok(())
}

/// Returns the number of bytes [`write_compressed_uint`] emits for `value`.
#[must_use]
pub fn compressed_uint_size(value: u32) -> usize {
    if value <= 0x7F {
        1
    } else if value <= 0x3FFF {
        2
    } else {
        4
    }
}

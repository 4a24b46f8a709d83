//! Deterministic fixed-width binary encoding for the on-disk table format.
//!
//! This module provides the [`Encode`] and [`Decode`] traits used by the
//! table header and the key/offset arrays. Every table region has a size
//! that is known up front, so nothing here writes length prefixes: arrays
//! are written back to back and the reader is told how many elements to
//! expect.
//!
//! # Wire format
//!
//! | Rust type   | Encoding                                     |
//! |-------------|----------------------------------------------|
//! | `u8`        | 1 byte                                       |
//! | `u32`       | 4 bytes, little-endian                       |
//! | `u64`       | 8 bytes, little-endian                       |
//! | `[u8; N]`   | `N` raw bytes (fixed-size, no length prefix) |
//! | `[T]`       | `T₁ T₂ …` (no count prefix)                  |
//!
//! # Zero-panic guarantee
//!
//! No function in this module uses `unwrap()`, `expect()`, or any other
//! panicking path. All errors are propagated via [`EncodingError`].
//!
//! # Convenience helpers
//!
//! ```rust,ignore
//! use crate::encoding::{encode_to_vec, decode_from_slice};
//!
//! let bytes = encode_to_vec(&header)?;
//! let (decoded, consumed) = decode_from_slice::<TableHeader>(&bytes)?;
//! ```

#[cfg(test)]
mod tests;

use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors produced during encoding or decoding.
#[derive(Debug, Error)]
pub enum EncodingError {
    /// The buffer ran out of bytes before decoding completed.
    #[error("unexpected end of buffer (need {needed} bytes, have {available})")]
    UnexpectedEof {
        /// Bytes required to continue decoding.
        needed: usize,
        /// Bytes actually remaining.
        available: usize,
    },

    /// A length or count does not fit the target integer width.
    #[error("length overflow: {0}")]
    LengthOverflow(String),
}

// ------------------------------------------------------------------------------------------------
// Core traits
// ------------------------------------------------------------------------------------------------

/// Serialize `self` into a byte buffer.
///
/// Implementations **must** produce deterministic output: the same
/// logical value always yields the exact same byte sequence.
pub trait Encode {
    /// Append the encoded representation of `self` to `buf`.
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError>;
}

/// Deserialize a value from a byte slice.
///
/// Returns `(value, bytes_consumed)` on success so that callers can
/// advance a cursor through a buffer containing multiple encoded items.
pub trait Decode: Sized {
    /// Decode one value starting at `buf[0]`.
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError>;
}

// ------------------------------------------------------------------------------------------------
// Convenience functions
// ------------------------------------------------------------------------------------------------

/// Encode a value into a freshly-allocated `Vec<u8>`.
pub fn encode_to_vec<T: Encode>(value: &T) -> Result<Vec<u8>, EncodingError> {
    let mut buf = Vec::new();
    value.encode_to(&mut buf)?;
    Ok(buf)
}

/// Decode a value from the beginning of `buf`.
///
/// Returns `(value, bytes_consumed)`.
pub fn decode_from_slice<T: Decode>(buf: &[u8]) -> Result<(T, usize), EncodingError> {
    T::decode_from(buf)
}

/// Encode every element of `items` back to back, without a count prefix.
pub fn encode_slice<T: Encode>(items: &[T], buf: &mut Vec<u8>) -> Result<(), EncodingError> {
    for item in items {
        item.encode_to(buf)?;
    }
    Ok(())
}

/// Decode exactly `count` consecutive elements from the beginning of `buf`.
///
/// The caller knows `count` from a previously decoded header; the buffer
/// is checked up front against `count * size_of::<T>()` so a corrupted
/// count cannot trigger a huge allocation.
///
/// Returns `(elements, bytes_consumed)`.
pub fn decode_array<T: Decode>(buf: &[u8], count: usize) -> Result<(Vec<T>, usize), EncodingError> {
    let needed = count.checked_mul(size_of::<T>()).ok_or_else(|| {
        EncodingError::LengthOverflow(format!("array of {count} elements overflows usize"))
    })?;
    require(buf, needed)?;

    let mut items = Vec::with_capacity(count);
    let mut off = 0;
    for _ in 0..count {
        let (item, n) = T::decode_from(&buf[off..])?;
        off += n;
        items.push(item);
    }
    Ok((items, off))
}

// ------------------------------------------------------------------------------------------------
// Internal helpers
// ------------------------------------------------------------------------------------------------

/// Verify that `buf` has at least `needed` bytes, returning
/// [`EncodingError::UnexpectedEof`] if not.
#[inline]
fn require(buf: &[u8], needed: usize) -> Result<(), EncodingError> {
    if buf.len() < needed {
        Err(EncodingError::UnexpectedEof {
            needed,
            available: buf.len(),
        })
    } else {
        Ok(())
    }
}

/// Copy the first `N` bytes of `buf` into an array.
#[inline]
fn take_array<const N: usize>(buf: &[u8]) -> Result<[u8; N], EncodingError> {
    require(buf, N)?;
    let mut out = [0u8; N];
    out.copy_from_slice(&buf[..N]);
    Ok(out)
}

// ------------------------------------------------------------------------------------------------
// Primitive implementations
// ------------------------------------------------------------------------------------------------

impl Encode for u8 {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        buf.push(*self);
        Ok(())
    }
}

impl Decode for u8 {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        require(buf, 1)?;
        Ok((buf[0], 1))
    }
}

impl Encode for u32 {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        buf.extend_from_slice(&self.to_le_bytes());
        Ok(())
    }
}

impl Decode for u32 {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        Ok((u32::from_le_bytes(take_array::<4>(buf)?), 4))
    }
}

impl Encode for u64 {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        buf.extend_from_slice(&self.to_le_bytes());
        Ok(())
    }
}

impl Decode for u64 {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        Ok((u64::from_le_bytes(take_array::<8>(buf)?), 8))
    }
}

// ------------------------------------------------------------------------------------------------
// Fixed-size byte arrays
// ------------------------------------------------------------------------------------------------

impl<const N: usize> Encode for [u8; N] {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        buf.extend_from_slice(self);
        Ok(())
    }
}

impl<const N: usize> Decode for [u8; N] {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        Ok((take_array::<N>(buf)?, N))
    }
}

/// Convert a `usize` length to `u32`, returning [`EncodingError::LengthOverflow`]
/// if the value exceeds `u32::MAX`.
#[inline]
pub fn len_to_u32(len: usize) -> Result<u32, EncodingError> {
    u32::try_from(len)
        .map_err(|_| EncodingError::LengthOverflow(format!("length {len} exceeds u32::MAX")))
}

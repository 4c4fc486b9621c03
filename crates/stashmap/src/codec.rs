//! Binary encode/decode for the persisted image.
//!
//! All multi-byte integers are little-endian. A store file opens with an
//! 8-byte header: `[magic: 4 bytes][format version: u32 LE]`. Values are
//! written by width class:
//! - fixed-width scalars at their native width;
//! - text and byte strings as an `i32` LE length prefix plus raw bytes;
//! - anything else as a length-prefixed, self-describing JSON blob via the
//!   [`Json`] wrapper.
//!
//! Every length prefix is validated against `0..=2^30` before any buffer
//! is allocated, so a corrupt or truncated file fails cleanly instead of
//! over-allocating.

use std::mem;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::FormatError;
use crate::size::ByteSize;

/// Magic bytes at the start of every store file.
pub const STORE_MAGIC: &[u8; 4] = b"SMAP";

/// Current format version. Bump on any incompatible layout change.
pub const FORMAT_VERSION: u32 = 1;

/// Header size: magic (4) + version (4).
pub const HEADER_SIZE: usize = 8;

/// Upper bound accepted for any length prefix (1 GiB).
pub const MAX_PAYLOAD_LEN: i64 = 1 << 30;

/// Capability to write a value into the store byte format and read it back.
///
/// Implementations must be symmetric: `decode` applied to the bytes
/// produced by `encode` yields an equal value and consumes exactly the
/// bytes `encode` wrote.
pub trait Codec: Sized {
    fn encode(&self, out: &mut Vec<u8>) -> Result<(), FormatError>;
    fn decode(buf: &mut &[u8]) -> Result<Self, FormatError>;
}

// ── Cursor helpers ───────────────────────────────────────────────────────

fn ensure(buf: &[u8], need: usize) -> Result<(), FormatError> {
    if buf.len() < need {
        return Err(FormatError::Truncated {
            expected: need,
            actual: buf.len(),
        });
    }
    Ok(())
}

pub(crate) fn read_array<const N: usize>(buf: &mut &[u8]) -> Result<[u8; N], FormatError> {
    ensure(buf, N)?;
    let mut arr = [0u8; N];
    arr.copy_from_slice(&buf[..N]);
    *buf = &buf[N..];
    Ok(arr)
}

pub(crate) fn read_bytes(buf: &mut &[u8], n: usize) -> Result<Vec<u8>, FormatError> {
    ensure(buf, n)?;
    let v = buf[..n].to_vec();
    *buf = &buf[n..];
    Ok(v)
}

fn read_len_prefix(buf: &mut &[u8]) -> Result<usize, FormatError> {
    let n = i32::decode(buf)?;
    if n < 0 || i64::from(n) > MAX_PAYLOAD_LEN {
        return Err(FormatError::LengthOutOfRange(i64::from(n)));
    }
    Ok(n as usize)
}

fn write_len_prefixed(out: &mut Vec<u8>, bytes: &[u8]) -> Result<(), FormatError> {
    if bytes.len() as i64 > MAX_PAYLOAD_LEN {
        return Err(FormatError::LengthOutOfRange(bytes.len() as i64));
    }
    (bytes.len() as i32).encode(out)?;
    out.extend_from_slice(bytes);
    Ok(())
}

// ── File header ──────────────────────────────────────────────────────────

pub fn write_header(out: &mut Vec<u8>) {
    out.extend_from_slice(STORE_MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
}

pub fn read_header(buf: &mut &[u8]) -> Result<(), FormatError> {
    let magic = read_array::<4>(buf)?;
    if &magic != STORE_MAGIC {
        return Err(FormatError::BadMagic);
    }
    let version = u32::decode(buf)?;
    if version != FORMAT_VERSION {
        return Err(FormatError::UnsupportedVersion(version));
    }
    Ok(())
}

// ── Fixed-width scalars ──────────────────────────────────────────────────

macro_rules! impl_codec_fixed {
    ($($t:ty),* $(,)?) => {$(
        impl Codec for $t {
            fn encode(&self, out: &mut Vec<u8>) -> Result<(), FormatError> {
                out.extend_from_slice(&self.to_le_bytes());
                Ok(())
            }

            fn decode(buf: &mut &[u8]) -> Result<Self, FormatError> {
                let arr = read_array::<{ mem::size_of::<$t>() }>(buf)?;
                Ok(<$t>::from_le_bytes(arr))
            }
        }
    )*};
}

impl_codec_fixed!(u8, u16, u32, u64, i8, i16, i32, i64, f32, f64);

impl Codec for bool {
    fn encode(&self, out: &mut Vec<u8>) -> Result<(), FormatError> {
        out.push(u8::from(*self));
        Ok(())
    }

    fn decode(buf: &mut &[u8]) -> Result<Self, FormatError> {
        Ok(u8::decode(buf)? != 0)
    }
}

// ── Length-prefixed payloads ─────────────────────────────────────────────

impl Codec for String {
    fn encode(&self, out: &mut Vec<u8>) -> Result<(), FormatError> {
        write_len_prefixed(out, self.as_bytes())
    }

    fn decode(buf: &mut &[u8]) -> Result<Self, FormatError> {
        let len = read_len_prefix(buf)?;
        let bytes = read_bytes(buf, len)?;
        String::from_utf8(bytes)
            .map_err(|e| FormatError::Value(format!("invalid utf-8 in text payload: {}", e)))
    }
}

impl Codec for Vec<u8> {
    fn encode(&self, out: &mut Vec<u8>) -> Result<(), FormatError> {
        write_len_prefixed(out, self)
    }

    fn decode(buf: &mut &[u8]) -> Result<Self, FormatError> {
        let len = read_len_prefix(buf)?;
        read_bytes(buf, len)
    }
}

// ── Generic structured values ────────────────────────────────────────────

/// Adapter encoding any serde value as a length-prefixed JSON blob.
///
/// This is the escape hatch for value types without a fixed-width or
/// length-prefixed form of their own: the blob is self-describing, so it
/// round-trips through the file format without out-of-band type
/// information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Json<T>(pub T);

impl<T: Serialize + DeserializeOwned> Codec for Json<T> {
    fn encode(&self, out: &mut Vec<u8>) -> Result<(), FormatError> {
        let blob = serde_json::to_vec(&self.0).map_err(|e| FormatError::Value(e.to_string()))?;
        write_len_prefixed(out, &blob)
    }

    fn decode(buf: &mut &[u8]) -> Result<Self, FormatError> {
        let len = read_len_prefix(buf)?;
        let bytes = read_bytes(buf, len)?;
        serde_json::from_slice(&bytes)
            .map(Json)
            .map_err(|e| FormatError::Value(e.to_string()))
    }
}

impl<T: Serialize> ByteSize for Json<T> {
    fn approx_bytes(&self) -> i64 {
        crate::size::json_byte_len(&self.0).unwrap_or(mem::size_of::<T>() as i64)
    }
}

//! Per-value size estimation backing the byte-budget eviction policy.
//!
//! The strategy, applied uniformly:
//! - text and byte sequences report their exact byte length;
//! - fixed-width scalars report their native width;
//! - [`Json`](crate::codec::Json)-wrapped values report the length of their
//!   serialized JSON text.
//!
//! Estimates are only computed when a map is bounded (`limit > 0`);
//! unbounded maps record a size of 0 per entry. Because the recorded size
//! gates the eviction trigger directly, a custom `ByteSize` impl should
//! stay consistent for equal values.

use std::io;
use std::mem;

use serde::Serialize;

/// Bytes per mebibyte, for the construction-time limit conversion.
pub(crate) const BYTES_PER_MIB: i64 = 1024 * 1024;

/// Capability reporting a value's approximate in-memory footprint in bytes.
pub trait ByteSize {
    fn approx_bytes(&self) -> i64;
}

macro_rules! impl_byte_size_fixed {
    ($($t:ty),* $(,)?) => {$(
        impl ByteSize for $t {
            fn approx_bytes(&self) -> i64 {
                mem::size_of::<$t>() as i64
            }
        }
    )*};
}

impl_byte_size_fixed!(u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, f32, f64, bool, char);

impl ByteSize for String {
    fn approx_bytes(&self) -> i64 {
        self.len() as i64
    }
}

impl ByteSize for str {
    fn approx_bytes(&self) -> i64 {
        self.len() as i64
    }
}

impl ByteSize for Vec<u8> {
    fn approx_bytes(&self) -> i64 {
        self.len() as i64
    }
}

impl ByteSize for [u8] {
    fn approx_bytes(&self) -> i64 {
        self.len() as i64
    }
}

impl<T: ByteSize + ?Sized> ByteSize for &T {
    fn approx_bytes(&self) -> i64 {
        (**self).approx_bytes()
    }
}

impl<T: ByteSize> ByteSize for Option<T> {
    fn approx_bytes(&self) -> i64 {
        match self {
            Some(v) => v.approx_bytes(),
            None => 0,
        }
    }
}

/// Sink that counts bytes without storing them.
struct ByteCounter(usize);

impl io::Write for ByteCounter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0 += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Length of `value`'s JSON serialization, without materializing it.
pub(crate) fn json_byte_len<T: Serialize>(value: &T) -> Option<i64> {
    let mut counter = ByteCounter(0);
    serde_json::to_writer(&mut counter, value).ok()?;
    Some(counter.0 as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_sizes() {
        assert_eq!(7u32.approx_bytes(), 4);
        assert_eq!(7i64.approx_bytes(), 8);
        assert_eq!(1.5f64.approx_bytes(), 8);
        assert_eq!(true.approx_bytes(), 1);
    }

    #[test]
    fn test_text_and_bytes_exact_length() {
        assert_eq!("hello".approx_bytes(), 5);
        assert_eq!(String::from("hello").approx_bytes(), 5);
        assert_eq!(vec![0u8; 42].approx_bytes(), 42);
        assert_eq!(String::new().approx_bytes(), 0);
    }

    #[test]
    fn test_option_delegates() {
        assert_eq!(Some(String::from("abcd")).approx_bytes(), 4);
        assert_eq!(None::<String>.approx_bytes(), 0);
    }

    #[test]
    fn test_json_byte_len_matches_serialization() {
        let value = vec![1u32, 2, 3];
        let expected = serde_json::to_vec(&value).unwrap().len() as i64;
        assert_eq!(json_byte_len(&value), Some(expected));
    }
}

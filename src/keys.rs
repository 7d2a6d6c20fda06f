//! Search-key types and their byte-level codec.
//!
//! Every index is built over one [`KeyType`], which fixes the key's
//! width in bytes, its serialization into a page, and a total order.
//! The descriptor itself is persisted in the index header page so an
//! index can be reopened without external schema information.

use crate::error::{IndexError, Result};
use std::cmp::Ordering;
use std::fmt;

/// Width of a serialized key-type descriptor in bytes (tag + width)
pub const KEY_TYPE_DESC_LEN: usize = 3;

const TAG_INT32: u8 = 1;
const TAG_INT64: u8 = 2;
const TAG_BYTES: u8 = 3;

/// Describes the type of the keys stored in one index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    /// Signed 32-bit integer, 4 bytes on disk
    Int32,
    /// Signed 64-bit integer, 8 bytes on disk
    Int64,
    /// Fixed-width byte string, compared lexicographically
    Bytes(u16),
}

/// An owned key value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Key {
    Int32(i32),
    Int64(i64),
    Bytes(Vec<u8>),
}

impl KeyType {
    /// Width of a serialized key of this type in bytes
    pub fn key_len(&self) -> usize {
        match self {
            KeyType::Int32 => 4,
            KeyType::Int64 => 8,
            KeyType::Bytes(n) => *n as usize,
        }
    }

    /// Check that `key` is a value of this type (kind and width)
    pub fn check_key(&self, key: &Key) -> Result<()> {
        match (self, key) {
            (KeyType::Int32, Key::Int32(_)) => Ok(()),
            (KeyType::Int64, Key::Int64(_)) => Ok(()),
            (KeyType::Bytes(n), Key::Bytes(b)) if b.len() == *n as usize => Ok(()),
            (KeyType::Bytes(n), Key::Bytes(b)) => Err(IndexError::invalid_argument(format!(
                "byte key has {} bytes, index expects {}",
                b.len(),
                n
            ))),
            _ => Err(IndexError::invalid_argument(format!(
                "key {:?} does not match index key type {:?}",
                key, self
            ))),
        }
    }

    /// Decode a key of this type from `buf` at `off`
    pub fn read(&self, buf: &[u8], off: usize) -> Key {
        match self {
            KeyType::Int32 => Key::Int32(i32::from_be_bytes([
                buf[off],
                buf[off + 1],
                buf[off + 2],
                buf[off + 3],
            ])),
            KeyType::Int64 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&buf[off..off + 8]);
                Key::Int64(i64::from_be_bytes(raw))
            }
            KeyType::Bytes(n) => Key::Bytes(buf[off..off + *n as usize].to_vec()),
        }
    }

    /// Encode `key` into `buf` at `off`.
    ///
    /// Callers guarantee the key matches this type (see [`check_key`]).
    ///
    /// [`check_key`]: KeyType::check_key
    pub fn write(&self, buf: &mut [u8], off: usize, key: &Key) {
        match key {
            Key::Int32(v) => buf[off..off + 4].copy_from_slice(&v.to_be_bytes()),
            Key::Int64(v) => buf[off..off + 8].copy_from_slice(&v.to_be_bytes()),
            Key::Bytes(b) => buf[off..off + b.len()].copy_from_slice(b),
        }
    }

    /// Compare two keys of this type
    pub fn compare(&self, a: &Key, b: &Key) -> Ordering {
        a.cmp(b)
    }

    /// Serialize this descriptor into `buf` at `off`
    pub fn write_descriptor(&self, buf: &mut [u8], off: usize) {
        let (tag, width) = match self {
            KeyType::Int32 => (TAG_INT32, 4u16),
            KeyType::Int64 => (TAG_INT64, 8u16),
            KeyType::Bytes(n) => (TAG_BYTES, *n),
        };
        buf[off] = tag;
        buf[off + 1..off + 3].copy_from_slice(&width.to_be_bytes());
    }

    /// Deserialize a descriptor from `buf` at `off`
    pub fn read_descriptor(buf: &[u8], off: usize) -> Result<Self> {
        let tag = buf[off];
        let width = u16::from_be_bytes([buf[off + 1], buf[off + 2]]);
        match (tag, width) {
            (TAG_INT32, 4) => Ok(KeyType::Int32),
            (TAG_INT64, 8) => Ok(KeyType::Int64),
            (TAG_BYTES, n) if n > 0 => Ok(KeyType::Bytes(n)),
            _ => Err(IndexError::corruption(format!(
                "invalid key type descriptor: tag {} width {}",
                tag, width
            ))),
        }
    }
}

impl Key {
    fn tag(&self) -> u8 {
        match self {
            Key::Int32(_) => TAG_INT32,
            Key::Int64(_) => TAG_INT64,
            Key::Bytes(_) => TAG_BYTES,
        }
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Key::Int32(a), Key::Int32(b)) => a.cmp(b),
            (Key::Int64(a), Key::Int64(b)) => a.cmp(b),
            (Key::Bytes(a), Key::Bytes(b)) => a.cmp(b),
            // Keys of different types never share an index; order by tag
            // so that Ord stays total.
            _ => self.tag().cmp(&other.tag()),
        }
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Int32(v) => write!(f, "{}", v),
            Key::Int64(v) => write!(f, "{}", v),
            Key::Bytes(b) => match std::str::from_utf8(b) {
                Ok(s) => write!(f, "{}", s.trim_end_matches('\0')),
                Err(_) => write!(f, "{:02x?}", b),
            },
        }
    }
}

impl From<i32> for Key {
    fn from(v: i32) -> Self {
        Key::Int32(v)
    }
}

impl From<i64> for Key {
    fn from(v: i64) -> Self {
        Key::Int64(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_roundtrip() {
        let kt = KeyType::Int32;
        let mut buf = [0u8; 16];
        kt.write(&mut buf, 4, &Key::Int32(-7));
        assert_eq!(kt.read(&buf, 4), Key::Int32(-7));

        let kt = KeyType::Bytes(5);
        kt.write(&mut buf, 0, &Key::Bytes(b"hello".to_vec()));
        assert_eq!(kt.read(&buf, 0), Key::Bytes(b"hello".to_vec()));
    }

    #[test]
    fn test_integer_order_is_numeric() {
        let kt = KeyType::Int32;
        assert_eq!(
            kt.compare(&Key::Int32(-1), &Key::Int32(1)),
            Ordering::Less
        );
        assert_eq!(
            kt.compare(&Key::Int32(i32::MIN), &Key::Int32(i32::MAX)),
            Ordering::Less
        );
    }

    #[test]
    fn test_descriptor_roundtrip() {
        let mut buf = [0u8; KEY_TYPE_DESC_LEN];
        for kt in [KeyType::Int32, KeyType::Int64, KeyType::Bytes(16)] {
            kt.write_descriptor(&mut buf, 0);
            assert_eq!(KeyType::read_descriptor(&buf, 0).unwrap(), kt);
        }
    }

    #[test]
    fn test_descriptor_rejects_garbage() {
        let buf = [0xFFu8, 0, 4];
        assert!(KeyType::read_descriptor(&buf, 0).is_err());
    }

    #[test]
    fn test_check_key() {
        assert!(KeyType::Int32.check_key(&Key::Int32(1)).is_ok());
        assert!(KeyType::Int32.check_key(&Key::Int64(1)).is_err());
        assert!(KeyType::Bytes(4).check_key(&Key::Bytes(b"ab".to_vec())).is_err());
        assert!(KeyType::Bytes(2).check_key(&Key::Bytes(b"ab".to_vec())).is_ok());
    }
}

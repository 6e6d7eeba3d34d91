// SPDX-License-Identifier: Apache-2.0

//! Marshaling of typed values into flat buffers
//!
//! A [`Writer`] collects an ordered sequence of values and serializes them
//! into one contiguous buffer. A [`Reader`] parses such a buffer and hands
//! the values back in the order they were written.

use alloc::string::String;
use alloc::vec::Vec;
use core::mem::size_of;

/// Size of the length prefix of every extent.
pub const PREFIX: usize = size_of::<u64>();

/// Marshaling error
#[derive(Copy, Clone, Debug, PartialEq, Eq, displaydoc::Display)]
pub enum Error {
    /// message exhausted: no value left to read
    Exhausted,

    /// value width mismatch: expected {expected} bytes, found {found}
    WidthMismatch {
        /// Width of the requested type
        expected: usize,
        /// Width of the stored value
        found: usize,
    },

    /// message truncated at offset {0}
    Truncated(usize),

    /// output buffer too small: {needed} bytes needed, {available} available
    BufferTooSmall {
        /// Bytes required by the message
        needed: usize,
        /// Bytes provided by the caller
        available: usize,
    },

    /// invalid boolean encoding {0}
    InvalidBool(u8),

    /// string is not valid UTF-8
    InvalidUtf8,

    /// invalid enumeration tag {0}
    InvalidTag(u64),
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

mod sealed {
    pub trait Sealed {}
}

/// A fixed-width value that can be stored in a message
pub trait Scalar: Copy + sealed::Sealed {
    /// Width of the encoded value in bytes
    const WIDTH: usize;

    /// Appends the native-endian encoding of `self` to `out`.
    fn encode(self, out: &mut Vec<u8>);

    /// Decodes a value from exactly [`Self::WIDTH`] bytes.
    fn decode(bytes: &[u8]) -> Result<Self, Error>;
}

macro_rules! scalar {
    ($($t:ty)*) => {
        $(
            impl sealed::Sealed for $t {}

            impl Scalar for $t {
                const WIDTH: usize = size_of::<$t>();

                #[inline]
                fn encode(self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_ne_bytes());
                }

                #[inline]
                fn decode(bytes: &[u8]) -> Result<Self, Error> {
                    let bytes = bytes.try_into().map_err(|_| Error::WidthMismatch {
                        expected: Self::WIDTH,
                        found: bytes.len(),
                    })?;
                    Ok(<$t>::from_ne_bytes(bytes))
                }
            }
        )*
    };
}

scalar! { u8 u16 u32 u64 usize i8 i16 i32 i64 isize f32 f64 }

impl sealed::Sealed for bool {}

impl Scalar for bool {
    const WIDTH: usize = 1;

    #[inline]
    fn encode(self, out: &mut Vec<u8>) {
        out.push(self as u8);
    }

    #[inline]
    fn decode(bytes: &[u8]) -> Result<Self, Error> {
        match u8::decode(bytes)? {
            0 => Ok(false),
            1 => Ok(true),
            n => Err(Error::InvalidBool(n)),
        }
    }
}

/// Builds a message
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Writer {
    extents: Vec<Vec<u8>>,
}

impl Writer {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a scalar value.
    pub fn push<T: Scalar>(&mut self, value: T) {
        let mut extent = Vec::with_capacity(T::WIDTH);
        value.encode(&mut extent);
        self.extents.push(extent);
    }

    /// Appends a byte string. Empty byte strings are preserved.
    pub fn push_bytes(&mut self, bytes: impl AsRef<[u8]>) {
        self.extents.push(bytes.as_ref().to_vec());
    }

    /// Appends a UTF-8 string.
    pub fn push_str(&mut self, value: &str) {
        self.push_bytes(value.as_bytes());
    }

    /// Number of values written so far
    pub fn len(&self) -> usize {
        self.extents.len()
    }

    /// Whether no value has been written
    pub fn is_empty(&self) -> bool {
        self.extents.is_empty()
    }

    /// Size in bytes of the serialized message
    pub fn message_size(&self) -> usize {
        self.extents.iter().map(|e| PREFIX + e.len()).sum()
    }

    /// Serializes the message into `out`, returning the bytes written.
    pub fn serialize(&self, out: &mut [u8]) -> Result<usize, Error> {
        let needed = self.message_size();
        if out.len() < needed {
            return Err(Error::BufferTooSmall {
                needed,
                available: out.len(),
            });
        }

        let mut offset = 0;
        for extent in &self.extents {
            out[offset..][..PREFIX].copy_from_slice(&(extent.len() as u64).to_ne_bytes());
            offset += PREFIX;
            out[offset..][..extent.len()].copy_from_slice(extent);
            offset += extent.len();
        }

        Ok(offset)
    }

    /// Serializes the message into a new vector.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.message_size());
        for extent in &self.extents {
            out.extend_from_slice(&(extent.len() as u64).to_ne_bytes());
            out.extend_from_slice(extent);
        }
        out
    }
}

/// Consumes a message
///
/// The reader owns a copy of the parsed extents, so the buffer it was
/// deserialized from may be released right away.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Reader {
    extents: Vec<Vec<u8>>,
    next: usize,
}

impl Reader {
    /// Parses a serialized message.
    pub fn deserialize(mut bytes: &[u8]) -> Result<Self, Error> {
        let total = bytes.len();
        let mut extents = Vec::new();

        while !bytes.is_empty() {
            let offset = total - bytes.len();
            if bytes.len() < PREFIX {
                return Err(Error::Truncated(offset));
            }

            let (prefix, rest) = bytes.split_at(PREFIX);
            let len = u64::decode(prefix)?;
            let len = usize::try_from(len).map_err(|_| Error::Truncated(offset))?;
            if rest.len() < len {
                return Err(Error::Truncated(offset));
            }

            let (extent, rest) = rest.split_at(len);
            extents.push(extent.to_vec());
            bytes = rest;
        }

        Ok(Self { extents, next: 0 })
    }

    /// Total number of values in the message
    pub fn len(&self) -> usize {
        self.extents.len()
    }

    /// Whether the message holds no values at all
    pub fn is_empty(&self) -> bool {
        self.extents.is_empty()
    }

    /// Number of values not consumed yet
    pub fn remaining(&self) -> usize {
        self.extents.len() - self.next
    }

    /// Whether another value can be read
    pub fn has_next(&self) -> bool {
        self.remaining() > 0
    }

    fn extent(&mut self) -> Result<&[u8], Error> {
        let extent = self.extents.get(self.next).ok_or(Error::Exhausted)?;
        self.next += 1;
        Ok(extent)
    }

    /// Reads the next scalar value.
    ///
    /// The position only advances when the value decodes successfully.
    pub fn next<T: Scalar>(&mut self) -> Result<T, Error> {
        let extent = self.extents.get(self.next).ok_or(Error::Exhausted)?;
        let value = T::decode(extent)?;
        self.next += 1;
        Ok(value)
    }

    /// Reads the next byte string.
    pub fn next_bytes(&mut self) -> Result<Vec<u8>, Error> {
        self.extent().map(<[u8]>::to_vec)
    }

    /// Reads the next UTF-8 string.
    pub fn next_string(&mut self) -> Result<String, Error> {
        let extent = self.extents.get(self.next).ok_or(Error::Exhausted)?;
        let value = core::str::from_utf8(extent).map_err(|_| Error::InvalidUtf8)?;
        let value = String::from(value);
        self.next += 1;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty() {
        let writer = Writer::new();
        assert!(writer.is_empty());
        assert_eq!(writer.message_size(), 0);
        assert!(writer.to_vec().is_empty());

        let mut reader = Reader::deserialize(&[]).unwrap();
        assert!(reader.is_empty());
        assert_eq!(reader.next::<u32>(), Err(Error::Exhausted));
    }

    #[test]
    fn mixed_values() {
        let mut writer = Writer::new();
        writer.push(7u8);
        writer.push(-3i32);
        writer.push(u64::MAX);
        writer.push(true);
        writer.push(1.5f64);
        writer.push_bytes(b"");
        writer.push_str("wicket");
        writer.push_bytes([0u8, 1, 2, 3]);

        let bytes = writer.to_vec();
        assert_eq!(bytes.len(), writer.message_size());

        let mut reader = Reader::deserialize(&bytes).unwrap();
        assert_eq!(reader.len(), 8);
        assert_eq!(reader.next::<u8>(), Ok(7));
        assert_eq!(reader.next::<i32>(), Ok(-3));
        assert_eq!(reader.next::<u64>(), Ok(u64::MAX));
        assert_eq!(reader.next::<bool>(), Ok(true));
        assert_eq!(reader.next::<f64>(), Ok(1.5));
        assert_eq!(reader.next_bytes(), Ok(vec![]));
        assert_eq!(reader.next_string().as_deref(), Ok("wicket"));
        assert_eq!(reader.next_bytes(), Ok(vec![0, 1, 2, 3]));
        assert!(!reader.has_next());
        assert_eq!(reader.next_bytes(), Err(Error::Exhausted));
    }

    #[test]
    fn many_values() {
        let mut writer = Writer::new();
        for i in 0..48u64 {
            match i % 3 {
                0 => writer.push(i),
                1 => writer.push(i as u16),
                _ => writer.push_bytes(vec![i as u8; i as usize]),
            }
        }

        let mut reader = Reader::deserialize(&writer.to_vec()).unwrap();
        for i in 0..48u64 {
            match i % 3 {
                0 => assert_eq!(reader.next::<u64>(), Ok(i)),
                1 => assert_eq!(reader.next::<u16>(), Ok(i as u16)),
                _ => assert_eq!(reader.next_bytes(), Ok(vec![i as u8; i as usize])),
            }
        }
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn width_mismatch() {
        let mut writer = Writer::new();
        writer.push(1u32);

        let mut reader = Reader::deserialize(&writer.to_vec()).unwrap();
        assert_eq!(
            reader.next::<u64>(),
            Err(Error::WidthMismatch {
                expected: 8,
                found: 4
            })
        );

        // A failed read does not consume the value.
        assert_eq!(reader.next::<u32>(), Ok(1));
    }

    #[test]
    fn bad_bool() {
        let mut writer = Writer::new();
        writer.push(2u8);

        let mut reader = Reader::deserialize(&writer.to_vec()).unwrap();
        assert_eq!(reader.next::<bool>(), Err(Error::InvalidBool(2)));
    }

    #[test]
    fn bad_utf8() {
        let mut writer = Writer::new();
        writer.push_bytes([0xff, 0xfe]);

        let mut reader = Reader::deserialize(&writer.to_vec()).unwrap();
        assert_eq!(reader.next_string(), Err(Error::InvalidUtf8));
    }

    #[test]
    fn truncated() {
        let mut writer = Writer::new();
        writer.push(1u64);
        writer.push_str("abc");

        let bytes = writer.to_vec();
        assert_eq!(
            Reader::deserialize(&bytes[..bytes.len() - 1]),
            Err(Error::Truncated(16))
        );
        assert_eq!(Reader::deserialize(&bytes[..3]), Err(Error::Truncated(0)));
    }

    #[test]
    fn serialize_into() {
        let mut writer = Writer::new();
        writer.push(0xdeadu16);

        let mut small = [0u8; 9];
        assert_eq!(
            writer.serialize(&mut small),
            Err(Error::BufferTooSmall {
                needed: 10,
                available: 9
            })
        );

        let mut out = [0u8; 12];
        assert_eq!(writer.serialize(&mut out), Ok(10));
        assert_eq!(&out[..10], writer.to_vec().as_slice());
    }
}

//! # Statistically faithful probe request traffic, without a radio
//!
//! ## Rationale
//!
//! This crate synthesizes IEEE 802.11 probe request captures that
//! reproduce the aggregate statistical signatures of real mobile
//! devices: MAC randomization policies, phase-dependent burst timing,
//! and a stochastic channel deciding which frames a notional sniffer
//! would actually have heard. The output is a standard PCAP file
//! (DLT 127, radiotap) plus companion logs that downstream analysis
//! tools consume as if they came from monitor mode hardware.
//!
//! ## The project is broken down into the following modules:
//! * `consts` - Constants for the 802.11 frame layer and the
//!   simulation layer, wrapped into type safe enums.
//! * `err` - All of the wire-level and simulation-level errors
//!   encountered in the code.
//! * `types` - Byte buffer and MAC address primitives shared by the
//!   frame layer and the engine.
//! * `dist` - Discrete distributions loaded from configuration and
//!   the pure scaling operators applied to them.
//! * `oui` - The IEEE OUI registry mapping vendor names to address
//!   prefixes.
//! * `store` - The device parameter store holding hardware and
//!   behavior profiles.
//! * `device` - Per-device runtime state: MAC rotation, phases,
//!   mobility.
//! * `frame` - The radiotap/802.11/IE frame composer and parsers.
//! * `channel` - The physical channel filter.
//! * `pcap` - Capture file writing and read-back.
//! * `engine` - The discrete-event simulation engine and scenarios.
//! * `metrics` - The MCR/NUMR/MCIV metrics extractor.
//! * `tune` - The auto-tune loop wrapping the engine.
//!
//! ## Wire traits
//!
//! `lib.rs` at the top level contains the [`Size`], [`ToBytes`] and
//! [`FromBytes`] traits which provide buffer size calculation, a
//! serialization method, and a deserialization method for everything
//! that ends up on the wire. All multi-byte fields are little endian
//! as required by 802.11, radiotap, and the classic PCAP format.
//!
//! ## Design decisions
//!
//! The simulator clock is integer microseconds end to end. Event
//! ordering derives from a `(time, insertion sequence)` key alone, so
//! two runs with the same seed produce byte-identical captures.
//! Randomness is never ambient: every sampling operation borrows the
//! single seeded RNG stream owned by the caller.
//!
//! ## Examples
//!
//! Composing and serializing a minimal probe request body:
//!
//! ```
//! use std::io::Cursor;
//!
//! use probesim::{
//!     consts::frame::ElementId,
//!     frame::ie::InfoElement,
//!     types::Buffer,
//!     ToBytes,
//! };
//!
//! fn wildcard_ssid() -> Vec<u8> {
//!     let ie = InfoElement::new(ElementId::Ssid, Buffer::new());
//!     let mut buffer = Cursor::new(Vec::new());
//!     ie.to_bytes(&mut buffer).expect("an empty SSID always fits");
//!     buffer.into_inner()
//! }
//!
//! assert_eq!(wildcard_ssid(), vec![0, 0]);
//! ```

#![deny(missing_docs)]

#[macro_use]
mod macros;

pub mod channel;
pub mod consts;
pub mod device;
pub mod dist;
pub mod engine;
pub mod err;
pub mod frame;
pub mod metrics;
pub mod oui;
pub mod pcap;
pub mod store;
pub mod tune;
pub mod types;

use std::io::{Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::err::{DeError, SerError};

/// The size of the binary representation of an existing value.
pub trait Size {
    /// Size in bytes of the value when serialized.
    fn size(&self) -> usize;
}

/// The static size of the binary representation of a type.
pub trait TypeSize {
    /// Size in bytes of every value of the implementing type.
    fn type_size() -> usize;
}

/// Serialization method for all types that end up on the wire.
pub trait ToBytes {
    /// Serialize into the given buffer.
    fn to_bytes(&self, buffer: &mut Cursor<Vec<u8>>) -> Result<(), SerError>;
}

/// Deserialization method for all types that come off the wire.
pub trait FromBytes: Sized {
    /// Deserialize from the given buffer.
    fn from_bytes(buffer: &mut Cursor<&[u8]>) -> Result<Self, DeError>;
}

/// Deserialization method for types whose length cannot be determined
/// from the data alone and must be supplied by the containing layer.
pub trait FromBytesWithInput: Sized {
    /// The type of the additional input.
    type Input;

    /// Deserialize from the given buffer with the given additional
    /// input.
    fn from_bytes_with_input(
        buffer: &mut Cursor<&[u8]>,
        input: Self::Input,
    ) -> Result<Self, DeError>;
}

macro_rules! impl_wire_int {
    ($ty:ty, $read:ident, $write:ident) => {
        impl Size for $ty {
            fn size(&self) -> usize {
                std::mem::size_of::<$ty>()
            }
        }

        impl TypeSize for $ty {
            fn type_size() -> usize {
                std::mem::size_of::<$ty>()
            }
        }

        impl ToBytes for $ty {
            fn to_bytes(&self, buffer: &mut Cursor<Vec<u8>>) -> Result<(), SerError> {
                buffer.$write::<LittleEndian>(*self)?;
                Ok(())
            }
        }

        impl FromBytes for $ty {
            fn from_bytes(buffer: &mut Cursor<&[u8]>) -> Result<Self, DeError> {
                buffer
                    .$read::<LittleEndian>()
                    .map_err(|_| DeError::incomplete_type(stringify!($ty)))
            }
        }
    };
}

impl_wire_int!(u16, read_u16, write_u16);
impl_wire_int!(u32, read_u32, write_u32);
impl_wire_int!(u64, read_u64, write_u64);

impl Size for u8 {
    fn size(&self) -> usize {
        1
    }
}

impl TypeSize for u8 {
    fn type_size() -> usize {
        1
    }
}

impl ToBytes for u8 {
    fn to_bytes(&self, buffer: &mut Cursor<Vec<u8>>) -> Result<(), SerError> {
        buffer.write_u8(*self)?;
        Ok(())
    }
}

impl FromBytes for u8 {
    fn from_bytes(buffer: &mut Cursor<&[u8]>) -> Result<Self, DeError> {
        buffer
            .read_u8()
            .map_err(|_| DeError::incomplete_type(stringify!(u8)))
    }
}

impl Size for i8 {
    fn size(&self) -> usize {
        1
    }
}

impl TypeSize for i8 {
    fn type_size() -> usize {
        1
    }
}

impl ToBytes for i8 {
    fn to_bytes(&self, buffer: &mut Cursor<Vec<u8>>) -> Result<(), SerError> {
        buffer.write_i8(*self)?;
        Ok(())
    }
}

impl FromBytes for i8 {
    fn from_bytes(buffer: &mut Cursor<&[u8]>) -> Result<Self, DeError> {
        buffer
            .read_i8()
            .map_err(|_| DeError::incomplete_type(stringify!(i8)))
    }
}

impl<'a> Size for &'a [u8] {
    fn size(&self) -> usize {
        self.len()
    }
}

impl<'a> ToBytes for &'a [u8] {
    fn to_bytes(&self, buffer: &mut Cursor<Vec<u8>>) -> Result<(), SerError> {
        buffer.write_all(self)?;
        Ok(())
    }
}

impl Size for Vec<u8> {
    fn size(&self) -> usize {
        self.len()
    }
}

impl ToBytes for Vec<u8> {
    fn to_bytes(&self, buffer: &mut Cursor<Vec<u8>>) -> Result<(), SerError> {
        self.as_slice().to_bytes(buffer)
    }
}

impl FromBytesWithInput for Vec<u8> {
    type Input = usize;

    fn from_bytes_with_input(
        buffer: &mut Cursor<&[u8]>,
        input: Self::Input,
    ) -> Result<Self, DeError> {
        let mut vec = vec![0; input];
        buffer
            .read_exact(vec.as_mut_slice())
            .map_err(|_| DeError::incomplete_type(stringify!(Vec<u8>)))?;
        Ok(vec)
    }
}

/// Serialize a value into a freshly allocated byte vector.
pub fn serialize<T>(t: &T) -> Result<Vec<u8>, SerError>
where
    T: ToBytes,
{
    let mut buffer = Cursor::new(Vec::new());
    t.to_bytes(&mut buffer)?;
    Ok(buffer.into_inner())
}

/// Deserialize a value from the beginning of a byte slice.
pub fn deserialize<T>(bytes: &[u8]) -> Result<T, DeError>
where
    T: FromBytes,
{
    T::from_bytes(&mut Cursor::new(bytes))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_wire_u8() {
        let v = 5u8;
        let ser_buffer = serialize(&v).unwrap();
        assert_eq!(ser_buffer.as_slice(), &[5]);

        let de: u8 = deserialize(&[5]).unwrap();
        assert_eq!(de, 5)
    }

    #[test]
    fn test_wire_u16() {
        let v = 6000u16;
        let ser_buffer = serialize(&v).unwrap();
        assert_eq!(ser_buffer.as_slice(), &v.to_le_bytes());

        let de: u16 = deserialize(&v.to_le_bytes()).unwrap();
        assert_eq!(de, 6000);
    }

    #[test]
    fn test_wire_u32() {
        let v = 600_000u32;
        let ser_buffer = serialize(&v).unwrap();
        assert_eq!(ser_buffer.as_slice(), &v.to_le_bytes());

        let de: u32 = deserialize(&v.to_le_bytes()).unwrap();
        assert_eq!(de, 600_000)
    }

    #[test]
    fn test_wire_u64() {
        let v = 12_345_678_901_234u64;
        let ser_buffer = serialize(&v).unwrap();
        assert_eq!(ser_buffer.as_slice(), &v.to_le_bytes());

        let de: u64 = deserialize(&v.to_le_bytes()).unwrap();
        assert_eq!(de, 12_345_678_901_234);
    }

    #[test]
    fn test_wire_i8() {
        let v = -42i8;
        let ser_buffer = serialize(&v).unwrap();
        assert_eq!(ser_buffer.as_slice(), &[0xd6]);

        let de: i8 = deserialize(&[0xd6]).unwrap();
        assert_eq!(de, -42);
    }

    #[test]
    fn test_wire_vec() {
        let v = vec![1u8, 2, 3, 4, 5, 6, 7, 8, 9];
        let ser_buffer = serialize(&v).unwrap();
        assert_eq!(v.as_slice(), ser_buffer.as_slice());

        let de = Vec::<u8>::from_bytes_with_input(&mut Cursor::new(&[1u8, 2, 3][..]), 3).unwrap();
        assert_eq!(de, vec![1, 2, 3]);
    }

    #[test]
    fn test_wire_truncated() {
        assert!(deserialize::<u32>(&[1, 2]).is_err());
        assert!(Vec::<u8>::from_bytes_with_input(&mut Cursor::new(&[1u8][..]), 2).is_err());
    }
}

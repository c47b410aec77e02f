//! Module containing various types used across the frame layers and
//! the simulation engine.
//!
//! # Design decisions
//! These structures are new types rather than type aliases in most
//! cases to allow the internal representation to change without
//! resulting in a breaking change as well as to keep bit-level
//! operations on MAC addresses in one place.

use std::{
    fmt::{self, Display},
    io::Cursor,
    str::FromStr,
};

use crate::{
    err::{DeError, MsgError, SerError},
    FromBytes, FromBytesWithInput, Size, ToBytes, TypeSize,
};

/// A buffer of bytes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Buffer(Vec<u8>);

impl AsRef<[u8]> for Buffer {
    fn as_ref(&self) -> &[u8] {
        self.0.as_slice()
    }
}

impl AsMut<[u8]> for Buffer {
    fn as_mut(&mut self) -> &mut [u8] {
        self.0.as_mut_slice()
    }
}

impl From<Vec<u8>> for Buffer {
    fn from(vec: Vec<u8>) -> Self {
        Buffer(vec)
    }
}

impl<'a> From<&'a [u8]> for Buffer {
    fn from(slice: &'a [u8]) -> Self {
        Buffer(Vec::from(slice))
    }
}

impl Buffer {
    /// Create a new empty buffer.
    pub fn new() -> Self {
        Buffer(Vec::new())
    }

    /// Extend the buffer with the contents of the given slice.
    pub fn extend_from_slice(&mut self, slice: &[u8]) {
        self.0.extend_from_slice(slice)
    }

    /// Length of the buffer in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consume the buffer and return the underlying byte vector.
    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }
}

impl Size for Buffer {
    fn size(&self) -> usize {
        self.0.len()
    }
}

impl ToBytes for Buffer {
    fn to_bytes(&self, buffer: &mut Cursor<Vec<u8>>) -> Result<(), SerError> {
        self.0.as_slice().to_bytes(buffer)
    }
}

impl FromBytesWithInput for Buffer {
    type Input = usize;

    fn from_bytes_with_input(
        buffer: &mut Cursor<&[u8]>,
        input: Self::Input,
    ) -> Result<Self, DeError> {
        Ok(Buffer(Vec::<u8>::from_bytes_with_input(buffer, input)?))
    }
}

/// A 48-bit IEEE 802 MAC address.
///
/// Bit 0 of the first octet is the multicast bit and bit 1 is the
/// locally administered bit; both matter to the randomization
/// policies, so the accessors live here rather than in the device
/// model.
#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct MacAddr([u8; 6]);

/// The broadcast address used for addr1 and addr3 of every probe
/// request.
pub const BROADCAST: MacAddr = MacAddr([0xff; 6]);

impl MacAddr {
    /// Create an address from its six octets.
    pub fn new(octets: [u8; 6]) -> Self {
        MacAddr(octets)
    }

    /// The six octets of the address.
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// The first three octets of the address.
    pub fn oui(&self) -> [u8; 3] {
        [self.0[0], self.0[1], self.0[2]]
    }

    /// Whether the multicast bit (bit 0 of the first octet) is set.
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    /// Whether the locally administered bit (bit 1 of the first
    /// octet) is set.
    pub fn is_locally_administered(&self) -> bool {
        self.0[0] & 0x02 != 0
    }

    /// Return a copy with the two low bits of the first octet forced
    /// to locally administered unicast (`10` in binary).
    pub fn as_local_unicast(&self) -> Self {
        let mut octets = self.0;
        octets[0] = (octets[0] & !0x01) | 0x02;
        MacAddr(octets)
    }

    /// Return a copy with the given OUI in place of the first three
    /// octets. The OUI's own universal/local bit is preserved
    /// verbatim, matching hardware that keeps the vendor prefix while
    /// randomizing the tail.
    pub fn with_oui(&self, oui: [u8; 3]) -> Self {
        MacAddr([oui[0], oui[1], oui[2], self.0[3], self.0[4], self.0[5]])
    }
}

impl Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl FromStr for MacAddr {
    type Err = MsgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut count = 0;
        for (i, part) in s.split(':').enumerate() {
            if i >= 6 {
                return Err(MsgError::new(format!("{s} has more than six octets")));
            }
            octets[i] = u8::from_str_radix(part, 16)
                .map_err(|_| MsgError::new(format!("{part} is not a hex octet")))?;
            count += 1;
        }
        if count != 6 {
            return Err(MsgError::new(format!("{s} has fewer than six octets")));
        }
        Ok(MacAddr(octets))
    }
}

impl Size for MacAddr {
    fn size(&self) -> usize {
        6
    }
}

impl TypeSize for MacAddr {
    fn type_size() -> usize {
        6
    }
}

impl ToBytes for MacAddr {
    fn to_bytes(&self, buffer: &mut Cursor<Vec<u8>>) -> Result<(), SerError> {
        self.0.as_slice().to_bytes(buffer)
    }
}

impl FromBytes for MacAddr {
    fn from_bytes(buffer: &mut Cursor<&[u8]>) -> Result<Self, DeError> {
        let bytes = Vec::<u8>::from_bytes_with_input(buffer, 6)?;
        let mut octets = [0u8; 6];
        octets.copy_from_slice(&bytes);
        Ok(MacAddr(octets))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::{deserialize, serialize};

    #[test]
    fn test_mac_display_round_trip() {
        let mac = MacAddr::new([0xde, 0xad, 0xbe, 0xef, 0x00, 0x42]);
        let s = mac.to_string();
        assert_eq!(s, "de:ad:be:ef:00:42");
        assert_eq!(MacAddr::from_str(&s).unwrap(), mac);
    }

    #[test]
    fn test_mac_from_str_rejects_garbage() {
        assert!(MacAddr::from_str("de:ad:be:ef:00").is_err());
        assert!(MacAddr::from_str("de:ad:be:ef:00:42:17").is_err());
        assert!(MacAddr::from_str("zz:ad:be:ef:00:42").is_err());
    }

    #[test]
    fn test_mac_bits() {
        let mac = MacAddr::new([0xff, 0, 0, 0, 0, 0]);
        let local = mac.as_local_unicast();
        assert!(local.is_locally_administered());
        assert!(!local.is_multicast());
        assert_eq!(local.octets()[0], 0xfe);
    }

    #[test]
    fn test_mac_with_oui() {
        let mac = MacAddr::new([1, 2, 3, 4, 5, 6]);
        let swapped = mac.with_oui([0xa4, 0x83, 0xe7]);
        assert_eq!(swapped.oui(), [0xa4, 0x83, 0xe7]);
        assert_eq!(swapped.octets()[3..], [4, 5, 6]);
    }

    #[test]
    fn test_mac_wire_round_trip() {
        let mac = MacAddr::new([1, 2, 3, 4, 5, 6]);
        let bytes = serialize(&mac).unwrap();
        assert_eq!(bytes, vec![1, 2, 3, 4, 5, 6]);
        let de: MacAddr = deserialize(&bytes).unwrap();
        assert_eq!(de, mac);
    }

    #[test]
    fn test_broadcast() {
        assert_eq!(BROADCAST.to_string(), "ff:ff:ff:ff:ff:ff");
        assert!(BROADCAST.is_multicast());
    }
}

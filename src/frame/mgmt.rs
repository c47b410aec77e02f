//! The 802.11 management header: frame control, duration, the three
//! address fields, and sequence control.
//!
//! # Design decisions
//!
//! The frame control and sequence control words are represented as
//! small structs converted to and from their packed `u16` form rather
//! than exposed as raw integers, so the composer cannot produce a
//! header whose type bits disagree with what the rest of the frame
//! claims to be.

use std::io::Cursor;

use crate::{
    consts::frame::{FrameType, MGMT_HEADER_LEN, SEQ_MODULUS},
    err::{DeError, SerError},
    types::MacAddr,
    FromBytes, Size, ToBytes, TypeSize,
};

/// The information packed into the 16-bit frame control field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameControl {
    /// Frame type (bits 2..=3); management for everything this crate
    /// emits.
    pub frame_type: FrameType,
    /// Frame subtype (bits 4..=7).
    pub subtype: u8,
    /// The flags byte (bits 8..=15): ToDS/FromDS, retry, protected.
    /// Always zero for probe requests.
    pub flags: u8,
}

impl From<&FrameControl> for u16 {
    fn from(fc: &FrameControl) -> Self {
        // Protocol version bits 0..=1 are always zero.
        let mut int = (u8::from(fc.frame_type) as u16) << 2;
        int |= (fc.subtype as u16) << 4;
        int |= (fc.flags as u16) << 8;
        int
    }
}

impl From<u16> for FrameControl {
    fn from(int: u16) -> Self {
        FrameControl {
            frame_type: FrameType::from(((int >> 2) & 0x3) as u8),
            subtype: ((int >> 4) & 0xf) as u8,
            flags: (int >> 8) as u8,
        }
    }
}

impl Size for FrameControl {
    fn size(&self) -> usize {
        2
    }
}

impl ToBytes for FrameControl {
    fn to_bytes(&self, buffer: &mut Cursor<Vec<u8>>) -> Result<(), SerError> {
        u16::from(self).to_bytes(buffer)
    }
}

impl FromBytes for FrameControl {
    fn from_bytes(buffer: &mut Cursor<&[u8]>) -> Result<Self, DeError> {
        Ok(FrameControl::from(u16::from_bytes(buffer)?))
    }
}

/// The information packed into the 16-bit sequence control field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SeqControl {
    /// Sequence number, modulo 4096.
    pub seq: u16,
    /// Fragment number; probe requests are never fragmented.
    pub frag: u8,
}

impl From<&SeqControl> for u16 {
    fn from(sc: &SeqControl) -> Self {
        (sc.seq % SEQ_MODULUS) << 4 | (sc.frag as u16 & 0xf)
    }
}

impl From<u16> for SeqControl {
    fn from(int: u16) -> Self {
        SeqControl {
            seq: int >> 4,
            frag: (int & 0xf) as u8,
        }
    }
}

impl Size for SeqControl {
    fn size(&self) -> usize {
        2
    }
}

impl ToBytes for SeqControl {
    fn to_bytes(&self, buffer: &mut Cursor<Vec<u8>>) -> Result<(), SerError> {
        u16::from(self).to_bytes(buffer)
    }
}

impl FromBytes for SeqControl {
    fn from_bytes(buffer: &mut Cursor<&[u8]>) -> Result<Self, DeError> {
        Ok(SeqControl::from(u16::from_bytes(buffer)?))
    }
}

/// An 802.11 management header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MgmtHeader {
    /// Frame control word.
    pub frame_control: FrameControl,
    /// Duration/ID; zero for probe requests.
    pub duration: u16,
    /// Receiver address.
    pub addr1: MacAddr,
    /// Transmitter address.
    pub addr2: MacAddr,
    /// BSSID.
    pub addr3: MacAddr,
    /// Sequence control word.
    pub seq_control: SeqControl,
}

impl MgmtHeader {
    /// Build the header for a probe request from `source` with the
    /// given sequence number: broadcast receiver and BSSID, fragment
    /// zero.
    pub fn probe_request(source: MacAddr, seq: u16) -> Self {
        MgmtHeader {
            frame_control: FrameControl {
                frame_type: FrameType::Management,
                subtype: 4,
                flags: 0,
            },
            duration: 0,
            addr1: crate::types::BROADCAST,
            addr2: source,
            addr3: crate::types::BROADCAST,
            seq_control: SeqControl {
                seq: seq % SEQ_MODULUS,
                frag: 0,
            },
        }
    }
}

impl Size for MgmtHeader {
    fn size(&self) -> usize {
        MGMT_HEADER_LEN
    }
}

impl TypeSize for MgmtHeader {
    fn type_size() -> usize {
        MGMT_HEADER_LEN
    }
}

impl ToBytes for MgmtHeader {
    fn to_bytes(&self, buffer: &mut Cursor<Vec<u8>>) -> Result<(), SerError> {
        self.frame_control.to_bytes(buffer)?;
        self.duration.to_bytes(buffer)?;
        self.addr1.to_bytes(buffer)?;
        self.addr2.to_bytes(buffer)?;
        self.addr3.to_bytes(buffer)?;
        self.seq_control.to_bytes(buffer)?;
        Ok(())
    }
}

impl FromBytes for MgmtHeader {
    fn from_bytes(buffer: &mut Cursor<&[u8]>) -> Result<Self, DeError> {
        Ok(MgmtHeader {
            frame_control: FrameControl::from_bytes(buffer)?,
            duration: u16::from_bytes(buffer)?,
            addr1: MacAddr::from_bytes(buffer)?,
            addr2: MacAddr::from_bytes(buffer)?,
            addr3: MacAddr::from_bytes(buffer)?,
            seq_control: SeqControl::from_bytes(buffer)?,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::{deserialize, serialize, types::BROADCAST};

    #[test]
    fn test_frame_control_packing() {
        let fc = FrameControl {
            frame_type: FrameType::Management,
            subtype: 4,
            flags: 0,
        };
        assert_eq!(u16::from(&fc), 0x0040);
        assert_eq!(FrameControl::from(0x0040u16), fc);
    }

    #[test]
    fn test_seq_control_packing() {
        let sc = SeqControl { seq: 100, frag: 0 };
        assert_eq!(u16::from(&sc), 100 << 4);
        let sc = SeqControl { seq: 4100, frag: 2 };
        assert_eq!(u16::from(&sc), (4100 % 4096) << 4 | 2);
    }

    #[test]
    fn test_probe_request_header_round_trip() {
        let source = MacAddr::new([2, 0, 0, 0x12, 0x34, 0x56]);
        let header = MgmtHeader::probe_request(source, 1234);
        let bytes = serialize(&header).unwrap();
        assert_eq!(bytes.len(), MGMT_HEADER_LEN);
        assert_eq!(&bytes[0..2], &[0x40, 0x00]);
        assert_eq!(&bytes[4..10], &[0xff; 6]);
        assert_eq!(&bytes[10..16], &source.octets());
        assert_eq!(&bytes[16..22], &[0xff; 6]);

        let parsed: MgmtHeader = deserialize(&bytes).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed.addr1, BROADCAST);
        assert_eq!(parsed.seq_control.seq, 1234);
        assert_eq!(parsed.seq_control.frag, 0);
    }
}

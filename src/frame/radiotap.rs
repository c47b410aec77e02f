//! The radiotap header prepended to every emitted frame.
//!
//! The layout is the fixed six-field header a 2.4 GHz monitor mode
//! capture carries: TSFT, flags, rate, channel, antenna signal, and
//! antenna index, with the natural alignment rules of the radiotap
//! registry (TSFT is 8-byte aligned and therefore starts directly
//! after the 8-byte preamble).

use std::io::{Cursor, Seek, SeekFrom};

use crate::{
    consts::{
        frame::{channel_center_mhz, ChannelFlags, FrameFlags, Present},
        RATE_UNITS_PER_MBPS,
    },
    err::{ConfigError, DeError, SerError},
    FromBytes, Size, ToBytes,
};

/// Length in bytes of the serialized header with all six fields
/// present.
pub const RADIOTAP_LEN: u16 = 24;

/// The present word every emitted frame carries.
pub fn emitted_present() -> Present {
    Present::TSFT
        | Present::FLAGS
        | Present::RATE
        | Present::CHANNEL
        | Present::DBM_ANTSIGNAL
        | Present::ANTENNA
}

/// Alignment and size of the radiotap fields this parser understands,
/// indexed by present-word bit. Everything through the antenna
/// signal pair plus the antenna index is enough to skip over any
/// header another 2.4 GHz sniffer is likely to have produced.
fn field_layout(bit: u32) -> Option<(u64, u64)> {
    match bit {
        0 => Some((8, 8)),  // TSFT
        1 => Some((1, 1)),  // flags
        2 => Some((1, 1)),  // rate
        3 => Some((2, 4)),  // channel
        4 => Some((2, 2)),  // FHSS
        5 => Some((1, 1)),  // dBm antenna signal
        6 => Some((1, 1)),  // dBm antenna noise
        7 => Some((2, 2)),  // lock quality
        8 => Some((2, 2)),  // TX attenuation
        9 => Some((2, 2)),  // dB TX attenuation
        10 => Some((1, 1)), // dBm TX power
        11 => Some((1, 1)), // antenna
        12 => Some((1, 1)), // dB antenna signal
        13 => Some((1, 1)), // dB antenna noise
        _ => None,
    }
}

/// A radiotap header for one emitted or reparsed frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RadiotapHeader {
    /// 64-bit MAC timestamp in microseconds.
    pub tsft: u64,
    /// Per-frame flags; no FCS is appended, so this is empty.
    pub flags: FrameFlags,
    /// Data rate in 500 kbps units.
    pub rate: u8,
    /// Channel center frequency in MHz.
    pub channel_mhz: u16,
    /// Channel flags; CCK in the 2.4 GHz band.
    pub channel_flags: ChannelFlags,
    /// Antenna signal in dBm.
    pub antenna_signal: i8,
    /// Antenna index.
    pub antenna: u8,
}

impl RadiotapHeader {
    /// Build the header for a frame sent on `channel` at `tsft`
    /// microseconds with the given antenna signal, at the fixed
    /// 1.0 Mbps probe rate.
    pub fn new(channel: u8, tsft: u64, antenna_signal: i8) -> Result<Self, ConfigError> {
        Ok(RadiotapHeader {
            tsft,
            flags: FrameFlags::empty(),
            rate: RATE_UNITS_PER_MBPS,
            channel_mhz: channel_center_mhz(channel)?,
            channel_flags: ChannelFlags::CCK | ChannelFlags::GHZ2,
            antenna_signal,
            antenna: 0,
        })
    }

    /// Map the channel frequency back to its 2.4 GHz channel number.
    pub fn channel(&self) -> Option<u8> {
        match self.channel_mhz {
            2484 => Some(14),
            mhz if (2412..=2472).contains(&mhz) && (mhz - 2407) % 5 == 0 => {
                Some(((mhz - 2407) / 5) as u8)
            }
            _ => None,
        }
    }
}

impl Size for RadiotapHeader {
    fn size(&self) -> usize {
        RADIOTAP_LEN as usize
    }
}

impl ToBytes for RadiotapHeader {
    fn to_bytes(&self, buffer: &mut Cursor<Vec<u8>>) -> Result<(), SerError> {
        0u8.to_bytes(buffer)?; // version
        0u8.to_bytes(buffer)?; // pad
        RADIOTAP_LEN.to_bytes(buffer)?;
        emitted_present().bits().to_bytes(buffer)?;
        self.tsft.to_bytes(buffer)?;
        self.flags.bits().to_bytes(buffer)?;
        self.rate.to_bytes(buffer)?;
        self.channel_mhz.to_bytes(buffer)?;
        self.channel_flags.bits().to_bytes(buffer)?;
        self.antenna_signal.to_bytes(buffer)?;
        self.antenna.to_bytes(buffer)?;
        Ok(())
    }
}

impl FromBytes for RadiotapHeader {
    fn from_bytes(buffer: &mut Cursor<&[u8]>) -> Result<Self, DeError> {
        let start = buffer.position();
        let version = u8::from_bytes(buffer)?;
        if version != 0 {
            return Err(DeError::invalid_value(format!(
                "radiotap version {version} is not 0"
            )));
        }
        let _pad = u8::from_bytes(buffer)?;
        let len = u16::from_bytes(buffer)?;
        let present_bits = u32::from_bytes(buffer)?;
        let present = Present::from_bits_retain(present_bits);
        if present_bits & (1 << 31) != 0 {
            return Err(DeError::invalid_value(
                "extended radiotap present words are not supported",
            ));
        }

        let mut header = RadiotapHeader {
            tsft: 0,
            flags: FrameFlags::empty(),
            rate: 0,
            channel_mhz: 0,
            channel_flags: ChannelFlags::empty(),
            antenna_signal: 0,
            antenna: 0,
        };
        for bit in 0..32u32 {
            if present_bits & (1 << bit) == 0 {
                continue;
            }
            let (align, size) = field_layout(bit).ok_or_else(|| {
                DeError::invalid_value(format!("radiotap field bit {bit} is not supported"))
            })?;
            let offset = buffer.position() - start;
            let padding = (align - offset % align) % align;
            buffer
                .seek(SeekFrom::Current(padding as i64))
                .map_err(|_| DeError::incomplete_type("RadiotapHeader"))?;
            match bit {
                0 => header.tsft = u64::from_bytes(buffer)?,
                1 => header.flags = FrameFlags::from_bits_retain(u8::from_bytes(buffer)?),
                2 => header.rate = u8::from_bytes(buffer)?,
                3 => {
                    header.channel_mhz = u16::from_bytes(buffer)?;
                    header.channel_flags = ChannelFlags::from_bits_retain(u16::from_bytes(buffer)?);
                }
                5 => header.antenna_signal = i8::from_bytes(buffer)?,
                11 => header.antenna = u8::from_bytes(buffer)?,
                _ => {
                    buffer
                        .seek(SeekFrom::Current(size as i64))
                        .map_err(|_| DeError::incomplete_type("RadiotapHeader"))?;
                }
            }
        }
        if !present.contains(emitted_present()) {
            return Err(DeError::invalid_value(
                "radiotap header is missing one of the six expected fields",
            ));
        }

        buffer
            .seek(SeekFrom::Start(start + len as u64))
            .map_err(|_| DeError::incomplete_type("RadiotapHeader"))?;
        Ok(header)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::{deserialize, serialize};

    #[test]
    fn test_serialized_layout() {
        let header = RadiotapHeader::new(6, 1_000_000, -55).unwrap();
        let bytes = serialize(&header).unwrap();
        assert_eq!(bytes.len(), 24);
        assert_eq!(&bytes[0..4], &[0, 0, 24, 0]);
        assert_eq!(&bytes[4..8], &0x0000082fu32.to_le_bytes());
        assert_eq!(&bytes[8..16], &1_000_000u64.to_le_bytes());
        assert_eq!(bytes[16], 0); // flags
        assert_eq!(bytes[17], 2); // 1.0 Mbps
        assert_eq!(&bytes[18..20], &2437u16.to_le_bytes());
        assert_eq!(&bytes[20..22], &0x00a0u16.to_le_bytes());
        assert_eq!(bytes[22] as i8, -55);
        assert_eq!(bytes[23], 0);
    }

    #[test]
    fn test_round_trip() {
        let header = RadiotapHeader::new(11, 987_654_321, -42).unwrap();
        let bytes = serialize(&header).unwrap();
        let parsed: RadiotapHeader = deserialize(&bytes).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed.channel(), Some(11));
    }

    #[test]
    fn test_channel_14() {
        let header = RadiotapHeader::new(14, 0, -40).unwrap();
        assert_eq!(header.channel_mhz, 2484);
        assert_eq!(header.channel(), Some(14));
        assert!(RadiotapHeader::new(15, 0, -40).is_err());
    }

    #[test]
    fn test_rejects_wrong_version() {
        let header = RadiotapHeader::new(1, 0, -40).unwrap();
        let mut bytes = serialize(&header).unwrap();
        bytes[0] = 1;
        assert!(deserialize::<RadiotapHeader>(&bytes).is_err());
    }
}

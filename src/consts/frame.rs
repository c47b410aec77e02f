//! Constants for the 802.11 management frame layer and the radiotap
//! header.

use bitflags::bitflags;

use crate::err::ConfigError;

impl_var!(
    /// The frame type carried in bits 2..=3 of the frame control
    /// field.
    FrameType, u8,
    Management => 0,
    Control => 1,
    Data => 2
);

impl_var!(
    /// Management frame subtypes carried in bits 4..=7 of the frame
    /// control field. Only the subset a passive scanner can observe
    /// from non-associated stations is spelled out.
    MgmtSubtype, u8,
    AssociationRequest => 0,
    AssociationResponse => 1,
    ProbeRequest => 4,
    ProbeResponse => 5,
    Beacon => 8,
    Authentication => 11,
    Deauthentication => 12
);

impl_var!(
    /// Information element IDs in the order a probe request body
    /// carries them.
    ElementId, u8,
    Ssid => 0,
    SupportedRates => 1,
    DsssParamSet => 3,
    HtCapabilities => 45,
    ExtSupportedRates => 50,
    ExtCapabilities => 127,
    VhtCapabilities => 191,
    VendorSpecific => 221
);

bitflags! {
    /// The present word of the radiotap header. Bit positions follow
    /// the radiotap field registry.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Present: u32 {
        /// 64-bit MAC timestamp, 8-byte aligned.
        const TSFT = 1 << 0;
        /// Per-frame flags byte.
        const FLAGS = 1 << 1;
        /// Data rate in 500 kbps units.
        const RATE = 1 << 2;
        /// Frequency and channel flags, 2-byte aligned.
        const CHANNEL = 1 << 3;
        /// Frequency-hopping set and pattern.
        const FHSS = 1 << 4;
        /// RF signal power at the antenna in dBm.
        const DBM_ANTSIGNAL = 1 << 5;
        /// RF noise power at the antenna in dBm.
        const DBM_ANTNOISE = 1 << 6;
        /// Antenna index.
        const ANTENNA = 1 << 11;
    }
}

bitflags! {
    /// Channel flags in the radiotap channel field.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ChannelFlags: u16 {
        /// Turbo channel.
        const TURBO = 0x0010;
        /// CCK modulation.
        const CCK = 0x0020;
        /// OFDM modulation.
        const OFDM = 0x0040;
        /// 2.4 GHz spectrum.
        const GHZ2 = 0x0080;
        /// 5 GHz spectrum.
        const GHZ5 = 0x0100;
    }
}

bitflags! {
    /// The radiotap per-frame flags byte.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct FrameFlags: u8 {
        /// Sent or received during a CFP.
        const CFP = 0x01;
        /// Short preamble.
        const SHORT_PREAMBLE = 0x02;
        /// Frame includes an FCS at the end.
        const FCS = 0x10;
    }
}

/// Length in bytes of a serialized management header.
pub const MGMT_HEADER_LEN: usize = 24;

/// The sequence number space of the sequence control field.
pub const SEQ_MODULUS: u16 = 4096;

/// The OUI used by Wi-Fi Alliance vendor specific elements,
/// including WPS.
pub const WFA_OUI: [u8; 3] = [0x00, 0x50, 0xf2];

/// Vendor specific element type for WPS under [`WFA_OUI`].
pub const WPS_VENDOR_TYPE: u8 = 0x04;

/// WPS attribute ID for the protocol version.
pub const WPS_ATTR_VERSION: u16 = 0x104a;

/// WPS attribute ID for UUID-E.
pub const WPS_ATTR_UUID_E: u16 = 0x1047;

/// Map a 2.4 GHz channel number to its center frequency in MHz.
///
/// Channels 1..=13 sit at 2412 + 5 * (n - 1) MHz; channel 14 is the
/// Japan-only outlier at 2484 MHz. Anything else is rejected.
pub fn channel_center_mhz(channel: u8) -> Result<u16, ConfigError> {
    match channel {
        1..=13 => Ok(2407 + 5 * channel as u16),
        14 => Ok(2484),
        c => Err(ConfigError::BadChannel(c)),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_channel_mapping() {
        assert_eq!(channel_center_mhz(1).unwrap(), 2412);
        assert_eq!(channel_center_mhz(6).unwrap(), 2437);
        assert_eq!(channel_center_mhz(13).unwrap(), 2472);
        assert_eq!(channel_center_mhz(14).unwrap(), 2484);
        assert!(channel_center_mhz(0).is_err());
        assert!(channel_center_mhz(15).is_err());
    }

    #[test]
    fn test_element_id_round_trip() {
        assert_eq!(u8::from(ElementId::VhtCapabilities), 191);
        assert_eq!(ElementId::from(221u8), ElementId::VendorSpecific);
        assert_eq!(ElementId::from(6u8), ElementId::UnrecognizedVariant(6));
    }

    #[test]
    fn test_probe_request_present_word() {
        let present = Present::TSFT
            | Present::FLAGS
            | Present::RATE
            | Present::CHANNEL
            | Present::DBM_ANTSIGNAL
            | Present::ANTENNA;
        assert_eq!(present.bits(), 0x0000082f);
    }
}

//! The frame composer: radiotap, the 802.11 management header, and
//! the probe request body assembled into bit-exact frames, one burst
//! at a time.
//!
//! # Design decisions
//!
//! The composer is a pure function over a [`BurstSpec`]: it never
//! mutates device state other than the sequence counter it hands
//! back, so the device model stays the single owner of rotation and
//! bookkeeping decisions. All randomness (antenna signal, jitter)
//! draws through the caller's RNG handle.

pub mod ie;
pub mod mgmt;
pub mod radiotap;

use std::io::Cursor;

use rand::Rng;

use crate::{
    consts::secs_to_micros,
    dist::DiscreteDistribution,
    err::{DeError, SerError, SimError},
    store::HardwareProfile,
    types::MacAddr,
    FromBytes, FromBytesWithInput, Size, ToBytes,
};

use self::{ie::InfoElement, ie::ProbeBody, mgmt::MgmtHeader, radiotap::RadiotapHeader};

/// A fully parsed (or fully composed) probe request frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbeFrame {
    /// The radiotap capture header.
    pub radiotap: RadiotapHeader,
    /// The 802.11 management header.
    pub header: MgmtHeader,
    /// The information elements.
    pub body: ProbeBody,
}

impl ProbeFrame {
    /// The transmitter address.
    pub fn source(&self) -> MacAddr {
        self.header.addr2
    }
}

impl Size for ProbeFrame {
    fn size(&self) -> usize {
        self.radiotap.size() + self.header.size() + self.body.size()
    }
}

impl ToBytes for ProbeFrame {
    fn to_bytes(&self, buffer: &mut Cursor<Vec<u8>>) -> Result<(), SerError> {
        self.radiotap.to_bytes(buffer)?;
        self.header.to_bytes(buffer)?;
        self.body.to_bytes(buffer)?;
        Ok(())
    }
}

impl FromBytes for ProbeFrame {
    fn from_bytes(buffer: &mut Cursor<&[u8]>) -> Result<Self, DeError> {
        let radiotap = RadiotapHeader::from_bytes(buffer)?;
        let header = MgmtHeader::from_bytes(buffer)?;
        let remaining = buffer.get_ref().len() as u64 - buffer.position();
        let body = ProbeBody::from_bytes_with_input(buffer, remaining as usize)?;
        Ok(ProbeFrame {
            radiotap,
            header,
            body,
        })
    }
}

/// Everything the composer needs to produce one burst.
#[derive(Clone, Debug)]
pub struct BurstSpec<'a> {
    /// Hardware profile supplying rates and capability bytes.
    pub profile: &'a HardwareProfile,
    /// The source MAC for every frame of the burst.
    pub source: MacAddr,
    /// The vendor OUI advertised in the vendor specific element.
    pub vendor_oui: [u8; 3],
    /// Target SSID; [`None`] composes wildcard probes.
    pub ssid: Option<&'a str>,
    /// UUID-E for the WPS element; [`None`] omits WPS.
    pub wps_uuid: Option<[u8; 16]>,
    /// Channel the burst is sent on.
    pub channel: u8,
    /// Sequence number of the first frame.
    pub start_seq: u16,
    /// Number of frames in the burst.
    pub burst_len: usize,
    /// Wire time of the first frame, in microseconds.
    pub start_time: u64,
    /// Interval between frames inside the burst, in microseconds.
    pub intra_micros: u64,
    /// Per-packet jitter distribution, in seconds.
    pub jitter: &'a DiscreteDistribution,
}

/// One composed frame annotated with its intended wire timestamp.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BurstFrame {
    /// Intended wire time in microseconds since the simulation epoch.
    pub time: u64,
    /// The serialized frame.
    pub bytes: Vec<u8>,
}

/// Compose one burst: `burst_len` frames spaced by the intra-burst
/// interval plus per-packet jitter, with strictly increasing sequence
/// numbers.
///
/// Returns the frames in wire order together with the sequence number
/// the device should continue from.
pub fn compose_burst<R>(spec: &BurstSpec, rng: &mut R) -> Result<(Vec<BurstFrame>, u16), SimError>
where
    R: Rng,
{
    let mut frames = Vec::with_capacity(spec.burst_len);
    for i in 0..spec.burst_len {
        let jitter = secs_to_micros(spec.jitter.sample(rng));
        let time = spec.start_time + i as u64 * spec.intra_micros + jitter;
        let seq = (spec.start_seq + i as u16) % crate::consts::frame::SEQ_MODULUS;
        let antenna_signal = rng.gen_range(-70..=-30) as i8;

        let radiotap = RadiotapHeader::new(spec.channel, time, antenna_signal)
            .map_err(SimError::Config)?;
        let header = MgmtHeader::probe_request(spec.source, seq);
        let body = compose_body(spec)?;
        let frame = ProbeFrame {
            radiotap,
            header,
            body,
        };

        frames.push(BurstFrame {
            time,
            bytes: crate::serialize(&frame)?,
        });
    }
    let next_seq =
        (spec.start_seq + spec.burst_len as u16) % crate::consts::frame::SEQ_MODULUS;
    Ok((frames, next_seq))
}

/// Assemble the information elements in the standardized order.
fn compose_body(spec: &BurstSpec) -> Result<ProbeBody, SimError> {
    let profile = spec.profile;
    let mut body = ProbeBody::new();
    body.push(InfoElement::ssid(spec.ssid));
    body.push(InfoElement::supported_rates(profile.rates()));
    if !profile.ext_rates().is_empty() {
        body.push(InfoElement::ext_supported_rates(profile.ext_rates()));
    }
    body.push(InfoElement::dsss_param_set(spec.channel));
    if !profile.ht_cap().is_empty() {
        body.push(InfoElement::ht_capabilities(profile.ht_cap()));
    }
    if let Some(vht) = profile.vht_cap() {
        body.push(InfoElement::vht_capabilities(vht));
    }
    if !profile.ext_cap().is_empty() {
        body.push(InfoElement::ext_capabilities(profile.ext_cap()));
    }
    body.push(InfoElement::vendor_specific(spec.vendor_oui));
    if let Some(uuid) = &spec.wps_uuid {
        body.push(InfoElement::wps(uuid));
    }
    Ok(body)
}

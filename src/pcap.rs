//! Classic PCAP capture writing and read-back, link-layer type
//! IEEE 802.11 with radiotap header (DLT 127), microsecond
//! timestamps.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::{
    consts::MICROS_PER_SEC,
    err::{DeError, SimError},
};

/// Link-layer type for 802.11 frames with a radiotap header.
pub const DLT_IEEE802_11_RADIO: u32 = 127;

/// Magic number of a little-endian classic PCAP file with
/// microsecond timestamps.
const PCAP_MAGIC: u32 = 0xa1b2_c3d4;

const VERSION_MAJOR: u16 = 2;
const VERSION_MINOR: u16 = 4;
const SNAPLEN: u32 = 65535;

/// Writer appending radiotap frames to a classic PCAP stream.
#[derive(Debug)]
pub struct PcapWriter<W> {
    inner: W,
    frames: u64,
}

impl<W> PcapWriter<W>
where
    W: Write,
{
    /// Write the global header and return the writer.
    pub fn new(mut inner: W) -> Result<Self, SimError> {
        inner.write_u32::<LittleEndian>(PCAP_MAGIC)?;
        inner.write_u16::<LittleEndian>(VERSION_MAJOR)?;
        inner.write_u16::<LittleEndian>(VERSION_MINOR)?;
        inner.write_u32::<LittleEndian>(0)?; // thiszone
        inner.write_u32::<LittleEndian>(0)?; // sigfigs
        inner.write_u32::<LittleEndian>(SNAPLEN)?;
        inner.write_u32::<LittleEndian>(DLT_IEEE802_11_RADIO)?;
        Ok(PcapWriter { inner, frames: 0 })
    }

    /// Append one frame with the given timestamp in microseconds
    /// since the capture epoch.
    pub fn write_frame(&mut self, time_micros: u64, bytes: &[u8]) -> Result<(), SimError> {
        self.inner
            .write_u32::<LittleEndian>((time_micros / MICROS_PER_SEC) as u32)?;
        self.inner
            .write_u32::<LittleEndian>((time_micros % MICROS_PER_SEC) as u32)?;
        self.inner.write_u32::<LittleEndian>(bytes.len() as u32)?;
        self.inner.write_u32::<LittleEndian>(bytes.len() as u32)?;
        self.inner.write_all(bytes)?;
        self.frames += 1;
        Ok(())
    }

    /// Number of frames written so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Flush the underlying writer.
    pub fn flush(&mut self) -> Result<(), SimError> {
        self.inner.flush()?;
        Ok(())
    }

    /// Flush and return the underlying writer.
    pub fn into_inner(mut self) -> Result<W, SimError> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

/// Reader over a classic PCAP stream produced by [`PcapWriter`] or
/// any little-endian microsecond-precision capture tool.
#[derive(Debug)]
pub struct PcapReader<R> {
    inner: R,
}

impl<R> PcapReader<R>
where
    R: Read,
{
    /// Validate the global header and return the reader.
    pub fn new(mut inner: R) -> Result<Self, SimError> {
        let magic = inner.read_u32::<LittleEndian>()?;
        if magic != PCAP_MAGIC {
            return Err(
                DeError::invalid_value(format!("unrecognized capture magic {magic:#010x}")).into(),
            );
        }
        let _version_major = inner.read_u16::<LittleEndian>()?;
        let _version_minor = inner.read_u16::<LittleEndian>()?;
        let _thiszone = inner.read_u32::<LittleEndian>()?;
        let _sigfigs = inner.read_u32::<LittleEndian>()?;
        let _snaplen = inner.read_u32::<LittleEndian>()?;
        let network = inner.read_u32::<LittleEndian>()?;
        if network != DLT_IEEE802_11_RADIO {
            return Err(DeError::invalid_value(format!(
                "link-layer type {network} is not radiotap ({DLT_IEEE802_11_RADIO})"
            ))
            .into());
        }
        Ok(PcapReader { inner })
    }

    /// Read the next frame as `(microsecond timestamp, bytes)`;
    /// [`None`] at a clean end of stream.
    pub fn next_frame(&mut self) -> Result<Option<(u64, Vec<u8>)>, SimError> {
        let mut record_header = [0u8; 16];
        let mut filled = 0;
        while filled < record_header.len() {
            let n = self.inner.read(&mut record_header[filled..])?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(DeError::incomplete_type("pcap record header").into());
            }
            filled += n;
        }
        let mut header = &record_header[..];
        let ts_sec = header.read_u32::<LittleEndian>()?;
        let ts_usec = header.read_u32::<LittleEndian>()?;
        let incl_len = header.read_u32::<LittleEndian>()?;
        let _orig_len = header.read_u32::<LittleEndian>()?;

        let mut bytes = vec![0; incl_len as usize];
        self.inner
            .read_exact(&mut bytes)
            .map_err(|_| DeError::incomplete_type("pcap record body"))?;
        Ok(Some((
            ts_sec as u64 * MICROS_PER_SEC + ts_usec as u64,
            bytes,
        )))
    }
}

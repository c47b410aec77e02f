//! Information elements: the type-length-value fields that make up a
//! probe request body.
//!
//! # Design decisions
//!
//! Payloads are represented as a byte buffer so that elements with
//! different interior layouts can be carried in the same body vector
//! and still be type checked before serialization through the typed
//! constructors below. Reparsing an element recovers the raw payload;
//! interpretation stays with the caller, mirroring what a capture
//! analysis tool would do.

use std::io::Cursor;

use crate::{
    consts::frame::{
        ElementId, WFA_OUI, WPS_ATTR_UUID_E, WPS_ATTR_VERSION, WPS_VENDOR_TYPE,
    },
    err::{DeError, SerError},
    types::Buffer,
    FromBytes, FromBytesWithInput, Size, ToBytes,
};

/// One information element: an ID, a one-byte length, and up to 255
/// payload bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InfoElement {
    /// Element ID.
    pub id: ElementId,
    /// Payload of the element.
    pub payload: Buffer,
}

impl InfoElement {
    /// Create a new element with the given payload.
    pub fn new(id: ElementId, payload: Buffer) -> Self {
        InfoElement { id, payload }
    }

    /// The SSID element: empty for a wildcard scan, otherwise the
    /// target network name.
    pub fn ssid(ssid: Option<&str>) -> Self {
        let payload = match ssid {
            Some(name) => Buffer::from(name.as_bytes()),
            None => Buffer::new(),
        };
        InfoElement::new(ElementId::Ssid, payload)
    }

    /// The supported rates element, rates in 500 kbps units.
    pub fn supported_rates(rates: &[u8]) -> Self {
        InfoElement::new(ElementId::SupportedRates, Buffer::from(rates))
    }

    /// The extended supported rates element for rate sets longer than
    /// eight entries.
    pub fn ext_supported_rates(rates: &[u8]) -> Self {
        InfoElement::new(ElementId::ExtSupportedRates, Buffer::from(rates))
    }

    /// The DSSS parameter set element carrying the current channel.
    pub fn dsss_param_set(channel: u8) -> Self {
        InfoElement::new(ElementId::DsssParamSet, Buffer::from(vec![channel]))
    }

    /// The HT capabilities element with the model's capability bytes.
    pub fn ht_capabilities(caps: &Buffer) -> Self {
        InfoElement::new(ElementId::HtCapabilities, caps.clone())
    }

    /// The VHT capabilities element with the model's capability
    /// bytes.
    pub fn vht_capabilities(caps: &Buffer) -> Self {
        InfoElement::new(ElementId::VhtCapabilities, caps.clone())
    }

    /// The extended capabilities element with the model's capability
    /// bytes.
    pub fn ext_capabilities(caps: &Buffer) -> Self {
        InfoElement::new(ElementId::ExtCapabilities, caps.clone())
    }

    /// A vendor specific element identifying the device vendor by
    /// OUI, with an empty vendor payload.
    pub fn vendor_specific(oui: [u8; 3]) -> Self {
        InfoElement::new(
            ElementId::VendorSpecific,
            Buffer::from(vec![oui[0], oui[1], oui[2], 0x00]),
        )
    }

    /// The WPS vendor specific element under the Wi-Fi Alliance OUI,
    /// carrying the protocol version and the device's UUID-E. WPS
    /// attributes are big endian, unlike every other field in the
    /// frame.
    pub fn wps(uuid: &[u8; 16]) -> Self {
        let mut payload = vec![WFA_OUI[0], WFA_OUI[1], WFA_OUI[2], WPS_VENDOR_TYPE];
        payload.extend_from_slice(&WPS_ATTR_VERSION.to_be_bytes());
        payload.extend_from_slice(&1u16.to_be_bytes());
        payload.push(0x10);
        payload.extend_from_slice(&WPS_ATTR_UUID_E.to_be_bytes());
        payload.extend_from_slice(&16u16.to_be_bytes());
        payload.extend_from_slice(uuid);
        InfoElement::new(ElementId::VendorSpecific, Buffer::from(payload))
    }

    /// Whether this is a vendor specific element carrying the given
    /// OUI.
    pub fn has_vendor_oui(&self, oui: [u8; 3]) -> bool {
        self.id == ElementId::VendorSpecific
            && self.payload.as_ref().get(0..3) == Some(oui.as_slice())
    }
}

impl Size for InfoElement {
    fn size(&self) -> usize {
        2 + self.payload.len()
    }
}

impl ToBytes for InfoElement {
    fn to_bytes(&self, buffer: &mut Cursor<Vec<u8>>) -> Result<(), SerError> {
        if self.payload.len() > u8::MAX as usize {
            return Err(SerError::new(format!(
                "element payload of {} bytes exceeds the one-byte length field",
                self.payload.len()
            )));
        }
        self.id.to_bytes(buffer)?;
        (self.payload.len() as u8).to_bytes(buffer)?;
        self.payload.to_bytes(buffer)?;
        Ok(())
    }
}

impl FromBytes for InfoElement {
    fn from_bytes(buffer: &mut Cursor<&[u8]>) -> Result<Self, DeError> {
        let id = ElementId::from_bytes(buffer)?;
        let len = u8::from_bytes(buffer)?;
        let payload = Buffer::from_bytes_with_input(buffer, len as usize)?;
        Ok(InfoElement { id, payload })
    }
}

/// The body of a probe request: an ordered sequence of information
/// elements.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProbeBody(Vec<InfoElement>);

impl ProbeBody {
    /// Create an empty body.
    pub fn new() -> Self {
        ProbeBody(Vec::new())
    }

    /// Append an element to the body.
    pub fn push(&mut self, element: InfoElement) {
        self.0.push(element)
    }

    /// The elements in wire order.
    pub fn elements(&self) -> &[InfoElement] {
        &self.0
    }

    /// The first element with the given ID, if any.
    pub fn get(&self, id: ElementId) -> Option<&InfoElement> {
        self.0.iter().find(|e| e.id == id)
    }

    /// The channel from the DSSS parameter set element, if present
    /// and well formed.
    pub fn channel(&self) -> Option<u8> {
        self.get(ElementId::DsssParamSet)
            .and_then(|e| e.payload.as_ref().first().copied())
    }

    /// The SSID element's payload as a string; [`None`] when the
    /// element is absent or empty (a wildcard probe).
    pub fn ssid(&self) -> Option<&str> {
        self.get(ElementId::Ssid)
            .filter(|e| !e.payload.is_empty())
            .and_then(|e| std::str::from_utf8(e.payload.as_ref()).ok())
    }
}

impl Size for ProbeBody {
    fn size(&self) -> usize {
        self.0.iter().map(Size::size).sum()
    }
}

impl ToBytes for ProbeBody {
    fn to_bytes(&self, buffer: &mut Cursor<Vec<u8>>) -> Result<(), SerError> {
        for element in &self.0 {
            element.to_bytes(buffer)?;
        }
        Ok(())
    }
}

impl FromBytesWithInput for ProbeBody {
    type Input = usize;

    fn from_bytes_with_input(
        buffer: &mut Cursor<&[u8]>,
        input: Self::Input,
    ) -> Result<Self, DeError> {
        let end = buffer.position() + input as u64;
        let mut elements = Vec::new();
        while buffer.position() < end {
            elements.push(InfoElement::from_bytes(buffer)?);
        }
        if buffer.position() != end {
            return Err(DeError::DataLeftInBuffer(stringify!(ProbeBody)));
        }
        Ok(ProbeBody(elements))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::{deserialize, serialize};

    #[test]
    fn test_ssid_wildcard() {
        let bytes = serialize(&InfoElement::ssid(None)).unwrap();
        assert_eq!(bytes, vec![0, 0]);
    }

    #[test]
    fn test_ssid_directed() {
        let bytes = serialize(&InfoElement::ssid(Some("cafe"))).unwrap();
        assert_eq!(bytes, vec![0, 4, b'c', b'a', b'f', b'e']);
    }

    #[test]
    fn test_element_round_trip() {
        let element = InfoElement::supported_rates(&[2, 4, 11, 22]);
        let bytes = serialize(&element).unwrap();
        assert_eq!(bytes, vec![1, 4, 2, 4, 11, 22]);
        let parsed: InfoElement = deserialize(&bytes).unwrap();
        assert_eq!(parsed, element);
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let element = InfoElement::new(ElementId::Ssid, Buffer::from(vec![0u8; 300]));
        assert!(serialize(&element).is_err());
    }

    #[test]
    fn test_wps_layout() {
        let uuid = [0x11u8; 16];
        let element = InfoElement::wps(&uuid);
        let payload = element.payload.as_ref();
        assert_eq!(&payload[0..4], &[0x00, 0x50, 0xf2, 0x04]);
        // Version attribute: id, length 1, value 0x10.
        assert_eq!(&payload[4..9], &[0x10, 0x4a, 0x00, 0x01, 0x10]);
        // UUID-E attribute: id, length 16, value.
        assert_eq!(&payload[9..13], &[0x10, 0x47, 0x00, 0x10]);
        assert_eq!(&payload[13..29], &uuid);
        assert!(element.has_vendor_oui(WFA_OUI));
    }

    #[test]
    fn test_body_round_trip() {
        let mut body = ProbeBody::new();
        body.push(InfoElement::ssid(Some("cafe")));
        body.push(InfoElement::supported_rates(&[2, 4]));
        body.push(InfoElement::dsss_param_set(6));
        let bytes = serialize(&body).unwrap();

        let parsed =
            ProbeBody::from_bytes_with_input(&mut Cursor::new(bytes.as_slice()), bytes.len())
                .unwrap();
        assert_eq!(parsed, body);
        assert_eq!(parsed.ssid(), Some("cafe"));
        assert_eq!(parsed.channel(), Some(6));
        assert!(parsed.get(ElementId::HtCapabilities).is_none());
    }

    #[test]
    fn test_body_rejects_truncated_element() {
        let bytes = vec![0u8, 4, b'c', b'a'];
        assert!(
            ProbeBody::from_bytes_with_input(&mut Cursor::new(bytes.as_slice()), bytes.len())
                .is_err()
        );
    }
}

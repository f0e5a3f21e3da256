// RTP packet handling
// Header codec plus in-place helpers on raw buffers for the forwarding path

use byteorder::{BigEndian, ByteOrder};
use rand::RngCore;
use thiserror::Error;

pub const RTP_VERSION: u8 = 2;
pub const RTP_HEADER_LEN: usize = 12;
const EXTENSION_HEADER_LEN: usize = 4;

const MARKER_PT_OFFSET: usize = 1;
const SEQUENCE_OFFSET: usize = 2;
const TIMESTAMP_OFFSET: usize = SEQUENCE_OFFSET + 2;
const SSRC_OFFSET: usize = TIMESTAMP_OFFSET + 4;

const PT_MASK: u8 = 0x7f;
const CC_MASK: u8 = 0x0f;
const PADDING_BIT: u8 = 0x20;
const EXTENSION_BIT: u8 = 0x10;
const MARKER_BIT: u8 = 0x80;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("packet truncated")]
    Truncated,

    #[error("bad rtp version {0}")]
    BadVersion(u8),

    #[error("bad padding")]
    BadPadding,

    #[error("bad header extension")]
    BadExtension,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RtpHeader {
    pub padding: bool,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub csrcs: Vec<u32>,
    // profile and data words of the header extension
    pub extension: Option<(u16, Vec<u8>)>,
}

impl RtpHeader {
    /// Parse the fixed header, the CSRC list and any extension. Returns the
    /// header and the range of the payload inside `buf` with padding removed.
    pub fn decode(buf: &[u8]) -> Result<(RtpHeader, std::ops::Range<usize>), PacketError> {
        if buf.len() < RTP_HEADER_LEN {
            return Err(PacketError::Truncated);
        }
        let version = buf[0] >> 6;
        if version != RTP_VERSION {
            return Err(PacketError::BadVersion(version));
        }

        let cc = (buf[0] & CC_MASK) as usize;
        let mut offset = RTP_HEADER_LEN + cc * 4;
        if buf.len() < offset {
            return Err(PacketError::Truncated);
        }
        let csrcs = (0..cc)
            .map(|i| BigEndian::read_u32(&buf[RTP_HEADER_LEN + i * 4..]))
            .collect();

        let extension = if buf[0] & EXTENSION_BIT != 0 {
            if buf.len() < offset + EXTENSION_HEADER_LEN {
                return Err(PacketError::BadExtension);
            }
            let profile = BigEndian::read_u16(&buf[offset..]);
            let words = BigEndian::read_u16(&buf[offset + 2..]) as usize;
            let start = offset + EXTENSION_HEADER_LEN;
            let end = start + words * 4;
            if buf.len() < end {
                return Err(PacketError::BadExtension);
            }
            offset = end;
            Some((profile, buf[start..end].to_vec()))
        } else {
            None
        };

        let padding = buf[0] & PADDING_BIT != 0;
        let mut end = buf.len();
        if padding {
            let pad = buf[buf.len() - 1] as usize;
            if pad == 0 || offset + pad > buf.len() {
                return Err(PacketError::BadPadding);
            }
            end -= pad;
        }

        let header = RtpHeader {
            padding,
            marker: buf[MARKER_PT_OFFSET] & MARKER_BIT != 0,
            payload_type: buf[MARKER_PT_OFFSET] & PT_MASK,
            sequence: BigEndian::read_u16(&buf[SEQUENCE_OFFSET..]),
            timestamp: BigEndian::read_u32(&buf[TIMESTAMP_OFFSET..]),
            ssrc: BigEndian::read_u32(&buf[SSRC_OFFSET..]),
            csrcs,
            extension,
        };
        Ok((header, offset..end))
    }

    /// Serialize the header. Padding bytes, if the flag is set, are the
    /// caller's business.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        let mut first = RTP_VERSION << 6 | (self.csrcs.len() as u8 & CC_MASK);
        if self.padding {
            first |= PADDING_BIT;
        }
        if self.extension.is_some() {
            first |= EXTENSION_BIT;
        }
        buf.push(first);
        buf.push(if self.marker { MARKER_BIT } else { 0 } | (self.payload_type & PT_MASK));

        let mut word = [0u8; 4];
        BigEndian::write_u16(&mut word, self.sequence);
        buf.extend_from_slice(&word[..2]);
        BigEndian::write_u32(&mut word, self.timestamp);
        buf.extend_from_slice(&word);
        BigEndian::write_u32(&mut word, self.ssrc);
        buf.extend_from_slice(&word);
        for csrc in &self.csrcs {
            BigEndian::write_u32(&mut word, *csrc);
            buf.extend_from_slice(&word);
        }
        if let Some((profile, data)) = &self.extension {
            BigEndian::write_u16(&mut word, *profile);
            BigEndian::write_u16(&mut word[2..], (data.len() / 4) as u16);
            buf.extend_from_slice(&word);
            buf.extend_from_slice(data);
        }
    }

    pub fn len(&self) -> usize {
        RTP_HEADER_LEN
            + self.csrcs.len() * 4
            + self
                .extension
                .as_ref()
                .map(|(_, d)| EXTENSION_HEADER_LEN + d.len())
                .unwrap_or(0)
    }
}

/// Build a packet with a plain 12 byte header.
pub fn build(
    payload_type: u8,
    marker: bool,
    sequence: u16,
    timestamp: u32,
    ssrc: u32,
    payload: &[u8],
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(RTP_HEADER_LEN + payload.len());
    RtpHeader {
        marker,
        payload_type,
        sequence,
        timestamp,
        ssrc,
        ..Default::default()
    }
    .encode(&mut buf);
    buf.extend_from_slice(payload);
    buf
}

pub struct RtpPacket {}

impl RtpPacket {
    // first two bits are zero for stun, 2 for rtp
    pub fn is_stun(buf: &[u8]) -> bool {
        !buf.is_empty() && buf[0] & 0xc0 == 0
    }

    pub fn get_payload_type(buf: &[u8]) -> u8 {
        buf[MARKER_PT_OFFSET] & PT_MASK
    }

    pub fn set_payload_type(buf: &mut [u8], pt: u8) {
        buf[MARKER_PT_OFFSET] = (buf[MARKER_PT_OFFSET] & MARKER_BIT) | (pt & PT_MASK);
    }

    pub fn get_marker(buf: &[u8]) -> bool {
        buf[MARKER_PT_OFFSET] & MARKER_BIT != 0
    }

    pub fn set_marker(buf: &mut [u8], marker: bool) {
        if marker {
            buf[MARKER_PT_OFFSET] |= MARKER_BIT;
        } else {
            buf[MARKER_PT_OFFSET] &= !MARKER_BIT;
        }
    }

    pub fn get_sequence(buf: &[u8]) -> u16 {
        BigEndian::read_u16(&buf[SEQUENCE_OFFSET..])
    }

    pub fn get_timestamp(buf: &[u8]) -> u32 {
        BigEndian::read_u32(&buf[TIMESTAMP_OFFSET..])
    }

    pub fn get_ssrc(buf: &[u8]) -> u32 {
        BigEndian::read_u32(&buf[SSRC_OFFSET..])
    }

    pub fn set_ssrc(buf: &mut [u8], ssrc: u32) {
        BigEndian::write_u32(&mut buf[SSRC_OFFSET..], ssrc);
    }

    pub fn new_ssrc() -> u32 {
        rand::thread_rng().next_u32()
    }

    pub fn new_sequence() -> u16 {
        (rand::thread_rng().next_u32() & 0xffff) as u16
    }

    // keep the top bits clear so early wraps are unlikely
    pub fn new_timestamp() -> u32 {
        rand::thread_rng().next_u32() & 0xFFFFFFF
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let header = RtpHeader {
            padding: false,
            marker: true,
            payload_type: 101,
            sequence: 65535,
            timestamp: 0xdeadbeef,
            ssrc: 0xaa,
            csrcs: vec![1, 2],
            extension: Some((0xbede, vec![1, 2, 3, 4])),
        };
        let mut buf = Vec::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), header.len());
        buf.extend_from_slice(b"payload");

        let (decoded, range) = RtpHeader::decode(&buf).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(&buf[range], b"payload");

        let mut again = Vec::new();
        decoded.encode(&mut again);
        assert_eq!(&again[..], &buf[..header.len()]);
    }

    #[test]
    fn padding_stripped() {
        let mut buf = build(0, false, 1, 2, 3, &[9, 9, 0, 0, 3]);
        buf[0] |= PADDING_BIT;
        let (header, range) = RtpHeader::decode(&buf).unwrap();
        assert!(header.padding);
        assert_eq!(&buf[range], &[9, 9]);

        let last = buf.len() - 1;
        buf[last] = 200;
        assert_eq!(RtpHeader::decode(&buf), Err(PacketError::BadPadding));
    }

    #[test]
    fn malformed() {
        assert_eq!(RtpHeader::decode(&[0x80; 6]), Err(PacketError::Truncated));
        let mut buf = build(0, false, 1, 2, 3, &[]);
        buf[0] = 0x40;
        assert_eq!(RtpHeader::decode(&buf), Err(PacketError::BadVersion(1)));
        let mut buf = build(0, false, 1, 2, 3, &[]);
        buf[0] |= 0x03;
        assert_eq!(RtpHeader::decode(&buf), Err(PacketError::Truncated));
        let mut buf = build(0, false, 1, 2, 3, &[]);
        buf[0] |= EXTENSION_BIT;
        assert_eq!(RtpHeader::decode(&buf), Err(PacketError::BadExtension));
    }

    #[test]
    fn raw_helpers() {
        let mut buf = build(0, false, 1000, 160000, 0xaa, &[0xff; 160]);
        assert!(!RtpPacket::is_stun(&buf));
        RtpPacket::set_payload_type(&mut buf, 8);
        RtpPacket::set_marker(&mut buf, true);
        assert_eq!(RtpPacket::get_payload_type(&buf), 8);
        assert!(RtpPacket::get_marker(&buf));
        assert_eq!(RtpPacket::get_sequence(&buf), 1000);
        assert_eq!(RtpPacket::get_timestamp(&buf), 160000);
        assert_eq!(RtpPacket::get_ssrc(&buf), 0xaa);
        RtpPacket::set_marker(&mut buf, false);
        assert_eq!(RtpPacket::get_payload_type(&buf), 8);
        assert!(RtpPacket::new_timestamp() < 0x10000000);
        assert!(RtpPacket::is_stun(&[0x00, 0x01]));
    }
}

use std::time::Instant;

use bytes::{BufMut, Bytes, BytesMut};
use strum_macros::{self, EnumString};

use crate::Format;

/// Q.850 cause codes carried by hangup control frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display, EnumString)]
#[repr(u8)]
pub enum HangupCause {
    #[strum(serialize = "NOT_DEFINED")]
    NotDefined = 0,
    #[strum(serialize = "UNALLOCATED")]
    Unallocated = 1,
    #[strum(serialize = "NO_ROUTE_DESTINATION")]
    NoRouteDestination = 3,
    #[strum(serialize = "NORMAL_CLEARING")]
    NormalClearing = 16,
    #[strum(serialize = "USER_BUSY")]
    UserBusy = 17,
    #[strum(serialize = "NO_USER_RESPONSE")]
    NoUserResponse = 18,
    #[strum(serialize = "NO_ANSWER")]
    NoAnswer = 19,
    #[strum(serialize = "CALL_REJECTED")]
    CallRejected = 21,
    #[strum(serialize = "DESTINATION_OUT_OF_ORDER")]
    DestinationOutOfOrder = 27,
    #[strum(serialize = "INVALID_NUMBER_FORMAT")]
    InvalidNumberFormat = 28,
    #[strum(serialize = "NORMAL_UNSPECIFIED")]
    NormalUnspecified = 31,
    #[strum(serialize = "CONGESTION")]
    Congestion = 34,
    #[strum(serialize = "FAILURE")]
    Failure = 38,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum ControlKind {
    Hangup(HangupCause),
    Ring,
    Ringing,
    Answer,
    Busy,
    TakeOffHook,
    OffHook,
    Congestion,
    Flash,
    Wink,
    Progress,
    Proceeding,
    Hold,
    Unhold,
    VidUpdate,
    SrcUpdate,
    T38Parameters,
    Forbidden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Voice(Format),
    Video { format: Format, marker: bool },
    Image(Format),
    Text(Format),
    DtmfBegin(char),
    DtmfEnd(char),
    Control(ControlKind),
    // comfort noise, level in -dBov
    Cng(u8),
    Null,
}

/// A unit of media or signalling moving through a channel.
///
/// Frames are moved, never shared: whoever holds a `Frame` owns it.
#[derive(Debug, Clone)]
pub struct Frame {
    pub kind: FrameKind,
    pub data: Bytes,
    pub samples: u32,
    pub delivery: Option<Instant>,
    pub seqno: u16,
    pub ts: u32,
    // duration in ms
    pub len: u32,
    pub src: &'static str,
}

impl Frame {
    pub fn new(kind: FrameKind, data: Bytes) -> Self {
        Self {
            kind,
            data,
            samples: 0,
            delivery: None,
            seqno: 0,
            ts: 0,
            len: 0,
            src: "",
        }
    }

    pub fn null() -> Self {
        Self::new(FrameKind::Null, Bytes::new())
    }

    pub fn voice(format: Format, data: Bytes) -> Self {
        let samples = format.bytes_to_samples(data.len());
        let mut frame = Self::new(FrameKind::Voice(format), data);
        frame.samples = samples;
        frame.len = samples * 1000 / format.sample_rate();
        frame
    }

    /// Signed linear voice, stored little endian.
    pub fn slinear(format: Format, pcm: &[i16]) -> Self {
        let mut buf = BytesMut::with_capacity(pcm.len() * 2);
        for sample in pcm {
            buf.put_i16_le(*sample);
        }
        Self::voice(format, buf.freeze())
    }

    pub fn video(format: Format, marker: bool, data: Bytes) -> Self {
        Self::new(FrameKind::Video { format, marker }, data)
    }

    pub fn text(format: Format, text: &str) -> Self {
        Self::new(FrameKind::Text(format), Bytes::copy_from_slice(text.as_bytes()))
    }

    pub fn dtmf_begin(digit: char) -> Self {
        Self::new(FrameKind::DtmfBegin(digit), Bytes::new())
    }

    pub fn dtmf_end(digit: char, len_ms: u32) -> Self {
        let mut frame = Self::new(FrameKind::DtmfEnd(digit), Bytes::new());
        frame.len = len_ms;
        frame
    }

    pub fn control(kind: ControlKind) -> Self {
        Self::new(FrameKind::Control(kind), Bytes::new())
    }

    pub fn control_data(kind: ControlKind, data: &[u8]) -> Self {
        Self::new(FrameKind::Control(kind), Bytes::copy_from_slice(data))
    }

    pub fn cng(level: u8) -> Self {
        Self::new(FrameKind::Cng(level & 0x7f), Bytes::new())
    }

    pub fn is_null(&self) -> bool {
        self.kind == FrameKind::Null
    }

    pub fn format(&self) -> Option<Format> {
        match self.kind {
            FrameKind::Voice(f) | FrameKind::Image(f) | FrameKind::Text(f) => Some(f),
            FrameKind::Video { format, .. } => Some(format),
            _ => None,
        }
    }

    pub fn is_voice(&self) -> bool {
        matches!(self.kind, FrameKind::Voice(_))
    }

    pub fn is_dtmf(&self) -> bool {
        matches!(self.kind, FrameKind::DtmfBegin(_) | FrameKind::DtmfEnd(_))
    }

    /// Decoded samples of a signed linear voice frame.
    pub fn pcm(&self) -> Vec<i16> {
        self.data
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect()
    }

    pub fn text_payload(&self) -> Option<&str> {
        std::str::from_utf8(&self.data).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voice_len() {
        let frame = Frame::voice(Format::Ulaw, Bytes::from(vec![0xffu8; 160]));
        assert_eq!(frame.samples, 160);
        assert_eq!(frame.len, 20);

        let frame = Frame::voice(Format::G722, Bytes::from(vec![0u8; 160]));
        assert_eq!(frame.samples, 320);
        assert_eq!(frame.len, 20);
    }

    #[test]
    fn slinear_pcm() {
        let frame = Frame::slinear(Format::Slinear, &[1, -2, 32767]);
        assert_eq!(frame.samples, 3);
        assert_eq!(frame.pcm(), vec![1, -2, 32767]);
    }

    #[test]
    fn control_prompt() {
        let frame = Frame::control_data(ControlKind::TakeOffHook, b"invalid-password");
        assert_eq!(frame.kind, FrameKind::Control(ControlKind::TakeOffHook));
        assert_eq!(frame.text_payload(), Some("invalid-password"));
        assert_eq!(HangupCause::NormalClearing as u8, 16);
        assert_eq!(HangupCause::NormalClearing.to_string(), "NORMAL_CLEARING");
    }
}

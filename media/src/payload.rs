//! Payload type mapping.
//!
//! A static default table covers the well known payload types; every
//! session starts from a copy of it and negotiation rewrites entries. The
//! MIME table resolves `a=rtpmap` style (type, subtype, rate) triples.

use anyhow::Result;
use lazy_static::lazy_static;
use thiserror::Error;
use trismedia_codec::{Format, FormatMask};

pub const MAX_PAYLOAD_TYPE: usize = 256;

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("payload type {0} out of range")]
    OutOfRange(usize),

    #[error("unknown mime type {0}/{1}")]
    UnknownMime(String, String),
}

/// What a payload type carries: a native media format, or one of the rtp
/// level event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Payload {
    Format(Format),
    Dtmf,
    CiscoDtmf,
    Cn,
}

impl Payload {
    pub fn is_native(&self) -> bool {
        matches!(self, Payload::Format(_))
    }

    pub fn format(&self) -> Option<Format> {
        match self {
            Payload::Format(f) => Some(*f),
            _ => None,
        }
    }
}

pub struct MimeType {
    pub payload: Payload,
    pub media: &'static str,
    pub subtype: &'static str,
    pub rate: u32,
}

const fn mime(payload: Payload, media: &'static str, subtype: &'static str, rate: u32) -> MimeType {
    MimeType {
        payload,
        media,
        subtype,
        rate,
    }
}

// definition order matters, resolution picks the first match
pub const MIME_TYPES: &[MimeType] = &[
    mime(Payload::Format(Format::G723), "audio", "G723", 8000),
    mime(Payload::Format(Format::Gsm), "audio", "GSM", 8000),
    mime(Payload::Format(Format::Ulaw), "audio", "PCMU", 8000),
    mime(Payload::Format(Format::Ulaw), "audio", "G711U", 8000),
    mime(Payload::Format(Format::Alaw), "audio", "PCMA", 8000),
    mime(Payload::Format(Format::Alaw), "audio", "G711A", 8000),
    mime(Payload::Format(Format::G726), "audio", "G726-32", 8000),
    mime(Payload::Format(Format::Adpcm), "audio", "DVI4", 8000),
    mime(Payload::Format(Format::Slinear), "audio", "L16", 8000),
    mime(Payload::Format(Format::Slinear16), "audio", "L16", 16000),
    mime(Payload::Format(Format::Lpc10), "audio", "LPC", 8000),
    mime(Payload::Format(Format::G729), "audio", "G729", 8000),
    mime(Payload::Format(Format::G729), "audio", "G729A", 8000),
    mime(Payload::Format(Format::G729), "audio", "G.729", 8000),
    mime(Payload::Format(Format::Speex), "audio", "speex", 8000),
    mime(Payload::Format(Format::Ilbc), "audio", "iLBC", 8000),
    mime(Payload::Format(Format::G722), "audio", "G722", 8000),
    mime(Payload::Format(Format::G726Aal2), "audio", "AAL2-G726-32", 8000),
    mime(Payload::Dtmf, "audio", "telephone-event", 8000),
    mime(Payload::CiscoDtmf, "audio", "cisco-telephone-event", 8000),
    mime(Payload::Cn, "audio", "CN", 8000),
    mime(Payload::Format(Format::Jpeg), "video", "JPEG", 90000),
    mime(Payload::Format(Format::Png), "video", "PNG", 90000),
    mime(Payload::Format(Format::H261), "video", "H261", 90000),
    mime(Payload::Format(Format::H263), "video", "H263", 90000),
    mime(Payload::Format(Format::H263p), "video", "h263-1998", 90000),
    mime(Payload::Format(Format::H264), "video", "H264", 90000),
    mime(Payload::Format(Format::Mp4), "video", "MP4V-ES", 90000),
    mime(Payload::Format(Format::T140Red), "text", "RED", 1000),
    mime(Payload::Format(Format::T140), "text", "T140", 1000),
    mime(Payload::Format(Format::Siren7), "audio", "G7221", 16000),
    mime(Payload::Format(Format::Siren14), "audio", "G7221", 32000),
];

lazy_static! {
    pub static ref STATIC_PAYLOAD_TYPES: [Option<Payload>; MAX_PAYLOAD_TYPE] = {
        let f = |format: Format| Some(Payload::Format(format));
        let mut table = [None; MAX_PAYLOAD_TYPE];
        table[0] = f(Format::Ulaw);
        #[cfg(feature = "deprecated-g726")]
        {
            table[2] = f(Format::G726);
        }
        table[3] = f(Format::Gsm);
        table[4] = f(Format::G723);
        table[5] = f(Format::Adpcm);
        table[6] = f(Format::Adpcm);
        table[7] = f(Format::Lpc10);
        table[8] = f(Format::Alaw);
        table[9] = f(Format::G722);
        table[10] = f(Format::Slinear);
        table[11] = f(Format::Slinear);
        table[13] = Some(Payload::Cn);
        table[16] = f(Format::Adpcm);
        table[17] = f(Format::Adpcm);
        table[18] = f(Format::G729);
        table[19] = Some(Payload::Cn);
        table[26] = f(Format::Jpeg);
        table[31] = f(Format::H261);
        table[34] = f(Format::H263);
        table[97] = f(Format::Ilbc);
        table[98] = f(Format::H263p);
        table[99] = f(Format::H264);
        table[101] = Some(Payload::Dtmf);
        table[102] = f(Format::Siren7);
        table[103] = f(Format::H263p);
        table[104] = f(Format::Mp4);
        table[105] = f(Format::T140Red);
        table[106] = f(Format::T140);
        table[110] = f(Format::Speex);
        table[111] = f(Format::G726);
        table[112] = f(Format::G726Aal2);
        table[115] = f(Format::Siren14);
        table[117] = f(Format::Slinear16);
        table[121] = Some(Payload::CiscoDtmf);
        table
    };
}

/// Per session payload table with a one entry reverse lookup cache.
#[derive(Clone)]
pub struct PayloadRegistry {
    table: [Option<Payload>; MAX_PAYLOAD_TYPE],
    cache: Option<(Payload, u8)>,
}

impl Default for PayloadRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PayloadRegistry {
    pub fn new() -> Self {
        Self {
            table: *STATIC_PAYLOAD_TYPES,
            cache: None,
        }
    }

    pub fn clear(&mut self) {
        self.table = [None; MAX_PAYLOAD_TYPE];
        self.cache = None;
    }

    pub fn reset_default(&mut self) {
        self.table = *STATIC_PAYLOAD_TYPES;
        self.cache = None;
    }

    pub fn copy_from(&mut self, other: &PayloadRegistry) {
        self.table = other.table;
        self.cache = None;
    }

    pub fn set(&mut self, pt: usize, payload: Payload) -> Result<()> {
        if pt >= MAX_PAYLOAD_TYPE {
            return Err(PayloadError::OutOfRange(pt))?;
        }
        self.table[pt] = Some(payload);
        self.cache = None;
        Ok(())
    }

    pub fn unset(&mut self, pt: usize) {
        if pt < MAX_PAYLOAD_TYPE {
            self.table[pt] = None;
            self.cache = None;
        }
    }

    /// Take the static meaning of `pt`, used for `m=` lines that list a
    /// payload type without an rtpmap.
    pub fn set_static(&mut self, pt: usize) {
        if pt < MAX_PAYLOAD_TYPE {
            if let Some(payload) = STATIC_PAYLOAD_TYPES[pt] {
                self.table[pt] = Some(payload);
                self.cache = None;
            }
        }
    }

    /// Bind `pt` to the first MIME table entry matching the triple. A zero
    /// `rate` matches any rate.
    pub fn set_rtpmap(
        &mut self,
        pt: usize,
        media: &str,
        subtype: &str,
        rate: u32,
        g726_nonstandard: bool,
    ) -> Result<Payload> {
        if pt >= MAX_PAYLOAD_TYPE {
            return Err(PayloadError::OutOfRange(pt))?;
        }
        let found = MIME_TYPES.iter().find(|m| {
            m.media.eq_ignore_ascii_case(media)
                && m.subtype.eq_ignore_ascii_case(subtype)
                && (rate == 0 || m.rate == rate)
        });
        let mime = match found {
            Some(mime) => mime,
            None => {
                return Err(PayloadError::UnknownMime(
                    media.to_string(),
                    subtype.to_string(),
                ))?
            }
        };
        let mut payload = mime.payload;
        if payload == Payload::Format(Format::G726) && g726_nonstandard {
            payload = Payload::Format(Format::G726Aal2);
        }
        self.table[pt] = Some(payload);
        self.cache = None;
        Ok(payload)
    }

    pub fn code_of(&self, pt: usize) -> Option<Payload> {
        self.table.get(pt).copied().flatten()
    }

    /// Reverse lookup, session table first then the static table.
    pub fn pt_of(&mut self, payload: Payload) -> Option<u8> {
        if let Some((cached, pt)) = self.cache {
            // the cached slot may have been rewritten since
            if cached == payload && self.table[pt as usize] == Some(payload) {
                return Some(pt);
            }
        }
        let pt = self
            .table
            .iter()
            .position(|p| *p == Some(payload))
            .or_else(|| STATIC_PAYLOAD_TYPES.iter().position(|p| *p == Some(payload)))?;
        let pt = pt as u8;
        self.cache = Some((payload, pt));
        Some(pt)
    }

    pub fn formats(&self) -> FormatMask {
        self.table.iter().flatten().filter_map(|p| p.format()).collect()
    }

    pub fn has(&self, payload: Payload) -> bool {
        self.table.iter().any(|p| *p == Some(payload))
    }

    pub fn iter(&self) -> impl Iterator<Item = (u8, Payload)> + '_ {
        self.table
            .iter()
            .enumerate()
            .filter_map(|(pt, p)| p.map(|p| (pt as u8, p)))
    }
}

pub fn mime_subtype(payload: Payload) -> Option<&'static str> {
    MIME_TYPES
        .iter()
        .find(|m| m.payload == payload)
        .map(|m| m.subtype)
}

// rtp clock of a payload
pub fn rate_of(payload: Payload) -> u32 {
    match payload {
        Payload::Format(f) => f.rtp_clock_rate(),
        _ => 8000,
    }
}

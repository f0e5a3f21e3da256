use std::fmt;

use serde::{Deserialize, Serialize};
use strum_macros::{self, EnumIter, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Image,
    Video,
    Text,
}

/// Codec identifiers. Each one owns a single bit of a [`FormatMask`].
#[derive(
    Deserialize,
    Serialize,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    strum_macros::Display,
    EnumString,
    EnumIter,
)]
#[repr(u8)]
pub enum Format {
    #[strum(serialize = "g723")]
    G723 = 0,
    #[strum(serialize = "gsm")]
    Gsm = 1,
    #[strum(serialize = "ulaw")]
    Ulaw = 2,
    #[strum(serialize = "alaw")]
    Alaw = 3,
    #[strum(serialize = "g726aal2")]
    G726Aal2 = 4,
    #[strum(serialize = "adpcm")]
    Adpcm = 5,
    #[strum(serialize = "slin")]
    Slinear = 6,
    #[strum(serialize = "lpc10")]
    Lpc10 = 7,
    #[strum(serialize = "g729")]
    G729 = 8,
    #[strum(serialize = "speex")]
    Speex = 9,
    #[strum(serialize = "ilbc")]
    Ilbc = 10,
    #[strum(serialize = "g726")]
    G726 = 11,
    #[strum(serialize = "g722")]
    G722 = 12,
    #[strum(serialize = "siren7")]
    Siren7 = 13,
    #[strum(serialize = "siren14")]
    Siren14 = 14,
    #[strum(serialize = "slin16")]
    Slinear16 = 15,
    #[strum(serialize = "jpeg")]
    Jpeg = 16,
    #[strum(serialize = "png")]
    Png = 17,
    #[strum(serialize = "h261")]
    H261 = 18,
    #[strum(serialize = "h263")]
    H263 = 19,
    #[strum(serialize = "h263p")]
    H263p = 20,
    #[strum(serialize = "h264")]
    H264 = 21,
    #[strum(serialize = "mpeg4")]
    Mp4 = 22,
    #[strum(serialize = "t140red")]
    T140Red = 26,
    #[strum(serialize = "t140")]
    T140 = 27,
}

impl Format {
    pub fn mask(self) -> FormatMask {
        FormatMask(1 << self as u8)
    }

    pub fn kind(self) -> MediaKind {
        use Format::*;
        match self {
            Jpeg | Png => MediaKind::Image,
            H261 | H263 | H263p | H264 | Mp4 => MediaKind::Video,
            T140 | T140Red => MediaKind::Text,
            _ => MediaKind::Audio,
        }
    }

    pub fn is_audio(self) -> bool {
        self.kind() == MediaKind::Audio
    }

    // rate at which samples are produced
    pub fn sample_rate(self) -> u32 {
        use Format::*;
        match self {
            G722 | Siren7 | Slinear16 => 16000,
            Siren14 => 32000,
            Jpeg | Png | H261 | H263 | H263p | H264 | Mp4 => 90000,
            T140 | T140Red => 1000,
            _ => 8000,
        }
    }

    // rate the rtp timestamp advances at, G.722 is historically signalled as 8000
    pub fn rtp_clock_rate(self) -> u32 {
        match self {
            Format::G722 => 8000,
            _ => self.sample_rate(),
        }
    }

    /// Convert a sample count into rtp timestamp units.
    pub fn rtp_samples(self, samples: u32) -> u32 {
        let clock = self.rtp_clock_rate() as u64;
        let rate = self.sample_rate() as u64;
        (samples as u64 * clock / rate) as u32
    }

    /// Number of samples carried by `len` bytes of this codec, 0 when the
    /// codec has no fixed relationship.
    pub fn bytes_to_samples(self, len: usize) -> u32 {
        use Format::*;
        let len = len as u32;
        match self {
            Ulaw | Alaw => len,
            Slinear | Slinear16 => len / 2,
            G726 | G726Aal2 | Adpcm | G722 => len * 2,
            Gsm => len / 33 * 160,
            G729 => len / 10 * 80 + if len % 10 >= 2 { 80 } else { 0 },
            G723 => len / 24 * 240,
            Ilbc => len / 50 * 240,
            Lpc10 => len / 7 * 180,
            Siren7 => len / 80 * 320,
            Siren14 => len / 120 * 640,
            _ => 0,
        }
    }

    pub fn samples_to_bytes(self, samples: u32) -> usize {
        use Format::*;
        let bytes = match self {
            Ulaw | Alaw => samples,
            Slinear | Slinear16 => samples * 2,
            G726 | G726Aal2 | Adpcm | G722 => samples / 2,
            Gsm => samples / 160 * 33,
            G729 => samples / 80 * 10,
            G723 => samples / 240 * 24,
            Ilbc => samples / 240 * 50,
            Lpc10 => samples / 180 * 7,
            Siren7 => samples / 320 * 80,
            Siren14 => samples / 640 * 120,
            _ => 0,
        };
        bytes as usize
    }

    // default packetisation in ms, 0 for codecs the smoother leaves alone
    pub fn default_framing(self) -> u32 {
        use Format::*;
        match self {
            Ulaw | Alaw | Slinear | Slinear16 | G722 | G726 | G726Aal2 | Adpcm | Gsm | G729
            | Siren7 | Siren14 => 20,
            G723 | Ilbc => 30,
            _ => 0,
        }
    }

    // smallest framing the codec can be cut at
    pub fn min_framing(self) -> u32 {
        use Format::*;
        match self {
            Ulaw | Alaw | Slinear | Slinear16 | G722 | G726 | G726Aal2 | Adpcm | G729 => 10,
            G723 | Ilbc => 30,
            _ => 20,
        }
    }

    /// Whether this is one of the signed linear formats the mixer runs on.
    pub fn is_slinear(self) -> bool {
        matches!(self, Format::Slinear | Format::Slinear16)
    }

    pub fn from_bit(bit: u8) -> Option<Format> {
        use strum::IntoEnumIterator;
        Format::iter().find(|f| *f as u8 == bit)
    }
}

/// A set of [`Format`]s.
#[derive(Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FormatMask(pub u64);

impl FormatMask {
    pub const EMPTY: FormatMask = FormatMask(0);

    pub fn audio() -> FormatMask {
        FormatMask((1 << 16) - 1)
    }

    pub fn contains(&self, format: Format) -> bool {
        self.0 & format.mask().0 != 0
    }

    pub fn insert(&mut self, format: Format) {
        self.0 |= format.mask().0;
    }

    pub fn remove(&mut self, format: Format) {
        self.0 &= !format.mask().0;
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn intersection(&self, other: FormatMask) -> FormatMask {
        FormatMask(self.0 & other.0)
    }

    pub fn union(&self, other: FormatMask) -> FormatMask {
        FormatMask(self.0 | other.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = Format> + '_ {
        use strum::IntoEnumIterator;
        Format::iter().filter(move |f| self.contains(*f))
    }

    /// First format of the mask in bit order, which is also the preferred
    /// order used when nothing better is known.
    pub fn first(&self) -> Option<Format> {
        self.iter().next()
    }

    pub fn first_audio(&self) -> Option<Format> {
        self.iter().find(|f| f.is_audio())
    }
}

impl From<Format> for FormatMask {
    fn from(format: Format) -> Self {
        format.mask()
    }
}

impl FromIterator<Format> for FormatMask {
    fn from_iter<T: IntoIterator<Item = Format>>(iter: T) -> Self {
        let mut mask = FormatMask::EMPTY;
        for format in iter {
            mask.insert(format);
        }
        mask
    }
}

impl fmt::Debug for FormatMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.iter().map(|f| f.to_string()).collect();
        write!(f, "0x{:x} ({})", self.0, names.join("|"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn names() {
        assert_eq!(Format::Ulaw.to_string(), "ulaw");
        assert_eq!(Format::from_str("g722").unwrap(), Format::G722);
        assert_eq!(Format::from_bit(3), Some(Format::Alaw));
        assert_eq!(Format::from_bit(25), None);
    }

    #[test]
    fn g722_clock() {
        assert_eq!(Format::G722.sample_rate(), 16000);
        assert_eq!(Format::G722.rtp_clock_rate(), 8000);
        assert_eq!(Format::G722.rtp_samples(320), 160);
        assert_eq!(Format::Ulaw.rtp_samples(160), 160);
        assert_eq!(Format::G722.bytes_to_samples(160), 320);
    }

    #[test]
    fn mask_ops() {
        let mut mask: FormatMask = [Format::Ulaw, Format::H264].into_iter().collect();
        assert!(mask.contains(Format::Ulaw));
        assert!(!mask.contains(Format::Alaw));
        assert_eq!(mask.first_audio(), Some(Format::Ulaw));
        mask.remove(Format::Ulaw);
        assert_eq!(mask.first_audio(), None);
        assert_eq!(mask.first(), Some(Format::H264));
        assert!(FormatMask::audio().contains(Format::Slinear16));
        assert!(!FormatMask::audio().contains(Format::Jpeg));
    }
}

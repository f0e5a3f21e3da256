use anyhow::Result;
use thiserror::Error;

use crate::{pcma::PCMA, pcmu::PCMU, Codec, Format, FormatMask, Frame, FrameKind};

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("no translation path from {0} to {1}")]
    NoPath(Format, Format),

    #[error("frame is not voice")]
    NotVoice,
}

// formats we can get to and from signed linear
const TRANSLATABLE: [Format; 4] = [Format::Ulaw, Format::Alaw, Format::Slinear, Format::Slinear16];

fn companding(format: Format) -> Option<Box<dyn Codec>> {
    match format {
        Format::Ulaw => Some(Box::new(PCMU::new())),
        Format::Alaw => Some(Box::new(PCMA::new())),
        _ => None,
    }
}

pub fn can_translate(from: Format, to: Format) -> bool {
    from == to || (TRANSLATABLE.contains(&from) && TRANSLATABLE.contains(&to))
}

/// Pick the cheapest (source, destination) pair out of two masks, a
/// format common to both wins outright.
pub fn best_choice(dst: FormatMask, src: FormatMask) -> Option<(Format, Format)> {
    let common = dst.intersection(src).intersection(FormatMask::audio());
    if let Some(format) = common.first() {
        return Some((format, format));
    }
    for to in dst.iter().filter(|f| f.is_audio()) {
        for from in src.iter().filter(|f| f.is_audio()) {
            if can_translate(from, to) {
                return Some((from, to));
            }
        }
    }
    None
}

/// Converts voice frames from one format to another through signed linear.
pub struct Translator {
    from: Format,
    to: Format,
    decoder: Option<Box<dyn Codec>>,
    encoder: Option<Box<dyn Codec>>,
}

pub fn translator(from: Format, to: Format) -> Result<Translator> {
    if !can_translate(from, to) {
        return Err(TranslateError::NoPath(from, to))?;
    }
    Ok(Translator {
        from,
        to,
        decoder: companding(from),
        encoder: companding(to),
    })
}

impl Translator {
    pub fn from(&self) -> Format {
        self.from
    }

    pub fn to(&self) -> Format {
        self.to
    }

    pub fn translate(&mut self, frame: Frame) -> Result<Frame> {
        match frame.kind {
            FrameKind::Voice(f) if f == self.from => {}
            FrameKind::Voice(f) if f == self.to => return Ok(frame),
            _ => return Err(TranslateError::NotVoice)?,
        }
        if self.from == self.to {
            return Ok(frame);
        }

        let mut pcm = match self.decoder.as_mut() {
            Some(decoder) => {
                let mut pcm = vec![0i16; frame.data.len()];
                let n = decoder.decode(&frame.data, &mut pcm)?;
                pcm.truncate(n);
                pcm
            }
            None => frame.pcm(),
        };

        let (from_rate, to_rate) = (self.from.sample_rate(), self.to.sample_rate());
        if from_rate > to_rate {
            pcm = downsample(&pcm);
        } else if from_rate < to_rate {
            pcm = upsample(&pcm);
        }

        let mut out = match self.encoder.as_mut() {
            Some(encoder) => {
                let mut data = vec![0u8; pcm.len()];
                let n = encoder.encode(&pcm, &mut data)?;
                data.truncate(n);
                Frame::voice(self.to, data.into())
            }
            None => Frame::slinear(self.to, &pcm),
        };
        out.delivery = frame.delivery;
        out.seqno = frame.seqno;
        out.ts = frame.ts;
        out.src = frame.src;
        Ok(out)
    }
}

// 16k to 8k, average of each pair
fn downsample(pcm: &[i16]) -> Vec<i16> {
    pcm.chunks(2)
        .map(|c| (c.iter().map(|s| *s as i32).sum::<i32>() / c.len() as i32) as i16)
        .collect()
}

// 8k to 16k, linear interpolation
fn upsample(pcm: &[i16]) -> Vec<i16> {
    let mut out = Vec::with_capacity(pcm.len() * 2);
    for (i, sample) in pcm.iter().enumerate() {
        let next = pcm.get(i + 1).copied().unwrap_or(*sample);
        out.push(*sample);
        out.push(((*sample as i32 + next as i32) / 2) as i16);
    }
    out
}

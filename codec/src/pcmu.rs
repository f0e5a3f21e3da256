use anyhow::Result;

use crate::Codec;

const BIAS: i32 = 0x84;
const CLIP: i32 = 32635;
const SEG_END: [i32; 8] = [0xff, 0x1ff, 0x3ff, 0x7ff, 0xfff, 0x1fff, 0x3fff, 0x7fff];

pub fn encode_sample(pcm: i16) -> u8 {
    let mut value = pcm as i32;
    let mask = if value < 0 {
        value = -value;
        0x7f
    } else {
        0xff
    };
    value = value.min(CLIP) + BIAS;

    match SEG_END.iter().position(|end| value <= *end) {
        Some(seg) => {
            let ulaw = ((seg as i32) << 4) | ((value >> (seg + 3)) & 0xf);
            (ulaw ^ mask) as u8
        }
        None => (0x7f ^ mask) as u8,
    }
}

pub fn decode_sample(ulaw: u8) -> i16 {
    let ulaw = !ulaw as i32;
    let mut t = ((ulaw & 0xf) << 3) + BIAS;
    t <<= (ulaw & 0x70) >> 4;
    if ulaw & 0x80 != 0 {
        (BIAS - t) as i16
    } else {
        (t - BIAS) as i16
    }
}

#[derive(Default)]
pub struct PCMU {}

impl PCMU {
    pub fn new() -> Self {
        Self {}
    }
}

impl Codec for PCMU {
    fn encode(&mut self, src: &[i16], dst: &mut [u8]) -> Result<usize> {
        let n = src.len().min(dst.len());
        for (out, sample) in dst.iter_mut().zip(src) {
            *out = encode_sample(*sample);
        }
        Ok(n)
    }

    fn decode(&mut self, src: &[u8], dst: &mut [i16]) -> Result<usize> {
        let n = src.len().min(dst.len());
        for (out, byte) in dst.iter_mut().zip(src) {
            *out = decode_sample(*byte);
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence() {
        assert_eq!(encode_sample(0), 0xff);
        assert_eq!(decode_sample(0xff), 0);
        assert_eq!(decode_sample(0x7f), 0);
    }

    #[test]
    fn quantisation_error() {
        for pcm in (-32000i32..32000).step_by(97) {
            let back = decode_sample(encode_sample(pcm as i16)) as i32;
            let err = (back - pcm).abs();
            // segment step doubles per segment, 1024 at the top
            assert!(err <= 1024, "{} -> {}", pcm, back);
            assert!(back.signum() * pcm.signum() >= 0, "{}", pcm);
        }
    }

    #[test]
    fn codec_trait() {
        let mut codec = PCMU::new();
        let mut encoded = [0u8; 4];
        assert_eq!(codec.encode(&[0, 1000, -1000, 32767], &mut encoded).unwrap(), 4);
        let mut decoded = [0i16; 4];
        assert_eq!(codec.decode(&encoded, &mut decoded).unwrap(), 4);
        assert_eq!(decoded[0], 0);
        assert!(decoded[1] > 900 && decoded[1] < 1100);
        assert!(decoded[2] < -900 && decoded[2] > -1100);
    }
}

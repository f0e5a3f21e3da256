use anyhow::Result;

use crate::Codec;

const SEG_END: [i32; 8] = [0x1f, 0x3f, 0x7f, 0xff, 0x1ff, 0x3ff, 0x7ff, 0xfff];

pub fn encode_sample(pcm: i16) -> u8 {
    let mut value = (pcm as i32) >> 3;
    let mask = if value >= 0 {
        0xd5
    } else {
        value = -value - 1;
        0x55
    };

    match SEG_END.iter().position(|end| value <= *end) {
        Some(seg) => {
            let mut alaw = (seg as i32) << 4;
            if seg < 2 {
                alaw |= (value >> 1) & 0xf;
            } else {
                alaw |= (value >> seg) & 0xf;
            }
            (alaw ^ mask) as u8
        }
        None => (0x7f ^ mask) as u8,
    }
}

pub fn decode_sample(alaw: u8) -> i16 {
    let alaw = (alaw ^ 0x55) as i32;
    let mut t = (alaw & 0xf) << 4;
    let seg = (alaw & 0x70) >> 4;
    match seg {
        0 => t += 8,
        1 => t += 0x108,
        _ => {
            t += 0x108;
            t <<= seg - 1;
        }
    }
    if alaw & 0x80 != 0 {
        t as i16
    } else {
        -t as i16
    }
}

#[derive(Default)]
pub struct PCMA {}

impl PCMA {
    pub fn new() -> Self {
        Self {}
    }
}

impl Codec for PCMA {
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
        assert_eq!(encode_sample(0), 0xd5);
        assert_eq!(decode_sample(0xd5), 8);
    }

    #[test]
    fn quantisation_error() {
        for pcm in (-32000i32..32000).step_by(89) {
            let back = decode_sample(encode_sample(pcm as i16)) as i32;
            assert!((back - pcm).abs() <= 1024, "{} -> {}", pcm, back);
        }
    }
}

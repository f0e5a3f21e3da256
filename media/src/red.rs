//! T.140 text redundancy (RFC 2198 framing).
//!
//! Each emitted payload carries `num_gen` older generations ahead of the
//! primary block so a receiver can rebuild text across small losses.

use std::collections::VecDeque;

const REPLACEMENT_CHAR: &[u8] = "\u{fffd}".as_bytes();
// drops larger than this are not worth marking
const MAX_MARKED_GAP: i32 = 10;

#[derive(Debug, Clone)]
struct Generation {
    // ms clock at which the block was primary
    ts: u32,
    data: Vec<u8>,
}

pub struct RedEncoder {
    // payload types, redundant generations first then the primary
    pts: Vec<u8>,
    num_gen: usize,
    ti: u32,
    generations: VecDeque<Generation>,
    buffer: Vec<u8>,
}

impl RedEncoder {
    /// `pts` lists one payload type per generation followed by the primary
    /// payload type, `ti` is the buffering interval in ms.
    pub fn new(ti: u32, pts: &[u8]) -> Self {
        let num_gen = pts.len().saturating_sub(1);
        Self {
            pts: pts.to_vec(),
            num_gen,
            ti,
            generations: VecDeque::with_capacity(num_gen),
            buffer: Vec::new(),
        }
    }

    pub fn interval(&self) -> u32 {
        self.ti
    }

    pub fn num_gen(&self) -> usize {
        self.num_gen
    }

    /// Queue text for the next primary block.
    pub fn buffer(&mut self, text: &[u8]) {
        self.buffer.extend_from_slice(text);
    }

    /// Shift the generations and build the next payload. Nothing is sent
    /// once every generation has drained.
    pub fn tick(&mut self, now: u32) -> Option<Vec<u8>> {
        let primary = Generation {
            ts: now,
            data: std::mem::take(&mut self.buffer),
        };
        if primary.data.is_empty() && self.generations.iter().all(|g| g.data.is_empty()) {
            self.generations.clear();
            return None;
        }

        let primary_pt = self.pts.last().copied().unwrap_or(0);
        let mut out = Vec::new();
        // oldest generation first
        let skip = self.num_gen.saturating_sub(self.generations.len());
        for (i, generation) in self.generations.iter().enumerate() {
            let pt = self.pts.get(skip + i).copied().unwrap_or(primary_pt);
            let offset = now.wrapping_sub(generation.ts).min(0x3fff);
            let len = generation.data.len().min(0x3ff) as u32;
            out.push(0x80 | (pt & 0x7f));
            out.push((offset >> 6) as u8);
            out.push((((offset & 0x3f) << 2) | (len >> 8)) as u8);
            out.push(len as u8);
        }
        out.push(primary_pt & 0x7f);
        for generation in &self.generations {
            let len = generation.data.len().min(0x3ff);
            out.extend_from_slice(&generation.data[..len]);
        }
        out.extend_from_slice(&primary.data);

        self.generations.push_back(primary);
        while self.generations.len() > self.num_gen {
            self.generations.pop_front();
        }
        Some(out)
    }
}

/// Extract the text a receiver has not seen yet. `gap` is the number of
/// packets lost since the previous one (0 when in order).
pub fn decode_red(payload: &[u8], gap: i32) -> Option<Vec<u8>> {
    // redundant block headers run while the F bit is set
    let mut lens = Vec::new();
    let mut pos = 0;
    while pos < payload.len() && payload[pos] & 0x80 != 0 {
        if pos + 4 > payload.len() {
            return None;
        }
        let len = (((payload[pos + 2] & 0x03) as usize) << 8) | payload[pos + 3] as usize;
        lens.push(len);
        pos += 4;
    }
    if pos >= payload.len() {
        return None;
    }
    let header_len = pos + 1;
    let num_gen = lens.len() as i32;
    let redundant: usize = lens.iter().sum();
    if header_len + redundant > payload.len() {
        return None;
    }
    let body = &payload[header_len..];

    let out = if gap <= 0 {
        body[redundant..].to_vec()
    } else if gap > num_gen && gap < MAX_MARKED_GAP {
        let mut out = REPLACEMENT_CHAR.to_vec();
        out.extend_from_slice(body);
        out
    } else if gap > num_gen {
        body.to_vec()
    } else {
        let skip: usize = lens[..(num_gen - gap) as usize].iter().sum();
        body[skip..].to_vec()
    };
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generations_shift() {
        let mut red = RedEncoder::new(300, &[106, 106, 106]);
        assert!(red.tick(0).is_none());

        red.buffer(b"a");
        let p1 = red.tick(300).unwrap();
        assert_eq!(p1, vec![106, b'a']);

        red.buffer(b"bc");
        let p2 = red.tick(600).unwrap();
        // one redundant block of "a", 300 ms old
        assert_eq!(&p2[..4], &[0x80 | 106, (300 >> 6) as u8, ((300 & 0x3f) << 2) as u8, 1]);
        assert_eq!(&p2[4..], &[106, b'a', b'b', b'c']);

        let p3 = red.tick(900).unwrap();
        assert_eq!(p3.len(), 4 * 2 + 1 + 3);
        assert_eq!(decode_red(&p3, 0), None);
        assert_eq!(decode_red(&p3, 1).unwrap(), b"bc");
        assert_eq!(decode_red(&p3, 2).unwrap(), b"abc");

        red.tick(1200).unwrap();
        assert!(red.tick(1500).is_none());
    }

    #[test]
    fn small_drop_marked() {
        let mut red = RedEncoder::new(300, &[106, 106]);
        red.buffer(b"x");
        red.tick(0);
        red.buffer(b"y");
        let p = red.tick(300).unwrap();
        assert_eq!(decode_red(&p, 0).unwrap(), b"y");
        assert_eq!(decode_red(&p, 1).unwrap(), b"xy");
        let mut expected = "\u{fffd}".as_bytes().to_vec();
        expected.extend_from_slice(b"xy");
        assert_eq!(decode_red(&p, 3).unwrap(), expected);
        assert_eq!(decode_red(&p, 20).unwrap(), b"xy");
    }

    #[test]
    fn malformed() {
        assert_eq!(decode_red(&[0x80 | 106, 0, 0], 0), None);
        assert_eq!(decode_red(&[0x80 | 106, 0, 0, 9, 106, 1], 0), None);
    }
}

use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use bytes::{Buf, BytesMut};
use trismedia_codec::{Format, Frame};

/// Re-chunks outgoing voice into packets of a fixed duration.
pub struct Smoother {
    format: Format,
    framing_ms: u32,
    size: usize,
    buf: BytesMut,
    delivery: Option<Instant>,
}

impl Smoother {
    /// None when the codec has no fixed bytes per ms to cut at.
    pub fn new(format: Format, framing_ms: u32) -> Option<Smoother> {
        let samples = format.sample_rate() / 1000 * framing_ms;
        let size = format.samples_to_bytes(samples);
        if size == 0 {
            return None;
        }
        Some(Smoother {
            format,
            framing_ms,
            size,
            buf: BytesMut::with_capacity(size * 4),
            delivery: None,
        })
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn framing(&self) -> u32 {
        self.framing_ms
    }

    pub fn feed(&mut self, frame: &Frame) -> Result<()> {
        if frame.format() != Some(self.format) {
            return Err(anyhow!(
                "smoother for {} fed {:?}",
                self.format,
                frame.format()
            ));
        }
        if self.buf.is_empty() && frame.delivery.is_some() {
            self.delivery = frame.delivery;
        }
        self.buf.extend_from_slice(&frame.data);
        Ok(())
    }

    pub fn read(&mut self) -> Option<Frame> {
        if self.buf.len() < self.size {
            return None;
        }
        let chunk = self.buf.split_to(self.size).freeze();
        let mut frame = Frame::voice(self.format, chunk);
        frame.delivery = self.delivery;
        if let Some(delivery) = self.delivery.as_mut() {
            *delivery += Duration::from_millis(self.framing_ms as u64);
        }
        Some(frame)
    }

    pub fn pending(&self) -> usize {
        self.buf.remaining()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rechunk() {
        let mut smoother = Smoother::new(Format::Ulaw, 30).unwrap();
        let start = Instant::now();
        let mut frame = Frame::voice(Format::Ulaw, vec![1u8; 160].into());
        frame.delivery = Some(start);
        smoother.feed(&frame).unwrap();
        assert!(smoother.read().is_none());

        smoother
            .feed(&Frame::voice(Format::Ulaw, vec![2u8; 160].into()))
            .unwrap();
        let out = smoother.read().unwrap();
        assert_eq!(out.samples, 240);
        assert_eq!(out.len, 30);
        assert_eq!(out.delivery, Some(start));
        assert_eq!(smoother.pending(), 80);
        assert!(smoother.read().is_none());

        smoother
            .feed(&Frame::voice(Format::Ulaw, vec![3u8; 160].into()))
            .unwrap();
        let out = smoother.read().unwrap();
        assert_eq!(out.delivery, Some(start + Duration::from_millis(30)));
        assert_eq!(&out.data[..80], &[2u8; 80][..]);
    }

    #[test]
    fn wrong_format() {
        let mut smoother = Smoother::new(Format::Alaw, 20).unwrap();
        assert!(smoother
            .feed(&Frame::voice(Format::Ulaw, vec![0u8; 160].into()))
            .is_err());
        assert!(Smoother::new(Format::Speex, 20).is_none());
        assert_eq!(Smoother::new(Format::G722, 20).unwrap().size, 160);
    }
}

// Telephone events on the media path: RFC 2833 and the Cisco variant

use byteorder::{BigEndian, ByteOrder};
use trismedia_codec::{dtmf::Digit, Frame};

pub const DTMF_RATE: u32 = 8000;
// samples covered by each begin or continuation packet
pub const DTMF_STEP: u32 = 160;
pub const DTMF_VOLUME: u8 = 0xa;

const END_BIT: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelephoneEvent {
    pub event: u8,
    pub end: bool,
    pub volume: u8,
    pub duration: u16,
}

impl TelephoneEvent {
    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() < 4 {
            return None;
        }
        Some(Self {
            event: payload[0],
            end: payload[1] & END_BIT != 0,
            volume: payload[1] & 0x3f,
            duration: BigEndian::read_u16(&payload[2..]),
        })
    }

    pub fn encode(&self) -> [u8; 4] {
        let mut buf = [0u8; 4];
        buf[0] = self.event;
        buf[1] = (self.volume & 0x3f) | if self.end { END_BIT } else { 0 };
        BigEndian::write_u16(&mut buf[2..], self.duration);
        buf
    }
}

fn samples_to_ms(samples: u32) -> u32 {
    samples * 1000 / DTMF_RATE
}

/// Reception side event state for one session.
#[derive(Debug, Default)]
pub struct DtmfReceiver {
    // digit currently held down
    resp: Option<char>,
    duration: u32,
    last_event_seq: Option<u16>,
    last_event_ts: Option<u32>,
    // timestamp after which a held digit is forced up
    timeout: Option<u32>,
    cisco_samples: u32,
}

impl DtmfReceiver {
    pub fn current(&self) -> Option<char> {
        self.resp
    }

    fn end(&mut self) -> Frame {
        let digit = self.resp.take().unwrap_or('\0');
        let frame = Frame::dtmf_end(digit, samples_to_ms(self.duration));
        self.duration = 0;
        self.timeout = None;
        frame
    }

    /// Handle one RFC 2833 payload. With `compensate` every distinct event
    /// yields a single END frame and nothing else.
    pub fn process_rfc2833(
        &mut self,
        payload: &[u8],
        seq: u16,
        ts: u32,
        compensate: bool,
        dtmftimeout: u32,
    ) -> Vec<Frame> {
        let mut frames = Vec::new();
        let event = match TelephoneEvent::parse(payload) {
            Some(event) => event,
            None => return frames,
        };
        let resp = match Digit::from_code(event.event) {
            Some(digit) => digit.as_char(),
            None => {
                tracing::debug!("unknown telephone event {}", event.event);
                return frames;
            }
        };
        let samples = event.duration as u32;

        if compensate {
            if self.last_event_ts != Some(ts) || self.resp.map_or(false, |r| r != resp) {
                self.resp = Some(resp);
                self.timeout = None;
                frames.push(Frame::dtmf_end(resp, 0));
                self.last_event_ts = Some(ts);
            }
            return frames;
        }

        // the 16 bit duration field wraps after about 8 seconds
        let mut new_duration = self.duration;
        let last = new_duration & 0xffff;
        if last > 64000 && samples < last {
            new_duration += 0x10000;
        }
        new_duration = (new_duration & !0xffff) | samples;

        if event.end {
            if self.last_event_seq != Some(seq) && self.resp.is_some() {
                self.duration = new_duration;
                frames.push(self.end());
            }
        } else {
            if self.resp.map_or(false, |r| r != resp) {
                // another digit already began, end it first
                frames.push(self.end());
            }
            if self.resp.is_some() {
                self.duration = new_duration;
            } else {
                self.resp = Some(resp);
                self.duration = samples;
                frames.push(Frame::dtmf_begin(resp));
            }
            self.timeout = Some(
                ts.wrapping_add(self.duration)
                    .wrapping_add(dtmftimeout),
            );
        }
        self.last_event_seq = Some(seq);
        frames
    }

    /// Cisco events: `seq | flags | power | event`. Power going non-zero on
    /// a new digit starts it, power dropping to zero ends it.
    pub fn process_cisco(&mut self, payload: &[u8], compensate: bool) -> Vec<Frame> {
        let mut frames = Vec::new();
        if payload.len() < 4 {
            return frames;
        }
        let power = payload[2];
        let resp = match Digit::from_code(payload[3] & 0x1f) {
            Some(digit) => digit.as_char(),
            None => return frames,
        };

        let held = self.resp;
        if (held.is_none() && power != 0) || held.map_or(false, |r| r != resp) {
            self.resp = Some(resp);
            self.cisco_samples = 0;
            if !compensate {
                frames.push(Frame::dtmf_begin(resp));
            }
        } else if held == Some(resp) && power == 0 {
            self.resp = None;
            frames.push(Frame::dtmf_end(resp, samples_to_ms(self.cisco_samples)));
        } else if held == Some(resp) {
            self.cisco_samples += DTMF_STEP;
        }
        frames
    }

    /// Force the held digit up once media shows the sender went quiet.
    pub fn check_timeout(&mut self, ts: u32) -> Option<Frame> {
        let timeout = self.timeout?;
        self.resp?;
        if (ts.wrapping_sub(timeout) as i32) > 0 {
            return Some(self.end());
        }
        None
    }

    pub fn reset(&mut self) {
        *self = DtmfReceiver::default();
    }
}

/// Emission side state of the digit being sent.
#[derive(Debug, Clone, Copy)]
pub struct DtmfSender {
    pub digit: Digit,
    pub payload_type: u8,
    pub duration: u32,
    pub ts: u32,
}

impl DtmfSender {
    pub fn event(&self, end: bool) -> TelephoneEvent {
        TelephoneEvent {
            event: self.digit.code(),
            end,
            volume: DTMF_VOLUME,
            duration: self.duration.min(0xffff) as u16,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trismedia_codec::FrameKind;

    fn event(code: u8, end: bool, duration: u16) -> [u8; 4] {
        TelephoneEvent {
            event: code,
            end,
            volume: 10,
            duration,
        }
        .encode()
    }

    #[test]
    fn begin_continue_end() {
        let mut rx = DtmfReceiver::default();
        let frames = rx.process_rfc2833(&event(5, false, 160), 1, 8000, false, 1200);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].kind, FrameKind::DtmfBegin('5'));

        let frames = rx.process_rfc2833(&event(5, false, 320), 2, 8000, false, 1200);
        assert!(frames.is_empty());

        let frames = rx.process_rfc2833(&event(5, true, 480), 3, 8000, false, 1200);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].kind, FrameKind::DtmfEnd('5'));
        assert_eq!(frames[0].len, 60);

        // retransmitted end packets are swallowed
        assert!(rx.process_rfc2833(&event(5, true, 480), 3, 8000, false, 1200).is_empty());
        assert!(rx.process_rfc2833(&event(5, true, 480), 4, 8000, false, 1200).is_empty());
    }

    #[test]
    fn digit_change_ends_previous() {
        let mut rx = DtmfReceiver::default();
        rx.process_rfc2833(&event(1, false, 160), 1, 100, false, 1200);
        let frames = rx.process_rfc2833(&event(2, false, 160), 2, 900, false, 1200);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].kind, FrameKind::DtmfEnd('1'));
        assert_eq!(frames[1].kind, FrameKind::DtmfBegin('2'));
    }

    #[test]
    fn compensate_single_end() {
        let mut rx = DtmfReceiver::default();
        let frames = rx.process_rfc2833(&event(11, false, 160), 1, 500, true, 1200);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].kind, FrameKind::DtmfEnd('#'));
        assert!(rx.process_rfc2833(&event(11, false, 320), 2, 500, true, 1200).is_empty());
        assert!(rx.process_rfc2833(&event(11, true, 480), 3, 500, true, 1200).is_empty());
        assert_eq!(rx.process_rfc2833(&event(11, false, 160), 4, 2000, true, 1200).len(), 1);
    }

    #[test]
    fn duration_wrap() {
        let mut rx = DtmfReceiver::default();
        rx.process_rfc2833(&event(0, false, 64800), 1, 0, false, 1200);
        rx.process_rfc2833(&event(0, false, 100), 2, 0, false, 1200);
        let frames = rx.process_rfc2833(&event(0, true, 200), 3, 0, false, 1200);
        assert_eq!(frames[0].len, (0x10000 + 200) * 1000 / 8000);
    }

    #[test]
    fn timeout_forces_end() {
        let mut rx = DtmfReceiver::default();
        rx.process_rfc2833(&event(7, false, 160), 1, 1000, false, 1200);
        assert!(rx.check_timeout(2000).is_none());
        let frame = rx.check_timeout(2400).unwrap();
        assert_eq!(frame.kind, FrameKind::DtmfEnd('7'));
        assert!(rx.check_timeout(5000).is_none());
    }

    #[test]
    fn cisco() {
        let mut rx = DtmfReceiver::default();
        let frames = rx.process_cisco(&[1, 0, 10, 3], false);
        assert_eq!(frames[0].kind, FrameKind::DtmfBegin('3'));
        assert!(rx.process_cisco(&[2, 0, 10, 3], false).is_empty());
        let frames = rx.process_cisco(&[3, 0, 0, 3], false);
        assert_eq!(frames[0].kind, FrameKind::DtmfEnd('3'));
        assert_eq!(frames[0].len, 20);
        assert!(rx.process_cisco(&[3, 0], false).is_empty());
    }

    #[test]
    fn event_codec() {
        let parsed = TelephoneEvent::parse(&event(16, true, 800)).unwrap();
        assert_eq!(parsed.event, 16);
        assert!(parsed.end);
        assert_eq!(parsed.volume, 10);
        assert_eq!(parsed.duration, 800);
    }
}

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use parking_lot::Mutex;
use tokio::sync::Notify;
use trismedia_codec::{ControlKind, Format, FormatMask, Frame};

use crate::channel::{Channel, ChannelTech};

#[derive(Default)]
struct Recorded {
    frames: Vec<Frame>,
    hungup: bool,
    answered: bool,
}

/// In-process technology. Everything the core sends to the channel is
/// recorded instead of leaving the process.
pub struct LocalTech {
    formats: FormatMask,
    recorded: Mutex<Recorded>,
    written: Notify,
}

impl LocalTech {
    pub fn new(formats: FormatMask) -> Arc<LocalTech> {
        Arc::new(LocalTech {
            formats,
            recorded: Mutex::new(Recorded::default()),
            written: Notify::new(),
        })
    }

    /// A signed linear channel on a fresh technology.
    pub fn channel(name: &str) -> Arc<Channel> {
        Self::with_formats(name, Format::Slinear.into()).1
    }

    pub fn with_formats(name: &str, formats: FormatMask) -> (Arc<LocalTech>, Arc<Channel>) {
        let tech = Self::new(formats);
        let chan = Channel::new(name, tech.clone());
        (tech, chan)
    }

    /// Everything written so far.
    pub fn frames(&self) -> Vec<Frame> {
        self.recorded.lock().frames.clone()
    }

    pub fn take_frames(&self) -> Vec<Frame> {
        std::mem::take(&mut self.recorded.lock().frames)
    }

    pub fn is_hungup(&self) -> bool {
        self.recorded.lock().hungup
    }

    pub fn is_answered(&self) -> bool {
        self.recorded.lock().answered
    }

    /// Wait until a written frame satisfies `f`, giving up after `timeout`.
    pub async fn wait_for(&self, timeout: Duration, f: impl Fn(&Frame) -> bool) -> Option<Frame> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let written = self.written.notified();
            if let Some(frame) = self.recorded.lock().frames.iter().find(|fr| f(fr)) {
                return Some(frame.clone());
            }
            if tokio::time::timeout_at(deadline, written).await.is_err() {
                return None;
            }
        }
    }

    fn record(&self, frame: Frame) {
        self.recorded.lock().frames.push(frame);
        self.written.notify_waiters();
    }
}

impl ChannelTech for LocalTech {
    fn name(&self) -> &'static str {
        "Local"
    }

    fn capabilities(&self) -> FormatMask {
        self.formats
    }

    fn answer(&self, _chan: &Channel) -> Result<()> {
        self.recorded.lock().answered = true;
        Ok(())
    }

    fn hangup(&self, _chan: &Channel) -> Result<()> {
        self.recorded.lock().hungup = true;
        self.written.notify_waiters();
        Ok(())
    }

    fn write(&self, _chan: &Channel, frame: &Frame) -> Result<()> {
        self.record(frame.clone());
        Ok(())
    }

    fn indicate(&self, _chan: &Channel, condition: ControlKind, data: &[u8]) -> Result<()> {
        self.record(Frame::control_data(condition, data));
        Ok(())
    }

    fn send_digit_begin(&self, _chan: &Channel, digit: char) -> Result<()> {
        self.record(Frame::dtmf_begin(digit));
        Ok(())
    }

    fn send_digit_end(&self, _chan: &Channel, digit: char, duration_ms: u32) -> Result<()> {
        self.record(Frame::dtmf_end(digit, duration_ms));
        Ok(())
    }

    fn send_text(&self, _chan: &Channel, text: &str) -> Result<()> {
        self.record(Frame::text(Format::T140, text));
        Ok(())
    }
}

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use bitflags::bitflags;
use parking_lot::{Mutex, RwLock};
use strum_macros::{self, EnumString};
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use trismedia_codec::{
    translate::{self, Translator},
    ControlKind, Format, FormatMask, Frame, FrameKind, HangupCause,
};
use trismedia_log::MANAGER_TARGET;
use uuid::Uuid;

use crate::bridge::Bridge;
use crate::datastore::{Datastore, DatastoreInfo, DatastoreList};
use crate::rtp_channel::RtpGlue;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel {0} is hung up")]
    HungUp(String),

    #[error("channel {0} can't carry {1}")]
    NoTranslation(String, Format),

    #[error("no common format between {0} and {1}")]
    Incompatible(String, String),

    #[error("channel {0} can't masquerade into itself")]
    SelfMasquerade(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display, EnumString)]
pub enum ChannelState {
    Down,
    Ring,
    Ringing,
    Up,
    Busy,
}

bitflags! {
    /// Why a channel was asked to hang up.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SoftHangup: u32 {
        // the driver saw the far end go away
        const DEV = 1 << 0;
        const TIMEOUT = 1 << 1;
        const SHUTDOWN = 1 << 2;
        // hung up by the core, or masqueraded away
        const EXPLICIT = 1 << 3;
    }
}

/// Driver seam of a channel: how frames and conditions reach the far end.
#[async_trait]
pub trait ChannelTech: Send + Sync {
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> FormatMask;

    async fn call(&self, _chan: &Arc<Channel>, _dest: &str) -> Result<()> {
        Ok(())
    }

    fn answer(&self, _chan: &Channel) -> Result<()> {
        Ok(())
    }

    fn hangup(&self, _chan: &Channel) -> Result<()> {
        Ok(())
    }

    fn write(&self, chan: &Channel, frame: &Frame) -> Result<()>;

    fn indicate(&self, _chan: &Channel, _condition: ControlKind, _data: &[u8]) -> Result<()> {
        Ok(())
    }

    fn send_digit_begin(&self, _chan: &Channel, _digit: char) -> Result<()> {
        Ok(())
    }

    fn send_digit_end(&self, _chan: &Channel, _digit: char, _duration_ms: u32) -> Result<()> {
        Ok(())
    }

    fn send_text(&self, _chan: &Channel, _text: &str) -> Result<()> {
        Ok(())
    }

    fn play(&self, _chan: &Channel, _prompt: &str) -> Result<()> {
        Ok(())
    }

    /// `new` took this technology over from `old` in a masquerade.
    fn fixup(&self, _old: &Channel, _new: &Arc<Channel>) -> Result<()> {
        Ok(())
    }

    /// Media session for native peer to peer bridging, if the driver has one.
    fn rtp_glue(&self) -> Option<RtpGlue> {
        None
    }
}

struct ChannelInner {
    state: ChannelState,
    readq: VecDeque<Frame>,
    softhangup: SoftHangup,
    hungup: bool,
    zombie: bool,
    cause: Option<HangupCause>,
    nativeformats: FormatMask,
    readformat: Option<Format>,
    rawreadformat: Option<Format>,
    writeformat: Option<Format>,
    rawwriteformat: Option<Format>,
    readtrans: Option<Translator>,
    writetrans: Option<Translator>,
    bridge: Weak<Bridge>,
    prompts: Vec<String>,
}

pub struct Channel {
    pub id: String,
    name: RwLock<String>,
    tech: RwLock<Arc<dyn ChannelTech>>,
    inner: Mutex<ChannelInner>,
    datastores: Mutex<DatastoreList>,
    wake: Notify,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("name", &self.name())
            .finish()
    }
}

impl Channel {
    pub fn new(name: &str, tech: Arc<dyn ChannelTech>) -> Arc<Channel> {
        let nativeformats = tech.capabilities();
        let audio = nativeformats.first_audio();
        Arc::new(Channel {
            id: Uuid::new_v4().to_string(),
            name: RwLock::new(name.to_string()),
            tech: RwLock::new(tech),
            inner: Mutex::new(ChannelInner {
                state: ChannelState::Down,
                readq: VecDeque::new(),
                softhangup: SoftHangup::empty(),
                hungup: false,
                zombie: false,
                cause: None,
                nativeformats,
                readformat: audio,
                rawreadformat: audio,
                writeformat: audio,
                rawwriteformat: audio,
                readtrans: None,
                writetrans: None,
                bridge: Weak::new(),
                prompts: Vec::new(),
            }),
            datastores: Mutex::new(DatastoreList::default()),
            wake: Notify::new(),
        })
    }

    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    pub fn set_name(&self, name: &str) {
        *self.name.write() = name.to_string();
    }

    pub fn tech(&self) -> Arc<dyn ChannelTech> {
        self.tech.read().clone()
    }

    pub fn state(&self) -> ChannelState {
        self.inner.lock().state
    }

    pub fn set_state(&self, state: ChannelState) {
        let old = std::mem::replace(&mut self.inner.lock().state, state);
        if old != state {
            debug!(channel = self.name(), "state {} -> {}", old, state);
        }
    }

    pub fn native_formats(&self) -> FormatMask {
        self.inner.lock().nativeformats
    }

    pub fn set_native_formats(&self, formats: FormatMask) {
        self.inner.lock().nativeformats = formats;
    }

    pub fn read_format(&self) -> Option<Format> {
        self.inner.lock().readformat
    }

    pub fn write_format(&self) -> Option<Format> {
        self.inner.lock().writeformat
    }

    /// Format frames come out of [`Channel::read`] in, translating from
    /// whatever native format the driver produces.
    pub fn set_read_format(&self, format: Format) -> Result<()> {
        let mut inner = self.inner.lock();
        let raw = self.pick_native(&inner, format)?;
        inner.readtrans = if raw != format {
            Some(translate::translator(raw, format)?)
        } else {
            None
        };
        inner.readformat = Some(format);
        inner.rawreadformat = Some(raw);
        Ok(())
    }

    /// Format the core hands to [`Channel::write`].
    pub fn set_write_format(&self, format: Format) -> Result<()> {
        let mut inner = self.inner.lock();
        let raw = self.pick_native(&inner, format)?;
        inner.writetrans = if raw != format {
            Some(translate::translator(format, raw)?)
        } else {
            None
        };
        inner.writeformat = Some(format);
        inner.rawwriteformat = Some(raw);
        Ok(())
    }

    fn pick_native(&self, inner: &ChannelInner, format: Format) -> Result<Format> {
        if inner.nativeformats.contains(format) {
            return Ok(format);
        }
        let raw = inner
            .nativeformats
            .iter()
            .filter(|f| f.is_audio())
            .find(|f| translate::can_translate(*f, format));
        match raw {
            Some(raw) => Ok(raw),
            None => Err(ChannelError::NoTranslation(self.name(), format).into()),
        }
    }

    pub async fn call(self: &Arc<Self>, dest: &str) -> Result<()> {
        info!(channel = self.name(), "calling {}", dest);
        self.tech().call(self, dest).await
    }

    pub fn answer(&self) -> Result<()> {
        if self.check_hangup() {
            return Err(ChannelError::HungUp(self.name()))?;
        }
        if self.state() == ChannelState::Up {
            return Ok(());
        }
        self.tech().answer(self)?;
        self.set_state(ChannelState::Up);
        Ok(())
    }

    pub fn queue_frame(&self, frame: Frame) {
        self.inner.lock().readq.push_back(frame);
        self.wake.notify_one();
    }

    pub fn queue_control(&self, kind: ControlKind) {
        self.queue_frame(Frame::control(kind));
    }

    pub fn queue_control_data(&self, kind: ControlKind, data: &[u8]) {
        self.queue_frame(Frame::control_data(kind, data));
    }

    pub fn queue_hangup(&self, cause: HangupCause) {
        self.queue_control(ControlKind::Hangup(cause));
    }

    pub fn softhangup(&self, reason: SoftHangup) {
        self.inner.lock().softhangup |= reason;
        self.wake.notify_one();
    }

    pub fn check_hangup(&self) -> bool {
        let inner = self.inner.lock();
        inner.hungup || inner.zombie || !inner.softhangup.is_empty()
    }

    pub fn is_hungup(&self) -> bool {
        self.inner.lock().hungup
    }

    pub fn is_zombie(&self) -> bool {
        self.inner.lock().zombie
    }

    pub fn hangup_cause(&self) -> Option<HangupCause> {
        self.inner.lock().cause
    }

    pub fn set_hangup_cause(&self, cause: HangupCause) {
        self.inner.lock().cause = Some(cause);
    }

    /// Next frame from the driver, `None` once the channel is hung up.
    pub async fn read(&self) -> Option<Frame> {
        loop {
            if self.check_hangup() {
                return None;
            }
            let frame = {
                let mut inner = self.inner.lock();
                match inner.readq.pop_front() {
                    Some(Frame {
                        kind: FrameKind::Control(ControlKind::Hangup(cause)),
                        ..
                    }) => {
                        inner.cause.get_or_insert(cause);
                        inner.softhangup |= SoftHangup::DEV;
                        return None;
                    }
                    Some(frame) if frame.is_voice() => Some(self.translate_read(&mut inner, frame)),
                    Some(frame) => Some(Some(frame)),
                    None => None,
                }
            };
            match frame {
                Some(Some(frame)) => return Some(frame),
                // untranslatable voice is dropped
                Some(None) => continue,
                None => self.wake.notified().await,
            }
        }
    }

    fn translate_read(&self, inner: &mut ChannelInner, frame: Frame) -> Option<Frame> {
        let format = frame.format()?;
        let readformat = match inner.readformat {
            Some(f) => f,
            None => return Some(frame),
        };
        if format == readformat {
            return Some(frame);
        }
        let stale = inner.readtrans.as_ref().map(|t| t.from()) != Some(format);
        if stale {
            match translate::translator(format, readformat) {
                Ok(trans) => {
                    inner.rawreadformat = Some(format);
                    inner.readtrans = Some(trans);
                }
                Err(e) => {
                    debug!(channel = self.name(), "dropping {} voice: {}", format, e);
                    return None;
                }
            }
        }
        let trans = inner.readtrans.as_mut()?;
        match trans.translate(frame) {
            Ok(frame) => Some(frame),
            Err(e) => {
                debug!(channel = self.name(), "read translation failed: {}", e);
                None
            }
        }
    }

    pub fn write(&self, frame: &Frame) -> Result<()> {
        if self.check_hangup() {
            return Err(ChannelError::HungUp(self.name()))?;
        }
        let tech = self.tech();
        match frame.kind {
            FrameKind::Voice(format) => {
                let frame = self.translate_write(format, frame)?;
                tech.write(self, &frame)
            }
            FrameKind::DtmfBegin(digit) => tech.send_digit_begin(self, digit),
            FrameKind::DtmfEnd(digit) => tech.send_digit_end(self, digit, frame.len),
            FrameKind::Control(kind) => tech.indicate(self, kind, &frame.data),
            FrameKind::Text(_) => match frame.text_payload() {
                Some(text) => tech.send_text(self, text),
                None => Ok(()),
            },
            FrameKind::Null => Ok(()),
            _ => tech.write(self, frame),
        }
    }

    fn translate_write(&self, format: Format, frame: &Frame) -> Result<Frame> {
        let mut inner = self.inner.lock();
        if let Some(trans) = inner.writetrans.as_mut() {
            if trans.from() == format {
                return trans.translate(frame.clone());
            }
        }
        if inner.nativeformats.contains(format) {
            return Ok(frame.clone());
        }
        let raw = self.pick_native(&inner, format)?;
        let mut trans = translate::translator(format, raw)?;
        let out = trans.translate(frame.clone());
        inner.writetrans = Some(trans);
        inner.writeformat = Some(format);
        inner.rawwriteformat = Some(raw);
        out
    }

    pub fn indicate(&self, condition: ControlKind, data: &[u8]) -> Result<()> {
        self.write(&Frame::control_data(condition, data))
    }

    pub fn send_text(&self, text: &str) -> Result<()> {
        self.write(&Frame::text(Format::T140, text))
    }

    /// Play a prompt to the channel.
    pub fn play(&self, prompt: &str) -> Result<()> {
        if self.check_hangup() {
            return Err(ChannelError::HungUp(self.name()))?;
        }
        self.inner.lock().prompts.push(prompt.to_string());
        debug!(channel = self.name(), "playing {}", prompt);
        self.tech().play(self, prompt)
    }

    /// Prompts played so far, oldest first.
    pub fn prompts(&self) -> Vec<String> {
        self.inner.lock().prompts.clone()
    }

    /// Read DTMF until `max` digits, a `#`, or `timeout` between digits.
    pub async fn collect_digits(&self, max: usize, timeout: Duration) -> Result<String> {
        let mut digits = String::new();
        while digits.len() < max {
            let frame = match tokio::time::timeout(timeout, self.read()).await {
                Err(_) => break,
                Ok(None) => Err(ChannelError::HungUp(self.name()))?,
                Ok(Some(frame)) => frame,
            };
            if let FrameKind::DtmfEnd(digit) = frame.kind {
                if digit == '#' {
                    break;
                }
                digits.push(digit);
            }
        }
        Ok(digits)
    }

    /// Hang the channel up. The first cause recorded wins.
    pub fn hangup(&self, cause: HangupCause) {
        let (cause, zombie) = {
            let mut inner = self.inner.lock();
            if inner.hungup {
                return;
            }
            inner.hungup = true;
            inner.softhangup |= SoftHangup::EXPLICIT;
            inner.readq.clear();
            (*inner.cause.get_or_insert(cause), inner.zombie)
        };
        let name = self.name();
        if !zombie {
            if let Err(e) = self.tech().hangup(self) {
                warn!(channel = name, "driver hangup failed: {}", e);
            }
        }
        self.datastores.lock().clear();
        self.wake.notify_one();
        info!(
            target: MANAGER_TARGET,
            event = "Hangup",
            channel = name,
            uniqueid = self.id,
            cause = cause as u8,
            cause_txt = cause.to_string(),
        );
    }

    pub fn bridge(&self) -> Option<Arc<Bridge>> {
        self.inner.lock().bridge.upgrade()
    }

    pub(crate) fn set_bridge(&self, bridge: Weak<Bridge>) -> Weak<Bridge> {
        std::mem::replace(&mut self.inner.lock().bridge, bridge)
    }

    pub(crate) fn wake(&self) {
        self.wake.notify_one();
    }

    pub fn add_datastore(&self, datastore: Datastore) {
        self.datastores.lock().add(datastore);
    }

    pub fn remove_datastore(
        &self,
        info: &dyn DatastoreInfo,
        uid: Option<&str>,
    ) -> Option<Datastore> {
        self.datastores.lock().remove(info, uid)
    }

    /// Run `f` on the first matching datastore.
    pub fn with_datastore<R>(
        &self,
        info: &dyn DatastoreInfo,
        uid: Option<&str>,
        f: impl FnOnce(&mut Datastore) -> R,
    ) -> Option<R> {
        self.datastores.lock().find_mut(info, uid).map(f)
    }

    pub fn datastore_count(&self) -> usize {
        self.datastores.lock().len()
    }

    /// Give `child` copies of our inheritable datastores.
    pub fn inherit_datastores(&self, child: &Channel) {
        let inherited = self.datastores.lock().inherit();
        let mut stores = child.datastores.lock();
        for datastore in inherited {
            stores.add(datastore);
        }
    }

    /// `original` takes over `clone`'s driver, queued frames, formats and
    /// inheritable datastores. `clone` is left a zombie carrying the driver
    /// `original` had, for its owner to hang up.
    pub fn masquerade(original: &Arc<Channel>, clone: &Arc<Channel>) -> Result<()> {
        if original.id == clone.id {
            return Err(ChannelError::SelfMasquerade(original.name()))?;
        }
        let (first, second) = if original.id < clone.id {
            (original, clone)
        } else {
            (clone, original)
        };

        {
            let mut a = first.inner.lock();
            let mut b = second.inner.lock();
            let (orig, cl) = if original.id < clone.id {
                (&mut *a, &mut *b)
            } else {
                (&mut *b, &mut *a)
            };
            let mut queued = std::mem::take(&mut cl.readq);
            orig.readq.append(&mut queued);
            std::mem::swap(&mut orig.nativeformats, &mut cl.nativeformats);
            std::mem::swap(&mut orig.rawreadformat, &mut cl.rawreadformat);
            std::mem::swap(&mut orig.rawwriteformat, &mut cl.rawwriteformat);
            // rebuilt on the next frame
            orig.readtrans = None;
            orig.writetrans = None;
            orig.state = cl.state;
            cl.zombie = true;
            cl.softhangup |= SoftHangup::EXPLICIT;
        }

        {
            let mut a = first.datastores.lock();
            let mut b = second.datastores.lock();
            let (orig, cl) = if original.id < clone.id {
                (&mut *a, &mut *b)
            } else {
                (&mut *b, &mut *a)
            };
            for datastore in cl.take_for_masquerade(clone, original) {
                orig.add(datastore);
            }
        }

        let stolen = clone.tech();
        let donor = original.tech();
        *original.tech.write() = stolen.clone();
        *clone.tech.write() = donor;

        let (original_name, clone_name) = (original.name(), clone.name());
        original.set_name(&clone_name);
        clone.set_name(&format!("{}<ZOMBIE>", original_name));

        stolen.fixup(clone, original)?;
        let (readformat, writeformat) = (original.read_format(), original.write_format());
        if let Some(format) = readformat {
            if let Err(e) = original.set_read_format(format) {
                warn!(channel = original.name(), "can't restore read format {}: {}", format, e);
            }
        }
        if let Some(format) = writeformat {
            if let Err(e) = original.set_write_format(format) {
                warn!(channel = original.name(), "can't restore write format {}: {}", format, e);
            }
        }
        original.wake();
        clone.wake();

        info!(
            target: MANAGER_TARGET,
            event = "Masquerade",
            original = original_name,
            clone = clone_name,
        );
        Ok(())
    }
}

/// Give `a` and `b` formats that let frames flow both ways, a common
/// native format when there is one and signed linear otherwise.
pub fn make_compatible(a: &Channel, b: &Channel) -> Result<()> {
    let (na, nb) = (a.native_formats(), b.native_formats());
    if a.read_format().is_some()
        && a.read_format() == b.write_format()
        && b.read_format() == a.write_format()
        && a.read_format() == b.read_format()
    {
        return Ok(());
    }
    let format = match translate::best_choice(na, nb) {
        Some((from, to)) if from == to => from,
        Some(_) => Format::Slinear,
        None => Err(ChannelError::Incompatible(a.name(), b.name()))?,
    };
    a.set_read_format(format)?;
    a.set_write_format(format)?;
    b.set_read_format(format)?;
    b.set_write_format(format)?;
    debug!("{} and {} now speak {}", a.name(), b.name(), format);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalTech;

    fn mask(formats: &[Format]) -> FormatMask {
        formats.iter().copied().collect()
    }

    #[tokio::test]
    async fn read_queue_and_hangup() {
        let chan = LocalTech::channel("Local/reader");
        chan.queue_frame(Frame::dtmf_begin('1'));
        chan.queue_frame(Frame::dtmf_end('1', 80));
        assert_eq!(chan.read().await.unwrap().kind, FrameKind::DtmfBegin('1'));
        assert_eq!(chan.read().await.unwrap().kind, FrameKind::DtmfEnd('1'));

        chan.queue_hangup(HangupCause::UserBusy);
        assert!(chan.read().await.is_none());
        assert!(chan.check_hangup());
        assert_eq!(chan.hangup_cause(), Some(HangupCause::UserBusy));

        // the first cause sticks
        chan.hangup(HangupCause::NormalClearing);
        assert_eq!(chan.hangup_cause(), Some(HangupCause::UserBusy));
        assert!(chan.write(&Frame::dtmf_begin('2')).is_err());
    }

    #[tokio::test]
    async fn read_wakes_on_queue() {
        let chan = LocalTech::channel("Local/waiter");
        let reader = chan.clone();
        let task = tokio::spawn(async move { reader.read().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        chan.queue_control(ControlKind::Answer);
        let frame = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(frame.kind, FrameKind::Control(ControlKind::Answer));
    }

    #[tokio::test]
    async fn softhangup_unblocks_reader() {
        let chan = LocalTech::channel("Local/blocked");
        let reader = chan.clone();
        let task = tokio::spawn(async move { reader.read().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        chan.softhangup(SoftHangup::SHUTDOWN);
        let frame = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(frame.is_none());
    }

    #[tokio::test]
    async fn read_translation() {
        let (tech, chan) = LocalTech::with_formats("Local/alaw", mask(&[Format::Alaw]));
        chan.set_read_format(Format::Slinear).unwrap();
        chan.queue_frame(Frame::voice(Format::Alaw, vec![0xd5u8; 160].into()));
        let frame = chan.read().await.unwrap();
        assert_eq!(frame.kind, FrameKind::Voice(Format::Slinear));
        assert_eq!(frame.samples, 160);

        chan.set_write_format(Format::Slinear).unwrap();
        chan.write(&Frame::slinear(Format::Slinear, &[0; 160])).unwrap();
        let written = tech.frames();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].kind, FrameKind::Voice(Format::Alaw));
        assert_eq!(written[0].data.len(), 160);
    }

    #[test]
    fn unreachable_format() {
        let (_, chan) = LocalTech::with_formats("Local/gsm", mask(&[Format::Gsm]));
        assert!(chan.set_read_format(Format::Ulaw).is_err());
        assert_eq!(chan.read_format(), Some(Format::Gsm));
    }

    #[test]
    fn compatible_formats() {
        let (_, a) = LocalTech::with_formats("Local/a", mask(&[Format::Ulaw, Format::Alaw]));
        let (_, b) = LocalTech::with_formats("Local/b", mask(&[Format::Alaw]));
        make_compatible(&a, &b).unwrap();
        assert_eq!(a.read_format(), Some(Format::Alaw));
        assert_eq!(b.write_format(), Some(Format::Alaw));

        let (_, c) = LocalTech::with_formats("Local/c", mask(&[Format::Ulaw]));
        make_compatible(&b, &c).unwrap();
        assert_eq!(b.read_format(), Some(Format::Slinear));
        assert_eq!(c.write_format(), Some(Format::Slinear));

        let (_, d) = LocalTech::with_formats("Local/d", mask(&[Format::Gsm]));
        assert!(make_compatible(&c, &d).is_err());
    }

    #[test]
    fn write_dispatch() {
        let (tech, chan) = LocalTech::with_formats("Local/w", mask(&[Format::Ulaw]));
        chan.write(&Frame::dtmf_begin('9')).unwrap();
        chan.write(&Frame::dtmf_end('9', 100)).unwrap();
        chan.indicate(ControlKind::Ringing, &[]).unwrap();
        chan.send_text("hi").unwrap();
        let frames = tech.frames();
        assert_eq!(frames[0].kind, FrameKind::DtmfBegin('9'));
        assert_eq!(frames[1].kind, FrameKind::DtmfEnd('9'));
        assert_eq!(frames[1].len, 100);
        assert_eq!(frames[2].kind, FrameKind::Control(ControlKind::Ringing));
        assert_eq!(frames[3].text_payload(), Some("hi"));
    }

    #[tokio::test]
    async fn masquerade_survives_format_loss() {
        let (_, original) = LocalTech::with_formats("Local/orig", mask(&[Format::Ulaw]));
        let (clone_tech, clone) = LocalTech::with_formats("Local/video", mask(&[Format::H263]));

        // no audio path on the new driver, the old formats stay recorded
        Channel::masquerade(&original, &clone).unwrap();
        assert!(original.native_formats().contains(Format::H263));
        assert_eq!(original.read_format(), Some(Format::Ulaw));
        assert!(original.set_read_format(Format::Ulaw).is_err());

        original.write(&Frame::dtmf_begin('2')).unwrap();
        assert_eq!(clone_tech.frames().len(), 1);
    }

    #[tokio::test]
    async fn masquerade_steals_driver() {
        let (orig_tech, original) = LocalTech::with_formats("Local/orig", mask(&[Format::Ulaw]));
        let (clone_tech, clone) = LocalTech::with_formats("Local/clone", mask(&[Format::Alaw]));
        clone.queue_frame(Frame::dtmf_end('4', 40));

        Channel::masquerade(&original, &clone).unwrap();

        assert_eq!(original.name(), "Local/clone");
        assert!(clone.is_zombie());
        assert!(clone.name().ends_with("<ZOMBIE>"));
        assert!(original.native_formats().contains(Format::Alaw));
        assert_eq!(original.read().await.unwrap().kind, FrameKind::DtmfEnd('4'));

        original.write(&Frame::dtmf_begin('1')).unwrap();
        assert_eq!(clone_tech.frames().len(), 1);
        assert!(orig_tech.frames().is_empty());

        // hanging up the zombie leaves both drivers alone
        clone.hangup(HangupCause::NormalClearing);
        assert!(!orig_tech.is_hungup());
        assert!(!clone_tech.is_hungup());
        assert!(Channel::masquerade(&original, &original).is_err());
    }
}

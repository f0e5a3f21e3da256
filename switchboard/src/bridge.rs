use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use anyhow::Result;
use async_trait::async_trait;
use bitflags::bitflags;
use lazy_static::lazy_static;
use parking_lot::{Mutex, RwLock};
use strum_macros::{self, EnumString};
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use trismedia_codec::{Frame, FrameKind, HangupCause};
use uuid::Uuid;

use crate::channel::Channel;
use crate::features::{BridgeFeatures, FeatureCallback, FeatureFlags, HookMatch};
use crate::simple::SimpleBridge;
use crate::softmix::Softmix;

// duration given to buffered digits that turn out not to be a feature
const PASSTHROUGH_DIGIT_MS: u32 = 100;

lazy_static! {
    static ref BRIDGES: RwLock<HashMap<String, Weak<Bridge>>> = RwLock::new(HashMap::new());
    static ref TECHNOLOGIES: RwLock<Vec<Arc<dyn BridgeTechnology>>> = RwLock::new(vec![
        Arc::new(SimpleBridge) as Arc<dyn BridgeTechnology>,
        Arc::new(Softmix::default()) as Arc<dyn BridgeTechnology>,
    ]);
}

/// Snapshot of the live bridges.
pub fn bridges() -> Vec<Arc<Bridge>> {
    BRIDGES.read().values().filter_map(|b| b.upgrade()).collect()
}

/// Add a technology, replacing any registered under the same name.
pub fn register_technology(technology: Arc<dyn BridgeTechnology>) {
    let mut technologies = TECHNOLOGIES.write();
    technologies.retain(|t| t.name() != technology.name());
    info!("registered bridge technology {}", technology.name());
    technologies.push(technology);
}

pub fn unregister_technology(name: &str) -> bool {
    let mut technologies = TECHNOLOGIES.write();
    let before = technologies.len();
    technologies.retain(|t| t.name() != name);
    before != technologies.len()
}

pub fn technologies() -> Vec<&'static str> {
    TECHNOLOGIES.read().iter().map(|t| t.name()).collect()
}

fn find_best_technology(capabilities: BridgeCapability) -> Result<Arc<dyn BridgeTechnology>> {
    let best = TECHNOLOGIES
        .read()
        .iter()
        .filter(|t| t.capabilities().intersects(capabilities))
        .min_by_key(|t| t.preference())
        .cloned();
    match best {
        Some(technology) => Ok(technology),
        None => Err(BridgeError::NoTechnology(capabilities).into()),
    }
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("no bridge technology offers {0:?}")]
    NoTechnology(BridgeCapability),

    #[error("channel {0} is already in a bridge")]
    AlreadyBridged(String),

    #[error("bridge {0} is stopped")]
    Stopped(String),

    #[error("channel {1} is not in bridge {0}")]
    NotInBridge(String, String),
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BridgeCapability: u32 {
        const ONE_TO_ONE_MIX = 1 << 0;
        const MULTIMIX = 1 << 1;
        const NATIVE = 1 << 2;
        // the technology drives the bridge from a task of its own
        const THREAD = 1 << 3;
        const MULTITHREADED = 1 << 4;
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BridgeFlags: u32 {
        // any channel leaving ends the bridge for everyone
        const DISSOLVE = 1 << 0;
        // move to a multimix technology past two channels
        const SMART = 1 << 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, strum_macros::Display)]
pub enum Preference {
    High = 1,
    Medium = 2,
    Low = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display, EnumString)]
pub enum BridgeChannelState {
    #[strum(serialize = "WAIT")]
    Wait,
    #[strum(serialize = "END")]
    End,
    #[strum(serialize = "HANGUP")]
    Hangup,
    #[strum(serialize = "DEPART")]
    Depart,
}

/// A way of moving media between the channels of a bridge.
pub trait BridgeTechnology: Send + Sync {
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> BridgeCapability;

    fn preference(&self) -> Preference;

    /// Below this many channels a hangup ends the bridge.
    fn minimum(&self) -> usize {
        1
    }

    fn create(&self, bridge: &Arc<Bridge>) -> Result<Arc<dyn TechnologyState>>;
}

/// Per-bridge state of a technology.
#[async_trait]
pub trait TechnologyState: Send + Sync {
    fn join(&self, bridge: &Bridge, bc: &Arc<BridgeChannel>) -> Result<()>;

    fn leave(&self, bridge: &Bridge, bc: &Arc<BridgeChannel>);

    fn write(&self, bridge: &Bridge, bc: &Arc<BridgeChannel>, frame: Frame) -> Result<()>;

    /// The channel's loop was woken without a frame.
    fn poll(&self, _bridge: &Bridge, _bc: &Arc<BridgeChannel>) {}

    fn suspend(&self, bridge: &Bridge, bc: &Arc<BridgeChannel>) {
        self.leave(bridge, bc);
    }

    fn unsuspend(&self, bridge: &Bridge, bc: &Arc<BridgeChannel>) -> Result<()> {
        self.join(bridge, bc)
    }

    async fn destroy(&self) {}
}

/// A channel's membership in a bridge.
pub struct BridgeChannel {
    pub chan: Arc<Channel>,
    state: Mutex<BridgeChannelState>,
    features: Arc<BridgeFeatures>,
    suspended: AtomicBool,
    swapped: AtomicBool,
    wake: Notify,
    previous: Mutex<Weak<Bridge>>,
    task: Mutex<Option<JoinHandle<BridgeChannelState>>>,
}

impl BridgeChannel {
    fn new(chan: Arc<Channel>, features: BridgeFeatures) -> Self {
        Self {
            chan,
            state: Mutex::new(BridgeChannelState::Wait),
            features: Arc::new(features),
            suspended: AtomicBool::new(false),
            swapped: AtomicBool::new(false),
            wake: Notify::new(),
            previous: Mutex::new(Weak::new()),
            task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> BridgeChannelState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: BridgeChannelState) {
        let old = std::mem::replace(&mut *self.state.lock(), state);
        if old != state {
            debug!(channel = self.chan.name(), "bridge channel {} -> {}", old, state);
        }
        self.wake();
    }

    pub fn features(&self) -> &Arc<BridgeFeatures> {
        &self.features
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst)
    }

    pub fn wake(&self) {
        self.wake.notify_one();
    }
}

struct BridgeInner {
    channels: Vec<Arc<BridgeChannel>>,
    technology: Arc<dyn BridgeTechnology>,
    pvt: Option<Arc<dyn TechnologyState>>,
    stopped: bool,
}

pub struct Bridge {
    pub id: String,
    capabilities: BridgeCapability,
    flags: BridgeFlags,
    features: RwLock<Arc<BridgeFeatures>>,
    inner: Mutex<BridgeInner>,
}

impl Bridge {
    pub fn new(capabilities: BridgeCapability, flags: BridgeFlags) -> Result<Arc<Bridge>> {
        let technology = find_best_technology(capabilities)?;
        let bridge = Arc::new(Bridge {
            id: Uuid::new_v4().to_string(),
            capabilities,
            flags,
            features: RwLock::new(Arc::new(BridgeFeatures::default())),
            inner: Mutex::new(BridgeInner {
                channels: Vec::new(),
                technology: technology.clone(),
                pvt: None,
                stopped: false,
            }),
        });
        let pvt = technology.create(&bridge)?;
        bridge.inner.lock().pvt = Some(pvt);
        BRIDGES
            .write()
            .insert(bridge.id.clone(), Arc::downgrade(&bridge));
        info!(bridge = bridge.id, "created {} bridge", technology.name());
        Ok(bridge)
    }

    pub fn capabilities(&self) -> BridgeCapability {
        self.capabilities
    }

    pub fn flags(&self) -> BridgeFlags {
        self.flags
    }

    pub fn technology(&self) -> &'static str {
        self.inner.lock().technology.name()
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.lock().stopped
    }

    /// Features for channels that joined without their own.
    pub fn set_features(&self, features: BridgeFeatures) {
        *self.features.write() = Arc::new(features);
    }

    pub fn channels(&self) -> Vec<Arc<BridgeChannel>> {
        self.inner.lock().channels.clone()
    }

    /// Channels still taking part, in join order.
    pub fn members(&self) -> Vec<Arc<Channel>> {
        self.channels()
            .into_iter()
            .filter(|bc| bc.state() == BridgeChannelState::Wait)
            .map(|bc| bc.chan.clone())
            .collect()
    }

    pub fn find(&self, chan: &Channel) -> Option<Arc<BridgeChannel>> {
        self.inner
            .lock()
            .channels
            .iter()
            .find(|bc| bc.chan.id == chan.id)
            .cloned()
    }

    fn pvt(&self) -> Option<Arc<dyn TechnologyState>> {
        self.inner.lock().pvt.clone()
    }

    fn add(
        self: &Arc<Self>,
        chan: &Arc<Channel>,
        features: BridgeFeatures,
        swap: Option<&Arc<Channel>>,
    ) -> Result<Arc<BridgeChannel>> {
        if chan.bridge().is_some() {
            return Err(BridgeError::AlreadyBridged(chan.name()))?;
        }
        let bc = Arc::new(BridgeChannel::new(chan.clone(), features));
        let switch = {
            let mut inner = self.inner.lock();
            if inner.stopped {
                return Err(BridgeError::Stopped(self.id.clone()))?;
            }
            if let Some(swap) = swap {
                if let Some(old) = inner.channels.iter().find(|b| b.chan.id == swap.id) {
                    old.swapped.store(true, Ordering::SeqCst);
                    old.set_state(BridgeChannelState::Hangup);
                }
            }
            let active = inner
                .channels
                .iter()
                .filter(|b| b.state() == BridgeChannelState::Wait)
                .count()
                + 1;
            inner.channels.push(bc.clone());
            self.flags.contains(BridgeFlags::SMART)
                && active > 2
                && !inner
                    .technology
                    .capabilities()
                    .contains(BridgeCapability::MULTIMIX)
        };
        *bc.previous.lock() = chan.set_bridge(Arc::downgrade(self));

        if switch {
            if let Err(e) = self.switch_technology(BridgeCapability::MULTIMIX, &bc) {
                warn!(bridge = self.id, "can't go multimix: {}", e);
            }
        }
        if let Some(pvt) = self.pvt() {
            if let Err(e) = pvt.join(self, &bc) {
                self.inner.lock().channels.retain(|b| !Arc::ptr_eq(b, &bc));
                chan.set_bridge(bc.previous.lock().clone());
                return Err(e);
            }
        }
        info!(
            bridge = self.id,
            channel = chan.name(),
            "joined {} bridge",
            self.technology()
        );
        Ok(bc)
    }

    // everyone but `joining` moves over now, `joining` joins the new one itself
    fn switch_technology(
        self: &Arc<Self>,
        capabilities: BridgeCapability,
        joining: &Arc<BridgeChannel>,
    ) -> Result<()> {
        let technology = find_best_technology(capabilities)?;
        let pvt = technology.create(self)?;
        let (old, channels) = {
            let mut inner = self.inner.lock();
            let old = inner.pvt.replace(pvt.clone());
            inner.technology = technology.clone();
            (old, inner.channels.clone())
        };
        for bc in channels.iter().filter(|bc| !Arc::ptr_eq(bc, joining)) {
            if let Some(old) = &old {
                old.leave(self, bc);
            }
            if bc.state() == BridgeChannelState::Wait && !bc.is_suspended() {
                pvt.join(self, bc)?;
            }
        }
        if let Some(old) = old {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move { old.destroy().await });
            }
        }
        info!(bridge = self.id, "switched to {} bridge", technology.name());
        Ok(())
    }

    async fn remove(self: &Arc<Self>, bc: &Arc<BridgeChannel>, state: BridgeChannelState) {
        let (pvt, technology, active, empty) = {
            let mut inner = self.inner.lock();
            inner.channels.retain(|b| !Arc::ptr_eq(b, bc));
            let active = inner
                .channels
                .iter()
                .filter(|b| b.state() == BridgeChannelState::Wait)
                .count();
            (
                inner.pvt.clone(),
                inner.technology.clone(),
                active,
                inner.channels.is_empty(),
            )
        };
        if let Some(pvt) = &pvt {
            if !bc.is_suspended() {
                pvt.leave(self, bc);
            }
        }
        let previous = bc.previous.lock().clone();
        bc.chan.set_bridge(previous);
        info!(
            bridge = self.id,
            channel = bc.chan.name(),
            "left bridge ({})",
            state
        );

        let hungup = matches!(
            state,
            BridgeChannelState::End | BridgeChannelState::Hangup
        ) && !bc.swapped.load(Ordering::SeqCst);
        if hungup
            && (self.flags.contains(BridgeFlags::DISSOLVE)
                || bc.features.flags.contains(FeatureFlags::DISSOLVE)
                || active < technology.minimum())
        {
            self.dissolve();
        }

        if empty {
            self.destroy().await;
        }
    }

    /// End the bridge for everyone still in it.
    pub fn dissolve(&self) {
        let channels = {
            let mut inner = self.inner.lock();
            inner.stopped = true;
            inner.channels.clone()
        };
        for bc in channels {
            if bc.state() == BridgeChannelState::Wait {
                bc.set_state(BridgeChannelState::End);
            }
        }
        debug!(bridge = self.id, "dissolved");
    }

    async fn destroy(&self) {
        let pvt = {
            let mut inner = self.inner.lock();
            inner.stopped = true;
            inner.pvt.take()
        };
        if let Some(pvt) = pvt {
            pvt.destroy().await;
        }
        BRIDGES.write().remove(&self.id);
        info!(bridge = self.id, "destroyed");
    }

    /// Put `chan` in the bridge and run it there until it leaves. The
    /// channel is not hung up on the way out, that is up to the caller.
    pub async fn join(
        self: &Arc<Self>,
        chan: Arc<Channel>,
        features: BridgeFeatures,
    ) -> Result<BridgeChannelState> {
        let bc = self.add(&chan, features, None)?;
        let state = self.run(&bc).await;
        self.remove(&bc, state).await;
        Ok(state)
    }

    /// Put `chan` in the bridge on a task of its own. A channel that leaves
    /// other than by [`Bridge::depart`] is hung up. With `swap`, that
    /// channel is pushed out of the bridge to make room.
    pub fn impart(
        self: &Arc<Self>,
        chan: Arc<Channel>,
        swap: Option<&Arc<Channel>>,
        features: BridgeFeatures,
    ) -> Result<()> {
        let bc = self.add(&chan, features, swap)?;
        let bridge = self.clone();
        let worker = bc.clone();
        let handle = tokio::spawn(async move {
            let state = bridge.run(&worker).await;
            bridge.remove(&worker, state).await;
            if state != BridgeChannelState::Depart {
                worker.chan.hangup(HangupCause::NormalClearing);
            }
            state
        });
        *bc.task.lock() = Some(handle);
        Ok(())
    }

    /// Take an imparted channel back out of the bridge, alive.
    pub async fn depart(&self, chan: &Channel) -> Result<()> {
        let bc = match self.find(chan) {
            Some(bc) => bc,
            None => return Err(BridgeError::NotInBridge(self.id.clone(), chan.name()))?,
        };
        bc.set_state(BridgeChannelState::Depart);
        let task = bc.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        Ok(())
    }

    /// Stop moving media for `chan` while something else uses it.
    pub fn suspend(&self, chan: &Channel) -> Result<()> {
        let bc = match self.find(chan) {
            Some(bc) => bc,
            None => return Err(BridgeError::NotInBridge(self.id.clone(), chan.name()))?,
        };
        if !bc.suspended.swap(true, Ordering::SeqCst) {
            if let Some(pvt) = self.pvt() {
                pvt.suspend(self, &bc);
            }
        }
        bc.wake();
        Ok(())
    }

    pub fn unsuspend(&self, chan: &Channel) -> Result<()> {
        let bc = match self.find(chan) {
            Some(bc) => bc,
            None => return Err(BridgeError::NotInBridge(self.id.clone(), chan.name()))?,
        };
        if bc.suspended.swap(false, Ordering::SeqCst) {
            if let Some(pvt) = self.pvt() {
                pvt.unsuspend(self, &bc)?;
            }
        }
        bc.wake();
        Ok(())
    }

    /// Hand a frame read from `bc` to the technology.
    pub fn write(&self, bc: &Arc<BridgeChannel>, frame: Frame) {
        if let Some(pvt) = self.pvt() {
            if let Err(e) = pvt.write(self, bc, frame) {
                debug!(bridge = self.id, channel = bc.chan.name(), "write failed: {}", e);
            }
        }
    }

    pub(crate) fn features_for(&self, bc: &BridgeChannel) -> Arc<BridgeFeatures> {
        if bc.features.is_empty() {
            self.features.read().clone()
        } else {
            bc.features.clone()
        }
    }

    async fn run(self: &Arc<Self>, bc: &Arc<BridgeChannel>) -> BridgeChannelState {
        let mut digits = String::new();
        let mut deadline: Option<Instant> = None;
        loop {
            let state = bc.state();
            if state != BridgeChannelState::Wait {
                return state;
            }
            if bc.is_suspended() {
                bc.wake.notified().await;
                continue;
            }
            let wait = deadline;
            let digit_timeout = async move {
                match wait {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => futures::future::pending::<()>().await,
                }
            };
            tokio::select! {
                biased;
                _ = bc.wake.notified() => {
                    if let Some(pvt) = self.pvt() {
                        pvt.poll(self, bc);
                    }
                }
                frame = bc.chan.read() => match frame {
                    Some(frame) => {
                        self.handle_frame(bc, frame, &mut digits, &mut deadline).await;
                    }
                    None => {
                        if bc.state() == BridgeChannelState::Wait {
                            bc.set_state(BridgeChannelState::End);
                        }
                    }
                },
                _ = digit_timeout => {
                    deadline = None;
                    let features = self.features_for(bc);
                    match features.lookup(&digits) {
                        HookMatch::Exact(hook) | HookMatch::Ambiguous(hook) => {
                            digits.clear();
                            self.fire(bc, hook).await;
                        }
                        _ => self.pass_digits(bc, &mut digits, None),
                    }
                }
            }
        }
    }

    async fn handle_frame(
        self: &Arc<Self>,
        bc: &Arc<BridgeChannel>,
        frame: Frame,
        digits: &mut String,
        deadline: &mut Option<Instant>,
    ) {
        let features = self.features_for(bc);
        match frame.kind {
            FrameKind::DtmfBegin(digit) => {
                let mut candidate = digits.clone();
                candidate.push(digit);
                if !digits.is_empty() || features.has_prefix(&candidate) {
                    return;
                }
                self.write(bc, frame);
            }
            FrameKind::DtmfEnd(digit) => {
                let mut candidate = digits.clone();
                candidate.push(digit);
                if !features.has_prefix(&candidate) {
                    if digits.is_empty() {
                        self.write(bc, frame);
                    } else {
                        self.pass_digits(bc, digits, Some((digit, frame.len)));
                        *deadline = None;
                    }
                    return;
                }
                *digits = candidate;
                match features.lookup(digits) {
                    HookMatch::Exact(hook) => {
                        digits.clear();
                        *deadline = None;
                        self.fire(bc, hook).await;
                    }
                    _ => *deadline = Some(Instant::now() + features.digit_timeout),
                }
            }
            _ => self.write(bc, frame),
        }
    }

    // buffered digits were not a feature after all
    fn pass_digits(&self, bc: &Arc<BridgeChannel>, digits: &mut String, last: Option<(char, u32)>) {
        let buffered: Vec<char> = digits.drain(..).collect();
        for digit in buffered {
            self.write(bc, Frame::dtmf_begin(digit));
            self.write(bc, Frame::dtmf_end(digit, PASSTHROUGH_DIGIT_MS));
        }
        if let Some((digit, len)) = last {
            self.write(bc, Frame::dtmf_begin(digit));
            self.write(bc, Frame::dtmf_end(digit, len));
        }
    }

    async fn fire(self: &Arc<Self>, bc: &Arc<BridgeChannel>, hook: FeatureCallback) {
        debug!(bridge = self.id, channel = bc.chan.name(), "feature hook");
        if let Err(e) = hook(self.clone(), bc.clone()).await {
            warn!(
                bridge = self.id,
                channel = bc.chan.name(),
                "feature failed: {}",
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::local::LocalTech;
    use trismedia_codec::Format;

    async fn settle<F: Fn() -> bool>(f: F) -> bool {
        for _ in 0..200 {
            if f() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[test]
    fn best_technology() {
        assert_eq!(
            find_best_technology(BridgeCapability::ONE_TO_ONE_MIX).unwrap().name(),
            "simple_bridge"
        );
        assert_eq!(
            find_best_technology(BridgeCapability::MULTIMIX).unwrap().name(),
            "softmix"
        );
        assert!(find_best_technology(BridgeCapability::NATIVE).is_err());
        assert!(Preference::High < Preference::Low);
    }

    #[tokio::test]
    async fn simple_forwards_frames() {
        let bridge = Bridge::new(BridgeCapability::ONE_TO_ONE_MIX, BridgeFlags::empty()).unwrap();
        let (_, a) = LocalTech::with_formats("Local/a", Format::Slinear.into());
        let (tech_b, b) = LocalTech::with_formats("Local/b", Format::Slinear.into());
        bridge.impart(a.clone(), None, BridgeFeatures::default()).unwrap();
        bridge.impart(b.clone(), None, BridgeFeatures::default()).unwrap();
        assert_eq!(bridge.members().len(), 2);
        assert!(Arc::ptr_eq(&a.bridge().unwrap(), &bridge));
        assert!(bridges().iter().any(|x| x.id == bridge.id));

        a.queue_frame(Frame::slinear(Format::Slinear, &[7; 160]));
        let frame = tech_b
            .wait_for(Duration::from_secs(2), |f| f.is_voice())
            .await
            .unwrap();
        assert_eq!(frame.pcm(), vec![7; 160]);

        // already bridged
        assert!(bridge.impart(a.clone(), None, BridgeFeatures::default()).is_err());
    }

    #[tokio::test]
    async fn join_refuses_bridged_channel() {
        let first = Bridge::new(BridgeCapability::ONE_TO_ONE_MIX, BridgeFlags::empty()).unwrap();
        let second = Bridge::new(BridgeCapability::ONE_TO_ONE_MIX, BridgeFlags::empty()).unwrap();
        let a = LocalTech::channel("Local/a");
        first.impart(a.clone(), None, BridgeFeatures::default()).unwrap();

        let err = second.join(a.clone(), BridgeFeatures::default()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BridgeError>(),
            Some(BridgeError::AlreadyBridged(_))
        ));
        assert!(second.members().is_empty());
        assert!(Arc::ptr_eq(&a.bridge().unwrap(), &first));
    }

    #[tokio::test]
    async fn hangup_ends_one_to_one() {
        let bridge = Bridge::new(BridgeCapability::ONE_TO_ONE_MIX, BridgeFlags::empty()).unwrap();
        let (tech_a, a) = LocalTech::with_formats("Local/a", Format::Slinear.into());
        let (_, b) = LocalTech::with_formats("Local/b", Format::Slinear.into());
        bridge.impart(a.clone(), None, BridgeFeatures::default()).unwrap();
        bridge.impart(b.clone(), None, BridgeFeatures::default()).unwrap();

        b.queue_hangup(HangupCause::UserBusy);
        assert!(settle(|| tech_a.is_hungup()).await);
        assert_eq!(a.hangup_cause(), Some(HangupCause::NormalClearing));
        assert_eq!(b.hangup_cause(), Some(HangupCause::UserBusy));
        assert!(settle(|| bridge.channels().is_empty()).await);
        assert!(bridge.is_stopped());
        assert!(a.bridge().is_none());
    }

    #[tokio::test]
    async fn depart_keeps_channel() {
        let bridge = Bridge::new(BridgeCapability::ONE_TO_ONE_MIX, BridgeFlags::empty()).unwrap();
        let a = LocalTech::channel("Local/a");
        let b = LocalTech::channel("Local/b");
        bridge.impart(a.clone(), None, BridgeFeatures::default()).unwrap();
        bridge.impart(b.clone(), None, BridgeFeatures::default()).unwrap();

        bridge.depart(&a).await.unwrap();
        assert!(!a.check_hangup());
        assert!(a.bridge().is_none());
        // departing is not a hangup, b stays
        assert_eq!(bridge.members().len(), 1);
        assert!(!bridge.is_stopped());
        assert!(bridge.depart(&a).await.is_err());
    }

    #[tokio::test]
    async fn dissolve_flag() {
        let bridge = Bridge::new(BridgeCapability::MULTIMIX, BridgeFlags::DISSOLVE).unwrap();
        let chans: Vec<_> = (0..3)
            .map(|i| LocalTech::channel(&format!("Local/{}", i)))
            .collect();
        for chan in &chans {
            bridge.impart(chan.clone(), None, BridgeFeatures::default()).unwrap();
        }
        chans[0].queue_hangup(HangupCause::NormalClearing);
        assert!(settle(|| chans.iter().all(|c| c.is_hungup())).await);
        assert!(bridge.impart(LocalTech::channel("Local/late"), None, BridgeFeatures::default()).is_err());
    }

    #[tokio::test]
    async fn smart_bridge_goes_multimix() {
        let bridge = Bridge::new(BridgeCapability::ONE_TO_ONE_MIX, BridgeFlags::SMART).unwrap();
        assert_eq!(bridge.technology(), "simple_bridge");
        for i in 0..2 {
            let chan = LocalTech::channel(&format!("Local/{}", i));
            bridge.impart(chan, None, BridgeFeatures::default()).unwrap();
        }
        assert_eq!(bridge.technology(), "simple_bridge");
        let third = LocalTech::channel("Local/third");
        bridge.impart(third.clone(), None, BridgeFeatures::default()).unwrap();
        assert_eq!(bridge.technology(), "softmix");
        assert_eq!(third.read_format(), Some(Format::Slinear));
    }

    #[tokio::test]
    async fn swap_replaces_channel() {
        let bridge = Bridge::new(BridgeCapability::ONE_TO_ONE_MIX, BridgeFlags::SMART).unwrap();
        let a = LocalTech::channel("Local/a");
        let b = LocalTech::channel("Local/b");
        let c = LocalTech::channel("Local/c");
        bridge.impart(a.clone(), None, BridgeFeatures::default()).unwrap();
        bridge.impart(b.clone(), None, BridgeFeatures::default()).unwrap();
        bridge.impart(c.clone(), Some(&a), BridgeFeatures::default()).unwrap();
        assert_eq!(bridge.technology(), "simple_bridge");

        assert!(settle(|| a.is_hungup()).await);
        let members: Vec<_> = bridge.members().iter().map(|c| c.name()).collect();
        assert_eq!(members, vec!["Local/b", "Local/c"]);
        assert!(!b.check_hangup());
        assert!(!bridge.is_stopped());
    }

    #[tokio::test]
    async fn suspended_channel_is_not_read() {
        let bridge = Bridge::new(BridgeCapability::ONE_TO_ONE_MIX, BridgeFlags::empty()).unwrap();
        let a = LocalTech::channel("Local/a");
        let (tech_b, b) = LocalTech::with_formats("Local/b", Format::Slinear.into());
        bridge.impart(a.clone(), None, BridgeFeatures::default()).unwrap();
        bridge.impart(b.clone(), None, BridgeFeatures::default()).unwrap();

        bridge.suspend(&a).unwrap();
        a.queue_frame(Frame::dtmf_begin('1'));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(tech_b.frames().is_empty());

        bridge.unsuspend(&a).unwrap();
        assert!(tech_b
            .wait_for(Duration::from_secs(2), |f| f.kind == FrameKind::DtmfBegin('1'))
            .await
            .is_some());
    }
}

//! Multi-party mixing technology.
//!
//! A mixer task wakes every `interval_ms`, takes one tick of audio from
//! every participant that has it buffered, and hands each participant the
//! sum of everyone else. The participant's own bridge loop writes the mix
//! out when it is woken.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use trismedia_codec::{Format, Frame, FrameKind};
use trismedia_timer::Ticker;

use crate::bridge::{
    Bridge, BridgeCapability, BridgeChannel, BridgeTechnology, Preference, TechnologyState,
};

// buffered audio beyond this many ticks is dropped, oldest first
const MAX_BUFFERED_TICKS: usize = 10;

#[derive(Debug, Error)]
pub enum SoftmixError {
    #[error("mixing interval {0}ms is not one of 10, 20, 40")]
    Interval(u32),

    #[error("can't mix at {0}Hz")]
    Rate(u32),

    #[error("mixer needs a tokio runtime")]
    NoRuntime,
}

#[derive(Debug, Clone, Copy)]
pub struct Softmix {
    pub interval_ms: u32,
    pub sample_rate: u32,
}

impl Default for Softmix {
    fn default() -> Self {
        Self {
            interval_ms: 20,
            sample_rate: 8000,
        }
    }
}

impl Softmix {
    pub fn samples_per_tick(&self) -> usize {
        (self.sample_rate / 1000 * self.interval_ms) as usize
    }

    fn format(&self) -> Result<Format> {
        match self.sample_rate {
            8000 => Ok(Format::Slinear),
            16000 => Ok(Format::Slinear16),
            rate => Err(SoftmixError::Rate(rate))?,
        }
    }
}

impl BridgeTechnology for Softmix {
    fn name(&self) -> &'static str {
        "softmix"
    }

    fn capabilities(&self) -> BridgeCapability {
        BridgeCapability::MULTIMIX | BridgeCapability::THREAD | BridgeCapability::MULTITHREADED
    }

    fn preference(&self) -> Preference {
        Preference::Low
    }

    fn create(&self, bridge: &Arc<Bridge>) -> Result<Arc<dyn TechnologyState>> {
        if ![10, 20, 40].contains(&self.interval_ms) {
            return Err(SoftmixError::Interval(self.interval_ms))?;
        }
        let format = self.format()?;
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => return Err(SoftmixError::NoRuntime)?,
        };
        let mixer = Arc::new(Mixer {
            bridge: bridge.id.clone(),
            format,
            samples: self.samples_per_tick(),
            participants: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
            stop: Notify::new(),
        });
        let task = handle.spawn(run_mixer(Arc::downgrade(&mixer), self.interval_ms));
        Ok(Arc::new(SoftmixState {
            mixer,
            task: Mutex::new(Some(task)),
        }))
    }
}

#[derive(Default)]
struct Buffers {
    factory: VecDeque<i16>,
    // what this participant put into the current tick
    our_buf: Vec<i16>,
    final_buf: Vec<i16>,
    have_frame: bool,
}

struct Participant {
    bc: Weak<BridgeChannel>,
    buffers: Mutex<Buffers>,
}

struct Mixer {
    bridge: String,
    format: Format,
    samples: usize,
    participants: Mutex<Vec<Arc<Participant>>>,
    stopped: AtomicBool,
    stop: Notify,
}

impl Mixer {
    fn find(&self, bc: &Arc<BridgeChannel>) -> Option<Arc<Participant>> {
        self.participants
            .lock()
            .iter()
            .find(|p| p.bc.as_ptr() == Arc::as_ptr(bc))
            .cloned()
    }

    fn tick(&self) {
        let participants = self.participants.lock().clone();
        let mut contributions = Vec::with_capacity(participants.len());
        for p in &participants {
            let mut buffers = p.buffers.lock();
            if buffers.factory.len() >= self.samples {
                buffers.our_buf = buffers.factory.drain(..self.samples).collect();
            } else {
                buffers.our_buf.clear();
            }
            contributions.push(buffers.our_buf.clone());
        }

        let slices: Vec<&[i16]> = contributions.iter().map(|c| c.as_slice()).collect();
        let mixes = mix(self.samples, &slices);
        for (p, mixed) in participants.iter().zip(mixes) {
            {
                let mut buffers = p.buffers.lock();
                buffers.final_buf = mixed;
                buffers.have_frame = true;
            }
            if let Some(bc) = p.bc.upgrade() {
                bc.wake();
            }
        }
    }
}

async fn run_mixer(mixer: Weak<Mixer>, interval_ms: u32) {
    let mut ticker = match Ticker::from_millis(interval_ms as u64) {
        Ok(ticker) => ticker,
        Err(e) => {
            warn!("softmix timer: {}", e);
            return;
        }
    };
    loop {
        let stop = match mixer.upgrade() {
            Some(mixer) if !mixer.stopped.load(Ordering::SeqCst) => mixer,
            _ => return,
        };
        tokio::select! {
            _ = stop.stop.notified() => return,
            res = ticker.tick() => {
                if let Err(e) = res {
                    warn!(bridge = stop.bridge, "softmix timer: {}", e);
                    return;
                }
            }
        }
        stop.tick();
    }
}

/// Mix one tick. Every participant gets the saturated sum of all the
/// others; short or empty contributions count as silence.
pub fn mix(samples: usize, contributions: &[&[i16]]) -> Vec<Vec<i16>> {
    let mut total = vec![0i32; samples];
    for contribution in contributions {
        for (sum, sample) in total.iter_mut().zip(contribution.iter()) {
            *sum += *sample as i32;
        }
    }
    contributions
        .iter()
        .map(|own| {
            total
                .iter()
                .enumerate()
                .map(|(i, sum)| {
                    let own = own.get(i).copied().unwrap_or(0) as i32;
                    (sum - own).clamp(i16::MIN as i32, i16::MAX as i32) as i16
                })
                .collect()
        })
        .collect()
}

struct SoftmixState {
    mixer: Arc<Mixer>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SoftmixState {
    // write out the last mix if the participant has not had it yet
    fn flush(&self, bridge: &Bridge, bc: &Arc<BridgeChannel>, participant: &Participant) {
        let frame = {
            let mut buffers = participant.buffers.lock();
            if !buffers.have_frame {
                return;
            }
            buffers.have_frame = false;
            Frame::slinear(self.mixer.format, &buffers.final_buf)
        };
        if let Err(e) = bc.chan.write(&frame) {
            debug!(
                bridge = bridge.id,
                channel = bc.chan.name(),
                "softmix write failed: {}",
                e
            );
        }
    }
}

#[async_trait]
impl TechnologyState for SoftmixState {
    fn join(&self, bridge: &Bridge, bc: &Arc<BridgeChannel>) -> Result<()> {
        bc.chan.set_read_format(self.mixer.format)?;
        bc.chan.set_write_format(self.mixer.format)?;
        self.mixer.participants.lock().push(Arc::new(Participant {
            bc: Arc::downgrade(bc),
            buffers: Mutex::new(Buffers::default()),
        }));
        debug!(
            bridge = bridge.id,
            channel = bc.chan.name(),
            "mixing {} samples of {}",
            self.mixer.samples,
            self.mixer.format
        );
        Ok(())
    }

    fn leave(&self, _bridge: &Bridge, bc: &Arc<BridgeChannel>) {
        self.mixer
            .participants
            .lock()
            .retain(|p| p.bc.as_ptr() != Arc::as_ptr(bc));
    }

    fn write(&self, bridge: &Bridge, bc: &Arc<BridgeChannel>, frame: Frame) -> Result<()> {
        let participant = match self.mixer.find(bc) {
            Some(participant) => participant,
            None => return Ok(()),
        };
        if frame.kind == FrameKind::Voice(self.mixer.format) {
            let pcm = frame.pcm();
            let mut buffers = participant.buffers.lock();
            buffers.factory.extend(pcm);
            let limit = self.mixer.samples * MAX_BUFFERED_TICKS;
            if buffers.factory.len() > limit {
                let excess = buffers.factory.len() - limit;
                buffers.factory.drain(..excess);
            }
        }
        self.flush(bridge, bc, &participant);
        Ok(())
    }

    fn poll(&self, bridge: &Bridge, bc: &Arc<BridgeChannel>) {
        if let Some(participant) = self.mixer.find(bc) {
            self.flush(bridge, bc, &participant);
        }
    }

    async fn destroy(&self) {
        self.mixer.stopped.store(true, Ordering::SeqCst);
        self.mixer.stop.notify_one();
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        info!(bridge = self.mixer.bridge, "softmix stopped");
    }
}

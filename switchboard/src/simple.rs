use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use tracing::debug;
use trismedia_codec::Frame;

use crate::bridge::{
    Bridge, BridgeCapability, BridgeChannel, BridgeChannelState, BridgeTechnology, Preference,
    TechnologyState,
};
use crate::channel::{make_compatible, Channel};
use crate::rtp_channel::{native_bridge, native_stop};

/// Two party bridge: frames read from one side are written to the other.
pub struct SimpleBridge;

impl BridgeTechnology for SimpleBridge {
    fn name(&self) -> &'static str {
        "simple_bridge"
    }

    fn capabilities(&self) -> BridgeCapability {
        BridgeCapability::ONE_TO_ONE_MIX | BridgeCapability::THREAD
    }

    fn preference(&self) -> Preference {
        Preference::Medium
    }

    fn minimum(&self) -> usize {
        2
    }

    fn create(&self, _bridge: &Arc<Bridge>) -> Result<Arc<dyn TechnologyState>> {
        Ok(Arc::new(SimpleState::default()))
    }
}

#[derive(Default)]
struct SimpleState {
    // legs exchanging rtp directly
    native: Mutex<Option<(Arc<Channel>, Arc<Channel>)>>,
}

fn others(bridge: &Bridge, bc: &Arc<BridgeChannel>) -> Vec<Arc<BridgeChannel>> {
    bridge
        .channels()
        .into_iter()
        .filter(|other| {
            !Arc::ptr_eq(other, bc)
                && other.state() == BridgeChannelState::Wait
                && !other.is_suspended()
        })
        .collect()
}

impl TechnologyState for SimpleState {
    fn join(&self, bridge: &Bridge, bc: &Arc<BridgeChannel>) -> Result<()> {
        let others = others(bridge, bc);
        let other = match others.as_slice() {
            [other] => other,
            _ => return Ok(()),
        };
        make_compatible(&other.chan, &bc.chan)?;

        let need_dtmf =
            !bridge.features_for(bc).is_empty() || !bridge.features_for(other).is_empty();
        if native_bridge(&other.chan, &bc.chan, need_dtmf) {
            *self.native.lock() = Some((other.chan.clone(), bc.chan.clone()));
        }
        Ok(())
    }

    fn leave(&self, _bridge: &Bridge, bc: &Arc<BridgeChannel>) {
        let mut native = self.native.lock();
        let involved = matches!(
            &*native,
            Some((a, b)) if a.id == bc.chan.id || b.id == bc.chan.id
        );
        if involved {
            if let Some((a, b)) = native.take() {
                native_stop(&a, &b);
            }
        }
    }

    fn write(&self, bridge: &Bridge, bc: &Arc<BridgeChannel>, frame: Frame) -> Result<()> {
        for other in others(bridge, bc) {
            if let Err(e) = other.chan.write(&frame) {
                debug!(
                    bridge = bridge.id,
                    channel = other.chan.name(),
                    "simple write failed: {}",
                    e
                );
            }
        }
        Ok(())
    }
}

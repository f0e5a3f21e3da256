//! # Switchboard
//!
//! Channels and the bridges that connect them.
//!
//! ## Core Components
//!
//! ### Channels
//! - **channel**: the [`Channel`] object, its read queue, formats and the
//!   [`ChannelTech`] driver seam; masquerade
//! - **datastore**: typed data attached to a channel, inherited by children
//!   and carried across masquerades
//! - **local**: in-process driver that records what the core writes
//! - **rtp_channel**: driver backed by an RTP session, native peer to peer
//!   bridging
//!
//! ### Bridging
//! - **bridge**: the [`Bridge`], technology selection, join/impart/depart,
//!   per-channel loop and DTMF feature dispatch
//! - **simple**: two party frame forwarding
//! - **softmix**: timer driven N-way mixer
//! - **features**: DTMF hooks and the built-in transfer and hangup features
//!
//! ## Usage
//!
//! ```rust,no_run
//! use trismedia_switchboard::{Bridge, BridgeCapability, BridgeFeatures, BridgeFlags, LocalTech};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let bridge = Bridge::new(BridgeCapability::ONE_TO_ONE_MIX, BridgeFlags::SMART)?;
//! bridge.impart(LocalTech::channel("Local/a"), None, BridgeFeatures::default())?;
//! bridge.impart(LocalTech::channel("Local/b"), None, BridgeFeatures::default())?;
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod channel;
pub mod datastore;
pub mod features;
pub mod local;
pub mod rtp_channel;
pub mod simple;
pub mod softmix;

pub use bridge::{
    bridges, register_technology, technologies, unregister_technology, Bridge, BridgeCapability,
    BridgeChannel, BridgeChannelState, BridgeError, BridgeFlags, BridgeTechnology, Preference,
    TechnologyState,
};
pub use channel::{make_compatible, Channel, ChannelError, ChannelState, ChannelTech, SoftHangup};
pub use datastore::{Datastore, DatastoreInfo, DatastoreList, INHERIT_FOREVER};
pub use features::{BridgeFeatures, BuiltinFeature, Dialer, FeatureFlags, TransferConfig};
pub use local::LocalTech;
pub use rtp_channel::{DtmfMode, RtpGlue, RtpTech};

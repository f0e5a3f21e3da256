//! Trismedia relay: two RTP legs joined by a bridge.
//!
//! The configuration file carries one table per subsystem:
//!
//! ```toml
//! [rtp]
//! rtpstart = 10000
//! rtpend = 20000
//!
//! [conference]
//! default_server = "10.0.0.1"
//!
//! [relay]
//! bind_ip = "0.0.0.0"
//! a = "10.0.0.20:4000"
//! format = "ulaw"
//! ```

use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;
use trismedia_codec::Format;
use trismedia_media::{config::set_rtp_config, RtpConfig, Session};
use trismedia_rakwon::ConferenceConfig;
use trismedia_switchboard::{
    Bridge, BridgeCapability, BridgeFeatures, BridgeFlags, BuiltinFeature, Channel, DtmfMode,
    RtpTech,
};

pub const DEFAULT_CONF: &str = "/etc/trismedia/trismedia.conf";

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("unknown relay format {0}")]
    Format(String),

    #[error("unknown dtmf mode {0}")]
    Dtmf(String),
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct RelayConfig {
    pub bind_ip: IpAddr,
    // peers are learned from the first packet when unset
    pub a: Option<SocketAddr>,
    pub b: Option<SocketAddr>,
    pub format: String,
    pub dtmf: String,
    pub hangup_dtmf: Option<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            a: None,
            b: None,
            format: "ulaw".to_string(),
            dtmf: "rfc2833".to_string(),
            hangup_dtmf: None,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub rtp: RtpConfig,
    pub conference: ConferenceConfig,
    pub relay: RelayConfig,
}

impl Config {
    pub fn parse(text: &str) -> Result<Config> {
        let mut config: Config = toml::from_str(text)?;
        config.rtp = config.rtp.normalized();
        Ok(config)
    }

    /// Read `TRISMEDIA_CONF`, or the default path.
    pub fn load() -> Result<Config> {
        let path = std::env::var("TRISMEDIA_CONF").unwrap_or_else(|_| DEFAULT_CONF.to_string());
        let contents = fs::read_to_string(&path)?;
        Self::parse(&contents)
    }
}

pub struct Relay {
    bridge: Arc<Bridge>,
    legs: Vec<Arc<Channel>>,
    addrs: Vec<SocketAddr>,
}

impl Relay {
    /// Open both legs and bridge them. Must run inside a runtime.
    pub fn start(config: &Config) -> Result<Relay> {
        set_rtp_config(config.rtp.clone());
        let relay = &config.relay;
        let format: Format = relay
            .format
            .parse()
            .map_err(|_| RelayError::Format(relay.format.clone()))?;
        let dtmf: DtmfMode = relay
            .dtmf
            .parse()
            .map_err(|_| RelayError::Dtmf(relay.dtmf.clone()))?;

        let mut features = BridgeFeatures::default();
        if let Some(code) = relay.hangup_dtmf.as_deref() {
            features.enable(BuiltinFeature::Hangup, Some(code), None)?;
        }

        let bridge = Bridge::new(BridgeCapability::ONE_TO_ONE_MIX, BridgeFlags::empty())?;
        let mut legs = Vec::with_capacity(2);
        let mut addrs = Vec::with_capacity(2);
        for (name, peer) in [("a", relay.a), ("b", relay.b)] {
            let session = Session::new(relay.bind_ip)?;
            match peer {
                Some(peer) => session.set_peer(peer),
                None => session.set_nat(true),
            }
            addrs.push(session.local_addr());
            let chan = RtpTech::channel(&format!("RTP/relay-{}", name), session, format.into(), dtmf);
            chan.answer()?;
            legs.push(chan);
        }
        for chan in &legs {
            bridge.impart(chan.clone(), None, features.clone())?;
        }
        info!(
            bridge = %bridge.id,
            a = %addrs[0],
            b = %addrs[1],
            "relaying {} with {} dtmf",
            format,
            dtmf
        );
        Ok(Relay {
            bridge,
            legs,
            addrs,
        })
    }

    pub fn bridge(&self) -> &Arc<Bridge> {
        &self.bridge
    }

    pub fn legs(&self) -> &[Arc<Channel>] {
        &self.legs
    }

    /// Local media address of each leg.
    pub fn local_addrs(&self) -> &[SocketAddr] {
        &self.addrs
    }

    /// Resolves once both legs are hung up.
    pub async fn wait(&self) {
        while !self.legs.iter().all(|chan| chan.is_hungup()) {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    pub fn stop(&self) {
        self.bridge.dissolve();
    }
}

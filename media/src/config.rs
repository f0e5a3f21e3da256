use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use lazy_static::lazy_static;
use parking_lot::RwLock;
use serde::Deserialize;
use tracing::{info, warn};
use trismedia_log::MANAGER_TARGET;

pub const DEFAULT_RTP_START: u16 = 5000;
pub const DEFAULT_RTP_END: u16 = 31000;
pub const DEFAULT_RTCP_INTERVAL: u32 = 5000;
pub const RTCP_MIN_INTERVAL: u32 = 500;
pub const RTCP_MAX_INTERVAL: u32 = 60000;
// 150 ms at 8 kHz
pub const DEFAULT_DTMF_TIMEOUT: u32 = 1200;

lazy_static! {
    static ref RTP_CONFIG: RwLock<Arc<RtpConfig>> = RwLock::new(Arc::new(RtpConfig::default()));
}

/// `rtp.conf` `[general]`.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct RtpConfig {
    pub rtpstart: u16,
    pub rtpend: u16,
    // ms between control reports, 0 turns reports off
    pub rtcpinterval: u32,
    pub rtpchecksums: bool,
    // samples
    pub dtmftimeout: u32,
    pub strictrtp: bool,
}

impl Default for RtpConfig {
    fn default() -> Self {
        Self {
            rtpstart: DEFAULT_RTP_START,
            rtpend: DEFAULT_RTP_END,
            rtcpinterval: DEFAULT_RTCP_INTERVAL,
            rtpchecksums: true,
            dtmftimeout: DEFAULT_DTMF_TIMEOUT,
            strictrtp: false,
        }
    }
}

#[derive(Deserialize, Default)]
struct RtpConfFile {
    #[serde(default)]
    general: RtpConfig,
}

impl RtpConfig {
    /// Parse an `rtp.conf` document with a `[general]` table.
    pub fn parse(text: &str) -> Result<RtpConfig> {
        let file: RtpConfFile = toml::from_str(text)?;
        Ok(file.general.normalized())
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<RtpConfig> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn normalized(mut self) -> RtpConfig {
        if self.rtpstart >= self.rtpend {
            warn!(
                "unreasonable rtp range {}-{}, using defaults",
                self.rtpstart, self.rtpend
            );
            self.rtpstart = DEFAULT_RTP_START;
            self.rtpend = DEFAULT_RTP_END;
        }
        if self.rtcpinterval != 0 {
            self.rtcpinterval = self
                .rtcpinterval
                .clamp(RTCP_MIN_INTERVAL, RTCP_MAX_INTERVAL);
        }
        if self.dtmftimeout > 64000 {
            warn!("dtmftimeout {} out of range, using default", self.dtmftimeout);
            self.dtmftimeout = DEFAULT_DTMF_TIMEOUT;
        }
        self
    }
}

/// The configuration new sessions start with.
pub fn rtp_config() -> Arc<RtpConfig> {
    RTP_CONFIG.read().clone()
}

/// Swap in a new configuration. Live sessions keep the one they were
/// created with.
pub fn set_rtp_config(config: RtpConfig) {
    let config = Arc::new(config.normalized());
    info!(
        "rtp range {}-{}, rtcp interval {} ms",
        config.rtpstart, config.rtpend, config.rtcpinterval
    );
    *RTP_CONFIG.write() = config;
}

pub fn reload(text: &str) -> Result<()> {
    let config = RtpConfig::parse(text)?;
    set_rtp_config(config);
    info!(
        target: MANAGER_TARGET,
        event = "ChannelReload",
        channel_type = "RTP",
        reload_reason = "RELOAD",
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RtpConfig::parse("").unwrap();
        assert_eq!(config, RtpConfig::default());
        assert_eq!(config.rtpstart, 5000);
        assert_eq!(config.rtpend, 31000);
        assert_eq!(config.dtmftimeout, 1200);
    }

    #[test]
    fn normalization() {
        let config = RtpConfig::parse(
            "[general]\nrtpstart = 20000\nrtpend = 10000\nrtcpinterval = 10\nstrictrtp = true\n",
        )
        .unwrap();
        assert_eq!(config.rtpstart, DEFAULT_RTP_START);
        assert_eq!(config.rtpend, DEFAULT_RTP_END);
        assert_eq!(config.rtcpinterval, RTCP_MIN_INTERVAL);
        assert!(config.strictrtp);

        let config = RtpConfig::parse("[general]\nrtcpinterval = 900000\n").unwrap();
        assert_eq!(config.rtcpinterval, RTCP_MAX_INTERVAL);
        let config = RtpConfig::parse("[general]\nrtcpinterval = 0\n").unwrap();
        assert_eq!(config.rtcpinterval, 0);
    }

    #[test]
    fn bad_document() {
        assert!(RtpConfig::parse("[general]\nrtpstart = \"x\"\n").is_err());
    }
}

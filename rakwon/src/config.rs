use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;

pub const DEFAULT_PORT: u16 = 7000;
pub const DEFAULT_RTP_BASE: u16 = 40000;
pub const DEFAULT_SERVER_RTP_BASE: u16 = 50000;
pub const DEFAULT_READY_DELAY_MS: u64 = 5000;

/// Conference server reached by one extension.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServerEntry {
    pub server: String,
    pub port: Option<u16>,
    pub subject: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub server: String,
    pub port: u16,
    pub subject: String,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ConferenceConfig {
    pub default_server: String,
    pub default_port: u16,
    pub default_subject: String,
    pub seats: u32,
    pub database: String,
    pub member_table: String,
    // local media ports are rtp_base + 8 * index
    pub rtp_base: u16,
    pub server_rtp_base: u16,
    pub ready_delay_ms: u64,
    pub connect_timeout_ms: u64,
    pub servers: HashMap<String, ServerEntry>,
}

impl Default for ConferenceConfig {
    fn default() -> Self {
        Self {
            default_server: "127.0.0.1".to_string(),
            default_port: DEFAULT_PORT,
            default_subject: String::new(),
            seats: 16,
            database: String::new(),
            member_table: String::new(),
            rtp_base: DEFAULT_RTP_BASE,
            server_rtp_base: DEFAULT_SERVER_RTP_BASE,
            ready_delay_ms: DEFAULT_READY_DELAY_MS,
            connect_timeout_ms: 3000,
            servers: HashMap::new(),
        }
    }
}

impl ConferenceConfig {
    pub fn parse(text: &str) -> Result<ConferenceConfig> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<ConferenceConfig> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Where a call to `exten` goes. Extensions without an entry use the
    /// defaults.
    pub fn server_for(&self, exten: &str) -> Target {
        match self.servers.get(exten) {
            Some(entry) => Target {
                server: entry.server.clone(),
                port: entry.port.unwrap_or(self.default_port),
                subject: entry
                    .subject
                    .clone()
                    .unwrap_or_else(|| self.default_subject.clone()),
            },
            None => Target {
                server: self.default_server.clone(),
                port: self.default_port,
                subject: self.default_subject.clone(),
            },
        }
    }

    pub fn ready_delay(&self) -> Duration {
        Duration::from_millis(self.ready_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

//! # Rakwon
//!
//! Conference channel: one participant of an external conference server.
//!
//! - **protocol**: the obfuscated little endian TCP framing and its messages
//! - **state**: login, readiness and speaking floor as a pure state machine
//! - **channel**: [`RakwonTech`], the channel technology that drives the
//!   state machine from the socket and owns the participant's RTP sessions
//! - **config**: conference servers per extension and media port bases
//!
//! Refusals reach the caller as `TAKEOFFHOOK` control frames carrying the
//! prompt name, followed by a hangup.

pub mod channel;
pub mod config;
pub mod protocol;
pub mod state;

pub use channel::{media_ports, register_user, RakwonError, RakwonTech};
pub use config::{ConferenceConfig, ServerEntry, Target};
pub use protocol::{Message, PacketType, ProtocolError, ResultCode};
pub use state::{Conference, Effect, Input, State, View};

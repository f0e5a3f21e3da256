//! # Media Transport
//!
//! RTP/RTCP sessions for the Trismedia media plane.
//!
//! ## Core Components
//!
//! - **packet**: RTP header codec and in-place helpers for forwarding
//! - **stats**: sequence, loss and jitter accounting
//! - **rtcp**: sender/receiver reports, round-trip time, FUR and BYE
//! - **payload**: payload type tables and `a=rtpmap` resolution
//! - **dtmf**: RFC 2833 and Cisco telephone events
//! - **red**: T.140 text redundancy
//! - **stun**: RFC 3489 binding requests on the media port
//! - **smoother**: fixed-size packetisation of outgoing voice
//! - **session**: the [`Session`] tying all of the above to a UDP port pair
//! - **config**: `rtp.conf` and its live reload
//!
//! ## Usage
//!
//! ```rust,no_run
//! use trismedia_media::Session;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let session = Session::new("127.0.0.1".parse()?)?;
//! session.set_peer("127.0.0.1:40000".parse()?);
//! loop {
//!     let frame = session.read().await?;
//!     if !frame.is_null() {
//!         session.write(&frame)?;
//!     }
//! }
//! # }
//! ```

pub mod config;
pub mod dtmf;
pub mod packet;
pub mod payload;
pub mod red;
pub mod rtcp;
pub mod session;
pub mod smoother;
pub mod stats;
pub mod stun;

pub use config::{rtp_config, RtpConfig};
pub use payload::{Payload, PayloadRegistry};
pub use session::{sessions, RtpQuality, Session, SessionError, SessionFlags, StrictState};

//! Codec identifiers, media frames and the signed linear translation paths
//! used by the channel and bridge layers.

use anyhow::Result;

pub mod dtmf;
mod format;
mod frame;
pub mod pcma;
pub mod pcmu;
pub mod translate;

pub use format::{Format, FormatMask, MediaKind};
pub use frame::{ControlKind, Frame, FrameKind, HangupCause};

/// Audio codec trait for encoding and decoding audio data
pub trait Codec: Send {
    /// Encode signed linear samples, returns the number of bytes written
    fn encode(&mut self, src: &[i16], dst: &mut [u8]) -> Result<usize>;

    /// Decode to signed linear samples, returns the number of samples written
    fn decode(&mut self, src: &[u8], dst: &mut [i16]) -> Result<usize>;
}

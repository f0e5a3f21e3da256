use std::sync::{Arc, Weak};

use anyhow::Result;
use strum_macros::{self, EnumString};
use tracing::{debug, info};
use trismedia_codec::{ControlKind, FormatMask, Frame};
use trismedia_media::Session;

use crate::channel::{Channel, ChannelTech};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display, EnumString)]
pub enum DtmfMode {
    #[strum(serialize = "rfc2833")]
    Rfc2833,
    #[strum(serialize = "inband")]
    Inband,
    #[strum(serialize = "info")]
    Info,
}

/// What a driver exposes for peer to peer media.
#[derive(Clone)]
pub struct RtpGlue {
    pub session: Arc<Session>,
    pub dtmf: DtmfMode,
}

/// Channel technology backed by one RTP [`Session`].
pub struct RtpTech {
    session: Arc<Session>,
    formats: FormatMask,
    dtmf: DtmfMode,
}

impl RtpTech {
    pub fn channel(
        name: &str,
        session: Arc<Session>,
        formats: FormatMask,
        dtmf: DtmfMode,
    ) -> Arc<Channel> {
        session.set_dtmf(dtmf == DtmfMode::Rfc2833);
        let tech = Arc::new(RtpTech {
            session,
            formats,
            dtmf,
        });
        let chan = Channel::new(name, tech.clone());
        tech.feed(&chan);
        chan
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    // frames read by the session end up on `chan`'s read queue
    fn feed(&self, chan: &Arc<Channel>) {
        let owner: Weak<Channel> = Arc::downgrade(chan);
        self.session.set_callback(Some(Box::new(move |frame: Frame| {
            if let Some(chan) = owner.upgrade() {
                chan.queue_frame(frame);
            }
        })));
    }
}

impl ChannelTech for RtpTech {
    fn name(&self) -> &'static str {
        "RTP"
    }

    fn capabilities(&self) -> FormatMask {
        self.formats
    }

    fn hangup(&self, chan: &Channel) -> Result<()> {
        debug!(channel = chan.name(), "destroying rtp session {}", self.session.id());
        self.session.set_callback(None);
        self.session.destroy();
        Ok(())
    }

    fn write(&self, _chan: &Channel, frame: &Frame) -> Result<()> {
        self.session.write(frame)
    }

    fn indicate(&self, chan: &Channel, condition: ControlKind, _data: &[u8]) -> Result<()> {
        match condition {
            ControlKind::SrcUpdate => self.session.new_source(),
            ControlKind::VidUpdate => self.session.send_fur()?,
            _ => debug!(channel = chan.name(), "rtp ignores {}", condition),
        }
        Ok(())
    }

    fn send_digit_begin(&self, chan: &Channel, digit: char) -> Result<()> {
        match self.dtmf {
            DtmfMode::Rfc2833 => self.session.senddigit_begin(digit),
            mode => {
                debug!(channel = chan.name(), "no {} dtmf generator for {}", mode, digit);
                Ok(())
            }
        }
    }

    fn send_digit_end(&self, _chan: &Channel, digit: char, duration_ms: u32) -> Result<()> {
        match self.dtmf {
            DtmfMode::Rfc2833 => self
                .session
                .senddigit_end_with_duration(digit, duration_ms),
            _ => Ok(()),
        }
    }

    fn fixup(&self, _old: &Channel, new: &Arc<Channel>) -> Result<()> {
        self.feed(new);
        Ok(())
    }

    fn rtp_glue(&self) -> Option<RtpGlue> {
        Some(RtpGlue {
            session: self.session.clone(),
            dtmf: self.dtmf,
        })
    }
}

/// Whether two legs can exchange media directly. Digits have to reach the
/// core in a form it can read whenever a feature may be listening.
pub fn dtmf_compatible(a: &RtpGlue, b: &RtpGlue, need_dtmf: bool) -> bool {
    if a.dtmf != b.dtmf {
        return false;
    }
    !(need_dtmf && a.dtmf == DtmfMode::Inband)
}

/// Start peer to peer forwarding between `a` and `b`. False when the two
/// drivers can't do it and the core has to carry the media.
pub fn native_bridge(a: &Channel, b: &Channel, need_dtmf: bool) -> bool {
    let (ga, gb) = match (a.tech().rtp_glue(), b.tech().rtp_glue()) {
        (Some(ga), Some(gb)) => (ga, gb),
        _ => return false,
    };
    if !dtmf_compatible(&ga, &gb, need_dtmf) {
        debug!(
            "no native bridge between {} ({}) and {} ({})",
            a.name(),
            ga.dtmf,
            b.name(),
            gb.dtmf
        );
        return false;
    }
    ga.session.set_p2p_need_dtmf(need_dtmf);
    gb.session.set_p2p_need_dtmf(need_dtmf);
    ga.session.set_bridged(Some(&gb.session));
    gb.session.set_bridged(Some(&ga.session));
    info!("native rtp bridge between {} and {}", a.name(), b.name());
    true
}

pub fn native_stop(a: &Channel, b: &Channel) {
    for chan in [a, b] {
        if let Some(glue) = chan.tech().rtp_glue() {
            glue.session.set_bridged(None);
            glue.session.set_p2p_need_dtmf(false);
        }
    }
    debug!("native rtp bridge between {} and {} stopped", a.name(), b.name());
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::local::LocalTech;
    use trismedia_codec::{Format, FrameKind};
    use trismedia_media::RtpConfig;

    fn session(base: u16) -> Arc<Session> {
        let config = Arc::new(RtpConfig {
            rtpstart: base,
            rtpend: base + 19,
            rtcpinterval: 0,
            ..Default::default()
        });
        Session::with_config("127.0.0.1".parse().unwrap(), config).unwrap()
    }

    #[tokio::test]
    async fn dtmf_modes() {
        let glue = |dtmf| RtpGlue {
            session: session(45900),
            dtmf,
        };
        let (rfc, inband) = (glue(DtmfMode::Rfc2833), glue(DtmfMode::Inband));
        assert!(dtmf_compatible(&rfc, &rfc, true));
        assert!(!dtmf_compatible(&rfc, &inband, false));
        assert!(dtmf_compatible(&inband, &inband, false));
        assert!(!dtmf_compatible(&inband, &inband, true));
        assert_eq!("rfc2833".parse::<DtmfMode>().unwrap(), DtmfMode::Rfc2833);
    }

    #[tokio::test]
    async fn native_needs_two_rtp_legs() {
        let a = RtpTech::channel("RTP/a", session(45920), Format::Ulaw.into(), DtmfMode::Rfc2833);
        let b = RtpTech::channel("RTP/b", session(45940), Format::Ulaw.into(), DtmfMode::Rfc2833);
        let local = LocalTech::channel("Local/x");
        assert!(!native_bridge(&a, &local, false));
        assert!(native_bridge(&a, &b, true));

        let (ga, gb) = (a.tech().rtp_glue().unwrap(), b.tech().rtp_glue().unwrap());
        assert_eq!(ga.session.bridged().unwrap().id(), gb.session.id());
        native_stop(&a, &b);
        assert!(ga.session.bridged().is_none());
        a.hangup(trismedia_codec::HangupCause::NormalClearing);
        assert!(ga.session.is_destroyed());
        b.hangup(trismedia_codec::HangupCause::NormalClearing);
    }

    #[tokio::test]
    async fn session_frames_reach_channel() {
        let session = session(45960);
        let chan = RtpTech::channel("RTP/in", session.clone(), Format::Ulaw.into(), DtmfMode::Rfc2833);
        let phone = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        session.set_peer(phone.local_addr().unwrap());

        let voice = trismedia_media::packet::build(0, true, 1, 160, 0x42, &[0xffu8; 160]);
        phone.send_to(&voice, session.local_addr()).await.unwrap();
        let frame = tokio::time::timeout(Duration::from_secs(2), chan.read())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame.kind, FrameKind::Voice(Format::Ulaw));
        chan.hangup(trismedia_codec::HangupCause::NormalClearing);
    }
}

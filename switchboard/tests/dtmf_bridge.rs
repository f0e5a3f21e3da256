use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use trismedia_codec::{Format, Frame, FrameKind, HangupCause};
use trismedia_media::dtmf::TelephoneEvent;
use trismedia_media::{packet, RtpConfig, Session};
use trismedia_switchboard::{
    Bridge, BridgeCapability, BridgeFeatures, BridgeFlags, DtmfMode, LocalTech, RtpTech,
};

fn session(base: u16) -> Arc<Session> {
    let config = Arc::new(RtpConfig {
        rtpstart: base,
        rtpend: base + 49,
        rtcpinterval: 0,
        ..Default::default()
    });
    Session::with_config("127.0.0.1".parse().unwrap(), config).unwrap()
}

fn event(duration: u16, end: bool) -> [u8; 4] {
    TelephoneEvent {
        event: 5,
        end,
        volume: 10,
        duration,
    }
    .encode()
}

#[tokio::test]
async fn rfc2833_digit_crosses_bridge() {
    let session = session(45000);
    let phone = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    session.set_peer(phone.local_addr().unwrap());

    let a = RtpTech::channel("RTP/a", session.clone(), Format::Ulaw.into(), DtmfMode::Rfc2833);
    let (tech_b, b) = LocalTech::with_formats("Local/b", Format::Slinear.into());
    let bridge = Bridge::new(BridgeCapability::ONE_TO_ONE_MIX, BridgeFlags::empty()).unwrap();
    bridge.impart(a.clone(), None, BridgeFeatures::default()).unwrap();
    bridge.impart(b.clone(), None, BridgeFeatures::default()).unwrap();

    for (seq, (duration, end)) in [(160, false), (320, false), (480, true)].into_iter().enumerate() {
        let rtp = packet::build(101, seq == 0, 700 + seq as u16, 8000, 0x1234, &event(duration, end));
        phone.send_to(&rtp, session.local_addr()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let end = tech_b
        .wait_for(Duration::from_secs(2), |f| matches!(f.kind, FrameKind::DtmfEnd(_)))
        .await
        .unwrap();
    assert_eq!(end.kind, FrameKind::DtmfEnd('5'));
    assert_eq!(end.len, 60);
    let digits: Vec<FrameKind> = tech_b
        .frames()
        .into_iter()
        .filter(|f| f.is_dtmf())
        .map(|f| f.kind)
        .collect();
    assert_eq!(digits, vec![FrameKind::DtmfBegin('5'), FrameKind::DtmfEnd('5')]);

    // voice still goes the other way, translated to ulaw on the wire
    b.queue_frame(Frame::slinear(Format::Slinear, &[0; 160]));
    let mut buf = vec![0u8; 2048];
    let (len, _) = tokio::time::timeout(Duration::from_secs(2), phone.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    let (header, range) = packet::RtpHeader::decode(&buf[..len]).unwrap();
    assert_eq!(header.payload_type, 0);
    assert_eq!(range.len(), 160);

    b.queue_hangup(HangupCause::NormalClearing);
    for _ in 0..200 {
        if session.is_destroyed() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(session.is_destroyed());
}

#[tokio::test]
async fn feature_digits_are_not_passed_on() {
    let session = session(45100);
    let phone = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    session.set_peer(phone.local_addr().unwrap());

    let a = RtpTech::channel("RTP/a", session.clone(), Format::Ulaw.into(), DtmfMode::Rfc2833);
    let (tech_b, b) = LocalTech::with_formats("Local/b", Format::Ulaw.into());
    let bridge = Bridge::new(BridgeCapability::ONE_TO_ONE_MIX, BridgeFlags::empty()).unwrap();
    let mut features = BridgeFeatures::default();
    features.hook_fn("5", |_bridge, bc| async move {
        bc.chan.set_hangup_cause(HangupCause::NormalClearing);
        bc.set_state(trismedia_switchboard::BridgeChannelState::End);
        Ok(())
    });
    bridge.impart(a.clone(), None, features).unwrap();
    bridge.impart(b.clone(), None, BridgeFeatures::default()).unwrap();

    for (seq, (duration, end)) in [(160, false), (480, true)].into_iter().enumerate() {
        let rtp = packet::build(101, seq == 0, 900 + seq as u16, 16000, 0x99, &event(duration, end));
        phone.send_to(&rtp, session.local_addr()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // the hook ends a's membership, which ends the 1:1 bridge
    for _ in 0..200 {
        if tech_b.is_hungup() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(tech_b.is_hungup());
    assert!(tech_b.frames().iter().all(|f| !f.is_dtmf()));
}

use std::time::Duration;

use tracing_subscriber::layer::SubscriberExt;
use trismedia_log::{subscribe, ManagerEvent, ManagerLayer};
use trismedia_media::config::{reload, rtp_config};
use trismedia_media::Session;

fn next_named(receiver: &crossbeam_channel::Receiver<ManagerEvent>, name: &str) -> ManagerEvent {
    loop {
        let event = receiver.recv_timeout(Duration::from_secs(2)).unwrap();
        if event.name == name {
            return event;
        }
    }
}

// one test so the global subscriber and the global config are not shared
#[tokio::test]
async fn reload_and_session_events() {
    let subscriber = tracing_subscriber::registry().with(ManagerLayer::new());
    tracing::subscriber::set_global_default(subscriber).unwrap();
    let receiver = subscribe();

    reload("[general]\nrtpstart = 44000\nrtpend = 44099\nrtcpinterval = 0\n").unwrap();
    let event = next_named(&receiver, "ChannelReload");
    assert_eq!(event.get("channel_type").and_then(|v| v.as_str()), Some("RTP"));
    assert_eq!(rtp_config().rtpstart, 44000);

    // sessions pick up the new range
    let session = Session::new("127.0.0.1".parse().unwrap()).unwrap();
    let port = session.local_addr().port();
    assert!((44000..=44099).contains(&port));

    let src = "10.1.1.1:9000".parse().unwrap();
    let packet = trismedia_media::packet::build(0, false, 1, 0, 0x77, &[0xffu8; 160]);
    session.handle_datagram(&packet, src);
    session.destroy();

    let receiver_stat = next_named(&receiver, "RTPReceiverStat");
    assert_eq!(receiver_stat.get("ssrc").and_then(|v| v.as_u64()), Some(0x77));
    assert_eq!(
        receiver_stat.get("received_packets").and_then(|v| v.as_u64()),
        Some(1)
    );
    let sender_stat = next_named(&receiver, "RTPSenderStat");
    assert_eq!(
        sender_stat.get("ssrc").and_then(|v| v.as_u64()),
        Some(session.ssrc() as u64)
    );
    assert!(sender_stat.to_ami().starts_with("Event: RTPSenderStat\r\n"));
}

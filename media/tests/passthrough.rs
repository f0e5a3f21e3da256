use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use trismedia_codec::FrameKind;
use trismedia_media::dtmf::TelephoneEvent;
use trismedia_media::packet::{self, RtpHeader};
use trismedia_media::{Payload, RtpConfig, Session};

fn config(rtpstart: u16, rtpend: u16) -> Arc<RtpConfig> {
    Arc::new(RtpConfig {
        rtpstart,
        rtpend,
        rtcpinterval: 0,
        ..Default::default()
    })
}

async fn endpoint() -> (UdpSocket, SocketAddr) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    (socket, addr)
}

async fn recv(socket: &UdpSocket) -> Vec<u8> {
    let mut buf = vec![0u8; 2048];
    let (len, _) = tokio::time::timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    buf.truncate(len);
    buf
}

// two sessions bridged natively, phone A talks to session A, phone B to session B
async fn bridged_pair(base: u16) -> (Arc<Session>, Arc<Session>, UdpSocket, UdpSocket) {
    let a = Session::with_config("127.0.0.1".parse().unwrap(), config(base, base + 49)).unwrap();
    let b = Session::with_config("127.0.0.1".parse().unwrap(), config(base + 50, base + 99))
        .unwrap();
    let (phone_a, phone_a_addr) = endpoint().await;
    let (phone_b, phone_b_addr) = endpoint().await;
    a.set_peer(phone_a_addr);
    b.set_peer(phone_b_addr);
    a.set_bridged(Some(&b));
    b.set_bridged(Some(&a));
    (a, b, phone_a, phone_b)
}

#[tokio::test]
async fn native_passthrough_preserves_packet() {
    let (a, _b, phone_a, phone_b) = bridged_pair(43100).await;
    let payload = [0x55u8; 160];

    let first = packet::build(0, true, 1000, 160000, 0xAA, &payload);
    phone_a.send_to(&first, a.local_addr()).await.unwrap();
    assert!(a.read().await.unwrap().is_null());

    let out = recv(&phone_b).await;
    let (header, range) = RtpHeader::decode(&out).unwrap();
    assert_eq!(header.payload_type, 0);
    assert_eq!(header.sequence, 1000);
    assert_eq!(header.timestamp, 160000);
    assert_eq!(header.ssrc, 0xAA);
    assert!(header.marker);
    assert_eq!(&out[range], &payload[..]);

    let second = packet::build(0, false, 1001, 160160, 0xAA, &payload);
    phone_a.send_to(&second, a.local_addr()).await.unwrap();
    assert!(a.read().await.unwrap().is_null());
    let (header, _) = RtpHeader::decode(&recv(&phone_b).await).unwrap();
    assert_eq!(header.sequence, 1001);
    assert!(!header.marker);
}

#[tokio::test]
async fn first_forward_is_marked() {
    let (a, _b, phone_a, phone_b) = bridged_pair(43300).await;
    let unmarked = packet::build(0, false, 5, 800, 0xBB, &[0xffu8; 160]);
    phone_a.send_to(&unmarked, a.local_addr()).await.unwrap();
    a.read().await.unwrap();
    let (header, _) = RtpHeader::decode(&recv(&phone_b).await).unwrap();
    assert!(header.marker);
}

#[tokio::test]
async fn payload_type_is_remapped() {
    let (a, b, phone_a, phone_b) = bridged_pair(43500).await;
    b.payloads(|p| {
        p.unset(101);
        p.set(96, Payload::Dtmf).unwrap();
    });
    let event = TelephoneEvent {
        event: 1,
        end: false,
        volume: 10,
        duration: 160,
    }
    .encode();
    let digit = packet::build(101, true, 20, 4000, 0xCC, &event);
    phone_a.send_to(&digit, a.local_addr()).await.unwrap();
    assert!(a.read().await.unwrap().is_null());
    let (header, _) = RtpHeader::decode(&recv(&phone_b).await).unwrap();
    assert_eq!(header.payload_type, 96);
}

#[tokio::test]
async fn dtmf_goes_to_core_when_needed() {
    let (a, _b, phone_a, _phone_b) = bridged_pair(43700).await;
    a.set_p2p_need_dtmf(true);
    let event = TelephoneEvent {
        event: 10,
        end: false,
        volume: 10,
        duration: 160,
    }
    .encode();
    let digit = packet::build(101, true, 30, 4000, 0xDD, &event);
    phone_a.send_to(&digit, a.local_addr()).await.unwrap();
    let frame = a.read().await.unwrap();
    assert_eq!(frame.kind, FrameKind::DtmfBegin('*'));
}

#[tokio::test]
async fn unnegotiated_payload_goes_to_core() {
    let (a, b, phone_a, _phone_b) = bridged_pair(43900).await;
    b.payloads(|p| p.clear());
    let voice = packet::build(8, false, 40, 4000, 0xEE, &[0xd5u8; 160]);
    phone_a.send_to(&voice, a.local_addr()).await.unwrap();
    let frame = a.read().await.unwrap();
    assert!(frame.is_voice());
}

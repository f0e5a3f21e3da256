use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::timeout;
use trismedia::{Config, Relay};
use trismedia_media::packet;

#[tokio::test]
async fn voice_crosses_the_relay() {
    let phone_a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let phone_b = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let mut config = Config::parse(
        r#"
[rtp]
rtpstart = 46200
rtpend = 46249
rtcpinterval = 0

[relay]
bind_ip = "127.0.0.1"
"#,
    )
    .unwrap();
    config.relay.a = Some(phone_a.local_addr().unwrap());
    config.relay.b = Some(phone_b.local_addr().unwrap());
    let relay = Relay::start(&config).unwrap();
    assert_eq!(relay.bridge().members().len(), 2);

    let leg_a = relay.local_addrs()[0];
    let mut buf = vec![0u8; 2048];
    let mut received = None;
    for seq in 0..50u16 {
        let rtp = packet::build(0, seq == 0, seq, 160 * seq as u32, 0x4242, &[0xff; 160]);
        phone_a.send_to(&rtp, leg_a).await.unwrap();
        if let Ok(Ok((len, _))) =
            timeout(Duration::from_millis(40), phone_b.recv_from(&mut buf)).await
        {
            received = Some(len);
            break;
        }
    }
    let len = received.expect("nothing reached leg b");
    let (header, range) = packet::RtpHeader::decode(&buf[..len]).unwrap();
    assert_eq!(header.payload_type, 0);
    assert_eq!(range.len(), 160);

    relay.stop();
    timeout(Duration::from_secs(3), relay.wait()).await.unwrap();
    assert!(relay.legs().iter().all(|chan| chan.check_hangup()));
}

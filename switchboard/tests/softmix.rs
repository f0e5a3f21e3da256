use std::time::Duration;

use trismedia_codec::{Format, Frame, HangupCause};
use trismedia_switchboard::{Bridge, BridgeCapability, BridgeFeatures, BridgeFlags, LocalTech};

#[tokio::test]
async fn three_party_mix() {
    let bridge = Bridge::new(BridgeCapability::MULTIMIX, BridgeFlags::empty()).unwrap();
    assert_eq!(bridge.technology(), "softmix");

    let parties: Vec<_> = [100i16, 200, -50]
        .into_iter()
        .enumerate()
        .map(|(i, level)| {
            let (tech, chan) = LocalTech::with_formats(&format!("Local/p{}", i + 1), Format::Slinear.into());
            (level, tech, chan)
        })
        .collect();
    for (_, _, chan) in &parties {
        bridge.impart(chan.clone(), None, BridgeFeatures::default()).unwrap();
    }

    let talkers: Vec<_> = parties.iter().map(|(level, _, chan)| (*level, chan.clone())).collect();
    let feeder = tokio::spawn(async move {
        for _ in 0..150 {
            for (level, chan) in &talkers {
                chan.queue_frame(Frame::slinear(Format::Slinear, &[*level; 160]));
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    });

    for ((_, tech, _), expected) in parties.iter().zip([150i16, 50, 300]) {
        let mixed = tech
            .wait_for(Duration::from_secs(3), |f| {
                f.is_voice() && f.samples == 160 && f.pcm().iter().all(|&s| s == expected)
            })
            .await;
        assert!(mixed.is_some(), "no mix of {} arrived", expected);
    }
    feeder.abort();

    // p1 only ever hears some mix of the other two
    let (_, tech, _) = &parties[0];
    assert!(tech
        .frames()
        .iter()
        .filter(|f| f.is_voice())
        .flat_map(|f| f.pcm())
        .all(|s| [0, 200, -50, 150].contains(&s)));

    for (_, _, chan) in &parties {
        chan.queue_hangup(HangupCause::NormalClearing);
    }
    for _ in 0..200 {
        if bridge.channels().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(bridge.channels().is_empty());
}

#[tokio::test]
async fn mix_after_a_party_leaves() {
    let bridge = Bridge::new(BridgeCapability::MULTIMIX, BridgeFlags::empty()).unwrap();
    let (tech_a, a) = LocalTech::with_formats("Local/a", Format::Slinear.into());
    let (_, b) = LocalTech::with_formats("Local/b", Format::Slinear.into());
    let c = LocalTech::channel("Local/c");
    for chan in [&a, &b, &c] {
        bridge.impart(chan.clone(), None, BridgeFeatures::default()).unwrap();
    }

    bridge.depart(&c).await.unwrap();
    assert_eq!(bridge.members().len(), 2);

    let talker = b.clone();
    let feeder = tokio::spawn(async move {
        for _ in 0..150 {
            talker.queue_frame(Frame::slinear(Format::Slinear, &[1234; 160]));
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    });
    assert!(tech_a
        .wait_for(Duration::from_secs(3), |f| f.is_voice()
            && f.pcm().iter().all(|&s| s == 1234))
        .await
        .is_some());
    feeder.abort();
}

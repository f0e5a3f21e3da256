// RTP Control Protocol
//
// Sender/receiver report generation, report parsing with round trip
// estimation, and the FUR/BYE/APP odds and ends. One reception block per
// report, about the single remote source of the session.

use std::net::SocketAddr;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use byteorder::{BigEndian, ByteOrder};
use bytes::Bytes;
use rtcp::{
    goodbye::Goodbye,
    header::{Header, PacketType},
    packet::Packet,
    receiver_report::ReceiverReport,
    reception_report::ReceptionReport,
    sender_report::SenderReport,
    source_description::{
        SdesType, SourceDescription, SourceDescriptionChunk, SourceDescriptionItem,
    },
};
use serde::Serialize;
use tracing::{debug, info};
use trismedia_log::MANAGER_TARGET;
use webrtc_util::Unmarshal;

use crate::stats::{fraction_lost, RunningStat, RxStats};

pub const RTCP_HEADER_LEN: usize = 4;
pub const PT_FUR: u8 = 192;
pub const PT_SR: u8 = 200;
pub const PT_RR: u8 = 201;
pub const PT_SDES: u8 = 202;
pub const PT_BYE: u8 = 203;
pub const PT_APP: u8 = 204;

// seconds between 1900 and 1970
const NTP_EPOCH_OFFSET: u64 = 2_208_988_800;

/// NTP 32.32 fixed point time.
pub fn ntp_time(t: SystemTime) -> u64 {
    let since = t.duration_since(UNIX_EPOCH).unwrap_or_default();
    let secs = since.as_secs() + NTP_EPOCH_OFFSET;
    let frac = ((since.subsec_nanos() as u64) << 32) / 1_000_000_000;
    (secs << 32) | frac
}

// the middle 32 bits, as echoed in LSR
pub fn ntp_middle(ntp: u64) -> u32 {
    (ntp >> 16) as u32
}

/// Round trip in seconds from the LSR/DLSR a peer echoed back, all in
/// 1/65536 s units. None when the block carries no timing or the peer's
/// clock puts the answer in the past.
pub fn rtt_seconds(comp: u32, lsr: u32, dlsr: u32) -> Option<f64> {
    if lsr == 0 || dlsr == 0 {
        return None;
    }
    let rtt = comp.wrapping_sub(lsr).wrapping_sub(dlsr);
    if (rtt as i32) < 0 {
        return None;
    }
    let rtt = rtt as u64;
    // microseconds, keeping precision for small values
    let usec = if rtt < 4294 {
        (rtt * 1_000_000) >> 16
    } else {
        ((rtt * 1000) >> 16) * 1000
    };
    Some(usec as f64 / 1_000_000.0)
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControlEvent {
    SenderReport { ssrc: u32 },
    ReceiverReport { ssrc: u32 },
    FullUpdate,
    Bye { sources: Vec<u32> },
}

/// What the session hands over when a report is due.
pub struct ReportInput<'a> {
    pub ssrc: u32,
    pub their_ssrc: u32,
    pub txcount: u32,
    pub txoctets: u32,
    pub lastts: u32,
    pub rate: u32,
    pub rx: &'a mut RxStats,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ControlStats {
    pub sr_sent: u32,
    pub rr_sent: u32,
    pub reports_received: u32,
    // seconds
    pub rtt: RunningStat,
    pub rxjitter: RunningStat,
    pub rxlost: RunningStat,
    pub reported_jitter: RunningStat,
    pub reported_lost: RunningStat,
    pub last_rtt: f64,
    pub reported_lost_total: u32,
    pub reported_fraction: u8,
    pub reported_last_jitter: f64,
    pub reported_txcount: u32,
}

/// Control sub-object of a session.
pub struct Control {
    pub them: Option<SocketAddr>,
    pub cname: String,
    // middle NTP bits of the last SR we received, and when
    themrxlsr: u32,
    rxlsr_at: Option<Instant>,
    // packets sent as of the last report
    last_txcount: u32,
    pub stats: ControlStats,
}

impl Control {
    pub fn new(cname: String) -> Self {
        Self {
            them: None,
            cname,
            themrxlsr: 0,
            rxlsr_at: None,
            last_txcount: 0,
            stats: ControlStats::default(),
        }
    }

    fn reception_block(&mut self, input: &mut ReportInput<'_>, now: Instant) -> ReceptionReport {
        let (expected_interval, lost_interval) = input.rx.interval();
        let fraction = fraction_lost(expected_interval, lost_interval);
        let lost = input.rx.lost().clamp(0, 0x7fffff) as u32;
        let dlsr = match self.rxlsr_at {
            Some(at) => {
                let elapsed = now.saturating_duration_since(at);
                (elapsed.as_secs_f64() * 65536.0) as u32
            }
            None => 0,
        };

        if input.rx.rxcount > 0 {
            self.stats.rxjitter.push(input.rx.jitter);
            self.stats.rxlost.push(lost_interval.max(0) as f64);
        }

        ReceptionReport {
            ssrc: input.their_ssrc,
            fraction_lost: fraction,
            total_lost: lost,
            last_sequence_number: input.rx.extended_seq(),
            jitter: (input.rx.jitter * input.rate as f64) as u32,
            last_sender_report: self.themrxlsr,
            delay: dlsr,
        }
    }

    /// Build the compound report due now: an SR when media went out since
    /// the previous report, an RR otherwise, followed by SDES.
    pub fn build_report(&mut self, mut input: ReportInput<'_>) -> Result<(Bytes, bool)> {
        let now = Instant::now();
        let is_sr = input.txcount != self.last_txcount;
        self.last_txcount = input.txcount;

        // one block for the peer, zeroed until it has sent anything
        let block = self.reception_block(&mut input, now);
        let fraction = block.fraction_lost;
        let lost = block.total_lost;
        let reports = vec![block];

        let mut packets: Vec<Box<dyn Packet + Send + Sync>> = Vec::with_capacity(2);
        if is_sr {
            let ntp = ntp_time(SystemTime::now());
            packets.push(Box::new(SenderReport {
                ssrc: input.ssrc,
                ntp_time: ntp,
                rtp_time: input.lastts,
                packet_count: input.txcount,
                octet_count: input.txoctets,
                reports,
                profile_extensions: Bytes::new(),
            }));
            self.stats.sr_sent += 1;
        } else {
            packets.push(Box::new(ReceiverReport {
                ssrc: input.ssrc,
                reports,
                profile_extensions: Bytes::new(),
            }));
            self.stats.rr_sent += 1;
        }
        packets.push(Box::new(SourceDescription {
            chunks: vec![SourceDescriptionChunk {
                source: input.ssrc,
                items: vec![SourceDescriptionItem {
                    sdes_type: SdesType::SdesCname,
                    text: Bytes::from(self.cname.clone()),
                }],
            }],
        }));
        let data = rtcp::packet::marshal(&packets)?;

        info!(
            target: MANAGER_TARGET,
            event = "RTCPSent",
            to = ?self.them,
            report = if is_sr { "SR" } else { "RR" },
            our_ssrc = input.ssrc,
            their_ssrc = input.their_ssrc,
            sent_packets = input.txcount,
            sent_octets = input.txoctets,
            fraction_lost = fraction,
            cumulative_loss = lost,
            ia_jitter = input.rx.jitter,
            report_block = 1u64,
        );
        Ok((data, is_sr))
    }

    /// Walk a compound packet. `ssrc` is ours, so blocks about other
    /// sources are skipped.
    pub fn process(&mut self, buf: &[u8], ssrc: u32, rate: u32) -> Vec<ControlEvent> {
        self.process_at(buf, ssrc, rate, SystemTime::now(), Instant::now())
    }

    pub fn process_at(
        &mut self,
        buf: &[u8],
        ssrc: u32,
        rate: u32,
        wall: SystemTime,
        now: Instant,
    ) -> Vec<ControlEvent> {
        let mut events = Vec::new();
        let mut pos = 0;
        while pos + RTCP_HEADER_LEN <= buf.len() {
            if buf[pos] >> 6 != 2 {
                debug!("rtcp with bad version, dropping rest of compound");
                break;
            }
            let pt = buf[pos + 1];
            let len = (BigEndian::read_u16(&buf[pos + 2..]) as usize + 1) * 4;
            if pos + len > buf.len() {
                debug!("rtcp packet overruns datagram");
                break;
            }
            let packet = &buf[pos..pos + len];
            pos += len;

            match pt {
                PT_SR => match SenderReport::unmarshal(&mut &packet[..]) {
                    Ok(sr) => {
                        self.themrxlsr = ntp_middle(sr.ntp_time);
                        self.rxlsr_at = Some(now);
                        self.stats.reported_txcount = sr.packet_count;
                        self.report_blocks(&sr.reports, sr.ssrc, ssrc, rate, wall);
                        events.push(ControlEvent::SenderReport { ssrc: sr.ssrc });
                    }
                    Err(e) => debug!("bad sender report: {}", e),
                },
                PT_RR => match ReceiverReport::unmarshal(&mut &packet[..]) {
                    Ok(rr) => {
                        self.report_blocks(&rr.reports, rr.ssrc, ssrc, rate, wall);
                        events.push(ControlEvent::ReceiverReport { ssrc: rr.ssrc });
                    }
                    Err(e) => debug!("bad receiver report: {}", e),
                },
                PT_FUR => {
                    debug!("received full update request");
                    events.push(ControlEvent::FullUpdate);
                }
                PT_BYE => match Goodbye::unmarshal(&mut &packet[..]) {
                    Ok(bye) => {
                        info!("received rtcp bye from {:?}", bye.sources);
                        events.push(ControlEvent::Bye {
                            sources: bye.sources,
                        });
                    }
                    Err(e) => debug!("bad bye: {}", e),
                },
                PT_SDES => {}
                PT_APP => debug!("ignoring rtcp app packet"),
                _ => {
                    let kind = Header::unmarshal(&mut &packet[..])
                        .map(|h| h.packet_type)
                        .unwrap_or(PacketType::Unsupported);
                    debug!("unknown rtcp packet type {} ({:?})", pt, kind);
                }
            }
        }
        events
    }

    fn report_blocks(
        &mut self,
        reports: &[ReceptionReport],
        from: u32,
        ssrc: u32,
        rate: u32,
        wall: SystemTime,
    ) {
        let comp = ntp_middle(ntp_time(wall));
        for report in reports.iter().filter(|r| r.ssrc == ssrc) {
            if let Some(rtt) = rtt_seconds(comp, report.last_sender_report, report.delay) {
                self.stats.last_rtt = rtt;
                self.stats.rtt.push(rtt);
            }
            let jitter = report.jitter as f64 / rate.max(1) as f64;
            self.stats.reported_lost_total = report.total_lost;
            self.stats.reported_fraction = report.fraction_lost;
            self.stats.reported_last_jitter = jitter;
            self.stats.reported_jitter.push(jitter);
            self.stats.reported_lost.push(report.total_lost as f64);
            self.stats.reports_received += 1;

            info!(
                target: MANAGER_TARGET,
                event = "RTCPReceived",
                from_ssrc = from,
                our_ssrc = ssrc,
                fraction_lost = report.fraction_lost,
                packets_lost = report.total_lost,
                highest_sequence = report.last_sequence_number & 0xffff,
                sequence_number_cycles = report.last_sequence_number >> 16,
                ia_jitter = jitter,
                last_sr = report.last_sender_report,
                dlsr = report.delay as f64 / 65536.0,
                rtt = self.stats.last_rtt,
                report_block = 1u64,
            );
        }
    }
}

/// RFC 2032 full intra-frame request.
pub fn build_fur(ssrc: u32) -> Vec<u8> {
    let mut buf = vec![0u8; 8];
    buf[0] = 2 << 6;
    buf[1] = PT_FUR;
    BigEndian::write_u16(&mut buf[2..], 1);
    BigEndian::write_u32(&mut buf[4..], ssrc);
    buf
}

pub fn build_bye(ssrc: u32) -> Result<Bytes> {
    let packets: Vec<Box<dyn Packet + Send + Sync>> = vec![Box::new(Goodbye {
        sources: vec![ssrc],
        reason: Bytes::new(),
    })];
    Ok(rtcp::packet::marshal(&packets)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn rtt_paths() {
        assert_eq!(rtt_seconds(1000, 0, 10), None);
        assert_eq!(rtt_seconds(1000, 900, 200), None);
        // 0x1000 units is 62.5 ms
        let rtt = rtt_seconds(0x20000, 0x10000, 0x10000 - 0x1000).unwrap();
        assert!((rtt - 0.0625).abs() < 1e-3, "{}", rtt);
        // small values keep microsecond precision
        let rtt = rtt_seconds(1100, 1000, 50).unwrap();
        assert_eq!(rtt, ((50u64 * 1_000_000) >> 16) as f64 / 1_000_000.0);
    }

    #[test]
    fn ntp_middle_bits() {
        let ntp = 0x1234_5678_9abc_def0u64;
        assert_eq!(ntp_middle(ntp), 0x5678_9abc);
        let t = UNIX_EPOCH + Duration::from_millis(1500);
        let ntp = ntp_time(t);
        assert_eq!(ntp >> 32, NTP_EPOCH_OFFSET + 1);
        assert_eq!(ntp & 0xffff_ffff, 1 << 31);
    }

    #[test]
    fn rr_then_sr() {
        let mut control = Control::new("test@trismedia".to_string());
        let mut rx = RxStats::default();
        for seq in 0..10u16 {
            if seq != 4 {
                rx.on_sequence(seq, 160);
            }
        }
        let (data, is_sr) = control
            .build_report(ReportInput {
                ssrc: 1,
                their_ssrc: 2,
                txcount: 0,
                txoctets: 0,
                lastts: 0,
                rate: 8000,
                rx: &mut rx,
            })
            .unwrap();
        assert!(!is_sr);
        assert_eq!(data[1], PT_RR);
        let rr = ReceiverReport::unmarshal(&mut &data[..(BigEndian::read_u16(&data[2..]) as usize + 1) * 4]).unwrap();
        assert_eq!(rr.reports.len(), 1);
        assert_eq!(rr.reports[0].ssrc, 2);
        assert_eq!(rr.reports[0].total_lost, 1);
        // 1 of 10 lost, 256 / 10
        assert_eq!(rr.reports[0].fraction_lost, 25);
        assert_eq!(rr.reports[0].last_sequence_number, 9);

        let (data, is_sr) = control
            .build_report(ReportInput {
                ssrc: 1,
                their_ssrc: 2,
                txcount: 5,
                txoctets: 800,
                lastts: 1234,
                rate: 8000,
                rx: &mut rx,
            })
            .unwrap();
        assert!(is_sr);
        assert_eq!(data[1], PT_SR);
        let len = (BigEndian::read_u16(&data[2..]) as usize + 1) * 4;
        let sr = SenderReport::unmarshal(&mut &data[..len]).unwrap();
        assert_eq!(sr.packet_count, 5);
        assert_eq!(sr.rtp_time, 1234);
        // nothing new received in this interval
        assert_eq!(sr.reports[0].fraction_lost, 0);
        assert_eq!(data[len + 1], PT_SDES);
        assert_eq!(control.stats.sr_sent, 1);
        assert_eq!(control.stats.rr_sent, 1);
    }

    #[test]
    fn send_only_report_has_a_block() {
        let mut control = Control::new("send-only".to_string());
        let mut rx = RxStats::default();
        let (data, is_sr) = control
            .build_report(ReportInput {
                ssrc: 1,
                their_ssrc: 0,
                txcount: 3,
                txoctets: 480,
                lastts: 480,
                rate: 8000,
                rx: &mut rx,
            })
            .unwrap();
        assert!(is_sr);
        // report count in the low five bits
        assert_eq!(data[0] & 0x1f, 1);
        let len = (BigEndian::read_u16(&data[2..]) as usize + 1) * 4;
        let sr = SenderReport::unmarshal(&mut &data[..len]).unwrap();
        assert_eq!(sr.reports.len(), 1);
        assert_eq!(sr.reports[0].ssrc, 0);
        assert_eq!(sr.reports[0].fraction_lost, 0);
        assert_eq!(sr.reports[0].total_lost, 0);
        assert_eq!(sr.reports[0].jitter, 0);
        assert_eq!(control.stats.rxjitter.count, 0);
    }

    #[test]
    fn round_trip_from_echoed_report() {
        let wall = UNIX_EPOCH + Duration::from_secs(1_000_000);
        let start = Instant::now();
        let mut a = Control::new("a".to_string());
        let mut b = Control::new("b".to_string());

        // a's sender report as b sees it
        let sent_ntp = ntp_time(wall);
        let sr = SenderReport {
            ssrc: 10,
            ntp_time: sent_ntp,
            rtp_time: 0,
            packet_count: 1,
            octet_count: 160,
            reports: vec![],
            profile_extensions: Bytes::new(),
        };
        let packets: Vec<Box<dyn Packet + Send + Sync>> = vec![Box::new(sr)];
        let data = rtcp::packet::marshal(&packets).unwrap();
        let events = b.process_at(&data, 20, 8000, wall, start);
        assert_eq!(events, vec![ControlEvent::SenderReport { ssrc: 10 }]);
        assert_eq!(b.themrxlsr, ntp_middle(sent_ntp));

        // b answers 100 ms later, a sees the answer 150 ms after sending
        let mut rx = RxStats::default();
        rx.on_sequence(1, 160);
        let block = {
            let mut input = ReportInput {
                ssrc: 20,
                their_ssrc: 10,
                txcount: 0,
                txoctets: 0,
                lastts: 0,
                rate: 8000,
                rx: &mut rx,
            };
            b.reception_block(&mut input, start + Duration::from_millis(100))
        };
        let rr = ReceiverReport {
            ssrc: 20,
            reports: vec![block],
            profile_extensions: Bytes::new(),
        };
        let packets: Vec<Box<dyn Packet + Send + Sync>> = vec![Box::new(rr)];
        let data = rtcp::packet::marshal(&packets).unwrap();
        let events = a.process_at(
            &data,
            10,
            8000,
            wall + Duration::from_millis(150),
            Instant::now(),
        );
        assert_eq!(events, vec![ControlEvent::ReceiverReport { ssrc: 20 }]);
        assert!((a.stats.last_rtt - 0.05).abs() < 0.002, "{}", a.stats.last_rtt);
        assert_eq!(a.stats.rtt.count, 1);
    }

    #[test]
    fn fur_and_bye() {
        let mut control = Control::new("c".to_string());
        let mut data = build_fur(5);
        data.extend_from_slice(&build_bye(5).unwrap());
        let events = control.process(&data, 1, 8000);
        assert_eq!(
            events,
            vec![ControlEvent::FullUpdate, ControlEvent::Bye { sources: vec![5] }]
        );
        // truncated compound stops quietly
        assert!(control.process(&data[..6], 1, 8000).is_empty());
    }
}

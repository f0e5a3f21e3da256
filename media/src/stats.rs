use serde::Serialize;

pub const RTP_SEQ_MOD: u32 = 1 << 16;
// a sequence this far below the previous one is a wrap, not a reorder
const RECYCLE_WINDOW: u16 = 100;

/// Running min/max/mean/sample variance using Welford's recurrence.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
pub struct RunningStat {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    m2: f64,
}

impl RunningStat {
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        if self.count == 1 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn stdev(&self) -> f64 {
        self.variance().sqrt()
    }
}

/// Reception side accounting for one remote source.
#[derive(Debug, Clone, Default)]
pub struct RxStats {
    pub rxcount: u32,
    pub rxoctets: u32,
    pub seed_seq: u16,
    pub last_seq: u16,
    pub cycles: u32,
    // seconds
    pub jitter: f64,
    transit: f64,
    // local time in seconds that corresponds to seed_ts
    rxcore: Option<f64>,
    seed_ts: u32,
    expected_prior: u32,
    received_prior: u32,
}

impl RxStats {
    /// Account for one accepted packet.
    pub fn on_sequence(&mut self, seq: u16, octets: usize) {
        self.rxcount += 1;
        self.rxoctets = self.rxoctets.wrapping_add(octets as u32);
        if self.rxcount == 1 {
            self.seed_seq = seq;
            self.last_seq = seq;
            return;
        }
        let ahead = seq.wrapping_sub(self.last_seq);
        if ahead == 0 {
            return;
        }
        if ahead < 0x8000 {
            if seq < self.last_seq {
                self.cycles = self.cycles.wrapping_add(RTP_SEQ_MOD);
            }
            self.last_seq = seq;
        } else if self.last_seq.wrapping_sub(seq) >= RECYCLE_WINDOW {
            // far behind, the sender restarted its sequence
            self.cycles = self.cycles.wrapping_add(RTP_SEQ_MOD);
            self.last_seq = seq;
        }
        // otherwise a late packet, the highest sequence stands
    }

    pub fn extended_seq(&self) -> u32 {
        self.cycles.wrapping_add(self.last_seq as u32)
    }

    pub fn expected(&self) -> u32 {
        if self.rxcount == 0 {
            return 0;
        }
        self.extended_seq()
            .wrapping_sub(self.seed_seq as u32)
            .wrapping_add(1)
    }

    pub fn lost(&self) -> i64 {
        self.expected() as i64 - self.rxcount as i64
    }

    /// Advance the report interval and return `(expected, lost)` for it.
    pub fn interval(&mut self) -> (u32, i64) {
        let expected = self.expected();
        let expected_interval = expected.wrapping_sub(self.expected_prior);
        self.expected_prior = expected;
        let received_interval = self.rxcount.wrapping_sub(self.received_prior);
        self.received_prior = self.rxcount;
        (
            expected_interval,
            expected_interval as i64 - received_interval as i64,
        )
    }

    /// Update the interarrival jitter estimate. `now` is local time in
    /// seconds, `rate` the rtp clock of the payload. Returns the local time
    /// the packet maps to, which becomes the frame's delivery.
    pub fn on_timestamp(&mut self, now: f64, ts: u32, rate: u32, marker: bool) -> f64 {
        let rate = rate.max(1) as f64;
        let rxcore = match self.rxcore {
            Some(rxcore) if !marker => rxcore,
            _ => {
                // first packet or a new talkspurt, rebind the clock
                self.rxcore = Some(now);
                self.seed_ts = ts;
                self.transit = 0.0;
                return now;
            }
        };
        let sent = rxcore + ts.wrapping_sub(self.seed_ts) as i32 as f64 / rate;
        let transit = now - sent;
        let d = (transit - self.transit).abs();
        self.transit = transit;
        self.jitter += (d - self.jitter) / 16.0;
        sent
    }

    pub fn transit(&self) -> f64 {
        self.transit
    }

    pub fn reset(&mut self) {
        *self = RxStats::default();
    }
}

/// Fraction lost as carried in a reception report block.
pub fn fraction_lost(expected_interval: u32, lost_interval: i64) -> u8 {
    if expected_interval == 0 || lost_interval <= 0 {
        0
    } else {
        ((lost_interval << 8) / expected_interval as i64).min(255) as u8
    }
}

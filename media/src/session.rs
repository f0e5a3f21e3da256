//! One bidirectional media stream with one remote peer.
//!
//! A [`Session`] owns an even/odd UDP port pair. Reads are async and
//! return one [`Frame`] per datagram (the NULL frame when the datagram was
//! consumed internally). Writes are synchronous: packets go out through a
//! std clone of each socket, which does not wait on reactor readiness.
//! Periodic work (control
//! reports, digit continuation, text redundancy) runs on per-session tasks
//! driven by their own [`Ticker`], which only hold weak references.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::io::{self, ErrorKind};
use std::net::{IpAddr, SocketAddr, UdpSocket as StdUdpSocket};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Result};
use bitflags::bitflags;
use bytes::Bytes;
use lazy_static::lazy_static;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use serde::Serialize;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use trismedia_codec::{dtmf::Digit, ControlKind, Format, Frame, FrameKind, MediaKind};
use trismedia_log::MANAGER_TARGET;
use trismedia_timer::Ticker;

use crate::config::{rtp_config, RtpConfig};
use crate::dtmf::{DtmfReceiver, DtmfSender, DTMF_STEP};
use crate::packet::{self, RtpHeader, RtpPacket, RTP_HEADER_LEN};
use crate::payload::{Payload, PayloadRegistry};
use crate::red::{decode_red, RedEncoder};
use crate::rtcp::{build_bye, build_fur, Control, ControlEvent, ControlStats, ReportInput};
use crate::smoother::Smoother;
use crate::stun::{self, StunResult};

pub const MAX_DATAGRAM: usize = 8192;
// samples of drift tolerated before the timestamp is resynced
pub const MAX_TIMESTAMP_SKEW: u32 = 640;
const MAX_VIDEO_SKEW: u32 = 7200;
const DIGIT_INTERVAL: Duration = Duration::from_millis(20);
const END_PACKETS: usize = 3;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

lazy_static! {
    static ref SESSIONS: RwLock<HashMap<u64, Weak<Session>>> = RwLock::new(HashMap::new());
}

/// Snapshot of every live session.
pub fn sessions() -> Vec<Arc<Session>> {
    SESSIONS.read().values().filter_map(|s| s.upgrade()).collect()
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no available port in {0}-{1}")]
    NoPort(u16, u16),

    #[error("no payload type for {0}")]
    NoPayloadType(String),

    #[error("session is destroyed")]
    Destroyed,

    #[error("session needs a tokio runtime")]
    NoRuntime,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SessionFlags: u32 {
        // set by the read path when NAT learning adopted a source,
        // read by the send error throttling
        const NAT_ACTIVE = 1 << 0;
        // send to a private address failed before learning, warned once
        const NAT_WARNED = 1 << 1;
        // set_dtmf, read by the channel layer when picking dtmf transport
        const HAS_DTMF = 1 << 2;
        // set_dtmf_compensate, read by rfc2833 reception
        const DTMF_COMPENSATE = 1 << 3;
        // set_callback, frames are pushed to the callback task
        const CALLBACK_MODE = 1 << 4;
        // set by the bridge, read by the forwarding path
        const P2P_NEED_DTMF = 1 << 5;
        // written and read by the forwarding path, cleared on set_bridged
        const P2P_SENT_MARK = 1 << 6;
        // comfort noise notice shown once
        const WARNED_3389 = 1 << 7;
        // set_stun, read by the read path before answering binding requests
        const HAS_STUN = 1 << 8;
        // set_nat, symmetric rtp towards the observed source
        const NAT = 1 << 9;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrictState {
    Open,
    Learn,
    Closed,
}

/// Datagrams dropped on the read path, by reason.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Drops {
    pub malformed: u64,
    pub strict: u64,
    pub unknown_payload: u64,
    pub stun: u64,
}

/// Reception and transmission quality of a session.
#[derive(Debug, Clone, Serialize)]
pub struct RtpQuality {
    pub ssrc: u32,
    pub themssrc: u32,
    pub txcount: u32,
    pub txoctets: u32,
    pub rxcount: u32,
    pub rxoctets: u32,
    pub lost: i64,
    // seconds
    pub rxjitter: f64,
    pub txjitter: f64,
    pub reported_lost: u32,
    pub rtt: f64,
    pub control: ControlStats,
}

impl fmt::Display for RtpQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ssrc={};themssrc={};lp={};rxjitter={:.6};rxcount={};txjitter={:.6};txcount={};rlp={};rtt={:.6}",
            self.ssrc,
            self.themssrc,
            self.lost,
            self.rxjitter,
            self.rxcount,
            self.txjitter,
            self.txcount,
            self.reported_lost,
            self.rtt
        )
    }
}

pub type FrameCallback = Box<dyn Fn(Frame) + Send + Sync>;

struct Sockets {
    media: Arc<UdpSocket>,
    // send halves, the control reader owns the async control socket
    media_tx: Arc<StdUdpSocket>,
    control_tx: Arc<StdUdpSocket>,
}

struct SessionState {
    them: Option<SocketAddr>,
    alt_them: Option<SocketAddr>,
    strictrtp: bool,
    strict: StrictState,
    strict_addr: Option<SocketAddr>,
    flags: SessionFlags,
    need_marker: bool,

    ssrc: u32,
    themssrc: Option<u32>,
    last_rx_ssrc: Option<u32>,
    seqno: u16,
    lastts: u32,
    lastdigitts: u32,
    last_video_ts: u32,
    last_text_ts: u32,
    txcore: Option<Instant>,
    txcount: u32,
    txoctets: u32,

    lastrxts: Option<u32>,
    last_rx_video_ts: Option<u32>,
    last_rx_text_ts: Option<u32>,
    last_cisco_seq: Option<u16>,
    rx: crate::stats::RxStats,

    payloads: PayloadRegistry,
    framing: HashMap<Format, u32>,
    lasttxformat: Option<Format>,
    lastrxformat: Option<Format>,
    smoother: Option<Smoother>,

    dtmftimeout: u32,
    dtmf_rx: DtmfReceiver,
    dtmf_tx: Option<DtmfSender>,
    red: Option<RedEncoder>,

    bridged: Option<Weak<Session>>,
    control: Control,
    drops: Drops,
    pending: VecDeque<Frame>,
}

impl SessionState {
    fn new(ssrc: u32, config: &RtpConfig, local: SocketAddr) -> Self {
        Self {
            them: None,
            alt_them: None,
            strictrtp: config.strictrtp,
            strict: if config.strictrtp {
                StrictState::Learn
            } else {
                StrictState::Open
            },
            strict_addr: None,
            flags: SessionFlags::empty(),
            need_marker: false,
            ssrc,
            themssrc: None,
            last_rx_ssrc: None,
            seqno: RtpPacket::new_sequence(),
            lastts: RtpPacket::new_timestamp(),
            lastdigitts: 0,
            last_video_ts: 0,
            last_text_ts: 0,
            txcore: None,
            txcount: 0,
            txoctets: 0,
            lastrxts: None,
            last_rx_video_ts: None,
            last_rx_text_ts: None,
            last_cisco_seq: None,
            rx: Default::default(),
            payloads: PayloadRegistry::new(),
            framing: HashMap::new(),
            lasttxformat: None,
            lastrxformat: None,
            smoother: None,
            dtmftimeout: config.dtmftimeout,
            dtmf_rx: DtmfReceiver::default(),
            dtmf_tx: None,
            red: None,
            bridged: None,
            control: Control::new(format!("{:08x}@{}", ssrc, local.ip())),
            drops: Drops::default(),
            pending: VecDeque::new(),
        }
    }

    // rtp clock used for reports, from whatever codec moved last
    fn clock_rate(&self) -> u32 {
        self.lasttxformat
            .or(self.lastrxformat)
            .map(|f| f.rtp_clock_rate())
            .unwrap_or(8000)
    }

    // ms elapsed since the previous packet went out
    fn calc_txstamp(&mut self, delivery: Option<Instant>, now: Instant) -> u32 {
        let core = match self.txcore {
            Some(core) => core,
            None => {
                // align the first packet on a 20 ms boundary of the wall clock
                let micros = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.subsec_micros() % 20000)
                    .unwrap_or(0);
                now.checked_sub(Duration::from_micros(micros as u64))
                    .unwrap_or(now)
            }
        };
        let t = delivery.unwrap_or(now);
        let ms = t.saturating_duration_since(core).as_millis() as u32;
        self.txcore = Some(t);
        ms
    }
}

enum Admission {
    Drop,
    Stun(Option<Vec<u8>>),
    Accept(Option<Arc<Session>>),
}

pub struct Session {
    id: u64,
    local: SocketAddr,
    control_local: SocketAddr,
    epoch: Instant,
    rtcpinterval: u32,
    sockets: RwLock<Option<Sockets>>,
    state: Mutex<SessionState>,
    tasks: Mutex<HashMap<&'static str, JoinHandle<()>>>,
    wake: Arc<Notify>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("local", &self.local)
            .finish()
    }
}

fn try_bind_pair(ip: IpAddr, port: u32) -> io::Result<(StdUdpSocket, StdUdpSocket)> {
    if port + 1 > u16::MAX as u32 {
        return Err(io::Error::from(ErrorKind::AddrInUse));
    }
    let media = StdUdpSocket::bind(SocketAddr::new(ip, port as u16))?;
    let control = StdUdpSocket::bind(SocketAddr::new(ip, (port + 1) as u16))?;
    Ok((media, control))
}

/// Bind an even media port and the control port above it, starting at a
/// random place in the range and wrapping once.
fn bind_pair(ip: IpAddr, rtpstart: u16, rtpend: u16) -> Result<(StdUdpSocket, StdUdpSocket)> {
    let (start, end) = (rtpstart as u32, rtpend as u32);
    let wrap = (start + 1) & !1;
    let span = end.saturating_sub(start).max(1);
    let first = ((rand::thread_rng().gen_range(0..span) + start) & !1).max(wrap);
    let mut port = first;
    loop {
        match try_bind_pair(ip, port) {
            Ok(pair) => return Ok(pair),
            Err(e) if e.kind() == ErrorKind::AddrInUse => {}
            Err(e) => return Err(e.into()),
        }
        port += 2;
        if port > end {
            port = wrap;
        }
        if port == first {
            return Err(SessionError::NoPort(rtpstart, rtpend))?;
        }
    }
}

impl Session {
    /// Create a session on `ip` with ports from the live `rtp.conf` range.
    pub fn new(ip: IpAddr) -> Result<Arc<Session>> {
        Self::with_config(ip, rtp_config())
    }

    pub fn with_config(ip: IpAddr, config: Arc<RtpConfig>) -> Result<Arc<Session>> {
        let (media, control) = bind_pair(ip, config.rtpstart, config.rtpend)?;
        Self::from_sockets(media, control, &config)
    }

    /// Create a session on exactly `addr`, control on the port above.
    pub fn bind(addr: SocketAddr) -> Result<Arc<Session>> {
        let config = rtp_config();
        let (media, control) = try_bind_pair(addr.ip(), addr.port() as u32)?;
        Self::from_sockets(media, control, &config)
    }

    fn from_sockets(
        media: StdUdpSocket,
        control: StdUdpSocket,
        config: &RtpConfig,
    ) -> Result<Arc<Session>> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(SessionError::NoRuntime)?;
        }
        media.set_nonblocking(true)?;
        control.set_nonblocking(true)?;
        let local = media.local_addr()?;
        let control_local = control.local_addr()?;
        let media_tx = Arc::new(media.try_clone()?);
        let control_tx = Arc::new(control.try_clone()?);
        let media = Arc::new(UdpSocket::from_std(media)?);
        let control = Arc::new(UdpSocket::from_std(control)?);

        let ssrc = RtpPacket::new_ssrc();
        let session = Arc::new(Session {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            local,
            control_local,
            epoch: Instant::now(),
            rtcpinterval: config.rtcpinterval,
            sockets: RwLock::new(Some(Sockets {
                media,
                media_tx,
                control_tx,
            })),
            state: Mutex::new(SessionState::new(ssrc, config, local)),
            tasks: Mutex::new(HashMap::new()),
            wake: Arc::new(Notify::new()),
        });
        SESSIONS
            .write()
            .insert(session.id, Arc::downgrade(&session));
        session.spawn_control_reader(control);
        session.spawn_reports();
        debug!("rtp session {} on {} ssrc {:08x}", session.id, local, ssrc);
        Ok(session)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    pub fn control_addr(&self) -> SocketAddr {
        self.control_local
    }

    pub fn ssrc(&self) -> u32 {
        self.state.lock().ssrc
    }

    pub fn their_ssrc(&self) -> Option<u32> {
        self.state.lock().themssrc
    }

    pub fn flags(&self) -> SessionFlags {
        self.state.lock().flags
    }

    pub fn strict_state(&self) -> StrictState {
        self.state.lock().strict
    }

    pub fn drops(&self) -> Drops {
        self.state.lock().drops
    }

    pub fn is_destroyed(&self) -> bool {
        self.sockets.read().is_none()
    }

    fn media_socket(&self) -> Result<Arc<UdpSocket>> {
        match self.sockets.read().as_ref() {
            Some(sockets) => Ok(sockets.media.clone()),
            None => Err(SessionError::Destroyed)?,
        }
    }

    fn media_sender(&self) -> Result<Arc<StdUdpSocket>> {
        match self.sockets.read().as_ref() {
            Some(sockets) => Ok(sockets.media_tx.clone()),
            None => Err(SessionError::Destroyed)?,
        }
    }

    fn control_sender(&self) -> Option<Arc<StdUdpSocket>> {
        self.sockets.read().as_ref().map(|s| s.control_tx.clone())
    }

    fn spawn_task<F>(&self, name: &'static str, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task);
        if let Some(old) = self.tasks.lock().insert(name, handle) {
            old.abort();
        }
    }

    fn stop_task(&self, name: &'static str) {
        if let Some(handle) = self.tasks.lock().remove(name) {
            handle.abort();
        }
    }

    fn set_flag(&self, flag: SessionFlags, on: bool) {
        self.state.lock().flags.set(flag, on);
    }

    pub fn set_nat(&self, on: bool) {
        self.set_flag(SessionFlags::NAT, on);
    }

    pub fn set_dtmf(&self, on: bool) {
        self.set_flag(SessionFlags::HAS_DTMF, on);
    }

    pub fn set_dtmf_compensate(&self, on: bool) {
        self.set_flag(SessionFlags::DTMF_COMPENSATE, on);
    }

    pub fn set_stun(&self, on: bool) {
        self.set_flag(SessionFlags::HAS_STUN, on);
    }

    pub fn set_p2p_need_dtmf(&self, on: bool) {
        self.set_flag(SessionFlags::P2P_NEED_DTMF, on);
    }

    pub fn set_peer(&self, them: SocketAddr) {
        let mut st = self.state.lock();
        st.them = Some(them);
        st.control.them = Some(control_peer(them));
        if st.strictrtp {
            st.strict = StrictState::Learn;
        }
        st.need_marker = true;
    }

    pub fn set_alt_peer(&self, them: SocketAddr) {
        self.state.lock().alt_them = Some(them);
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.state.lock().them
    }

    pub fn alt_peer(&self) -> Option<SocketAddr> {
        self.state.lock().alt_them
    }

    /// Stop sending: forget the peer and stop control reports.
    pub fn stop(&self) {
        let mut st = self.state.lock();
        st.them = None;
        st.alt_them = None;
        st.control.them = None;
        st.flags.remove(SessionFlags::NAT_ACTIVE);
    }

    /// Forward incoming media straight to `peer` until cleared.
    pub fn set_bridged(&self, peer: Option<&Arc<Session>>) {
        let mut st = self.state.lock();
        st.bridged = peer.map(Arc::downgrade);
        st.flags.remove(SessionFlags::P2P_SENT_MARK);
    }

    pub fn bridged(&self) -> Option<Arc<Session>> {
        self.state.lock().bridged.as_ref().and_then(|b| b.upgrade())
    }

    pub fn payloads<R>(&self, f: impl FnOnce(&mut PayloadRegistry) -> R) -> R {
        f(&mut self.state.lock().payloads)
    }

    /// Packetisation for `format` in ms, overriding the codec default.
    pub fn set_framing(&self, format: Format, ms: u32) {
        self.state.lock().framing.insert(format, ms);
    }

    /// Media source changed behind us, mark the next packet.
    pub fn new_source(&self) {
        self.state.lock().need_marker = true;
    }

    /// Pick a fresh SSRC, e.g. after a transfer.
    pub fn change_source(&self) {
        let mut st = self.state.lock();
        st.ssrc = RtpPacket::new_ssrc();
        st.need_marker = true;
    }

    pub fn reset(&self) {
        let mut st = self.state.lock();
        st.txcore = None;
        st.lastts = 0;
        st.lastdigitts = 0;
        st.lastrxts = None;
        st.last_video_ts = 0;
        st.last_text_ts = 0;
        st.last_rx_video_ts = None;
        st.last_rx_text_ts = None;
        st.last_cisco_seq = None;
        st.lasttxformat = None;
        st.lastrxformat = None;
        st.themssrc = None;
        st.last_rx_ssrc = None;
        st.seqno = 0;
        st.smoother = None;
        st.dtmf_rx.reset();
        st.rx.reset();
    }

    /// Deliver every frame to `callback` from a reader task instead of
    /// through [`Session::read`]. `None` returns to polling.
    pub fn set_callback(self: &Arc<Self>, callback: Option<FrameCallback>) {
        match callback {
            Some(callback) => {
                let socket = match self.media_socket() {
                    Ok(socket) => socket,
                    Err(e) => {
                        debug!("rtp session {} callback: {}", self.id, e);
                        return;
                    }
                };
                self.set_flag(SessionFlags::CALLBACK_MODE, true);
                let weak = Arc::downgrade(self);
                let wake = self.wake.clone();
                let id = self.id;
                self.spawn_task("callback", async move {
                    let mut buf = vec![0u8; MAX_DATAGRAM];
                    loop {
                        let received = tokio::select! {
                            res = socket.recv_from(&mut buf) => match res {
                                Ok(received) => Some(received),
                                Err(e) => {
                                    debug!("rtp session {} reader done: {}", id, e);
                                    return;
                                }
                            },
                            _ = wake.notified() => None,
                        };
                        let frames = {
                            let session = match weak.upgrade() {
                                Some(session) => session,
                                None => return,
                            };
                            let mut frames = Vec::new();
                            if let Some((len, src)) = received {
                                frames.push(session.handle_datagram(&buf[..len], src));
                            }
                            frames.extend(session.state.lock().pending.drain(..));
                            frames
                        };
                        for frame in frames.into_iter().filter(|frame| !frame.is_null()) {
                            callback(frame);
                        }
                    }
                });
            }
            None => {
                self.set_flag(SessionFlags::CALLBACK_MODE, false);
                self.stop_task("callback");
            }
        }
    }

    fn push_frame(&self, frame: Frame) {
        self.state.lock().pending.push_back(frame);
        self.wake.notify_one();
    }

    /// Read one datagram. Returns the NULL frame when the datagram carried
    /// nothing for the channel.
    pub async fn read(&self) -> Result<Frame> {
        if let Some(frame) = self.state.lock().pending.pop_front() {
            return Ok(frame);
        }
        let socket = self.media_socket()?;
        let mut buf = vec![0u8; MAX_DATAGRAM];
        tokio::select! {
            res = socket.recv_from(&mut buf) => {
                let (len, src) = res?;
                Ok(self.handle_datagram(&buf[..len], src))
            }
            _ = self.wake.notified() => {
                Ok(self.state.lock().pending.pop_front().unwrap_or_else(Frame::null))
            }
        }
    }

    /// Process one datagram received on the media port from `src`.
    pub fn handle_datagram(&self, buf: &[u8], src: SocketAddr) -> Frame {
        let admission = {
            let mut st = self.state.lock();
            self.admit(&mut st, buf, src)
        };
        match admission {
            Admission::Drop => return Frame::null(),
            Admission::Stun(reply) => {
                if let Some(reply) = reply {
                    if let Ok(socket) = self.media_sender() {
                        if let Err(e) = socket.send_to(&reply, src) {
                            debug!("stun reply to {}: {}", src, e);
                        }
                    }
                }
                return Frame::null();
            }
            Admission::Accept(Some(peer)) => {
                if self.forward(&peer, buf) {
                    return Frame::null();
                }
            }
            Admission::Accept(None) => {}
        }

        let mut st = self.state.lock();
        let mut frames = self.decode(&mut st, buf, Instant::now()).into_iter();
        match frames.next() {
            Some(first) => {
                st.pending.extend(frames);
                first
            }
            None => Frame::null(),
        }
    }

    // stun, strict source and nat learning
    fn admit(&self, st: &mut SessionState, buf: &[u8], src: SocketAddr) -> Admission {
        if buf.len() < RTP_HEADER_LEN && !RtpPacket::is_stun(buf) {
            st.drops.malformed += 1;
            debug!("rtp read too short ({}) from {}", buf.len(), src);
            return Admission::Drop;
        }
        if RtpPacket::is_stun(buf) {
            if !st.flags.contains(SessionFlags::HAS_STUN) {
                st.drops.stun += 1;
                return Admission::Drop;
            }
            return match stun::handle_packet(buf, src) {
                StunResult::Accept(reply) => {
                    if st.them.is_none() {
                        st.them = Some(src);
                    }
                    Admission::Stun(Some(reply))
                }
                StunResult::Ignore => {
                    st.drops.stun += 1;
                    Admission::Stun(None)
                }
            };
        }

        if buf[0] >> 6 != packet::RTP_VERSION {
            st.drops.malformed += 1;
            debug!("dropping rtp packet from {}: version {}", src, buf[0] >> 6);
            return Admission::Drop;
        }

        match st.strict {
            StrictState::Learn => {
                debug!("strict rtp learned {}", src);
                st.strict_addr = Some(src);
                st.strict = StrictState::Closed;
                st.them = Some(src);
                st.control.them = Some(control_peer(src));
            }
            StrictState::Closed if st.strict_addr != Some(src) => {
                st.drops.strict += 1;
                debug!(
                    "dropping rtp from {}, strict rtp expects {:?}",
                    src, st.strict_addr
                );
                return Admission::Drop;
            }
            _ => {}
        }

        if st.flags.contains(SessionFlags::NAT)
            && st.them != Some(src)
            && st.alt_them != Some(src)
        {
            st.them = Some(src);
            st.control.them = Some(control_peer(src));
            st.flags.insert(SessionFlags::NAT_ACTIVE);
            st.flags.remove(SessionFlags::NAT_WARNED);
            debug!("rtp nat: got media from {}, now sending there", src);
        }

        Admission::Accept(st.bridged.as_ref().and_then(|b| b.upgrade()))
    }

    /// Hand a packet to the bridged peer. False when the core has to see it.
    fn forward(&self, peer: &Arc<Session>, buf: &[u8]) -> bool {
        let pt = RtpPacket::get_payload_type(buf);
        let (payload, need_dtmf, sent_mark) = {
            let st = self.state.lock();
            (
                st.payloads.code_of(pt as usize),
                st.flags.contains(SessionFlags::P2P_NEED_DTMF),
                st.flags.contains(SessionFlags::P2P_SENT_MARK),
            )
        };
        let payload = match payload {
            Some(payload) => payload,
            None => return false,
        };
        if need_dtmf && payload == Payload::Dtmf {
            return false;
        }
        let marker = !sent_mark || RtpPacket::get_marker(buf);
        if !peer.send_forwarded(buf, payload, marker) {
            return false;
        }
        if !sent_mark {
            self.set_flag(SessionFlags::P2P_SENT_MARK, true);
        }
        true
    }

    // called on the peer side of a forward
    fn send_forwarded(&self, buf: &[u8], payload: Payload, marker: bool) -> bool {
        let mut st = self.state.lock();
        let pt = match st.payloads.pt_of(payload) {
            Some(pt) => pt,
            None => return false,
        };
        // not negotiated on this side, let the core change formats
        if st.payloads.code_of(pt as usize).is_none() {
            return false;
        }
        let mut packet = buf.to_vec();
        RtpPacket::set_payload_type(&mut packet, pt);
        RtpPacket::set_marker(&mut packet, marker);
        if let Some(them) = st.them {
            self.transmit(&mut st, &packet, them);
        }
        true
    }

    fn decode(&self, st: &mut SessionState, buf: &[u8], now: Instant) -> Vec<Frame> {
        let (header, range) = match RtpHeader::decode(buf) {
            Ok(decoded) => decoded,
            Err(e) => {
                st.drops.malformed += 1;
                debug!("dropping rtp packet: {}", e);
                return Vec::new();
            }
        };
        let payload = &buf[range];
        let seq = header.sequence;
        let ts = header.timestamp;

        let mut marker = header.marker;
        if !marker && st.last_rx_ssrc.map_or(false, |ssrc| ssrc != header.ssrc) {
            debug!("forcing marker bit, ssrc changed");
            marker = true;
        }
        st.last_rx_ssrc = Some(header.ssrc);

        let prev_seq = if st.rx.rxcount > 0 {
            Some(st.rx.last_seq)
        } else {
            None
        };
        st.rx.on_sequence(seq, payload.len());
        if st.themssrc.is_none() {
            st.themssrc = Some(header.ssrc);
        }

        let code = match st.payloads.code_of(header.payload_type as usize) {
            Some(code) => code,
            None => {
                st.drops.unknown_payload += 1;
                debug!("unknown rtp payload type {}", header.payload_type);
                return Vec::new();
            }
        };

        let format = match code {
            Payload::Format(format) => format,
            Payload::Dtmf => {
                let compensate = st.flags.contains(SessionFlags::DTMF_COMPENSATE);
                let timeout = st.dtmftimeout;
                return st
                    .dtmf_rx
                    .process_rfc2833(payload, seq, ts, compensate, timeout);
            }
            Payload::CiscoDtmf => {
                let fresh = match st.last_cisco_seq {
                    None => true,
                    Some(last) => last <= seq || (last >= 65530 && seq <= 6),
                };
                if !fresh {
                    return Vec::new();
                }
                st.last_cisco_seq = Some(seq);
                let compensate = st.flags.contains(SessionFlags::DTMF_COMPENSATE);
                return st.dtmf_rx.process_cisco(payload, compensate);
            }
            Payload::Cn => return self.comfort_noise(st, payload).into_iter().collect(),
        };

        let mut frames = Vec::new();
        st.lastrxformat = Some(format);
        if let Some(end) = st.dtmf_rx.check_timeout(ts) {
            frames.push(end);
        }
        st.lastrxts = Some(ts);

        let data = Bytes::copy_from_slice(payload);
        let mut frame = match format.kind() {
            MediaKind::Audio => {
                let data = if format.is_slinear() {
                    swap16(&data)
                } else {
                    data
                };
                let mut frame = Frame::voice(format, data);
                let rate = format.rtp_clock_rate();
                let now_secs = now.saturating_duration_since(self.epoch).as_secs_f64();
                let sent = st.rx.on_timestamp(now_secs, ts, rate, marker);
                frame.delivery = Some(self.epoch + Duration::from_secs_f64(sent.max(0.0)));
                frame.ts = ts / (rate / 1000).max(1);
                frame
            }
            MediaKind::Video | MediaKind::Image => {
                let last = st.last_rx_video_ts.unwrap_or(ts);
                st.last_rx_video_ts = Some(ts);
                let mut frame = Frame::video(format, marker, data);
                frame.samples = ts.wrapping_sub(last);
                frame
            }
            MediaKind::Text => {
                let last = st.last_rx_text_ts.unwrap_or(ts);
                st.last_rx_text_ts = Some(ts);
                let text = if format == Format::T140Red {
                    let gap = prev_seq
                        .map(|prev| seq.wrapping_sub(prev.wrapping_add(1)) as i16 as i32)
                        .unwrap_or(0);
                    match decode_red(payload, gap) {
                        Some(text) => Bytes::from(text),
                        None => {
                            st.drops.malformed += 1;
                            return frames;
                        }
                    }
                } else {
                    data
                };
                if text.is_empty() {
                    return frames;
                }
                let mut frame = Frame::new(FrameKind::Text(Format::T140), text);
                frame.samples = ts.wrapping_sub(last);
                frame
            }
        };
        frame.seqno = seq;
        frame.src = "RTP";
        frames.push(frame);
        frames
    }

    fn comfort_noise(&self, st: &mut SessionState, payload: &[u8]) -> Option<Frame> {
        if !st.flags.contains(SessionFlags::WARNED_3389) {
            info!(
                "comfort noise from {:?}, noise generation is not supported",
                st.them
            );
            st.flags.insert(SessionFlags::WARNED_3389);
        }
        let (&level, params) = payload.split_first()?;
        let mut frame = Frame::cng(level);
        // spectral parameters are only kept when short
        if payload.len() < 24 {
            frame.data = Bytes::copy_from_slice(params);
        }
        frame.src = "RTP";
        Some(frame)
    }

    fn handle_control(&self, buf: &[u8], src: SocketAddr) {
        let events = {
            let mut st = self.state.lock();
            if st.flags.contains(SessionFlags::NAT) && st.control.them != Some(src) {
                debug!("rtcp nat: got control from {}", src);
                st.control.them = Some(src);
            }
            let (ssrc, rate) = (st.ssrc, st.clock_rate());
            st.control.process(buf, ssrc, rate)
        };
        for event in events {
            match event {
                ControlEvent::FullUpdate => {
                    let mut frame = Frame::control(ControlKind::VidUpdate);
                    frame.src = "RTCP";
                    self.push_frame(frame);
                }
                ControlEvent::Bye { sources } => {
                    info!("rtcp bye from {} for {:x?}", src, sources);
                }
                ControlEvent::SenderReport { .. } | ControlEvent::ReceiverReport { .. } => {}
            }
        }
    }

    fn spawn_control_reader(self: &Arc<Self>, socket: Arc<UdpSocket>) {
        let weak = Arc::downgrade(self);
        self.spawn_task("control", async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            loop {
                let (len, src) = match socket.recv_from(&mut buf).await {
                    Ok(received) => received,
                    Err(e) => {
                        debug!("rtcp read: {}", e);
                        return;
                    }
                };
                match weak.upgrade() {
                    Some(session) => session.handle_control(&buf[..len], src),
                    None => return,
                }
            }
        });
    }

    fn spawn_reports(self: &Arc<Self>) {
        if self.rtcpinterval == 0 {
            return;
        }
        let weak = Arc::downgrade(self);
        let period = Duration::from_millis(self.rtcpinterval as u64);
        self.spawn_task("report", async move {
            let mut ticker = match Ticker::new(period) {
                Ok(ticker) => ticker,
                Err(e) => {
                    warn!("rtcp report timer: {}", e);
                    return;
                }
            };
            loop {
                if let Err(e) = ticker.tick().await {
                    warn!("rtcp report timer: {}", e);
                    return;
                }
                let session = match weak.upgrade() {
                    Some(session) => session,
                    None => return,
                };
                if let Err(e) = session.send_report() {
                    debug!("rtcp report: {}", e);
                }
            }
        });
    }

    /// Send the SR or RR that is due now. Nothing goes out without a peer.
    pub fn send_report(&self) -> Result<()> {
        let (report, to) = {
            let mut guard = self.state.lock();
            let st = &mut *guard;
            let to = match st.control.them {
                Some(to) => to,
                None => return Ok(()),
            };
            let input = ReportInput {
                ssrc: st.ssrc,
                their_ssrc: st.themssrc.unwrap_or(0),
                txcount: st.txcount,
                txoctets: st.txoctets,
                lastts: st.lastts,
                rate: st.clock_rate(),
                rx: &mut st.rx,
            };
            let (report, _) = st.control.build_report(input)?;
            (report, to)
        };
        self.send_control(&report, to)
    }

    /// Ask the peer for a full video frame.
    pub fn send_fur(&self) -> Result<()> {
        let (fur, to) = {
            let st = self.state.lock();
            match st.control.them {
                Some(to) => (build_fur(st.ssrc), to),
                None => return Ok(()),
            }
        };
        self.send_control(&fur, to)
    }

    fn send_control(&self, buf: &[u8], to: SocketAddr) -> Result<()> {
        let socket = match self.control_sender() {
            Some(socket) => socket,
            None => return Err(SessionError::Destroyed)?,
        };
        socket.send_to(buf, to)?;
        Ok(())
    }

    // one packet out of the media socket, send errors throttled by nat state
    fn transmit(&self, st: &mut SessionState, packet: &[u8], them: SocketAddr) -> bool {
        let res = self
            .media_sender()
            .and_then(|socket| Ok(socket.send_to(packet, them)?));
        match res {
            Ok(_) => true,
            Err(e) => {
                let nat = st.flags.contains(SessionFlags::NAT);
                if !nat || st.flags.contains(SessionFlags::NAT_ACTIVE) {
                    debug!(
                        "rtp transmission error of packet {} to {}: {}",
                        st.seqno, them, e
                    );
                } else if !st.flags.contains(SessionFlags::NAT_WARNED) {
                    debug!(
                        "rtp nat: can't write to {}, waiting for the other end to send",
                        them
                    );
                    st.flags.insert(SessionFlags::NAT_WARNED);
                }
                false
            }
        }
    }

    /// Send a media frame. Frames are dropped quietly until a peer is set
    /// and while a digit is being sent.
    pub fn write(&self, frame: &Frame) -> Result<()> {
        let now = Instant::now();
        let mut guard = self.state.lock();
        let st = &mut *guard;
        let them = match st.them {
            Some(them) => them,
            None => return Ok(()),
        };
        match frame.kind {
            FrameKind::Voice(format) => self.write_voice(st, them, frame, format, now),
            FrameKind::Video { format, marker } => {
                let pt = payload_type(st, format)?;
                self.raw_write(st, them, frame, pt, marker, now);
                Ok(())
            }
            FrameKind::Text(format) => {
                if let Some(red) = st.red.as_mut() {
                    if format == Format::T140 {
                        red.buffer(&frame.data);
                        return Ok(());
                    }
                }
                let pt = payload_type(st, format)?;
                self.raw_write(st, them, frame, pt, false, now);
                Ok(())
            }
            FrameKind::Cng(level) => self.send_cng(st, them, level),
            _ => Ok(()),
        }
    }

    fn write_voice(
        &self,
        st: &mut SessionState,
        them: SocketAddr,
        frame: &Frame,
        format: Format,
        now: Instant,
    ) -> Result<()> {
        if st.dtmf_tx.is_some() {
            return Ok(());
        }
        let pt = payload_type(st, format)?;
        if st.lasttxformat != Some(format) {
            debug!("rtp tx format {:?} -> {}", st.lasttxformat, format);
            st.lasttxformat = Some(format);
            st.smoother = None;
        }
        let framing = st
            .framing
            .get(&format)
            .copied()
            .unwrap_or_else(|| format.default_framing());
        if framing > 0 && st.smoother.as_ref().map_or(true, |s| s.framing() != framing) {
            st.smoother = Smoother::new(format, framing);
        }
        let chunks = match st.smoother.as_mut() {
            Some(smoother) => {
                smoother.feed(frame)?;
                std::iter::from_fn(|| smoother.read()).collect::<Vec<_>>()
            }
            None => {
                self.raw_write(st, them, frame, pt, false, now);
                return Ok(());
            }
        };
        for chunk in &chunks {
            self.raw_write(st, them, chunk, pt, false, now);
        }
        Ok(())
    }

    fn raw_write(
        &self,
        st: &mut SessionState,
        them: SocketAddr,
        frame: &Frame,
        pt: u8,
        mut marker: bool,
        now: Instant,
    ) {
        let ms = st.calc_txstamp(frame.delivery, now);
        let format = frame.format().unwrap_or(Format::Ulaw);
        let samples = format.rtp_samples(frame.samples);
        match frame.kind {
            FrameKind::Voice(_) => {
                let pred = st.lastts.wrapping_add(samples);
                let clock = format.rtp_clock_rate() / 1000;
                st.lastts = st.lastts.wrapping_add(ms * clock);
                if frame.delivery.is_none() {
                    if skew(st.lastts, pred) < MAX_TIMESTAMP_SKEW {
                        st.lastts = pred;
                    } else {
                        debug!("timestamp skew {}, ms {}", skew(st.lastts, pred), ms);
                        marker = true;
                    }
                }
            }
            FrameKind::Video { .. } => {
                let pred = st.last_video_ts.wrapping_add(samples);
                st.lastts = st.lastts.wrapping_add(ms * 90);
                if frame.delivery.is_none() {
                    if skew(st.lastts, pred) < MAX_VIDEO_SKEW {
                        st.lastts = pred;
                        st.last_video_ts = st.last_video_ts.wrapping_add(samples);
                    } else {
                        st.last_video_ts = st.lastts;
                    }
                }
            }
            _ => {
                let pred = st.last_text_ts.wrapping_add(samples);
                st.lastts = st.lastts.wrapping_add(ms);
                if frame.delivery.is_none() {
                    if skew(st.lastts, pred) < MAX_VIDEO_SKEW {
                        st.lastts = pred;
                        st.last_text_ts = st.last_text_ts.wrapping_add(samples);
                    } else {
                        st.last_text_ts = st.lastts;
                    }
                }
            }
        }
        if st.need_marker {
            marker = true;
            st.need_marker = false;
        }
        if (st.lastts.wrapping_sub(st.lastdigitts) as i32) > 0 {
            st.lastdigitts = st.lastts;
        }

        let data = if format.is_slinear() {
            swap16(&frame.data)
        } else {
            frame.data.clone()
        };
        let packet = packet::build(pt, marker, st.seqno, st.lastts, st.ssrc, &data);
        if self.transmit(st, &packet, them) {
            st.txcount = st.txcount.wrapping_add(1);
            st.txoctets = st.txoctets.wrapping_add(data.len() as u32);
        }
        st.seqno = st.seqno.wrapping_add(1);
    }

    /// Send one comfort noise packet at `level` -dBov.
    pub fn sendcng(&self, level: u8) -> Result<()> {
        let mut st = self.state.lock();
        match st.them {
            Some(them) => self.send_cng(&mut st, them, level),
            None => Ok(()),
        }
    }

    fn send_cng(&self, st: &mut SessionState, them: SocketAddr, level: u8) -> Result<()> {
        let pt = match st.payloads.pt_of(Payload::Cn) {
            Some(pt) => pt,
            None => return Err(SessionError::NoPayloadType("CN".to_string()))?,
        };
        let packet = packet::build(pt, true, st.seqno, st.lastts, st.ssrc, &[level & 0x7f]);
        self.transmit(st, &packet, them);
        st.seqno = st.seqno.wrapping_add(1);
        Ok(())
    }

    /// Start an RFC 2833 event: two packets, the first marked, then one
    /// continuation packet every 20 ms until [`Session::senddigit_end`].
    pub fn senddigit_begin(self: &Arc<Self>, digit: char) -> Result<()> {
        let digit = match Digit::from_char(digit) {
            Some(digit) => digit,
            None => return Err(anyhow!("unknown dtmf digit {:?}", digit)),
        };
        {
            let mut guard = self.state.lock();
            let st = &mut *guard;
            let them = match st.them {
                Some(them) => them,
                None => return Ok(()),
            };
            let pt = match st.payloads.pt_of(Payload::Dtmf) {
                Some(pt) => pt,
                None => return Err(SessionError::NoPayloadType("telephone-event".to_string()))?,
            };
            st.lastdigitts = st.lastts.wrapping_add(DTMF_STEP);
            let mut sender = DtmfSender {
                digit,
                payload_type: pt,
                duration: DTMF_STEP,
                ts: st.lastdigitts,
            };
            for i in 0..2 {
                let event = sender.event(false).encode();
                let packet = packet::build(pt, i == 0, st.seqno, sender.ts, st.ssrc, &event);
                self.transmit(st, &packet, them);
                st.seqno = st.seqno.wrapping_add(1);
                sender.duration += DTMF_STEP;
            }
            st.dtmf_tx = Some(sender);
        }

        let weak = Arc::downgrade(self);
        self.spawn_task("dtmf", async move {
            let mut ticker = match Ticker::new(DIGIT_INTERVAL) {
                Ok(ticker) => ticker,
                Err(e) => {
                    warn!("dtmf timer: {}", e);
                    return;
                }
            };
            loop {
                if ticker.tick().await.is_err() {
                    return;
                }
                match weak.upgrade() {
                    Some(session) if session.senddigit_continuation() => {}
                    _ => return,
                }
            }
        });
        Ok(())
    }

    /// Send one continuation packet. False when no digit is in flight.
    pub fn senddigit_continuation(&self) -> bool {
        let mut guard = self.state.lock();
        let st = &mut *guard;
        let (mut sender, them) = match (st.dtmf_tx, st.them) {
            (Some(sender), Some(them)) => (sender, them),
            _ => return false,
        };
        let event = sender.event(false).encode();
        let packet = packet::build(
            sender.payload_type,
            false,
            st.seqno,
            sender.ts,
            st.ssrc,
            &event,
        );
        self.transmit(st, &packet, them);
        st.seqno = st.seqno.wrapping_add(1);
        sender.duration += DTMF_STEP;
        st.dtmf_tx = Some(sender);
        true
    }

    pub fn senddigit_end(self: &Arc<Self>, digit: char) -> Result<()> {
        self.senddigit_end_with_duration(digit, 0)
    }

    /// End the digit with three identical END packets. `duration_ms`
    /// extends the event when the measured press was longer than what
    /// was sent so far. A lone end sends the whole event.
    pub fn senddigit_end_with_duration(self: &Arc<Self>, digit: char, duration_ms: u32) -> Result<()> {
        if self.state.lock().dtmf_tx.is_none() {
            self.senddigit_begin(digit)?;
        }
        self.stop_task("dtmf");

        let mut guard = self.state.lock();
        let st = &mut *guard;
        let mut sender = match st.dtmf_tx.take() {
            Some(sender) => sender,
            None => return Ok(()),
        };
        let them = match st.them {
            Some(them) => them,
            None => return Ok(()),
        };
        let measured = duration_ms * crate::dtmf::DTMF_RATE / 1000;
        if measured > sender.duration {
            sender.duration = measured;
        }
        let event = sender.event(true).encode();
        let packet = packet::build(
            sender.payload_type,
            false,
            st.seqno,
            sender.ts,
            st.ssrc,
            &event,
        );
        for _ in 0..END_PACKETS {
            self.transmit(st, &packet, them);
        }
        st.lastts = st.lastts.wrapping_add(sender.duration);
        st.seqno = st.seqno.wrapping_add(1);
        Ok(())
    }

    pub fn sending_digit(&self) -> bool {
        self.state.lock().dtmf_tx.is_some()
    }

    /// Send T.140 text with `generations` redundant copies, flushed every
    /// `ti` ms.
    pub fn enable_red(self: &Arc<Self>, ti: u32, generations: usize) -> Result<()> {
        {
            let mut st = self.state.lock();
            let t140 = payload_type(&mut st, Format::T140)?;
            payload_type(&mut st, Format::T140Red)?;
            let pts: Vec<u8> = std::iter::repeat(t140).take(generations + 1).collect();
            st.red = Some(RedEncoder::new(ti, &pts));
        }
        let weak = Arc::downgrade(self);
        let period = Duration::from_millis(ti.max(1) as u64);
        self.spawn_task("red", async move {
            let mut ticker = match Ticker::new(period) {
                Ok(ticker) => ticker,
                Err(e) => {
                    warn!("red timer: {}", e);
                    return;
                }
            };
            loop {
                if ticker.tick().await.is_err() {
                    return;
                }
                match weak.upgrade() {
                    Some(session) => session.red_tick(),
                    None => return,
                }
            }
        });
        Ok(())
    }

    fn red_tick(&self) {
        let now = Instant::now();
        let now_ms = now.saturating_duration_since(self.epoch).as_millis() as u32;
        let mut guard = self.state.lock();
        let st = &mut *guard;
        let payload = match st.red.as_mut().and_then(|red| red.tick(now_ms)) {
            Some(payload) => payload,
            None => return,
        };
        let (them, pt) = match (st.them, st.payloads.pt_of(Payload::Format(Format::T140Red))) {
            (Some(them), Some(pt)) => (them, pt),
            _ => return,
        };
        let frame = Frame::new(FrameKind::Text(Format::T140Red), Bytes::from(payload));
        self.raw_write(st, them, &frame, pt, false, now);
    }

    /// Ask a STUN server for our public address. Must run before anything
    /// else reads the media socket.
    pub async fn stun_request(&self, server: SocketAddr, username: Option<&str>) -> Result<SocketAddr> {
        let socket = self.media_socket()?;
        stun::stun_request(&socket, server, username).await
    }

    pub fn quality(&self) -> RtpQuality {
        let st = self.state.lock();
        let stats = &st.control.stats;
        RtpQuality {
            ssrc: st.ssrc,
            themssrc: st.themssrc.unwrap_or(0),
            txcount: st.txcount,
            txoctets: st.txoctets,
            rxcount: st.rx.rxcount,
            rxoctets: st.rx.rxoctets,
            lost: st.rx.lost(),
            rxjitter: st.rx.jitter,
            txjitter: stats.reported_last_jitter,
            reported_lost: stats.reported_lost_total,
            rtt: stats.last_rtt,
            control: stats.clone(),
        }
    }

    /// Send BYE, close both sockets, stop every task and report the final
    /// counters. Further reads fail and writes are dropped.
    pub fn destroy(&self) {
        let sockets = self.sockets.write().take();
        let sockets = match sockets {
            Some(sockets) => sockets,
            None => return,
        };
        for (_, handle) in self.tasks.lock().drain() {
            handle.abort();
        }
        SESSIONS.write().remove(&self.id);

        let mut st = self.state.lock();
        st.smoother = None;
        st.red = None;
        st.dtmf_tx = None;
        st.bridged = None;
        if let Some(to) = st.control.them {
            match build_bye(st.ssrc) {
                Ok(bye) => {
                    if let Err(e) = sockets.control_tx.send_to(&bye, to) {
                        debug!("rtcp bye to {}: {}", to, e);
                    }
                }
                Err(e) => debug!("rtcp bye: {}", e),
            }
        }

        let stats = &st.control.stats;
        info!(
            target: MANAGER_TARGET,
            event = "RTPReceiverStat",
            ssrc = st.themssrc.unwrap_or(0),
            peer_ssrc = st.ssrc,
            received_packets = st.rx.rxcount,
            received_octets = st.rx.rxoctets,
            lost_packets = st.rx.lost(),
            jitter = st.rx.jitter,
            transit = st.rx.transit(),
            rr_count = stats.rr_sent,
            min_jitter = stats.rxjitter.min,
            avg_jitter = stats.rxjitter.mean,
            max_jitter = stats.rxjitter.max,
            stdev_jitter = stats.rxjitter.stdev(),
            min_lost = stats.rxlost.min,
            avg_lost = stats.rxlost.mean,
            max_lost = stats.rxlost.max,
            stdev_lost = stats.rxlost.stdev(),
        );
        info!(
            target: MANAGER_TARGET,
            event = "RTPSenderStat",
            ssrc = st.ssrc,
            peer_ssrc = st.themssrc.unwrap_or(0),
            sent_packets = st.txcount,
            sent_octets = st.txoctets,
            lost_packets = stats.reported_lost_total,
            jitter = stats.reported_last_jitter,
            sr_count = stats.sr_sent,
            rtt = stats.last_rtt,
            min_rtt = stats.rtt.min,
            avg_rtt = stats.rtt.mean,
            max_rtt = stats.rtt.max,
            stdev_rtt = stats.rtt.stdev(),
        );
        debug!("rtp session {} destroyed", self.id);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn control_peer(them: SocketAddr) -> SocketAddr {
    SocketAddr::new(them.ip(), them.port().wrapping_add(1))
}

fn payload_type(st: &mut SessionState, format: Format) -> Result<u8> {
    match st.payloads.pt_of(Payload::Format(format)) {
        Some(pt) => Ok(pt),
        None => Err(SessionError::NoPayloadType(format.to_string()))?,
    }
}

fn skew(a: u32, b: u32) -> u32 {
    (a.wrapping_sub(b) as i32).unsigned_abs()
}

// signed linear travels big endian on the wire and little endian in frames
fn swap16(data: &[u8]) -> Bytes {
    let mut out = data.to_vec();
    for pair in out.chunks_exact_mut(2) {
        pair.swap(0, 1);
    }
    Bytes::from(out)
}

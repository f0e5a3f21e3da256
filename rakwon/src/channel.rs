use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Weak};

use anyhow::Result;
use async_trait::async_trait;
use bytes::BytesMut;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use trismedia_codec::{ControlKind, Format, FormatMask, Frame, FrameKind, HangupCause};
use trismedia_media::Session;
use trismedia_switchboard::{Channel, ChannelState, ChannelTech};

use crate::config::ConferenceConfig;
use crate::protocol::{self, Message, ResultCode};
use crate::state::{Conference, Effect, Input, View};

// ports one participant index takes: audio, promoter video, speaker video
pub const PORT_STRIDE: u32 = 8;
const PROMOTER_OFFSET: u32 = 4;
const SPEAKER_OFFSET: u32 = 6;

#[derive(Debug, Error)]
pub enum RakwonError {
    #[error("conference destination {0} is not user:password@exten")]
    BadDestination(String),

    #[error("conference server {0} did not answer in time")]
    ConnectTimeout(String),

    #[error("conference call already placed")]
    AlreadyCalling,

    #[error("participant index {0} has no media ports")]
    BadIndex(u32),

    #[error("conference server closed the connection")]
    Closed,
}

/// Local or remote ports of participant `index`, counted from `base`.
pub fn media_ports(base: u16, index: u32) -> Option<[u16; 3]> {
    let audio = (base as u32).checked_add(index.checked_mul(PORT_STRIDE)?)?;
    // each session also takes the control port above
    if audio + SPEAKER_OFFSET + 1 > u16::MAX as u32 {
        return None;
    }
    Some([
        audio as u16,
        (audio + PROMOTER_OFFSET) as u16,
        (audio + SPEAKER_OFFSET) as u16,
    ])
}

/// `user:password@exten`
fn parse_destination(dest: &str) -> Option<(&str, &str, &str)> {
    let (credentials, exten) = dest.rsplit_once('@')?;
    let (user, password) = credentials.split_once(':')?;
    if user.is_empty() || exten.is_empty() {
        return None;
    }
    Some((user, password, exten))
}

struct Media {
    audio: Arc<Session>,
    promoter: Arc<Session>,
    speaker: Arc<Session>,
}

impl Media {
    fn destroy(&self) {
        for session in [&self.audio, &self.promoter, &self.speaker] {
            session.set_callback(None);
            session.destroy();
        }
    }
}

struct MediaState {
    media: Option<Media>,
    speaking: bool,
    view: View,
}

impl MediaState {
    fn teardown(&mut self) {
        if let Some(media) = self.media.take() {
            media.destroy();
        }
        self.speaking = false;
    }
}

/// Channel technology for one conference participant. Signalling runs
/// over TCP to the conference server, media over three RTP sessions.
pub struct RakwonTech {
    config: Arc<ConferenceConfig>,
    formats: FormatMask,
    alerts: Mutex<Option<UnboundedSender<Input>>>,
    media: Arc<Mutex<MediaState>>,
}

impl RakwonTech {
    pub fn new(config: Arc<ConferenceConfig>) -> Arc<RakwonTech> {
        Arc::new(RakwonTech {
            config,
            formats: [Format::Ulaw, Format::H263].into_iter().collect(),
            alerts: Mutex::new(None),
            media: Arc::new(Mutex::new(MediaState {
                media: None,
                speaking: false,
                view: View::Promoter,
            })),
        })
    }

    pub fn channel(name: &str, config: Arc<ConferenceConfig>) -> (Arc<RakwonTech>, Arc<Channel>) {
        let tech = Self::new(config);
        let chan = Channel::new(name, tech.clone());
        (tech, chan)
    }

    pub fn is_speaking(&self) -> bool {
        self.media.lock().speaking
    }

    pub fn view(&self) -> View {
        self.media.lock().view
    }

    pub fn has_media(&self) -> bool {
        self.media.lock().media.is_some()
    }

    fn alert(&self, input: Input) {
        let alerts = self.alerts.lock();
        match alerts.as_ref() {
            Some(alerts) => {
                if alerts.send(input).is_err() {
                    debug!("conference worker already gone");
                }
            }
            None => debug!("conference not connected, dropping {:?}", input),
        }
    }
}

#[async_trait]
impl ChannelTech for RakwonTech {
    fn name(&self) -> &'static str {
        "Rakwon"
    }

    fn capabilities(&self) -> FormatMask {
        self.formats
    }

    async fn call(&self, chan: &Arc<Channel>, dest: &str) -> Result<()> {
        if self.alerts.lock().is_some() {
            return Err(RakwonError::AlreadyCalling)?;
        }
        let (user, password, exten) = parse_destination(dest)
            .ok_or_else(|| RakwonError::BadDestination(dest.to_string()))?;
        let target = self.config.server_for(exten);
        let server = format!("{}:{}", target.server, target.port);
        let stream = match tokio::time::timeout(
            self.config.connect_timeout(),
            TcpStream::connect(server.as_str()),
        )
        .await
        {
            Ok(stream) => stream?,
            Err(_) => return Err(RakwonError::ConnectTimeout(server))?,
        };
        stream.set_nodelay(true)?;
        info!(channel = chan.name(), user, exten, "connected to conference server {}", server);

        let (sender, receiver) = mpsc::unbounded_channel();
        *self.alerts.lock() = Some(sender);
        chan.set_state(ChannelState::Ringing);

        let worker = Worker {
            chan: Arc::downgrade(chan),
            stream,
            conference: Conference::new(user, password, &target.subject),
            alerts: receiver,
            media: self.media.clone(),
            config: self.config.clone(),
            ready_at: None,
        };
        tokio::spawn(async move {
            worker.run().await;
        });
        Ok(())
    }

    fn hangup(&self, chan: &Channel) -> Result<()> {
        debug!(channel = chan.name(), "leaving conference");
        self.alert(Input::Hangup);
        self.alerts.lock().take();
        self.media.lock().teardown();
        Ok(())
    }

    fn write(&self, _chan: &Channel, frame: &Frame) -> Result<()> {
        let session = {
            let state = self.media.lock();
            let media = match state.media.as_ref() {
                Some(media) if state.speaking => media,
                // only the speaker is heard
                _ => return Ok(()),
            };
            match frame.kind {
                FrameKind::Voice(_) => media.audio.clone(),
                FrameKind::Video { .. } => media.speaker.clone(),
                _ => return Ok(()),
            }
        };
        session.write(frame)
    }

    fn indicate(&self, chan: &Channel, condition: ControlKind, _data: &[u8]) -> Result<()> {
        match condition {
            ControlKind::VidUpdate => {
                let session = self.media.lock().media.as_ref().map(|m| m.speaker.clone());
                if let Some(session) = session {
                    session.send_fur()?;
                }
            }
            _ => debug!(channel = chan.name(), "conference ignores {}", condition),
        }
        Ok(())
    }

    fn send_digit_end(&self, _chan: &Channel, digit: char, _duration_ms: u32) -> Result<()> {
        self.alert(Input::Digit(digit));
        Ok(())
    }

    fn send_text(&self, _chan: &Channel, text: &str) -> Result<()> {
        self.alert(Input::Text(text.to_string()));
        Ok(())
    }
}

struct Worker {
    chan: Weak<Channel>,
    stream: TcpStream,
    conference: Conference,
    alerts: UnboundedReceiver<Input>,
    media: Arc<Mutex<MediaState>>,
    config: Arc<ConferenceConfig>,
    ready_at: Option<Instant>,
}

impl Worker {
    async fn run(mut self) {
        let mut buf = BytesMut::with_capacity(4096);
        let mut inputs = vec![Input::Call];
        'outer: loop {
            for input in inputs.drain(..) {
                let effects = self.conference.handle(input);
                if self.apply(effects).await {
                    break 'outer;
                }
            }

            let ready_at = self.ready_at;
            let ready = async move {
                match ready_at {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };
            tokio::select! {
                biased;
                alert = self.alerts.recv() => {
                    inputs.push(alert.unwrap_or(Input::Hangup));
                }
                result = self.stream.read_buf(&mut buf) => {
                    match result {
                        Ok(0) => inputs.push(Input::Eof),
                        Ok(_) => self.decode(&mut buf, &mut inputs),
                        Err(e) => {
                            warn!("conference socket read: {}", e);
                            inputs.push(Input::Eof);
                        }
                    }
                }
                _ = ready => {
                    self.ready_at = None;
                    inputs.push(Input::ReadyTimer);
                }
            }
        }

        if let Err(e) = self.stream.shutdown().await {
            debug!("conference socket shutdown: {}", e);
        }
        self.media.lock().teardown();
        info!(state = %self.conference.state(), "conference session closed");
    }

    fn decode(&self, buf: &mut BytesMut, inputs: &mut Vec<Input>) {
        loop {
            match protocol::decode(buf) {
                Ok(Some(message)) => {
                    debug!(packet = %message.packet_type(), "conference rx");
                    inputs.push(Input::Message(message));
                }
                Ok(None) => return,
                Err(e) => {
                    // no way to resync an obfuscated stream
                    error!("conference stream corrupt: {}", e);
                    buf.clear();
                    inputs.push(Input::Eof);
                    return;
                }
            }
        }
    }

    /// Carry out `effects`. True once the connection is to be closed.
    async fn apply(&mut self, effects: Vec<Effect>) -> bool {
        let chan = self.chan.upgrade();
        for effect in effects {
            match effect {
                Effect::Send(message) => {
                    debug!(packet = %message.packet_type(), "conference tx");
                    let wire = match protocol::encode(&message) {
                        Ok(wire) => wire,
                        Err(e) => {
                            warn!(packet = %message.packet_type(), "conference message dropped: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = self.stream.write_all(&wire).await {
                        warn!("conference socket write: {}", e);
                    }
                }
                Effect::Close => return true,
                Effect::StartReadyTimer => {
                    self.ready_at = Some(Instant::now() + self.config.ready_delay());
                }
                Effect::Speaking(speaking) => {
                    info!("conference floor {}", if speaking { "taken" } else { "lost" });
                    self.media.lock().speaking = speaking;
                }
                Effect::View(view) => {
                    info!("conference view {}", view);
                    self.media.lock().view = view;
                }
                effect => {
                    let chan = match chan.as_ref() {
                        Some(chan) => chan,
                        None => continue,
                    };
                    self.apply_to_channel(chan, effect);
                }
            }
        }
        false
    }

    fn apply_to_channel(&self, chan: &Arc<Channel>, effect: Effect) {
        match effect {
            Effect::Answer => {
                chan.queue_control(ControlKind::Answer);
                chan.set_state(ChannelState::Up);
            }
            Effect::Prompt(prompt) => {
                chan.queue_control_data(ControlKind::TakeOffHook, prompt.as_bytes());
            }
            Effect::Forbidden => chan.queue_control(ControlKind::Forbidden),
            Effect::Hangup => chan.queue_hangup(HangupCause::NormalClearing),
            Effect::Text(text) => chan.queue_frame(Frame::text(Format::T140, &text)),
            Effect::SetupMedia(index) => {
                if let Err(e) = self.setup_media(chan, index) {
                    error!(channel = chan.name(), "conference media for index {}: {}", index, e);
                    chan.queue_hangup(HangupCause::Failure);
                }
            }
            other => debug!("unexpected conference effect {:?}", other),
        }
    }

    fn setup_media(&self, chan: &Arc<Channel>, index: u32) -> Result<()> {
        let local_ip: IpAddr = self.stream.local_addr()?.ip();
        let remote_ip: IpAddr = self.stream.peer_addr()?.ip();
        let local = media_ports(self.config.rtp_base, index).ok_or(RakwonError::BadIndex(index))?;
        let remote =
            media_ports(self.config.server_rtp_base, index).ok_or(RakwonError::BadIndex(index))?;

        let mut sessions: Vec<Arc<Session>> = Vec::with_capacity(3);
        for (port, peer) in local.iter().zip(remote.iter()) {
            let session = match Session::bind(SocketAddr::new(local_ip, *port)) {
                Ok(session) => session,
                Err(e) => {
                    for session in &sessions {
                        session.destroy();
                    }
                    return Err(e);
                }
            };
            session.set_peer(SocketAddr::new(remote_ip, *peer));
            sessions.push(session);
        }
        let media = Media {
            audio: sessions.remove(0),
            promoter: sessions.remove(0),
            speaker: sessions.remove(0),
        };

        let owner = Arc::downgrade(chan);
        media.audio.set_callback(Some(Box::new(move |frame: Frame| {
            if let Some(chan) = owner.upgrade() {
                chan.queue_frame(frame);
            }
        })));
        for (session, view) in [(&media.promoter, View::Promoter), (&media.speaker, View::Speaker)] {
            let owner = Arc::downgrade(chan);
            let state = Arc::downgrade(&self.media);
            session.set_callback(Some(Box::new(move |frame: Frame| {
                let selected = state.upgrade().map_or(false, |state| state.lock().view == view);
                if !selected {
                    return;
                }
                if let Some(chan) = owner.upgrade() {
                    chan.queue_frame(frame);
                }
            })));
        }

        info!(
            channel = chan.name(),
            index,
            audio = local[0],
            promoter = local[1],
            speaker = local[2],
            "conference media up"
        );
        let mut state = self.media.lock();
        state.teardown();
        state.media = Some(media);
        Ok(())
    }
}

/// Register `user` with the conference server behind `exten`.
pub async fn register_user(
    config: &ConferenceConfig,
    exten: &str,
    user: &str,
    password: &str,
    name: &str,
) -> Result<ResultCode> {
    let target = config.server_for(exten);
    let server = format!("{}:{}", target.server, target.port);
    let mut stream = match tokio::time::timeout(
        config.connect_timeout(),
        TcpStream::connect(server.as_str()),
    )
    .await
    {
        Ok(stream) => stream?,
        Err(_) => return Err(RakwonError::ConnectTimeout(server))?,
    };
    let request = Message::RegisterUser {
        user: user.to_string(),
        password: password.to_string(),
        name: name.to_string(),
    };
    stream.write_all(&protocol::encode(&request)?).await?;

    let mut buf = BytesMut::with_capacity(1024);
    loop {
        while let Some(message) = protocol::decode(&mut buf)? {
            match message {
                Message::RegisterUserResult { result } => {
                    info!(user, "registration {}", result);
                    return Ok(result);
                }
                other => debug!(packet = %other.packet_type(), "ignored while registering"),
            }
        }
        let read = tokio::time::timeout(config.connect_timeout(), stream.read_buf(&mut buf)).await;
        match read {
            Ok(Ok(0)) => return Err(RakwonError::Closed)?,
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(e)?,
            Err(_) => return Err(RakwonError::ConnectTimeout(server))?,
        }
    }
}

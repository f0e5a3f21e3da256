//! Client side of a conference session.
//!
//! [`Conference`] is a pure state machine: it consumes [`Input`]s (server
//! messages, timers, local digits) and returns the [`Effect`]s the channel
//! driver has to carry out. No sockets live here.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::protocol::{Message, ResultCode};

/// Index the server gives the conference promoter.
pub const PROMOTER_INDEX: u32 = 0;

pub const SPEAK_DIGIT: char = '5';
pub const VIEW_PROMOTER_DIGIT: char = '1';
pub const VIEW_SPEAKER_DIGIT: char = '2';

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum State {
    #[strum(serialize = "DISCONNECTED")]
    Disconnected,
    #[strum(serialize = "CONNECTING")]
    Connecting,
    #[strum(serialize = "READY_WAIT")]
    ReadyWait,
    #[strum(serialize = "READY")]
    Ready,
    #[strum(serialize = "ACTIVE")]
    Active,
    #[strum(serialize = "TERM")]
    Term,
}

/// Which video stream the participant receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum View {
    #[strum(serialize = "promoter")]
    Promoter,
    #[strum(serialize = "speaker")]
    Speaker,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Call,
    Message(Message),
    ReadyTimer,
    Digit(char),
    Text(String),
    Eof,
    Hangup,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Send(Message),
    Answer,
    Prompt(&'static str),
    Forbidden,
    Hangup,
    Close,
    StartReadyTimer,
    SetupMedia(u32),
    Speaking(bool),
    View(View),
    Text(String),
}

#[derive(Debug)]
pub struct Conference {
    state: State,
    user: String,
    password: String,
    subject: String,
    index: Option<u32>,
    speaking: bool,
    requested: bool,
    view: View,
    fps: Option<u32>,
    participants: BTreeMap<u32, String>,
    levels: BTreeMap<u32, u32>,
}

impl Conference {
    pub fn new(user: &str, password: &str, subject: &str) -> Conference {
        Conference {
            state: State::Disconnected,
            user: user.to_string(),
            password: password.to_string(),
            subject: subject.to_string(),
            index: None,
            speaking: false,
            requested: false,
            view: View::Promoter,
            fps: None,
            participants: BTreeMap::new(),
            levels: BTreeMap::new(),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn index(&self) -> Option<u32> {
        self.index
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    pub fn view(&self) -> View {
        self.view
    }

    pub fn fps(&self) -> Option<u32> {
        self.fps
    }

    pub fn participants(&self) -> &BTreeMap<u32, String> {
        &self.participants
    }

    pub fn level(&self, index: u32) -> Option<u32> {
        self.levels.get(&index).copied()
    }

    pub fn handle(&mut self, input: Input) -> Vec<Effect> {
        if self.state == State::Term {
            debug!(input = ?input, "conference already terminated");
            return Vec::new();
        }
        let before = self.state;
        let effects = match input {
            Input::Call => self.call(),
            Input::Message(message) => self.message(message),
            Input::ReadyTimer => self.ready_timer(),
            Input::Digit(digit) => self.digit(digit),
            Input::Text(text) => self.text(text),
            Input::Eof => self.eof(),
            Input::Hangup => self.local_hangup(),
        };
        if before != self.state {
            info!(user = self.user, "conference state {} -> {}", before, self.state);
        }
        effects
    }

    fn call(&mut self) -> Vec<Effect> {
        if self.state != State::Disconnected {
            return Vec::new();
        }
        self.state = State::Connecting;
        vec![Effect::Send(Message::LoginCheck {
            user: self.user.clone(),
            password: self.password.clone(),
            subject: self.subject.clone(),
        })]
    }

    fn terminate(&mut self, prompt: Option<&'static str>) -> Vec<Effect> {
        self.state = State::Term;
        self.speaking = false;
        let mut effects = Vec::with_capacity(3);
        match prompt {
            Some(prompt) => effects.push(Effect::Prompt(prompt)),
            None => effects.push(Effect::Forbidden),
        }
        effects.push(Effect::Hangup);
        effects.push(Effect::Close);
        effects
    }

    fn message(&mut self, message: Message) -> Vec<Effect> {
        match (self.state, message) {
            (State::Connecting, Message::LoginCheckResult { result, index }) => {
                if result != ResultCode::Success {
                    warn!(user = self.user, result = %result, "login refused");
                    return self.terminate(result.prompt());
                }
                self.index = Some(index);
                self.state = State::ReadyWait;
                vec![
                    Effect::Answer,
                    Effect::Prompt("wait-moment"),
                    Effect::SetupMedia(index),
                    Effect::StartReadyTimer,
                ]
            }
            (State::Ready, Message::UserReadyResult { result }) => match result {
                ResultCode::Success => Vec::new(),
                ResultCode::InvalidUser => self.terminate(Some("logged-in")),
                other => self.terminate(other.prompt()),
            },
            (State::Ready, Message::StartConf) => {
                self.state = State::Active;
                vec![
                    Effect::Prompt("conference-start"),
                    Effect::Send(Message::UserReady {
                        index: self.index.unwrap_or_default(),
                        start: true,
                    }),
                ]
            }
            (State::ReadyWait | State::Ready | State::Active, Message::UserExit { index }) => {
                if Some(index) == self.index {
                    self.terminate(Some("out-of-conf"))
                } else if index == PROMOTER_INDEX {
                    self.terminate(Some("end-of-conf"))
                } else {
                    self.participants.remove(&index);
                    self.levels.remove(&index);
                    Vec::new()
                }
            }
            (State::Active, Message::SetSpeakingResult { index }) => {
                self.requested = false;
                if Some(index) == self.index {
                    if self.speaking {
                        return Vec::new();
                    }
                    self.speaking = true;
                    vec![Effect::Speaking(true)]
                } else if self.speaking {
                    self.speaking = false;
                    vec![Effect::Prompt("not-right-speaking"), Effect::Speaking(false)]
                } else {
                    Vec::new()
                }
            }
            (State::Active, Message::AcceptFailed { index }) => {
                if Some(index) == self.index {
                    self.requested = false;
                }
                Vec::new()
            }
            (_, Message::UserLogin { index, user }) => {
                self.participants.insert(index, user);
                Vec::new()
            }
            (_, Message::TextNotice { index, text }) => {
                debug!(from = index, "conference text");
                vec![Effect::Text(text)]
            }
            (_, Message::ChangeFps { fps }) => {
                self.fps = Some(fps);
                Vec::new()
            }
            (_, Message::Louding { index, level }) => {
                self.levels.insert(index, level);
                Vec::new()
            }
            (state, message) => {
                debug!(state = %state, packet = %message.packet_type(), "ignoring conference message");
                Vec::new()
            }
        }
    }

    fn ready_timer(&mut self) -> Vec<Effect> {
        if self.state != State::ReadyWait {
            return Vec::new();
        }
        self.state = State::Ready;
        vec![Effect::Send(Message::UserReady {
            index: self.index.unwrap_or_default(),
            start: false,
        })]
    }

    fn digit(&mut self, digit: char) -> Vec<Effect> {
        if self.state != State::Active {
            return Vec::new();
        }
        match digit {
            SPEAK_DIGIT if !self.speaking && !self.requested => {
                self.requested = true;
                vec![Effect::Send(Message::SetSpeaking {
                    index: self.index.unwrap_or_default(),
                })]
            }
            VIEW_PROMOTER_DIGIT => self.set_view(View::Promoter),
            VIEW_SPEAKER_DIGIT => self.set_view(View::Speaker),
            _ => Vec::new(),
        }
    }

    fn set_view(&mut self, view: View) -> Vec<Effect> {
        if self.view == view {
            return Vec::new();
        }
        self.view = view;
        vec![Effect::View(view)]
    }

    fn text(&mut self, text: String) -> Vec<Effect> {
        match self.state {
            State::ReadyWait | State::Ready | State::Active => {
                vec![Effect::Send(Message::SendText { text })]
            }
            _ => Vec::new(),
        }
    }

    fn eof(&mut self) -> Vec<Effect> {
        match self.state {
            State::Disconnected => {
                self.state = State::Term;
                vec![Effect::Close]
            }
            _ => self.terminate(Some("end-of-conf")),
        }
    }

    fn local_hangup(&mut self) -> Vec<Effect> {
        let mut effects = Vec::with_capacity(2);
        if let Some(index) = self.index {
            effects.push(Effect::Send(Message::ExitRequest { index }));
        }
        effects.push(Effect::Close);
        self.state = State::Term;
        self.speaking = false;
        effects
    }
}

//! Conference server wire format.
//!
//! Every message is a 9 byte little endian header
//! `{ packet_id: u32, packet_type: u8, data_len: u32 }` and `data_len`
//! bytes of body. The whole message is obfuscated byte by byte with
//! `0x50`. Strings are a `u16` count of UTF-16 code units followed by the
//! units.

use byteorder::{ByteOrder, LittleEndian};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use strum_macros::{self, EnumString};
use thiserror::Error;

pub const PACKET_ID: u32 = 0x1974_0525;
pub const HEADER_LEN: usize = 9;
pub const OBFUSCATION: u8 = 0x50;
// larger bodies are treated as a corrupt stream
pub const MAX_BODY: usize = 64 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("bad packet id {0:#x}")]
    BadMagic(u32),

    #[error("unknown packet type {0:#x}")]
    UnknownType(u8),

    #[error("packet body of {0} bytes is too large")]
    TooLarge(usize),

    #[error("packet body ended early")]
    Short,

    #[error("string is not valid utf-16")]
    BadString,

    #[error("string of {0} utf-16 units does not fit a length prefix")]
    StringTooLong(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[repr(u8)]
pub enum PacketType {
    ReqRegisterUser = 0x01,
    ResRegisterUser = 0x02,
    ReqLoginCheck = 0x03,
    ResLoginCheck = 0x04,
    ReqUserReady = 0x05,
    ResUserReady = 0x06,
    NotifyUserLogin = 0x07,
    NotifyUserExit = 0x08,
    ReqSendText = 0x09,
    NotifySendText = 0x10,
    ReqSetSpeaking = 0x11,
    ResSetSpeaking = 0x12,
    NotifyChangeFps = 0x13,
    NotifyAcceptFailed = 0x14,
    NotifyStartConf = 0x15,
    ReqUserExit = 0x16,
    ResUserExit = 0x17,
    NotifyLouding = 0x18,
}

impl TryFrom<u8> for PacketType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use PacketType::*;
        let kind = match value {
            0x01 => ReqRegisterUser,
            0x02 => ResRegisterUser,
            0x03 => ReqLoginCheck,
            0x04 => ResLoginCheck,
            0x05 => ReqUserReady,
            0x06 => ResUserReady,
            0x07 => NotifyUserLogin,
            0x08 => NotifyUserExit,
            0x09 => ReqSendText,
            0x10 => NotifySendText,
            0x11 => ReqSetSpeaking,
            0x12 => ResSetSpeaking,
            0x13 => NotifyChangeFps,
            0x14 => NotifyAcceptFailed,
            0x15 => NotifyStartConf,
            0x16 => ReqUserExit,
            0x17 => ResUserExit,
            0x18 => NotifyLouding,
            other => return Err(ProtocolError::UnknownType(other)),
        };
        Ok(kind)
    }
}

/// Result codes carried by the `RES_*` packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display, EnumString)]
pub enum ResultCode {
    #[strum(serialize = "SUCCESS")]
    Success,
    #[strum(serialize = "LOGGED_IN")]
    LoggedIn,
    #[strum(serialize = "EXCEED_LIMIT")]
    ExceedLimit,
    #[strum(serialize = "DELETED_USER")]
    DeletedUser,
    #[strum(serialize = "INVALID_PASSWORD")]
    InvalidPassword,
    #[strum(serialize = "INVALID_USER")]
    InvalidUser,
    #[strum(serialize = "UNALLOWED_USER")]
    UnallowedUser,
    #[strum(serialize = "KEY_RECEIVING")]
    KeyReceiving,
    #[strum(serialize = "OTHER")]
    Other(u32),
}

impl ResultCode {
    pub fn code(&self) -> u32 {
        match self {
            ResultCode::Success => 0,
            ResultCode::LoggedIn => 1,
            ResultCode::ExceedLimit => 2,
            ResultCode::DeletedUser => 3,
            ResultCode::InvalidPassword => 4,
            ResultCode::InvalidUser => 5,
            ResultCode::UnallowedUser => 6,
            ResultCode::KeyReceiving => 7,
            ResultCode::Other(code) => *code,
        }
    }

    /// Prompt telling the user why they were refused. `None` for codes the
    /// user can't do anything about.
    pub fn prompt(&self) -> Option<&'static str> {
        match self {
            ResultCode::LoggedIn => Some("logged-in"),
            ResultCode::ExceedLimit => Some("exceed-limit"),
            ResultCode::DeletedUser => Some("deleted-user"),
            ResultCode::InvalidPassword => Some("invalid-password"),
            ResultCode::InvalidUser => Some("invalid-user"),
            ResultCode::UnallowedUser | ResultCode::KeyReceiving => Some("unallowed-user"),
            ResultCode::Success | ResultCode::Other(_) => None,
        }
    }
}

impl From<u32> for ResultCode {
    fn from(code: u32) -> Self {
        match code {
            0 => ResultCode::Success,
            1 => ResultCode::LoggedIn,
            2 => ResultCode::ExceedLimit,
            3 => ResultCode::DeletedUser,
            4 => ResultCode::InvalidPassword,
            5 => ResultCode::InvalidUser,
            6 => ResultCode::UnallowedUser,
            7 => ResultCode::KeyReceiving,
            other => ResultCode::Other(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    RegisterUser {
        user: String,
        password: String,
        name: String,
    },
    RegisterUserResult {
        result: ResultCode,
    },
    LoginCheck {
        user: String,
        password: String,
        subject: String,
    },
    // index is the participant slot media ports are derived from
    LoginCheckResult {
        result: ResultCode,
        index: u32,
    },
    UserReady {
        index: u32,
        start: bool,
    },
    UserReadyResult {
        result: ResultCode,
    },
    UserLogin {
        index: u32,
        user: String,
    },
    UserExit {
        index: u32,
    },
    SendText {
        text: String,
    },
    TextNotice {
        index: u32,
        text: String,
    },
    SetSpeaking {
        index: u32,
    },
    // index is whoever got the floor
    SetSpeakingResult {
        index: u32,
    },
    ChangeFps {
        fps: u32,
    },
    AcceptFailed {
        index: u32,
    },
    StartConf,
    ExitRequest {
        index: u32,
    },
    ExitResult {
        result: ResultCode,
    },
    Louding {
        index: u32,
        level: u32,
    },
}

impl Message {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Message::RegisterUser { .. } => PacketType::ReqRegisterUser,
            Message::RegisterUserResult { .. } => PacketType::ResRegisterUser,
            Message::LoginCheck { .. } => PacketType::ReqLoginCheck,
            Message::LoginCheckResult { .. } => PacketType::ResLoginCheck,
            Message::UserReady { .. } => PacketType::ReqUserReady,
            Message::UserReadyResult { .. } => PacketType::ResUserReady,
            Message::UserLogin { .. } => PacketType::NotifyUserLogin,
            Message::UserExit { .. } => PacketType::NotifyUserExit,
            Message::SendText { .. } => PacketType::ReqSendText,
            Message::TextNotice { .. } => PacketType::NotifySendText,
            Message::SetSpeaking { .. } => PacketType::ReqSetSpeaking,
            Message::SetSpeakingResult { .. } => PacketType::ResSetSpeaking,
            Message::ChangeFps { .. } => PacketType::NotifyChangeFps,
            Message::AcceptFailed { .. } => PacketType::NotifyAcceptFailed,
            Message::StartConf => PacketType::NotifyStartConf,
            Message::ExitRequest { .. } => PacketType::ReqUserExit,
            Message::ExitResult { .. } => PacketType::ResUserExit,
            Message::Louding { .. } => PacketType::NotifyLouding,
        }
    }

    fn write_body(&self, body: &mut BytesMut) -> Result<(), ProtocolError> {
        match self {
            Message::RegisterUser {
                user,
                password,
                name,
            } => {
                put_string(body, user)?;
                put_string(body, password)?;
                put_string(body, name)?;
            }
            Message::LoginCheck {
                user,
                password,
                subject,
            } => {
                put_string(body, user)?;
                put_string(body, password)?;
                put_string(body, subject)?;
            }
            Message::RegisterUserResult { result }
            | Message::UserReadyResult { result }
            | Message::ExitResult { result } => body.put_u32_le(result.code()),
            Message::LoginCheckResult { result, index } => {
                body.put_u32_le(result.code());
                body.put_u32_le(*index);
            }
            Message::UserReady { index, start } => {
                body.put_u32_le(*index);
                body.put_u8(*start as u8);
            }
            Message::UserLogin { index, user } => {
                body.put_u32_le(*index);
                put_string(body, user)?;
            }
            Message::SendText { text } => put_string(body, text)?,
            Message::TextNotice { index, text } => {
                body.put_u32_le(*index);
                put_string(body, text)?;
            }
            Message::UserExit { index }
            | Message::SetSpeaking { index }
            | Message::SetSpeakingResult { index }
            | Message::AcceptFailed { index }
            | Message::ExitRequest { index } => body.put_u32_le(*index),
            Message::ChangeFps { fps } => body.put_u32_le(*fps),
            Message::StartConf => {}
            Message::Louding { index, level } => {
                body.put_u32_le(*index);
                body.put_u32_le(*level);
            }
        }
        Ok(())
    }

    fn read_body(kind: PacketType, body: &mut Bytes) -> Result<Message, ProtocolError> {
        let message = match kind {
            PacketType::ReqRegisterUser => Message::RegisterUser {
                user: get_string(body)?,
                password: get_string(body)?,
                name: get_string(body)?,
            },
            PacketType::ResRegisterUser => Message::RegisterUserResult {
                result: get_u32(body)?.into(),
            },
            PacketType::ReqLoginCheck => Message::LoginCheck {
                user: get_string(body)?,
                password: get_string(body)?,
                subject: get_string(body)?,
            },
            PacketType::ResLoginCheck => Message::LoginCheckResult {
                result: get_u32(body)?.into(),
                index: get_u32(body)?,
            },
            PacketType::ReqUserReady => Message::UserReady {
                index: get_u32(body)?,
                start: get_u8(body)? != 0,
            },
            PacketType::ResUserReady => Message::UserReadyResult {
                result: get_u32(body)?.into(),
            },
            PacketType::NotifyUserLogin => Message::UserLogin {
                index: get_u32(body)?,
                user: get_string(body)?,
            },
            PacketType::NotifyUserExit => Message::UserExit {
                index: get_u32(body)?,
            },
            PacketType::ReqSendText => Message::SendText {
                text: get_string(body)?,
            },
            PacketType::NotifySendText => Message::TextNotice {
                index: get_u32(body)?,
                text: get_string(body)?,
            },
            PacketType::ReqSetSpeaking => Message::SetSpeaking {
                index: get_u32(body)?,
            },
            PacketType::ResSetSpeaking => Message::SetSpeakingResult {
                index: get_u32(body)?,
            },
            PacketType::NotifyChangeFps => Message::ChangeFps {
                fps: get_u32(body)?,
            },
            PacketType::NotifyAcceptFailed => Message::AcceptFailed {
                index: get_u32(body)?,
            },
            PacketType::NotifyStartConf => Message::StartConf,
            PacketType::ReqUserExit => Message::ExitRequest {
                index: get_u32(body)?,
            },
            PacketType::ResUserExit => Message::ExitResult {
                result: get_u32(body)?.into(),
            },
            PacketType::NotifyLouding => Message::Louding {
                index: get_u32(body)?,
                level: get_u32(body)?,
            },
        };
        Ok(message)
    }
}

pub fn obfuscate(buf: &mut [u8]) {
    for b in buf.iter_mut() {
        *b = b.wrapping_sub(OBFUSCATION);
    }
}

pub fn deobfuscate(buf: &mut [u8]) {
    for b in buf.iter_mut() {
        *b = b.wrapping_add(OBFUSCATION);
    }
}

fn put_string(buf: &mut BytesMut, s: &str) -> Result<(), ProtocolError> {
    let units: Vec<u16> = s.encode_utf16().collect();
    let count = u16::try_from(units.len()).map_err(|_| ProtocolError::StringTooLong(units.len()))?;
    buf.put_u16_le(count);
    for unit in units {
        buf.put_u16_le(unit);
    }
    Ok(())
}

fn get_u8(buf: &mut Bytes) -> Result<u8, ProtocolError> {
    if buf.remaining() < 1 {
        return Err(ProtocolError::Short);
    }
    Ok(buf.get_u8())
}

fn get_u32(buf: &mut Bytes) -> Result<u32, ProtocolError> {
    if buf.remaining() < 4 {
        return Err(ProtocolError::Short);
    }
    Ok(buf.get_u32_le())
}

fn get_string(buf: &mut Bytes) -> Result<String, ProtocolError> {
    if buf.remaining() < 2 {
        return Err(ProtocolError::Short);
    }
    let count = buf.get_u16_le() as usize;
    if buf.remaining() < count * 2 {
        return Err(ProtocolError::Short);
    }
    let units: Vec<u16> = (0..count).map(|_| buf.get_u16_le()).collect();
    String::from_utf16(&units).map_err(|_| ProtocolError::BadString)
}

/// One message, header included, ready for the socket. Fails when a
/// string or the whole body is too long for the peer to accept.
pub fn encode(message: &Message) -> Result<Bytes, ProtocolError> {
    let mut body = BytesMut::new();
    message.write_body(&mut body)?;
    if body.len() > MAX_BODY {
        return Err(ProtocolError::TooLarge(body.len()));
    }
    let mut out = BytesMut::with_capacity(HEADER_LEN + body.len());
    out.put_u32_le(PACKET_ID);
    out.put_u8(message.packet_type() as u8);
    out.put_u32_le(body.len() as u32);
    out.extend_from_slice(&body);
    obfuscate(&mut out);
    Ok(out.freeze())
}

/// Take one message off the front of `buf`, which holds bytes as they came
/// off the socket. `None` until a whole message is buffered.
pub fn decode(buf: &mut BytesMut) -> Result<Option<Message>, ProtocolError> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }
    let mut header = [0u8; HEADER_LEN];
    header.copy_from_slice(&buf[..HEADER_LEN]);
    deobfuscate(&mut header);
    let id = LittleEndian::read_u32(&header[0..4]);
    if id != PACKET_ID {
        return Err(ProtocolError::BadMagic(id));
    }
    let kind = PacketType::try_from(header[4])?;
    let len = LittleEndian::read_u32(&header[5..9]) as usize;
    if len > MAX_BODY {
        return Err(ProtocolError::TooLarge(len));
    }
    if buf.len() < HEADER_LEN + len {
        return Ok(None);
    }
    buf.advance(HEADER_LEN);
    let mut body = buf.split_to(len);
    deobfuscate(&mut body);
    let mut body = body.freeze();
    Message::read_body(kind, &mut body).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn obfuscation_is_reversible() {
        let original: Vec<u8> = (0..=255u8).collect();
        let mut buf = original.clone();
        obfuscate(&mut buf);
        assert_ne!(buf, original);
        assert_eq!(buf[0], 0xb0);
        deobfuscate(&mut buf);
        assert_eq!(buf, original);
    }

    #[test]
    fn header_layout() {
        let wire = encode(&Message::UserExit { index: 3 }).unwrap();
        let mut plain = wire.to_vec();
        deobfuscate(&mut plain);
        assert_eq!(&plain[..4], &[0x25, 0x05, 0x74, 0x19]);
        assert_eq!(plain[4], 0x08);
        assert_eq!(&plain[5..9], &[4, 0, 0, 0]);
        assert_eq!(&plain[9..], &[3, 0, 0, 0]);
    }

    #[test]
    fn utf16_strings() {
        let message = Message::LoginCheck {
            user: "김철".to_string(),
            password: "pw".to_string(),
            subject: "".to_string(),
        };
        let wire = encode(&message).unwrap();
        let mut plain = wire.to_vec();
        deobfuscate(&mut plain);
        // two code units, then the first one
        assert_eq!(&plain[9..11], &[2, 0]);
        assert_eq!(LittleEndian::read_u16(&plain[11..13]), 0xae40);

        let mut buf = BytesMut::from(&wire[..]);
        assert_eq!(decode(&mut buf).unwrap(), Some(message));
        assert!(buf.is_empty());
    }

    #[test]
    fn string_length_limits() {
        let longest = "a".repeat(u16::MAX as usize);
        let err = encode(&Message::SendText {
            text: format!("{}b", longest),
        })
        .unwrap_err();
        assert!(matches!(err, ProtocolError::StringTooLong(65536)));

        // fits its prefix but not the body limit
        let err = encode(&Message::SendText { text: longest }).unwrap_err();
        assert!(matches!(err, ProtocolError::TooLarge(_)));

        let text = "a".repeat(MAX_BODY / 2 - 1);
        let wire = encode(&Message::SendText { text: text.clone() }).unwrap();
        let mut buf = BytesMut::from(&wire[..]);
        assert_eq!(decode(&mut buf).unwrap(), Some(Message::SendText { text }));
    }

    #[test]
    fn partial_and_back_to_back() {
        let first = encode(&Message::StartConf).unwrap();
        let second = encode(&Message::Louding { index: 2, level: 90 }).unwrap();
        let mut stream = BytesMut::new();
        stream.extend_from_slice(&first);
        stream.extend_from_slice(&second[..5]);

        assert_eq!(decode(&mut stream).unwrap(), Some(Message::StartConf));
        assert_eq!(decode(&mut stream).unwrap(), None);
        stream.extend_from_slice(&second[5..]);
        assert_eq!(
            decode(&mut stream).unwrap(),
            Some(Message::Louding { index: 2, level: 90 })
        );
    }

    #[test]
    fn corrupt_streams() {
        let mut buf = BytesMut::from(&[0u8; 12][..]);
        assert!(matches!(decode(&mut buf), Err(ProtocolError::BadMagic(_))));

        let mut plain = BytesMut::new();
        plain.put_u32_le(PACKET_ID);
        plain.put_u8(0x42);
        plain.put_u32_le(0);
        obfuscate(&mut plain);
        assert_eq!(decode(&mut plain), Err(ProtocolError::UnknownType(0x42)));

        // body too short for its type
        let mut plain = BytesMut::new();
        plain.put_u32_le(PACKET_ID);
        plain.put_u8(PacketType::ResLoginCheck as u8);
        plain.put_u32_le(2);
        plain.put_u16_le(0);
        obfuscate(&mut plain);
        assert_eq!(decode(&mut plain), Err(ProtocolError::Short));
    }

    #[test]
    fn result_prompts() {
        assert_eq!(ResultCode::from(4), ResultCode::InvalidPassword);
        assert_eq!(ResultCode::InvalidPassword.prompt(), Some("invalid-password"));
        assert_eq!(ResultCode::KeyReceiving.prompt(), Some("unallowed-user"));
        assert_eq!(ResultCode::from(42).prompt(), None);
        assert_eq!(ResultCode::from(42).code(), 42);
        assert_eq!(ResultCode::LoggedIn.to_string(), "LOGGED_IN");
    }
}

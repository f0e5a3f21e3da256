// RFC 3489 binding requests on the media port

use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use anyhow::Result;
use byteorder::{BigEndian, ByteOrder};
use rand::RngCore;
use thiserror::Error;
use tokio::net::UdpSocket;
use tracing::{debug, warn};

pub const STUN_HEADER_LEN: usize = 20;
const ATTR_HEADER_LEN: usize = 4;

pub const BINDING_REQUEST: u16 = 0x0001;
pub const BINDING_RESPONSE: u16 = 0x0101;

const ATTR_MAPPED_ADDRESS: u16 = 0x0001;
const ATTR_USERNAME: u16 = 0x0006;
const ATTR_PASSWORD: u16 = 0x0007;

const STUN_RETRIES: usize = 3;
const STUN_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StunError {
    #[error("stun message truncated")]
    Truncated,

    #[error("stun length mismatch")]
    BadLength,

    #[error("stun attribute overruns message")]
    BadAttribute,

    #[error("no mapped address in response")]
    NoMappedAddress,

    #[error("no stun response")]
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StunMessage {
    pub msg_type: u16,
    pub transaction_id: [u8; 16],
    pub username: Option<Vec<u8>>,
    pub password: Option<Vec<u8>>,
    pub mapped_address: Option<SocketAddrV4>,
}

impl StunMessage {
    pub fn decode(buf: &[u8]) -> Result<StunMessage, StunError> {
        if buf.len() < STUN_HEADER_LEN {
            return Err(StunError::Truncated);
        }
        let msg_len = BigEndian::read_u16(&buf[2..]) as usize;
        if msg_len != buf.len() - STUN_HEADER_LEN {
            return Err(StunError::BadLength);
        }

        let mut msg = StunMessage {
            msg_type: BigEndian::read_u16(buf),
            ..Default::default()
        };
        msg.transaction_id.copy_from_slice(&buf[4..STUN_HEADER_LEN]);

        let mut pos = STUN_HEADER_LEN;
        while pos < buf.len() {
            if pos + ATTR_HEADER_LEN > buf.len() {
                return Err(StunError::BadAttribute);
            }
            let attr_type = BigEndian::read_u16(&buf[pos..]);
            let attr_len = BigEndian::read_u16(&buf[pos + 2..]) as usize;
            let start = pos + ATTR_HEADER_LEN;
            if start + attr_len > buf.len() {
                return Err(StunError::BadAttribute);
            }
            let value = &buf[start..start + attr_len];
            match attr_type {
                ATTR_USERNAME => msg.username = Some(value.to_vec()),
                ATTR_PASSWORD => msg.password = Some(value.to_vec()),
                ATTR_MAPPED_ADDRESS if value.len() >= 8 => {
                    let port = BigEndian::read_u16(&value[2..]);
                    let ip = Ipv4Addr::new(value[4], value[5], value[6], value[7]);
                    msg.mapped_address = Some(SocketAddrV4::new(ip, port));
                }
                _ => debug!("ignoring stun attribute 0x{:04x}", attr_type),
            }
            pos = start + attr_len;
        }
        Ok(msg)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; STUN_HEADER_LEN];
        BigEndian::write_u16(&mut buf, self.msg_type);
        buf[4..].copy_from_slice(&self.transaction_id);

        if let Some(username) = &self.username {
            append_attr(&mut buf, ATTR_USERNAME, username);
        }
        if let Some(password) = &self.password {
            append_attr(&mut buf, ATTR_PASSWORD, password);
        }
        if let Some(addr) = &self.mapped_address {
            let mut value = [0u8; 8];
            value[1] = 1;
            BigEndian::write_u16(&mut value[2..], addr.port());
            value[4..].copy_from_slice(&addr.ip().octets());
            append_attr(&mut buf, ATTR_MAPPED_ADDRESS, &value);
        }

        let len = (buf.len() - STUN_HEADER_LEN) as u16;
        BigEndian::write_u16(&mut buf[2..], len);
        buf
    }
}

fn append_attr(buf: &mut Vec<u8>, attr_type: u16, value: &[u8]) {
    let mut header = [0u8; ATTR_HEADER_LEN];
    BigEndian::write_u16(&mut header, attr_type);
    BigEndian::write_u16(&mut header[2..], value.len() as u16);
    buf.extend_from_slice(&header);
    buf.extend_from_slice(value);
}

#[derive(Debug, PartialEq, Eq)]
pub enum StunResult {
    // the binding response to send back to the source
    Accept(Vec<u8>),
    Ignore,
}

/// Answer a binding request with the source address we observed.
pub fn handle_packet(buf: &[u8], src: SocketAddr) -> StunResult {
    let msg = match StunMessage::decode(buf) {
        Ok(msg) => msg,
        Err(e) => {
            debug!("dropping stun packet from {}: {}", src, e);
            return StunResult::Ignore;
        }
    };
    if msg.msg_type != BINDING_REQUEST {
        return StunResult::Ignore;
    }
    let mapped = match src {
        SocketAddr::V4(addr) => addr,
        SocketAddr::V6(_) => return StunResult::Ignore,
    };

    let resp = StunMessage {
        msg_type: BINDING_RESPONSE,
        transaction_id: msg.transaction_id,
        username: msg.username,
        password: None,
        mapped_address: Some(mapped),
    };
    StunResult::Accept(resp.encode())
}

/// Ask `server` for our externally visible address. Retries three times,
/// waiting three seconds for each answer.
pub async fn stun_request(
    socket: &UdpSocket,
    server: SocketAddr,
    username: Option<&str>,
) -> Result<SocketAddr> {
    let mut req = StunMessage {
        msg_type: BINDING_REQUEST,
        username: username.map(|u| u.as_bytes().to_vec()),
        ..Default::default()
    };
    rand::thread_rng().fill_bytes(&mut req.transaction_id);
    let packet = req.encode();

    let mut buf = [0u8; 1500];
    for attempt in 0..STUN_RETRIES {
        socket.send_to(&packet, server).await?;
        let deadline = tokio::time::Instant::now() + STUN_TIMEOUT;
        loop {
            let received =
                tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await;
            let (n, from) = match received {
                Ok(r) => r?,
                Err(_) => break,
            };
            let resp = match StunMessage::decode(&buf[..n]) {
                Ok(resp) => resp,
                Err(_) => continue,
            };
            if resp.msg_type != BINDING_RESPONSE || resp.transaction_id != req.transaction_id {
                debug!("unrelated stun packet from {}", from);
                continue;
            }
            let addr = resp.mapped_address.ok_or(StunError::NoMappedAddress)?;
            return Ok(SocketAddr::new(IpAddr::V4(*addr.ip()), addr.port()));
        }
        warn!("stun request to {} timed out, attempt {}", server, attempt + 1);
    }
    Err(StunError::Timeout)?
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(username: Option<&[u8]>) -> Vec<u8> {
        StunMessage {
            msg_type: BINDING_REQUEST,
            transaction_id: [7; 16],
            username: username.map(|u| u.to_vec()),
            ..Default::default()
        }
        .encode()
    }

    #[test]
    fn binding_response() {
        let src: SocketAddr = "192.0.2.1:4000".parse().unwrap();
        let resp = match handle_packet(&request(Some(b"abcd")), src) {
            StunResult::Accept(resp) => resp,
            StunResult::Ignore => panic!("request ignored"),
        };
        let msg = StunMessage::decode(&resp).unwrap();
        assert_eq!(msg.msg_type, BINDING_RESPONSE);
        assert_eq!(msg.transaction_id, [7; 16]);
        assert_eq!(msg.username.as_deref(), Some(&b"abcd"[..]));
        assert_eq!(msg.mapped_address, Some("192.0.2.1:4000".parse().unwrap()));
    }

    #[test]
    fn malformed_ignored() {
        let src: SocketAddr = "192.0.2.1:4000".parse().unwrap();
        let mut req = request(Some(b"abcd"));
        // header length no longer matches
        req.push(0);
        assert_eq!(handle_packet(&req, src), StunResult::Ignore);

        let mut req = request(None);
        req.extend_from_slice(&[0, 6, 0, 9, 1]);
        BigEndian::write_u16(&mut req[2..], 5);
        assert_eq!(StunMessage::decode(&req), Err(StunError::BadAttribute));
        assert_eq!(handle_packet(&req, src), StunResult::Ignore);

        let mut resp = request(None);
        BigEndian::write_u16(&mut resp, BINDING_RESPONSE);
        assert_eq!(handle_packet(&resp, src), StunResult::Ignore);
        assert_eq!(handle_packet(&[0, 1, 0], src), StunResult::Ignore);
    }

    #[tokio::test]
    async fn client_round_trip() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();
        let client_addr = client.local_addr().unwrap();

        tokio::spawn(async move {
            let mut buf = [0u8; 1500];
            let (n, from) = server.recv_from(&mut buf).await.unwrap();
            if let StunResult::Accept(resp) = handle_packet(&buf[..n], from) {
                server.send_to(&resp, from).await.unwrap();
            }
        });

        let mapped = stun_request(&client, server_addr, Some("user")).await.unwrap();
        assert_eq!(mapped, client_addr);
    }
}

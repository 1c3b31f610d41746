//! Minimal Socket.IO v5 / Engine.IO v4 text codec, enough to follow the
//! receiver's event stream over a plain WebSocket.

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("empty packet")]
    Empty,
    #[error("unknown engine.io packet type {0:?}")]
    UnknownPacketType(char),
    #[error("unsupported socket.io packet type {0:?}")]
    UnsupportedSocketType(char),
    #[error("malformed payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("event packet without a name")]
    MissingEventName,
}

/// Body of the Engine.IO open packet
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    pub ping_interval: u64,
    pub ping_timeout: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(Handshake),
    Close,
    Ping(String),
    Pong(String),
    Message(SocketPacket),
    Noop,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect(Option<Value>),
    Disconnect,
    Event { name: String, data: Value },
    ConnectError(Value),
}

pub fn decode(text: &str) -> Result<EnginePacket, ProtocolError> {
    let mut chars = text.chars();
    let kind = chars.next().ok_or(ProtocolError::Empty)?;
    let body = chars.as_str();

    match kind {
        '0' => Ok(EnginePacket::Open(serde_json::from_str(body)?)),
        '1' => Ok(EnginePacket::Close),
        '2' => Ok(EnginePacket::Ping(body.to_string())),
        '3' => Ok(EnginePacket::Pong(body.to_string())),
        '4' => Ok(EnginePacket::Message(decode_socket(body)?)),
        '6' => Ok(EnginePacket::Noop),
        other => Err(ProtocolError::UnknownPacketType(other)),
    }
}

fn decode_socket(text: &str) -> Result<SocketPacket, ProtocolError> {
    let mut chars = text.chars();
    let kind = chars.next().ok_or(ProtocolError::Empty)?;
    let payload = strip_ack_id(strip_namespace(chars.as_str()));

    match kind {
        '0' => {
            if payload.is_empty() {
                Ok(SocketPacket::Connect(None))
            } else {
                Ok(SocketPacket::Connect(Some(serde_json::from_str(payload)?)))
            }
        }
        '1' => Ok(SocketPacket::Disconnect),
        '2' => {
            let mut args: Vec<Value> = serde_json::from_str(payload)?;
            if args.is_empty() {
                return Err(ProtocolError::MissingEventName);
            }
            let name = match args.remove(0) {
                Value::String(name) => name,
                _ => return Err(ProtocolError::MissingEventName),
            };
            let data = if args.is_empty() { Value::Null } else { args.remove(0) };
            Ok(SocketPacket::Event { name, data })
        }
        '4' => Ok(SocketPacket::ConnectError(if payload.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(payload)?
        })),
        other => Err(ProtocolError::UnsupportedSocketType(other)),
    }
}

/// Drop a `/namespace,` prefix
fn strip_namespace(text: &str) -> &str {
    if text.starts_with('/') {
        match text.find(',') {
            Some(idx) => &text[idx + 1..],
            None => "",
        }
    } else {
        text
    }
}

/// Drop a numeric acknowledgement id
fn strip_ack_id(text: &str) -> &str {
    text.trim_start_matches(|c: char| c.is_ascii_digit())
}

pub fn encode(packet: &EnginePacket) -> String {
    match packet {
        EnginePacket::Open(_) => "0".to_string(),
        EnginePacket::Close => "1".to_string(),
        EnginePacket::Ping(data) => format!("2{}", data),
        EnginePacket::Pong(data) => format!("3{}", data),
        EnginePacket::Noop => "6".to_string(),
        EnginePacket::Message(socket) => match socket {
            SocketPacket::Connect(None) => "40".to_string(),
            SocketPacket::Connect(Some(auth)) => format!("40{}", auth),
            SocketPacket::Disconnect => "41".to_string(),
            SocketPacket::Event { name, data } => {
                format!("42{}", Value::Array(vec![Value::String(name.clone()), data.clone()]))
            }
            SocketPacket::ConnectError(data) => format!("44{}", data),
        },
    }
}

//! WebSocket frames as seen by the relay.

use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

/// Frame opcode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// UTF-8 text.
    Text,
    /// Raw bytes.
    Binary,
    /// Close handshake.
    Close,
    /// Keepalive request.
    Ping,
    /// Keepalive reply.
    Pong,
}

/// Status code and reason carried by a CLOSE frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloseInfo {
    /// RFC 6455 status code.
    pub code: u16,
    /// Human-readable reason.
    pub reason: String,
}

/// One WebSocket message unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// Text payload.
    Text(String),
    /// Binary payload.
    Binary(Vec<u8>),
    /// Ping payload.
    Ping(Vec<u8>),
    /// Pong payload.
    Pong(Vec<u8>),
    /// Close, with optional status.
    Close(Option<CloseInfo>),
}

impl Frame {
    /// Opcode of this frame.
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::Text(_) => Opcode::Text,
            Self::Binary(_) => Opcode::Binary,
            Self::Ping(_) => Opcode::Ping,
            Self::Pong(_) => Opcode::Pong,
            Self::Close(_) => Opcode::Close,
        }
    }
}

impl From<Message> for Frame {
    fn from(message: Message) -> Self {
        match message {
            Message::Text(text) => Self::Text(text.as_str().to_owned()),
            Message::Binary(data) => Self::Binary(data.to_vec()),
            Message::Ping(data) => Self::Ping(data.to_vec()),
            Message::Pong(data) => Self::Pong(data.to_vec()),
            Message::Close(close) => Self::Close(close.map(|c| CloseInfo {
                code: u16::from(c.code),
                reason: c.reason.as_str().to_owned(),
            })),
            Message::Frame(raw) => Self::Binary(raw.into_payload().to_vec()),
        }
    }
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => Message::text(text),
            Frame::Binary(data) => Message::binary(data),
            Frame::Ping(data) => Message::Ping(data.into()),
            Frame::Pong(data) => Message::Pong(data.into()),
            Frame::Close(info) => Message::Close(info.map(|i| CloseFrame {
                code: CloseCode::from(i.code),
                reason: i.reason.into(),
            })),
        }
    }
}

//! Connection events: the append-only audit trail of every operation a
//! connection attempted, in the order it attempted them.

use crate::heartbleed::HeartbleedLog;
use crate::modbus::ModbusLog;
use crate::tls::TlsHandshakeLog;
use crate::GrabError;
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// How raw bytes captured from the wire are rendered in output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReadEncoding {
    #[default]
    String,
    Base64,
    Hex,
}

impl ReadEncoding {
    pub fn encode(&self, data: &[u8]) -> String {
        match self {
            ReadEncoding::String => String::from_utf8_lossy(data).into_owned(),
            ReadEncoding::Base64 => general_purpose::STANDARD.encode(data),
            ReadEncoding::Hex => hex::encode(data),
        }
    }
}

/// Raw bytes plus the encoding they are rendered with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    bytes: Vec<u8>,
    encoding: ReadEncoding,
}

impl Payload {
    pub fn new(bytes: impl Into<Vec<u8>>, encoding: ReadEncoding) -> Self {
        Self {
            bytes: bytes.into(),
            encoding,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoding.encode(&self.bytes))
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encoding.encode(&self.bytes))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    TlsHandshake,
    Read,
    Write,
    SmtpBanner,
    Pop3Banner,
    ImapBanner,
    Ehlo,
    SmtpHelp,
    SmtpStarttls,
    Pop3Starttls,
    ImapStarttls,
    Modbus,
    Heartbleed,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::TlsHandshake => "tls_handshake",
            EventKind::Read => "read",
            EventKind::Write => "write",
            EventKind::SmtpBanner => "smtp_banner",
            EventKind::Pop3Banner => "pop3_banner",
            EventKind::ImapBanner => "imap_banner",
            EventKind::Ehlo => "ehlo",
            EventKind::SmtpHelp => "smtp_help",
            EventKind::SmtpStarttls => "smtp_starttls",
            EventKind::Pop3Starttls => "pop3_starttls",
            EventKind::ImapStarttls => "imap_starttls",
            EventKind::Modbus => "modbus",
            EventKind::Heartbleed => "heartbleed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Data observed or sent by one operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventData {
    TlsHandshake(TlsHandshakeLog),
    Read { response: Payload },
    Write { request: Payload, written: usize },
    Banner { banner: Payload },
    Command { command: String, response: Payload },
    Modbus(ModbusLog),
    Heartbleed(HeartbleedLog),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<EventData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConnectionEvent {
    pub fn success(kind: EventKind, data: EventData) -> Self {
        Self {
            kind,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(kind: EventKind, data: Option<EventData>, error: &GrabError) -> Self {
        Self {
            kind,
            data,
            error: Some(error.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Append-only event sequence owned by a connection.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct EventLog {
    events: Vec<ConnectionEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: ConnectionEvent) {
        self.events.push(event);
    }

    pub fn as_slice(&self) -> &[ConnectionEvent] {
        &self.events
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events.iter().map(|e| e.kind).collect()
    }

    pub fn into_vec(self) -> Vec<ConnectionEvent> {
        self.events
    }
}

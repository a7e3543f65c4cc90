//! rgrab - application-layer banner grabber
//!
//! For each target the grabber opens one TCP connection and runs a fixed,
//! configurable sequence of protocol steps over it: TLS handshake, banner read,
//! templated payload, SMTP EHLO/HELP, STARTTLS, Modbus device identification and
//! a heartbleed check. Every step is recorded as an event, and the first failing
//! step ends the conversation.
//!
//! # Warning
//! Only scan hosts you are authorized to probe.

pub mod cli;
pub mod config;
pub mod conn;
pub mod deadline;
pub mod dialer;
pub mod display;
pub mod error;
pub mod event;
pub mod grabber;
pub mod heartbleed;
pub mod mail;
pub mod modbus;
pub mod target;
pub mod tls;
pub mod utils;

pub use error::{GrabError, Result};

/// Output records shared by the grabber and the scan driver
pub mod types {
    use crate::event::{ConnectionEvent, EventKind};
    use chrono::{DateTime, Utc};
    use serde::Serialize;
    use std::net::IpAddr;

    /// Outcome of one grab: who was contacted, when, and everything that happened.
    #[derive(Debug, Clone, Serialize)]
    pub struct Grab {
        pub host: IpAddr,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub domain: Option<String>,
        pub time: DateTime<Utc>,
        pub log: Vec<ConnectionEvent>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub error: Option<String>,
    }

    impl Grab {
        pub fn is_success(&self) -> bool {
            self.error.is_none()
        }

        pub fn kinds(&self) -> Vec<EventKind> {
            self.log.iter().map(|event| event.kind).collect()
        }
    }
}

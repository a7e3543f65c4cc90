//! The grab sequence: one connection, a fixed order of protocol steps, stop at
//! the first failure, keep every event.

use crate::config::GrabConfig;
use crate::conn::Connection;
use crate::dialer::{Dial, Dialer};
use crate::event::ConnectionEvent;
use crate::target::GrabTarget;
use crate::tls::CipherPolicy;
use crate::types::Grab;
use crate::{GrabError, Result};
use chrono::{DateTime, Utc};
use log::{debug, error, warn};
use std::net::SocketAddr;

pub const BANNER_BUFFER_LEN: usize = 1024;
pub const RESPONSE_BUFFER_LEN: usize = 65536;
pub const HEARTBLEED_BUFFER_LEN: usize = 256;

/// Application protocol spoken on the connection. Selects both the banner
/// read and the STARTTLS flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Smtp,
    Pop3,
    Imap,
    Generic,
}

impl Dialect {
    pub fn from_config(config: &GrabConfig) -> Self {
        if config.smtp {
            Dialect::Smtp
        } else if config.pop3 {
            Dialect::Pop3
        } else if config.imap {
            Dialect::Imap
        } else {
            Dialect::Generic
        }
    }

    pub async fn read_banner<C: Connection + ?Sized>(self, conn: &mut C, buf: &mut [u8]) -> Result<usize> {
        match self {
            Dialect::Smtp => conn.smtp_banner(buf).await,
            Dialect::Pop3 => conn.pop3_banner(buf).await,
            Dialect::Imap => conn.imap_banner(buf).await,
            Dialect::Generic => conn.read(buf).await,
        }
    }

    /// Generic connections upgrade the SMTP way.
    pub async fn start_tls<C: Connection + ?Sized>(self, conn: &mut C) -> Result<()> {
        match self {
            Dialect::Imap => conn.imap_starttls().await,
            Dialect::Pop3 => conn.pop3_starttls().await,
            Dialect::Smtp | Dialect::Generic => conn.smtp_starttls().await,
        }
    }
}

/// Fill a payload template: every `%s` becomes `host`, then every `%d` becomes `domain`.
pub fn render_payload(template: &str, host: &str, domain: &str) -> String {
    template.replace("%s", host).replace("%d", domain)
}

/// Where a sequence stopped. `events` is the authoritative record; `error`
/// only says why it stopped early.
#[derive(Debug)]
pub struct SequenceOutcome {
    pub events: Vec<ConnectionEvent>,
    pub error: Option<GrabError>,
}

/// Build the output record for one target.
pub fn assemble(
    target: &GrabTarget,
    time: DateTime<Utc>,
    events: Vec<ConnectionEvent>,
    error: Option<&GrabError>,
) -> Grab {
    Grab {
        host: target.addr,
        domain: target.domain.clone(),
        time,
        log: events,
        error: error.map(|e| e.to_string()),
    }
}

pub struct Grabber<D = Dialer> {
    config: GrabConfig,
    dialer: D,
}

impl Grabber<Dialer> {
    pub fn new(config: GrabConfig) -> Result<Self> {
        let dialer = Dialer::new(&config);
        Self::with_dialer(config, dialer)
    }
}

impl<D: Dial> Grabber<D> {
    pub fn with_dialer(config: GrabConfig, dialer: D) -> Result<Self> {
        config.validate()?;
        if config.heartbleed && (config.tls || config.starttls) {
            warn!("Heartbleed runs after the TLS upgrade and will record an unsupported-operation failure");
        }
        Ok(Self { config, dialer })
    }

    pub fn config(&self) -> &GrabConfig {
        &self.config
    }

    /// Dial one target and run the sequence on it. Always yields a Grab.
    pub async fn grab(&self, target: &GrabTarget) -> Grab {
        let addr = SocketAddr::new(target.addr, self.config.port);
        let time = Utc::now();
        let dialed = self.dialer.dial(addr).await;
        let (mut conn, dial_error) = match dialed {
            Ok(conn) => (conn, None),
            Err(e) => {
                let (conn, error) = e.into_parts();
                (conn, Some(error))
            }
        };
        if let Some(domain) = target.domain.as_deref().filter(|d| !d.is_empty()) {
            conn.set_domain(domain);
        }

        if let Some(error) = dial_error {
            error!(
                "Could not connect to {} remote host {}: {}",
                target.domain_str(),
                target.addr,
                error
            );
            return assemble(target, time, conn.into_events(), Some(&error));
        }

        let outcome = self.run(conn).await;
        assemble(target, time, outcome.events, outcome.error.as_ref())
    }

    /// Run the configured steps on an established connection.
    pub async fn run<C: Connection>(&self, mut conn: C) -> SequenceOutcome {
        let result = self.steps(&mut conn).await;
        let error = match result {
            Ok(()) => None,
            Err(e) => {
                error!(
                    "Conversation error with {} remote host {}: {}",
                    conn.domain(),
                    conn.remote_addr(),
                    e
                );
                Some(e)
            }
        };
        SequenceOutcome {
            events: conn.into_events(),
            error,
        }
    }

    async fn steps<C: Connection>(&self, conn: &mut C) -> Result<()> {
        let config = &self.config;

        conn.set_ca_pool(config.root_ca_pool.clone());
        if config.cbc_only {
            conn.set_cipher_policy(CipherPolicy::CbcOnly);
        }
        if config.schannel_only {
            conn.set_cipher_policy(CipherPolicy::SchannelOnly);
        }
        conn.set_read_encoding(config.read_encoding);

        if config.tls {
            conn.tls_handshake().await?;
        }

        let dialect = Dialect::from_config(config);
        if config.banners {
            let mut banner = vec![0u8; BANNER_BUFFER_LEN];
            let n = dialect.read_banner(conn, &mut banner).await?;
            debug!("{:?} banner from {}: {} bytes", dialect, conn.remote_addr(), n);
        }

        if config.send_data {
            let host = conn.remote_addr().ip().to_string();
            let message = render_payload(&config.data, &host, conn.domain());
            conn.write(message.as_bytes()).await?;
            let mut response = vec![0u8; RESPONSE_BUFFER_LEN];
            conn.read(&mut response).await?;
        }

        if config.ehlo {
            conn.ehlo(&config.ehlo_domain).await?;
        }
        if config.smtp_help {
            conn.smtp_help().await?;
        }
        if config.starttls {
            dialect.start_tls(conn).await?;
        }
        if config.modbus {
            conn.send_modbus_echo().await?;
        }
        if config.heartbleed {
            let mut buf = vec![0u8; HEARTBLEED_BUFFER_LEN];
            conn.check_heartbleed(&mut buf).await?;
        }
        Ok(())
    }
}

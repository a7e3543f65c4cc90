use crate::config::GrabConfig;
use crate::conn::{Connection, TcpConn};
use crate::deadline::Deadline;
use crate::tls::TlsVersion;
use crate::GrabError;
use async_trait::async_trait;
use log::debug;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;

/// A failed dial. The connection object is kept so its (usually empty) event
/// log can still be reported for the attempted host.
pub struct DialError<C> {
    pub conn: C,
    pub error: GrabError,
}

impl<C> DialError<C> {
    pub fn into_parts(self) -> (C, GrabError) {
        (self.conn, self.error)
    }
}

impl<C> fmt::Debug for DialError<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DialError").field("error", &self.error).finish()
    }
}

impl<C> fmt::Display for DialError<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.error.fmt(f)
    }
}

#[async_trait]
pub trait Dial: Send + Sync {
    type Conn: Connection;

    async fn dial(&self, addr: SocketAddr) -> Result<Self::Conn, DialError<Self::Conn>>;
}

/// Opens TCP connections whose whole lifetime is bounded by one deadline.
#[derive(Debug, Clone)]
pub struct Dialer {
    timeout: Duration,
    max_tls_version: Option<TlsVersion>,
}

impl Dialer {
    pub fn new(config: &GrabConfig) -> Self {
        Self {
            timeout: config.timeout(),
            max_tls_version: config.tls_version,
        }
    }
}

#[async_trait]
impl Dial for Dialer {
    type Conn = TcpConn;

    async fn dial(&self, addr: SocketAddr) -> Result<TcpConn, DialError<TcpConn>> {
        let deadline = Deadline::after(self.timeout);
        let mut conn = TcpConn::unconnected(addr, deadline);
        conn.set_max_tls_version(self.max_tls_version);

        match deadline.run("dial", TcpStream::connect(addr)).await {
            Ok(stream) => {
                debug!("Connected to {}", addr);
                conn.attach(stream);
                Ok(conn)
            }
            Err(GrabError::Network(source)) => Err(DialError {
                conn,
                error: GrabError::Dial {
                    addr: addr.to_string(),
                    source,
                },
            }),
            Err(error) => Err(DialError { conn, error }),
        }
    }
}

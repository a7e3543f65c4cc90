//! The connection capability driven by the grab sequence, and its TCP
//! implementation.

use crate::deadline::Deadline;
use crate::event::{ConnectionEvent, EventData, EventKind, EventLog, Payload, ReadEncoding};
use crate::heartbleed;
use crate::mail;
use crate::modbus::{self, ModbusLog};
use crate::tls::{self, CertPool, CipherPolicy, TlsHandshakeLog, TlsVersion};
use crate::{GrabError, Result};
use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio_openssl::SslStream;

// Large enough for a multi-line EHLO or HELP reply.
const REPLY_BUFFER_LEN: usize = 4096;

/// A stateful connection to one remote host.
///
/// Every protocol operation appends exactly one event to the connection's log
/// (STARTTLS appends the upgrade command and then the handshake), whether it
/// succeeds or fails. The log stays readable after any failure.
#[async_trait]
pub trait Connection: Send {
    fn set_ca_pool(&mut self, pool: Option<Arc<CertPool>>);
    fn set_cipher_policy(&mut self, policy: CipherPolicy);
    fn set_read_encoding(&mut self, encoding: ReadEncoding);
    fn set_domain(&mut self, domain: &str);
    fn domain(&self) -> &str;
    fn remote_addr(&self) -> SocketAddr;

    async fn tls_handshake(&mut self) -> Result<()>;
    async fn smtp_banner(&mut self, buf: &mut [u8]) -> Result<usize>;
    async fn pop3_banner(&mut self, buf: &mut [u8]) -> Result<usize>;
    async fn imap_banner(&mut self, buf: &mut [u8]) -> Result<usize>;
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
    async fn write(&mut self, data: &[u8]) -> Result<usize>;
    async fn ehlo(&mut self, domain: &str) -> Result<()>;
    async fn smtp_help(&mut self) -> Result<()>;
    async fn smtp_starttls(&mut self) -> Result<()>;
    async fn pop3_starttls(&mut self) -> Result<()>;
    async fn imap_starttls(&mut self) -> Result<()>;
    async fn send_modbus_echo(&mut self) -> Result<usize>;
    async fn check_heartbleed(&mut self, buf: &mut [u8]) -> Result<usize>;

    fn events(&self) -> &[ConnectionEvent];
    fn into_events(self) -> Vec<ConnectionEvent>
    where
        Self: Sized;
}

enum Stream {
    Plain(TcpStream),
    Tls(Box<SslStream<TcpStream>>),
    Closed,
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "connection is not established")
}

impl AsyncRead for Stream {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
            Stream::Closed => Poll::Ready(Err(not_connected())),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Stream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
            Stream::Closed => Poll::Ready(Err(not_connected())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Plain(s) => Pin::new(s).poll_flush(cx),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
            Stream::Closed => Poll::Ready(Err(not_connected())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
            Stream::Closed => Poll::Ready(Ok(())),
        }
    }
}

/// TCP connection with an optional OpenSSL session on top.
pub struct TcpConn {
    remote: SocketAddr,
    deadline: Deadline,
    stream: Stream,
    log: EventLog,
    domain: String,
    max_tls_version: Option<TlsVersion>,
    cipher_policy: CipherPolicy,
    ca_pool: Option<Arc<CertPool>>,
    read_encoding: ReadEncoding,
}

impl std::fmt::Debug for TcpConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpConn")
            .field("remote", &self.remote)
            .field("domain", &self.domain)
            .finish_non_exhaustive()
    }
}

impl TcpConn {
    /// A connection that has not (yet) reached its peer. Every operation on it
    /// fails, but its event log can still be read.
    pub fn unconnected(remote: SocketAddr, deadline: Deadline) -> Self {
        Self {
            remote,
            deadline,
            stream: Stream::Closed,
            log: EventLog::new(),
            domain: String::new(),
            max_tls_version: None,
            cipher_policy: CipherPolicy::default(),
            ca_pool: None,
            read_encoding: ReadEncoding::default(),
        }
    }

    pub(crate) fn attach(&mut self, stream: TcpStream) {
        self.stream = Stream::Plain(stream);
    }

    pub fn set_max_tls_version(&mut self, version: Option<TlsVersion>) {
        self.max_tls_version = version;
    }

    pub fn deadline(&self) -> Deadline {
        self.deadline
    }

    pub fn is_connected(&self) -> bool {
        !matches!(self.stream, Stream::Closed)
    }

    fn payload(&self, data: &[u8]) -> Payload {
        Payload::new(data, self.read_encoding)
    }

    fn finish<T>(&mut self, kind: EventKind, data: Option<EventData>, result: Result<T>) -> Result<T> {
        let event = match &result {
            Ok(_) => ConnectionEvent {
                kind,
                data,
                error: None,
            },
            Err(e) => ConnectionEvent::failure(kind, data, e),
        };
        self.log.push(event);
        result
    }

    /// Bytes received are returned alongside the result, failed or not.
    async fn read_reply<F>(&mut self, operation: &str, buf: &mut [u8], complete: F) -> (usize, Result<usize>)
    where
        F: Fn(&[u8]) -> bool + Send,
    {
        let deadline = self.deadline;
        let mut filled = 0;
        let result = deadline
            .run(operation, mail::read_until(&mut self.stream, buf, &mut filled, complete))
            .await;
        (filled, result)
    }

    /// Read a greeting and check it with `accept`, recording it either way.
    async fn banner<F, A>(
        &mut self,
        kind: EventKind,
        protocol: &str,
        buf: &mut [u8],
        complete: F,
        accept: A,
    ) -> Result<usize>
    where
        F: Fn(&[u8]) -> bool + Send,
        A: Fn(&[u8]) -> bool + Send,
    {
        let (n, result) = match self.read_reply(kind.name(), buf, complete).await {
            (_, Ok(n)) if accept(&buf[..n]) => (n, Ok(n)),
            (_, Ok(n)) => {
                let details = format!("unexpected banner: {}", mail::summary(&buf[..n]));
                (n, Err(GrabError::protocol(protocol, details)))
            }
            (filled, Err(e)) => (filled, Err(e)),
        };
        let data = EventData::Banner {
            banner: self.payload(&buf[..n]),
        };
        self.finish(kind, Some(data), result)
    }

    /// Send one line command and read its reply, recording both.
    async fn command<F, A>(
        &mut self,
        kind: EventKind,
        protocol: &str,
        command: &str,
        complete: F,
        accept: A,
    ) -> Result<()>
    where
        F: Fn(&[u8]) -> bool + Send,
        A: Fn(&[u8]) -> bool + Send,
    {
        let deadline = self.deadline;
        let mut buf = vec![0u8; REPLY_BUFFER_LEN];
        let mut filled = 0;
        let stream = &mut self.stream;
        let exchange = async {
            mail::send_command(stream, command).await?;
            mail::read_until(stream, &mut buf, &mut filled, complete).await
        };
        let outcome = deadline.run(kind.name(), exchange).await;
        let (n, result) = match outcome {
            Ok(n) if accept(&buf[..n]) => (n, Ok(())),
            Ok(n) => {
                let details = format!("{} rejected: {}", command, mail::summary(&buf[..n]));
                (n, Err(GrabError::protocol(protocol, details)))
            }
            Err(e) => (filled, Err(e)),
        };
        let data = EventData::Command {
            command: command.to_string(),
            response: self.payload(&buf[..n]),
        };
        self.finish(kind, Some(data), result)
    }

    async fn upgrade(&mut self, log: &mut TlsHandshakeLog) -> Result<()> {
        let connector = tls::connector(self.max_tls_version, self.cipher_policy, self.ca_pool.as_deref())?;
        let ssl = tls::client_ssl(&connector, &self.domain)?;
        let tcp = match std::mem::replace(&mut self.stream, Stream::Closed) {
            Stream::Plain(tcp) => tcp,
            Stream::Tls(session) => {
                self.stream = Stream::Tls(session);
                return Err(GrabError::Unsupported(
                    "TLS session already established".to_string(),
                ));
            }
            Stream::Closed => return Err(not_connected().into()),
        };

        let mut session = SslStream::new(ssl, tcp)?;
        let deadline = self.deadline;
        deadline
            .run("tls handshake", Pin::new(&mut session).connect())
            .await?;
        log.record_session(session.ssl(), self.read_encoding)?;
        self.stream = Stream::Tls(Box::new(session));
        Ok(())
    }
}

#[async_trait]
impl Connection for TcpConn {
    fn set_ca_pool(&mut self, pool: Option<Arc<CertPool>>) {
        self.ca_pool = pool;
    }

    fn set_cipher_policy(&mut self, policy: CipherPolicy) {
        self.cipher_policy = policy;
    }

    fn set_read_encoding(&mut self, encoding: ReadEncoding) {
        self.read_encoding = encoding;
    }

    fn set_domain(&mut self, domain: &str) {
        self.domain = domain.to_string();
    }

    fn domain(&self) -> &str {
        &self.domain
    }

    fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    async fn tls_handshake(&mut self) -> Result<()> {
        let mut log = TlsHandshakeLog::new(&self.domain, self.max_tls_version, self.cipher_policy);
        let result = self.upgrade(&mut log).await;
        self.finish(EventKind::TlsHandshake, Some(EventData::TlsHandshake(log)), result)
    }

    async fn smtp_banner(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.banner(EventKind::SmtpBanner, "SMTP", buf, mail::smtp_complete, |data| {
            mail::smtp_code(data) == Some(220)
        })
        .await
    }

    async fn pop3_banner(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.banner(EventKind::Pop3Banner, "POP3", buf, mail::line_complete, mail::pop3_ok)
            .await
    }

    async fn imap_banner(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.banner(
            EventKind::ImapBanner,
            "IMAP",
            buf,
            mail::line_complete,
            mail::imap_greeting_ok,
        )
        .await
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let (n, result) = self.read_reply("read", buf, |_: &[u8]| true).await;
        let data = EventData::Read {
            response: self.payload(&buf[..n]),
        };
        self.finish(EventKind::Read, Some(data), result)
    }

    async fn write(&mut self, data: &[u8]) -> Result<usize> {
        let deadline = self.deadline;
        let stream = &mut self.stream;
        let result = deadline
            .run("write", async {
                stream.write_all(data).await?;
                stream.flush().await?;
                Ok::<_, io::Error>(data.len())
            })
            .await;
        let event = EventData::Write {
            request: self.payload(data),
            written: *result.as_ref().unwrap_or(&0),
        };
        self.finish(EventKind::Write, Some(event), result)
    }

    async fn ehlo(&mut self, domain: &str) -> Result<()> {
        let command = format!("EHLO {}", domain);
        self.command(EventKind::Ehlo, "SMTP", &command, mail::smtp_complete, |data| {
            mail::smtp_code(data) == Some(250)
        })
        .await
    }

    async fn smtp_help(&mut self) -> Result<()> {
        self.command(EventKind::SmtpHelp, "SMTP", "HELP", mail::smtp_complete, |data| {
            matches!(mail::smtp_code(data), Some(200..=299))
        })
        .await
    }

    async fn smtp_starttls(&mut self) -> Result<()> {
        self.command(
            EventKind::SmtpStarttls,
            "SMTP",
            "STARTTLS",
            mail::smtp_complete,
            |data| mail::smtp_code(data) == Some(220),
        )
        .await?;
        self.tls_handshake().await
    }

    async fn pop3_starttls(&mut self) -> Result<()> {
        self.command(
            EventKind::Pop3Starttls,
            "POP3",
            "STLS",
            mail::line_complete,
            mail::pop3_ok,
        )
        .await?;
        self.tls_handshake().await
    }

    async fn imap_starttls(&mut self) -> Result<()> {
        let tag = mail::IMAP_STARTTLS_TAG;
        let command = format!("{} STARTTLS", tag);
        self.command(
            EventKind::ImapStarttls,
            "IMAP",
            &command,
            mail::imap_tagged_complete(tag),
            |data| mail::imap_tagged_ok(tag, data),
        )
        .await?;
        self.tls_handshake().await
    }

    async fn send_modbus_echo(&mut self) -> Result<usize> {
        let transaction_id: u16 = rand::random();
        let request = modbus::device_id_request(transaction_id);
        let deadline = self.deadline;
        let stream = &mut self.stream;
        let exchange = async {
            stream.write_all(&request).await?;
            stream.flush().await?;
            modbus::read_frame(stream).await
        };
        let result = deadline.run("modbus", exchange).await;

        let mut log = ModbusLog {
            function: modbus::FUNCTION_ENCAPSULATED_INTERFACE,
            length: 0,
            response: self.payload(&[]),
            exception: None,
            objects: Vec::new(),
        };
        let result = match result {
            Ok(frame) => {
                log.length = frame.len();
                log.response = self.payload(&frame);
                modbus::parse_response(&frame, transaction_id, &mut log).map(|_| frame.len())
            }
            Err(e) => Err(e),
        };
        self.finish(EventKind::Modbus, Some(EventData::Modbus(log)), result)
    }

    async fn check_heartbleed(&mut self, buf: &mut [u8]) -> Result<usize> {
        let version = self.max_tls_version.unwrap_or(TlsVersion::Tls12);
        let encoding = self.read_encoding;
        let deadline = self.deadline;
        let result = match &mut self.stream {
            Stream::Plain(tcp) => {
                let hello = heartbleed::client_hello(
                    version,
                    &self.cipher_policy.suites(),
                    Some(self.domain.as_str()),
                );
                deadline
                    .run("heartbleed", heartbleed::check(tcp, version, &hello, buf, encoding))
                    .await
            }
            // The raw hello is the handshake; an established session cannot
            // carry a forged heartbeat.
            Stream::Tls(_) => Err(GrabError::Unsupported(
                "heartbleed check needs a plaintext transport, not an established TLS session".to_string(),
            )),
            Stream::Closed => Err(not_connected().into()),
        };

        match result {
            Ok(log) => {
                let n = log.response.len();
                self.finish(EventKind::Heartbleed, Some(EventData::Heartbleed(log)), Ok(n))
            }
            Err(e) => self.finish(EventKind::Heartbleed, None, Err(e)),
        }
    }

    fn events(&self) -> &[ConnectionEvent] {
        self.log.as_slice()
    }

    fn into_events(self) -> Vec<ConnectionEvent> {
        self.log.into_vec()
    }
}

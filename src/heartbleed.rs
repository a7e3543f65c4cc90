//! Heartbleed (CVE-2014-0160) check over a plaintext transport: a ClientHello
//! advertising the heartbeat extension, then an over-length heartbeat request
//! sent before the handshake completes.

use crate::event::{Payload, ReadEncoding};
use crate::tls::TlsVersion;
use crate::{GrabError, Result};
use log::debug;
use rand::RngCore;
use serde::Serialize;
use std::io;
use std::net::IpAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const CONTENT_TYPE_ALERT: u8 = 0x15;
const CONTENT_TYPE_HANDSHAKE: u8 = 0x16;
const CONTENT_TYPE_HEARTBEAT: u8 = 0x18;
const HANDSHAKE_CLIENT_HELLO: u8 = 0x01;
const HANDSHAKE_SERVER_HELLO: u8 = 0x02;
const HANDSHAKE_SERVER_HELLO_DONE: u8 = 0x0e;
const EXTENSION_SERVER_NAME: u16 = 0x0000;
const EXTENSION_SUPPORTED_GROUPS: u16 = 0x000a;
const EXTENSION_EC_POINT_FORMATS: u16 = 0x000b;
const EXTENSION_SIGNATURE_ALGORITHMS: u16 = 0x000d;
const EXTENSION_HEARTBEAT: u16 = 0x000f;
const HEARTBEAT_REQUEST: u8 = 0x01;
// Claimed payload length; the request carries none of it.
const HEARTBEAT_CLAIMED_LEN: u16 = 0x4000;
const MAX_RECORD_LEN: usize = 16384 + 2048;
// Handshake bytes buffered while waiting for ServerHelloDone.
const MAX_FLIGHT_LEN: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeartbleedLog {
    pub heartbeat_enabled: bool,
    pub vulnerable: bool,
    #[serde(skip_serializing_if = "Payload::is_empty")]
    pub response: Payload,
}

fn extension(buf: &mut Vec<u8>, kind: u16, data: &[u8]) {
    buf.extend_from_slice(&kind.to_be_bytes());
    buf.extend_from_slice(&(data.len() as u16).to_be_bytes());
    buf.extend_from_slice(data);
}

/// Build a ClientHello record that advertises heartbeat support.
pub fn client_hello(version: TlsVersion, suites: &[u16], server_name: Option<&str>) -> Vec<u8> {
    let mut random = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut random);

    let mut hello = Vec::with_capacity(256);
    hello.extend_from_slice(&version.wire().to_be_bytes());
    hello.extend_from_slice(&random);
    hello.push(0); // session id
    hello.extend_from_slice(&((suites.len() * 2) as u16).to_be_bytes());
    for suite in suites {
        hello.extend_from_slice(&suite.to_be_bytes());
    }
    hello.extend_from_slice(&[0x01, 0x00]); // null compression

    let mut extensions = Vec::new();
    if let Some(name) = server_name.filter(|n| !n.is_empty() && n.parse::<IpAddr>().is_err()) {
        let mut sni = Vec::new();
        sni.extend_from_slice(&((name.len() + 3) as u16).to_be_bytes());
        sni.push(0x00); // host_name
        sni.extend_from_slice(&(name.len() as u16).to_be_bytes());
        sni.extend_from_slice(name.as_bytes());
        extension(&mut extensions, EXTENSION_SERVER_NAME, &sni);
    }
    extension(
        &mut extensions,
        EXTENSION_SUPPORTED_GROUPS,
        &[0x00, 0x06, 0x00, 0x17, 0x00, 0x18, 0x00, 0x19],
    );
    extension(&mut extensions, EXTENSION_EC_POINT_FORMATS, &[0x01, 0x00]);
    if version >= TlsVersion::Tls12 {
        extension(
            &mut extensions,
            EXTENSION_SIGNATURE_ALGORITHMS,
            &[0x00, 0x08, 0x04, 0x01, 0x05, 0x01, 0x02, 0x01, 0x04, 0x03],
        );
    }
    extension(&mut extensions, EXTENSION_HEARTBEAT, &[0x01]);
    hello.extend_from_slice(&(extensions.len() as u16).to_be_bytes());
    hello.extend_from_slice(&extensions);

    let mut handshake = Vec::with_capacity(hello.len() + 4);
    handshake.push(HANDSHAKE_CLIENT_HELLO);
    handshake.extend_from_slice(&(hello.len() as u32).to_be_bytes()[1..]);
    handshake.extend_from_slice(&hello);

    record(CONTENT_TYPE_HANDSHAKE, version, &handshake)
}

fn record(content_type: u8, version: TlsVersion, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 5);
    out.push(content_type);
    out.extend_from_slice(&version.wire().to_be_bytes());
    out.extend_from_slice(&(body.len() as u16).to_be_bytes());
    out.extend_from_slice(body);
    out
}

pub fn heartbeat_request(version: TlsVersion) -> Vec<u8> {
    let mut body = vec![HEARTBEAT_REQUEST];
    body.extend_from_slice(&HEARTBEAT_CLAIMED_LEN.to_be_bytes());
    record(CONTENT_TYPE_HEARTBEAT, version, &body)
}

async fn read_record<S>(stream: &mut S) -> io::Result<(u8, Vec<u8>)>
where
    S: AsyncRead + Unpin,
{
    let mut header = [0u8; 5];
    stream.read_exact(&mut header).await?;
    let length = u16::from_be_bytes([header[3], header[4]]) as usize;
    if length > MAX_RECORD_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("TLS record too long ({} bytes)", length),
        ));
    }
    let mut body = vec![0u8; length];
    stream.read_exact(&mut body).await?;
    Ok((header[0], body))
}

/// Whether a ServerHello body carries the heartbeat extension.
pub fn server_hello_has_heartbeat(hello: &[u8]) -> bool {
    // version(2) random(32)
    let mut offset = 34;
    let Some(&sid_len) = hello.get(offset) else {
        return false;
    };
    offset += 1 + sid_len as usize + 2 + 1; // session id, suite, compression
    let Some(ext_len) = hello.get(offset..offset + 2) else {
        return false;
    };
    let end = (offset + 2 + u16::from_be_bytes([ext_len[0], ext_len[1]]) as usize).min(hello.len());
    offset += 2;
    while offset + 4 <= end {
        let kind = u16::from_be_bytes([hello[offset], hello[offset + 1]]);
        let len = u16::from_be_bytes([hello[offset + 2], hello[offset + 3]]) as usize;
        if kind == EXTENSION_HEARTBEAT {
            return true;
        }
        offset += 4 + len;
    }
    false
}

/// Read handshake messages up to ServerHelloDone and report heartbeat support.
async fn read_server_flight<S>(stream: &mut S) -> Result<bool>
where
    S: AsyncRead + Unpin,
{
    let mut pending: Vec<u8> = Vec::new();
    let mut heartbeat = false;
    loop {
        let (content_type, body) = read_record(stream).await?;
        match content_type {
            CONTENT_TYPE_HANDSHAKE => {
                pending.extend_from_slice(&body);
                if pending.len() > MAX_FLIGHT_LEN {
                    return Err(GrabError::protocol(
                        "TLS",
                        format!("server hello flight exceeds {} bytes", MAX_FLIGHT_LEN),
                    ));
                }
            }
            CONTENT_TYPE_ALERT => {
                return Err(GrabError::protocol(
                    "TLS",
                    format!("server sent alert {:02x?} during hello", body),
                ));
            }
            other => {
                return Err(GrabError::protocol(
                    "TLS",
                    format!("unexpected record type {:#04x} during hello", other),
                ));
            }
        }

        while pending.len() >= 4 {
            let len = u32::from_be_bytes([0, pending[1], pending[2], pending[3]]) as usize;
            if pending.len() < 4 + len {
                break;
            }
            let message: Vec<u8> = pending.drain(..4 + len).collect();
            match message[0] {
                HANDSHAKE_SERVER_HELLO => heartbeat = server_hello_has_heartbeat(&message[4..]),
                HANDSHAKE_SERVER_HELLO_DONE => return Ok(heartbeat),
                _ => {}
            }
        }
    }
}

/// Run the check. Up to `buf.len()` bytes of any heartbeat reply are kept.
pub async fn check<S>(
    stream: &mut S,
    version: TlsVersion,
    hello: &[u8],
    buf: &mut [u8],
    encoding: ReadEncoding,
) -> Result<HeartbleedLog>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(hello).await?;
    stream.flush().await?;

    let mut log = HeartbleedLog {
        heartbeat_enabled: read_server_flight(stream).await?,
        vulnerable: false,
        response: Payload::new(Vec::new(), encoding),
    };
    if !log.heartbeat_enabled {
        debug!("Server did not negotiate the heartbeat extension");
        return Ok(log);
    }

    stream.write_all(&heartbeat_request(version)).await?;
    stream.flush().await?;

    match read_record(stream).await {
        Ok((CONTENT_TYPE_HEARTBEAT, body)) => {
            let n = body.len().min(buf.len());
            buf[..n].copy_from_slice(&body[..n]);
            log.vulnerable = true;
            log.response = Payload::new(buf[..n].to_vec(), encoding);
        }
        Ok((content_type, _)) => {
            debug!("Heartbeat answered with record type {:#04x}", content_type);
        }
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            debug!("Server closed the connection after the heartbeat request");
        }
        Err(e) => return Err(e.into()),
    }
    Ok(log)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::CipherPolicy;
    use tokio_test::io::Builder;

    fn server_hello(with_heartbeat: bool) -> Vec<u8> {
        let mut hello = vec![0x03, 0x03];
        hello.extend_from_slice(&[0u8; 32]);
        hello.push(0); // session id
        hello.extend_from_slice(&[0x00, 0x2f, 0x00]);
        let mut exts = Vec::new();
        extension(&mut exts, 0xff01, &[0x00]);
        if with_heartbeat {
            extension(&mut exts, EXTENSION_HEARTBEAT, &[0x01]);
        }
        hello.extend_from_slice(&(exts.len() as u16).to_be_bytes());
        hello.extend_from_slice(&exts);

        let mut flight = vec![HANDSHAKE_SERVER_HELLO];
        flight.extend_from_slice(&(hello.len() as u32).to_be_bytes()[1..]);
        flight.extend_from_slice(&hello);
        flight.extend_from_slice(&[HANDSHAKE_SERVER_HELLO_DONE, 0, 0, 0]);
        record(CONTENT_TYPE_HANDSHAKE, TlsVersion::Tls12, &flight)
    }

    #[test]
    fn test_client_hello_advertises_heartbeat() {
        let hello = client_hello(TlsVersion::Tls11, &CipherPolicy::CbcOnly.suites(), Some("mx.example.com"));
        assert_eq!(hello[0], CONTENT_TYPE_HANDSHAKE);
        assert_eq!(u16::from_be_bytes([hello[1], hello[2]]), 0x0302);
        assert_eq!(u16::from_be_bytes([hello[3], hello[4]]) as usize, hello.len() - 5);
        assert_eq!(hello[5], HANDSHAKE_CLIENT_HELLO);
        assert!(hello.ends_with(&[0x00, 0x0f, 0x00, 0x01, 0x01]));
        assert!(hello.windows(14).any(|w| w == b"mx.example.com"));
    }

    #[test]
    fn test_client_hello_skips_sni_for_ip_literals() {
        let hello = client_hello(TlsVersion::Tls12, &CipherPolicy::Default.suites(), Some("198.51.100.9"));
        assert!(!hello.windows(12).any(|w| w == b"198.51.100.9"));
    }

    #[test]
    fn test_heartbeat_request_claims_more_than_it_sends() {
        assert_eq!(
            heartbeat_request(TlsVersion::Tls12),
            vec![0x18, 0x03, 0x03, 0x00, 0x03, 0x01, 0x40, 0x00]
        );
    }

    #[tokio::test]
    async fn test_check_without_heartbeat_support() {
        let hello = vec![0x16];
        let mut stream = Builder::new().write(&hello).read(&server_hello(false)).build();
        let mut buf = [0u8; 256];
        let log = check(&mut stream, TlsVersion::Tls12, &hello, &mut buf, ReadEncoding::Hex)
            .await
            .unwrap();
        assert!(!log.heartbeat_enabled);
        assert!(!log.vulnerable);
    }

    #[tokio::test]
    async fn test_check_flags_leaking_server() {
        let hello = vec![0x16];
        let leak = record(CONTENT_TYPE_HEARTBEAT, TlsVersion::Tls12, &[0x02; 300]);
        let mut stream = Builder::new()
            .write(&hello)
            .read(&server_hello(true))
            .write(&heartbeat_request(TlsVersion::Tls12))
            .read(&leak)
            .build();
        let mut buf = [0u8; 256];
        let log = check(&mut stream, TlsVersion::Tls12, &hello, &mut buf, ReadEncoding::Hex)
            .await
            .unwrap();
        assert!(log.heartbeat_enabled);
        assert!(log.vulnerable);
        assert_eq!(log.response.len(), 256);
    }

    #[tokio::test]
    async fn test_alert_during_hello_fails_check() {
        let hello = vec![0x16];
        let alert = record(CONTENT_TYPE_ALERT, TlsVersion::Tls12, &[0x02, 0x28]);
        let mut stream = Builder::new().write(&hello).read(&alert).build();
        let mut buf = [0u8; 256];
        let err = check(&mut stream, TlsVersion::Tls12, &hello, &mut buf, ReadEncoding::Hex)
            .await
            .unwrap_err();
        assert!(matches!(err, GrabError::Protocol { .. }));
    }

    #[tokio::test]
    async fn test_oversized_hello_flight_is_rejected() {
        let hello = vec![0x16];
        let mut builder = Builder::new();
        builder.write(&hello);
        for i in 0..5 {
            let mut body = vec![0u8; 16000];
            if i == 0 {
                // A ServerHello announcing a length that never arrives.
                body[..4].copy_from_slice(&[HANDSHAKE_SERVER_HELLO, 0xff, 0xff, 0xff]);
            }
            builder.read(&record(CONTENT_TYPE_HANDSHAKE, TlsVersion::Tls12, &body));
        }
        let mut stream = builder.build();
        let mut buf = [0u8; 256];
        let err = check(&mut stream, TlsVersion::Tls12, &hello, &mut buf, ReadEncoding::Hex)
            .await
            .unwrap_err();
        assert!(matches!(err, GrabError::Protocol { ref details, .. } if details.contains("exceeds")));
    }
}

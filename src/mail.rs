//! Minimal SMTP / POP3 / IMAP line handling used by the TCP connection.

use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const IMAP_STARTTLS_TAG: &str = "a001";

/// Read into `buf` until `complete` accepts the bytes so far or the buffer fills.
///
/// `filled` tracks the bytes received so far, so a caller still sees them
/// when the read fails or is cancelled part way through a reply.
pub async fn read_until<S, F>(stream: &mut S, buf: &mut [u8], filled: &mut usize, complete: F) -> io::Result<usize>
where
    S: AsyncRead + Unpin,
    F: Fn(&[u8]) -> bool,
{
    *filled = 0;
    while *filled < buf.len() {
        let read = stream.read(&mut buf[*filled..]).await?;
        if read == 0 {
            if *filled == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed before any data was received",
                ));
            }
            break;
        }
        *filled += read;
        if complete(&buf[..*filled]) {
            break;
        }
    }
    Ok(*filled)
}

pub async fn send_command<S>(stream: &mut S, command: &str) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(command.as_bytes()).await?;
    stream.write_all(b"\r\n").await?;
    stream.flush().await
}

fn last_line(data: &[u8]) -> Option<&[u8]> {
    if !data.ends_with(b"\n") {
        return None;
    }
    let body = &data[..data.len() - 1];
    let start = body.iter().rposition(|&b| b == b'\n').map(|i| i + 1).unwrap_or(0);
    Some(&body[start..])
}

/// An SMTP reply is complete once its final line reads `NNN ` or is a bare code.
pub fn smtp_complete(data: &[u8]) -> bool {
    match last_line(data) {
        Some(line) => {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            line.len() >= 3
                && line[..3].iter().all(u8::is_ascii_digit)
                && (line.len() == 3 || line[3] == b' ')
        }
        None => false,
    }
}

pub fn line_complete(data: &[u8]) -> bool {
    data.contains(&b'\n')
}

/// IMAP replies to a tagged command end with a line starting with that tag.
pub fn imap_tagged_complete(tag: &str) -> impl Fn(&[u8]) -> bool + '_ {
    move |data: &[u8]| match last_line(data) {
        Some(line) => line.starts_with(tag.as_bytes()),
        None => false,
    }
}

/// Status code of the final line of an SMTP reply.
pub fn smtp_code(data: &[u8]) -> Option<u16> {
    let line = last_line(data).unwrap_or(data);
    let code = line.get(..3)?;
    std::str::from_utf8(code).ok()?.parse().ok()
}

pub fn pop3_ok(data: &[u8]) -> bool {
    data.starts_with(b"+OK")
}

pub fn imap_greeting_ok(data: &[u8]) -> bool {
    data.starts_with(b"* OK") || data.starts_with(b"* PREAUTH")
}

pub fn imap_tagged_ok(tag: &str, data: &[u8]) -> bool {
    match last_line(data) {
        Some(line) => line.starts_with(format!("{} OK", tag).as_bytes()),
        None => false,
    }
}

/// First line of a reply, for error messages.
pub fn summary(data: &[u8]) -> String {
    let text = String::from_utf8_lossy(data);
    text.lines().next().unwrap_or_default().trim().to_string()
}

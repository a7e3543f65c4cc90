use crate::event::Payload;
use crate::{GrabError, Result};
use serde::Serialize;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

pub const FUNCTION_ENCAPSULATED_INTERFACE: u8 = 0x2b;
pub const MEI_READ_DEVICE_ID: u8 = 0x0e;
const EXCEPTION_BIT: u8 = 0x80;
const HEADER_LEN: usize = 7;
// MBAP length covers the unit id plus a PDU of at most 253 bytes.
const MAX_FRAME_LEN: usize = 254;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceObject {
    pub id: u8,
    pub name: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModbusLog {
    pub function: u8,
    pub length: usize,
    pub response: Payload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception: Option<u8>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub objects: Vec<DeviceObject>,
}

/// Read Device Identification request (basic objects) wrapped in an MBAP header.
pub fn device_id_request(transaction_id: u16) -> Vec<u8> {
    let pdu = [FUNCTION_ENCAPSULATED_INTERFACE, MEI_READ_DEVICE_ID, 0x01, 0x00];
    let mut frame = Vec::with_capacity(HEADER_LEN + pdu.len());
    frame.extend_from_slice(&transaction_id.to_be_bytes());
    frame.extend_from_slice(&[0x00, 0x00]);
    frame.extend_from_slice(&((pdu.len() + 1) as u16).to_be_bytes());
    frame.push(0x00);
    frame.extend_from_slice(&pdu);
    frame
}

/// Read one MBAP frame: the 7-byte header plus the length it announces.
pub async fn read_frame<S>(stream: &mut S) -> io::Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    let mut frame = vec![0u8; HEADER_LEN];
    stream.read_exact(&mut frame).await?;
    let length = u16::from_be_bytes([frame[4], frame[5]]) as usize;
    if length == 0 || length > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid MBAP length {}", length),
        ));
    }
    // The unit id already arrived with the header.
    let mut body = vec![0u8; length - 1];
    stream.read_exact(&mut body).await?;
    frame.extend_from_slice(&body);
    Ok(frame)
}

fn object_name(id: u8) -> &'static str {
    match id {
        0x00 => "vendor_name",
        0x01 => "product_code",
        0x02 => "revision",
        0x03 => "vendor_url",
        0x04 => "product_name",
        0x05 => "model_name",
        0x06 => "user_application_name",
        _ => "other",
    }
}

/// Decode a response frame into the event payload.
pub fn parse_response(frame: &[u8], transaction_id: u16, log: &mut ModbusLog) -> Result<()> {
    if frame.len() < HEADER_LEN + 1 {
        return Err(GrabError::protocol("Modbus", "response shorter than MBAP header"));
    }
    if frame[2..4] != [0x00, 0x00] {
        return Err(GrabError::protocol("Modbus", "response is not Modbus (protocol id != 0)"));
    }
    let echoed = u16::from_be_bytes([frame[0], frame[1]]);
    if echoed != transaction_id {
        return Err(GrabError::protocol(
            "Modbus",
            format!("transaction id mismatch: sent {}, got {}", transaction_id, echoed),
        ));
    }

    let pdu = &frame[HEADER_LEN..];
    log.function = pdu[0];
    if pdu[0] & EXCEPTION_BIT != 0 {
        log.exception = pdu.get(1).copied();
        return Ok(());
    }
    if pdu[0] != FUNCTION_ENCAPSULATED_INTERFACE || pdu.get(1) != Some(&MEI_READ_DEVICE_ID) {
        return Err(GrabError::protocol(
            "Modbus",
            format!("unexpected function {:#04x}", pdu[0]),
        ));
    }

    // function, MEI type, code, conformity, more follows, next id, object count
    let count = *pdu
        .get(6)
        .ok_or_else(|| GrabError::protocol("Modbus", "truncated device identification"))?;
    let mut offset = 7;
    for _ in 0..count {
        let (id, len) = match (pdu.get(offset), pdu.get(offset + 1)) {
            (Some(&id), Some(&len)) => (id, len as usize),
            _ => break,
        };
        let Some(value) = pdu.get(offset + 2..offset + 2 + len) else {
            break;
        };
        log.objects.push(DeviceObject {
            id,
            name: object_name(id),
            value: String::from_utf8_lossy(value).into_owned(),
        });
        offset += 2 + len;
    }
    Ok(())
}

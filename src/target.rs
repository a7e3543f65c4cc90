use crate::{GrabError, Result};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::net::IpAddr;

/// One scan destination. `domain` is `None` when the record had no second
/// field and `Some("")` when it had an empty one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrabTarget {
    pub addr: IpAddr,
    pub domain: Option<String>,
}

impl GrabTarget {
    pub fn new(addr: IpAddr, domain: Option<String>) -> Self {
        Self { addr, domain }
    }

    /// Parse a record: field 1 is a mandatory IP literal, field 2 an optional domain.
    pub fn from_record(record: &csv::StringRecord) -> Result<Self> {
        let ip = record
            .get(0)
            .ok_or_else(|| GrabError::InvalidTarget("record has no fields".to_string()))?;
        let addr = ip
            .parse::<IpAddr>()
            .map_err(|_| GrabError::InvalidTarget(format!("Invalid IP address {:?}", ip)))?;
        let domain = record.get(1).map(str::to_string);
        Ok(Self { addr, domain })
    }

    pub fn domain_str(&self) -> &str {
        self.domain.as_deref().unwrap_or("")
    }
}

/// Streams targets out of headerless CSV.
pub struct TargetDecoder<R: Read> {
    reader: csv::Reader<R>,
    record: csv::StringRecord,
}

impl<R: Read> TargetDecoder<R> {
    pub fn new(input: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(input);
        Self {
            reader,
            record: csv::StringRecord::new(),
        }
    }

    /// `None` once input is exhausted; a bad record yields `Some(Err(_))` and
    /// decoding can continue with the next one.
    pub fn decode_next(&mut self) -> Option<Result<GrabTarget>> {
        match self.reader.read_record(&mut self.record) {
            Ok(false) => None,
            Ok(true) => Some(GrabTarget::from_record(&self.record)),
            Err(e) => Some(Err(e.into())),
        }
    }

    /// 1-based line of the record most recently decoded.
    pub fn line(&self) -> u64 {
        self.record.position().map(|p| p.line()).unwrap_or(0)
    }
}

impl<R: Read> Iterator for TargetDecoder<R> {
    type Item = Result<GrabTarget>;

    fn next(&mut self) -> Option<Self::Item> {
        self.decode_next()
    }
}

use crate::event::{Payload, ReadEncoding};
use crate::{GrabError, Result};
use log::debug;
use openssl::ssl::{Ssl, SslConnector, SslMethod, SslOptions, SslRef, SslVerifyMode, SslVersion};
use openssl::x509::store::X509StoreBuilder;
use openssl::x509::{X509VerifyResult, X509};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum)]
pub enum TlsVersion {
    #[serde(rename = "SSLv3")]
    #[value(name = "ssl3")]
    Ssl3,
    #[serde(rename = "TLSv1.0")]
    #[value(name = "tls1.0")]
    Tls10,
    #[serde(rename = "TLSv1.1")]
    #[value(name = "tls1.1")]
    Tls11,
    #[serde(rename = "TLSv1.2")]
    #[value(name = "tls1.2")]
    Tls12,
}

impl TlsVersion {
    pub fn ssl_version(&self) -> SslVersion {
        match self {
            TlsVersion::Ssl3 => SslVersion::SSL3,
            TlsVersion::Tls10 => SslVersion::TLS1,
            TlsVersion::Tls11 => SslVersion::TLS1_1,
            TlsVersion::Tls12 => SslVersion::TLS1_2,
        }
    }

    /// Version as it appears in a ClientHello.
    pub fn wire(&self) -> u16 {
        match self {
            TlsVersion::Ssl3 => 0x0300,
            TlsVersion::Tls10 => 0x0301,
            TlsVersion::Tls11 => 0x0302,
            TlsVersion::Tls12 => 0x0303,
        }
    }
}

impl fmt::Display for TlsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TlsVersion::Ssl3 => "SSLv3",
            TlsVersion::Tls10 => "TLSv1.0",
            TlsVersion::Tls11 => "TLSv1.1",
            TlsVersion::Tls12 => "TLSv1.2",
        };
        f.write_str(name)
    }
}

/// Which cipher suites a client offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CipherPolicy {
    #[default]
    Default,
    CbcOnly,
    SchannelOnly,
}

// (IANA id, OpenSSL name)
const DEFAULT_SUITES: &[(u16, &str)] = &[
    (0xc02f, "ECDHE-RSA-AES128-GCM-SHA256"),
    (0xc030, "ECDHE-RSA-AES256-GCM-SHA384"),
    (0xc02b, "ECDHE-ECDSA-AES128-GCM-SHA256"),
    (0xc02c, "ECDHE-ECDSA-AES256-GCM-SHA384"),
    (0xc013, "ECDHE-RSA-AES128-SHA"),
    (0xc014, "ECDHE-RSA-AES256-SHA"),
    (0xc009, "ECDHE-ECDSA-AES128-SHA"),
    (0xc00a, "ECDHE-ECDSA-AES256-SHA"),
    (0x009c, "AES128-GCM-SHA256"),
    (0x009d, "AES256-GCM-SHA384"),
    (0x002f, "AES128-SHA"),
    (0x0035, "AES256-SHA"),
    (0x000a, "DES-CBC3-SHA"),
];

const CBC_SUITES: &[(u16, &str)] = &[
    (0xc013, "ECDHE-RSA-AES128-SHA"),
    (0xc014, "ECDHE-RSA-AES256-SHA"),
    (0xc009, "ECDHE-ECDSA-AES128-SHA"),
    (0xc00a, "ECDHE-ECDSA-AES256-SHA"),
    (0xc027, "ECDHE-RSA-AES128-SHA256"),
    (0xc028, "ECDHE-RSA-AES256-SHA384"),
    (0xc023, "ECDHE-ECDSA-AES128-SHA256"),
    (0xc024, "ECDHE-ECDSA-AES256-SHA384"),
    (0x0033, "DHE-RSA-AES128-SHA"),
    (0x0039, "DHE-RSA-AES256-SHA"),
    (0x003c, "AES128-SHA256"),
    (0x003d, "AES256-SHA256"),
    (0x002f, "AES128-SHA"),
    (0x0035, "AES256-SHA"),
    (0x000a, "DES-CBC3-SHA"),
];

// Suites offered by legacy Windows SChannel clients.
const SCHANNEL_SUITES: &[(u16, &str)] = &[
    (0x0035, "AES256-SHA"),
    (0x002f, "AES128-SHA"),
    (0x000a, "DES-CBC3-SHA"),
    (0x0005, "RC4-SHA"),
    (0x0004, "RC4-MD5"),
    (0xc013, "ECDHE-RSA-AES128-SHA"),
    (0xc014, "ECDHE-RSA-AES256-SHA"),
    (0xc009, "ECDHE-ECDSA-AES128-SHA"),
    (0xc00a, "ECDHE-ECDSA-AES256-SHA"),
    (0x0038, "DHE-DSS-AES256-SHA"),
    (0x0032, "DHE-DSS-AES128-SHA"),
    (0x0013, "DHE-DSS-DES-CBC3-SHA"),
];

impl CipherPolicy {
    fn table(&self) -> &'static [(u16, &'static str)] {
        match self {
            CipherPolicy::Default => DEFAULT_SUITES,
            CipherPolicy::CbcOnly => CBC_SUITES,
            CipherPolicy::SchannelOnly => SCHANNEL_SUITES,
        }
    }

    /// Suite ids in offer order, as written into a raw ClientHello.
    pub fn suites(&self) -> Vec<u16> {
        self.table().iter().map(|(id, _)| *id).collect()
    }

    /// OpenSSL cipher string, or `None` to keep the library defaults.
    pub fn cipher_list(&self) -> Option<String> {
        if *self == CipherPolicy::Default {
            return None;
        }
        let names: Vec<&str> = self.table().iter().map(|(_, name)| *name).collect();
        // Legacy suites are the point of these policies.
        Some(format!("{}:@SECLEVEL=0", names.join(":")))
    }
}

/// Trust store shared read-only by every connection of a scan.
#[derive(Clone, Default)]
pub struct CertPool {
    certs: Vec<X509>,
}

impl CertPool {
    /// Parse every CERTIFICATE block in a PEM bundle; other blocks are skipped.
    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        let mut reader = pem;
        let certs = rustls_pemfile::certs(&mut reader)
            .map(|der| -> Result<X509> { Ok(X509::from_der(der?.as_ref())?) })
            .collect::<Result<Vec<_>>>()?;

        if certs.is_empty() {
            return Err(GrabError::Config("no certificates found in PEM bundle".to_string()));
        }
        Ok(Self { certs })
    }

    pub fn from_pem_file(path: &Path) -> Result<Self> {
        let pem = std::fs::read(path)?;
        let pool = Self::from_pem(&pem)?;
        debug!("Loaded {} root certificates from {}", pool.len(), path.display());
        Ok(pool)
    }

    pub fn certificates(&self) -> &[X509] {
        &self.certs
    }

    pub fn len(&self) -> usize {
        self.certs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }
}

impl fmt::Debug for CertPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertPool").field("certificates", &self.certs.len()).finish()
    }
}

/// Build a connector for one handshake.
///
/// The chain is verified against `pool` (or the system roots) but never
/// enforced: the handshake goes ahead and the outcome is recorded instead.
/// A restricted cipher policy caps the version at TLS 1.2, since TLS 1.3
/// suites are not selectable by the cipher list.
pub fn connector(ceiling: Option<TlsVersion>, policy: CipherPolicy, pool: Option<&CertPool>) -> Result<SslConnector> {
    let mut builder = SslConnector::builder(SslMethod::tls_client())?;

    let ceiling = match (ceiling, policy) {
        (None, CipherPolicy::Default) => None,
        (None, _) => Some(TlsVersion::Tls12),
        (Some(version), _) => Some(version),
    };
    builder.set_max_proto_version(ceiling.map(|v| v.ssl_version()))?;
    if ceiling == Some(TlsVersion::Ssl3) {
        builder.clear_options(SslOptions::NO_SSLV3);
        builder.set_min_proto_version(Some(SslVersion::SSL3))?;
    }

    if let Some(list) = policy.cipher_list() {
        builder.set_cipher_list(&list)?;
    }

    if let Some(pool) = pool {
        let mut store = X509StoreBuilder::new()?;
        for cert in pool.certificates() {
            store.add_cert(cert.clone())?;
        }
        builder.set_cert_store(store.build());
    }
    builder.set_verify(SslVerifyMode::NONE);

    Ok(builder.build())
}

/// Per-connection TLS state. SNI is sent only for a bound domain name.
pub fn client_ssl(connector: &SslConnector, domain: &str) -> Result<Ssl> {
    let mut config = connector.configure()?;
    config.set_verify_hostname(false);
    config.set_use_server_name_indication(!domain.is_empty());
    Ok(config.into_ssl(domain)?)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TlsHandshakeLog {
    pub server_name: Option<String>,
    pub version_ceiling: Option<TlsVersion>,
    pub cipher_policy: CipherPolicy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cipher_suite: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer_certificate: Option<Payload>,
    pub chain_verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verify_error: Option<String>,
}

impl TlsHandshakeLog {
    pub fn new(domain: &str, ceiling: Option<TlsVersion>, policy: CipherPolicy) -> Self {
        Self {
            server_name: (!domain.is_empty()).then(|| domain.to_string()),
            version_ceiling: ceiling,
            cipher_policy: policy,
            version: None,
            cipher_suite: None,
            peer_certificate: None,
            chain_verified: false,
            verify_error: None,
        }
    }

    /// Fill in what the completed handshake negotiated.
    pub fn record_session(&mut self, ssl: &SslRef, encoding: ReadEncoding) -> Result<()> {
        self.version = Some(ssl.version_str().to_string());
        self.cipher_suite = ssl.current_cipher().map(|c| c.name().to_string());

        let Some(cert) = ssl.peer_certificate() else {
            self.verify_error = Some("no peer certificate".to_string());
            return Ok(());
        };
        self.peer_certificate = Some(Payload::new(cert.to_der()?, encoding));
        let verdict = ssl.verify_result();
        self.chain_verified = verdict == X509VerifyResult::OK;
        if !self.chain_verified {
            self.verify_error = Some(verdict.error_string().to_string());
        }
        Ok(())
    }
}

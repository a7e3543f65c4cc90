use crate::event::ReadEncoding;
use crate::tls::{CertPool, TlsVersion};
use crate::GrabError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub grab: GrabConfig,
    pub scan: ScanConfig,
}

/// Options for one grab. Read-only while a grab runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GrabConfig {
    pub port: u16,
    pub timeout: u64, // seconds, whole connection lifetime
    pub tls: bool,
    pub tls_version: Option<TlsVersion>,
    pub cbc_only: bool,
    pub schannel_only: bool,
    pub root_ca_file: Option<PathBuf>,
    #[serde(skip)]
    pub root_ca_pool: Option<Arc<CertPool>>,
    pub read_encoding: ReadEncoding,
    pub banners: bool,
    pub smtp: bool,
    pub pop3: bool,
    pub imap: bool,
    pub send_data: bool,
    /// `%s` becomes the peer address, `%d` the target domain.
    pub data: String,
    pub ehlo: bool,
    pub ehlo_domain: String,
    pub smtp_help: bool,
    pub starttls: bool,
    pub modbus: bool,
    pub heartbleed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub senders: usize,
    pub input_file: Option<PathBuf>,
    pub output_file: Option<PathBuf>,
}

impl Default for GrabConfig {
    fn default() -> Self {
        Self {
            port: 80,
            timeout: 10,
            tls: false,
            tls_version: None,
            cbc_only: false,
            schannel_only: false,
            root_ca_file: None,
            root_ca_pool: None,
            read_encoding: ReadEncoding::String,
            banners: false,
            smtp: false,
            pop3: false,
            imap: false,
            send_data: false,
            data: String::new(),
            ehlo: false,
            ehlo_domain: String::new(),
            smtp_help: false,
            starttls: false,
            modbus: false,
            heartbleed: false,
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            senders: 100,
            input_file: None,
            output_file: None,
        }
    }
}

impl GrabConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Reject option combinations with no defined meaning.
    pub fn validate(&self) -> crate::Result<()> {
        let selected: Vec<&str> = [("smtp", self.smtp), ("pop3", self.pop3), ("imap", self.imap)]
            .iter()
            .filter(|(_, on)| *on)
            .map(|(name, _)| *name)
            .collect();
        if selected.len() > 1 {
            return Err(GrabError::Config(format!(
                "at most one application protocol may be selected, got {}",
                selected.join(", ")
            )));
        }
        if self.timeout == 0 {
            return Err(GrabError::Config("timeout must be at least one second".to_string()));
        }
        if self.port == 0 {
            return Err(GrabError::Config("port must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Load `root_ca_file` into the shared trust store, once, before scanning.
    pub fn load_root_ca_pool(&mut self) -> crate::Result<()> {
        if let Some(path) = &self.root_ca_file {
            self.root_ca_pool = Some(Arc::new(CertPool::from_pem_file(path)?));
        }
        Ok(())
    }
}

impl Config {
    pub fn load_from_file(path: &str) -> crate::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    pub fn save_to_file(&self, path: &str) -> crate::Result<()> {
        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| GrabError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, toml_string)?;
        Ok(())
    }
}

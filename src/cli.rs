use crate::config::Config;
use crate::event::ReadEncoding;
use crate::tls::TlsVersion;
use crate::Result;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "rgrab")]
#[command(about = "Application-layer banner grabber")]
#[command(long_about = r#"
rgrab reads targets as CSV lines ("ip[,domain]") and runs a fixed sequence
of protocol steps against each one, writing one JSON record per target.

Only scan hosts you are authorized to probe.

Usage Examples:
  rgrab -p 25 --smtp --banners --ehlo --ehlo-domain scan.example < hosts.csv
  rgrab -p 443 --tls --tls-version tls1.2 -i hosts.csv -o grabs.json
  rgrab -p 80 --data 'GET / HTTP/1.0\r\nHost: %d\r\n\r\n' < hosts.csv
  rgrab -p 502 --modbus --read-encoding hex < plc.csv
"#)]
#[command(version)]
#[command(author)]
pub struct Cli {
    /// Port to connect to on every target
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Whole-connection timeout in seconds
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Start with a TLS handshake
    #[arg(long)]
    pub tls: bool,

    /// Highest TLS version to offer
    #[arg(long, value_enum)]
    pub tls_version: Option<TlsVersion>,

    /// Offer only CBC cipher suites
    #[arg(long)]
    pub cbc_only: bool,

    /// Offer only the SChannel suite list (wins over --cbc-only)
    #[arg(long)]
    pub schannel_only: bool,

    /// PEM file of trusted root certificates
    #[arg(long, value_name = "FILE")]
    pub ca_file: Option<PathBuf>,

    /// Rendering of captured bytes in the output
    #[arg(long, value_enum)]
    pub read_encoding: Option<ReadEncoding>,

    /// Read the server banner
    #[arg(long)]
    pub banners: bool,

    /// Speak SMTP for banners and STARTTLS
    #[arg(long)]
    pub smtp: bool,

    /// Speak POP3 for banners and STARTTLS
    #[arg(long)]
    pub pop3: bool,

    /// Speak IMAP for banners and STARTTLS
    #[arg(long)]
    pub imap: bool,

    /// Payload to send; %s is replaced by the target IP, %d by its domain
    #[arg(long, value_name = "TEMPLATE", conflicts_with = "data_file")]
    pub data: Option<String>,

    /// Read the payload template from a file
    #[arg(long, value_name = "FILE")]
    pub data_file: Option<PathBuf>,

    /// Send EHLO with this domain
    #[arg(long, value_name = "DOMAIN")]
    pub ehlo_domain: Option<String>,

    /// Send EHLO (uses --ehlo-domain)
    #[arg(long)]
    pub ehlo: bool,

    /// Send SMTP HELP
    #[arg(long)]
    pub smtp_help: bool,

    /// Upgrade with the protocol's STARTTLS command
    #[arg(long)]
    pub starttls: bool,

    /// Send a Modbus device identification request
    #[arg(long)]
    pub modbus: bool,

    /// Probe for the heartbleed bug
    #[arg(long)]
    pub heartbleed: bool,

    /// Number of concurrent grabs
    #[arg(long, env = "RGRAB_SENDERS")]
    pub senders: Option<usize>,

    /// Target list (CSV); stdin when omitted
    #[arg(short, long, value_name = "FILE")]
    pub input_file: Option<PathBuf>,

    /// JSON-lines output; stdout when omitted
    #[arg(short, long, value_name = "FILE")]
    pub output_file: Option<PathBuf>,

    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Verbose output (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (suppress output)
    #[arg(short, long)]
    pub quiet: bool,
}

impl Cli {
    /// Layer command-line options over a loaded configuration. Flags only ever
    /// switch steps on; valued options replace the configured value.
    pub fn apply(&self, config: &mut Config) -> Result<()> {
        let grab = &mut config.grab;
        if let Some(port) = self.port {
            grab.port = port;
        }
        if let Some(timeout) = self.timeout {
            grab.timeout = timeout;
        }
        if self.tls_version.is_some() {
            grab.tls_version = self.tls_version;
        }
        if let Some(path) = &self.ca_file {
            grab.root_ca_file = Some(path.clone());
        }
        if let Some(encoding) = self.read_encoding {
            grab.read_encoding = encoding;
        }
        if let Some(domain) = &self.ehlo_domain {
            grab.ehlo_domain = domain.clone();
            grab.ehlo = true;
        }

        if let Some(data) = &self.data {
            grab.data = unescape(data);
            grab.send_data = true;
        } else if let Some(path) = &self.data_file {
            grab.data = std::fs::read_to_string(path)?;
            grab.send_data = true;
        }

        grab.tls |= self.tls;
        grab.cbc_only |= self.cbc_only;
        grab.schannel_only |= self.schannel_only;
        grab.banners |= self.banners;
        grab.smtp |= self.smtp;
        grab.pop3 |= self.pop3;
        grab.imap |= self.imap;
        grab.ehlo |= self.ehlo;
        grab.smtp_help |= self.smtp_help;
        grab.starttls |= self.starttls;
        grab.modbus |= self.modbus;
        grab.heartbleed |= self.heartbleed;

        let scan = &mut config.scan;
        if let Some(senders) = self.senders {
            scan.senders = senders;
        }
        if self.input_file.is_some() {
            scan.input_file = self.input_file.clone();
        }
        if self.output_file.is_some() {
            scan.output_file = self.output_file.clone();
        }
        Ok(())
    }
}

/// Expand `\r`, `\n`, `\t` and `\\` in a payload typed on the command line.
pub fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unescape_payload() {
        assert_eq!(unescape(r"GET / HTTP/1.0\r\n\r\n"), "GET / HTTP/1.0\r\n\r\n");
        assert_eq!(unescape(r"a\\b\q"), "a\\b\\q");
        assert_eq!(unescape("trailing\\"), "trailing\\");
    }

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::parse_from([
            "rgrab", "-p", "25", "--smtp", "--banners", "--ehlo-domain", "scan.example", "--data", r"HI %s\r\n",
        ]);
        let mut config = Config::default();
        cli.apply(&mut config).unwrap();

        assert_eq!(config.grab.port, 25);
        assert!(config.grab.smtp && config.grab.banners && config.grab.ehlo);
        assert_eq!(config.grab.ehlo_domain, "scan.example");
        assert!(config.grab.send_data);
        assert_eq!(config.grab.data, "HI %s\r\n");
        assert_eq!(config.grab.timeout, 10);
        assert_eq!(config.scan.senders, 100);
    }

    #[test]
    fn test_tls_version_value_names() {
        let cli = Cli::parse_from(["rgrab", "--tls", "--tls-version", "tls1.1"]);
        assert_eq!(cli.tls_version, Some(TlsVersion::Tls11));
    }
}

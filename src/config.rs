use std::net::{Ipv6Addr, SocketAddr, SocketAddrV6};
use std::path::Path;
use std::str::FromStr;

use advmac::MacAddr6;
use serde::{Deserialize, Serialize};
use tracing::Level;

use crate::{pd::CLIENT_PORT, Error};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Upstream (WAN) interface the client runs on
    pub interface: String,
    /// Hardware address used for the DUID, read from sysfs when absent
    pub mac: Option<MacAddr6>,
    pub iaid: u32,
    pub bind: SocketAddr,
    /// Management listener, disabled when absent
    pub mgmt_listen: Option<SocketAddr>,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interface: "eth0".into(),
            mac: None,
            iaid: crate::pd::DEFAULT_IAID,
            bind: SocketAddr::V6(SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, CLIENT_PORT, 0, 0)),
            mgmt_listen: None,
            log_level: "info".into(),
            log_format: LogFormat::Text,
        }
    }
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .map_err(|e| Error::Config(format!("failed to open {}: {e}", path.display())))?;
        Ok(serde_json::from_reader(file)?)
    }

    pub fn max_level(&self) -> Result<Level, Error> {
        Level::from_str(&self.log_level)
            .map_err(|_| Error::Config(format!("invalid log level: {}", self.log_level)))
    }

    /// Configured MAC, or the one the kernel reports for the interface
    pub fn resolve_mac(&self) -> Result<MacAddr6, Error> {
        if let Some(mac) = self.mac {
            return Ok(mac);
        }
        let path = format!("/sys/class/net/{}/address", self.interface);
        let contents = std::fs::read_to_string(&path)
            .map_err(|_| Error::InterfaceNotFound(self.interface.clone()))?;
        parse_mac(contents.trim())
    }
}

pub fn parse_mac(s: &str) -> Result<MacAddr6, Error> {
    MacAddr6::parse_str(s).map_err(|e| Error::Config(format!("invalid MAC address {s}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.bind.port(), 546);
        assert_eq!(config.max_level().unwrap(), Level::INFO);
    }

    #[test]
    fn full_config() {
        let json = r#"{
            "interface": "wan0",
            "mac": "18:b4:30:00:00:01",
            "iaid": 7,
            "bind": "[::]:5460",
            "mgmt_listen": "127.0.0.1:6547",
            "log_level": "debug",
            "log_format": "json"
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.interface, "wan0");
        assert_eq!(
            config.resolve_mac().unwrap(),
            MacAddr6::new([0x18, 0xb4, 0x30, 0, 0, 1])
        );
        assert_eq!(config.iaid, 7);
        assert_eq!(config.bind.port(), 5460);
        assert_eq!(config.mgmt_listen, Some("127.0.0.1:6547".parse().unwrap()));
        assert_eq!(config.max_level().unwrap(), Level::DEBUG);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn bad_log_level() {
        let config = Config {
            log_level: "loud".into(),
            ..Default::default()
        };
        assert!(matches!(config.max_level(), Err(Error::Config(_))));
    }

    #[test]
    fn missing_interface_reported() {
        let config = Config {
            interface: "does-not-exist0".into(),
            ..Default::default()
        };
        assert!(matches!(
            config.resolve_mac(),
            Err(Error::InterfaceNotFound(name)) if name == "does-not-exist0"
        ));
    }
}

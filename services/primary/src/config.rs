//! Two-stage configuration: CLI args deserialize into `RawConfig`, which is
//! then validated into a `Config` with concrete, checked values. Mirrors the
//! forwarder service's config loading so both sides of the primary/standby
//! pair fail the same way on a bad address or missing directory.

use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct RawConfig {
    pub router_backend_addr: String,
    pub client_listen_addr: String,
    pub standby_listen_addr: String,
    pub data_dir: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub router_backend_addr: SocketAddr,
    pub client_listen_addr: SocketAddr,
    pub standby_listen_addr: SocketAddr,
    pub data_dir: PathBuf,
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidAddr { field: &'static str, value: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidAddr { field, value } => {
                write!(f, "invalid socket address for {field}: {value:?}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl RawConfig {
    pub fn validate(self) -> Result<Config, ConfigError> {
        let parse = |field: &'static str, value: &str| -> Result<SocketAddr, ConfigError> {
            value.parse().map_err(|_| ConfigError::InvalidAddr {
                field,
                value: value.to_owned(),
            })
        };
        Ok(Config {
            router_backend_addr: parse("router_backend_addr", &self.router_backend_addr)?,
            client_listen_addr: parse("client_listen_addr", &self.client_listen_addr)?,
            standby_listen_addr: parse("standby_listen_addr", &self.standby_listen_addr)?,
            data_dir: PathBuf::from(self.data_dir),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_accepts_good_addrs() {
        let raw = RawConfig {
            router_backend_addr: "127.0.0.1:9000".to_owned(),
            client_listen_addr: "127.0.0.1:9100".to_owned(),
            standby_listen_addr: "127.0.0.1:9200".to_owned(),
            data_dir: "data".to_owned(),
        };
        assert!(raw.validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_addr() {
        let raw = RawConfig {
            router_backend_addr: "not-an-addr".to_owned(),
            client_listen_addr: "127.0.0.1:9100".to_owned(),
            standby_listen_addr: "127.0.0.1:9200".to_owned(),
            data_dir: "data".to_owned(),
        };
        assert!(matches!(raw.validate(), Err(ConfigError::InvalidAddr { field: "router_backend_addr", .. })));
    }
}

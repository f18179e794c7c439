//! Startup configuration, read from the environment by the binary.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_ADDR: &str = "127.0.0.1:6379";

/// Knobs for the transport and diagnostics. The store and dispatcher take no
/// configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Listen address (`CKV_ADDR`).
    pub addr: String,
    /// Cap on live connections (`CKV_MAX_CONNECTIONS`); `None` is unlimited.
    pub max_connections: Option<u64>,
    /// Where `start`/`stop` write profiles (`CKV_PROFILE_DIR`).
    pub profile_dir: PathBuf,
    /// TCP keepalive idle time (`CKV_TCP_KEEPALIVE_SECS`); `None` keeps the OS default.
    pub tcp_keepalive: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            addr: DEFAULT_ADDR.to_string(),
            max_connections: None,
            profile_dir: PathBuf::from("."),
            tcp_keepalive: None,
        }
    }
}

impl ServerConfig {
    /// Reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = ServerConfig::default();
        if let Some(addr) = lookup("CKV_ADDR") {
            config.addr = addr;
        }
        if let Some(raw) = lookup("CKV_MAX_CONNECTIONS") {
            config.max_connections = Some(parse_number("CKV_MAX_CONNECTIONS", &raw)?);
        }
        if let Some(dir) = lookup("CKV_PROFILE_DIR") {
            config.profile_dir = PathBuf::from(dir);
        }
        if let Some(raw) = lookup("CKV_TCP_KEEPALIVE_SECS") {
            let secs: u64 = parse_number("CKV_TCP_KEEPALIVE_SECS", &raw)?;
            config.tcp_keepalive = Some(Duration::from_secs(secs));
        }
        Ok(config)
    }
}

fn parse_number<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|err: T::Err| ConfigError::Invalid {
        key,
        value: raw.to_string(),
        reason: err.to_string(),
    })
}

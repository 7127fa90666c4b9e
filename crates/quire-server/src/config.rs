//! Server settings read from the environment.

use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::warn;

pub const ADDR_VAR: &str = "QUIRE_ADDR";
pub const DATA_DIR_VAR: &str = "QUIRE_DATA_DIR";
pub const PERSIST_VAR: &str = "QUIRE_PERSIST";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    /// Keep room logs on disk. Otherwise rooms live in memory only.
    pub persist: bool,
    /// Where room logs are kept; the platform data directory when unset.
    pub data_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 3030)),
            persist: false,
            data_dir: None,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(addr) = lookup(ADDR_VAR) {
            match addr.parse() {
                Ok(addr) => config.addr = addr,
                Err(e) => warn!("Ignoring {}={:?}: {}", ADDR_VAR, addr, e),
            }
        }
        config.data_dir = lookup(DATA_DIR_VAR)
            .filter(|dir| !dir.trim().is_empty())
            .map(PathBuf::from);
        let flag = lookup(PERSIST_VAR).is_some_and(|value| {
            matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")
        });
        config.persist = flag || config.data_dir.is_some();
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> ServerConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        assert_eq!(config(&[]), ServerConfig::default());
        assert_eq!(ServerConfig::default().addr.port(), 3030);
    }

    #[test]
    fn test_reads_vars() {
        let config = config(&[(ADDR_VAR, "127.0.0.1:4000"), (DATA_DIR_VAR, "/var/lib/quire")]);
        assert_eq!(config.addr, "127.0.0.1:4000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.data_dir, Some(PathBuf::from("/var/lib/quire")));
        assert!(config.persist);
    }

    #[test]
    fn test_persist_flag() {
        let on = config(&[(PERSIST_VAR, "True")]);
        assert!(on.persist);
        assert_eq!(on.data_dir, None);

        let off = config(&[(PERSIST_VAR, "0")]);
        assert!(!off.persist);
    }

    #[test]
    fn test_bad_addr_falls_back() {
        let config = config(&[(ADDR_VAR, "not an address"), (DATA_DIR_VAR, " ")]);
        assert_eq!(config, ServerConfig::default());
    }
}

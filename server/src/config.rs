use anyhow::{Context, Result};
use std::net::SocketAddr;

pub const DEFAULT_STORE_URL: &str = "mem:///";
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:9096";

/// Process configuration read from the environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Connection string handed to the store registrar, e.g. `etcd://host:2379`
    pub store_url: String,
    pub bind_address: SocketAddr,
}

impl ServerConfig {
    /// Read `STORE_URL` and `BIND_ADDRESS`, loading a `.env` file first if
    /// one exists.
    pub fn from_env() -> Result<Self> {
        // A missing .env file is fine; real environment variables still apply
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let store_url = lookup("STORE_URL").unwrap_or_else(|| DEFAULT_STORE_URL.to_string());
        let bind_address = lookup("BIND_ADDRESS")
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string())
            .parse::<SocketAddr>()
            .context("BIND_ADDRESS must be a socket address such as 0.0.0.0:9096")?;

        Ok(Self {
            store_url,
            bind_address,
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.store_url, "mem:///");
        assert_eq!(config.bind_address, "0.0.0.0:9096".parse().unwrap());
    }

    #[test]
    fn test_overrides() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("STORE_URL", "etcd://localhost:2379"),
            ("BIND_ADDRESS", "127.0.0.1:8080"),
        ]))
        .unwrap();
        assert_eq!(config.store_url, "etcd://localhost:2379");
        assert_eq!(config.bind_address.port(), 8080);
    }

    #[test]
    fn test_invalid_bind_address() {
        let err = ServerConfig::from_lookup(lookup(&[("BIND_ADDRESS", "localhost")])).unwrap_err();
        assert!(err.to_string().contains("BIND_ADDRESS"));
    }
}

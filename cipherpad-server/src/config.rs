//! Server configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub database_path: PathBuf,
    /// Disable the registration endpoint on closed deployments.
    pub no_registration: bool,
    /// Serve permissive CORS headers for browser clients.
    pub cors: bool,
    /// Development mode; allows the built-in signing key.
    pub debug: bool,
    pub max_request_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8888".to_string(),
            database_path: PathBuf::from("cipherpad.db"),
            no_registration: false,
            cors: false,
            debug: false,
            max_request_size: 104_857_600,
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_serve_locally_with_registration_open() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.listen_addr, "127.0.0.1:8888");
        assert!(!cfg.no_registration);
        assert!(!cfg.debug);
    }

    #[test]
    fn config_roundtrips_through_toml() {
        let cfg = ServerConfig::default();
        let rendered = toml::to_string(&cfg).unwrap();
        let parsed: ServerConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.listen_addr, cfg.listen_addr);
        assert_eq!(parsed.max_request_size, cfg.max_request_size);
    }
}

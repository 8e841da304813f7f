/// Gateway configuration.
///
/// Layered: built-in defaults, then an optional TOML file, then
/// `CIDGATE_`-prefixed environment variables (nested keys separated by
/// `__`, e.g. `CIDGATE_PROBE__TTL_SECS=120`).
use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};
use crate::logging::LogSettings;
use crate::orchestrator::TransferConfig;

const DEFAULT_CONFIG_FILE: &str = "cidgate.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Address the API server binds to.
    pub listen_addr: String,
    /// SQLite database holding the backend catalog and job history.
    pub database_path: PathBuf,
    /// Root directory of the content-addressed store.
    pub store_path: PathBuf,
    pub probe: ProbeConfig,
    pub transfer: TransferConfig,
    pub log: LogSettings,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:7070".to_string(),
            database_path: PathBuf::from("cidgate.db"),
            store_path: PathBuf::from("cidgate-store"),
            probe: ProbeConfig::default(),
            transfer: TransferConfig::default(),
            log: LogSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Background probe cycle interval.
    pub interval_secs: u64,
    /// How long a probe result stays authoritative.
    pub ttl_secs: u64,
    /// Timeout for a single probe call.
    pub timeout_secs: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            ttl_secs: 90,
            timeout_secs: 5,
        }
    }
}

/// Load configuration, optionally from an explicit file path. A missing
/// default file is fine; a missing explicit path is an error.
pub fn load(path: Option<&Path>) -> Result<GatewayConfig> {
    let mut figment = Figment::from(Serialized::defaults(GatewayConfig::default()));

    match path {
        Some(path) => {
            if !path.exists() {
                return Err(GatewayError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("config file not found: {}", path.display()),
                )));
            }
            figment = figment.merge(Toml::file(path));
        }
        None => figment = figment.merge(Toml::file(DEFAULT_CONFIG_FILE)),
    }

    figment
        .merge(Env::prefixed("CIDGATE_").split("__"))
        .extract()
        .map_err(|e| GatewayError::Serialization(format!("configuration error: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = GatewayConfig::default();
        assert!(cfg.probe.ttl_secs >= cfg.probe.interval_secs);
        assert!(cfg.transfer.retry_cap > 0);
        assert!(cfg.transfer.job_deadline_secs > cfg.transfer.call_timeout_secs);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cidgate.toml");
        std::fs::write(
            &path,
            r#"
            listen_addr = "0.0.0.0:9000"

            [probe]
            ttl_secs = 120

            [transfer]
            retry_cap = 5
            "#,
        )
        .unwrap();

        let cfg = load(Some(&path)).unwrap();
        assert_eq!(cfg.listen_addr, "0.0.0.0:9000");
        assert_eq!(cfg.probe.ttl_secs, 120);
        assert_eq!(cfg.transfer.retry_cap, 5);
        // Unset keys keep their defaults.
        assert_eq!(cfg.probe.interval_secs, ProbeConfig::default().interval_secs);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        assert!(load(Some(Path::new("/nonexistent/cidgate.toml"))).is_err());
    }
}

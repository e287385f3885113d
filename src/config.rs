use serde::{Deserialize, Serialize};
use std::fs;
use thiserror::Error;

use crate::router::RoutingConfig;
use crate::vendor::VendorsConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config yaml: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    /// Log raw vendor request lines (target `vendor_wire`)
    pub enable_tracing: bool,
    pub gateway: GatewayConfig,
    /// PostgreSQL connection URL; absent means in-memory store
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default)]
    pub settlement: SettlementConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub worker: WorkerSettings,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub vendors: VendorsConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

/// Retry policy and vendor call limits
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SettlementConfig {
    pub max_attempts: u32,
    pub base_backoff_secs: u64,
    pub max_backoff_secs: u64,
    pub insufficient_balance_backoff_secs: u64,
    pub charge_insufficient_balance: bool,
    pub max_balance_retries: u32,
    /// Outer bound on one vendor call, on top of the HTTP client timeout
    pub vendor_call_timeout_ms: u64,
    /// Re-presentations of the same key inside one attempt
    pub transport_retries: u32,
    pub transport_retry_delay_ms: u64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_secs: 60,
            max_backoff_secs: 3600,
            insufficient_balance_backoff_secs: 1800,
            charge_insufficient_balance: false,
            max_balance_retries: 24,
            vendor_call_timeout_ms: 15_000,
            transport_retries: 2,
            transport_retry_delay_ms: 200,
        }
    }
}

/// Approximate name-match fallback
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ValidationConfig {
    /// Max `distance / len(declared)` accepted as a match
    pub name_match_threshold: f64,
    /// Declared names shorter than this (after normalization) never override
    pub min_name_length: usize,
    pub honorifics: Vec<String>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            name_match_threshold: 0.2,
            min_name_length: 4,
            honorifics: ["mr", "mrs", "ms", "miss", "mx", "dr", "prof", "sir", "madam"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Background retry / reconciliation worker
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct WorkerSettings {
    pub enabled: bool,
    pub scan_interval_secs: u64,
    /// PENDING longer than this is queried at the vendor
    pub stale_pending_secs: u64,
    pub batch_size: usize,
    pub concurrency: usize,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            scan_interval_secs: 30,
            stale_pending_secs: 900,
            batch_size: 100,
            concurrency: 8,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LedgerConfig {
    /// Ledger collaborator endpoint; absent means events are only logged
    pub notify_url: Option<String>,
    pub timeout_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            notify_url: None,
            timeout_ms: 5_000,
        }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path).map_err(|source| ConfigError::Read {
            path: config_path.clone(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let threshold = self.validation.name_match_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::Invalid(format!(
                "validation.name_match_threshold must be within [0, 1], got {}",
                threshold
            )));
        }
        if self.settlement.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "settlement.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.worker.concurrency == 0 || self.worker.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "worker.concurrency and worker.batch_size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
log_level: info
log_dir: ./logs
log_file: engine.log
use_json: false
rotation: daily
enable_tracing: false
gateway:
  host: 0.0.0.0
  port: 8080
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = AppConfig::from_yaml(MINIMAL).unwrap();
        assert!(config.postgres_url.is_none());
        assert_eq!(config.settlement.max_attempts, 3);
        assert_eq!(config.validation.name_match_threshold, 0.2);
        assert_eq!(config.validation.min_name_length, 4);
        assert!(config.validation.honorifics.contains(&"dr".to_string()));
        assert_eq!(config.worker.concurrency, 8);
        assert!(config.ledger.notify_url.is_none());
    }

    #[test]
    fn test_partial_section_override() {
        let yaml = format!(
            "{}settlement:\n  max_attempts: 5\n  charge_insufficient_balance: true\n",
            MINIMAL
        );
        let config = AppConfig::from_yaml(&yaml).unwrap();
        assert_eq!(config.settlement.max_attempts, 5);
        assert!(config.settlement.charge_insufficient_balance);
        assert_eq!(config.settlement.base_backoff_secs, 60);
    }

    #[test]
    fn test_rejects_bad_threshold() {
        let yaml = format!("{}validation:\n  name_match_threshold: 1.5\n", MINIMAL);
        assert!(matches!(
            AppConfig::from_yaml(&yaml),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            AppConfig::load("does-not-exist"),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn test_shipped_configs_load() {
        let dev = AppConfig::load("dev").unwrap();
        assert!(dev.postgres_url.is_none());
        assert!(dev.vendors.mock);

        let prod = AppConfig::load("prod").unwrap();
        assert!(prod.use_json);
        assert!(!prod.vendors.mock);
        assert!(prod.vendors.float.is_some());
        assert_eq!(prod.routing.experiments.len(), 1);
    }
}

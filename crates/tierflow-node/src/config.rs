//! Node configuration types

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tierflow_core::{CompensationConfig, CompensationError, Result, BPS_DENOMINATOR};

/// Complete service configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Service settings
    #[serde(default)]
    pub node: NodeSettings,

    /// Compensation plan
    #[serde(default)]
    pub compensation: CompensationConfig,

    /// Price oracle access
    #[serde(default)]
    pub pricing: PricingConfig,

    /// KYC provider access
    #[serde(default)]
    pub kyc: KycConfig,

    /// Pool distribution jobs
    #[serde(default)]
    pub distribution: DistributionConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NodeConfig {
    /// Load from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| CompensationError::Storage(format!("read {}: {}", path.display(), e)))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| CompensationError::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| CompensationError::Serialization(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        self.compensation.validate()?;
        self.pricing.validate()?;
        if self.distribution.batch_size == 0 {
            return Err(CompensationError::InvalidConfig(
                "distribution.batch_size must be positive".into(),
            ));
        }
        if self.kyc.timeout_ms == 0 {
            return Err(CompensationError::InvalidConfig(
                "kyc.timeout_ms must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.node.data_dir)
    }
}

/// Basic service settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeSettings {
    /// Instance name, used in logs
    #[serde(default = "default_node_name")]
    pub name: String,

    /// Directory holding the ledger snapshot
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

fn default_node_name() -> String {
    "tierflow".to_string()
}

fn default_data_dir() -> String {
    "./data".to_string()
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            name: default_node_name(),
            data_dir: default_data_dir(),
        }
    }
}

/// Price oracle settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Oracle call timeout
    #[serde(default = "default_oracle_timeout")]
    pub timeout_ms: u64,

    /// Oldest acceptable quote
    #[serde(default = "default_max_price_age")]
    pub max_price_age_secs: i64,

    /// Largest accepted jump against the last known good quote
    #[serde(default = "default_max_deviation")]
    pub max_deviation_bps: u32,

    /// Accepted gap between a volatile payment's value and the price
    #[serde(default = "default_payment_tolerance")]
    pub payment_tolerance_bps: u32,
}

fn default_oracle_timeout() -> u64 {
    2_000
}

fn default_max_price_age() -> i64 {
    300
}

fn default_max_deviation() -> u32 {
    1_000
}

fn default_payment_tolerance() -> u32 {
    100
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_oracle_timeout(),
            max_price_age_secs: default_max_price_age(),
            max_deviation_bps: default_max_deviation(),
            payment_tolerance_bps: default_payment_tolerance(),
        }
    }
}

impl PricingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 || self.max_price_age_secs <= 0 {
            return Err(CompensationError::InvalidConfig(
                "pricing timeout and max age must be positive".into(),
            ));
        }
        if self.payment_tolerance_bps as u128 > BPS_DENOMINATOR {
            return Err(CompensationError::InvalidConfig(format!(
                "payment tolerance {} bps exceeds 100%",
                self.payment_tolerance_bps
            )));
        }
        Ok(())
    }
}

/// KYC provider settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KycConfig {
    /// Provider call timeout
    #[serde(default = "default_kyc_timeout")]
    pub timeout_ms: u64,
}

fn default_kyc_timeout() -> u64 {
    3_000
}

impl Default for KycConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_kyc_timeout(),
        }
    }
}

impl KycConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Pool distribution job settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DistributionConfig {
    /// Recipients paid per batch transaction
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_batch_size() -> usize {
    500
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}

/// Logging configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of text
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tierflow_core::RemainderSink;

    #[test]
    fn test_default_config_is_valid() {
        let config = NodeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.distribution.batch_size, 500);
        assert_eq!(config.pricing.timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_toml_roundtrip_keeps_plan() {
        let mut config = NodeConfig::default();
        config.compensation.remainder_sink = RemainderSink::Reserve;
        config.node.data_dir = "/var/lib/tierflow".into();

        let text = config.to_toml_string().unwrap();
        let parsed: NodeConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.compensation.remainder_sink, RemainderSink::Reserve);
        assert_eq!(parsed.node.data_dir, "/var/lib/tierflow");
        assert_eq!(parsed.compensation.packages.len(), 4);
    }

    #[test]
    fn test_load_rejects_invalid_plan() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tierflow.toml");
        std::fs::write(
            &path,
            r#"
            [compensation.allocation]
            direct_bps = 5000
            level_bps = 1000
            upline_bps = 1000
            leader_bps = 1000
            help_bps = 3000
            "#,
        )
        .unwrap();
        assert!(matches!(
            NodeConfig::load(&path),
            Err(CompensationError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tierflow.toml");
        std::fs::write(
            &path,
            r#"
            [distribution]
            batch_size = 50

            [logging]
            json = true
            "#,
        )
        .unwrap();
        let config = NodeConfig::load(&path).unwrap();
        assert_eq!(config.distribution.batch_size, 50);
        assert!(config.logging.json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_zero_batch_rejected() {
        let mut config = NodeConfig::default();
        config.distribution.batch_size = 0;
        assert!(config.validate().is_err());
    }
}

//! Daemon configuration

use anyhow::Result;
use serde::Deserialize;
use telemetry_engine::EngineConfig;

/// Daemon configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    /// Instance name reported in startup logs
    #[serde(default = "default_instance_name")]
    pub instance_name: String,

    /// Nested engine configuration (window, detector, predictor, optimizer)
    #[serde(default)]
    pub engine: EngineConfig,
}

fn default_instance_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "telemetry-daemon".to_string())
}

impl DaemonConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("ENGINE").separator("__"))
            .build()?;

        Ok(config.try_deserialize().unwrap_or_else(|_| DaemonConfig {
            instance_name: default_instance_name(),
            engine: EngineConfig::default(),
        }))
    }
}

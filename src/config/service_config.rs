//! Service Configuration - deployment settings as operator-tunable TOML values
//!
//! Each struct implements `Default` with values suitable for a single-node
//! deployment, ensuring the service starts with no config file present.
//! Clinical rule thresholds are deliberately absent: they are fixed in the
//! rule guardrail and not operator-tunable.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for one service deployment.
///
/// Load with `ServiceConfig::load()` which searches:
/// 1. `$AEGIS_CONFIG` env var
/// 2. `./aegis.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServiceConfig {
    #[serde(default)]
    pub server: ServerConfig,

    /// PHW API-key table (the auth surface; session management is out of scope)
    #[serde(default)]
    pub auth: AuthConfig,

    /// Analyzer fan-out deadlines
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub model: ModelConfig,

    #[serde(default)]
    pub escalation: EscalationConfig,

    #[serde(default)]
    pub handover: HandoverConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub events: EventsConfig,
}

impl ServiceConfig {
    /// Load configuration using the standard search order:
    /// 1. `$AEGIS_CONFIG` environment variable
    /// 2. `./aegis.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        if let Ok(path) = std::env::var("AEGIS_CONFIG") {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded service config from AEGIS_CONFIG");
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from AEGIS_CONFIG, falling back");
                    }
                }
            } else {
                warn!(path = %path, "AEGIS_CONFIG points to non-existent file, falling back");
            }
        }

        let local = PathBuf::from("aegis.toml");
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded service config from ./aegis.toml");
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./aegis.toml, using defaults");
                }
            }
        }

        info!("No aegis.toml found — using built-in defaults");
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        toml::from_str(&contents).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    Io(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    Parse(PathBuf, toml::de::Error),
}

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP bind address
    #[serde(default = "default_addr")]
    pub addr: String,
    /// Public base URL used to compose specialist magic links
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
    /// Maximum request body size (bytes)
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_addr() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_public_base_url() -> String {
    "http://localhost:8080".to_string()
}
fn default_body_limit() -> usize {
    262_144
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            public_base_url: default_public_base_url(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

/// One PHW credential row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhwKey {
    pub key: String,
    pub phw_id: String,
    pub name: String,
    pub facility: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_phw_keys")]
    pub phw_keys: Vec<PhwKey>,
}

fn default_phw_keys() -> Vec<PhwKey> {
    vec![PhwKey {
        key: "dev-phw-key".to_string(),
        phw_id: "phw-dev".to_string(),
        name: "Dev Health Worker".to_string(),
        facility: "Dev Facility".to_string(),
    }]
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            phw_keys: default_phw_keys(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Rule guardrail hard deadline; a miss fails the request as fatal
    #[serde(default = "default_rule_timeout_ms")]
    pub rule_timeout_ms: u64,
    /// Model task deadline; a miss degrades to ml_result = null
    #[serde(default = "default_model_timeout_ms")]
    pub model_timeout_ms: u64,
    /// Medication engine deadline; a miss degrades to a warning-less result
    #[serde(default = "default_med_timeout_ms")]
    pub med_timeout_ms: u64,
    /// Composite deadline over the whole analyzer fan-out
    #[serde(default = "default_analyze_deadline_ms")]
    pub analyze_deadline_ms: u64,
}

fn default_rule_timeout_ms() -> u64 {
    50
}
fn default_model_timeout_ms() -> u64 {
    2_000
}
fn default_med_timeout_ms() -> u64 {
    1_000
}
fn default_analyze_deadline_ms() -> u64 {
    5_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rule_timeout_ms: default_rule_timeout_ms(),
            model_timeout_ms: default_model_timeout_ms(),
            med_timeout_ms: default_med_timeout_ms(),
            analyze_deadline_ms: default_analyze_deadline_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Path to the trained risk model artifact (JSON). A missing or broken
    /// artifact leaves the model component unavailable; analysis degrades.
    #[serde(default = "default_model_path")]
    pub artifact_path: String,
}

fn default_model_path() -> String {
    "artifacts/risk_model.json".to_string()
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            artifact_path: default_model_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationConfig {
    #[serde(default = "default_token_ttl_hours")]
    pub token_ttl_hours: u64,
    /// When true, a token is revoked as soon as advice is submitted with it
    #[serde(default)]
    pub single_use_tokens: bool,
}

fn default_token_ttl_hours() -> u64 {
    24
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            token_ttl_hours: default_token_ttl_hours(),
            single_use_tokens: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoverConfig {
    /// External text service endpoint; when absent the deterministic
    /// template is used directly
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_url: Option<String>,
    #[serde(default = "default_handover_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_handover_timeout_ms() -> u64 {
    5_000
}

impl Default for HandoverConfig {
    fn default() -> Self {
        Self {
            service_url: None,
            timeout_ms: default_handover_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Audit retention window enforced by the housekeeping task
    #[serde(default = "default_audit_retention_days")]
    pub audit_retention_days: u64,
}

fn default_data_dir() -> String {
    "./data".to_string()
}
fn default_audit_retention_days() -> u64 {
    90
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            audit_retention_days: default_audit_retention_days(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Per-case broadcast channel capacity; a subscriber that falls this far
    /// behind is disconnected rather than blocking publishers
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
}

fn default_channel_capacity() -> usize {
    64
}
fn default_ping_interval_secs() -> u64 {
    30
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            ping_interval_secs: default_ping_interval_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let config = ServiceConfig::default();
        assert_eq!(config.engine.rule_timeout_ms, 50);
        assert_eq!(config.engine.model_timeout_ms, 2_000);
        assert_eq!(config.engine.med_timeout_ms, 1_000);
        assert_eq!(config.engine.analyze_deadline_ms, 5_000);
        assert_eq!(config.escalation.token_ttl_hours, 24);
        assert!(!config.escalation.single_use_tokens);
        assert!(config.handover.service_url.is_none());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: ServiceConfig = toml::from_str(
            r#"
            [server]
            addr = "127.0.0.1:9090"

            [escalation]
            single_use_tokens = true
            "#,
        )
        .unwrap();
        assert_eq!(config.server.addr, "127.0.0.1:9090");
        assert!(config.escalation.single_use_tokens);
        assert_eq!(config.escalation.token_ttl_hours, 24);
        assert_eq!(config.events.ping_interval_secs, 30);
    }
}

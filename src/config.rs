//! Configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::dispatcher::DispatcherConfig;

/// Main enrichd configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Credential set and cooldown
    pub credentials: CredentialsConfig,

    /// Text-generation service settings
    pub service: ServiceConfig,

    /// Worker pool and retry policy
    pub dispatch: DispatchConfig,
}

impl Config {
    /// Validate configuration before any work begins.
    ///
    /// Misconfiguration is fatal at startup, not mid-run.
    pub fn validate(&self) -> Result<()> {
        if self.credentials.keys.is_empty() {
            return Err(eyre::eyre!(
                "no credentials configured. Add at least one key under credentials.keys"
            ));
        }
        if self.service.variants.is_empty() {
            return Err(eyre::eyre!(
                "no model variants configured. Add at least one name under service.variants"
            ));
        }
        if self.dispatch.workers == 0 {
            return Err(eyre::eyre!("dispatch.workers must be at least 1"));
        }
        if self.dispatch.max_attempts == 0 {
            return Err(eyre::eyre!("dispatch.max-attempts must be at least 1"));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .enrichd.yml
        let local_config = PathBuf::from(".enrichd.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/enrichd/enrichd.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("enrichd").join("enrichd.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Credential pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// Opaque API keys, interchangeable
    pub keys: Vec<String>,

    /// Minimum interval between two uses of the same key, in milliseconds
    #[serde(rename = "cooldown-ms")]
    pub cooldown_ms: u64,

    /// Consecutive all-variants-missing strikes before a key is evicted
    #[serde(rename = "evict-after-strikes")]
    pub evict_after_strikes: u32,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            keys: Vec::new(),
            cooldown_ms: 2000,
            evict_after_strikes: 2,
        }
    }
}

impl CredentialsConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

/// Text-generation service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// API base URL
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Ordered model variant candidates; a missing variant advances to the
    /// next one
    pub variants: Vec<String>,

    /// Prompt template; `{content}` is replaced with the article payload
    pub prompt: String,

    /// Per-call timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,

    /// Annotations shorter than this are recorded as empty-annotation
    /// sentinels
    #[serde(rename = "min-annotation-len")]
    pub min_annotation_len: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            variants: vec![
                "gemini-1.5-flash".to_string(),
                "gemini-1.5-flash-001".to_string(),
                "gemini-1.5-pro".to_string(),
                "gemini-pro".to_string(),
            ],
            prompt: "Extract 4-7 concise keywords from the following article. \
                     Return only the keywords, comma-separated, with no preamble.\n\n\
                     Article:\n{content}"
                .to_string(),
            timeout_ms: 60_000,
            min_annotation_len: 4,
        }
    }
}

/// Worker pool and retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Concurrent workers, independent of credential count
    pub workers: usize,

    /// Attempt budget per item for transient failures
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    /// Pause before requeueing a transient failure, in milliseconds
    #[serde(rename = "retry-backoff-ms")]
    pub retry_backoff_ms: u64,

    /// Grace pause after observing an exhausted pool, in milliseconds
    #[serde(rename = "exhausted-pause-ms")]
    pub exhausted_pause_ms: u64,

    /// Payloads shorter than this are skipped with a sentinel
    #[serde(rename = "min-payload-chars")]
    pub min_payload_chars: usize,

    /// Payloads are truncated to this many characters
    #[serde(rename = "max-payload-chars")]
    pub max_payload_chars: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            max_attempts: 5,
            retry_backoff_ms: 1000,
            exhausted_pause_ms: 5000,
            min_payload_chars: 50,
            max_payload_chars: 15_000,
        }
    }
}

impl DispatchConfig {
    /// Convert to the dispatcher's runtime configuration.
    pub fn to_dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            workers: self.workers,
            max_attempts: self.max_attempts,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            exhausted_pause: Duration::from_millis(self.exhausted_pause_ms),
            min_payload_chars: self.min_payload_chars,
            max_payload_chars: self.max_payload_chars,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fail_validation_without_keys() {
        let config = Config::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_yaml_round_trip() {
        let yaml = r#"
credentials:
  keys: ["k1", "k2"]
  cooldown-ms: 1500
service:
  variants: ["gemini-1.5-flash"]
  timeout-ms: 30000
dispatch:
  workers: 4
  max-attempts: 3
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.credentials.keys.len(), 2);
        assert_eq!(config.credentials.cooldown(), Duration::from_millis(1500));
        assert_eq!(config.dispatch.workers, 4);
        // Unspecified fields fall back to defaults.
        assert_eq!(config.dispatch.min_payload_chars, 50);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let mut config = Config::default();
        config.credentials.keys.push("k".to_string());
        config.dispatch.workers = 0;
        assert!(config.validate().is_err());
    }
}

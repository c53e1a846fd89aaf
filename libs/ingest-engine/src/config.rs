use serde::Deserialize;

use crate::error::EngineError;

/// Root configuration, parsed from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IngestConfig {
    /// Permit `Producer::reset`. Leave off outside test harnesses.
    #[serde(default)]
    pub allow_reset: bool,

    /// Delivery worker tuning.
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Storage plugin configuration.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Topics created at bootstrap.
    #[serde(default)]
    pub topics: Vec<TopicConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// Most records handed to one callback invocation.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// First redelivery delay after a failed batch.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Cap for the doubling redelivery delay.
    #[serde(default = "default_max_retry_backoff_ms")]
    pub max_retry_backoff_ms: u64,

    /// Capacity of each topic's append notification channel.
    #[serde(default = "default_notify_buffer")]
    pub notify_buffer: usize,
}

fn default_max_batch_size() -> usize {
    100
}

fn default_retry_backoff_ms() -> u64 {
    50
}

fn default_max_retry_backoff_ms() -> u64 {
    5000
}

fn default_notify_buffer() -> usize {
    64
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            retry_backoff_ms: default_retry_backoff_ms(),
            max_retry_backoff_ms: default_max_retry_backoff_ms(),
            notify_buffer: default_notify_buffer(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    /// Passed verbatim (as JSON) to the storage factory for every topic.
    #[serde(default)]
    pub config: Option<toml::Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TopicConfig {
    pub name: String,
}

impl IngestConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, EngineError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content).map_err(|e| e.with_context(path))
    }

    /// Parse configuration from a TOML string.
    pub fn parse(toml_str: &str) -> Result<Self, EngineError> {
        let config: IngestConfig =
            toml::from_str(toml_str).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let d = &self.delivery;
        if d.max_batch_size == 0 {
            return Err(EngineError::Config("delivery.max_batch_size must be > 0".into()));
        }
        if d.notify_buffer == 0 {
            return Err(EngineError::Config("delivery.notify_buffer must be > 0".into()));
        }
        if d.retry_backoff_ms > d.max_retry_backoff_ms {
            return Err(EngineError::Config(format!(
                "delivery.retry_backoff_ms ({}) exceeds max_retry_backoff_ms ({})",
                d.retry_backoff_ms, d.max_retry_backoff_ms
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for topic in &self.topics {
            if topic.name.is_empty() {
                return Err(EngineError::Config("topic name must not be empty".into()));
            }
            if !seen.insert(topic.name.as_str()) {
                return Err(EngineError::Config(format!("duplicate topic '{}'", topic.name)));
            }
        }
        Ok(())
    }

    /// Storage config rendered as the JSON document factories expect.
    pub fn storage_config_json(&self) -> Result<String, EngineError> {
        match &self.storage.config {
            Some(value) => serde_json::to_string(value)
                .map_err(|e| EngineError::Config(format!("storage.config: {e}"))),
            None => Ok("{}".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = IngestConfig::parse("").unwrap();
        assert!(!config.allow_reset);
        assert_eq!(config.delivery.max_batch_size, 100);
        assert_eq!(config.delivery.retry_backoff_ms, 50);
        assert_eq!(config.delivery.max_retry_backoff_ms, 5000);
        assert!(config.topics.is_empty());
        assert_eq!(config.storage_config_json().unwrap(), "{}");
    }

    #[test]
    fn test_full_config() {
        let config = IngestConfig::parse(
            r#"
            allow_reset = true

            [delivery]
            max_batch_size = 8
            retry_backoff_ms = 10
            max_retry_backoff_ms = 40

            [storage]
            config = { initial_capacity = 4096 }

            [[topics]]
            name = "embeddings"

            [[topics]]
            name = "embeddings.audit"
            "#,
        )
        .unwrap();
        assert!(config.allow_reset);
        assert_eq!(config.delivery.max_batch_size, 8);
        assert_eq!(config.topics.len(), 2);
        assert_eq!(config.topics[1].name, "embeddings.audit");
        assert_eq!(
            config.storage_config_json().unwrap(),
            r#"{"initial_capacity":4096}"#
        );
    }

    #[test]
    fn test_rejects_zero_batch() {
        let err = IngestConfig::parse("[delivery]\nmax_batch_size = 0").unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn test_rejects_inverted_backoff() {
        let err = IngestConfig::parse(
            "[delivery]\nretry_backoff_ms = 100\nmax_retry_backoff_ms = 10",
        )
        .unwrap_err();
        assert!(err.to_string().contains("retry_backoff_ms"));
    }

    #[test]
    fn test_rejects_duplicate_topics() {
        let err = IngestConfig::parse("[[topics]]\nname = \"a\"\n[[topics]]\nname = \"a\"").unwrap_err();
        assert!(err.to_string().contains("duplicate topic 'a'"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = IngestConfig::load("/nonexistent/ingest.toml").unwrap_err();
        assert!(matches!(err, EngineError::Io(ref e) if e.kind() == std::io::ErrorKind::NotFound));
    }
}

use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Reader configuration, deserializable from TOML. Immutable once the reader
/// is constructed.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// The SQS queue URL to consume from.
    pub url: String,
    /// Receive wait time in seconds. 0 disables long polling; 1-20 enables it.
    pub wait_time_seconds: i32,
    /// Whether an ack deletes the message. Disabling leaves deletion to an
    /// external mechanism; acks still free the in-flight slot.
    pub delete_message: bool,
    /// Whether a nack resets the message's visibility timeout to zero.
    /// Disabling honours the visibility timeout preset on the queue.
    pub reset_visibility: bool,
    /// Messages per receive call and per ack/nack flush. Valid values: 1-10.
    pub max_number_of_messages: usize,
    /// Soft ceiling on in-flight messages. The fetch loop stops admitting new
    /// batches once this many messages are outstanding.
    pub max_outstanding_messages: usize,
    /// Visibility duration maintained for in-flight messages. Handles are
    /// eligible for a visibility extension once half of this has elapsed.
    /// Seconds granularity on the wire.
    pub message_timeout_ms: u64,
}

impl ReaderConfig {
    /// Hard per-RPC batch cap imposed by SQS.
    pub const MAX_BATCH_SIZE: usize = 10;

    pub const DEFAULT_MESSAGE_TIMEOUT_MS: u64 = 30_000;

    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn message_timeout(&self) -> Duration {
        Duration::from_millis(self.message_timeout_ms)
    }

    /// Validate option ranges. Called by `SqsReader::new`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::Invalid("url must not be empty".to_string()));
        }
        if !(0..=20).contains(&self.wait_time_seconds) {
            return Err(ConfigError::Invalid(format!(
                "wait_time_seconds must be 0-20, got {}",
                self.wait_time_seconds
            )));
        }
        if !(1..=Self::MAX_BATCH_SIZE).contains(&self.max_number_of_messages) {
            return Err(ConfigError::Invalid(format!(
                "max_number_of_messages must be 1-{}, got {}",
                Self::MAX_BATCH_SIZE,
                self.max_number_of_messages
            )));
        }
        if self.max_outstanding_messages == 0 {
            return Err(ConfigError::Invalid(
                "max_outstanding_messages must be at least 1".to_string(),
            ));
        }
        if self.message_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "message_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            wait_time_seconds: 0,
            delete_message: true,
            reset_visibility: true,
            max_number_of_messages: Self::MAX_BATCH_SIZE,
            max_outstanding_messages: 1000,
            message_timeout_ms: Self::DEFAULT_MESSAGE_TIMEOUT_MS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = ReaderConfig::default();
        assert_eq!(config.wait_time_seconds, 0);
        assert!(config.delete_message);
        assert!(config.reset_visibility);
        assert_eq!(config.max_number_of_messages, 10);
        assert_eq!(config.max_outstanding_messages, 1000);
        assert_eq!(config.message_timeout_ms, 30_000);
        assert_eq!(config.message_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn toml_parsing_with_overrides() {
        let toml_str = r#"
            url = "https://sqs.eu-west-1.amazonaws.com/123456789012/orders"
            wait_time_seconds = 20
            delete_message = false
            reset_visibility = false
            max_number_of_messages = 5
            max_outstanding_messages = 50
            message_timeout_ms = 10000
        "#;
        let config: ReaderConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(
            config.url,
            "https://sqs.eu-west-1.amazonaws.com/123456789012/orders"
        );
        assert_eq!(config.wait_time_seconds, 20);
        assert!(!config.delete_message);
        assert!(!config.reset_visibility);
        assert_eq!(config.max_number_of_messages, 5);
        assert_eq!(config.max_outstanding_messages, 50);
        assert_eq!(config.message_timeout_ms, 10_000);
    }

    #[test]
    fn toml_parsing_partial_uses_defaults() {
        let config: ReaderConfig = toml::from_str(r#"url = "q""#).unwrap();
        assert_eq!(config.url, "q");
        assert_eq!(config.max_number_of_messages, 10);
        assert_eq!(config.message_timeout_ms, 30_000);
    }

    #[test]
    fn validate_rejects_empty_url() {
        let config = ReaderConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_out_of_range_options() {
        let mut config = ReaderConfig::new("q");
        config.wait_time_seconds = 21;
        assert!(config.validate().is_err());

        let mut config = ReaderConfig::new("q");
        config.max_number_of_messages = 0;
        assert!(config.validate().is_err());

        let mut config = ReaderConfig::new("q");
        config.max_number_of_messages = 11;
        assert!(config.validate().is_err());

        let mut config = ReaderConfig::new("q");
        config.max_outstanding_messages = 0;
        assert!(config.validate().is_err());

        let mut config = ReaderConfig::new("q");
        config.message_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_accepts_defaults_with_url() {
        assert!(ReaderConfig::new("https://example/queue").validate().is_ok());
    }
}

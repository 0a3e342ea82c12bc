use super::{ConfigError, RelayConfig};
use url::Url;

/// Split a `NAME=VALUE` header argument.
pub fn parse_header(raw: &str) -> Result<(String, String), ConfigError> {
    let Some((name, value)) = raw.split_once('=') else {
        return Err(ConfigError::InvalidHeader(format!(
            "'{raw}' is not in NAME=VALUE form"
        )));
    };

    let name = name.trim();
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_') {
        return Err(ConfigError::InvalidHeader(format!("Invalid header name '{name}'")));
    }

    Ok((name.to_string(), value.trim().to_string()))
}

impl RelayConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = Url::parse(&self.base_url).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid base URL '{}': {}", self.base_url, e))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidUrl(format!(
                "Base URL '{}' must use http or https",
                self.base_url
            )));
        }

        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "Endpoint must not be empty".to_string(),
            ));
        }

        if self.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "Request timeout must be greater than 0".to_string(),
            ));
        }

        if self.flush_interval_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "Flush interval must be greater than 0".to_string(),
            ));
        }

        if self.max_batch_items == 0 || self.max_batch_bytes == 0 {
            return Err(ConfigError::InvalidConfig(
                "Batch limits must be greater than 0".to_string(),
            ));
        }

        if self.buffer_byte_ceiling == 0 || self.buffer_max_items == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "Buffer ceilings must be greater than 0".to_string(),
            ));
        }

        if self.stored_queue_max_events == 0 {
            return Err(ConfigError::InvalidConfig(
                "Stored queue must hold at least one event".to_string(),
            ));
        }

        if self.storage_key.is_empty()
            || !self
                .storage_key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        {
            return Err(ConfigError::InvalidConfig(format!(
                "Storage key '{}' may only contain letters, digits, '.', '_' and '-'",
                self.storage_key
            )));
        }

        if self.storage_limit_mb == 0 {
            return Err(ConfigError::InvalidConfig(
                "Storage limit must be greater than 0".to_string(),
            ));
        }

        if self.backoff_max_delay_ms < self.backoff_base_delay_ms {
            return Err(ConfigError::InvalidConfig(format!(
                "Backoff max delay ({}ms) must not be below the base delay ({}ms)",
                self.backoff_max_delay_ms, self.backoff_base_delay_ms
            )));
        }

        for raw in &self.extra_headers {
            parse_header(raw)?;
        }

        Ok(())
    }
}

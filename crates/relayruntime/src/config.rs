use relaycore::WorkflowSettings;
use std::time::Duration;

/// Configuration for the runtime
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Deadline shared by every downstream send of one `send_to_connected` call.
    pub send_timeout: Duration,
    /// Capacity of each node's input channel.
    pub input_buffer: usize,
    /// Rate-limit attempts before the final check.
    pub rate_limit_retries: u32,
    /// Attempt `n` (counting from zero) sleeps `n² × backoff_unit`, so the
    /// default three attempts wait 0 + 1 + 4 seconds before the final check.
    pub backoff_unit: Duration,
    pub event_buffer_size: usize,
    /// Token bucket size; `None` disables rate limiting.
    pub requests_per_second: Option<u32>,
}

impl RuntimeConfig {
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn with_input_buffer(mut self, size: usize) -> Self {
        self.input_buffer = size.max(1);
        self
    }

    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    pub fn with_requests_per_second(mut self, rps: u32) -> Self {
        self.requests_per_second = Some(rps);
        self
    }

    /// Applies the overrides carried by a workflow definition.
    pub fn with_settings(mut self, settings: &WorkflowSettings) -> Self {
        if let Some(ms) = settings.send_timeout_ms {
            self.send_timeout = Duration::from_millis(ms);
        }
        if let Some(size) = settings.input_buffer {
            self.input_buffer = size.max(1);
        }
        if let Some(rps) = settings.requests_per_second {
            self.requests_per_second = Some(rps);
        }
        self
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_secs(2),
            input_buffer: 5,
            rate_limit_retries: 3,
            backoff_unit: Duration::from_secs(1),
            event_buffer_size: 1000,
            requests_per_second: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_override_defaults() {
        let settings = WorkflowSettings {
            send_timeout_ms: Some(250),
            input_buffer: Some(0),
            requests_per_second: None,
        };
        let config = RuntimeConfig::default().with_settings(&settings);
        assert_eq!(config.send_timeout, Duration::from_millis(250));
        assert_eq!(config.input_buffer, 1);
        assert_eq!(config.rate_limit_retries, 3);
        assert!(config.requests_per_second.is_none());
    }
}

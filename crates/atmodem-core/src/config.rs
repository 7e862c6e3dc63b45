use std::time::Duration;

use serde::Deserialize;

/// Raw `[session]` table as written in TOML. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SessionConfigInput {
    pub response_timeout_ms: Option<u64>,
    pub read_timeout_ms: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub startup_delay_ms: Option<u64>,
    pub auto_answer: Option<bool>,
    pub ring_settle_ms: Option<u64>,
    pub max_line_len: Option<usize>,
    pub event_capacity: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// How long `execute` waits for a terminating line.
    pub response_timeout: Duration,
    /// Upper bound of one transport read; also bounds stop latency.
    pub read_timeout: Duration,
    /// Pause between listener iterations.
    pub poll_interval: Duration,
    /// Delay before the first read while the device becomes ready.
    pub startup_delay: Duration,
    /// Pick up and drop incoming calls.
    pub auto_answer: bool,
    /// Pause between answering and hanging up.
    pub ring_settle: Duration,
    pub max_line_len: usize,
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_millis(500),
            poll_interval: Duration::from_millis(50),
            startup_delay: Duration::from_secs(1),
            auto_answer: true,
            ring_settle: Duration::from_secs(1),
            max_line_len: 4096,
            event_capacity: 64,
        }
    }
}

impl SessionConfigInput {
    pub fn resolve(self) -> Result<SessionConfig, String> {
        let defaults = SessionConfig::default();
        let ms = |value: Option<u64>, default: Duration| {
            value.map(Duration::from_millis).unwrap_or(default)
        };

        let response_timeout = ms(self.response_timeout_ms, defaults.response_timeout);
        if response_timeout.is_zero() {
            return Err("response_timeout_ms must be greater than zero".into());
        }
        let read_timeout = ms(self.read_timeout_ms, defaults.read_timeout);
        if read_timeout.is_zero() {
            return Err("read_timeout_ms must be greater than zero".into());
        }

        Ok(SessionConfig {
            response_timeout,
            read_timeout,
            poll_interval: ms(self.poll_interval_ms, defaults.poll_interval),
            startup_delay: ms(self.startup_delay_ms, defaults.startup_delay),
            auto_answer: self.auto_answer.unwrap_or(defaults.auto_answer),
            ring_settle: ms(self.ring_settle_ms, defaults.ring_settle),
            max_line_len: self.max_line_len.unwrap_or(defaults.max_line_len).max(16),
            event_capacity: self.event_capacity.unwrap_or(defaults.event_capacity).max(1),
        })
    }
}

impl SessionConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, String> {
        if input.trim().is_empty() {
            return Ok(SessionConfig::default());
        }
        let parsed: SessionConfigInput =
            toml::from_str(input).map_err(|e| format!("Invalid session config TOML: {}", e))?;
        parsed.resolve()
    }
}

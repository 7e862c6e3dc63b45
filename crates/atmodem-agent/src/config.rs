use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use atmodem_core::config::{SessionConfig, SessionConfigInput};
use serde::Deserialize;

pub const CONFIG_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AgentConfigInput {
    pub version: u32,
    pub device: DeviceConfigInput,
    pub session: SessionConfigInput,
    pub sms: SmsConfigInput,
    pub send: Vec<OutgoingInput>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DeviceConfigInput {
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SmsConfigInput {
    pub poll_interval_s: Option<u64>,
    pub delete_after_read: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OutgoingInput {
    pub number: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub number: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboxConfig {
    pub poll_interval: Duration,
    pub delete_after_read: bool,
}

impl Default for InboxConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            delete_after_read: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub version: u32,
    pub device: Option<PathBuf>,
    pub session: SessionConfig,
    pub inbox: InboxConfig,
    pub outgoing: Vec<OutgoingMessage>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            device: None,
            session: SessionConfig::default(),
            inbox: InboxConfig::default(),
            outgoing: Vec::new(),
        }
    }
}

impl AgentConfigInput {
    pub fn resolve(self) -> anyhow::Result<AgentConfig> {
        let version = if self.version == 0 {
            CONFIG_VERSION
        } else {
            self.version
        };
        if version != CONFIG_VERSION {
            bail!("Unsupported config version {}", version);
        }

        let session = self.session.resolve().map_err(|e| anyhow!(e))?;

        let defaults = InboxConfig::default();
        let poll_interval = self
            .sms
            .poll_interval_s
            .map(Duration::from_secs)
            .unwrap_or(defaults.poll_interval)
            .max(Duration::from_secs(1));
        let inbox = InboxConfig {
            poll_interval,
            delete_after_read: self.sms.delete_after_read.unwrap_or(defaults.delete_after_read),
        };

        let mut outgoing = Vec::new();
        for msg in self.send {
            let number = msg.number.trim().to_string();
            if number.is_empty() {
                continue;
            }
            outgoing.push(OutgoingMessage {
                number,
                body: msg.body,
            });
        }

        let device = self.device.path.and_then(|p| {
            let trimmed = p.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(PathBuf::from(trimmed))
            }
        });

        Ok(AgentConfig {
            version,
            device,
            session,
            inbox,
            outgoing,
        })
    }
}

impl AgentConfig {
    pub fn from_toml_str(input: &str) -> anyhow::Result<Self> {
        if input.trim().is_empty() {
            return Ok(AgentConfig::default());
        }
        let parsed: AgentConfigInput =
            toml::from_str(input).context("Invalid config TOML")?;
        parsed.resolve()
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("loading config {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parse_toml_config_basic() {
        let toml = r#"
            version = 1

            [device]
            path = " /dev/ttyUSB2 "

            [session]
            response_timeout_ms = 10000
            auto_answer = false

            [sms]
            poll_interval_s = 15
            delete_after_read = false

            [[send]]
            number = "+6584389984"
            body = "Test Message."

            [[send]]
            number = "  "
            body = "dropped"
        "#;

        let cfg = AgentConfig::from_toml_str(toml).unwrap();
        assert_eq!(cfg.version, CONFIG_VERSION);
        assert_eq!(cfg.device.as_deref(), Some(Path::new("/dev/ttyUSB2")));
        assert_eq!(cfg.session.response_timeout, Duration::from_secs(10));
        assert!(!cfg.session.auto_answer);
        assert_eq!(cfg.inbox.poll_interval, Duration::from_secs(15));
        assert!(!cfg.inbox.delete_after_read);
        assert_eq!(
            cfg.outgoing,
            vec![OutgoingMessage {
                number: "+6584389984".into(),
                body: "Test Message.".into(),
            }]
        );
    }

    #[test]
    fn empty_config_uses_defaults() {
        let cfg = AgentConfig::from_toml_str("").unwrap();
        assert!(cfg.device.is_none());
        assert_eq!(cfg.inbox, InboxConfig::default());
        assert_eq!(cfg.session, SessionConfig::default());
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let err = AgentConfig::from_toml_str("version = 2").unwrap_err();
        assert!(err.to_string().contains("Unsupported config version"));
    }

    #[test]
    fn invalid_session_is_rejected() {
        assert!(AgentConfig::from_toml_str("[session]\nread_timeout_ms = 0").is_err());
    }

    #[test]
    fn poll_interval_has_a_floor() {
        let cfg = AgentConfig::from_toml_str("[sms]\npoll_interval_s = 0").unwrap();
        assert_eq!(cfg.inbox.poll_interval, Duration::from_secs(1));
    }

    #[test]
    fn load_from_file() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp, "[device]\npath = \"/dev/ttyACM0\"").unwrap();
        let cfg = AgentConfig::load(tmp.path()).unwrap();
        assert_eq!(cfg.device.as_deref(), Some(Path::new("/dev/ttyACM0")));

        let err = AgentConfig::load(Path::new("/nonexistent/atmodem.toml")).unwrap_err();
        assert!(format!("{err:#}").contains("reading config"));
    }
}

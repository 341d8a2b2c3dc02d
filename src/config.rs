//! Scenario configuration.
//!
//! A scenario file configures one simulated endpoint and the ordered list
//! of actions to execute against it.

use crate::envelope::SoapVersion;
use crate::server;
use crate::simulator::WebServiceAction;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level scenario: simulator settings plus the action script.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ScenarioConfig {
    #[serde(default)]
    pub simulator: SimulatorSettings,

    #[serde(default)]
    pub actions: Vec<WebServiceAction>,
}

impl ScenarioConfig {
    /// Load a scenario from a YAML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the scenario.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.simulator.validate()?;
        for (i, action) in self.actions.iter().enumerate() {
            validate_action(action).map_err(|e| anyhow::anyhow!("Action {}: {}", i, e))?;
        }
        Ok(())
    }
}

fn validate_action(action: &WebServiceAction) -> anyhow::Result<()> {
    match action {
        WebServiceAction::Start | WebServiceAction::Stop => Ok(()),
        WebServiceAction::Receive { timeout_ms, extract } => {
            if *timeout_ms == 0 {
                anyhow::bail!("receive timeout must be positive");
            }
            for binding in extract {
                binding.validate()?;
            }
            Ok(())
        }
        WebServiceAction::Respond { message, message_file, transform, .. } => {
            match (message, message_file) {
                (None, None) => anyhow::bail!("respond needs a message or a message_file"),
                (Some(_), Some(_)) => {
                    anyhow::bail!("respond takes either a message or a message_file, not both")
                }
                _ => {}
            }
            for binding in transform {
                binding.validate()?;
            }
            Ok(())
        }
    }
}

/// Settings shared by all actions of a scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulatorSettings {
    /// Prefix assigned to namespace URIs that appear without one; path
    /// expressions use it to address unprefixed-but-namespaced nodes.
    #[serde(default = "default_namespace_prefix")]
    pub default_namespace_prefix: String,

    /// Envelope version used when wrapping responses.
    #[serde(default)]
    pub soap_version: SoapVersion,

    /// Fail on unmatched write targets and missing values instead of
    /// silently degrading.
    #[serde(default)]
    pub strict_paths: bool,

    #[serde(default)]
    pub server: ServerSettings,
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        Self {
            default_namespace_prefix: default_namespace_prefix(),
            soap_version: SoapVersion::default(),
            strict_paths: false,
            server: ServerSettings::default(),
        }
    }
}

impl SimulatorSettings {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.default_namespace_prefix.is_empty() {
            anyhow::bail!("default namespace prefix cannot be empty");
        }
        self.server.validate()
    }
}

fn default_namespace_prefix() -> String {
    "ns".to_string()
}

/// Listener settings for the single-slot server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Context path; requests outside it are rejected with 404.
    #[serde(default = "default_path")]
    pub path: String,

    /// Hand-off queue capacity.
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,

    /// How long the network side waits for queue space before dropping a
    /// request.
    #[serde(default = "default_offer_timeout_ms")]
    pub offer_timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            path: default_path(),
            queue_size: default_queue_size(),
            offer_timeout_ms: default_offer_timeout_ms(),
        }
    }
}

impl ServerSettings {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.host.is_empty() {
            anyhow::bail!("server host cannot be empty");
        }
        if !self.path.starts_with('/') {
            anyhow::bail!("server path must start with '/': {}", self.path);
        }
        if self.queue_size == 0 {
            anyhow::bail!("queue size must be at least 1");
        }
        if self.offer_timeout_ms == 0 {
            anyhow::bail!("offer timeout must be positive");
        }
        Ok(())
    }
}

fn default_host() -> String {
    server::DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    server::DEFAULT_PORT
}

fn default_path() -> String {
    server::DEFAULT_PATH.to_string()
}

fn default_queue_size() -> usize {
    server::DEFAULT_QUEUE_SIZE
}

fn default_offer_timeout_ms() -> u64 {
    server::DEFAULT_OFFER_TIMEOUT.as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = SimulatorSettings::default();
        assert_eq!(settings.default_namespace_prefix, "ns");
        assert_eq!(settings.soap_version, SoapVersion::V11);
        assert!(!settings.strict_paths);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 80);
        assert_eq!(settings.server.path, "/");
        assert_eq!(settings.server.queue_size, 3);
        assert_eq!(settings.server.offer_timeout_ms, 30_000);
    }

    #[test]
    fn test_parse_full_scenario() {
        let yaml = r#"
simulator:
  default_namespace_prefix: ns
  soap_version: "1.2"
  strict_paths: true
  server:
    host: 127.0.0.1
    port: 8080
    path: /service
    queue_size: 5
    offer_timeout_ms: 10000

actions:
  - type: start
  - type: receive
    timeout_ms: 5000
    extract:
      - name: id
        path: /order/id
  - type: respond
    message: "<status><code/></status>"
    transform:
      - name: code
        path: /status/code
    values:
      - type: text
        name: code
        value: OK
  - type: stop
"#;
        let config: ScenarioConfig = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.simulator.soap_version, SoapVersion::V12);
        assert!(config.simulator.strict_paths);
        assert_eq!(config.simulator.server.port, 8080);
        assert_eq!(config.actions.len(), 4);
    }

    #[test]
    fn test_validation_rejects_zero_queue() {
        let mut config = ScenarioConfig::default();
        config.simulator.server.queue_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_bad_path() {
        let mut config = ScenarioConfig::default();
        config.simulator.server.path = "service".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_respond_without_message() {
        let yaml = r#"
actions:
  - type: respond
"#;
        let config: ScenarioConfig = serde_yaml::from_str(yaml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("message"));
    }

    #[test]
    fn test_validation_rejects_zero_receive_timeout() {
        let yaml = r#"
actions:
  - type: receive
    timeout_ms: 0
"#;
        let config: ScenarioConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let yaml = r#"
simulator:
  unknown_setting: true
"#;
        assert!(serde_yaml::from_str::<ScenarioConfig>(yaml).is_err());
    }

    #[test]
    fn test_from_file() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "actions:\n  - type: start\n  - type: stop\n").unwrap();

        let config = ScenarioConfig::from_file(file.path()).unwrap();
        assert_eq!(config.actions.len(), 2);
    }
}

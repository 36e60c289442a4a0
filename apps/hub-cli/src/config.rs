//! Client configuration.
//!
//! Read from the TOML file named by `RELAYHUB_CONFIG`, otherwise
//! `~/.config/relayhub/client.toml`. A missing file yields defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use relayhub_connection::HubConnectionBuilder;
use serde::Deserialize;
use serde_json::Value;
use tracing::level_filters::LevelFilter;

/// Environment variable overriding the config file location.
pub const CONFIG_ENV: &str = "RELAYHUB_CONFIG";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Hub base URL.
    pub url: String,
    pub api_key: Option<String>,
    pub bearer_token: Option<String>,
    pub group: Option<String>,
    /// Extra WebSocket query parameters.
    pub transport_params: BTreeMap<String, String>,
    /// Reconnect delays in milliseconds. `None` uses the library defaults,
    /// an empty list disables reconnection.
    pub reconnect_delays_ms: Option<Vec<u64>>,
    pub skip_negotiation: bool,
    /// Verbosity ceiling for the connection's own events.
    pub log_level: String,
    pub invocation_timeout_ms: Option<u64>,
    /// Server methods whose calls are logged.
    pub subscribe: Vec<String>,
    /// Method invoked once after connecting.
    pub invoke: Option<InvokeConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvokeConfig {
    pub method: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:5000/hub".into(),
            api_key: None,
            bearer_token: None,
            group: None,
            transport_params: BTreeMap::new(),
            reconnect_delays_ms: None,
            skip_negotiation: false,
            log_level: "info".into(),
            invocation_timeout_ms: None,
            subscribe: Vec::new(),
            invoke: None,
        }
    }
}

impl ClientConfig {
    /// Loads from the configured path.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&config_path())
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: ClientConfig =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// Translates the file settings into a connection builder.
    pub fn to_builder(&self) -> anyhow::Result<HubConnectionBuilder> {
        let level: LevelFilter = self
            .log_level
            .parse()
            .with_context(|| format!("invalid log_level '{}'", self.log_level))?;

        let mut builder = HubConnectionBuilder::new()
            .with_url(self.url.as_str())
            .skip_negotiation(self.skip_negotiation)
            .configure_logging(level);

        if let Some(key) = &self.api_key {
            builder = builder.with_api_key(key.as_str());
        }
        if let Some(token) = &self.bearer_token {
            builder = builder.with_bearer_token(token.as_str());
        }
        if let Some(group) = &self.group {
            builder = builder.with_group(group.as_str());
        }
        for (key, value) in &self.transport_params {
            builder = builder.with_transport_param(key.as_str(), value.as_str());
        }
        builder = match &self.reconnect_delays_ms {
            None => builder.with_automatic_reconnect(),
            Some(delays) => builder.with_reconnect_delays(
                delays.iter().copied().map(Duration::from_millis).collect(),
            ),
        };
        if let Some(ms) = self.invocation_timeout_ms {
            builder = builder.with_invocation_timeout(Duration::from_millis(ms));
        }
        Ok(builder)
    }
}

fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        return PathBuf::from(path);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
    PathBuf::from(home)
        .join(".config")
        .join("relayhub")
        .join("client.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ClientConfig::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.url, "http://localhost:5000/hub");
        assert!(config.reconnect_delays_ms.is_none());
        assert!(config.subscribe.is_empty());
    }

    #[test]
    fn parses_full_file() {
        let file = write_config(
            r#"
url = "https://hub.example.com/chat"
api_key = "k"
group = "ops"
reconnect_delays_ms = [0, 500]
log_level = "debug"
subscribe = ["ReceiveMessage"]

[transport_params]
region = "eu"

[invoke]
method = "Join"
args = ["lobby", 3]
"#,
        );
        let config = ClientConfig::load_from(file.path()).unwrap();
        assert_eq!(config.api_key.as_deref(), Some("k"));
        assert_eq!(config.reconnect_delays_ms, Some(vec![0, 500]));
        assert_eq!(config.transport_params.get("region").map(String::as_str), Some("eu"));
        let invoke = config.invoke.clone().unwrap();
        assert_eq!(invoke.method, "Join");
        assert_eq!(invoke.args, vec![serde_json::json!("lobby"), serde_json::json!(3)]);

        let conn = config.to_builder().unwrap().build().unwrap();
        let opts = conn.options();
        assert_eq!(opts.group.as_deref(), Some("ops"));
        assert_eq!(
            opts.reconnect_delays,
            vec![Duration::ZERO, Duration::from_millis(500)]
        );
        assert_eq!(opts.log_level, LevelFilter::DEBUG);
        assert_eq!(opts.transport_params, vec![("region".into(), "eu".into())]);
    }

    #[test]
    fn empty_delay_list_disables_reconnect() {
        let file = write_config("reconnect_delays_ms = []\n");
        let config = ClientConfig::load_from(file.path()).unwrap();
        let conn = config.to_builder().unwrap().build().unwrap();
        assert!(conn.options().reconnect_delays.is_empty());
    }

    #[test]
    fn bad_log_level_is_an_error() {
        let config = ClientConfig {
            log_level: "loud".into(),
            ..ClientConfig::default()
        };
        assert!(config.to_builder().is_err());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let file = write_config("url = [not toml");
        assert!(ClientConfig::load_from(file.path()).is_err());
    }
}

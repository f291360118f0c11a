//! Layered configuration for the opshub client.
//!
//! Settings are merged from, in increasing precedence:
//! 1. `opshub.toml` (project `.opshub/` first, then the user config dir)
//! 2. Environment variables (after `.env` is loaded by the binary)
//! 3. CLI flags
//!
//! # Configuration File Format
//!
//! ```toml
//! [api]
//! url = "http://localhost:5000/api"
//!
//! [socket]
//! url = "http://localhost:5000"
//! reconnection_attempts = 5
//! reconnect_delay_ms = 1000
//! reconnect_delay_max_ms = 5000
//! connect_timeout_ms = 20000
//!
//! [storage]
//! url = "https://xyz.supabase.co"
//! anon_key = "..."
//! bucket = "task-assets"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::api::DEFAULT_API_URL;
use crate::live::ConnectionOptions;
use crate::storage::DEFAULT_BUCKET;

pub const DEFAULT_SOCKET_URL: &str = "http://localhost:5000";
pub const CONFIG_DIR: &str = ".opshub";
pub const CONFIG_FILE: &str = "opshub.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiSection {
    /// REST base URL, including the `/api` prefix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocketSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default = "default_reconnection_attempts")]
    pub reconnection_attempts: u32,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_reconnect_delay_max_ms")]
    pub reconnect_delay_max_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_reconnection_attempts() -> u32 {
    5
}

fn default_reconnect_delay_ms() -> u64 {
    1_000
}

fn default_reconnect_delay_max_ms() -> u64 {
    5_000
}

fn default_connect_timeout_ms() -> u64 {
    20_000
}

impl Default for SocketSection {
    fn default() -> Self {
        Self {
            url: None,
            reconnection_attempts: default_reconnection_attempts(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            reconnect_delay_max_ms: default_reconnect_delay_max_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anon_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
}

/// Contents of `opshub.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HubToml {
    #[serde(default)]
    pub api: ApiSection,
    #[serde(default)]
    pub socket: SocketSection,
    #[serde(default)]
    pub storage: StorageSection,
}

impl HubToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse opshub.toml")
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize opshub.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Problems worth telling the user about. Empty means the file is usable.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        for (key, url) in [
            ("api.url", self.api.url.as_deref()),
            ("storage.url", self.storage.url.as_deref()),
        ] {
            if let Some(url) = url.filter(|u| !is_http_url(u)) {
                warnings.push(format!(
                    "Invalid {} '{}': expected an http:// or https:// URL",
                    key, url
                ));
            }
        }
        if let Some(url) = self.socket.url.as_deref().filter(|u| !is_socket_url(u)) {
            warnings.push(format!(
                "Invalid socket.url '{}': expected an http(s):// or ws(s):// URL",
                url
            ));
        }

        if self.socket.reconnection_attempts == 0 {
            warnings.push(
                "socket.reconnection_attempts is 0: a dropped connection will not be retried"
                    .to_string(),
            );
        }
        if self.socket.reconnect_delay_max_ms < self.socket.reconnect_delay_ms {
            warnings.push(format!(
                "socket.reconnect_delay_max_ms ({}) is below reconnect_delay_ms ({})",
                self.socket.reconnect_delay_max_ms, self.socket.reconnect_delay_ms
            ));
        }
        if self.socket.connect_timeout_ms == 0 {
            warnings.push("socket.connect_timeout_ms must be greater than 0".to_string());
        }

        if self.storage.url.is_none() {
            warnings.push("storage.url is not set: attachment uploads are disabled".to_string());
        }
        if self.storage.anon_key.is_none() {
            warnings
                .push("storage.anon_key is not set: attachment uploads are disabled".to_string());
        }

        warnings
    }
}

fn is_http_url(url: &str) -> bool {
    let url = url.trim();
    url.starts_with("http://") || url.starts_with("https://")
}

fn is_socket_url(url: &str) -> bool {
    let url = url.trim();
    is_http_url(url) || url.starts_with("ws://") || url.starts_with("wss://")
}

/// Environment overrides, captured once so resolution stays deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverrides {
    pub api_url: Option<String>,
    pub socket_url: Option<String>,
    pub token: Option<String>,
    pub storage_url: Option<String>,
    pub storage_key: Option<String>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            api_url: var("OPSHUB_API_URL"),
            socket_url: var("OPSHUB_SOCKET_URL"),
            token: var("OPSHUB_TOKEN"),
            storage_url: var("SUPABASE_URL"),
            storage_key: var("SUPABASE_ANON_KEY"),
        }
    }
}

/// Where `opshub.toml` is looked up: the project directory, then the
/// user config dir. Returns `None` if neither exists.
pub fn discover_config_file(project_dir: &Path) -> Option<PathBuf> {
    let local = project_dir.join(CONFIG_DIR).join(CONFIG_FILE);
    if local.exists() {
        return Some(local);
    }
    let global = user_config_file()?;
    global.exists().then_some(global)
}

pub fn user_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("opshub").join(CONFIG_FILE))
}

/// Resolved configuration.
#[derive(Debug, Clone, Default)]
pub struct HubConfig {
    /// File the settings were read from, if any.
    pub source: Option<PathBuf>,
    pub toml: HubToml,
    pub env: EnvOverrides,
    /// CLI override for the bearer token.
    pub cli_token: Option<String>,
}

impl HubConfig {
    /// Load from the discovered file plus the process environment.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let source = discover_config_file(project_dir);
        let toml = match &source {
            Some(path) => HubToml::load(path)?,
            None => HubToml::default(),
        };
        Ok(Self {
            source,
            toml,
            env: EnvOverrides::from_env(),
            cli_token: None,
        })
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        if token.is_some() {
            self.cli_token = token;
        }
        self
    }

    /// env → file → default.
    pub fn api_url(&self) -> String {
        self.env
            .api_url
            .clone()
            .or_else(|| self.toml.api.url.clone())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
    }

    /// env → file → the API origin (the API URL without `/api`).
    pub fn socket_url(&self) -> String {
        if let Some(url) = self.env.socket_url.clone().or_else(|| self.toml.socket.url.clone()) {
            return url;
        }
        let api = self.api_url();
        let api = api.trim_end_matches('/');
        match api.strip_suffix("/api") {
            Some(origin) if !origin.is_empty() => origin.to_string(),
            _ => DEFAULT_SOCKET_URL.to_string(),
        }
    }

    /// CLI → env.
    pub fn token(&self) -> Option<String> {
        self.cli_token.clone().or_else(|| self.env.token.clone())
    }

    pub fn storage_url(&self) -> Option<String> {
        self.env
            .storage_url
            .clone()
            .or_else(|| self.toml.storage.url.clone())
    }

    pub fn storage_key(&self) -> Option<String> {
        self.env
            .storage_key
            .clone()
            .or_else(|| self.toml.storage.anon_key.clone())
    }

    pub fn storage_bucket(&self) -> String {
        self.toml
            .storage
            .bucket
            .clone()
            .unwrap_or_else(|| DEFAULT_BUCKET.to_string())
    }

    pub fn connection_options(&self) -> ConnectionOptions {
        let socket = &self.toml.socket;
        ConnectionOptions {
            reconnection_attempts: socket.reconnection_attempts,
            reconnect_delay: Duration::from_millis(socket.reconnect_delay_ms),
            reconnect_delay_max: Duration::from_millis(socket.reconnect_delay_max_ms),
            connect_timeout: Duration::from_millis(socket.connect_timeout_ms),
        }
    }

    /// File warnings, with storage warnings dropped when the environment
    /// supplies what the file lacks.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = self.toml.validate();
        if self.env.storage_url.is_some() {
            warnings.retain(|w| !w.starts_with("storage.url is not set"));
        }
        if self.env.storage_key.is_some() {
            warnings.retain(|w| !w.starts_with("storage.anon_key is not set"));
        }
        for (name, url) in [
            ("OPSHUB_API_URL", self.env.api_url.as_deref()),
            ("SUPABASE_URL", self.env.storage_url.as_deref()),
        ] {
            if let Some(url) = url.filter(|u| !is_http_url(u)) {
                warnings.push(format!("Invalid {} '{}'", name, url));
            }
        }
        if let Some(url) = self.env.socket_url.as_deref().filter(|u| !is_socket_url(u)) {
            warnings.push(format!("Invalid OPSHUB_SOCKET_URL '{}'", url));
        }
        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_empty_uses_defaults() {
        let toml = HubToml::parse("").unwrap();
        assert_eq!(toml, HubToml::default());
        assert_eq!(toml.socket.reconnection_attempts, 5);
        assert_eq!(toml.socket.connect_timeout_ms, 20_000);
    }

    #[test]
    fn test_parse_sections() {
        let toml = HubToml::parse(
            r#"
[api]
url = "https://hub.example.com/api"

[socket]
reconnection_attempts = 2
reconnect_delay_ms = 250

[storage]
url = "https://x.supabase.co"
anon_key = "anon"
bucket = "docs"
"#,
        )
        .unwrap();
        assert_eq!(toml.api.url.as_deref(), Some("https://hub.example.com/api"));
        assert_eq!(toml.socket.reconnection_attempts, 2);
        assert_eq!(toml.socket.reconnect_delay_ms, 250);
        assert_eq!(toml.socket.reconnect_delay_max_ms, 5_000);
        assert_eq!(toml.storage.bucket.as_deref(), Some("docs"));
        assert!(toml.validate().is_empty());
    }

    #[test]
    fn test_parse_rejects_bad_types() {
        assert!(HubToml::parse("[socket]\nreconnection_attempts = \"many\"").is_err());
    }

    #[test]
    fn test_validate_flags_problems() {
        let mut toml = HubToml::default();
        toml.api.url = Some("localhost:5000".into());
        toml.socket.reconnection_attempts = 0;
        toml.socket.reconnect_delay_max_ms = 10;
        let warnings = toml.validate();
        assert!(warnings.iter().any(|w| w.contains("api.url")));
        assert!(warnings.iter().any(|w| w.contains("reconnection_attempts is 0")));
        assert!(warnings.iter().any(|w| w.contains("reconnect_delay_max_ms")));
        assert!(warnings.iter().any(|w| w.contains("storage.anon_key")));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_DIR).join(CONFIG_FILE);
        let mut toml = HubToml::default();
        toml.socket.url = Some("http://127.0.0.1:9000".into());
        toml.save(&path).unwrap();
        assert_eq!(HubToml::load(&path).unwrap(), toml);
    }

    #[test]
    fn test_load_prefers_project_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_DIR).join(CONFIG_FILE);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "[api]\nurl = \"http://10.0.0.1/api\"\n").unwrap();

        assert_eq!(discover_config_file(dir.path()), Some(path.clone()));
        let config = HubConfig::load(dir.path()).unwrap();
        assert_eq!(config.source, Some(path));
        assert_eq!(config.toml.api.url.as_deref(), Some("http://10.0.0.1/api"));
    }

    #[test]
    fn test_env_beats_file_and_cli_beats_env() {
        let mut config = HubConfig::default();
        config.toml.api.url = Some("http://file/api".into());
        config.env.api_url = Some("http://env/api".into());
        config.env.token = Some("env-token".into());
        assert_eq!(config.api_url(), "http://env/api");
        assert_eq!(config.token().as_deref(), Some("env-token"));

        let config = config.with_token(Some("cli-token".into()));
        assert_eq!(config.token().as_deref(), Some("cli-token"));
        let config = config.with_token(None);
        assert_eq!(config.token().as_deref(), Some("cli-token"));
    }

    #[test]
    fn test_socket_url_derives_from_api_origin() {
        let mut config = HubConfig::default();
        assert_eq!(config.api_url(), DEFAULT_API_URL);
        assert_eq!(config.socket_url(), "http://localhost:5000");

        config.toml.api.url = Some("https://hub.example.com/api/".into());
        assert_eq!(config.socket_url(), "https://hub.example.com");

        config.toml.api.url = Some("https://hub.example.com/v2".into());
        assert_eq!(config.socket_url(), DEFAULT_SOCKET_URL);

        config.toml.socket.url = Some("wss://live.example.com".into());
        assert_eq!(config.socket_url(), "wss://live.example.com");
    }

    #[test]
    fn test_connection_options_follow_socket_section() {
        let mut config = HubConfig::default();
        config.toml.socket.reconnection_attempts = 3;
        config.toml.socket.connect_timeout_ms = 1_500;
        let options = config.connection_options();
        assert_eq!(options.reconnection_attempts, 3);
        assert_eq!(options.connect_timeout, Duration::from_millis(1_500));
        assert_eq!(options.reconnect_delay, Duration::from_millis(1_000));
    }

    #[test]
    fn test_env_storage_silences_file_warnings() {
        let mut config = HubConfig::default();
        assert!(config.validate().iter().any(|w| w.contains("storage.url")));
        config.env.storage_url = Some("https://x.supabase.co".into());
        config.env.storage_key = Some("anon".into());
        assert!(config.validate().is_empty());
        assert_eq!(config.storage_bucket(), DEFAULT_BUCKET);
    }
}

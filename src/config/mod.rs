use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Path of the WebSocket endpoint on the backend.
pub const WS_PATH: &str = "/ws/start_instance";
/// Path of the single-shot REST endpoint on the backend.
pub const RUN_PATH: &str = "/run";

/// Which protocol binding a deployment talks to the backend with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// WebSocket session with one-time code relay.
    #[default]
    Interactive,
    /// One POST, no challenge step.
    Rest,
}

impl TransportKind {
    #[must_use]
    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "interactive" | "ws" | "websocket" => Some(Self::Interactive),
            "rest" | "http" => Some(Self::Rest),
            _ => None,
        }
    }

    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::Interactive => "interactive",
            Self::Rest => "rest",
        }
    }
}

/// What the relay does after the operator declines to enter a code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AbortPolicy {
    /// Close the session and report the abort.
    #[default]
    Close,
    /// Keep the session open and wait for the backend to ask again.
    Wait,
}

impl AbortPolicy {
    #[must_use]
    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "close" => Some(Self::Close),
            "wait" => Some(Self::Wait),
            _ => None,
        }
    }

    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::Close => "close",
            Self::Wait => "wait",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Backend host name. `AUTOAPPLY_HOST` overrides it at load time.
    pub host: String,
    pub port: u16,
    /// Use `wss://` and `https://`.
    pub secure: bool,
    pub transport: TransportKind,
    pub connect_timeout_secs: u64,
    /// Overall timeout for the REST request. Default: 120.
    pub request_timeout_secs: u64,
    /// How long to wait for the operator to enter a code. Unset waits forever.
    pub code_timeout_secs: Option<u64>,
    pub on_code_abort: AbortPolicy,
    pub code_prompt: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8000,
            secure: false,
            transport: TransportKind::Interactive,
            connect_timeout_secs: 10,
            request_timeout_secs: 120,
            code_timeout_secs: None,
            on_code_abort: AbortPolicy::Close,
            code_prompt: "Enter the code you've received".to_string(),
        }
    }
}

/// Directory holding `config.toml`.
#[must_use]
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("autoapply"))
        .unwrap_or_else(|| PathBuf::from(".autoapply"))
}

impl Config {
    #[must_use]
    pub fn config_path() -> PathBuf {
        config_dir().join("config.toml")
    }

    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::load_from(&Self::config_path())?;
        if let Ok(host) = std::env::var("AUTOAPPLY_HOST")
            && !host.trim().is_empty()
        {
            config.host = host.trim().to_string();
        }
        Ok(config)
    }

    /// Load from an explicit path; a missing file yields defaults.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    fn base_url(&self, scheme: &str, path: &str) -> crate::Result<Url> {
        let raw = format!("{scheme}://{}:{}{path}", self.host, self.port);
        Url::parse(&raw).map_err(|e| crate::Error::Config(format!("invalid backend URL {raw}: {e}")))
    }

    /// WebSocket endpoint for the interactive binding.
    pub fn ws_endpoint(&self) -> crate::Result<Url> {
        let scheme = if self.secure { "wss" } else { "ws" };
        self.base_url(scheme, WS_PATH)
    }

    /// Full URL of the REST run endpoint.
    pub fn run_url(&self) -> crate::Result<Url> {
        let scheme = if self.secure { "https" } else { "http" };
        self.base_url(scheme, RUN_PATH)
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    #[must_use]
    pub fn code_timeout(&self) -> Option<Duration> {
        self.code_timeout_secs.map(Duration::from_secs)
    }

    /// Read a key by its TOML name, for `config get`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        let value = match key {
            "host" => self.host.clone(),
            "port" => self.port.to_string(),
            "secure" => self.secure.to_string(),
            "transport" => self.transport.id().to_string(),
            "connect_timeout_secs" => self.connect_timeout_secs.to_string(),
            "request_timeout_secs" => self.request_timeout_secs.to_string(),
            "code_timeout_secs" => self
                .code_timeout_secs
                .map_or_else(|| "(not set)".to_string(), |s| s.to_string()),
            "on_code_abort" => self.on_code_abort.id().to_string(),
            "code_prompt" => self.code_prompt.clone(),
            _ => return None,
        };
        Some(value)
    }

    /// Set a key by its TOML name, for `config set`.
    pub fn set(&mut self, key: &str, value: &str) -> crate::Result<()> {
        let invalid = |what: &str| crate::Error::Config(format!("invalid {what}: {value}"));
        match key {
            "host" => self.host = value.to_string(),
            "port" => self.port = value.parse().map_err(|_| invalid("port"))?,
            "secure" => self.secure = value.parse().map_err(|_| invalid("boolean"))?,
            "transport" => {
                self.transport = TransportKind::from_id(value).ok_or_else(|| invalid("transport"))?;
            }
            "connect_timeout_secs" => {
                self.connect_timeout_secs = value.parse().map_err(|_| invalid("timeout"))?;
            }
            "request_timeout_secs" => {
                self.request_timeout_secs = value.parse().map_err(|_| invalid("timeout"))?;
            }
            "code_timeout_secs" => {
                self.code_timeout_secs = match value {
                    "" | "none" | "off" => None,
                    v => Some(v.parse().map_err(|_| invalid("timeout"))?),
                };
            }
            "on_code_abort" => {
                self.on_code_abort = AbortPolicy::from_id(value).ok_or_else(|| invalid("policy"))?;
            }
            "code_prompt" => self.code_prompt = value.to_string(),
            _ => return Err(crate::Error::Config(format!("unknown key: {key}"))),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.port, 8000);
        assert_eq!(config.transport, TransportKind::Interactive);
        assert_eq!(config.on_code_abort, AbortPolicy::Close);
        assert!(config.code_timeout().is_none());
    }

    #[test]
    fn test_endpoints() {
        let config = Config {
            host: "10.0.0.5".into(),
            ..Config::default()
        };
        assert_eq!(
            config.ws_endpoint().unwrap().as_str(),
            "ws://10.0.0.5:8000/ws/start_instance"
        );
        assert_eq!(config.run_url().unwrap().as_str(), "http://10.0.0.5:8000/run");
    }

    #[test]
    fn test_secure_endpoints() {
        let config = Config {
            host: "backend.example".into(),
            port: 443,
            secure: true,
            ..Config::default()
        };
        assert_eq!(
            config.ws_endpoint().unwrap().as_str(),
            "wss://backend.example/ws/start_instance"
        );
        assert_eq!(config.run_url().unwrap().as_str(), "https://backend.example/run");
    }

    #[test]
    fn test_invalid_host() {
        let config = Config {
            host: "bad host".into(),
            ..Config::default()
        };
        assert!(matches!(config.ws_endpoint(), Err(crate::Error::Config(_))));
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_from(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config.host, "localhost");
    }

    #[test]
    fn test_partial_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "host = \"automation.local\"\ntransport = \"rest\"\ncode_timeout_secs = 90\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.host, "automation.local");
        assert_eq!(config.transport, TransportKind::Rest);
        assert_eq!(config.code_timeout(), Some(Duration::from_secs(90)));
        assert_eq!(config.port, 8000);
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.set("on_code_abort", "wait").unwrap();
        config.set("port", "9000").unwrap();
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.on_code_abort, AbortPolicy::Wait);
        assert_eq!(loaded.port, 9000);
    }

    #[test]
    fn test_get_and_set() {
        let mut config = Config::default();
        config.set("transport", "ws").unwrap();
        assert_eq!(config.get("transport").as_deref(), Some("interactive"));
        config.set("code_timeout_secs", "30").unwrap();
        assert_eq!(config.get("code_timeout_secs").as_deref(), Some("30"));
        config.set("code_timeout_secs", "none").unwrap();
        assert!(config.code_timeout_secs.is_none());

        assert!(config.set("port", "eighty").is_err());
        assert!(config.set("color", "blue").is_err());
        assert!(config.get("color").is_none());
    }
}

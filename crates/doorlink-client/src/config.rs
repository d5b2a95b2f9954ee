//! Client configuration.
//!
//! All settings live in a single `config.toml` file at
//! `~/.config/doorlink/config.toml` by default. Every section is optional.
//!
//! ```toml
//! [device]
//! url = "ws://192.168.4.1:8080/ws"
//! token = "..."
//!
//! [reconnect]
//! max_attempts = 10
//!
//! [audio]
//! chunk_samples = 4800
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use doorlink_core::DEFAULT_MAX_RECORDS;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::audio::{DEFAULT_CHUNK_SAMPLES, PcmChunker, SAMPLE_RATE};
use crate::error::{ClientError, ClientResult};
use crate::reconnect::ReconnectPolicy;

/// Configuration for the doorlink client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Debug mode.
    pub debug: bool,

    #[serde(default)]
    pub device: DeviceSettings,

    #[serde(default)]
    pub reconnect: ReconnectSettings,

    #[serde(default)]
    pub audio: AudioSettings,

    #[serde(default)]
    pub history: HistorySettings,
}

/// Where and how to reach the lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    /// WebSocket endpoint (`ws://` or `wss://`).
    pub url: String,

    /// Auth token, sent as the `token` query parameter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Handshake timeout in seconds.
    pub connect_timeout: u64,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            url: "ws://192.168.4.1:8080/ws".to_string(),
            token: None,
            connect_timeout: 10,
        }
    }
}

/// Backoff between reconnect attempts of long-running commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSettings {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// `0` retries forever.
    pub max_attempts: u32,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            max_attempts: 0,
        }
    }
}

/// Outgoing audio for `doorlink speak`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    /// Rate of the input samples, in Hz. Chunks are paced at this rate.
    pub sample_rate: u32,
    /// Samples per binary frame.
    pub chunk_samples: usize,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            chunk_samples: DEFAULT_CHUNK_SAMPLES,
        }
    }
}

impl AudioSettings {
    pub fn chunker(&self) -> PcmChunker {
        PcmChunker::new(self.chunk_samples)
    }

    /// Playback time of one full chunk.
    pub fn chunk_duration(&self) -> Duration {
        Duration::from_secs_f64(self.chunk_samples.max(1) as f64 / self.sample_rate.max(1) as f64)
    }
}

/// Local store for visitor-intent and package-alert pushes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistorySettings {
    /// JSON file; defaults to `history.json` in the data directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Records kept per kind.
    pub max_records: usize,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            path: None,
            max_records: DEFAULT_MAX_RECORDS,
        }
    }
}

impl ClientConfig {
    /// Loads configuration from the default path.
    ///
    /// A missing file yields the defaults; an unreadable or invalid one is an
    /// error.
    pub fn load() -> ClientResult<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> ClientResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ClientError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        toml::from_str(&content).map_err(|e| {
            ClientError::Config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        Self::default_config_dir().join("config.toml")
    }

    /// Returns the default configuration directory.
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("doorlink")
    }

    /// Returns the default data directory path.
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("doorlink")
    }

    /// The URL to connect to, with the token appended.
    pub fn endpoint(&self) -> ClientResult<Url> {
        let mut url = Url::parse(&self.device.url).map_err(|e| {
            ClientError::Config(format!("invalid device url {:?}: {}", self.device.url, e))
        })?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ClientError::Config(format!(
                "device url must use ws:// or wss://, got {}://",
                url.scheme()
            )));
        }
        if let Some(token) = self.device.token.as_deref().filter(|t| !t.is_empty()) {
            url.query_pairs_mut().append_pair("token", token);
        }
        Ok(url)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.device.connect_timeout.max(1))
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::default()
            .with_backoff(
                Duration::from_millis(self.reconnect.initial_delay_ms),
                Duration::from_millis(self.reconnect.max_delay_ms),
                self.reconnect.multiplier,
            )
            .with_max_attempts(self.reconnect.max_attempts)
    }

    /// The history file, configured or default.
    pub fn history_path(&self) -> PathBuf {
        self.history
            .path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join("history.json"))
    }

    /// Checks values that parse but cannot work.
    pub fn validate(&self) -> ClientResult<()> {
        self.endpoint()?;
        if self.reconnect.multiplier < 1.0 {
            return Err(ClientError::Config(
                "reconnect.multiplier must be at least 1.0".to_string(),
            ));
        }
        if self.reconnect.initial_delay_ms > self.reconnect.max_delay_ms {
            return Err(ClientError::Config(
                "reconnect.initial_delay_ms must not exceed reconnect.max_delay_ms".to_string(),
            ));
        }
        if self.audio.sample_rate == 0 {
            return Err(ClientError::Config("audio.sample_rate must be positive".to_string()));
        }
        if self.audio.chunk_samples == 0 {
            return Err(ClientError::Config("audio.chunk_samples must be positive".to_string()));
        }
        if self.history.max_records == 0 {
            return Err(ClientError::Config("history.max_records must be positive".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.device.url, "ws://192.168.4.1:8080/ws");
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.audio.sample_rate, 24_000);
        assert_eq!(config.history.max_records, 200);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: ClientConfig = toml::from_str(
            r#"
debug = true

[device]
url = "wss://lock.local/ws"

[reconnect]
max_attempts = 5
"#,
        )
        .unwrap();
        assert!(config.debug);
        assert_eq!(config.device.connect_timeout, 10);
        assert_eq!(config.reconnect.max_attempts, 5);
        assert_eq!(config.reconnect.initial_delay_ms, 1_000);

        let policy = config.reconnect_policy();
        assert_eq!(policy.initial_delay, Duration::from_secs(1));
        assert!(!policy.should_retry(5));
    }

    #[test]
    fn endpoint_appends_token() {
        let mut config = ClientConfig::default();
        config.device.token = Some("s3cret".to_string());
        let url = config.endpoint().unwrap();
        assert_eq!(url.as_str(), "ws://192.168.4.1:8080/ws?token=s3cret");

        config.device.token = Some(String::new());
        assert_eq!(config.endpoint().unwrap().query(), None);
    }

    #[test]
    fn endpoint_rejects_other_schemes() {
        let mut config = ClientConfig::default();
        config.device.url = "http://192.168.4.1/ws".to_string();
        assert!(matches!(config.endpoint(), Err(ClientError::Config(_))));

        config.device.url = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_backoff() {
        let mut config = ClientConfig::default();
        config.reconnect.multiplier = 0.5;
        assert!(config.validate().is_err());

        let mut config = ClientConfig::default();
        config.reconnect.initial_delay_ms = 60_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn audio_section_drives_chunking() {
        let config: ClientConfig = toml::from_str(
            r#"
[audio]
sample_rate = 16000
chunk_samples = 320
"#,
        )
        .unwrap();
        assert_eq!(config.audio.chunker().chunk_samples(), 320);
        assert_eq!(config.audio.chunk_duration(), Duration::from_millis(20));
        assert_eq!(
            ClientConfig::default().audio.chunk_duration(),
            Duration::from_millis(100)
        );

        let mut config = ClientConfig::default();
        config.audio.sample_rate = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[history]\nmax_records = 7\n").unwrap();

        let config = ClientConfig::load_from(&path).unwrap();
        assert_eq!(config.history.max_records, 7);
        assert!(config.history_path().ends_with("doorlink/history.json"));

        std::fs::write(&path, "[history\n").unwrap();
        assert!(ClientConfig::load_from(&path).is_err());
        assert!(ClientConfig::load_from(&dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn dump_roundtrips() {
        let mut config = ClientConfig::default();
        config.device.token = Some("t".to_string());
        let dumped = toml::to_string_pretty(&config).unwrap();
        let parsed: ClientConfig = toml::from_str(&dumped).unwrap();
        assert_eq!(parsed, config);
    }
}

//! Configuration system for the overlay daemon.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $OVERLAY_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/overlay/config.toml
//!   3. ~/.config/overlay/config.toml

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::wire::{INTRODUCTION_TIMEOUT_SECS, WALK_INTERVAL_MS};

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    pub network: NetworkConfig,
    pub logging: LoggingConfig,
    pub keys: Vec<KeyConfig>,
    pub overlays: Vec<OverlaySettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Local address to bind the UDP endpoint to.
    pub address: String,
    /// UDP port. 0 = OS-assigned.
    pub port: u16,
    /// How often every overlay's task scheduler is polled, in milliseconds.
    pub walker_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// tracing filter used when RUST_LOG is not set.
    pub filter: String,
}

/// One identity. Overlays refer to keys by alias.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyConfig {
    pub alias: String,
    /// Hex-encoded private key file. Generated on first run. Empty = ephemeral.
    #[serde(default)]
    pub file: PathBuf,
}

/// One community instance to launch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlaySettings {
    /// Descriptor name, e.g. "LamportCommunity".
    pub class: String,
    /// Alias of the key this overlay signs with.
    pub key: String,
    /// Addresses contacted when the peer table is empty.
    #[serde(default)]
    pub bootstrap: Vec<String>,
    /// Names of start actions the descriptor should run once the loop is up.
    #[serde(default)]
    pub on_start: Vec<String>,
    #[serde(default)]
    pub walkers: Vec<WalkerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WalkerConfig {
    /// Strategy name: "RandomWalk" or "RandomChurn".
    pub strategy: String,
    /// Stop walking once this many peers are known. -1 = never stop.
    pub target_peers: i64,
    /// Seconds an introduction request may stay unanswered.
    pub timeout_secs: f64,
    /// Maximum number of outstanding introduction requests.
    pub window_size: usize,
    /// Unanswered requests before a known peer is dropped.
    pub max_failures: u32,
    /// RandomChurn: peers inspected per step.
    pub sample_size: usize,
    /// RandomChurn: silence after which a peer is contacted again.
    pub inactive_secs: f64,
    /// RandomChurn: silence after which a peer is dropped.
    pub drop_secs: f64,
    /// RandomChurn: minimum spacing of requests to the same peer.
    pub ping_interval_secs: f64,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            logging: LoggingConfig::default(),
            keys: vec![KeyConfig {
                alias: "anonymous id".to_string(),
                file: data_dir().join("ec.key"),
            }],
            overlays: vec![OverlaySettings {
                class: "LamportCommunity".to_string(),
                key: "anonymous id".to_string(),
                bootstrap: Vec::new(),
                on_start: Vec::new(),
                walkers: vec![WalkerConfig::default()],
            }],
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 8090,
            walker_interval_ms: WALK_INTERVAL_MS,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl Default for WalkerConfig {
    fn default() -> Self {
        Self {
            strategy: "RandomWalk".to_string(),
            target_peers: 20,
            timeout_secs: INTRODUCTION_TIMEOUT_SECS as f64,
            window_size: 5,
            max_failures: 3,
            sample_size: 8,
            inactive_secs: 27.5,
            drop_secs: 57.5,
            ping_interval_secs: 10.0,
        }
    }
}

impl NetworkConfig {
    pub fn walker_interval(&self) -> Duration {
        Duration::from_millis(self.walker_interval_ms.max(1))
    }
}

impl WalkerConfig {
    /// `None` when the walker should never stop.
    pub fn target(&self) -> Option<usize> {
        usize::try_from(self.target_peers).ok()
    }

    pub fn timeout(&self) -> Duration {
        secs_or(self.timeout_secs, Duration::from_secs(INTRODUCTION_TIMEOUT_SECS))
    }

    pub fn inactive_time(&self) -> Duration {
        secs_or(self.inactive_secs, Duration::from_millis(27_500))
    }

    pub fn drop_time(&self) -> Duration {
        secs_or(self.drop_secs, Duration::from_millis(57_500))
    }

    pub fn ping_interval(&self) -> Duration {
        secs_or(self.ping_interval_secs, Duration::from_secs(10))
    }
}

/// Seconds from the config file. Negative, NaN or overflowing values fall back.
fn secs_or(secs: f64, fallback: Duration) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(fallback)
}

impl OverlaySettings {
    /// Parse the bootstrap list.
    pub fn bootstrap_addrs(&self) -> Result<Vec<SocketAddr>, ConfigError> {
        self.bootstrap
            .iter()
            .map(|s| {
                s.parse()
                    .map_err(|_| ConfigError::Invalid(format!("bad bootstrap address '{s}'")))
            })
            .collect()
    }
}

// ── Path helpers ─────────────────────────────────────────────────────────────

pub fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("overlay")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("overlay")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ── Loading ──────────────────────────────────────────────────────────────────

impl OverlayConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::file_path())?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Read `path` if it exists, defaults otherwise. No env overrides.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
        } else {
            Ok(OverlayConfig::default())
        }
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("OVERLAY_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        Self::write_default_to(&path)?;
        Ok(path)
    }

    fn write_default_to(path: &Path) -> Result<(), ConfigError> {
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
            }
            let text = toml::to_string_pretty(&OverlayConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(path, text)
                .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        }
        Ok(())
    }

    /// Cross-field checks: every overlay names a configured key, and every
    /// bootstrap address parses.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for overlay in &self.overlays {
            if !self.keys.iter().any(|k| k.alias == overlay.key) {
                return Err(ConfigError::Invalid(format!(
                    "overlay {} uses unknown key alias '{}'",
                    overlay.class, overlay.key
                )));
            }
            overlay.bootstrap_addrs()?;
        }
        Ok(())
    }

    /// Apply OVERLAY_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("OVERLAY_NETWORK__ADDRESS") {
            self.network.address = v;
        }
        if let Ok(v) = std::env::var("OVERLAY_NETWORK__PORT") {
            if let Ok(p) = v.parse() {
                self.network.port = p;
            }
        }
        if let Ok(v) = std::env::var("OVERLAY_NETWORK__WALKER_INTERVAL_MS") {
            if let Ok(ms) = v.parse() {
                self.network.walker_interval_ms = ms;
            }
        }
        if let Ok(v) = std::env::var("OVERLAY_LOGGING__FILTER") {
            self.logging.filter = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_runs_lamport_with_random_walk() {
        let config = OverlayConfig::default();
        assert_eq!(config.overlays.len(), 1);
        assert_eq!(config.overlays[0].class, "LamportCommunity");
        assert_eq!(config.overlays[0].walkers[0].strategy, "RandomWalk");
        assert_eq!(config.overlays[0].walkers[0].target(), Some(20));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn negative_target_means_unbounded() {
        let walker = WalkerConfig {
            target_peers: -1,
            ..WalkerConfig::default()
        };
        assert_eq!(walker.target(), None);
    }

    #[test]
    fn parses_toml() {
        let text = r#"
            [network]
            port = 9100

            [[keys]]
            alias = "main"

            [[overlays]]
            class = "LamportCommunity"
            key = "main"
            bootstrap = ["127.0.0.1:9101"]

            [[overlays.walkers]]
            target_peers = 2
            timeout_secs = 3.0
        "#;
        let config: OverlayConfig = toml::from_str(text).unwrap();
        assert_eq!(config.network.port, 9100);
        assert_eq!(config.network.address, "0.0.0.0");
        assert_eq!(config.keys[0].file, PathBuf::new());
        let overlay = &config.overlays[0];
        assert_eq!(
            overlay.bootstrap_addrs().unwrap(),
            vec!["127.0.0.1:9101".parse::<SocketAddr>().unwrap()]
        );
        assert_eq!(overlay.walkers[0].target(), Some(2));
        assert_eq!(overlay.walkers[0].timeout(), Duration::from_secs(3));
        assert_eq!(overlay.walkers[0].window_size, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn churn_walker_timings_parse_and_fall_back() {
        let text = r#"
            [[overlays]]
            class = "LamportCommunity"
            key = "anonymous id"

            [[overlays.walkers]]
            strategy = "RandomChurn"
            inactive_secs = 5.0
            drop_secs = nan
        "#;
        let config: OverlayConfig = toml::from_str(text).unwrap();
        let walker = &config.overlays[0].walkers[0];
        assert_eq!(walker.strategy, "RandomChurn");
        assert_eq!(walker.sample_size, 8);
        assert_eq!(walker.inactive_time(), Duration::from_secs(5));
        assert_eq!(walker.drop_time(), Duration::from_millis(57_500));
        assert_eq!(walker.ping_interval(), Duration::from_secs(10));
    }

    #[test]
    fn unknown_key_alias_is_invalid() {
        let mut config = OverlayConfig::default();
        config.overlays[0].key = "missing".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn bad_bootstrap_is_invalid() {
        let mut config = OverlayConfig::default();
        config.overlays[0].bootstrap = vec!["not an address".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn write_default_creates_loadable_file() {
        let tmp = std::env::temp_dir().join(format!("overlay-config-test-{}", std::process::id()));
        let path = tmp.join("config.toml");

        OverlayConfig::write_default_to(&path).expect("write default failed");
        assert!(path.exists());

        let config = OverlayConfig::load_from(&path).expect("load should succeed");
        assert_eq!(config.network.port, 8090);
        assert_eq!(config.overlays[0].class, "LamportCommunity");

        let _ = std::fs::remove_dir_all(&tmp);
    }
}

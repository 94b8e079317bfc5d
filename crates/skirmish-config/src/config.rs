//! Configuration structs with sensible defaults and RON persistence.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level node configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Transport and match roster settings.
    pub network: NetworkConfig,
    /// Lockstep pacing and verification settings.
    pub lockstep: LockstepConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// One remote participant of the match.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerConfig {
    /// Faction handle the peer plays.
    pub faction: u8,
    /// `host:port` the peer listens on.
    pub address: String,
}

impl PeerConfig {
    /// Parse the configured address.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        parse_addr(&self.address)
    }
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Local interface to bind.
    pub bind_address: String,
    /// Local UDP port.
    pub port: u16,
    /// Faction played by this host.
    pub local_faction: u8,
    /// Remote participants.
    pub peers: Vec<PeerConfig>,
    /// Delay before an unacknowledged datagram is sent again.
    pub resend_interval_ms: u64,
    /// Idle time after which a heartbeat is sent to a peer.
    pub heartbeat_interval_ms: u64,
    /// Silence after which a peer is declared unreachable.
    pub peer_timeout_ms: u64,
    /// Packets at least this large are LZ4-compressed.
    pub compression_threshold: usize,
    /// Socket receive buffer size in bytes (0 keeps the OS default).
    pub recv_buffer_size: usize,
}

impl NetworkConfig {
    /// The address the local socket binds to.
    pub fn bind_socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        parse_addr(&format!("{}:{}", self.bind_address, self.port))
    }
}

/// Lockstep scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LockstepConfig {
    /// Simulation ticks per second driven by the game loop.
    pub tick_rate: u32,
    /// Initial and minimum number of ticks per command frame.
    pub default_ticks_per_frame: u32,
    /// Hard ceiling for the adaptive pacing target.
    pub max_ticks_per_frame: u32,
    /// Total ticks of frame history kept by the pacing model.
    pub pacing_window_ticks: u32,
    /// Force-forfeit peers that keep the match stalled this many ticks.
    /// `None` waits for the transport timeout.
    pub stall_forfeit_ticks: Option<u32>,
    /// Exchange and compare world checksums with every completion report.
    pub verify_checksums: bool,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
    /// Directory for JSON log files in debug builds.
    pub log_dir: Option<PathBuf>,
}

// --- Default implementations ---

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 41_234,
            local_faction: 1,
            peers: Vec::new(),
            resend_interval_ms: 100,
            heartbeat_interval_ms: 500,
            peer_timeout_ms: 10_000,
            compression_threshold: 256,
            recv_buffer_size: 0,
        }
    }
}

impl Default for LockstepConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60,
            default_ticks_per_frame: 6,
            max_ticks_per_frame: 30,
            pacing_window_ticks: 180,
            stall_forfeit_ticks: None,
            verify_checksums: cfg!(debug_assertions),
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: None,
        }
    }
}

fn parse_addr(address: &str) -> Result<SocketAddr, ConfigError> {
    address
        .parse()
        .map_err(|source| ConfigError::InvalidAddress {
            address: address.to_string(),
            source,
        })
}

/// Platform configuration directory for Skirmish (`<config>/skirmish`).
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("skirmish"))
}

// --- Load / Save / Reload ---

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join("config.ron");

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
            let config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let config_path = config_dir.join("config.ron");
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);

        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(&config_path, serialized).map_err(ConfigError::WriteError)?;
        Ok(())
    }

    /// Hot-reload: returns `Some(new_config)` if the file changed, `None` otherwise.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let config_path = config_dir.join("config.ron");
        let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
        let new_config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;

        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_serializes() {
        let config = Config::default();
        let ron_str =
            ron::ser::to_string_pretty(&config, ron::ser::PrettyConfig::new().depth_limit(3))
                .unwrap();
        assert!(ron_str.contains("default_ticks_per_frame: 6"));
        assert!(ron_str.contains("port: 41234"));
    }

    #[test]
    fn test_config_roundtrip() {
        let mut config = Config::default();
        config.network.peers.push(PeerConfig {
            faction: 2,
            address: "10.0.0.2:41234".to_string(),
        });
        config.lockstep.stall_forfeit_ticks = Some(600);
        let ron_str = ron::to_string(&config).unwrap();
        let deserialized: Config = ron::from_str(&ron_str).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_missing_section_uses_default() {
        let ron_str = "(network: (port: 5000))";
        let config: Config = ron::from_str(ron_str).unwrap();
        assert_eq!(config.network.port, 5000);
        assert_eq!(config.network.peer_timeout_ms, 10_000);
        assert_eq!(config.lockstep, LockstepConfig::default());
    }

    #[test]
    fn test_extra_field_ignored() {
        let result: Result<Config, _> = ron::from_str("(future_setting: true)");
        assert!(result.is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.network.local_faction = 3;
        config.lockstep.max_ticks_per_frame = 45;

        config.save(dir.path()).unwrap();
        let loaded = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_load_or_create_writes_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, Config::default());
        assert!(dir.path().join("config.ron").exists());
    }

    #[test]
    fn test_reload_detects_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        config.save(dir.path()).unwrap();

        let mut modified = config.clone();
        modified.lockstep.default_ticks_per_frame = 8;
        modified.save(dir.path()).unwrap();

        let result = config.reload(dir.path()).unwrap();
        assert_eq!(result.unwrap().lockstep.default_ticks_per_frame, 8);
    }

    #[test]
    fn test_reload_no_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        config.save(dir.path()).unwrap();
        assert!(config.reload(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_bind_addr_parses() {
        let config = NetworkConfig::default();
        let addr = config.bind_socket_addr().unwrap();
        assert_eq!(addr.port(), 41_234);
    }

    #[test]
    fn test_bad_peer_address_rejected() {
        let peer = PeerConfig {
            faction: 2,
            address: "not-an-address".to_string(),
        };
        assert!(matches!(
            peer.socket_addr(),
            Err(ConfigError::InvalidAddress { .. })
        ));
    }
}

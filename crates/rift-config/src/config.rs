//! Configuration structs with sensible defaults and RON persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Network/session settings.
    pub network: NetworkConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Network and session configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Server address for client sessions.
    pub server_address: String,
    /// Stream listener port (0 = ephemeral).
    pub tcp_port: u16,
    /// Datagram socket port (0 = ephemeral).
    pub udp_port: u16,
    /// Maximum concurrent players on a hosted server.
    pub max_players: u32,
    /// Snapshot broadcast rate in Hz.
    pub snapshot_rate: u32,
    /// Host: bind every interface instead of loopback only.
    pub bind_all_interfaces: bool,
    /// Host: attempt automatic port forwarding on start.
    pub use_upnp: bool,
    /// Name sent in the connection request.
    pub player_name: String,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g. "debug", "info", "warn").
    pub log_level: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            server_address: "127.0.0.1".to_string(),
            tcp_port: 7777,
            udp_port: 0,
            max_players: 16,
            snapshot_rate: 20,
            bind_all_interfaces: false,
            use_upnp: false,
            player_name: "player".to_string(),
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// The per-user configuration directory for this game.
pub fn default_config_dir() -> Result<PathBuf, ConfigError> {
    dirs::config_dir()
        .map(|base| base.join("rift"))
        .ok_or(ConfigError::NoConfigDir)
}

// --- Load / Save / Reload ---

impl Config {
    /// Loads config from `config_dir`, or writes a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join("config.ron");

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::Read)?;
            let config: Config = ron::from_str(&contents).map_err(ConfigError::Parse)?;
            log::info!("loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Saves config to `config_dir` as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::Write)?;

        let config_path = config_dir.join("config.ron");
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true);

        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::Serialize)?;

        std::fs::write(&config_path, serialized).map_err(ConfigError::Write)?;
        Ok(())
    }

    /// Hot-reload: returns `Some(new_config)` if the file differs from
    /// `self`, `None` otherwise.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let config_path = config_dir.join("config.ron");
        let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::Read)?;
        let new_config: Config = ron::from_str(&contents).map_err(ConfigError::Parse)?;

        if &new_config != self {
            log::info!("config reloaded with changes");
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
    fn test_defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.network.tcp_port, 7777);
        assert_eq!(config.network.udp_port, 0);
        assert_eq!(config.network.snapshot_rate, 20);
        assert!(!config.network.use_upnp);
        assert_eq!(config.debug.log_level, "info");
    }

    #[test]
    fn test_save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.network.max_players = 4;
        config.network.player_name = "mira".to_string();
        config.save(dir.path()).unwrap();

        let loaded = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, Config::default());
        assert!(dir.path().join("config.ron").exists());
    }

    #[test]
    fn test_missing_fields_fall_back_to_defaults() {
        // A config written by an older build that predates most fields.
        let partial = r#"(network: (tcp_port: 9000))"#;
        let config: Config = ron::from_str(partial).unwrap();
        assert_eq!(config.network.tcp_port, 9000);
        assert_eq!(config.network.max_players, 16);
        assert_eq!(config.debug, DebugConfig::default());
    }

    #[test]
    fn test_reload_detects_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_create(dir.path()).unwrap();
        assert!(config.reload(dir.path()).unwrap().is_none());

        let mut changed = config.clone();
        changed.network.tcp_port = 4242;
        changed.save(dir.path()).unwrap();
        let reloaded = config.reload(dir.path()).unwrap().unwrap();
        assert_eq!(reloaded.network.tcp_port, 4242);
    }
}

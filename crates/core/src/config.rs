//! Runtime configuration
//!
//! Loaded from an optional TOML file. Every field has a default, so an
//! empty file (or no file) is a valid configuration.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::phase::{LateJoin, DEFAULT_INTRO_DURATION};

/// Default TCP port of a hub
pub const DEFAULT_HUB_PORT: u16 = 7341;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset
    pub log_filter: String,
    pub session: SessionConfig,
    pub hub: HubConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: "info".to_string(),
            session: SessionConfig::default(),
            hub: HubConfig::default(),
        }
    }
}

/// Per-client session behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub intro_duration_ms: u64,
    pub late_join: LateJoin,
    /// Only flip the room if it is still waiting when the write lands
    pub guarded_start: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            intro_duration_ms: DEFAULT_INTRO_DURATION.as_millis() as u64,
            late_join: LateJoin::Replay,
            guarded_start: false,
        }
    }
}

impl SessionConfig {
    pub fn intro_duration(&self) -> Duration {
        Duration::from_millis(self.intro_duration_ms)
    }
}

/// Hub server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub bind: SocketAddr,
    /// SQLite file; defaults to the platform data directory
    pub database: Option<PathBuf>,
    pub max_connections: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], DEFAULT_HUB_PORT)),
            database: None,
            max_connections: 256,
        }
    }
}

impl HubConfig {
    /// Resolve the database path, falling back to the data directory
    pub fn database_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.database {
            return Ok(path.clone());
        }

        let dirs = ProjectDirs::from("dev", "onyx", "huddle").ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "Could not determine data directory",
            ))
        })?;

        Ok(dirs.data_dir().join("huddle.db"))
    }
}

impl Config {
    /// Per-user config file location (`huddle.toml` in the config directory)
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("dev", "onyx", "huddle").map(|dirs| dirs.config_dir().join("huddle.toml"))
    }

    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.session.intro_duration_ms == 0 {
            return Err(Error::Config(
                "session.intro_duration_ms must be positive".into(),
            ));
        }
        if self.hub.max_connections == 0 {
            return Err(Error::Config("hub.max_connections must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.session.intro_duration(), Duration::from_secs(5));
        assert_eq!(config.session.late_join, LateJoin::Replay);
        assert!(!config.session.guarded_start);
        assert_eq!(config.hub.bind.port(), DEFAULT_HUB_PORT);
        assert_eq!(config.log_filter, "info");
    }

    #[test]
    fn test_partial_config() {
        let config = Config::from_toml_str(
            r#"
            log_filter = "huddle=debug"

            [session]
            intro_duration_ms = 1500
            late_join = "resume"
            guarded_start = true

            [hub]
            bind = "0.0.0.0:9000"
            database = "/tmp/rooms.db"
            "#,
        )
        .unwrap();

        assert_eq!(config.session.intro_duration(), Duration::from_millis(1500));
        assert_eq!(config.session.late_join, LateJoin::Resume);
        assert!(config.session.guarded_start);
        assert_eq!(config.hub.bind.port(), 9000);
        assert_eq!(
            config.hub.database_path().unwrap(),
            PathBuf::from("/tmp/rooms.db")
        );
        assert_eq!(config.hub.max_connections, 256);
    }

    #[test]
    fn test_zero_intro_rejected() {
        let result = Config::from_toml_str("[session]\nintro_duration_ms = 0\n");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_unknown_late_join_rejected() {
        let result = Config::from_toml_str("[session]\nlate_join = \"skip\"\n");
        assert!(matches!(result, Err(Error::Toml(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huddle.toml");
        std::fs::write(&path, "[hub]\nmax_connections = 8\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.hub.max_connections, 8);
    }
}

//! Configuration file support.
//!
//! A single TOML file holds optional `[server]` and `[client]` tables.
//! Default location: `~/.config/serversync/config.toml`.

use crate::error::{Result, SyncError};
use crate::index::validate_relative_path;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default TCP port
pub const DEFAULT_PORT: u16 = 38067;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub client: ClientConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to accept sessions on
    pub listen: String,
    /// Directory the managed directories live in
    pub root: PathBuf,
    /// Managed directories, relative to `root`
    pub directories: Vec<String>,
    /// Deadline while waiting for the next command
    pub idle_timeout_secs: u64,
    /// Deadline while a file is being streamed
    pub transfer_timeout_secs: u64,
    /// Concurrent sessions; further connections are refused
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: format!("0.0.0.0:{DEFAULT_PORT}"),
            root: PathBuf::from("."),
            directories: vec!["mods".to_string(), "config".to_string()],
            idle_timeout_secs: 10,
            transfer_timeout_secs: 300,
            max_connections: 64,
        }
    }
}

impl ServerConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.idle_timeout_secs == 0 || self.transfer_timeout_secs == 0 {
            return Err(SyncError::Config(
                "Timeouts must be at least one second".to_string(),
            ));
        }
        if self.max_connections == 0 {
            return Err(SyncError::Config(
                "max_connections must be at least 1".to_string(),
            ));
        }
        for dir in &self.directories {
            validate_relative_path(dir)
                .map_err(|e| SyncError::Config(format!("Managed directory {dir:?}: {e}")))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// `host:port` of the server
    pub server: String,
    /// Directory the managed directories are mirrored into
    pub root: PathBuf,
    /// Globs protecting client files from deletion
    pub ignore: Vec<String>,
    pub connect_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: format!("127.0.0.1:{DEFAULT_PORT}"),
            root: PathBuf::from("."),
            ignore: Vec::new(),
            connect_timeout_secs: 5,
        }
    }
}

impl ClientConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout_secs == 0 {
            return Err(SyncError::Config(
                "connect_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.server.is_empty() {
            return Err(SyncError::Config("Server address is empty".to_string()));
        }
        Ok(())
    }
}

impl Config {
    /// Default config path (`~/.config/serversync/config.toml`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("serversync").join("config.toml"))
    }

    /// Load from an explicit path; the file must exist.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            SyncError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
            .map_err(|e| SyncError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Load from the default location, falling back to defaults if absent.
    pub fn load_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| SyncError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.server, ServerConfig::default());
        assert_eq!(config.client, ClientConfig::default());
        assert_eq!(config.server.idle_timeout(), Duration::from_secs(10));
        assert_eq!(config.server.transfer_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn test_partial_tables() {
        let config = Config::parse(
            r#"
            [server]
            listen = "127.0.0.1:4000"
            directories = ["mods", "resourcepacks"]

            [client]
            server = "play.example.com:4000"
            ignore = ["mods/optifine*.jar"]
            "#,
        )
        .unwrap();

        assert_eq!(config.server.listen, "127.0.0.1:4000");
        assert_eq!(config.server.directories, vec!["mods", "resourcepacks"]);
        assert_eq!(config.server.idle_timeout_secs, 10);
        assert_eq!(config.client.server, "play.example.com:4000");
        assert_eq!(config.client.ignore, vec!["mods/optifine*.jar"]);
        assert_eq!(config.client.connect_timeout_secs, 5);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut server = ServerConfig::default();
        assert!(server.validate().is_ok());

        server.idle_timeout_secs = 0;
        assert!(matches!(server.validate(), Err(SyncError::Config(_))));

        server.idle_timeout_secs = 10;
        server.directories = vec!["../etc".to_string()];
        assert!(matches!(server.validate(), Err(SyncError::Config(_))));

        let client = ClientConfig {
            connect_timeout_secs: 0,
            ..Default::default()
        };
        assert!(client.validate().is_err());
    }

    #[test]
    fn test_load_reports_path() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        fs::write(&path, "[server]\nidle_timeout_secs = \"soon\"\n").unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("config.toml"));

        assert!(Config::load(&tmp.path().join("missing.toml")).is_err());
    }
}

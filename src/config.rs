//! Configuration for the taskpad server

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub local: LocalConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Remote store backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// When false every session runs on a temporary identity
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Path to the SQLite database file
    #[serde(default = "default_remote_path")]
    pub path: PathBuf,

    /// Whether sessions may start without an account
    #[serde(default = "default_true")]
    pub allow_anonymous: bool,
}

/// On-device key-value store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    #[serde(default = "default_local_path")]
    pub path: PathBuf,
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3040
}

fn default_true() -> bool {
    true
}

fn default_remote_path() -> PathBuf {
    PathBuf::from("taskpad-remote.sqlite")
}

fn default_local_path() -> PathBuf {
    PathBuf::from("taskpad-local.json")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_remote_path(),
            allow_anonymous: true,
        }
    }
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            path: default_local_path(),
        }
    }
}

impl Config {
    /// Default config path
    pub fn default_path() -> Result<PathBuf> {
        if let Ok(env_path) = std::env::var("TASKPAD_CONFIG") {
            return Ok(PathBuf::from(env_path));
        }

        let local = PathBuf::from("config.toml");
        if local.exists() {
            return Ok(local);
        }

        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("taskpad");

        Ok(config_dir.join("config.toml"))
    }

    /// Load config from the default path, or defaults if there is none
    pub fn load() -> Result<Self> {
        let path = Self::default_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content).context("Failed to parse config file")
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        let with_comments = format!(
            "# taskpad configuration\n\
             # remote.enabled = false keeps every session on this device only\n\n\
             {content}"
        );

        std::fs::write(path, with_comments).context("Failed to write config file")?;
        Ok(())
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.bind, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_sections_take_defaults() {
        let cfg: Config = toml::from_str("[server]\nport = 8080\n").unwrap();

        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.server.bind, "127.0.0.1");
        assert!(cfg.remote.enabled);
        assert!(cfg.remote.allow_anonymous);
        assert_eq!(cfg.local.path, PathBuf::from("taskpad-local.json"));
    }

    #[test]
    fn saved_config_loads_back() {
        let path = std::env::temp_dir()
            .join(format!("taskpad-config-{}", uuid::Uuid::new_v4()))
            .join("config.toml");
        let mut cfg = Config::default();
        cfg.remote.allow_anonymous = false;
        cfg.server.port = 4000;

        cfg.save_to(&path).unwrap();
        let loaded = Config::load_from(&path).unwrap();

        assert!(!loaded.remote.allow_anonymous);
        assert_eq!(loaded.listen_addr(), "127.0.0.1:4000");
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}

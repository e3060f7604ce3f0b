//! Configuration with layered resolution using figment.
//!
//! Resolution order (highest priority last):
//! 1. User config: `~/.config/graphbolt/config.toml` (XDG) or platform config dir
//! 2. Project config: `.graphbolt.toml`
//! 3. Environment variables: `GRAPHBOLT_*`
//!
//! Every field has a default, so an empty environment yields a usable config.
//!
//! ```toml
//! [server]
//! address = "db.internal:7687"
//!
//! [pool]
//! max_size = 32
//! acquire_timeout_ms = 5000
//!
//! [session]
//! access_mode = "read"
//! ```

use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Boxed wrapper for figment::Error to reduce Result size on the stack.
#[derive(Debug)]
pub struct ConfigError(Box<figment::Error>);

impl Deref for ConfigError {
    type Target = figment::Error;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self(Box::new(err))
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub pool: PoolConfig,
    pub session: SessionConfig,
}

/// Where the graph server lives and how the driver introduces itself.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// `host:port` handed to the connector.
    pub address: String,
    /// Client identification sent during the handshake.
    pub user_agent: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "localhost:7687".to_string(),
            user_agent: format!("graphbolt/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Connection pool sizing.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of pooled connections.
    pub max_size: usize,
    /// How long a session waits for a free connection, in milliseconds.
    /// `0` waits forever.
    pub acquire_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 16,
            acquire_timeout_ms: 60_000,
        }
    }
}

impl PoolConfig {
    pub fn acquire_timeout(&self) -> Option<Duration> {
        (self.acquire_timeout_ms > 0).then(|| Duration::from_millis(self.acquire_timeout_ms))
    }
}

/// Defaults applied to sessions opened without explicit options.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    pub access_mode: AccessMode,
}

/// Whether a session intends to read or write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    Read,
    #[default]
    Write,
}

impl Config {
    /// Load config with layered resolution (user → project → env).
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::user_config_path(), Path::new(".graphbolt.toml"))
    }

    /// Load config from explicit user and project files, then the environment.
    ///
    /// Missing files are skipped.
    pub fn load_from(user_config: &Path, project_config: &Path) -> Result<Self, ConfigError> {
        Figment::from(Serialized::defaults(Config::default()))
            // Layer 1: User config (lowest priority)
            .merge(Toml::file(user_config))
            // Layer 2: Project config
            .merge(Toml::file(project_config))
            // Layer 3: Environment variables (highest priority)
            .merge(Env::prefixed("GRAPHBOLT_").split("__"))
            .extract()
            .map_err(ConfigError::from)
    }

    /// User config path: ~/.config/graphbolt/config.toml (XDG) or platform config dir.
    fn user_config_path() -> PathBuf {
        // Prefer XDG config location (~/.config) on all platforms
        if let Some(home) = dirs::home_dir() {
            let xdg_path = home.join(".config").join("graphbolt").join("config.toml");
            if xdg_path.exists() {
                return xdg_path;
            }
        }
        // Fall back to platform-specific config dir
        dirs::config_dir()
            .map(|p| p.join("graphbolt").join("config.toml"))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    fn write_toml(dir: &tempfile::TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    #[serial]
    fn test_defaults_without_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(
            &dir.path().join("missing-user.toml"),
            &dir.path().join("missing-project.toml"),
        )
        .unwrap();

        assert_eq!(config, Config::default());
        assert_eq!(config.pool.max_size, 16);
        assert_eq!(config.session.access_mode, AccessMode::Write);
    }

    #[test]
    #[serial]
    fn test_project_overrides_user() {
        let dir = tempfile::tempdir().unwrap();
        let user = write_toml(
            &dir,
            "user.toml",
            "[server]\naddress = \"user-host:7687\"\n[pool]\nmax_size = 4\n",
        );
        let project = write_toml(&dir, "project.toml", "[server]\naddress = \"project-host:7687\"\n");

        let config = Config::load_from(&user, &project).unwrap();
        assert_eq!(config.server.address, "project-host:7687");
        assert_eq!(config.pool.max_size, 4);
    }

    #[test]
    #[serial]
    fn test_env_overrides_files() {
        let dir = tempfile::tempdir().unwrap();
        let project = write_toml(&dir, "project.toml", "[session]\naccess_mode = \"write\"\n");

        std::env::set_var("GRAPHBOLT_SESSION__ACCESS_MODE", "read");
        let config = Config::load_from(&dir.path().join("none.toml"), &project);
        std::env::remove_var("GRAPHBOLT_SESSION__ACCESS_MODE");

        assert_eq!(config.unwrap().session.access_mode, AccessMode::Read);
    }

    #[test]
    #[serial]
    fn test_invalid_value_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let project = write_toml(&dir, "project.toml", "[pool]\nmax_size = \"lots\"\n");

        let err = Config::load_from(&dir.path().join("none.toml"), &project).unwrap_err();
        assert!(err.to_string().contains("max_size"));
    }

    #[test]
    fn test_acquire_timeout_zero_waits_forever() {
        let pool = PoolConfig {
            max_size: 1,
            acquire_timeout_ms: 0,
        };
        assert_eq!(pool.acquire_timeout(), None);
        assert_eq!(
            PoolConfig::default().acquire_timeout(),
            Some(Duration::from_secs(60))
        );
    }
}

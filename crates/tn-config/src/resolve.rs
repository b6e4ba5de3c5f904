//! Configuration resolution and path discovery.
//!
//! Resolution order: CLI argument → environment variables → XDG paths →
//! system config → built-in defaults.

use std::path::{Path, PathBuf};

/// Where the node configuration was found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConfigSource {
    /// Explicitly provided via CLI argument.
    CliArgument,

    /// Set via environment variable.
    Environment,

    /// Found in XDG config directory.
    XdgConfig,

    /// Found in /etc/telenode/.
    SystemConfig,

    /// Using built-in defaults.
    #[default]
    BuiltinDefault,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::CliArgument => write!(f, "CLI argument"),
            ConfigSource::Environment => write!(f, "environment variable"),
            ConfigSource::XdgConfig => write!(f, "XDG config"),
            ConfigSource::SystemConfig => write!(f, "system config"),
            ConfigSource::BuiltinDefault => write!(f, "builtin default"),
        }
    }
}

/// A resolved configuration file location.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigPath {
    /// Path to node.json, or None when defaults apply.
    pub path: Option<PathBuf>,
    /// How the path was found (for diagnostics).
    pub source: ConfigSource,
}

/// Environment variable holding a direct path to the config file.
pub const ENV_CONFIG_PATH: &str = "TELENODE_CONFIG";

/// Environment variable holding a config directory.
pub const ENV_CONFIG_DIR: &str = "TELENODE_CONFIG_DIR";

/// Standard config file name.
pub const CONFIG_FILENAME: &str = "node.json";

/// Application name for XDG and system directories.
const APP_NAME: &str = "telenode";

/// Resolve the node config path from the process environment.
///
/// Resolution order:
/// 1. Explicit CLI path (if it exists)
/// 2. `TELENODE_CONFIG` (direct path)
/// 3. `TELENODE_CONFIG_DIR` + node.json
/// 4. XDG config directory (~/.config/telenode/node.json)
/// 5. System config (/etc/telenode/node.json)
/// 6. Built-in defaults (None)
pub fn resolve_config(cli_path: Option<&Path>) -> ConfigPath {
    resolve_config_with(cli_path, |key| std::env::var(key).ok())
}

/// Resolve with an injected environment lookup.
pub fn resolve_config_with<F>(cli_path: Option<&Path>, env: F) -> ConfigPath
where
    F: Fn(&str) -> Option<String>,
{
    // 1. CLI argument
    if let Some(path) = cli_path {
        if path.exists() {
            return found(path.to_path_buf(), ConfigSource::CliArgument);
        }
        tracing::warn!(path = %path.display(), "config path from CLI does not exist");
    }

    // 2. Environment variable (direct path)
    if let Some(env_path) = env(ENV_CONFIG_PATH) {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return found(path, ConfigSource::Environment);
        }
    }

    // 3. Environment variable (config dir)
    if let Some(config_dir) = env(ENV_CONFIG_DIR) {
        let path = PathBuf::from(config_dir).join(CONFIG_FILENAME);
        if path.exists() {
            return found(path, ConfigSource::Environment);
        }
    }

    // 4. XDG config directory
    if let Some(dir) = xdg_config_dir() {
        let path = dir.join(CONFIG_FILENAME);
        if path.exists() {
            return found(path, ConfigSource::XdgConfig);
        }
    }

    // 5. System config
    let system_path = system_config_dir().join(CONFIG_FILENAME);
    if system_path.exists() {
        return found(system_path, ConfigSource::SystemConfig);
    }

    ConfigPath::default()
}

fn found(path: PathBuf, source: ConfigSource) -> ConfigPath {
    ConfigPath {
        path: Some(path),
        source,
    }
}

/// Get the XDG config directory for telenode.
pub fn xdg_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_NAME))
}

/// Get the system config directory.
pub fn system_config_dir() -> PathBuf {
    PathBuf::from("/etc").join(APP_NAME)
}

/// Default storage volume when the config names none.
///
/// On a deployed node this is the SD-card mount point; on a bench host it
/// falls back to the XDG data directory.
pub fn default_volume() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

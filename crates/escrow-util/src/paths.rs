//! Default paths for escrowd components
//!
//! Paths are user-writable by default (no root required):
//! - Socket: `$XDG_RUNTIME_DIR/escrowd/escrowd.sock` or `/tmp/escrowd-$USER/escrowd.sock`
//! - Config: `$XDG_CONFIG_HOME/escrowd/config.toml` or `~/.config/escrowd/config.toml`
//! - Data: `$XDG_DATA_HOME/escrowd` or `~/.local/share/escrowd`

use std::path::PathBuf;

/// Environment variable for overriding the socket path
pub const ESCROW_SOCKET_ENV: &str = "ESCROW_SOCKET";

/// Environment variable for overriding the data directory
pub const ESCROW_DATA_DIR_ENV: &str = "ESCROW_DATA_DIR";

/// Socket filename within the socket directory
const SOCKET_FILENAME: &str = "escrowd.sock";

/// Config filename within the config directory
const CONFIG_FILENAME: &str = "config.toml";

/// Application subdirectory name
const APP_DIR: &str = "escrowd";

/// Get the default socket path.
///
/// `$ESCROW_SOCKET` is honored by the daemon's command line, not here.
/// Order of precedence:
/// 1. `$XDG_RUNTIME_DIR/escrowd/escrowd.sock` (if XDG_RUNTIME_DIR is set)
/// 2. `/tmp/escrowd-$USER/escrowd.sock` (fallback)
pub fn default_socket_path() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir).join(APP_DIR).join(SOCKET_FILENAME);
    }

    let username = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    PathBuf::from(format!("/tmp/{}-{}", APP_DIR, username)).join(SOCKET_FILENAME)
}

/// Get the default configuration file path.
///
/// Order of precedence:
/// 1. `$XDG_CONFIG_HOME/escrowd/config.toml` (if XDG_CONFIG_HOME is set)
/// 2. `~/.config/escrowd/config.toml` (fallback)
pub fn default_config_path() -> PathBuf {
    if let Ok(config_home) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(config_home).join(APP_DIR).join(CONFIG_FILENAME);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join(APP_DIR)
            .join(CONFIG_FILENAME);
    }

    PathBuf::from("/etc").join(APP_DIR).join(CONFIG_FILENAME)
}

/// Get the default data directory.
///
/// Order of precedence:
/// 1. `$XDG_DATA_HOME/escrowd` (if XDG_DATA_HOME is set)
/// 2. `~/.local/share/escrowd` (fallback)
pub fn default_data_dir() -> PathBuf {
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(data_home).join(APP_DIR);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".local")
            .join("share")
            .join(APP_DIR);
    }

    // Last resort
    PathBuf::from("/tmp").join(APP_DIR).join("data")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_path_contains_escrowd() {
        let path = default_socket_path();
        assert!(path.to_string_lossy().contains("escrowd"));
        assert!(path.to_string_lossy().ends_with(".sock"));
    }

    #[test]
    fn config_path_is_toml() {
        let path = default_config_path();
        assert!(path.to_string_lossy().contains("escrowd"));
        assert_eq!(path.file_name().unwrap(), "config.toml");
    }

    #[test]
    fn data_dir_contains_escrowd() {
        let path = default_data_dir();
        assert!(path.to_string_lossy().contains("escrowd"));
    }
}

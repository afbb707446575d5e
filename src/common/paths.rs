//! Configuration and log file locations
//!
//! Uses the directories crate for platform-appropriate locations:
//! - Linux: `~/.config/runtime-inspector/`
//! - macOS: `~/Library/Application Support/runtime-inspector/`
//! - Windows: `%APPDATA%\runtime-inspector\`

use std::path::PathBuf;

/// Application name used for every per-user directory
const APP_NAME: &str = "runtime-inspector";

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", APP_NAME)
}

/// Get the configuration directory path
pub fn config_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Get the path to the log directory
pub fn log_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.data_dir().join("logs"))
}

/// Default file used by `--log-file` when no explicit path is given
pub fn default_log_file() -> Option<PathBuf> {
    log_dir().map(|dir| dir.join("inspector.log"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path_ends_with_toml() {
        if let Some(path) = config_path() {
            assert_eq!(path.file_name().unwrap(), "config.toml");
        }
    }

    #[test]
    fn test_log_file_lives_in_log_dir() {
        if let (Some(dir), Some(file)) = (log_dir(), default_log_file()) {
            assert_eq!(file.parent().unwrap(), dir);
        }
    }
}

//! The settings file lives in the user configuration directory:
//!
//! - Linux: `~/.config/cauce/cauce.toml`
//! - macOS: `~/Library/Application Support/cauce/cauce.toml`
//! - Windows: `%APPDATA%\cauce\cauce.toml`

use std::path::PathBuf;

/// Application name used for directory paths.
const APP_NAME: &str = "cauce";

/// Settings file name.
const SETTINGS_FILE: &str = "cauce.toml";

/// Environment variable that overrides the settings file location.
pub const SETTINGS_ENV: &str = "CAUCE_CONFIG";

/// Returns the user-specific configuration directory.
///
/// Returns a fallback path if the config directory cannot be determined.
pub fn user_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

/// Path of the settings file: `$CAUCE_CONFIG` when set, otherwise
/// `cauce.toml` in [`user_config_dir`].
pub fn default_settings_path() -> PathBuf {
    std::env::var_os(SETTINGS_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| user_config_dir().join(SETTINGS_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_dir_ends_with_app_name() {
        assert!(user_config_dir().ends_with(APP_NAME));
    }

    #[test]
    fn settings_path_is_a_toml_file() {
        if std::env::var_os(SETTINGS_ENV).is_none() {
            let path = default_settings_path();
            assert_eq!(path.file_name().and_then(|n| n.to_str()), Some(SETTINGS_FILE));
        }
    }
}

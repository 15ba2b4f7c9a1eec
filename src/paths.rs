use std::path::PathBuf;

/// Returns the base directory for OTA client data.
///
/// Uses `$A3S_OTA_HOME` if set, otherwise defaults to `~/.a3s/ota`.
pub fn ota_home() -> PathBuf {
    if let Ok(home) = std::env::var("A3S_OTA_HOME") {
        return PathBuf::from(home);
    }

    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".a3s")
        .join("ota")
}

/// Returns the path to the user configuration file.
pub fn config_path() -> PathBuf {
    ota_home().join("config.toml")
}

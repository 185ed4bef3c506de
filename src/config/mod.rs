//! Daemon configuration, loaded from a YAML file at the XDG config path
//! (override with `--config`). A missing file is not an error: every field
//! carries a default.

use std::io::{self, Read};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{LIGHTBAR_IPC_PATH, XDG_PREFIX};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Could not read: {0}")]
    IoError(#[from] io::Error),
    #[error("Unable to deserialize: {0}")]
    DeserializeError(#[from] serde_yaml::Error),
    #[error("Config too large, reached maximum size of {0} bytes")]
    MaximumSizeReached(usize),
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "snake_case", default)]
pub struct Config {
    /// Stick deadzone radius applied by the drivers, in axis units.
    pub stick_deadzone: u8,
    /// Emulate the right stick from single-finger touchpad drags.
    pub touchpad_as_right_stick: bool,
    /// Touchpad pixels for full stick deflection.
    pub touchpad_sensitivity: u16,
    /// Wireless wake attempts made from standby, and their spacing.
    pub wake_attempts: u32,
    pub wake_interval_ms: u64,
    /// Bluetooth adapter index the wireless transport binds to.
    pub hci_dev: u16,
    /// Lightbar override IPC file.
    pub lightbar_ipc_path: PathBuf,
    /// Pairing record location; defaults to the XDG config directory.
    pub pairing_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            stick_deadzone: 8,
            touchpad_as_right_stick: false,
            touchpad_sensitivity: 400,
            wake_attempts: 5,
            wake_interval_ms: 1500,
            hci_dev: 0,
            lightbar_ipc_path: PathBuf::from(LIGHTBAR_IPC_PATH),
            pairing_file: None,
        }
    }
}

impl Config {
    pub fn from_yaml(content: &str) -> Result<Config, LoadError> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Config, LoadError> {
        let file = std::fs::File::open(path)?;

        // Read up to a defined maximum size to prevent denial of service
        const MAX_SIZE: usize = 64 * 1024;
        let mut reader = file.take(MAX_SIZE as u64);
        let mut content = String::default();
        let bytes_read = reader.read_to_string(&mut content)?;
        if bytes_read == MAX_SIZE {
            return Err(LoadError::MaximumSizeReached(MAX_SIZE));
        }
        Self::from_yaml(&content)
    }

    /// Load the config from the given path, or from the default XDG
    /// location. Absent files fall back to defaults.
    pub fn load(path: Option<&Path>) -> Config {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match default_config_path() {
                Some(path) => path,
                None => return Config::default(),
            },
        };
        match Self::from_yaml_file(&path) {
            Ok(config) => {
                log::info!("Loaded config from {}", path.display());
                config
            }
            Err(LoadError::IoError(e)) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!("No config at {}, using defaults", path.display());
                Config::default()
            }
            Err(e) => {
                log::warn!("Failed to load {}: {e}, using defaults", path.display());
                Config::default()
            }
        }
    }

    /// Resolve the pairing record path, creating parent directories.
    pub fn pairing_path(&self) -> PathBuf {
        if let Some(path) = &self.pairing_file {
            return path.clone();
        }
        xdg::BaseDirectories::with_prefix(XDG_PREFIX)
            .ok()
            .and_then(|dirs| dirs.place_config_file("pairing.conf").ok())
            .unwrap_or_else(|| PathBuf::from("/var/lib/rosettapad/pairing.conf"))
    }
}

fn default_config_path() -> Option<PathBuf> {
    let dirs = xdg::BaseDirectories::with_prefix(XDG_PREFIX).ok()?;
    Some(dirs.get_config_file("config.yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_missing_fields() {
        let config = Config::from_yaml("touchpad_as_right_stick: true\n").unwrap();
        assert!(config.touchpad_as_right_stick);
        assert_eq!(config.stick_deadzone, 8);
        assert_eq!(config.wake_attempts, 5);
    }

    #[test]
    fn rejects_malformed_yaml() {
        assert!(Config::from_yaml("stick_deadzone: [oops\n").is_err());
    }
}

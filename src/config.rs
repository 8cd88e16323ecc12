//! # Configuration Module
//!
//! Data directory setup and the optional `config.toml`.
//!
//! ## Data Storage
//!
//! The database lives in the platform-standard data directory:
//! - Linux: `~/.local/share/nowplaying/nowplaying.db`
//! - macOS: `~/Library/Application Support/nowplaying/nowplaying.db`
//! - Windows: `%APPDATA%\nowplaying\nowplaying.db`
//!
//! ## Config File
//!
//! `<config_dir>/nowplaying/config.toml`, all keys optional:
//!
//! ```toml
//! db_path = "/srv/nowplaying/nowplaying.db"
//! gap_minutes = 10
//! min_watch_seconds = 30
//! ```
//!
//! Command-line flags (and `NOWPLAYING_DB`) take precedence over the file.

use crate::session::{SessionConfig, DEFAULT_GAP_MINUTES};
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "nowplaying";

/// Database file name inside the data directory
pub const DB_FILE_NAME: &str = "nowplaying.db";

/// Config file name inside the config directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Returns the platform-appropriate data directory, creating it if needed.
///
/// # Errors
///
/// Returns an error if the system data directory cannot be determined or the
/// `nowplaying` subdirectory cannot be created.
pub fn get_data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir().ok_or_else(|| {
        anyhow::anyhow!(
            "Could not determine system data directory. Pass --db or set NOWPLAYING_DB instead."
        )
    })?;

    let app_dir = data_dir.join(APP_DIR);
    fs::create_dir_all(&app_dir).with_context(|| {
        format!(
            "Failed to create data directory at {}. Please check file permissions.",
            app_dir.display()
        )
    })?;

    Ok(app_dir)
}

/// Returns the default database file path.
///
/// # Errors
///
/// See [`get_data_dir`].
pub fn get_db_path() -> Result<PathBuf> {
    Ok(get_data_dir()?.join(DB_FILE_NAME))
}

/// Values read from `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub db_path: Option<PathBuf>,
    pub gap_minutes: Option<u32>,
    pub min_watch_seconds: Option<f64>,
}

impl FileConfig {
    /// Default location, if the platform has a config directory.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE_NAME))
    }

    /// Load the file at `path`.
    ///
    /// Returns `Ok(None)` when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content =
            fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let config: FileConfig =
            toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Some(config))
    }

    /// Load an explicitly requested file, or the default one if present.
    ///
    /// # Errors
    ///
    /// An explicit path that does not exist is an error; so is any parse failure.
    pub fn discover(explicit: Option<&Path>) -> Result<Option<Self>> {
        match explicit {
            Some(path) => Self::load(path)?
                .map(Some)
                .with_context(|| format!("Config file {} does not exist", path.display())),
            None => match Self::default_path() {
                Some(path) => Self::load(&path),
                None => Ok(None),
            },
        }
    }
}

/// Settings after merging defaults, the config file and command-line flags.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    /// Path to the database file
    pub db_path: PathBuf,
    pub gap_minutes: u32,
    pub min_watch_seconds: f64,
}

impl RuntimeConfig {
    /// Merge `file` with command-line overrides. Flags win over the file;
    /// the platform data directory is used only when neither names a database.
    ///
    /// # Errors
    ///
    /// Returns an error for a zero gap, a negative or non-finite minimum
    /// watch time, or when no default database path can be determined.
    pub fn resolve(
        file: Option<FileConfig>,
        db_path: Option<PathBuf>,
        gap_minutes: Option<u32>,
        min_watch_seconds: Option<f64>,
    ) -> Result<Self> {
        let file = file.unwrap_or_default();

        let gap_minutes = gap_minutes.or(file.gap_minutes).unwrap_or(DEFAULT_GAP_MINUTES);
        if gap_minutes == 0 {
            bail!("gap_minutes must be at least 1");
        }
        let min_watch_seconds = min_watch_seconds.or(file.min_watch_seconds).unwrap_or(0.0);
        if !min_watch_seconds.is_finite() || min_watch_seconds < 0.0 {
            bail!("min_watch_seconds must be a non-negative number, got {min_watch_seconds}");
        }
        let db_path = match db_path.or(file.db_path) {
            Some(path) => path,
            None => get_db_path()?,
        };

        Ok(Self {
            db_path,
            gap_minutes,
            min_watch_seconds,
        })
    }

    /// Create configuration with explicit database path and default grouping
    #[must_use]
    pub fn with_db_path(db_path: PathBuf) -> Self {
        Self {
            db_path,
            gap_minutes: DEFAULT_GAP_MINUTES,
            min_watch_seconds: 0.0,
        }
    }

    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            min_watch_seconds: self.min_watch_seconds,
            ..SessionConfig::with_gap_minutes(self.gap_minutes)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_get_db_path_structure() {
        let path = get_db_path().expect("Should get valid path");

        assert_eq!(path.file_name().unwrap(), DB_FILE_NAME);
        let parent = path.parent().expect("Should have parent directory");
        assert_eq!(parent.file_name().unwrap(), APP_DIR);
        assert!(parent.is_dir());
    }

    #[test]
    fn test_load_missing_file_is_none() -> Result<()> {
        let dir = tempfile::tempdir()?;
        assert_eq!(FileConfig::load(&dir.path().join(CONFIG_FILE_NAME))?, None);
        assert!(FileConfig::discover(Some(&dir.path().join(CONFIG_FILE_NAME))).is_err());
        Ok(())
    }

    #[test]
    fn test_load_and_reject_unknown_keys() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join(CONFIG_FILE_NAME);

        fs::write(&path, "gap_minutes = 15\nmin_watch_seconds = 30.0\n")?;
        let config = FileConfig::load(&path)?.unwrap();
        assert_eq!(config.gap_minutes, Some(15));
        assert_eq!(config.min_watch_seconds, Some(30.0));
        assert_eq!(config.db_path, None);

        fs::write(&path, "gap = 15\n")?;
        assert!(FileConfig::load(&path).is_err());
        Ok(())
    }

    #[test]
    fn test_flags_override_file() -> Result<()> {
        let file = FileConfig {
            db_path: Some(PathBuf::from("/file/np.db")),
            gap_minutes: Some(20),
            min_watch_seconds: Some(30.0),
        };
        let config = RuntimeConfig::resolve(Some(file), Some(PathBuf::from("flag.db")), Some(5), None)?;

        assert_eq!(config.db_path, PathBuf::from("flag.db"));
        assert_eq!(config.gap_minutes, 5);
        assert_eq!(config.min_watch_seconds, 30.0);

        let session = config.session_config();
        assert_eq!(session.gap_threshold, Duration::minutes(5));
        assert_eq!(session.min_watch_seconds, 30.0);
        Ok(())
    }

    #[test]
    fn test_defaults_and_validation() -> Result<()> {
        let config = RuntimeConfig::resolve(None, Some(PathBuf::from("np.db")), None, None)?;
        assert_eq!(config, RuntimeConfig::with_db_path(PathBuf::from("np.db")));
        assert_eq!(config.session_config(), SessionConfig::default());

        let zero_gap = FileConfig {
            gap_minutes: Some(0),
            ..FileConfig::default()
        };
        assert!(RuntimeConfig::resolve(Some(zero_gap), Some(PathBuf::from("np.db")), None, None).is_err());
        assert!(RuntimeConfig::resolve(None, Some(PathBuf::from("np.db")), None, Some(-1.0)).is_err());
        Ok(())
    }
}

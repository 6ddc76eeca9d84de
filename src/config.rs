use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::compute::DEFAULT_API_ENDPOINT;
use crate::error::ClaimError;
use crate::waiter::{DEFAULT_POLL_INTERVAL, WaitPolicy};

pub const SETTINGS_FILE_NAME: &str = "settings.toml";

// Compute Engine resource names: lowercase letter first, up to 63 chars.
static RESOURCE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z]([-a-z0-9]{0,61}[a-z0-9])?$").expect("valid regex"));

/// Optional settings file. Every key has a default, so an empty file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub poll_interval_secs: u64,
    pub max_wait_secs: Option<u64>,
    pub api_endpoint: String,
    pub metadata_endpoint: String,
    pub log_filter: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL.as_secs(),
            max_wait_secs: None,
            api_endpoint: DEFAULT_API_ENDPOINT.to_string(),
            metadata_endpoint: gce_metadata::DEFAULT_ENDPOINT.to_string(),
            log_filter: None,
        }
    }
}

impl Settings {
    /// Explicit path first, then the per-user config directory, then defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        match Self::default_path() {
            Some(path) if path.is_file() => Self::from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading settings from {}", path.display());
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("failed to parse settings file {}", path.display()))
    }

    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "gce-disk-claim", "gce-disk-claim")
            .map(|dirs| dirs.config_dir().join(SETTINGS_FILE_NAME))
    }

    /// Poll settings, with command line values taking precedence.
    pub fn wait_policy(&self, poll_interval_secs: Option<u64>, max_wait_secs: Option<u64>) -> WaitPolicy {
        WaitPolicy {
            interval: Duration::from_secs(poll_interval_secs.unwrap_or(self.poll_interval_secs)),
            max_wait: max_wait_secs.or(self.max_wait_secs).map(Duration::from_secs),
        }
    }
}

pub fn validate_disk_name(disk: &str) -> Result<(), ClaimError> {
    if disk.is_empty() {
        return Err(ClaimError::validation("--disk flag is required"));
    }
    if !RESOURCE_NAME.is_match(disk) {
        return Err(ClaimError::validation(format!(
            "{:?} is not a valid disk name",
            disk
        )));
    }
    Ok(())
}

pub fn validate_mount_path(path: &Path) -> Result<(), ClaimError> {
    if path.as_os_str().is_empty() {
        return Err(ClaimError::validation("--path flag is required"));
    }
    if !path.is_absolute() {
        return Err(ClaimError::validation(format!(
            "mount path {} must be absolute",
            path.display()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn accepts_compute_resource_names() {
        for name in ["data-1", "d", "pg-primary-disk", "a0"] {
            assert!(validate_disk_name(name).is_ok(), "{}", name);
        }
    }

    #[test]
    fn rejects_bad_disk_names() {
        let too_long = "a".repeat(64);
        for name in ["", "Data", "1disk", "disk-", "disk_1", too_long.as_str()] {
            assert!(
                matches!(validate_disk_name(name), Err(ClaimError::Validation(_))),
                "{}",
                name
            );
        }
    }

    #[test]
    fn empty_disk_names_the_flag() {
        let err = validate_disk_name("").unwrap_err();
        assert_eq!(err.to_string(), "invalid configuration: --disk flag is required");
    }

    #[test]
    fn mount_path_must_be_absolute() {
        assert!(validate_mount_path(Path::new("/mnt/data")).is_ok());
        assert!(validate_mount_path(Path::new("")).is_err());
        assert!(validate_mount_path(Path::new("mnt/data")).is_err());
    }

    #[test]
    fn reads_partial_settings_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "poll_interval_secs = 2").unwrap();
        writeln!(file, "max_wait_secs = 600").unwrap();

        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(settings.poll_interval_secs, 2);
        assert_eq!(settings.max_wait_secs, Some(600));
        assert_eq!(settings.api_endpoint, DEFAULT_API_ENDPOINT);
        assert_eq!(settings.metadata_endpoint, gce_metadata::DEFAULT_ENDPOINT);
    }

    #[test]
    fn rejects_unknown_settings_keys() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "poll_interval = 2").unwrap();

        let err = Settings::load(Some(file.path())).unwrap_err();
        assert!(format!("{:#}", err).contains("failed to parse settings file"));
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Settings::load(Some(&dir.path().join("nope.toml"))).is_err());
    }

    #[test]
    fn flags_override_file_wait_settings() {
        let settings = Settings {
            poll_interval_secs: 3,
            max_wait_secs: Some(60),
            ..Settings::default()
        };

        assert_eq!(
            settings.wait_policy(None, None),
            WaitPolicy {
                interval: Duration::from_secs(3),
                max_wait: Some(Duration::from_secs(60)),
            }
        );
        assert_eq!(
            settings.wait_policy(Some(1), Some(10)),
            WaitPolicy {
                interval: Duration::from_secs(1),
                max_wait: Some(Duration::from_secs(10)),
            }
        );
        assert_eq!(Settings::default().wait_policy(None, None), WaitPolicy::default());
    }
}

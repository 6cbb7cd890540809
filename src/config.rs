//! Ambient configuration (§6): the settings file and option schema the GUI
//! hands the core through `start_sequence(urls, options)`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write settings file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed settings file: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Per-gallery download options a `start_sequence` command carries (§6).
/// Elided keys (window geometry, panel layout) stay with the GUI layer; only
/// the options the core itself consumes live here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadOptions {
    #[serde(default)]
    pub range_start: Option<u32>,
    #[serde(default)]
    pub range_end: Option<u32>,
    #[serde(default)]
    pub user_max_retries: Option<u32>,
    #[serde(default = "default_duplicate_policy")]
    pub duplicate_file_policy: DuplicatePolicy,
    #[serde(default)]
    pub duplicate_folder_policy: DuplicatePolicy,
    #[serde(default)]
    pub cookies: Option<String>,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            range_start: None,
            range_end: None,
            user_max_retries: None,
            duplicate_file_policy: default_duplicate_policy(),
            duplicate_folder_policy: DuplicatePolicy::Rename,
            cookies: None,
        }
    }
}

fn default_duplicate_policy() -> DuplicatePolicy {
    DuplicatePolicy::Rename
}

/// Duplicate-file / duplicate-folder policy (§4.4 step 1, §4.5 step 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    Overwrite,
    Rename,
    Skip,
}

/// Settings persisted across runs (§6: "Loaded at start, written on exit").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub default_options: DownloadOptions,
    #[serde(default = "default_resume_file")]
    pub resume_file: PathBuf,
    #[serde(default = "default_error_log_file")]
    pub error_log_file: PathBuf,
}

fn default_resume_file() -> PathBuf {
    PathBuf::from("unified_resume_data.json")
}

fn default_error_log_file() -> PathBuf {
    PathBuf::from("error_log.json")
}

impl Settings {
    /// Loads settings from `path`, falling back to defaults if the file
    /// doesn't exist yet (first run).
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the file exists but cannot be read or
    /// parsed.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Ok(Self::default());
        }
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        serde_json::from_slice(&bytes).map_err(ConfigError::Decode)
    }

    /// # Errors
    /// Returns [`ConfigError`] if the file cannot be written.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let bytes = serde_json::to_vec_pretty(self).map_err(ConfigError::Decode)?;
        tokio::fs::write(path, bytes)
            .await
            .map_err(|source| ConfigError::Write {
                path: path.to_path_buf(),
                source,
            })
    }
}

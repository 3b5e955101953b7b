use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::parser::classify::{HeaderRules, MIN_CELLS, MIN_KEYWORD_CELLS};

const CONFIG_FILE: &str = "athletic";
const ENV_PREFIX: &str = "ATHLETIC";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub db_path: PathBuf,
    /// Folder hint passed to the asset store with every upload.
    pub asset_folder: String,
    /// Uploaded documents are copied here and removed once converted.
    pub staging_dir: PathBuf,
    pub cloudinary: CloudinarySettings,
    pub upload: UploadSettings,
    pub header: HeaderSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            db_path: PathBuf::from("data/athletic.sqlite"),
            asset_folder: "gndecsports".to_string(),
            staging_dir: PathBuf::from("uploads"),
            cloudinary: CloudinarySettings::default(),
            upload: UploadSettings::default(),
            header: HeaderSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CloudinarySettings {
    pub cloud_name: String,
    pub upload_preset: String,
    pub api_base: String,
}

impl Default for CloudinarySettings {
    fn default() -> Self {
        CloudinarySettings {
            cloud_name: String::new(),
            upload_preset: String::new(),
            api_base: "https://api.cloudinary.com/v1_1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Any failed upload fails the whole preview.
    Abort,
    /// Keep the row, leave its image slots empty and mark it.
    Flag,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UploadSettings {
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    pub row_concurrency: usize,
    pub failure_policy: FailurePolicy,
}

impl Default for UploadSettings {
    fn default() -> Self {
        UploadSettings {
            max_retries: 3,
            base_backoff_ms: 2000,
            row_concurrency: 4,
            failure_policy: FailurePolicy::Abort,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HeaderSettings {
    pub min_keyword_cells: usize,
    pub min_cells: usize,
}

impl Default for HeaderSettings {
    fn default() -> Self {
        HeaderSettings {
            min_keyword_cells: MIN_KEYWORD_CELLS,
            min_cells: MIN_CELLS,
        }
    }
}

impl HeaderSettings {
    pub fn rules(&self) -> HeaderRules {
        HeaderRules {
            min_keyword_cells: self.min_keyword_cells,
            min_cells: self.min_cells,
            ..HeaderRules::default()
        }
    }
}

/// Bounded exponential backoff around asset uploads.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl RetryPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff.saturating_mul(2u32.saturating_pow(attempt))
    }
}

impl From<&UploadSettings> for RetryPolicy {
    fn from(s: &UploadSettings) -> Self {
        RetryPolicy {
            max_retries: s.max_retries,
            base_backoff: Duration::from_millis(s.base_backoff_ms),
        }
    }
}

/// Layer `athletic.toml` (optional) and `ATHLETIC_*` env vars over the defaults.
/// Nested keys use a double underscore, e.g. `ATHLETIC_UPLOAD__MAX_RETRIES=5`.
pub fn load() -> Result<Settings> {
    Config::builder()
        .add_source(File::with_name(CONFIG_FILE).required(false))
        .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
        .build()
        .context("building settings")?
        .try_deserialize()
        .context("reading settings")
}

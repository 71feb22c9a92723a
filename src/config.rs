use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::models::MediaType;

/// Application-level constants
pub const APP_NAME: &str = "MedConsult";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Largest accepted upload: 5 MiB.
pub const MAX_UPLOAD_BYTES: u64 = 5 * 1024 * 1024;

/// Default request timeout for the document API.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

pub const DEFAULT_API_URL: &str = "http://localhost:8080/api";

/// Log filter used when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    "info,medconsult_credentials=debug"
}

/// Get the default directory for saved downloads: the user's download
/// folder, falling back to the system temp directory.
pub fn default_download_dir() -> PathBuf {
    dirs::download_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_NAME)
}

/// How a successful bulk decision is reflected locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkReconcileMode {
    /// Apply the decision to the snapshot and trust it.
    Optimistic,
    /// Apply the decision to the snapshot, then re-fetch the full collection.
    #[default]
    Resync,
}

impl std::str::FromStr for BulkReconcileMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "optimistic" => Ok(Self::Optimistic),
            "resync" => Ok(Self::Resync),
            other => Err(ConfigError::Invalid {
                key: "MEDCONSULT_BULK_MODE",
                value: other.to_string(),
            }),
        }
    }
}

/// Upload acceptance limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationLimits {
    pub max_file_size: u64,
    pub allowed_types: Vec<MediaType>,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            max_file_size: MAX_UPLOAD_BYTES,
            allowed_types: vec![MediaType::Pdf, MediaType::Jpeg, MediaType::Png],
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Client configuration resolved once at startup and passed into the
/// transport and workflows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub timeout_secs: u64,
    pub bearer_token: Option<String>,
    pub download_dir: PathBuf,
    pub bulk_mode: BulkReconcileMode,
    pub limits: ValidationLimits,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.into(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            bearer_token: None,
            download_dir: default_download_dir(),
            bulk_mode: BulkReconcileMode::default(),
            limits: ValidationLimits::default(),
        }
    }
}

impl ClientConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup. Unset or blank keys
    /// fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut config = Self::default();

        if let Some(url) = get("MEDCONSULT_API_URL") {
            config.api_base_url = url;
        }
        if let Some(raw) = get("MEDCONSULT_API_TIMEOUT_SECS") {
            config.timeout_secs = raw
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or(ConfigError::Invalid {
                    key: "MEDCONSULT_API_TIMEOUT_SECS",
                    value: raw,
                })?;
        }
        config.bearer_token = get("MEDCONSULT_API_TOKEN");
        if let Some(dir) = get("MEDCONSULT_DOWNLOAD_DIR") {
            config.download_dir = PathBuf::from(dir);
        }
        if let Some(mode) = get("MEDCONSULT_BULK_MODE") {
            config.bulk_mode = mode.parse()?;
        }

        Ok(config)
    }
}

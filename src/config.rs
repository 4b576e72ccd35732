//! Configuration file and command line overrides.
//!
//! Settings come from an optional TOML file (`stampede.toml` in the working
//! directory unless `--config` names one) and are then overridden by flags.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::AppError;
use crate::model::CoercionPolicy;
use crate::strapi::client::{LoggingMode, StrapiConnection, DEFAULT_TIMEOUT_SECS};
use crate::tabular::parse_separator;
use crate::upload::DispatchConfig;

/// File read when `--config` is not given, if it exists.
pub const DEFAULT_CONFIG_FILE: &str = "stampede.toml";

// ─────────────────────────────────────────────────────────────────────────────
// File Sections
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct StrapiSection {
    pub url: Option<String>,
    pub token: Option<String>,
    pub known_endpoint: Option<String>,
}

impl std::fmt::Debug for StrapiSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrapiSection")
            .field("url", &self.url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("known_endpoint", &self.known_endpoint)
            .finish()
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct UploadSection {
    pub batch_size: Option<usize>,
    pub delay_ms: Option<u64>,
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct CoercionSection {
    pub convert_empty_to_null: Option<bool>,
    pub convert_empty_numbers_to_zero: Option<bool>,
    pub skip_empty_values: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct CsvSection {
    pub separator: Option<String>,
    pub has_headers: Option<bool>,
}

/// Contents of a `stampede.toml`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub strapi: StrapiSection,
    pub upload: UploadSection,
    pub coercion: CoercionSection,
    pub csv: CsvSection,
    /// Field name → column name.
    pub mapping: BTreeMap<String, String>,
    /// Field name → default value.
    pub defaults: BTreeMap<String, String>,
}

impl FileConfig {
    pub fn parse(text: &str) -> Result<Self, AppError> {
        toml::from_str(text).map_err(|e| AppError::Config(format!("Invalid config file: {}", e)))
    }

    pub fn load(path: &Path) -> Result<Self, AppError> {
        let text = fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Cannot read config file {}: {}", path.display(), e))
        })?;
        Self::parse(&text)
    }

    /// Loads `explicit` (which must exist) or the default file when present.
    pub fn discover(explicit: Option<&Path>) -> Result<Self, AppError> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !default.is_file() {
                    return Ok(Self::default());
                }
                default
            }
        };
        debug!("[CONFIG] Loading {}", path.display());
        Self::load(&path)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Overrides
// ─────────────────────────────────────────────────────────────────────────────

/// Values given on the command line; `None`/`false` leaves the file value.
#[derive(Default, Clone)]
pub struct Overrides {
    pub url: Option<String>,
    pub token: Option<String>,
    pub known_endpoint: Option<String>,
    pub batch_size: Option<usize>,
    pub delay_ms: Option<u64>,
    pub request_timeout_secs: Option<u64>,
    pub separator: Option<String>,
    pub no_headers: bool,
    pub skip_empty: bool,
    pub keep_empty: bool,
    pub no_empty_numbers_zero: bool,
    pub mapping: Vec<(String, String)>,
    pub defaults: Vec<(String, String)>,
    /// Request logs include the (redacted) query string.
    pub verbose: bool,
}

/// Parses `key=value` arguments such as `--map title=Name`.
pub fn parse_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected field=value, got '{}'", raw)),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Settings
// ─────────────────────────────────────────────────────────────────────────────

/// Effective configuration after merging file and flags.
#[derive(Debug, Clone)]
pub struct Settings {
    pub strapi: StrapiSection,
    pub dispatch: DispatchConfig,
    pub policy: CoercionPolicy,
    pub separator: u8,
    pub has_headers: bool,
    pub mapping: BTreeMap<String, String>,
    pub defaults: BTreeMap<String, String>,
    pub logging_mode: LoggingMode,
}

impl Settings {
    /// # Errors
    ///
    /// Returns `AppError::Config` for a zero batch size or a bad separator.
    pub fn resolve(file: FileConfig, overrides: Overrides) -> Result<Self, AppError> {
        let strapi = StrapiSection {
            url: overrides.url.or(file.strapi.url),
            token: overrides.token.or(file.strapi.token),
            known_endpoint: overrides.known_endpoint.or(file.strapi.known_endpoint),
        };

        let batch_size = overrides
            .batch_size
            .or(file.upload.batch_size)
            .unwrap_or(crate::upload::dispatcher::DEFAULT_BATCH_SIZE);
        if batch_size == 0 {
            return Err(AppError::Config("batch_size must be at least 1".to_string()));
        }
        let defaults = DispatchConfig::default();
        let dispatch = DispatchConfig {
            batch_size,
            delay: overrides
                .delay_ms
                .or(file.upload.delay_ms)
                .map(Duration::from_millis)
                .unwrap_or(defaults.delay),
            request_timeout: Duration::from_secs(
                overrides
                    .request_timeout_secs
                    .or(file.upload.request_timeout_secs)
                    .unwrap_or(DEFAULT_TIMEOUT_SECS),
            ),
        };
        if dispatch.request_timeout.is_zero() {
            return Err(AppError::Config(
                "request_timeout_secs must be at least 1".to_string(),
            ));
        }

        let base = CoercionPolicy::default();
        let mut policy = CoercionPolicy {
            convert_empty_to_null: file
                .coercion
                .convert_empty_to_null
                .unwrap_or(base.convert_empty_to_null),
            convert_empty_numbers_to_zero: file
                .coercion
                .convert_empty_numbers_to_zero
                .unwrap_or(base.convert_empty_numbers_to_zero),
            skip_empty_values: file
                .coercion
                .skip_empty_values
                .unwrap_or(base.skip_empty_values),
        };
        if overrides.skip_empty {
            policy.skip_empty_values = true;
        }
        if overrides.keep_empty {
            policy.convert_empty_to_null = false;
        }
        if overrides.no_empty_numbers_zero {
            policy.convert_empty_numbers_to_zero = false;
        }

        let separator = parse_separator(
            overrides
                .separator
                .as_deref()
                .or(file.csv.separator.as_deref())
                .unwrap_or(","),
        )?;
        let has_headers = !overrides.no_headers && file.csv.has_headers.unwrap_or(true);

        let logging_mode = if overrides.verbose {
            LoggingMode::PathAndQueryRedacted
        } else {
            LoggingMode::PathOnly
        };

        let mut mapping = file.mapping;
        mapping.extend(overrides.mapping);
        let mut field_defaults = file.defaults;
        field_defaults.extend(overrides.defaults);

        Ok(Self {
            strapi,
            dispatch,
            policy,
            separator,
            has_headers,
            mapping,
            defaults: field_defaults,
            logging_mode,
        })
    }

    /// Connection details, normalizing the URL.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` when no URL is configured or it is invalid.
    pub fn connection(&self) -> Result<StrapiConnection, AppError> {
        let url = self.strapi.url.as_deref().ok_or_else(|| {
            AppError::Config("Strapi URL is not set (use --url or [strapi] url)".to_string())
        })?;
        StrapiConnection::new(
            url,
            self.strapi.token.clone(),
            self.strapi.known_endpoint.clone(),
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

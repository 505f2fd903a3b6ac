//! Configuration types

use crate::ConfigError;
use serde::{Deserialize, Serialize};

/// Default maximum length of an event summary, in characters.
pub const DEFAULT_SUMMARY_MAX_CHARS: usize = 140;

/// Default cap on amendments scanned when resolving a current view.
pub const DEFAULT_AMENDMENT_SCAN_LIMIT: usize = 1000;

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const DEFAULT_MAX_PAGE_SIZE: usize = 500;
pub const DEFAULT_CONSENT_SCOPE: &str = "health_records";
pub const DEFAULT_AUDIT_RECENT_LIMIT: usize = 100;

/// Default upload cap (25 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 25 * 1024 * 1024;

// Fixed data source names used by the write paths.
pub const JOURNAL_SOURCE_NAME: &str = "User Journal";
pub const UPLOAD_SOURCE_NAME: &str = "Document Uploads";
pub const AMENDMENT_SOURCE_NAME: &str = "User Amendments";
pub const VISIT_SOURCE_NAME: &str = "Visit Summaries";
pub const DEMO_PORTAL_SOURCE_NAME: &str = "Fasten Health (Demo)";
pub const DEMO_PORTAL_PROVIDER: &str = "fasten";

/// Runtime configuration for the timeline services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(default)]
pub struct TimelineConfig {
    /// Summaries are truncated to this many characters.
    pub summary_max_chars: usize,
    /// Upper bound on amendments read per target before failing with
    /// `TooManyAmendments`.
    pub amendment_scan_limit: usize,
    pub default_page_size: usize,
    pub max_page_size: usize,
    /// Scope of the default consent agreement.
    pub consent_scope: String,
    pub audit_recent_limit: usize,
    pub max_upload_bytes: u64,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            summary_max_chars: DEFAULT_SUMMARY_MAX_CHARS,
            amendment_scan_limit: DEFAULT_AMENDMENT_SCAN_LIMIT,
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
            consent_scope: DEFAULT_CONSENT_SCOPE.to_string(),
            audit_recent_limit: DEFAULT_AUDIT_RECENT_LIMIT,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

impl TimelineConfig {
    /// Create TimelineConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `LIFELINE_SUMMARY_MAX_CHARS` (default: 140)
    /// - `LIFELINE_AMENDMENT_SCAN_LIMIT` (default: 1000)
    /// - `LIFELINE_DEFAULT_PAGE_SIZE` (default: 50)
    /// - `LIFELINE_MAX_PAGE_SIZE` (default: 500)
    /// - `LIFELINE_CONSENT_SCOPE` (default: "health_records")
    /// - `LIFELINE_AUDIT_RECENT_LIMIT` (default: 100)
    /// - `LIFELINE_MAX_UPLOAD_BYTES` (default: 26214400)
    ///
    /// Unparseable values are reported rather than silently replaced.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. `from_env` delegates here so the
    /// parsing can be tested without touching process state.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            summary_max_chars: parse_var(
                &lookup,
                "LIFELINE_SUMMARY_MAX_CHARS",
                defaults.summary_max_chars,
            )?,
            amendment_scan_limit: parse_var(
                &lookup,
                "LIFELINE_AMENDMENT_SCAN_LIMIT",
                defaults.amendment_scan_limit,
            )?,
            default_page_size: parse_var(
                &lookup,
                "LIFELINE_DEFAULT_PAGE_SIZE",
                defaults.default_page_size,
            )?,
            max_page_size: parse_var(&lookup, "LIFELINE_MAX_PAGE_SIZE", defaults.max_page_size)?,
            consent_scope: lookup("LIFELINE_CONSENT_SCOPE").unwrap_or(defaults.consent_scope),
            audit_recent_limit: parse_var(
                &lookup,
                "LIFELINE_AUDIT_RECENT_LIMIT",
                defaults.audit_recent_limit,
            )?,
            max_upload_bytes: parse_var(
                &lookup,
                "LIFELINE_MAX_UPLOAD_BYTES",
                defaults.max_upload_bytes,
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("summary_max_chars", self.summary_max_chars),
            ("amendment_scan_limit", self.amendment_scan_limit),
            ("default_page_size", self.default_page_size),
            ("max_page_size", self.max_page_size),
            ("audit_recent_limit", self.audit_recent_limit),
        ];
        for (field, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: value.to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        if self.max_upload_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_upload_bytes".to_string(),
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.default_page_size > self.max_page_size {
            return Err(ConfigError::InvalidValue {
                field: "default_page_size".to_string(),
                value: self.default_page_size.to_string(),
                reason: format!("must not exceed max_page_size ({})", self.max_page_size),
            });
        }
        if self.consent_scope.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "consent_scope".to_string(),
            });
        }
        Ok(())
    }

    /// Clamp a requested page size into `1..=max_page_size`.
    pub fn page_size(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_page_size)
            .clamp(1, self.max_page_size.max(1))
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            field: key.to_string(),
            value: raw.clone(),
            reason: "not a valid number".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = TimelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.summary_max_chars, 140);
        assert_eq!(config.amendment_scan_limit, 1000);
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = TimelineConfig::from_lookup(lookup(&[
            ("LIFELINE_SUMMARY_MAX_CHARS", "80"),
            ("LIFELINE_CONSENT_SCOPE", "research"),
        ]))
        .unwrap();
        assert_eq!(config.summary_max_chars, 80);
        assert_eq!(config.consent_scope, "research");
        assert_eq!(config.default_page_size, DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let err = TimelineConfig::from_lookup(lookup(&[("LIFELINE_MAX_PAGE_SIZE", "lots")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_validate_page_sizes() {
        let config = TimelineConfig {
            default_page_size: 600,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_toml_partial() {
        let config = TimelineConfig::from_toml_str(
            r#"
            amendment_scan_limit = 25
            consent_scope = "clinic"
            "#,
        )
        .unwrap();
        assert_eq!(config.amendment_scan_limit, 25);
        assert_eq!(config.consent_scope, "clinic");
        assert_eq!(config.summary_max_chars, DEFAULT_SUMMARY_MAX_CHARS);
    }

    #[test]
    fn test_from_toml_rejects_zero_limit() {
        let err = TimelineConfig::from_toml_str("summary_max_chars = 0").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_page_size_clamps() {
        let config = TimelineConfig::default();
        assert_eq!(config.page_size(None), DEFAULT_PAGE_SIZE);
        assert_eq!(config.page_size(Some(0)), 1);
        assert_eq!(config.page_size(Some(10_000)), DEFAULT_MAX_PAGE_SIZE);

        let unvalidated = TimelineConfig {
            max_page_size: 0,
            ..Default::default()
        };
        assert_eq!(unvalidated.page_size(Some(7)), 1);
    }
}

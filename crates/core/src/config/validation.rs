//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::AppConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("missing required configuration: {field} ({hint})")]
    Missing { field: String, hint: String },
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid { field: field.into(), reason: reason.into() }
}

fn check_http_url(field: &str, value: &str) -> Result<(), ConfigError> {
    let parsed = url::Url::parse(value).map_err(|e| invalid(field, e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(invalid(field, format!("unsupported scheme: {other}"))),
    }
}

fn check_paths(field: &str, paths: &[String]) -> Result<(), ConfigError> {
    match paths.iter().find(|p| !p.starts_with('/')) {
        Some(bad) => Err(invalid(field, format!("path must start with '/': {bad}"))),
        None => Ok(()),
    }
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `fresh_timeout_ms` is below 10ms or `network_timeout_ms` below 100ms
    /// - either timeout exceeds 5 minutes
    /// - `app_name`, `cache_version` or `user_agent` is empty or contains whitespace
    /// - `origin` or `alternate_base_url` is not an http(s) URL
    /// - a path in `never_cache` or `static_assets` does not start with `/`
    /// - an `external_cache_patterns` entry is not a valid regex
    ///
    /// Returns `ConfigError::Missing` if `canonical_hosts` is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fresh_timeout_ms < 10 {
            return Err(invalid("fresh_timeout_ms", "must be at least 10ms"));
        }
        if self.fresh_timeout_ms > 300_000 {
            return Err(invalid("fresh_timeout_ms", "must not exceed 5 minutes (300000ms)"));
        }
        if self.network_timeout_ms < 100 {
            return Err(invalid("network_timeout_ms", "must be at least 100ms"));
        }
        if self.network_timeout_ms > 300_000 {
            return Err(invalid("network_timeout_ms", "must not exceed 5 minutes (300000ms)"));
        }

        for (field, value) in [
            ("app_name", &self.app_name),
            ("cache_version", &self.cache_version),
            ("user_agent", &self.user_agent),
        ] {
            if value.is_empty() {
                return Err(invalid(field, "must not be empty"));
            }
            if field != "user_agent" && value.chars().any(char::is_whitespace) {
                return Err(invalid(field, "must not contain whitespace"));
            }
        }

        check_http_url("origin", &self.origin)?;
        if let Some(alternate) = &self.alternate_base_url {
            check_http_url("alternate_base_url", alternate)?;
        }

        if self.canonical_hosts.is_empty() {
            return Err(ConfigError::Missing {
                field: "canonical_hosts".into(),
                hint: "Set STASH_CANONICAL_HOSTS, e.g. [\"example.org\", \"www.example.org\"]".into(),
            });
        }

        check_paths("never_cache", &self.never_cache)?;
        check_paths("static_assets", &self.static_assets)?;

        for pattern in &self.external_cache_patterns {
            regex::Regex::new(pattern).map_err(|e| invalid("external_cache_patterns", e.to_string()))?;
        }

        if !self.static_assets.is_empty() && self.precache_paths().is_empty() {
            tracing::warn!(
                static_assets = self.static_assets.len(),
                "Every static asset is also listed in never_cache; \
                 the static store will be created empty"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_fresh_timeout_too_small() {
        let config = AppConfig { fresh_timeout_ms: 5, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "fresh_timeout_ms"));
    }

    #[test]
    fn test_validate_network_timeout_exceeds_limit() {
        let config = AppConfig { network_timeout_ms: 301_000, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "network_timeout_ms"));
    }

    #[test]
    fn test_validate_empty_app_name() {
        let config = AppConfig { app_name: String::new(), ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "app_name"));
    }

    #[test]
    fn test_validate_version_with_whitespace() {
        let config = AppConfig { cache_version: "1 0".into(), ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "cache_version"));
    }

    #[test]
    fn test_validate_bad_origin() {
        let config = AppConfig { origin: "ftp://wraven.org".into(), ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "origin"));
    }

    #[test]
    fn test_validate_relative_path() {
        let config = AppConfig { never_cache: vec!["index.html".into()], ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "never_cache"));
    }

    #[test]
    fn test_validate_bad_regex() {
        let config = AppConfig { external_cache_patterns: vec!["fonts\\.(".into()], ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "external_cache_patterns"));
    }

    #[test]
    fn test_validate_missing_canonical_hosts() {
        let config = AppConfig { canonical_hosts: Vec::new(), ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Missing { .. })));
    }

    #[test]
    fn test_validate_alternate_disabled() {
        let config = AppConfig { alternate_base_url: None, fresh_timeout_ms: 10, ..Default::default() };
        assert!(config.validate().is_ok());
    }
}

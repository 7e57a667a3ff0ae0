//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (STASH_*)
//! 2. TOML config file (if STASH_CONFIG_FILE set)
//! 3. Built-in defaults
//!
//! The loaded value is read-only for the lifetime of the worker. The engine
//! compiles it once into a routing table and never mutates it.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::ConfigError;

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (STASH_*)
/// 2. TOML config file (if STASH_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to SQLite cache database.
    ///
    /// Set via STASH_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// User-Agent string for HTTP requests.
    ///
    /// Set via STASH_USER_AGENT environment variable.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Application namespace; every store name starts with `<app_name>-`.
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Version tag of the current stores. Bumping it supersedes the old stores
    /// at the next activation.
    #[serde(default = "default_cache_version")]
    pub cache_version: String,

    /// Base URL of the site. Manifest paths are resolved against it.
    #[serde(default = "default_origin")]
    pub origin: String,

    /// Hostnames considered the site's own (apex and `www` variant).
    #[serde(default = "default_canonical_hosts")]
    pub canonical_hosts: Vec<String>,

    /// Alternate access base URL advertised on canonical HTML responses.
    ///
    /// `None` disables the `Onion-Location` header.
    #[serde(default = "default_alternate_base_url")]
    pub alternate_base_url: Option<String>,

    /// Deadline for fresh-only fetches in milliseconds.
    ///
    /// Set via STASH_FRESH_TIMEOUT_MS environment variable.
    #[serde(default = "default_fresh_timeout_ms")]
    pub fresh_timeout_ms: u64,

    /// Overall HTTP request timeout in milliseconds for every other fetch.
    ///
    /// Set via STASH_NETWORK_TIMEOUT_MS environment variable.
    #[serde(default = "default_network_timeout_ms")]
    pub network_timeout_ms: u64,

    /// Exact paths that are always fetched fresh and never written to a store.
    #[serde(default = "default_never_cache")]
    pub never_cache: Vec<String>,

    /// Paths pre-populated into the static store at install time.
    #[serde(default = "default_static_assets")]
    pub static_assets: Vec<String>,

    /// Regular expressions matched against the request hostname to grant
    /// network-first caching to third-party resources.
    #[serde(default = "default_external_cache_patterns")]
    pub external_cache_patterns: Vec<String>,

    /// URL schemes that bypass the engine entirely.
    #[serde(default = "default_excluded_schemes")]
    pub excluded_schemes: Vec<String>,

    /// Activate right after install instead of waiting for SKIP_WAITING.
    #[serde(default = "default_true")]
    pub skip_waiting_on_install: bool,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./stash-cache.sqlite")
}

fn default_user_agent() -> String {
    "stash/0.1".into()
}

fn default_app_name() -> String {
    "wraven".into()
}

fn default_cache_version() -> String {
    "1.0.0".into()
}

fn default_origin() -> String {
    "https://wraven.org".into()
}

fn default_canonical_hosts() -> Vec<String> {
    vec!["wraven.org".into(), "www.wraven.org".into()]
}

fn default_alternate_base_url() -> Option<String> {
    Some("http://fxyk2rjld5uqnkpqazbgt6w6yvq27vejjrg3brgtcdl3dm2bmq5c4nyd.onion".into())
}

fn default_fresh_timeout_ms() -> u64 {
    5_000
}

fn default_network_timeout_ms() -> u64 {
    20_000
}

fn default_never_cache() -> Vec<String> {
    ["/", "/index.html", "/script.js", "/styles.css"].map(String::from).to_vec()
}

fn default_static_assets() -> Vec<String> {
    [
        "/",
        "/index.html",
        "/styles.css",
        "/script.js",
        "/manifest.json",
        "/imgs/littlelogo.png",
        "/imgs/icon-192x192.png",
        "/imgs/icon-512x512.png",
        "/imgs/widelogo.png",
        "/imgs/og-image.png",
    ]
    .map(String::from)
    .to_vec()
}

fn default_external_cache_patterns() -> Vec<String> {
    [r"fonts\.googleapis\.com", r"fonts\.gstatic\.com", r"api\.ipify\.org"]
        .map(String::from)
        .to_vec()
}

fn default_excluded_schemes() -> Vec<String> {
    vec!["chrome-extension".into()]
}

fn default_true() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            user_agent: default_user_agent(),
            app_name: default_app_name(),
            cache_version: default_cache_version(),
            origin: default_origin(),
            canonical_hosts: default_canonical_hosts(),
            alternate_base_url: default_alternate_base_url(),
            fresh_timeout_ms: default_fresh_timeout_ms(),
            network_timeout_ms: default_network_timeout_ms(),
            never_cache: default_never_cache(),
            static_assets: default_static_assets(),
            external_cache_patterns: default_external_cache_patterns(),
            excluded_schemes: default_excluded_schemes(),
            skip_waiting_on_install: true,
        }
    }
}

impl AppConfig {
    /// Fresh-only deadline as Duration.
    pub fn fresh_timeout(&self) -> Duration {
        Duration::from_millis(self.fresh_timeout_ms)
    }

    /// General request timeout as Duration for use with reqwest.
    pub fn network_timeout(&self) -> Duration {
        Duration::from_millis(self.network_timeout_ms)
    }

    /// Prefix shared by every store this application owns, across versions.
    pub fn namespace_prefix(&self) -> String {
        format!("{}-", self.app_name)
    }

    /// `<app>-static-v<version>`
    pub fn static_store_name(&self) -> String {
        format!("{}-static-v{}", self.app_name, self.cache_version)
    }

    /// `<app>-dynamic-v<version>`
    pub fn dynamic_store_name(&self) -> String {
        format!("{}-dynamic-v{}", self.app_name, self.cache_version)
    }

    /// Manifest entries that are actually pre-populated: the manifest minus the never-cache list.
    pub fn precache_paths(&self) -> Vec<&str> {
        self.static_assets
            .iter()
            .filter(|path| !self.never_cache.contains(path))
            .map(String::as_str)
            .collect()
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `STASH_`
    /// 2. TOML file from `STASH_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("STASH_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("STASH_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}

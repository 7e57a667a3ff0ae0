//! Request classification.
//!
//! Maps every intercepted request to a [`Route`]: either a bypass (the engine
//! stays out of the way) or one of the caching policies. Rules are evaluated
//! in a fixed order and the first match wins:
//!
//! 1. site path in the never-cache list → fresh only
//! 2. host matches an external-cache pattern → network first (dynamic store)
//! 3. site path in the static manifest → cache first (static store)
//! 4. anything else → network first (dynamic store)
//!
//! Path rules only apply to the canonical hosts; the configured paths describe
//! the site itself, not third-party hosts that happen to serve the same path.

use std::collections::HashSet;
use std::fmt;

use http::Method;
use regex::RegexSet;
use stash_core::{AppConfig, ConfigError, Request};

/// Caching policy chosen for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachePolicy {
    /// Always go to the network with a deadline; never write the response.
    FreshOnly,
    /// Network, then the named store on failure.
    NetworkFirst { store: String },
    /// The named store, revalidated in the background on a hit.
    CacheFirst { store: String },
}

impl CachePolicy {
    pub fn name(&self) -> &'static str {
        match self {
            CachePolicy::FreshOnly => "fresh_only",
            CachePolicy::NetworkFirst { .. } => "network_first",
            CachePolicy::CacheFirst { .. } => "cache_first",
        }
    }
}

/// Why a request bypasses the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BypassReason {
    Method(Method),
    Scheme(String),
}

impl fmt::Display for BypassReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BypassReason::Method(method) => write!(f, "method {method} is not intercepted"),
            BypassReason::Scheme(scheme) => write!(f, "scheme {scheme} is excluded"),
        }
    }
}

/// Outcome of classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Bypass(BypassReason),
    Handle(CachePolicy),
}

/// Immutable routing rules compiled from [`AppConfig`].
#[derive(Debug)]
pub struct RoutingTable {
    never_cache: HashSet<String>,
    static_assets: HashSet<String>,
    external_hosts: RegexSet,
    excluded_schemes: HashSet<String>,
    canonical_hosts: HashSet<String>,
    static_store: String,
    dynamic_store: String,
}

impl RoutingTable {
    /// Compile the routing rules.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if an external-cache pattern is not a valid regex.
    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        let external_hosts = RegexSet::new(&config.external_cache_patterns).map_err(|e| ConfigError::Invalid {
            field: "external_cache_patterns".into(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            never_cache: config.never_cache.iter().cloned().collect(),
            static_assets: config.static_assets.iter().cloned().collect(),
            external_hosts,
            excluded_schemes: config.excluded_schemes.iter().map(|s| s.to_ascii_lowercase()).collect(),
            canonical_hosts: config.canonical_hosts.iter().map(|h| h.to_ascii_lowercase()).collect(),
            static_store: config.static_store_name(),
            dynamic_store: config.dynamic_store_name(),
        })
    }

    pub fn static_store(&self) -> &str {
        &self.static_store
    }

    pub fn dynamic_store(&self) -> &str {
        &self.dynamic_store
    }

    pub fn is_canonical_host(&self, host: &str) -> bool {
        self.canonical_hosts.contains(host)
    }

    /// Pick the route for a request.
    pub fn classify(&self, request: &Request) -> Route {
        if *request.method() != Method::GET {
            return Route::Bypass(BypassReason::Method(request.method().clone()));
        }

        let scheme = request.url().scheme();
        if self.excluded_schemes.contains(scheme) {
            return Route::Bypass(BypassReason::Scheme(scheme.to_string()));
        }

        let host = request.host().unwrap_or_default();
        let path = request.path();
        let site = self.is_canonical_host(host);

        if site && self.never_cache.contains(path) {
            return Route::Handle(CachePolicy::FreshOnly);
        }

        if self.external_hosts.is_match(host) {
            return Route::Handle(CachePolicy::NetworkFirst { store: self.dynamic_store.clone() });
        }

        if site && self.static_assets.contains(path) {
            return Route::Handle(CachePolicy::CacheFirst { store: self.static_store.clone() });
        }

        Route::Handle(CachePolicy::NetworkFirst { store: self.dynamic_store.clone() })
    }
}

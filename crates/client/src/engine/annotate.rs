//! Alternate-location annotation for site HTML.
//!
//! HTML served for the canonical hosts gets an `Onion-Location` header
//! pointing at the same path and query on the alternate base URL. Every
//! other response passes through untouched.

use std::collections::HashSet;

use http::{HeaderName, HeaderValue};
use stash_core::{AppConfig, Response};
use url::Url;

pub const ONION_LOCATION: HeaderName = HeaderName::from_static("onion-location");

/// Post-processor adding the alternate access location.
#[derive(Debug, Clone)]
pub struct AlternateLocation {
    base: Option<String>,
    canonical_hosts: HashSet<String>,
}

impl AlternateLocation {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            base: config.alternate_base_url.as_ref().map(|b| b.trim_end_matches('/').to_string()),
            canonical_hosts: config.canonical_hosts.iter().map(|h| h.to_ascii_lowercase()).collect(),
        }
    }

    /// Header value for a URL: alternate base + path + `?query` when present.
    fn location_for(&self, base: &str, url: &Url) -> String {
        match url.query() {
            Some(query) if !query.is_empty() => format!("{base}{}?{query}", url.path()),
            _ => format!("{base}{}", url.path()),
        }
    }

    /// Consume a response and return either it or an annotated copy.
    pub fn apply(&self, response: Response, url: &Url) -> Response {
        let Some(base) = &self.base else {
            return response;
        };

        let canonical = url.host_str().is_some_and(|host| self.canonical_hosts.contains(host));
        let html = response.content_type().is_some_and(|ct| ct.contains("text/html"));
        if !canonical || !html {
            return response;
        }

        let value = match HeaderValue::from_str(&self.location_for(base, url)) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "cannot build Onion-Location header");
                return response;
            }
        };

        let (status, mut headers, body, source) = response.into_parts();
        headers.insert(ONION_LOCATION, value);
        Response::from_parts(status, headers, body, source)
    }
}

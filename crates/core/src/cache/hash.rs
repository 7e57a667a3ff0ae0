//! Request-identity cache key generation.

use http::Method;
use sha2::{Digest, Sha256};
use url::Url;

/// Compute the cache key for a request: SHA-256 over method and URL.
///
/// The URL is expected without fragment; [`Request`](crate::model::Request)
/// strips it on construction.
pub fn request_key(method: &Method, url: &Url) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.as_str().as_bytes());
    hasher.update(b"\n");
    hasher.update(url.as_str().as_bytes());
    hex::encode(hasher.finalize())
}

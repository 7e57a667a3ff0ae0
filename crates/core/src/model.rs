//! Request and response model shared by the cache registry and the engine.
//!
//! A [`Response`] owns its body and is not `Clone`: any path that needs to
//! both store and return a response calls [`Response::duplicate`] first.

use std::borrow::Cow;

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::Error;

/// What the requester intends to do with the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    /// Top-level navigation to a document.
    Document,
    /// Any sub-resource load (script, stylesheet, image, API call).
    Subresource,
}

impl Destination {
    /// Guess the destination from the URL when the caller did not say.
    ///
    /// The site root and anything that looks like an `.html` page count as
    /// navigations.
    pub fn infer(url: &Url) -> Self {
        let path = url.path();
        if path == "/" || path.contains(".html") { Destination::Document } else { Destination::Subresource }
    }
}

/// An intercepted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    method: Method,
    url: Url,
    destination: Destination,
}

impl Request {
    /// Build a request. The URL fragment is dropped since it never reaches the network.
    pub fn new(method: Method, mut url: Url, destination: Destination) -> Self {
        url.set_fragment(None);
        Self { method, url, destination }
    }

    /// A GET request whose destination is inferred from the URL.
    pub fn get(url: Url) -> Self {
        let destination = Destination::infer(&url);
        Self::new(Method::GET, url, destination)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn destination(&self) -> Destination {
        self.destination
    }

    pub fn is_navigation(&self) -> bool {
        self.destination == Destination::Document
    }

    pub fn path(&self) -> &str {
        self.url.path()
    }

    pub fn host(&self) -> Option<&str> {
        self.url.host_str()
    }
}

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
    Network,
    Cache,
    Synthesized,
}

/// An owned, single-consumption HTTP response.
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    source: ResponseSource,
}

impl Response {
    /// A response received from the network.
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self { status, headers, body: body.into(), source: ResponseSource::Network }
    }

    /// The minimal notice served to navigations when neither network nor cache can answer.
    pub fn offline_notice(app_name: &str) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        let body = format!("{} - Service temporarily unavailable", app_name.to_uppercase());
        Self { status: StatusCode::SERVICE_UNAVAILABLE, headers, body: body.into(), source: ResponseSource::Synthesized }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn source(&self) -> ResponseSource {
        self.source
    }

    /// True for 2xx statuses, the only ones ever written to a store.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    /// Body decoded as UTF-8, lossily.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Produce an independently owned copy. `Bytes` shares the buffer, so this is cheap.
    pub fn duplicate(&self) -> Self {
        Self { status: self.status, headers: self.headers.clone(), body: self.body.clone(), source: self.source }
    }

    pub fn into_parts(self) -> (StatusCode, HeaderMap, Bytes, ResponseSource) {
        (self.status, self.headers, self.body, self.source)
    }

    pub fn from_parts(status: StatusCode, headers: HeaderMap, body: Bytes, source: ResponseSource) -> Self {
        Self { status, headers, body, source }
    }
}

/// Encode headers as a JSON array of `[name, bytes]` pairs, preserving repeats,
/// order and non-UTF-8 values.
pub fn encode_headers(headers: &HeaderMap) -> Result<String, Error> {
    let pairs: Vec<(&str, &[u8])> = headers.iter().map(|(name, value)| (name.as_str(), value.as_bytes())).collect();
    serde_json::to_string(&pairs).map_err(|e| Error::CorruptEntry(e.to_string()))
}

/// Inverse of [`encode_headers`].
pub fn decode_headers(json: &str) -> Result<HeaderMap, Error> {
    let pairs: Vec<(String, Vec<u8>)> = serde_json::from_str(json).map_err(|e| Error::CorruptEntry(e.to_string()))?;
    let mut headers = HeaderMap::with_capacity(pairs.len());
    for (name, value) in pairs {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| Error::CorruptEntry(e.to_string()))?;
        let value = HeaderValue::from_bytes(&value).map_err(|e| Error::CorruptEntry(e.to_string()))?;
        headers.append(name, value);
    }
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_destination_infer() {
        assert_eq!(Destination::infer(&url("https://wraven.org/")), Destination::Document);
        assert_eq!(Destination::infer(&url("https://wraven.org/about.html")), Destination::Document);
        assert_eq!(Destination::infer(&url("https://wraven.org/styles.css")), Destination::Subresource);
    }

    #[test]
    fn test_request_drops_fragment() {
        let req = Request::get(url("https://wraven.org/page.html#top"));
        assert_eq!(req.url().as_str(), "https://wraven.org/page.html");
        assert!(req.is_navigation());
        assert_eq!(req.method(), &Method::GET);
    }

    #[test]
    fn test_duplicate_is_independent() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/css"));
        let original = Response::new(StatusCode::OK, headers, "body{}");
        let copy = original.duplicate();

        let (status, mut headers, body, _) = original.into_parts();
        headers.insert("x-extra", HeaderValue::from_static("1"));

        assert_eq!(copy.status(), status);
        assert_eq!(copy.body(), &body);
        assert!(copy.headers().get("x-extra").is_none());
    }

    #[test]
    fn test_offline_notice() {
        let resp = Response::offline_notice("wraven");
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(resp.content_type(), Some("text/plain"));
        assert_eq!(resp.text(), "WRAVEN - Service temporarily unavailable");
        assert_eq!(resp.source(), ResponseSource::Synthesized);
    }

    #[test]
    fn test_headers_json_keeps_repeats() {
        let mut headers = HeaderMap::new();
        headers.append(header::SET_COOKIE, HeaderValue::from_static("a=1"));
        headers.append(header::SET_COOKIE, HeaderValue::from_static("b=2"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8"));

        let decoded = decode_headers(&encode_headers(&headers).unwrap()).unwrap();
        assert_eq!(decoded.get_all(header::SET_COOKIE).iter().count(), 2);
        assert_eq!(decoded.get(header::CONTENT_TYPE).unwrap(), "text/html; charset=utf-8");
    }

    #[test]
    fn test_decode_headers_rejects_garbage() {
        assert!(matches!(decode_headers("not json"), Err(Error::CorruptEntry(_))));
        assert!(matches!(decode_headers(r#"[["bad name", [120]]]"#), Err(Error::CorruptEntry(_))));
        assert!(matches!(decode_headers(r#"[["x-ok", [10]]]"#), Err(Error::CorruptEntry(_))));
    }

    #[test]
    fn test_headers_json_keeps_opaque_bytes() {
        let mut headers = HeaderMap::new();
        headers.insert("x-latin", HeaderValue::from_bytes(b"caf\xe9").unwrap());

        let decoded = decode_headers(&encode_headers(&headers).unwrap()).unwrap();
        assert_eq!(decoded.get("x-latin").unwrap().as_bytes(), b"caf\xe9");
    }
}

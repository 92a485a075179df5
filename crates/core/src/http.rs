//! Request and response types at the engine boundary.
//!
//! These are deliberately transport-agnostic: the network client converts
//! to and from them, and the store persists `Response` byte-for-byte.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::Error;
use crate::store::hash::compute_request_key;

/// Declared destination of a request, as a host would report it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
    Document,
    Image,
    Script,
    Style,
    Font,
    Manifest,
    Worker,
    /// `fetch()`/XHR style request with no specific destination.
    Empty,
}

impl FromStr for Destination {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "document" => Ok(Self::Document),
            "image" => Ok(Self::Image),
            "script" => Ok(Self::Script),
            "style" => Ok(Self::Style),
            "font" => Ok(Self::Font),
            "manifest" => Ok(Self::Manifest),
            "worker" => Ok(Self::Worker),
            "" | "empty" => Ok(Self::Empty),
            other => Err(Error::InvalidInput(format!("unknown destination: {other}"))),
        }
    }
}

/// An inbound resource request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRequest {
    /// Upper-case HTTP method.
    pub method: String,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub destination: Option<Destination>,
    pub body: Option<Vec<u8>>,
}

impl ResourceRequest {
    /// Create a GET request with no headers.
    pub fn get(url: Url) -> Self {
        Self { method: "GET".to_string(), url, headers: Vec::new(), destination: None, body: None }
    }

    /// Create a request with an arbitrary method.
    pub fn new(method: &str, url: Url) -> Self {
        Self { method: method.trim().to_ascii_uppercase(), ..Self::get(url) }
    }

    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destination = Some(destination);
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    pub fn is_get(&self) -> bool {
        self.method == "GET"
    }

    /// Case-insensitive header lookup (first match).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Key under which this request's response is cached: `(method, url)`.
    ///
    /// The fragment never reaches the server, so it is not part of the key.
    pub fn cache_key(&self) -> String {
        let mut url = self.url.clone();
        url.set_fragment(None);
        compute_request_key(&self.method, url.as_str())
    }
}

impl fmt::Display for ResourceRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// A captured or synthesized response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub status: u16,
    /// Header pairs in the order they were received.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16, headers: Vec<(String, String)>, body: Vec<u8>) -> Self {
        Self { status, headers, body }
    }

    /// Plain response with a single content-type header.
    pub fn with_content_type(status: u16, content_type: &str, body: impl Into<Vec<u8>>) -> Self {
        Self::new(status, vec![("content-type".to_string(), content_type.to_string())], body.into())
    }

    /// JSON response serialized from a value.
    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        Self::with_content_type(status, "application/json", value.to_string())
    }

    /// Terminal error response used when no cache or fallback applies.
    pub fn terminal_error(status: u16, message: &str) -> Self {
        Self::with_content_type(status, "text/plain; charset=utf-8", message)
    }

    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_server_error(&self) -> bool {
        self.status >= 500
    }

    /// Case-insensitive header lookup (first match).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_method_normalized() {
        let req = ResourceRequest::new(" post ", url("https://example.com/a"));
        assert_eq!(req.method, "POST");
        assert!(!req.is_get());
    }

    #[test]
    fn test_header_lookup_case_insensitive() {
        let req = ResourceRequest::get(url("https://example.com/")).with_header("Accept", "text/html");
        assert_eq!(req.header("accept"), Some("text/html"));
        assert_eq!(req.header("x-missing"), None);
    }

    #[test]
    fn test_cache_key_depends_on_method() {
        let get = ResourceRequest::get(url("https://example.com/a"));
        let head = ResourceRequest::new("HEAD", url("https://example.com/a"));
        assert_ne!(get.cache_key(), head.cache_key());
        assert_eq!(get.cache_key(), ResourceRequest::get(url("https://example.com/a")).cache_key());
    }

    #[test]
    fn test_cache_key_ignores_fragment() {
        let plain = ResourceRequest::get(url("https://example.com/app.js"));
        let anchored = ResourceRequest::get(url("https://example.com/app.js#x"));
        assert_eq!(plain.cache_key(), anchored.cache_key());
    }

    #[test]
    fn test_destination_parse() {
        assert_eq!("Image".parse::<Destination>().unwrap(), Destination::Image);
        assert_eq!("".parse::<Destination>().unwrap(), Destination::Empty);
        assert!("video".parse::<Destination>().is_err());
    }

    #[test]
    fn test_response_success_range() {
        assert!(Response::terminal_error(204, "").is_success());
        assert!(!Response::terminal_error(304, "").is_success());
        assert!(!Response::terminal_error(404, "").is_success());
        assert!(Response::terminal_error(503, "").is_server_error());
    }

    #[test]
    fn test_json_response_content_type() {
        let resp = Response::json(503, &serde_json::json!({"code": "OFFLINE"}));
        assert_eq!(resp.header("Content-Type"), Some("application/json"));
        let body: serde_json::Value = serde_json::from_slice(&resp.body).unwrap();
        assert_eq!(body["code"], "OFFLINE");
    }
}

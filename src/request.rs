//! Request descriptors and stored responses.

use std::fmt;

use bytes::Bytes;
use reqwest::{Method, Url};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// An outgoing request as seen by the interception handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// HTTP method.
    pub method: Method,
    /// Absolute request URL.
    pub url: Url,
    /// Request headers forwarded to the network on a cache miss.
    pub headers: Vec<(String, String)>,
}

impl Request {
    /// Creates a request, resolving `target` against `origin` when it is relative.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUrl`] if either URL cannot be parsed.
    pub fn resolve(method: Method, origin: &str, target: &str) -> Result<Self> {
        Ok(Self {
            method,
            url: resolve_url(origin, target)?,
            headers: Vec::new(),
        })
    }

    /// Adds a header, forwarded to the network on a cache miss.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Returns the storage key identifying this request.
    #[must_use]
    pub fn key(&self) -> RequestKey {
        let mut url = self.url.clone();
        url.set_fragment(None);
        RequestKey {
            method: self.method.as_str().to_string(),
            url: url.into(),
        }
    }
}

/// Resolves `target` against `origin`. Absolute targets are returned as-is.
///
/// # Errors
///
/// Returns [`Error::InvalidUrl`] if either URL cannot be parsed.
pub fn resolve_url(origin: &str, target: &str) -> Result<Url> {
    let base = Url::parse(origin).map_err(|e| Error::InvalidUrl {
        url: origin.to_string(),
        reason: e.to_string(),
    })?;
    base.join(target).map_err(|e| Error::InvalidUrl {
        url: target.to_string(),
        reason: e.to_string(),
    })
}

/// Identity of a stored entry: method plus fragment-less URL.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestKey {
    pub method: String,
    pub url: String,
}

impl RequestKey {
    /// Only `GET` entries are ever stored or matched.
    #[must_use]
    pub fn is_get(&self) -> bool {
        self.method == Method::GET.as_str()
    }

    /// Hex SHA-256 of the key, used as a file name by disk storage.
    #[must_use]
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.method.as_bytes());
        hasher.update(b" ");
        hasher.update(self.url.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// A complete response, either fresh from the network or read from a bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredResponse {
    /// Final URL of the response.
    pub url: String,
    /// HTTP status code.
    pub status: u16,
    /// Response headers in received order.
    pub headers: Vec<(String, String)>,
    /// Full response body.
    pub body: Bytes,
}

impl StoredResponse {
    /// Whether the status is in the 2xx range.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Returns the first header value matching `name`, case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

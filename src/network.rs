//! Live network access used on cache misses and during pre-caching.

use async_trait::async_trait;

use crate::config::NetworkConfig;
use crate::error::Result;
use crate::request::{Request, StoredResponse};

/// Performs a single live request.
///
/// Any HTTP response, whatever its status, is `Ok`. Only transport failures
/// are errors.
#[async_trait]
pub trait Network: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<StoredResponse>;
}

/// [`Network`] backed by a pooled `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpNetwork {
    client: reqwest::Client,
}

impl HttpNetwork {
    /// Builds a client from the given settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialised.
    pub fn new(config: &NetworkConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(config.pool_idle_timeout())
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .tcp_keepalive(config.tcp_keepalive())
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { client })
    }

    /// Wraps an existing client.
    #[must_use]
    pub const fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &Request) -> Result<StoredResponse> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let url = response.url().to_string();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response.bytes().await?;

        log::debug!("{} {} -> {status}", request.method, request.url);
        Ok(StoredResponse {
            url,
            status,
            headers,
            body,
        })
    }
}

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use crate::config::GatewayConfig;
use crate::error::LoaderError;

/// Placeholder replaced by the percent-encoded feed URL in proxy templates.
pub const URL_PLACEHOLDER: &str = "{url}";

/// Retrieves raw feed payloads. Implementations own transport concerns
/// (proxying, timeouts); callers only see `LoaderError::Network` on failure.
#[async_trait]
pub trait FetchGateway: Send + Sync {
    async fn fetch_raw(&self, feed_url: &str) -> Result<Vec<u8>, LoaderError>;
}

#[async_trait]
impl<G: FetchGateway + ?Sized> FetchGateway for Arc<G> {
    async fn fetch_raw(&self, feed_url: &str) -> Result<Vec<u8>, LoaderError> {
        (**self).fetch_raw(feed_url).await
    }
}

/// How a feed URL is turned into the URL actually requested.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ProxyStrategy {
    #[default]
    Direct,
    /// e.g. `https://api.allorigins.win/raw?url={url}`
    UrlTemplate(String),
}

impl ProxyStrategy {
    pub fn request_url(&self, feed_url: &str) -> String {
        match self {
            ProxyStrategy::Direct => feed_url.to_string(),
            ProxyStrategy::UrlTemplate(template) => {
                template.replace(URL_PLACEHOLDER, &urlencoding::encode(feed_url))
            }
        }
    }
}

pub struct HttpGateway {
    client: Client,
    proxy: ProxyStrategy,
}

impl HttpGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.as_str())
            .build()?;

        Ok(Self::with_client(client, config.proxy_strategy()))
    }

    pub fn with_client(client: Client, proxy: ProxyStrategy) -> Self {
        Self { client, proxy }
    }

    pub fn proxy(&self) -> &ProxyStrategy {
        &self.proxy
    }
}

#[async_trait]
impl FetchGateway for HttpGateway {
    async fn fetch_raw(&self, feed_url: &str) -> Result<Vec<u8>, LoaderError> {
        let url = self.proxy.request_url(feed_url);
        debug!("Requesting {} for feed {}", url, feed_url);

        let response = self.client.get(&url).send().await?;
        let response = response.error_for_status().map_err(|e| {
            warn!("Feed request for {} failed: {}", feed_url, e);
            LoaderError::from(e)
        })?;
        let bytes = response.bytes().await?;

        Ok(bytes.to_vec())
    }
}

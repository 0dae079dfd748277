use std::collections::HashSet;
use std::path::Path;

use anyhow::{bail, Context};
use serde::Deserialize;

use crate::gateway::{ProxyStrategy, URL_PLACEHOLDER};
use crate::registry::{FeedRegistry, FeedSource};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Address the HTTP server binds to
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default)]
    pub gateway: GatewayConfig,
    pub sites: Vec<SiteConfig>,
}

fn default_listen() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    "NewsLoader/1.0 (RSS Aggregator)".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct GatewayConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Proxy URL template containing `{url}`; feeds are fetched directly when absent
    #[serde(default)]
    pub proxy: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
            proxy: None,
        }
    }
}

impl GatewayConfig {
    pub fn proxy_strategy(&self) -> ProxyStrategy {
        match &self.proxy {
            Some(template) => ProxyStrategy::UrlTemplate(template.clone()),
            None => ProxyStrategy::Direct,
        }
    }
}

/// One news site: a label and its categories.
#[derive(Debug, Deserialize, Clone)]
pub struct SiteConfig {
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub default_category: Option<String>,
    pub categories: Vec<CategoryConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CategoryConfig {
    pub key: String,
    pub url: String,
    /// Overrides the site name in the attribution line
    #[serde(default)]
    pub label: Option<String>,
}

impl SiteConfig {
    pub fn registry(&self) -> anyhow::Result<FeedRegistry> {
        let sources = self.categories.iter().map(|c| {
            FeedSource::new(
                &c.key,
                &c.url,
                c.label.as_deref().unwrap_or(&self.name),
            )
        });
        FeedRegistry::new(sources).with_context(|| format!("site '{}'", self.slug))
    }

    /// The explicit default, or the first declared category.
    pub fn default_category(&self) -> Option<&str> {
        self.default_category
            .as_deref()
            .or_else(|| self.categories.first().map(|c| c.key.as_str()))
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        Self::from_str(&content)
    }

    /// Parse config from a TOML string (useful for testing)
    pub fn from_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn site(&self, slug: &str) -> Option<&SiteConfig> {
        self.sites.iter().find(|s| s.slug == slug)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if let Some(proxy) = &self.gateway.proxy {
            if !proxy.contains(URL_PLACEHOLDER) {
                bail!("gateway.proxy must contain {}", URL_PLACEHOLDER);
            }
        }

        let mut slugs = HashSet::new();
        for site in &self.sites {
            if !slugs.insert(site.slug.as_str()) {
                bail!("Duplicate site slug: {}", site.slug);
            }
            let registry = site.registry()?;
            if let Some(default) = &site.default_category {
                if !registry.contains(default) {
                    bail!(
                        "site '{}': default_category '{}' is not one of its categories",
                        site.slug,
                        default
                    );
                }
            }
        }
        Ok(())
    }
}

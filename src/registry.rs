use std::collections::HashMap;

use crate::error::{DuplicateCategory, LoaderError};

/// Where a category's articles come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSource {
    pub category_key: String,
    pub feed_url: String,
    /// Human-readable site name shown in the attribution line.
    pub source_label: String,
}

impl FeedSource {
    pub fn new(
        category_key: impl Into<String>,
        feed_url: impl Into<String>,
        source_label: impl Into<String>,
    ) -> Self {
        Self {
            category_key: category_key.into(),
            feed_url: feed_url.into(),
            source_label: source_label.into(),
        }
    }
}

/// Read-only mapping from category key to feed source, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct FeedRegistry {
    sources: Vec<FeedSource>,
    index: HashMap<String, usize>,
}

impl FeedRegistry {
    pub fn new(sources: impl IntoIterator<Item = FeedSource>) -> Result<Self, DuplicateCategory> {
        let mut registry = Self::default();
        for source in sources {
            if registry.index.contains_key(&source.category_key) {
                return Err(DuplicateCategory(source.category_key));
            }
            registry
                .index
                .insert(source.category_key.clone(), registry.sources.len());
            registry.sources.push(source);
        }
        Ok(registry)
    }

    pub fn resolve(&self, category_key: &str) -> Result<&FeedSource, LoaderError> {
        self.index
            .get(category_key)
            .map(|&i| &self.sources[i])
            .ok_or_else(|| LoaderError::UnknownCategory(category_key.to_string()))
    }

    pub fn contains(&self, category_key: &str) -> bool {
        self.index.contains_key(category_key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.sources.iter().map(|s| s.category_key.as_str())
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::renderer::RenderedCategory;

/// Session-lifetime memo of rendered categories. At most one entry per key;
/// `put` replaces wholesale. No eviction.
#[derive(Default)]
pub struct ContentCache {
    entries: RwLock<HashMap<String, Arc<RenderedCategory>>>,
}

impl ContentCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, category_key: &str) -> Option<Arc<RenderedCategory>> {
        self.entries.read().await.get(category_key).cloned()
    }

    pub async fn put(&self, category_key: &str, rendered: Arc<RenderedCategory>) {
        self.entries
            .write()
            .await
            .insert(category_key.to_string(), rendered);
    }

    pub async fn contains(&self, category_key: &str) -> bool {
        self.entries.read().await.contains_key(category_key)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

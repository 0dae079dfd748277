//! Case-insensitive substring filter over already-rendered cards. Never
//! touches the cache or the loader.

use crate::renderer::{NewsCard, RenderedCategory};

pub fn matches(card: &NewsCard, query: &str) -> bool {
    matches_lowercase(card, &query.to_lowercase())
}

fn matches_lowercase(card: &NewsCard, needle: &str) -> bool {
    card.title.to_lowercase().contains(needle) || card.description.to_lowercase().contains(needle)
}

/// Copy of `rendered` holding only the matching cards, in their original order.
pub fn filter(rendered: &RenderedCategory, query: &str) -> RenderedCategory {
    let needle = query.to_lowercase();
    RenderedCategory {
        category_key: rendered.category_key.clone(),
        source_label: rendered.source_label.clone(),
        cards: rendered
            .cards
            .iter()
            .filter(|card| matches_lowercase(card, &needle))
            .cloned()
            .collect(),
    }
}

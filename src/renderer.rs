use askama::Template;

use crate::parser::Article;

pub const MAX_DESCRIPTION_CHARS: usize = 150;
pub const CONTINUATION: &str = "...";

/// One display block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewsCard {
    pub title: String,
    pub description: String,
    pub link: String,
    /// e.g. "RTP - Mundo"
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Template)]
#[template(path = "news_cards.html")]
pub struct RenderedCategory {
    pub category_key: String,
    pub source_label: String,
    pub cards: Vec<NewsCard>,
}

impl RenderedCategory {
    pub fn to_html(&self) -> askama::Result<String> {
        Template::render(self)
    }
}

pub fn render(category_key: &str, articles: &[Article], source_label: &str) -> RenderedCategory {
    let source = format!("{} - {}", source_label, capitalize(category_key));

    let cards = articles
        .iter()
        .map(|article| NewsCard {
            title: article.title.clone(),
            description: truncate_description(&article.description),
            link: article.link.clone(),
            source: source.clone(),
        })
        .collect();

    RenderedCategory {
        category_key: category_key.to_string(),
        source_label: source_label.to_string(),
        cards,
    }
}

/// First [`MAX_DESCRIPTION_CHARS`] characters followed by [`CONTINUATION`].
pub fn truncate_description(description: &str) -> String {
    let mut truncated: String = description.chars().take(MAX_DESCRIPTION_CHARS).collect();
    truncated.push_str(CONTINUATION);
    truncated
}

/// Uppercases the first character only: "ultimaHora" -> "UltimaHora".
pub fn capitalize(key: &str) -> String {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

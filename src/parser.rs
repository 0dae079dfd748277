//! Feed payload to article records.
//!
//! RSS and Atom are both accepted; `<item>` and `<entry>` elements count as
//! articles. Only the first [`MAX_ARTICLES`] in document order are kept.

use feed_rs::model::Entry;
use feed_rs::parser;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::LoaderError;

pub const MAX_ARTICLES: usize = 25;

/// Link used when an item carries none.
pub const NO_LINK: &str = "#";

static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("tag pattern compiles"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Article {
    pub title: String,
    /// Plain text, markup removed
    pub description: String,
    pub link: String,
}

impl Article {
    fn from_entry(entry: Entry) -> Self {
        let title = entry.title.map(|t| t.content).unwrap_or_default();

        let description = entry
            .summary
            .map(|s| strip_tags(&s.content))
            .unwrap_or_default();

        let link = entry
            .links
            .into_iter()
            .map(|l| l.href)
            .find(|href| !href.is_empty())
            .unwrap_or_else(|| NO_LINK.to_string());

        Self {
            title,
            description,
            link,
        }
    }
}

pub fn parse(payload: &[u8]) -> Result<Vec<Article>, LoaderError> {
    let feed = parser::parse(payload)?;

    Ok(feed
        .entries
        .into_iter()
        .take(MAX_ARTICLES)
        .map(Article::from_entry)
        .collect())
}

/// Removes anything that looks like a markup tag, keeping the text between.
pub fn strip_tags(text: &str) -> String {
    TAG.replace_all(text, "").into_owned()
}

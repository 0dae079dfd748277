use std::sync::Arc;

use askama::Template;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use thiserror::Error;

use crate::config::Config;
use crate::error::LoaderError;
use crate::gateway::FetchGateway;
use crate::loader::{CategoryLoader, LogSink};
use crate::search;

pub type SiteLoader = CategoryLoader<Arc<dyn FetchGateway>, LogSink>;

/// One configured site and the loader that serves it.
pub struct Site {
    pub slug: String,
    pub name: String,
    pub default_category: String,
    pub loader: SiteLoader,
}

pub struct AppState {
    pub sites: Vec<Site>,
}

#[derive(Debug, Error)]
#[error("Unknown site: {0}")]
pub struct UnknownSite(pub String);

impl AppState {
    /// One loader per site, all sharing `gateway`.
    pub fn from_config(config: &Config, gateway: Arc<dyn FetchGateway>) -> anyhow::Result<Self> {
        let mut sites = Vec::with_capacity(config.sites.len());
        for site in &config.sites {
            let default_category = site
                .default_category()
                .ok_or_else(|| anyhow::anyhow!("Site '{}' has no categories", site.slug))?
                .to_string();

            sites.push(Site {
                slug: site.slug.clone(),
                name: site.name.clone(),
                default_category,
                loader: CategoryLoader::new(site.registry()?, gateway.clone(), LogSink),
            });
        }
        Ok(Self { sites })
    }

    fn site(&self, slug: &str) -> Result<&Site, AppError> {
        self.sites
            .iter()
            .find(|s| s.slug == slug)
            .ok_or_else(|| UnknownSite(slug.to_string()).into())
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/news/:site", get(site_default))
        .route("/news/:site/:category", get(category))
        .route("/news/:site/:category/search", get(search_category))
        .route("/status/:site", get(status))
        .with_state(state)
}

// Template structs
#[derive(Template)]
#[template(path = "index.html")]
pub struct IndexTemplate {
    pub sites: Vec<SiteLink>,
}

pub struct SiteLink {
    pub slug: String,
    pub name: String,
    pub categories: Vec<String>,
}

#[derive(Template)]
#[template(path = "category.html")]
pub struct CategoryTemplate {
    pub site_slug: String,
    pub site_name: String,
    pub categories: Vec<String>,
    pub active: String,
    pub query: String,
    pub cards_html: Option<String>,
    pub error: Option<String>,
}

// Wrapper for HTML responses
struct HtmlTemplate<T>(T);

impl<T: Template> IntoResponse for HtmlTemplate<T> {
    fn into_response(self) -> Response {
        match self.0.render() {
            Ok(html) => Html(html).into_response(),
            Err(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to render template: {}", err),
            )
                .into_response(),
        }
    }
}

pub struct AppError(anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let not_found = self.0.downcast_ref::<UnknownSite>().is_some()
            || matches!(
                self.0.downcast_ref::<LoaderError>(),
                Some(LoaderError::UnknownCategory(_))
            );
        let status = if not_found {
            StatusCode::NOT_FOUND
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };

        (status, format!("Error: {}", self.0)).into_response()
    }
}

impl<E: Into<anyhow::Error>> From<E> for AppError {
    fn from(err: E) -> Self {
        AppError(err.into())
    }
}

#[derive(Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

// Route handlers
pub async fn index(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let sites = state
        .sites
        .iter()
        .map(|site| SiteLink {
            slug: site.slug.clone(),
            name: site.name.clone(),
            categories: site.loader.registry().keys().map(String::from).collect(),
        })
        .collect();

    HtmlTemplate(IndexTemplate { sites })
}

pub async fn site_default(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<Response, AppError> {
    let site = state.site(&slug)?;
    show_category(site, &site.default_category, None).await
}

pub async fn category(
    State(state): State<Arc<AppState>>,
    Path((slug, key)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let site = state.site(&slug)?;
    show_category(site, &key, None).await
}

pub async fn search_category(
    State(state): State<Arc<AppState>>,
    Path((slug, key)): Path<(String, String)>,
    Query(query): Query<SearchQuery>,
) -> Result<Response, AppError> {
    let site = state.site(&slug)?;
    show_category(site, &key, Some(&query.q)).await
}

pub async fn status(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<String, AppError> {
    let site = state.site(&slug)?;
    Ok(site.loader.state().to_string())
}

pub async fn health() -> impl IntoResponse {
    Html("OK")
}

async fn show_category(site: &Site, key: &str, query: Option<&str>) -> Result<Response, AppError> {
    // Searches serve a cached category without touching loader state.
    let cached = match query {
        Some(_) => site.loader.cache().get(key).await,
        None => None,
    };
    let loaded = match cached {
        Some(rendered) => Ok(rendered),
        None => site.loader.load(key).await,
    };

    let mut page = CategoryTemplate {
        site_slug: site.slug.clone(),
        site_name: site.name.clone(),
        categories: site.loader.registry().keys().map(String::from).collect(),
        active: key.to_string(),
        query: query.unwrap_or_default().to_string(),
        cards_html: None,
        error: None,
    };

    match loaded {
        Ok(rendered) => {
            let html = match query {
                Some(q) => search::filter(&rendered, q).to_html()?,
                None => rendered.to_html()?,
            };
            page.cards_html = Some(html);
            Ok(HtmlTemplate(page).into_response())
        }
        Err(err) if err.kind().is_retryable() => {
            page.error = Some(err.to_string());
            Ok((StatusCode::BAD_GATEWAY, HtmlTemplate(page)).into_response())
        }
        Err(err) => Err(err.into()),
    }
}

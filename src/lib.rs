//! News Loader - per-category news feed loading
//!
//! Turns a category key into a cached, render-ready list of articles for a
//! set of news sites, each described by a feed registry. The binary serves
//! the loaded categories over HTTP.

pub mod cache;
pub mod config;
pub mod error;
pub mod gateway;
pub mod loader;
pub mod parser;
pub mod registry;
pub mod renderer;
pub mod routes;
pub mod search;

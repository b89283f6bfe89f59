//! Remote committees API access: catalog paging and transcript fetching.
//!
//! This crate provides:
//! - [`ApiClient`]: shared HTTP client with timeouts and bounded exponential backoff
//! - [`CatalogWalker`]: page-by-page listing of a committee's oral-evidence sessions
//! - [`DocumentFetcher`]: per-session transcript download, with "no document" as a normal outcome

pub mod client;
pub mod fetcher;
pub mod walker;

pub use client::ApiClient;
pub use fetcher::{DocumentFetcher, Fetch};
pub use walker::{CatalogPage, CatalogWalker};

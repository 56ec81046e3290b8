//! Search-side clients for Murmur.
//!
//! [`WindowFetcher`] is the seam the crawler depends on: given a query, a
//! time window and a result limit it returns the matching posts in the order
//! the source produced them. [`twitter::TwitterApi`] is the implementation
//! backed by the Twitter/X v2 recent-search endpoint.
use async_trait::async_trait;
use murmur_common::{Item, TimeWindow};
use murmur_http::HttpError;
use thiserror::Error;

pub mod twitter;

pub use twitter::TwitterApi;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("search request failed: {0}")]
    Http(#[from] HttpError),
    #[error("malformed search result {id}: {reason}")]
    Malformed { id: String, reason: String },
    #[error("cannot render search window: {0}")]
    Window(#[from] time::error::Format),
}

/// Resolves one window of search results.
///
/// An `Err` means nothing from this window may be used; implementations never
/// hand back a partial batch.
#[async_trait]
pub trait WindowFetcher: Send + Sync {
    async fn fetch(
        &self,
        query: &str,
        window: &TimeWindow,
        limit: u32,
    ) -> Result<Vec<Item>, FetchError>;
}

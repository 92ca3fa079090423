//! Turning a user-supplied page URL into a playlist URL (and, when the page
//! advertises one, a thumbnail reference).

mod page;

pub use page::PageExtractor;

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

use crate::fetch::FetchError;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("no stream found on {0}")]
    NotFound(String),

    #[error("failed to load page: {0}")]
    Fetch(#[from] FetchError),
}

/// What an extractor found on a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedStream {
    pub playlist_url: Url,
    /// URL or local path of a cover image
    pub thumbnail: Option<String>,
}

#[async_trait]
pub trait StreamExtractor: Send + Sync {
    async fn extract(&self, page_url: &Url) -> Result<ExtractedStream, ExtractError>;
}

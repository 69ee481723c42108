pub mod http_source;

use crate::model::PageResult;
use async_trait::async_trait;
use ticker_core::Result;

/// Which page to retrieve next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageRequest {
    /// First page, built from the configured catalog parameters.
    Catalog,
    /// Opaque cursor reported by the previous page.
    Next(String),
}

impl PageRequest {
    pub fn from_cursor(cursor: Option<String>) -> Self {
        match cursor {
            Some(cursor) => PageRequest::Next(cursor),
            None => PageRequest::Catalog,
        }
    }
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch one page of the catalog.
    ///
    /// Transport failures surface as `Error::Http`/`Error::HttpStatus`, a body
    /// without the results envelope as `Error::Protocol`.
    async fn fetch(&self, request: &PageRequest) -> Result<PageResult>;

    /// Get the source identifier
    fn source_id(&self) -> &str;
}

pub use http_source::HttpPageFetcher;

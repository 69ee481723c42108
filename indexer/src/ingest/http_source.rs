use super::{PageFetcher, PageRequest};
use crate::model::{PageResult, RawRecord};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use ticker_core::config::{SourceConfig, LEGACY_API_KEY_VAR};
use ticker_core::{Error, Result};
use tracing::{debug, instrument};

/// Upper bound on how much of an error body ends up in logs.
const MAX_ERROR_BODY_CHARS: usize = 512;

// Response envelope of the reference tickers endpoint
#[derive(Debug, Deserialize)]
struct Envelope {
    results: Option<Vec<RawRecord>>,
    next_url: Option<String>,
    status: Option<Value>,
    error: Option<Value>,
    message: Option<Value>,
    request_id: Option<Value>,
}

impl Envelope {
    fn describe(&self) -> String {
        let mut parts = Vec::new();
        for (label, value) in [
            ("status", &self.status),
            ("error", &self.error),
            ("message", &self.message),
            ("request_id", &self.request_id),
        ] {
            if let Some(value) = value {
                parts.push(format!("{}={}", label, value));
            }
        }
        if parts.is_empty() {
            "no diagnostic fields".to_string()
        } else {
            parts.join(", ")
        }
    }
}

pub struct HttpPageFetcher {
    client: Client,
    first_page: Url,
    api_key: String,
    source_id: String,
}

impl HttpPageFetcher {
    pub fn new(config: &SourceConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(Error::Config(format!(
                "source.api_key is required (or set {})",
                LEGACY_API_KEY_VAR
            )));
        }

        let mut first_page = Url::parse(&config.catalog_url).map_err(|e| {
            Error::Config(format!(
                "source.catalog_url '{}' is not a valid URL: {}",
                config.catalog_url, e
            ))
        })?;

        first_page
            .query_pairs_mut()
            .append_pair("market", &config.market)
            .append_pair("active", if config.active_only { "true" } else { "false" })
            .append_pair("order", &config.order)
            .append_pair("limit", &config.page_limit.to_string())
            .append_pair("sort", &config.sort);

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        let source_id = first_page.host_str().unwrap_or("catalog").to_string();

        Ok(Self {
            client,
            first_page,
            api_key: config.api_key.clone(),
            source_id,
        })
    }

    fn resolve(&self, request: &PageRequest) -> Result<Url> {
        match request {
            PageRequest::Catalog => Ok(self.first_page.clone()),
            PageRequest::Next(cursor) => Url::parse(cursor).map_err(|e| {
                Error::Protocol(format!("next_url '{}' is not an absolute URL: {}", cursor, e))
            }),
        }
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    #[instrument(skip(self), fields(source = %self.source_id))]
    async fn fetch(&self, request: &PageRequest) -> Result<PageResult> {
        let url = self.resolve(request)?;

        // Logged before the key is attached
        debug!(url = %url, "Requesting catalog page");

        let response = self
            .client
            .get(url)
            .query(&[("apiKey", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| Error::Http(e.without_url()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Http(e.without_url()))?;

        if !status.is_success() {
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }

        let envelope: Envelope = serde_json::from_str(&body)?;

        let diagnostics = envelope.describe();
        let Envelope {
            results, next_url, ..
        } = envelope;

        let records = results.ok_or_else(|| {
            Error::Protocol(format!("response is missing `results` ({})", diagnostics))
        })?;

        // An empty next_url marks the last page as well
        let next_cursor = next_url.filter(|url| !url.is_empty());

        debug!(
            records = records.len(),
            has_next = next_cursor.is_some(),
            "Received catalog page"
        );

        Ok(PageResult {
            records,
            next_cursor,
        })
    }

    fn source_id(&self) -> &str {
        &self.source_id
    }
}

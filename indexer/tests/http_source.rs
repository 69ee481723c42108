//! Page fetching against a mocked reference tickers endpoint.

use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use ticker_core::config::SourceConfig;
use ticker_core::{Config, Error, ErrorKind};
use ticker_indexer::accumulator::CatalogAccumulator;
use ticker_indexer::ingest::{HttpPageFetcher, PageFetcher, PageRequest};
use wiremock::{
    matchers::{method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

const CATALOG_PATH: &str = "/v3/reference/tickers";

fn source_config(base: &str) -> SourceConfig {
    let mut source = Config::default().source;
    source.catalog_url = format!("{}{}", base, CATALOG_PATH);
    source.api_key = "test-key".to_string();
    source.page_delay_ms = 0;
    source.request_timeout_secs = 5;
    source
}

fn tickers(records: &[serde_json::Map<String, serde_json::Value>]) -> Vec<&str> {
    records
        .iter()
        .map(|r| r["ticker"].as_str().unwrap())
        .collect()
}

#[tokio::test]
async fn walks_next_url_chain_with_api_key() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(CATALOG_PATH))
        .and(query_param("market", "stocks"))
        .and(query_param("active", "true"))
        .and(query_param("sort", "ticker"))
        .and(query_param("order", "asc"))
        .and(query_param("limit", "1000"))
        .and(query_param("apiKey", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "OK",
            "count": 2,
            "results": [
                {"ticker": "A", "name": "Agilent Technologies Inc.", "active": true},
                {"ticker": "AA", "name": "Alcoa Corporation", "active": true}
            ],
            "next_url": format!("{}{}?cursor=page2", server.uri(), CATALOG_PATH)
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(CATALOG_PATH))
        .and(query_param("cursor", "page2"))
        .and(query_param("apiKey", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "OK",
            "count": 1,
            "results": [{"ticker": "AAPL", "cik": "0000320193"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = Arc::new(HttpPageFetcher::new(&source_config(&server.uri())).unwrap());
    let accumulation = CatalogAccumulator::new(fetcher, Duration::ZERO)
        .accumulate()
        .await;

    assert!(accumulation.is_complete());
    assert_eq!(accumulation.pages_fetched, 2);
    assert_eq!(tickers(&accumulation.snapshot.records), vec!["A", "AA", "AAPL"]);
}

#[tokio::test]
async fn missing_results_is_protocol_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(CATALOG_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "ERROR",
            "request_id": "req-1",
            "error": "Unknown API Key"
        })))
        .mount(&server)
        .await;

    let fetcher = HttpPageFetcher::new(&source_config(&server.uri())).unwrap();
    let err = fetcher.fetch(&PageRequest::Catalog).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Protocol);
    assert!(err.to_string().contains("Unknown API Key"), "{}", err);
}

#[tokio::test]
async fn non_json_body_is_protocol_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let fetcher = HttpPageFetcher::new(&source_config(&server.uri())).unwrap();
    let err = fetcher.fetch(&PageRequest::Catalog).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Protocol);
    assert!(matches!(err, Error::Serialization(_)), "{}", err);
}

#[tokio::test]
async fn error_status_is_transport_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429).set_body_string("too many requests"))
        .mount(&server)
        .await;

    let fetcher = HttpPageFetcher::new(&source_config(&server.uri())).unwrap();
    let err = fetcher.fetch(&PageRequest::Catalog).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Transport);
    match err {
        Error::HttpStatus { status, body } => {
            assert_eq!(status, 429);
            assert_eq!(body, "too many requests");
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn empty_next_url_ends_pagination() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{"ticker": "ZZZ"}],
            "next_url": ""
        })))
        .mount(&server)
        .await;

    let fetcher = HttpPageFetcher::new(&source_config(&server.uri())).unwrap();
    let page = fetcher.fetch(&PageRequest::Catalog).await.unwrap();

    assert_eq!(page.records.len(), 1);
    assert_eq!(page.next_cursor, None);
}

#[test]
fn missing_api_key_is_configuration_error() {
    let mut source = source_config("http://127.0.0.1:9");
    source.api_key = "  ".to_string();

    let err = match HttpPageFetcher::new(&source) {
        Ok(_) => panic!("fetcher built without an API key"),
        Err(e) => e,
    };
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[tokio::test]
async fn malformed_cursor_is_protocol_error() {
    let server = MockServer::start().await;
    let fetcher = HttpPageFetcher::new(&source_config(&server.uri())).unwrap();

    let err = fetcher
        .fetch(&PageRequest::Next("not a url".into()))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Protocol);
}

#[tokio::test]
async fn connection_failure_does_not_leak_api_key() {
    // Nothing listens on the discard port
    let fetcher = HttpPageFetcher::new(&source_config("http://127.0.0.1:9")).unwrap();

    let err = fetcher.fetch(&PageRequest::Catalog).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(!err.to_string().contains("test-key"), "{}", err);
}

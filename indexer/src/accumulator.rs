use crate::ingest::{PageFetcher, PageRequest};
use crate::model::CatalogSnapshot;
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use ticker_core::Error;
use tracing::{debug, info, instrument, warn};

/// Where a pagination walk currently stands.
#[derive(Debug)]
pub enum AccumulatorState {
    /// Next page to request; `None` is the first catalog page.
    Fetching(Option<String>),
    Exhausted,
    Aborted(Error),
}

/// Terminal state of a walk.
#[derive(Debug)]
pub enum Termination {
    Exhausted,
    Aborted(Error),
}

/// Result of one walk: the records gathered so far and how the walk ended.
#[derive(Debug)]
pub struct Accumulation {
    pub snapshot: CatalogSnapshot,
    pub pages_fetched: usize,
    pub termination: Termination,
}

impl Accumulation {
    pub fn is_complete(&self) -> bool {
        matches!(self.termination, Termination::Exhausted)
    }
}

/// Walks the cursor chain until the source reports no further page.
pub struct CatalogAccumulator {
    fetcher: Arc<dyn PageFetcher>,
    page_delay: Duration,
}

impl CatalogAccumulator {
    pub fn new(fetcher: Arc<dyn PageFetcher>, page_delay: Duration) -> Self {
        Self {
            fetcher,
            page_delay,
        }
    }

    #[instrument(skip(self), fields(source = %self.fetcher.source_id()))]
    pub async fn accumulate(&self) -> Accumulation {
        let mut snapshot = CatalogSnapshot::default();
        let mut pages_fetched = 0usize;
        let mut state = AccumulatorState::Fetching(None);

        loop {
            state = match state {
                AccumulatorState::Fetching(cursor) => {
                    let request = PageRequest::from_cursor(cursor);
                    match self.fetcher.fetch(&request).await {
                        Ok(page) => {
                            pages_fetched += 1;
                            let page_records = page.records.len();
                            snapshot.extend(page.records);

                            counter!("ingest_pages_fetched_total").increment(1);
                            counter!("ingest_records_fetched_total").increment(page_records as u64);

                            debug!(
                                page = pages_fetched,
                                records = page_records,
                                total = snapshot.len(),
                                has_next = page.next_cursor.is_some(),
                                "Accumulated page"
                            );

                            match page.next_cursor {
                                Some(next) => {
                                    // Source enforces a request-rate ceiling
                                    tokio::time::sleep(self.page_delay).await;
                                    AccumulatorState::Fetching(Some(next))
                                }
                                None => AccumulatorState::Exhausted,
                            }
                        }
                        Err(e) => AccumulatorState::Aborted(e),
                    }
                }
                AccumulatorState::Exhausted => {
                    info!(
                        pages = pages_fetched,
                        records = snapshot.len(),
                        "Catalog exhausted"
                    );
                    return Accumulation {
                        snapshot,
                        pages_fetched,
                        termination: Termination::Exhausted,
                    };
                }
                AccumulatorState::Aborted(e) => {
                    warn!(
                        pages = pages_fetched,
                        partial_records = snapshot.len(),
                        kind = %e.kind(),
                        error = %e,
                        "Catalog walk aborted"
                    );
                    return Accumulation {
                        snapshot,
                        pages_fetched,
                        termination: Termination::Aborted(e),
                    };
                }
            };
        }
    }
}

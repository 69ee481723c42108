use crate::accumulator::{Accumulation, CatalogAccumulator, Termination};
use crate::model::{CatalogSnapshot, LoadOutcome, RunFailure, RunReport, Stage};
use crate::normalize::normalize_all;
use crate::sink::{SinkBatch, SinkInput, SinkWriter};
use metrics::{counter, histogram};
use std::sync::Arc;
use std::time::Instant;
use ticker_core::{Error, Result};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// One end-to-end catalog refresh: accumulate, normalize, load.
pub struct IngestionJob {
    accumulator: CatalogAccumulator,
    sink: Arc<dyn SinkWriter>,
    flush_partial: bool,
}

impl IngestionJob {
    pub fn new(accumulator: CatalogAccumulator, sink: Arc<dyn SinkWriter>, flush_partial: bool) -> Self {
        Self {
            accumulator,
            sink,
            flush_partial,
        }
    }

    /// Run the job once. Failures are captured in the report, never retried.
    pub async fn run_once(&self) -> RunReport {
        let run_id = Uuid::new_v4();
        let span = info_span!("ingest_run", %run_id, sink = %self.sink.identity());
        self.execute(run_id).instrument(span).await
    }

    async fn execute(&self, run_id: Uuid) -> RunReport {
        let started = Instant::now();
        info!("Starting catalog ingestion");

        let Accumulation {
            snapshot,
            pages_fetched,
            termination,
        } = self.accumulator.accumulate().await;

        let records_fetched = snapshot.len();
        let (load, failure) = match termination {
            Termination::Exhausted => match self.deliver(&snapshot, false).await {
                Ok(outcome) => (outcome, None),
                Err(e) => {
                    error!(
                        stage = %Stage::Load,
                        kind = %e.kind(),
                        error = %e,
                        "Run failed while loading catalog"
                    );
                    (Some(self.failed_outcome(&e)), Some(failure(Stage::Load, &e)))
                }
            },
            Termination::Aborted(e) => {
                error!(
                    stage = %Stage::Fetch,
                    kind = %e.kind(),
                    error = %e,
                    partial_records = records_fetched,
                    "Run aborted while fetching catalog"
                );
                let partial = self.flush_partial(&snapshot).await;
                (partial, Some(failure(Stage::Fetch, &e)))
            }
        };

        let report = RunReport {
            run_id,
            pages_fetched,
            records_fetched,
            load,
            failure,
        };

        let elapsed = started.elapsed();
        let outcome = if report.succeeded() { "success" } else { "failure" };
        counter!("ingest_runs_total", "outcome" => outcome).increment(1);
        histogram!("ingest_run_duration_seconds").record(elapsed.as_secs_f64());

        info!(
            outcome,
            pages = report.pages_fetched,
            records = report.records_fetched,
            rows_written = report.rows_written(),
            duration_ms = elapsed.as_millis() as u64,
            "Ingestion run finished"
        );

        report
    }

    /// Hand the snapshot to the sink in the shape it asks for.
    async fn deliver(&self, snapshot: &CatalogSnapshot, partial: bool) -> Result<Option<LoadOutcome>> {
        let rows;
        let batch = match self.sink.preferred_input() {
            SinkInput::RawRecords => SinkBatch::Raw(&snapshot.records),
            SinkInput::NormalizedRows => {
                rows = normalize_all(&snapshot.records);
                SinkBatch::Normalized(&rows)
            }
        };

        if partial {
            self.sink.write_partial(batch).await
        } else {
            self.sink.write(batch).await.map(Some)
        }
    }

    async fn flush_partial(&self, snapshot: &CatalogSnapshot) -> Option<LoadOutcome> {
        if !self.flush_partial || snapshot.is_empty() {
            return None;
        }

        match self.deliver(snapshot, true).await {
            Ok(Some(outcome)) => {
                warn!(
                    rows = outcome.rows_written,
                    sink = %outcome.sink_identity,
                    "Partial catalog flushed for inspection"
                );
                Some(outcome)
            }
            Ok(None) => {
                info!("Sink requires a complete catalog, partial records discarded");
                None
            }
            Err(e) => {
                error!(kind = %e.kind(), error = %e, "Failed to flush partial catalog");
                Some(self.failed_outcome(&e))
            }
        }
    }

    fn failed_outcome(&self, e: &Error) -> LoadOutcome {
        LoadOutcome {
            rows_written: 0,
            sink_identity: self.sink.identity(),
            error: Some(e.kind()),
        }
    }
}

fn failure(stage: Stage, e: &Error) -> RunFailure {
    RunFailure {
        stage,
        kind: e.kind(),
        reason: e.to_string(),
    }
}

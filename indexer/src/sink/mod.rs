pub mod snapshot;
pub mod warehouse;

use crate::model::{LoadOutcome, NormalizedRow, RawRecord};
use async_trait::async_trait;
use ticker_core::Result;

/// Shape of records a sink would rather receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkInput {
    RawRecords,
    NormalizedRows,
}

/// Records handed to a sink for one write.
#[derive(Debug, Clone, Copy)]
pub enum SinkBatch<'a> {
    Raw(&'a [RawRecord]),
    Normalized(&'a [NormalizedRow]),
}

impl SinkBatch<'_> {
    pub fn len(&self) -> usize {
        match self {
            SinkBatch::Raw(records) => records.len(),
            SinkBatch::Normalized(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
pub trait SinkWriter: Send + Sync {
    /// Human readable destination, reported in `LoadOutcome`.
    fn identity(&self) -> String;

    fn preferred_input(&self) -> SinkInput;

    /// Persist a complete catalog.
    async fn write(&self, batch: SinkBatch<'_>) -> Result<LoadOutcome>;

    /// Persist the records of an aborted run for inspection.
    ///
    /// Sinks that only accept complete catalogs return `Ok(None)`.
    async fn write_partial(&self, _batch: SinkBatch<'_>) -> Result<Option<LoadOutcome>> {
        Ok(None)
    }
}

pub use snapshot::SnapshotFileSink;
pub use warehouse::WarehouseSink;

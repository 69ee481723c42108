use serde::Serialize;
use serde_json::{Map, Value};
use ticker_core::ErrorKind;
use uuid::Uuid;

/// One instrument as returned by the source API. The key set varies from
/// record to record.
pub type RawRecord = Map<String, Value>;

/// A field of a normalized row; `None` is the explicit absent marker.
pub type Field = Option<Value>;

/// Canonical column set, in sink order.
pub const CANONICAL_COLUMNS: [&str; 12] = [
    "ticker",
    "name",
    "market",
    "locale",
    "primary_exchange",
    "type",
    "active",
    "currency_name",
    "cik",
    "composite_figi",
    "share_class_figi",
    "last_updated_utc",
];

/// A record conformed to the closed twelve-column schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NormalizedRow {
    pub ticker: Field,
    pub name: Field,
    pub market: Field,
    pub locale: Field,
    pub primary_exchange: Field,
    #[serde(rename = "type")]
    pub instrument_type: Field,
    pub active: Field,
    pub currency_name: Field,
    pub cik: Field,
    pub composite_figi: Field,
    pub share_class_figi: Field,
    pub last_updated_utc: Field,
}

impl NormalizedRow {
    /// Fields paired with their column names, in `CANONICAL_COLUMNS` order.
    pub fn columns(&self) -> [(&'static str, Option<&Value>); 12] {
        [
            ("ticker", self.ticker.as_ref()),
            ("name", self.name.as_ref()),
            ("market", self.market.as_ref()),
            ("locale", self.locale.as_ref()),
            ("primary_exchange", self.primary_exchange.as_ref()),
            ("type", self.instrument_type.as_ref()),
            ("active", self.active.as_ref()),
            ("currency_name", self.currency_name.as_ref()),
            ("cik", self.cik.as_ref()),
            ("composite_figi", self.composite_figi.as_ref()),
            ("share_class_figi", self.share_class_figi.as_ref()),
            ("last_updated_utc", self.last_updated_utc.as_ref()),
        ]
    }

    /// Present fields only, as a raw record.
    pub fn to_raw(&self) -> RawRecord {
        self.columns()
            .into_iter()
            .filter_map(|(name, value)| value.map(|v| (name.to_string(), v.clone())))
            .collect()
    }
}

/// One page of the catalog. `next_cursor` is absent on the final page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageResult {
    pub records: Vec<RawRecord>,
    pub next_cursor: Option<String>,
}

/// Every record fetched during one run, in arrival order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogSnapshot {
    pub records: Vec<RawRecord>,
}

impl CatalogSnapshot {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn extend(&mut self, records: Vec<RawRecord>) {
        self.records.extend(records);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadOutcome {
    pub rows_written: u64,
    pub sink_identity: String,
    pub error: Option<ErrorKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetch,
    Load,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Fetch => write!(f, "fetch"),
            Stage::Load => write!(f, "load"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunFailure {
    pub stage: Stage,
    pub kind: ErrorKind,
    pub reason: String,
}

/// What one run reports back to its trigger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub pages_fetched: usize,
    pub records_fetched: usize,
    /// Outcome of the sink write, including partial flushes of aborted runs.
    pub load: Option<LoadOutcome>,
    pub failure: Option<RunFailure>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }

    pub fn rows_written(&self) -> u64 {
        self.load.as_ref().map_or(0, |l| l.rows_written)
    }
}

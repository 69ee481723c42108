use super::{SinkBatch, SinkInput, SinkWriter};
use crate::model::{LoadOutcome, RawRecord, CANONICAL_COLUMNS};
use async_trait::async_trait;
use metrics::counter;
use serde_json::Value;
use std::borrow::Cow;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use ticker_core::config::SnapshotConfig;
use ticker_core::Result;
use tracing::{info, instrument, warn};

/// Writes the catalog as CSV with one column per observed raw field.
pub struct SnapshotFileSink {
    path: PathBuf,
    partial_path: PathBuf,
    absent_marker: String,
}

impl SnapshotFileSink {
    pub fn new(config: &SnapshotConfig) -> Self {
        Self {
            path: config.path.clone(),
            partial_path: config.partial_path(),
            absent_marker: config.absent_marker.clone(),
        }
    }

    fn write_file(&self, path: &Path, batch: SinkBatch<'_>) -> Result<LoadOutcome> {
        let records: Vec<Cow<'_, RawRecord>> = match batch {
            SinkBatch::Raw(records) => records.iter().map(Cow::Borrowed).collect(),
            SinkBatch::Normalized(rows) => rows.iter().map(|row| Cow::Owned(row.to_raw())).collect(),
        };

        let columns = snapshot_columns(records.iter().map(|r| r.as_ref()));

        // Written beside the target and renamed, so readers never see a torn file
        let staging = staging_path(path);
        let rows_written = match write_csv(&staging, &columns, &records, &self.absent_marker) {
            Ok(rows) => rows,
            Err(e) => {
                if staging.exists() {
                    if let Err(cleanup) = std::fs::remove_file(&staging) {
                        warn!(path = %staging.display(), error = %cleanup, "Failed to remove staging file");
                    }
                }
                return Err(e);
            }
        };
        std::fs::rename(&staging, path)?;

        if rows_written < records.len() as u64 {
            warn!(
                records = records.len(),
                "Records carried no fields; snapshot has no rows"
            );
        }
        counter!("sink_rows_written_total", "sink" => "snapshot").increment(rows_written);

        info!(
            path = %path.display(),
            rows = rows_written,
            columns = columns.len(),
            "Snapshot written"
        );

        Ok(LoadOutcome {
            rows_written,
            sink_identity: format!("snapshot:{}", path.display()),
            error: None,
        })
    }
}

#[async_trait]
impl SinkWriter for SnapshotFileSink {
    fn identity(&self) -> String {
        format!("snapshot:{}", self.path.display())
    }

    fn preferred_input(&self) -> SinkInput {
        SinkInput::RawRecords
    }

    #[instrument(skip(self, batch), fields(records = batch.len()))]
    async fn write(&self, batch: SinkBatch<'_>) -> Result<LoadOutcome> {
        self.write_file(&self.path, batch)
    }

    #[instrument(skip(self, batch), fields(records = batch.len()))]
    async fn write_partial(&self, batch: SinkBatch<'_>) -> Result<Option<LoadOutcome>> {
        self.write_file(&self.partial_path, batch).map(Some)
    }
}

/// Union of all keys across `records`: canonical fields first in schema order,
/// then any other key in lexicographic order.
pub fn snapshot_columns<'a>(records: impl IntoIterator<Item = &'a RawRecord>) -> Vec<String> {
    let mut observed: BTreeSet<&str> = BTreeSet::new();
    for record in records {
        observed.extend(record.keys().map(String::as_str));
    }

    let mut columns: Vec<String> = CANONICAL_COLUMNS
        .iter()
        .filter(|column| observed.contains(*column))
        .map(|column| column.to_string())
        .collect();
    columns.extend(
        observed
            .into_iter()
            .filter(|key| !CANONICAL_COLUMNS.contains(key))
            .map(str::to_string),
    );
    columns
}

fn write_csv(
    path: &Path,
    columns: &[String],
    records: &[Cow<'_, RawRecord>],
    absent_marker: &str,
) -> Result<u64> {
    let mut writer = csv::Writer::from_path(path)?;
    let mut rows = 0u64;

    // Without a header there is nothing to line a row up against
    if !columns.is_empty() {
        writer.write_record(columns)?;
        for record in records {
            writer.write_record(columns.iter().map(|column| match record.get(column) {
                Some(value) => render(value),
                None => absent_marker.to_string(),
            }))?;
            rows += 1;
        }
    }

    writer.flush()?;
    Ok(rows)
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize_all;
    use crate::testing::record;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use ticker_core::ErrorKind;

    fn sink_in(dir: &Path, absent_marker: &str) -> SnapshotFileSink {
        SnapshotFileSink::new(&SnapshotConfig {
            path: dir.join("tickers.csv"),
            absent_marker: absent_marker.to_string(),
        })
    }

    fn read_rows(path: &Path) -> Vec<Vec<String>> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(path)
            .unwrap();
        reader
            .records()
            .map(|r| r.unwrap().iter().map(str::to_string).collect())
            .collect()
    }

    #[tokio::test]
    async fn header_is_union_of_observed_keys() {
        let dir = tempfile::tempdir().unwrap();
        let sink = sink_in(dir.path(), "<absent>");
        let records = vec![
            record(&[("ticker", json!("A"))]),
            record(&[("ticker", json!("B")), ("cik", json!("123"))]),
        ];

        let outcome = sink.write(SinkBatch::Raw(&records)).await.unwrap();

        assert_eq!(outcome.rows_written, 2);
        assert_eq!(
            read_rows(&dir.path().join("tickers.csv")),
            vec![
                vec!["ticker", "cik"],
                vec!["A", "<absent>"],
                vec!["B", "123"],
            ]
        );
    }

    #[tokio::test]
    async fn fieldless_records_report_no_rows() {
        let dir = tempfile::tempdir().unwrap();
        let sink = sink_in(dir.path(), "");
        let records = vec![RawRecord::new(), RawRecord::new(), RawRecord::new()];

        let outcome = sink.write(SinkBatch::Raw(&records)).await.unwrap();

        assert_eq!(outcome.rows_written, 0);
        assert!(read_rows(&dir.path().join("tickers.csv")).is_empty());
    }

    #[tokio::test]
    async fn keeps_fields_outside_canonical_schema() {
        let dir = tempfile::tempdir().unwrap();
        let sink = sink_in(dir.path(), "");
        let records = vec![record(&[
            ("ticker", json!("BRK.A")),
            ("active", json!(true)),
            ("delisted_utc", json!(null)),
            ("base_currency_symbol", json!("USD")),
        ])];

        sink.write(SinkBatch::Raw(&records)).await.unwrap();

        assert_eq!(
            read_rows(&dir.path().join("tickers.csv")),
            vec![
                vec!["ticker", "active", "base_currency_symbol", "delisted_utc"],
                vec!["BRK.A", "true", "USD", ""],
            ]
        );
    }

    #[tokio::test]
    async fn normalized_rows_use_canonical_columns_only() {
        let dir = tempfile::tempdir().unwrap();
        let sink = sink_in(dir.path(), "");
        let rows = normalize_all(&[record(&[
            ("ticker", json!("T")),
            ("market", json!("stocks")),
            ("extra", json!(1)),
        ])]);

        sink.write(SinkBatch::Normalized(&rows)).await.unwrap();

        let written = read_rows(&dir.path().join("tickers.csv"));
        assert_eq!(written[0], vec!["ticker", "market"]);
    }

    #[tokio::test]
    async fn partial_catalog_goes_to_sibling_file() {
        let dir = tempfile::tempdir().unwrap();
        let sink = sink_in(dir.path(), "");
        let records = vec![record(&[("ticker", json!("A"))])];

        let outcome = sink
            .write_partial(SinkBatch::Raw(&records))
            .await
            .unwrap()
            .expect("snapshot sink accepts partial catalogs");

        assert_eq!(outcome.rows_written, 1);
        assert!(dir.path().join("tickers.partial.csv").exists());
        assert!(!dir.path().join("tickers.csv").exists());
    }

    #[tokio::test]
    async fn unwritable_destination_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let sink = sink_in(&dir.path().join("missing"), "");
        let records = vec![record(&[("ticker", json!("A"))])];

        let err = sink.write(SinkBatch::Raw(&records)).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn canonical_columns_precede_extras() {
        let records = vec![record(&[
            ("zeta", json!(1)),
            ("cik", json!("1")),
            ("alpha", json!(2)),
            ("ticker", json!("Q")),
        ])];

        assert_eq!(
            snapshot_columns(&records),
            vec!["ticker", "cik", "alpha", "zeta"]
        );
    }
}

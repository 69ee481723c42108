use crate::model::{Field, NormalizedRow, RawRecord};

/// Conform one raw record to the closed row schema.
///
/// Missing keys and explicit nulls both become the absent marker; keys outside
/// the schema are dropped. Values are carried over as-is.
pub fn normalize(record: &RawRecord) -> NormalizedRow {
    NormalizedRow {
        ticker: field(record, "ticker"),
        name: field(record, "name"),
        market: field(record, "market"),
        locale: field(record, "locale"),
        primary_exchange: field(record, "primary_exchange"),
        instrument_type: field(record, "type"),
        active: field(record, "active"),
        currency_name: field(record, "currency_name"),
        cik: field(record, "cik"),
        composite_figi: field(record, "composite_figi"),
        share_class_figi: field(record, "share_class_figi"),
        last_updated_utc: field(record, "last_updated_utc"),
    }
}

pub fn normalize_all(records: &[RawRecord]) -> Vec<NormalizedRow> {
    records.iter().map(normalize).collect()
}

fn field(record: &RawRecord, key: &str) -> Field {
    record.get(key).filter(|value| !value.is_null()).cloned()
}

use super::{SinkBatch, SinkInput, SinkWriter};
use crate::model::{LoadOutcome, NormalizedRow};
use crate::normalize::normalize_all;
use async_trait::async_trait;
use metrics::counter;
use std::borrow::Cow;
use std::sync::Arc;
use ticker_core::config::WarehouseConfig;
use ticker_core::{Error, Result};
use tracing::{debug, error, info, instrument, warn};

/// Schema-qualified destination table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub schema: String,
    pub table: String,
}

impl TableRef {
    /// Quoted `"schema"."table"` for use in SQL text.
    pub fn qualified(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.table))
    }
}

impl std::fmt::Display for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// Fully resolved destination coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarehouseTarget {
    pub database: String,
    pub table: TableRef,
    pub role: Option<String>,
}

impl WarehouseTarget {
    pub fn resolve(config: &WarehouseConfig) -> Result<Self> {
        let database = required(config.database.as_deref(), "sink.warehouse.database")?;
        let schema = required(config.schema.as_deref(), "sink.warehouse.schema")?;
        let table = required(Some(config.table.as_str()), "sink.warehouse.table")?;

        Ok(Self {
            database,
            table: TableRef { schema, table },
            role: config.role.clone().filter(|role| !role.trim().is_empty()),
        })
    }
}

fn required(value: Option<&str>, name: &str) -> Result<String> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(Error::Config(format!("{} is required for the warehouse sink", name))),
    }
}

pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

#[async_trait]
pub trait WarehouseConnector: Send + Sync {
    /// Open a dedicated connection to `target`.
    async fn connect(&self, target: &WarehouseTarget) -> Result<Box<dyn WarehouseSession>>;
}

/// One open warehouse connection.
#[async_trait]
pub trait WarehouseSession: Send {
    async fn begin(&mut self) -> Result<()>;

    /// Insert `rows` into `table` inside the open transaction.
    async fn insert_rows(&mut self, table: &TableRef, rows: &[NormalizedRow]) -> Result<u64>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;

    async fn close(self: Box<Self>) -> Result<()>;
}

/// Loads the whole catalog in a single transaction: every row or none.
pub struct WarehouseSink {
    connector: Arc<dyn WarehouseConnector>,
    config: WarehouseConfig,
}

impl WarehouseSink {
    pub fn new(connector: Arc<dyn WarehouseConnector>, config: WarehouseConfig) -> Self {
        Self { connector, config }
    }
}

#[async_trait]
impl SinkWriter for WarehouseSink {
    fn identity(&self) -> String {
        let unset = "<unset>";
        format!(
            "warehouse:{}.{}.{}",
            self.config.database.as_deref().unwrap_or(unset),
            self.config.schema.as_deref().unwrap_or(unset),
            self.config.table
        )
    }

    fn preferred_input(&self) -> SinkInput {
        SinkInput::NormalizedRows
    }

    #[instrument(skip(self, batch), fields(records = batch.len()))]
    async fn write(&self, batch: SinkBatch<'_>) -> Result<LoadOutcome> {
        // Coordinates are checked before any connection is attempted
        let target = WarehouseTarget::resolve(&self.config)?;

        let rows: Cow<'_, [NormalizedRow]> = match batch {
            SinkBatch::Normalized(rows) => Cow::Borrowed(rows),
            SinkBatch::Raw(records) => Cow::Owned(normalize_all(records)),
        };

        if rows.is_empty() {
            info!(table = %target.table, "Empty catalog, nothing to load");
            return Ok(LoadOutcome {
                rows_written: 0,
                sink_identity: self.identity(),
                error: None,
            });
        }

        let mut session = self.connector.connect(&target).await?;
        let loaded = load_all_or_nothing(session.as_mut(), &target.table, &rows).await;

        // Released on every path, including failed loads
        if let Err(e) = session.close().await {
            warn!(error = %e, "Failed to close warehouse connection");
        }

        let rows_written = loaded?;
        counter!("sink_rows_written_total", "sink" => "warehouse").increment(rows_written);

        info!(
            table = %target.table,
            database = %target.database,
            rows = rows_written,
            "Catalog committed to warehouse"
        );

        Ok(LoadOutcome {
            rows_written,
            sink_identity: self.identity(),
            error: None,
        })
    }
}

async fn load_all_or_nothing(
    session: &mut dyn WarehouseSession,
    table: &TableRef,
    rows: &[NormalizedRow],
) -> Result<u64> {
    session.begin().await?;

    let inserted = match session.insert_rows(table, rows).await {
        Ok(inserted) => inserted,
        Err(e) => {
            roll_back(session, &e).await;
            return Err(e);
        }
    };

    if let Err(e) = session.commit().await {
        roll_back(session, &e).await;
        return Err(e);
    }

    debug!(inserted, "Warehouse transaction committed");
    Ok(inserted)
}

async fn roll_back(session: &mut dyn WarehouseSession, cause: &Error) {
    error!(error = %cause, "Warehouse load failed, rolling back");
    if let Err(e) = session.rollback().await {
        warn!(error = %e, "Rollback failed; the server discards the open transaction on disconnect");
    }
}

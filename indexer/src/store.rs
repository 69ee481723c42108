use crate::model::{Field, NormalizedRow, CANONICAL_COLUMNS};
use crate::sink::warehouse::{
    quote_ident, TableRef, WarehouseConnector, WarehouseSession, WarehouseTarget,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::Connection;
use std::time::Duration;
use ticker_core::config::WarehouseConfig;
use ticker_core::{Error, Result};
use tracing::{debug, info, instrument, warn};

/// PostgreSQL caps a statement at 65535 bind parameters; 12 per row.
const ROWS_PER_STATEMENT: usize = 5000;

/// Opens one Postgres connection per load.
pub struct PgConnector {
    host: String,
    port: u16,
    user: String,
    password: String,
    connect_timeout: Duration,
}

impl PgConnector {
    pub fn new(config: &WarehouseConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            user: config.user.clone(),
            password: config.password.clone(),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
        }
    }

    async fn open(&self, target: &WarehouseTarget) -> Result<PgConnection> {
        let options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&target.database);

        let mut conn = tokio::time::timeout(self.connect_timeout, PgConnection::connect_with(&options))
            .await
            .map_err(|_| {
                Error::Sink(format!(
                    "timed out connecting to {}:{} after {:?}",
                    self.host, self.port, self.connect_timeout
                ))
            })??;

        if let Some(role) = &target.role {
            let set_role = format!("SET ROLE {}", quote_ident(role));
            if let Err(e) = sqlx::query(&set_role).execute(&mut conn).await {
                if let Err(close) = conn.close().await {
                    warn!(error = %close, "Failed to close warehouse connection");
                }
                return Err(e.into());
            }
        }

        debug!(
            host = %self.host,
            database = %target.database,
            "Warehouse connection opened"
        );
        Ok(conn)
    }

    /// Create the target schema and table when they do not exist yet.
    #[instrument(skip(self))]
    pub async fn ensure_table(&self, target: &WarehouseTarget) -> Result<()> {
        let mut conn = self.open(target).await?;

        let columns = CANONICAL_COLUMNS
            .iter()
            .map(|column| format!("{} {}", quote_ident(column), column_type(column)))
            .collect::<Vec<_>>()
            .join(",\n    ");

        let statements = [
            format!(
                "CREATE SCHEMA IF NOT EXISTS {}",
                quote_ident(&target.table.schema)
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
                target.table.qualified(),
                columns
            ),
        ];

        let mut outcome: Result<()> = Ok(());
        for statement in &statements {
            if let Err(e) = sqlx::query(statement).execute(&mut conn).await {
                outcome = Err(e.into());
                break;
            }
        }
        conn.close().await?;
        outcome?;

        info!(table = %target.table, "Warehouse table ready");
        Ok(())
    }
}

#[async_trait]
impl WarehouseConnector for PgConnector {
    async fn connect(&self, target: &WarehouseTarget) -> Result<Box<dyn WarehouseSession>> {
        let conn = self.open(target).await?;
        Ok(Box::new(PgSession { conn }))
    }
}

fn column_type(column: &str) -> &'static str {
    match column {
        "active" => "BOOLEAN",
        "last_updated_utc" => "TIMESTAMPTZ",
        _ => "TEXT",
    }
}

struct PgSession {
    conn: PgConnection,
}

#[async_trait]
impl WarehouseSession for PgSession {
    async fn begin(&mut self) -> Result<()> {
        sqlx::query("BEGIN").execute(&mut self.conn).await?;
        Ok(())
    }

    async fn insert_rows(&mut self, table: &TableRef, rows: &[NormalizedRow]) -> Result<u64> {
        // Type mismatches fail here, inside the open transaction
        let typed = rows
            .iter()
            .enumerate()
            .map(|(index, row)| TypedRow::from_row(index, row))
            .collect::<Result<Vec<_>>>()?;

        let column_list = CANONICAL_COLUMNS
            .iter()
            .map(|column| quote_ident(column))
            .collect::<Vec<_>>()
            .join(", ");

        let mut inserted = 0u64;
        for chunk in typed.chunks(ROWS_PER_STATEMENT) {
            let mut values_strings = Vec::with_capacity(chunk.len());
            let mut param_index = 1;

            for _ in chunk {
                let placeholders: Vec<String> = (0..CANONICAL_COLUMNS.len())
                    .map(|i| format!("${}", param_index + i))
                    .collect();
                values_strings.push(format!("({})", placeholders.join(", ")));
                param_index += CANONICAL_COLUMNS.len();
            }

            let query_string = format!(
                "INSERT INTO {} ({}) VALUES {}",
                table.qualified(),
                column_list,
                values_strings.join(", ")
            );

            let mut query = sqlx::query(&query_string);
            for row in chunk {
                query = query
                    .bind(row.ticker.clone())
                    .bind(row.name.clone())
                    .bind(row.market.clone())
                    .bind(row.locale.clone())
                    .bind(row.primary_exchange.clone())
                    .bind(row.instrument_type.clone())
                    .bind(row.active)
                    .bind(row.currency_name.clone())
                    .bind(row.cik.clone())
                    .bind(row.composite_figi.clone())
                    .bind(row.share_class_figi.clone())
                    .bind(row.last_updated_utc);
            }

            let result = query.execute(&mut self.conn).await?;
            inserted += result.rows_affected();
        }

        debug!(rows = inserted, table = %table, "Inserted catalog rows");
        Ok(inserted)
    }

    async fn commit(&mut self) -> Result<()> {
        sqlx::query("COMMIT").execute(&mut self.conn).await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        sqlx::query("ROLLBACK").execute(&mut self.conn).await?;
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let PgSession { conn } = *self;
        conn.close().await?;
        Ok(())
    }
}

/// A normalized row converted to the destination column types.
#[derive(Debug, PartialEq)]
struct TypedRow {
    ticker: Option<String>,
    name: Option<String>,
    market: Option<String>,
    locale: Option<String>,
    primary_exchange: Option<String>,
    instrument_type: Option<String>,
    active: Option<bool>,
    currency_name: Option<String>,
    cik: Option<String>,
    composite_figi: Option<String>,
    share_class_figi: Option<String>,
    last_updated_utc: Option<DateTime<Utc>>,
}

impl TypedRow {
    fn from_row(index: usize, row: &NormalizedRow) -> Result<Self> {
        Ok(Self {
            ticker: text(index, "ticker", &row.ticker)?,
            name: text(index, "name", &row.name)?,
            market: text(index, "market", &row.market)?,
            locale: text(index, "locale", &row.locale)?,
            primary_exchange: text(index, "primary_exchange", &row.primary_exchange)?,
            instrument_type: text(index, "type", &row.instrument_type)?,
            active: boolean(index, &row.active)?,
            currency_name: text(index, "currency_name", &row.currency_name)?,
            cik: text(index, "cik", &row.cik)?,
            composite_figi: text(index, "composite_figi", &row.composite_figi)?,
            share_class_figi: text(index, "share_class_figi", &row.share_class_figi)?,
            last_updated_utc: timestamp(index, &row.last_updated_utc)?,
        })
    }
}

fn mismatch(index: usize, column: &str, expected: &str, found: &Value) -> Error {
    Error::Sink(format!(
        "schema mismatch at row {}: column {} expects {}, got {}",
        index, column, expected, found
    ))
}

fn text(index: usize, column: &str, field: &Field) -> Result<Option<String>> {
    match field {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(mismatch(index, column, "TEXT", other)),
    }
}

fn boolean(index: usize, field: &Field) -> Result<Option<bool>> {
    match field {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(other) => Err(mismatch(index, "active", "BOOLEAN", other)),
    }
}

fn timestamp(index: usize, field: &Field) -> Result<Option<DateTime<Utc>>> {
    match field {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(s)
            .map(|ts| Some(ts.with_timezone(&Utc)))
            .map_err(|_| mismatch(index, "last_updated_utc", "TIMESTAMPTZ", &Value::String(s.clone()))),
        Some(other) => Err(mismatch(index, "last_updated_utc", "TIMESTAMPTZ", other)),
    }
}

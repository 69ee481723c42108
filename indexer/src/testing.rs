//! In-memory collaborators for unit tests.

use crate::ingest::{PageFetcher, PageRequest};
use crate::model::{NormalizedRow, PageResult, RawRecord};
use crate::sink::warehouse::{TableRef, WarehouseConnector, WarehouseSession, WarehouseTarget};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use ticker_core::{Error, Result};

pub fn record(fields: &[(&str, Value)]) -> RawRecord {
    fields
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

pub fn page(tickers: &[&str], next_cursor: Option<&str>) -> PageResult {
    PageResult {
        records: tickers
            .iter()
            .map(|t| record(&[("ticker", json!(t)), ("active", json!(true))]))
            .collect(),
        next_cursor: next_cursor.map(str::to_string),
    }
}

/// Replays a fixed sequence of page results and records every request.
pub struct ScriptedFetcher {
    script: Mutex<VecDeque<Result<PageResult>>>,
    requests: Mutex<Vec<PageRequest>>,
}

impl ScriptedFetcher {
    pub fn new(script: Vec<Result<PageResult>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<PageRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageFetcher for ScriptedFetcher {
    async fn fetch(&self, request: &PageRequest) -> Result<PageResult> {
        self.requests.lock().unwrap().push(request.clone());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::Internal("script exhausted".into())))
    }

    fn source_id(&self) -> &str {
        "scripted"
    }
}

#[derive(Debug, Default)]
pub struct WarehouseLedger {
    pub connects: usize,
    pub closes: usize,
    pub commits: usize,
    pub rollbacks: usize,
    pub committed: Vec<NormalizedRow>,
    pub last_target: Option<WarehouseTarget>,
}

/// Transactional in-memory table that rejects a non-boolean `active`.
#[derive(Clone, Default)]
pub struct MemoryWarehouse {
    ledger: Arc<Mutex<WarehouseLedger>>,
    refuse_connections: bool,
    fail_commit: bool,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unreachable() -> Self {
        Self {
            refuse_connections: true,
            ..Self::default()
        }
    }

    pub fn failing_commit() -> Self {
        Self {
            fail_commit: true,
            ..Self::default()
        }
    }

    pub fn ledger(&self) -> std::sync::MutexGuard<'_, WarehouseLedger> {
        self.ledger.lock().unwrap()
    }
}

#[async_trait]
impl WarehouseConnector for MemoryWarehouse {
    async fn connect(&self, target: &WarehouseTarget) -> Result<Box<dyn WarehouseSession>> {
        let mut ledger = self.ledger.lock().unwrap();
        ledger.connects += 1;
        ledger.last_target = Some(target.clone());
        if self.refuse_connections {
            return Err(Error::Sink("connection refused".into()));
        }
        Ok(Box::new(MemorySession {
            ledger: Arc::clone(&self.ledger),
            staged: Vec::new(),
            in_transaction: false,
            fail_commit: self.fail_commit,
        }))
    }
}

struct MemorySession {
    ledger: Arc<Mutex<WarehouseLedger>>,
    staged: Vec<NormalizedRow>,
    in_transaction: bool,
    fail_commit: bool,
}

#[async_trait]
impl WarehouseSession for MemorySession {
    async fn begin(&mut self) -> Result<()> {
        self.in_transaction = true;
        Ok(())
    }

    async fn insert_rows(&mut self, _table: &TableRef, rows: &[NormalizedRow]) -> Result<u64> {
        assert!(self.in_transaction, "insert outside a transaction");
        for (index, row) in rows.iter().enumerate() {
            if matches!(&row.active, Some(v) if !v.is_boolean()) {
                return Err(Error::Sink(format!(
                    "row {}: column active expects BOOLEAN",
                    index
                )));
            }
            self.staged.push(row.clone());
        }
        Ok(rows.len() as u64)
    }

    async fn commit(&mut self) -> Result<()> {
        if self.fail_commit {
            return Err(Error::Sink("connection lost during commit".into()));
        }
        let mut ledger = self.ledger.lock().unwrap();
        ledger.commits += 1;
        ledger.committed.append(&mut self.staged);
        self.in_transaction = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.ledger.lock().unwrap().rollbacks += 1;
        self.staged.clear();
        self.in_transaction = false;
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.ledger.lock().unwrap().closes += 1;
        Ok(())
    }
}

//! In-process table used by tests and local dry runs.
//!
//! A [`MemoryTable`] plays either side of a migration. It records every call
//! and can be told to fail or stall upcoming calls, which is how the retry and
//! recovery paths are exercised without a database.

use crate::{
    adapter::{RowDestination, RowSource},
    sql::base::error::DbError,
};
use async_trait::async_trait;
use model::{pagination::cursor::Cursor, records::row::RowData};
use serde_json::{Value, json};
use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    io,
    sync::{Arc, Mutex, MutexGuard},
};
use tokio::{sync::Notify, time::Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableOp {
    ListKeys,
    FetchRows,
    UpsertRows,
}

/// Failure injected into the next call of an operation.
#[derive(Debug, Clone)]
pub enum Fault {
    /// Connection-level failure, classified as retryable.
    Transient(String),
    /// Application-level write failure, classified as fatal.
    Rejected(String),
    /// Applies the call, then never answers. Models a lost acknowledgement.
    ApplyThenStall,
    /// Never answers and applies nothing.
    Stall,
}

#[derive(Debug, Clone)]
pub struct TableCall {
    pub op: TableOp,
    pub at: Instant,
    pub keys: Vec<i64>,
}

#[derive(Default)]
struct Inner {
    rows: BTreeMap<i64, Value>,
    faults: HashMap<TableOp, VecDeque<Fault>>,
    calls: Vec<TableCall>,
}

#[derive(Clone, Default)]
pub struct MemoryTable {
    inner: Arc<Mutex<Inner>>,
    stalled: Arc<Notify>,
}

impl MemoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table holding `{"id": k, "payload": "row-k"}` for every key.
    pub fn with_keys(keys: impl IntoIterator<Item = i64>) -> Self {
        let table = Self::new();
        for key in keys {
            table.insert(key, json!({ "id": key, "payload": format!("row-{key}") }));
        }
        table
    }

    pub fn insert(&self, key: i64, row: Value) {
        self.lock().rows.insert(key, row);
    }

    pub fn get(&self, key: i64) -> Option<Value> {
        self.lock().rows.get(&key).cloned()
    }

    pub fn keys(&self) -> Vec<i64> {
        self.lock().rows.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().rows.is_empty()
    }

    /// Snapshot of all rows, for comparing two tables.
    pub fn snapshot(&self) -> BTreeMap<i64, Value> {
        self.lock().rows.clone()
    }

    pub fn fail_next(&self, op: TableOp, fault: Fault) {
        self.lock().faults.entry(op).or_default().push_back(fault);
    }

    pub fn calls(&self, op: TableOp) -> Vec<TableCall> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.op == op)
            .cloned()
            .collect()
    }

    /// Resolves once a call has entered a stall.
    pub async fn wait_for_stall(&self) {
        self.stalled.notified().await;
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panicking test thread must not hide the table from the others.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn begin(&self, op: TableOp, keys: Vec<i64>) -> Option<Fault> {
        let mut inner = self.lock();
        inner.calls.push(TableCall {
            op,
            at: Instant::now(),
            keys,
        });
        inner.faults.get_mut(&op).and_then(|q| q.pop_front())
    }

    async fn stall<T>(&self) -> T {
        self.stalled.notify_one();
        std::future::pending::<T>().await
    }
}

fn transient(message: String) -> DbError {
    DbError::Io(io::Error::new(io::ErrorKind::ConnectionReset, message))
}

#[async_trait]
impl RowSource for MemoryTable {
    async fn list_keys(&self, after: Cursor, limit: usize) -> Result<Vec<i64>, DbError> {
        match self.begin(TableOp::ListKeys, Vec::new()) {
            Some(Fault::Transient(msg)) => return Err(transient(msg)),
            Some(Fault::Rejected(msg)) => return Err(DbError::Write(msg)),
            Some(Fault::Stall) | Some(Fault::ApplyThenStall) => self.stall().await,
            None => {}
        }

        let inner = self.lock();
        Ok(inner
            .rows
            .range(after.value().saturating_add(1)..)
            .take(limit)
            .map(|(k, _)| *k)
            .collect())
    }

    async fn fetch_rows(&self, keys: &[i64]) -> Result<Vec<RowData>, DbError> {
        match self.begin(TableOp::FetchRows, keys.to_vec()) {
            Some(Fault::Transient(msg)) => return Err(transient(msg)),
            Some(Fault::Rejected(msg)) => return Err(DbError::Write(msg)),
            Some(Fault::Stall) | Some(Fault::ApplyThenStall) => self.stall().await,
            None => {}
        }

        let inner = self.lock();
        keys.iter()
            .filter_map(|k| inner.rows.get(k).map(|row| (*k, row)))
            .map(|(k, row)| Ok(RowData::from_value(k, row)?))
            .collect()
    }
}

#[async_trait]
impl RowDestination for MemoryTable {
    async fn upsert_rows(&self, rows: &[RowData]) -> Result<u64, DbError> {
        let keys = rows.iter().map(|r| r.key).collect();
        let fault = self.begin(TableOp::UpsertRows, keys);

        match fault {
            Some(Fault::Transient(msg)) => return Err(transient(msg)),
            Some(Fault::Rejected(msg)) => return Err(DbError::Write(msg)),
            Some(Fault::Stall) => self.stall().await,
            Some(Fault::ApplyThenStall) | None => {}
        }

        let decoded = rows
            .iter()
            .map(|r| Ok((r.key, r.to_value()?)))
            .collect::<Result<Vec<_>, DbError>>()?;

        {
            let mut inner = self.lock();
            for (key, value) in decoded {
                inner.rows.insert(key, value);
            }
        }

        if matches!(fault, Some(Fault::ApplyThenStall)) {
            self.stall::<()>().await;
        }
        Ok(rows.len() as u64)
    }
}

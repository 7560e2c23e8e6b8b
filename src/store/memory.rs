//! In-process backend.
//!
//! Holds every collection in memory behind one mutex, so each `update` is
//! atomic with respect to concurrent callers. Useful for tests and for
//! running several workers inside one process against a shared store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::RemoteError;
use crate::store::filter::Query;
use crate::store::traits::Backend;

/// Handler for a named procedure.
pub type Procedure = Arc<dyn Fn(&MemoryStore, Value) -> Result<Value, RemoteError> + Send + Sync>;

/// In-memory collections with server-like defaults.
#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, Vec<Value>>>,
    procedures: Mutex<HashMap<String, Procedure>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a procedure reachable through [`Backend::rpc`].
    pub fn with_procedure<F>(self, name: &str, f: F) -> Self
    where
        F: Fn(&MemoryStore, Value) -> Result<Value, RemoteError> + Send + Sync + 'static,
    {
        self.lock_procedures().insert(name.to_string(), Arc::new(f));
        self
    }

    /// Snapshot of a collection in insertion order.
    pub fn rows(&self, collection: &str) -> Vec<Value> {
        self.lock().get(collection).cloned().unwrap_or_default()
    }

    /// Insert a row verbatim, bypassing defaults.
    pub fn seed(&self, collection: &str, row: Value) {
        self.lock().entry(collection.to_string()).or_default().push(row);
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<Value>>> {
        // A poisoned lock only means another test thread panicked mid-write
        self.collections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_procedures(&self) -> MutexGuard<'_, HashMap<String, Procedure>> {
        self.procedures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn as_object(row: Value, collection: &str) -> Result<Map<String, Value>, RemoteError> {
    match row {
        Value::Object(map) => Ok(map),
        _ => Err(RemoteError::http(400, format!("{collection}: row must be a JSON object"))),
    }
}

#[async_trait]
impl Backend for MemoryStore {
    async fn insert(&self, collection: &str, row: Value) -> Result<Value, RemoteError> {
        let mut map = as_object(row, collection)?;
        if map.get("id").is_none_or(Value::is_null) {
            map.insert("id".into(), Value::String(Uuid::new_v4().to_string()));
        }
        if map.get("created_at").is_none_or(Value::is_null) {
            map.insert("created_at".into(), Value::String(Utc::now().to_rfc3339()));
        }
        let row = Value::Object(map);
        self.lock()
            .entry(collection.to_string())
            .or_default()
            .push(row.clone());
        Ok(row)
    }

    async fn select(&self, collection: &str, query: &Query) -> Result<Vec<Value>, RemoteError> {
        let mut rows: Vec<Value> = self
            .lock()
            .get(collection)
            .map(|rows| rows.iter().filter(|r| query.matches(r)).cloned().collect())
            .unwrap_or_default();
        query.sort(&mut rows);
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn update(
        &self,
        collection: &str,
        query: &Query,
        fields: Value,
    ) -> Result<Vec<Value>, RemoteError> {
        let fields = as_object(fields, collection)?;
        let mut guard = self.lock();
        let Some(rows) = guard.get_mut(collection) else {
            return Ok(Vec::new());
        };

        let mut updated = Vec::new();
        for row in rows.iter_mut().filter(|r| query.matches(r)) {
            if let Value::Object(map) = row {
                for (k, v) in &fields {
                    map.insert(k.clone(), v.clone());
                }
            }
            updated.push(row.clone());
        }
        Ok(updated)
    }

    async fn count(&self, collection: &str, query: &Query) -> Result<u64, RemoteError> {
        let n = self
            .lock()
            .get(collection)
            .map(|rows| rows.iter().filter(|r| query.matches(r)).count())
            .unwrap_or(0);
        Ok(n as u64)
    }

    async fn rpc(&self, procedure: &str, args: Value) -> Result<Value, RemoteError> {
        let handler = self.lock_procedures().get(procedure).cloned();
        match handler {
            Some(f) => f(self, args),
            None => Err(RemoteError::http(
                404,
                format!("Could not find the function {procedure}"),
            )),
        }
    }
}

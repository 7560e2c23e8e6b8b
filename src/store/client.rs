//! Typed store client: every row is decoded here, so nothing above this
//! layer touches untyped JSON maps.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::RemoteError;
use crate::store::filter::Query;
use crate::store::traits::{Backend, Record};

/// Cheap-to-clone handle over a shared [`Backend`].
#[derive(Clone)]
pub struct StoreClient {
    backend: Arc<dyn Backend>,
}

impl StoreClient {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Append a record built from `new` and return it as stored.
    pub async fn create<R, N>(&self, new: &N) -> Result<R, RemoteError>
    where
        R: Record,
        N: Serialize + ?Sized,
    {
        let row = encode(R::COLLECTION, new)?;
        let stored = self.backend.insert(R::COLLECTION, row).await?;
        decode(R::COLLECTION, stored)
    }

    pub async fn query<R: Record>(&self, query: &Query) -> Result<Vec<R>, RemoteError> {
        let rows = self.backend.select(R::COLLECTION, query).await?;
        rows.into_iter().map(|r| decode(R::COLLECTION, r)).collect()
    }

    /// First matching record, if any.
    pub async fn find<R: Record>(&self, query: Query) -> Result<Option<R>, RemoteError> {
        let mut rows = self.query::<R>(&query.limit(1)).await?;
        Ok(rows.pop())
    }

    /// Conditional update; returns only the rows that matched and changed.
    pub async fn patch<R, F>(&self, query: &Query, fields: &F) -> Result<Vec<R>, RemoteError>
    where
        R: Record,
        F: Serialize + ?Sized,
    {
        let fields = encode(R::COLLECTION, fields)?;
        let rows = self.backend.update(R::COLLECTION, query, fields).await?;
        rows.into_iter().map(|r| decode(R::COLLECTION, r)).collect()
    }

    pub async fn count<R: Record>(&self, query: &Query) -> Result<u64, RemoteError> {
        self.backend.count(R::COLLECTION, query).await
    }

    /// Call a procedure and decode its answer.
    pub async fn rpc<T: DeserializeOwned>(
        &self,
        procedure: &str,
        args: Value,
    ) -> Result<T, RemoteError> {
        let value = self.backend.rpc(procedure, args).await?;
        serde_json::from_value(value).map_err(|e| RemoteError::decode(procedure, e))
    }
}

fn encode<T: Serialize + ?Sized>(collection: &str, value: &T) -> Result<Value, RemoteError> {
    serde_json::to_value(value).map_err(|e| RemoteError::decode(collection, e))
}

fn decode<R: DeserializeOwned>(collection: &str, row: Value) -> Result<R, RemoteError> {
    serde_json::from_value(row).map_err(|e| RemoteError::decode(collection, e))
}

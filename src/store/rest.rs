//! HTTP backend speaking the PostgREST dialect (Supabase-style REST).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use crate::error::{ConfigError, RemoteError};
use crate::store::filter::Query;
use crate::store::traits::Backend;

/// REST backend over `reqwest`.
pub struct RestStore {
    base_url: String,
    client: reqwest::Client,
}

impl RestStore {
    /// Build a client for `base_url`, authenticating every request with
    /// `anon_key` and bounding each call by `timeout`.
    pub fn new(
        base_url: &str,
        anon_key: &SecretString,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let mut headers = HeaderMap::new();
        let key = anon_key.expose_secret();
        if !key.is_empty() {
            let mut apikey = HeaderValue::from_str(key).map_err(|e| ConfigError::InvalidValue {
                key: "COLAB_ANON_KEY".into(),
                message: e.to_string(),
            })?;
            apikey.set_sensitive(true);
            let mut bearer = HeaderValue::from_str(&format!("Bearer {key}")).map_err(|e| {
                ConfigError::InvalidValue {
                    key: "COLAB_ANON_KEY".into(),
                    message: e.to_string(),
                }
            })?;
            bearer.set_sensitive(true);
            headers.insert("apikey", apikey);
            headers.insert(reqwest::header::AUTHORIZATION, bearer);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                key: "http client".into(),
                message: e.to_string(),
            })?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn table_url(&self, collection: &str) -> String {
        format!("{}/rest/v1/{collection}", self.base_url)
    }

    fn rpc_url(&self, procedure: &str) -> String {
        format!("{}/rest/v1/rpc/{procedure}", self.base_url)
    }
}

/// Turn a non-2xx response into a `RemoteError`, keeping the body text.
async fn check(resp: reqwest::Response) -> Result<reqwest::Response, RemoteError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(RemoteError::http(status.as_u16(), body))
}

async fn json_rows(resp: reqwest::Response) -> Result<Vec<Value>, RemoteError> {
    let value: Value = resp.json().await?;
    match value {
        Value::Array(rows) => Ok(rows),
        Value::Null => Ok(Vec::new()),
        other => Ok(vec![other]),
    }
}

/// Parse the total out of a `Content-Range` header (`0-9/42` or `*/0`).
fn parse_content_range(header: &str) -> Option<u64> {
    header.rsplit_once('/')?.1.trim().parse().ok()
}

#[async_trait]
impl Backend for RestStore {
    async fn insert(&self, collection: &str, row: Value) -> Result<Value, RemoteError> {
        let resp = self
            .client
            .post(self.table_url(collection))
            .header("Prefer", "return=representation")
            .json(&row)
            .send()
            .await?;
        let rows = json_rows(check(resp).await?).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| {
                RemoteError::transport(format!("insert into {collection} returned no row"))
            })
    }

    async fn select(&self, collection: &str, query: &Query) -> Result<Vec<Value>, RemoteError> {
        let resp = self
            .client
            .get(self.table_url(collection))
            .query(&query.to_params())
            .send()
            .await?;
        json_rows(check(resp).await?).await
    }

    async fn update(
        &self,
        collection: &str,
        query: &Query,
        fields: Value,
    ) -> Result<Vec<Value>, RemoteError> {
        let resp = self
            .client
            .patch(self.table_url(collection))
            .header("Prefer", "return=representation")
            .query(&query.to_params())
            .json(&fields)
            .send()
            .await?;
        json_rows(check(resp).await?).await
    }

    async fn count(&self, collection: &str, query: &Query) -> Result<u64, RemoteError> {
        let mut params = query.to_params();
        params.retain(|(k, _)| k != "order" && k != "limit");
        params.push(("select".to_string(), "id".to_string()));

        let resp = self
            .client
            .head(self.table_url(collection))
            .header("Prefer", "count=exact")
            .header("Range-Unit", "items")
            .query(&params)
            .send()
            .await?;
        let resp = check(resp).await?;

        resp.headers()
            .get(reqwest::header::CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range)
            .ok_or_else(|| {
                RemoteError::transport(format!("count of {collection}: no Content-Range total"))
            })
    }

    async fn rpc(&self, procedure: &str, args: Value) -> Result<Value, RemoteError> {
        let resp = self
            .client
            .post(self.rpc_url(procedure))
            .json(&args)
            .send()
            .await?;
        let resp = check(resp).await?;
        let text = resp.text().await?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| RemoteError::decode(procedure, e))
    }
}

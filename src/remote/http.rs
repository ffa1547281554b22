//! HTTP implementation of the remote row fetcher.
//!
//! Talks to a PostgREST-style endpoint: one route per table, range predicates
//! and ordering expressed as query parameters. Auth is an API key plus bearer
//! token, both optional for self-hosted deployments.

use chrono::{TimeZone, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::{header, Client};
use serde_json::Value;
use tracing::debug;

use crate::error::SyncError;
use crate::remote::{FilterDescriptor, RemoteStore};

/// HTTP request timeout in seconds.
/// 30s allows for slow responses while failing fast enough to fall back to
/// cache within one scheduling pass.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Row cap applied when neither the filter nor the caller supplies one.
const DEFAULT_ROW_CAP: u32 = 500;

/// Remote store client.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpRemoteStore {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    token: Option<String>,
    default_row_cap: u32,
}

impl HttpRemoteStore {
    pub fn new(base_url: impl Into<String>) -> Result<Self, SyncError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            token: None,
            default_row_cap: DEFAULT_ROW_CAP,
        })
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_default_row_cap(mut self, cap: u32) -> Self {
        self.default_row_cap = cap;
        self
    }

    /// Build the query string for a filtered fetch.
    fn build_query(&self, filter: Option<&FilterDescriptor>) -> Vec<(String, String)> {
        let mut query = vec![("select".to_string(), "*".to_string())];

        let cap = filter
            .and_then(|f| f.max_rows)
            .unwrap_or(self.default_row_cap);
        query.push(("limit".to_string(), cap.to_string()));

        if let Some(filter) = filter {
            if let (Some(field), Some(since)) = (&filter.date_field, filter.since_ms) {
                if let Some(ts) = Utc.timestamp_millis_opt(since).single() {
                    query.push((field.clone(), format!("gte.{}", ts.to_rfc3339())));
                }
            }
            if let Some(order) = &filter.order_by {
                query.push(("order".to_string(), format!("{}.desc", order)));
            }
        }

        query
    }

    async fn fetch(
        &self,
        table: &str,
        filter: Option<&FilterDescriptor>,
    ) -> Result<Vec<Value>, SyncError> {
        let url = format!("{}/{}", self.base_url, table);
        let query = self.build_query(filter);

        let mut request = self.client.get(&url).query(&query);
        if let Some(ref key) = self.api_key {
            request = request.header("apikey", key);
        }
        if let Some(ref token) = self.token {
            request = request.bearer_auth(token);
        }
        request = request.header(header::ACCEPT, "application/json");

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::from_status(status, &body));
        }

        let rows: Vec<Value> = response
            .json()
            .await
            .map_err(|e| SyncError::InvalidResponse(format!("Expected row array: {}", e)))?;

        debug!(table, rows = rows.len(), "Fetched remote rows");
        Ok(rows)
    }
}

impl RemoteStore for HttpRemoteStore {
    fn fetch_rows<'a>(
        &'a self,
        table: &'a str,
        filter: Option<&'a FilterDescriptor>,
    ) -> BoxFuture<'a, Result<Vec<Value>, SyncError>> {
        self.fetch(table, filter).boxed()
    }
}

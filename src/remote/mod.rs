//! Remote row-fetching capability.
//!
//! The engine consumes the remote store as "fetch rows matching filter"; the
//! trait keeps the transport pluggable (HTTP in production, scripted stores in
//! tests).

mod http;

pub use http::HttpRemoteStore;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::error::SyncError;

/// Narrows what a collection fetches from the remote store.
///
/// Absent (`None` at the call site) means "fetch everything up to the default
/// row cap".
#[derive(Debug, Clone, Default)]
pub struct FilterDescriptor {
    /// Date-like column the range predicate applies to.
    pub date_field: Option<String>,
    /// Lower bound (inclusive) for `date_field`, epoch milliseconds.
    pub since_ms: Option<i64>,
    /// Row cap; falls back to the engine default when unset.
    pub max_rows: Option<u32>,
    /// Column to order by, descending.
    pub order_by: Option<String>,
}

impl FilterDescriptor {
    pub fn since(date_field: impl Into<String>, since_ms: i64) -> Self {
        let field = date_field.into();
        Self {
            date_field: Some(field.clone()),
            since_ms: Some(since_ms),
            max_rows: None,
            order_by: Some(field),
        }
    }

    pub fn max_rows(mut self, cap: u32) -> Self {
        self.max_rows = Some(cap);
        self
    }
}

/// Capability to fetch raw rows for a table.
pub trait RemoteStore: Send + Sync {
    fn fetch_rows<'a>(
        &'a self,
        table: &'a str,
        filter: Option<&'a FilterDescriptor>,
    ) -> BoxFuture<'a, Result<Vec<Value>, SyncError>>;
}

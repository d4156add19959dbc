//! Scripted upstream transport for tests.
//!
//! Replays queued responses in order and falls back to a default response
//! once the queue is drained. Every call is counted and its query captured.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::api::{RawResponse, ReportQuery, Transport};
use super::ReportDefinition;
use crate::error::SalesfeedError;

/// One scripted upstream reply
#[derive(Debug, Clone)]
pub enum Scripted {
    /// 200 with a JSON array of `n` synthetic rows
    Records(usize),
    /// 200 with an arbitrary body
    Body(String),
    /// Non-2xx status with an empty body
    Status(u16),
    Timeout,
}

pub struct MockTransport {
    script: Mutex<VecDeque<Scripted>>,
    fallback: Mutex<Scripted>,
    delay: Duration,
    calls: AtomicUsize,
    queries: Mutex<Vec<ReportQuery>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(Scripted::Records(0)),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            queries: Mutex::new(Vec::new()),
        }
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for the next unscripted call
    pub fn then(self, reply: Scripted) -> Self {
        self.script.lock().unwrap().push_back(reply);
        self
    }

    /// Reply used once the script is exhausted
    pub fn always(self, reply: Scripted) -> Self {
        *self.fallback.lock().unwrap() = reply;
        self
    }

    /// Shorthand for `always(Scripted::Records(n))`
    pub fn with_records(self, n: usize) -> Self {
        self.always(Scripted::Records(n))
    }

    /// Hold every response for `delay` before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Change the fallback reply after construction
    pub fn set_fallback(&self, reply: Scripted) {
        *self.fallback.lock().unwrap() = reply;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_query(&self) -> Option<ReportQuery> {
        self.queries.lock().unwrap().last().cloned()
    }

    fn next_reply(&self) -> Scripted {
        let scripted = self.script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| self.fallback.lock().unwrap().clone())
    }
}

/// JSON array body with `n` rows in the upstream field layout
pub fn upstream_rows(n: usize) -> String {
    let rows: Vec<serde_json::Value> = (0..n)
        .map(|i| {
            serde_json::json!({
                "date": "2026-10-01T00:00:00",
                "monthName": "October",
                "branchName": format!("Branch {}", i % 3),
                "productCode": format!("NK-{:04}", i),
                "productName": format!("Product {} | Lawn", i),
                "productCategoryName": "Unstitched",
                "soldQuantity": i + 1,
                "symbol": "SI",
                "includingTaxAmount": 1000.0 * (i as f64 + 1.0)
            })
        })
        .collect();
    serde_json::Value::Array(rows).to_string()
}

#[async_trait]
impl Transport for MockTransport {
    async fn post_report(
        &self,
        _report: &ReportDefinition,
        query: &ReportQuery,
    ) -> Result<RawResponse, SalesfeedError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().unwrap().push(query.clone());
        let reply = self.next_reply();

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match reply {
            Scripted::Records(n) => Ok(RawResponse {
                status: 200,
                body: upstream_rows(n),
            }),
            Scripted::Body(body) => Ok(RawResponse { status: 200, body }),
            Scripted::Status(status) => Ok(RawResponse {
                status,
                body: String::new(),
            }),
            Scripted::Timeout => Err(SalesfeedError::Timeout("operation timed out".into())),
        }
    }
}

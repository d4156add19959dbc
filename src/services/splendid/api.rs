use crate::config::UpstreamConfig;
use crate::error::SalesfeedError;
use crate::metrics::SharedMetrics;
use crate::model::SaleRecord;
use crate::services::splendid::parser::parse_report_body;
use crate::services::splendid::ReportDefinition;
use async_trait::async_trait;
use chrono::{Datelike, Local, NaiveDate};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, trace, warn};

/// Request body for a report query
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReportQuery {
    pub from_date: String,
    pub end_date: String,
    pub branch_ids: Vec<u64>,
    pub ascending: bool,
    pub order_by: String,
}

impl ReportQuery {
    /// Month-to-date query for `report` as of `today`
    pub fn month_to_date(report: &ReportDefinition, today: NaiveDate) -> Self {
        let (from, to) = month_to_date(today);
        Self {
            from_date: from.format("%Y-%m-%d").to_string(),
            end_date: to.format("%Y-%m-%d").to_string(),
            branch_ids: report.branch_ids.clone(),
            ascending: report.ascending,
            order_by: report.order_by.clone(),
        }
    }
}

/// `[first day of the month, today]`
pub fn month_to_date(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    (today.with_day(1).unwrap_or(today), today)
}

/// Status and body of one upstream exchange
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Network seam of the upstream client.
///
/// Implementations perform exactly one request per call; retrying is the
/// client's job.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post_report(
        &self,
        report: &ReportDefinition,
        query: &ReportQuery,
    ) -> Result<RawResponse, SalesfeedError>;
}

/// Authenticated reqwest transport
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(config: &UpstreamConfig) -> Result<Self, SalesfeedError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json-patch+json"),
        );
        headers.insert("X-Api-Key", header_value("X-Api-Key", &config.api_key)?);
        headers.insert("X-Api-Secret", header_value("X-Api-Secret", &config.api_secret)?);
        headers.insert("X-App-Id", header_value("X-App-Id", &config.app_id)?);

        let client = Client::builder()
            .timeout(config.request_timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| SalesfeedError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue, SalesfeedError> {
    let mut value = HeaderValue::from_str(value)
        .map_err(|_| SalesfeedError::Internal(format!("{} contains invalid characters", name)))?;
    value.set_sensitive(true);
    Ok(value)
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn post_report(
        &self,
        report: &ReportDefinition,
        query: &ReportQuery,
    ) -> Result<RawResponse, SalesfeedError> {
        // Content-Type is the provider's json-patch flavour, so the body is
        // serialized by hand instead of through `.json()`.
        let body = serde_json::to_vec(query)
            .map_err(|e| SalesfeedError::Internal(format!("Failed to encode query: {}", e)))?;

        let resp = self.client.post(&report.url).body(body).send().await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;

        Ok(RawResponse { status, body })
    }
}

/// Bounded retry with a fixed pause between attempts
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(2),
        }
    }
}

/// Fetches report rows, retrying transient failures.
///
/// The date window is not a parameter: every call asks for month-to-date as
/// of the current local day. The client never touches the cache.
#[derive(Clone)]
pub struct UpstreamClient {
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
    metrics: SharedMetrics,
}

impl UpstreamClient {
    pub fn new(transport: Arc<dyn Transport>, retry: RetryPolicy, metrics: SharedMetrics) -> Self {
        Self {
            transport,
            retry,
            metrics,
        }
    }

    #[instrument(skip(self, report), fields(report = %report.id))]
    pub async fn fetch(&self, report: &ReportDefinition) -> Result<Vec<SaleRecord>, SalesfeedError> {
        let query = ReportQuery::month_to_date(report, Local::now().date_naive());
        self.fetch_query(report, &query).await
    }

    async fn fetch_query(
        &self,
        report: &ReportDefinition,
        query: &ReportQuery,
    ) -> Result<Vec<SaleRecord>, SalesfeedError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            let start = Instant::now();

            debug!(
                report = %report.id,
                attempt = attempt,
                max_attempts = max_attempts,
                from = %query.from_date,
                to = %query.end_date,
                "Sending report request"
            );

            let result = match self.transport.post_report(report, query).await {
                Ok(resp) if resp.is_success() => {
                    trace!(report = %report.id, response_bytes = resp.body.len(), "Response body received");
                    parse_report_body(&resp.body, report.mapping)
                }
                Ok(resp) => Err(SalesfeedError::Upstream(format!(
                    "HTTP {}: {}",
                    resp.status,
                    preview(&resp.body)
                ))),
                Err(e) => Err(e),
            };

            let elapsed = start.elapsed();
            let status = match &result {
                Ok(_) => "success",
                Err(SalesfeedError::Timeout(_)) => "timeout",
                Err(SalesfeedError::Malformed(_)) => "malformed",
                Err(_) => "error",
            };
            self.metrics
                .record_upstream_request(&report.id, status, elapsed.as_secs_f64());

            match result {
                Ok(records) => {
                    info!(
                        report = %report.id,
                        attempt = attempt,
                        records = records.len(),
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Report fetched"
                    );
                    return Ok(records);
                }
                Err(e) if !e.is_retryable() => {
                    error!(report = %report.id, attempt = attempt, error = %e, "Report fetch failed, not retrying");
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        report = %report.id,
                        attempt = attempt,
                        max_attempts = max_attempts,
                        error = %e,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Report request failed"
                    );
                    last_error = Some(e);
                }
            }

            if attempt < max_attempts {
                self.metrics.record_upstream_retry(&report.id);
                tokio::time::sleep(self.retry.backoff).await;
            }
        }

        error!(report = %report.id, attempts = max_attempts, "Report fetch failed after all attempts");
        Err(last_error.unwrap_or_else(|| {
            SalesfeedError::Upstream("Request failed after retries".into())
        }))
    }
}

fn preview(body: &str) -> &str {
    match body.char_indices().nth(200) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Leader connection: the wire protocol for tailing the operation log.
//!
//! Three requests against the leader's replication API:
//!
//! - `GET /_api/replication/leader-state` — identity and log head
//! - `GET|PUT /_api/replication/tail` — one batch of log entries;
//!   PUT when open-transaction ids must accompany the request
//! - `GET /_api/replication/open-transactions` — ids of transactions
//!   open in a tick range (start-of-stream prepopulation)
//!
//! Batch metadata travels in response headers; the body is
//! newline-delimited JSON decoded by [`crate::entry::decode_batch_body`].
//! A missing required header is an [`ApplierError::InvalidResponse`]:
//! cursor advancement must never be guessed.

use crate::entry::{decode_batch_body, LogEntry};
use crate::error::{ApplierError, Result};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Response header names (lowercase; HTTP header names are
/// case-insensitive and reqwest normalizes them).
pub const HEADER_CHECK_MORE: &str = "x-replication-checkmore";
pub const HEADER_FROM_PRESENT: &str = "x-replication-frompresent";
pub const HEADER_LAST_INCLUDED: &str = "x-replication-lastincluded";
pub const HEADER_LAST_TICK: &str = "x-replication-lasttick";
pub const HEADER_LAST_SCANNED: &str = "x-replication-lastscanned";

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = futures::future::BoxFuture<'a, Result<T>>;

/// Leader identity and log head, from the leader-state request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderState {
    /// The leader's stable server id. A change across reconnects means we
    /// are talking to a different instance.
    pub server_id: String,
    /// Head of the leader's log.
    pub last_log_tick: u64,
}

/// Parameters for one tail request.
#[derive(Debug, Clone)]
pub struct TailParams {
    /// Exclusive lower tick bound.
    pub from: u64,
    /// How far the leader scanned for us last time.
    pub last_scanned: u64,
    /// Entries below this are transaction replay, not regular stream
    /// content. Only sent when it exceeds `from`.
    pub first_regular: u64,
    /// Approximate response size bound in bytes.
    pub chunk_size: u64,
    /// Include system collections.
    pub include_system: bool,
    /// Include job-queue system collections.
    pub include_foxx_queues: bool,
    /// Ids of transactions still open on our side; sent in the body (PUT)
    /// so the leader keeps their entries available.
    pub open_transactions: Vec<u64>,
}

/// One tail batch: decoded entries plus the header metadata.
#[derive(Debug, Clone)]
pub struct TailBatch {
    pub entries: Vec<LogEntry>,
    /// More data is available right now; fetch again without waiting.
    pub check_more: bool,
    /// The requested `from` tick was still present in the leader's log.
    /// `false` means entries may have been lost to log truncation.
    pub from_present: bool,
    /// Highest tick actually included in this batch (0 if empty).
    pub last_included_tick: u64,
    /// Highest tick the leader scanned while producing the batch.
    pub last_scanned_tick: Option<u64>,
    /// Leader's log head at response time.
    pub last_tick: u64,
}

/// Result of the open-transactions query for a tick range.
#[derive(Debug, Clone)]
pub struct OpenTransactions {
    /// Ids of transactions open somewhere inside the range.
    pub transactions: Vec<u64>,
    /// Leader's log head at response time.
    pub last_tick: u64,
    /// Whether the range start was still present in the log.
    pub from_present: bool,
}

/// What the applier needs from the leader.
///
/// This trait allows testing with mocks and decouples the engine from the
/// HTTP client.
pub trait LeaderConnection: Send + Sync + 'static {
    /// Fetch the leader's identity and log head.
    fn get_state(&self) -> BoxFuture<'_, LeaderState>;

    /// Fetch one batch of log entries.
    fn fetch_tail(&self, params: TailParams) -> BoxFuture<'_, TailBatch>;

    /// Fetch the ids of transactions open in `(from, to]`.
    fn fetch_open_transactions(&self, from: u64, to: u64) -> BoxFuture<'_, OpenTransactions>;
}

// =============================================================================
// Header parsing
// =============================================================================

/// Case-insensitive header lookup over a plain map (mock-friendly).
fn header<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

fn required_header<'a>(headers: &'a HashMap<String, String>, name: &str) -> Result<&'a str> {
    header(headers, name)
        .ok_or_else(|| ApplierError::InvalidResponse(format!("missing header {}", name)))
}

fn parse_bool_header(name: &str, value: &str) -> Result<bool> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(ApplierError::InvalidResponse(format!(
            "header {} is not a boolean: {:?}",
            name, other
        ))),
    }
}

fn parse_tick_header(name: &str, value: &str) -> Result<u64> {
    value.parse::<u64>().map_err(|_| {
        ApplierError::InvalidResponse(format!("header {} is not a tick: {:?}", name, value))
    })
}

/// Assemble a [`TailBatch`] from response headers and a raw body.
///
/// Shared between the HTTP client and test mocks so both enforce the same
/// required-header rules.
pub fn parse_tail_response(headers: &HashMap<String, String>, body: &[u8]) -> Result<TailBatch> {
    let check_more = parse_bool_header(
        HEADER_CHECK_MORE,
        required_header(headers, HEADER_CHECK_MORE)?,
    )?;
    let from_present = parse_bool_header(
        HEADER_FROM_PRESENT,
        required_header(headers, HEADER_FROM_PRESENT)?,
    )?;
    let last_included_tick = parse_tick_header(
        HEADER_LAST_INCLUDED,
        required_header(headers, HEADER_LAST_INCLUDED)?,
    )?;
    let last_tick =
        parse_tick_header(HEADER_LAST_TICK, required_header(headers, HEADER_LAST_TICK)?)?;
    let last_scanned_tick = match header(headers, HEADER_LAST_SCANNED) {
        Some(v) => Some(parse_tick_header(HEADER_LAST_SCANNED, v)?),
        None => None,
    };

    let entries = decode_batch_body(body)?;

    Ok(TailBatch {
        entries,
        check_more,
        from_present,
        last_included_tick,
        last_scanned_tick,
        last_tick,
    })
}

/// Assemble an [`OpenTransactions`] from response headers and a raw body
/// (JSON array of decimal-string ids).
pub fn parse_open_transactions_response(
    headers: &HashMap<String, String>,
    body: &[u8],
) -> Result<OpenTransactions> {
    let last_tick =
        parse_tick_header(HEADER_LAST_TICK, required_header(headers, HEADER_LAST_TICK)?)?;
    let from_present = parse_bool_header(
        HEADER_FROM_PRESENT,
        required_header(headers, HEADER_FROM_PRESENT)?,
    )?;

    let ids: Vec<String> = serde_json::from_slice(body).map_err(|e| {
        ApplierError::InvalidResponse(format!("malformed open-transactions body: {}", e))
    })?;
    let mut transactions = Vec::with_capacity(ids.len());
    for id in ids {
        let parsed = id.parse::<u64>().map_err(|_| {
            ApplierError::InvalidResponse(format!("invalid transaction id: {:?}", id))
        })?;
        transactions.push(parsed);
    }

    Ok(OpenTransactions {
        transactions,
        last_tick,
        from_present,
    })
}

// =============================================================================
// HTTP implementation
// =============================================================================

/// Leader connection over HTTP, backed by `reqwest`.
pub struct HttpLeaderConnection {
    client: reqwest::Client,
    endpoint: String,
    server_id: String,
}

impl HttpLeaderConnection {
    /// Build a connection to the given leader endpoint (base URL without a
    /// trailing slash), identifying as `server_id`.
    pub fn new(endpoint: &str, server_id: &str, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ApplierError::Config(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            server_id: server_id.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    async fn send(
        &self,
        operation: &'static str,
        request: reqwest::RequestBuilder,
    ) -> Result<(HashMap<String, String>, Vec<u8>)> {
        crate::metrics::replication_leader_request(operation);
        let response = request
            .send()
            .await
            .map_err(|e| ApplierError::no_response(operation, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApplierError::leader(operation, status.as_u16(), body));
        }

        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_string(),
                    String::from_utf8_lossy(v.as_bytes()).to_string(),
                )
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| ApplierError::no_response(operation, e.to_string()))?;
        Ok((headers, body.to_vec()))
    }
}

impl LeaderConnection for HttpLeaderConnection {
    fn get_state(&self) -> BoxFuture<'_, LeaderState> {
        Box::pin(async move {
            let url = self.url("/_api/replication/leader-state");
            let (_, body) = self.send("leader-state", self.client.get(&url)).await?;

            #[derive(serde::Deserialize)]
            #[serde(rename_all = "camelCase")]
            struct Raw {
                server_id: String,
                last_log_tick: String,
            }
            let raw: Raw = serde_json::from_slice(&body).map_err(|e| {
                ApplierError::InvalidResponse(format!("malformed leader-state body: {}", e))
            })?;
            let last_log_tick = raw.last_log_tick.parse::<u64>().map_err(|_| {
                ApplierError::InvalidResponse(format!(
                    "invalid lastLogTick: {:?}",
                    raw.last_log_tick
                ))
            })?;

            debug!(
                leader_server_id = %raw.server_id,
                last_log_tick,
                "Fetched leader state"
            );
            Ok(LeaderState {
                server_id: raw.server_id,
                last_log_tick,
            })
        })
    }

    fn fetch_tail(&self, params: TailParams) -> BoxFuture<'_, TailBatch> {
        Box::pin(async move {
            let mut url = format!(
                "{}?chunkSize={}&from={}&lastScanned={}&serverId={}&includeSystem={}&includeFoxxQueues={}",
                self.url("/_api/replication/tail"),
                params.chunk_size,
                params.from,
                params.last_scanned,
                self.server_id,
                params.include_system,
                params.include_foxx_queues,
            );
            if params.first_regular > params.from {
                url.push_str(&format!("&firstRegular={}", params.first_regular));
            }

            // Open transaction ids ride in a PUT body so the leader keeps
            // their log entries alive.
            let request = if params.open_transactions.is_empty() {
                self.client.get(&url)
            } else {
                let ids: Vec<String> = params
                    .open_transactions
                    .iter()
                    .map(|id| id.to_string())
                    .collect();
                self.client.put(&url).json(&ids)
            };

            let (headers, body) = self.send("tail", request).await?;
            let batch = parse_tail_response(&headers, &body)?;
            debug!(
                from = params.from,
                entries = batch.entries.len(),
                check_more = batch.check_more,
                last_included_tick = batch.last_included_tick,
                last_tick = batch.last_tick,
                "Fetched tail batch"
            );
            Ok(batch)
        })
    }

    fn fetch_open_transactions(&self, from: u64, to: u64) -> BoxFuture<'_, OpenTransactions> {
        Box::pin(async move {
            let url = format!(
                "{}?from={}&to={}&serverId={}",
                self.url("/_api/replication/open-transactions"),
                from,
                to,
                self.server_id,
            );
            let (headers, body) = self.send("open-transactions", self.client.get(&url)).await?;
            let open = parse_open_transactions_response(&headers, &body)?;
            debug!(
                from,
                to,
                count = open.transactions.len(),
                "Fetched open transactions"
            );
            Ok(open)
        })
    }
}

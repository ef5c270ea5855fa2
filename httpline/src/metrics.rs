//! httpline runtime metrics.
//!
//! Loop-thread counters for connections, bytes, ring utilization, and
//! back-pressure events, exposed through the metriken registry.

use metriken::{Counter, metric};

// ── Connection lifecycle ─────────────────────────────────────────

#[metric(
    name = "httpline/connections/accepted",
    description = "Total connections accepted"
)]
pub static CONNECTIONS_ACCEPTED: Counter = Counter::new();

#[metric(
    name = "httpline/connections/closed",
    description = "Total connections closed"
)]
pub static CONNECTIONS_CLOSED: Counter = Counter::new();

// ── Bytes ────────────────────────────────────────────────────────

#[metric(name = "httpline/bytes/received", description = "Total bytes received")]
pub static BYTES_RECEIVED: Counter = Counter::new();

#[metric(name = "httpline/bytes/sent", description = "Total bytes sent")]
pub static BYTES_SENT: Counter = Counter::new();

// ── Ring utilization ─────────────────────────────────────────────

#[metric(name = "httpline/cqe/processed", description = "Total CQEs processed")]
pub static CQE_PROCESSED: Counter = Counter::new();

#[metric(
    name = "httpline/sqe/deferred",
    description = "Submissions deferred because the SQ or buffer pool was exhausted"
)]
pub static SUBMISSIONS_DEFERRED: Counter = Counter::new();

#[metric(
    name = "httpline/pool/empty",
    description = "Buffer pool exhaustion events"
)]
pub static BUFFER_POOL_EMPTY: Counter = Counter::new();

// ── Requests ─────────────────────────────────────────────────────

#[metric(
    name = "httpline/requests/ok",
    description = "Requests answered with 200 OK"
)]
pub static RESPONSES_OK: Counter = Counter::new();

#[metric(
    name = "httpline/requests/bad",
    description = "Requests answered with 400 Bad Request"
)]
pub static RESPONSES_BAD_REQUEST: Counter = Counter::new();

#[metric(
    name = "httpline/requests/parse_errors",
    description = "Request heads rejected by the parser"
)]
pub static PARSE_ERRORS: Counter = Counter::new();

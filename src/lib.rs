//! Rust SDK for the perf-test dashboard backend.
//!
//! The crate is organized by transport surface:
//! - `api`: HTTP client for test cases, test results, and scheduled tasks.
//! - `realtime`: websocket push client with reconnect handling and
//!   subscriber fan-out.
//! - `retry`: shared bounded-retry utilities.

/// Dashboard REST client and request/response types.
pub mod api;
/// Realtime push-event client.
pub mod realtime;
/// Retry helpers used by the REST client.
pub mod retry;

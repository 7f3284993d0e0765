//! Periodic uptime and latency monitor for a small set of network endpoints.
//!
//! Endpoints are probed every `requestInterval` seconds; status changes are
//! logged as they happen and per-endpoint pass/fail summaries are written
//! every `flushInterval` seconds.

pub mod config;
pub mod monitoring;
pub mod sink;

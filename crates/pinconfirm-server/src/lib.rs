//! PIN confirmation server: the verification endpoint behind confirmation links.
//!
//! The confirmation page posts `get_transaction` / `verify_pin` actions to
//! `/api/verify-pin`. Upstream systems register pending transfers and enrol
//! PINs over HMAC-authenticated endpoints. PIN checking, lockout and the
//! at-most-once commit live in the core [`pinconfirm`] crate; this crate
//! provides the HTTP server, configuration, metrics and webhooks.
//!
//! # Modules
//!
//! - [`routes`]: HTTP endpoints (verify-pin, transactions, account PIN, health, metrics)
//! - [`config`]: [`ServerConfig`](config::ServerConfig) read from the environment
//! - [`bootstrap`]: builds the shared [`AppState`](state::AppState)
//! - [`webhook`]: signed commit notifications
//! - [`metrics`]: Prometheus counters and latency histogram

pub mod bootstrap;
pub mod config;
pub mod cors;
pub mod metrics;
pub mod routes;
pub mod state;
pub mod webhook;

// ABOUTME: PostgreSQL utilities module
// ABOUTME: Exports connection helpers used by the central store backend

pub mod connection;

pub use connection::{connect, connect_with_retry, init_tls_policy};

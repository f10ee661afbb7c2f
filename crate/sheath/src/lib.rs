//! Sheath - blocking TLS stream adapter
//!
//! Wraps any exclusively owned byte stream in TLS while preserving the
//! vectored, deadline-bounded stream contract, so callers need not know
//! whether TLS is involved.
//!
//! # Main Components
//!
//! - [stream]: the stream contract, the TLS adapter and the TCP base
//!   stream, plus an in-memory pipe for tests.
//! - [security]: TLS configuration from PEM files and peer certificate
//!   verification.
//! - [metrics]: the injectable metrics sink and the process-wide
//!   prometheus-backed counters.
//! - [utils]: logging setup.

pub mod metrics;
pub mod security;
pub mod stream;
pub mod utils;

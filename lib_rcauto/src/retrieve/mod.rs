//! # Data Retrieval Module
//!
//! Generic HTTP client used for everything that is not JSON-RPC against a
//! chain node: the remote signing service and the price feed source.
//!
//! The node-failover RPC client deliberately does not go through this layer,
//! since its retries are node rotations rather than repeated requests to the
//! same host.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Generic HTTP API client with retry middleware for resilient network requests.
pub mod ky_http;

//! # lib_rcauto
//!
//! Resource Credit (RC) monitoring and automatic RC delegation for a fleet of
//! Hive accounts. A primary account tops up tracked accounts that run low and
//! reclaims RC from accounts that hold more than they need.
//!
//! Every module sits behind a cargo feature of the same name; `full` (the
//! default) enables all of them.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

/// The immutable settings object handed to every component.
#[cfg(feature = "configs")]
pub mod configs;

/// History store for RC snapshots and confirmed delegations.
#[cfg(feature = "connections")]
pub mod connections;

/// Chain access: node-failover RPC, operations, signing and broadcast.
#[cfg(feature = "hive")]
pub mod hive;

/// Long-running periodic tasks (RC polling service, price feed).
#[cfg(feature = "ingestors")]
pub mod ingestors;

/// fern based log setup with file rotation.
#[cfg(feature = "loggers")]
pub mod loggers;

/// The RC accounting and delegation allocation engine.
#[cfg(feature = "rc")]
pub mod rc;

/// Generic HTTP client with retry middleware.
#[cfg(feature = "retrieve")]
pub mod retrieve;

/// Small helpers shared across modules.
#[cfg(feature = "utils")]
pub mod utils;

#[cfg(feature = "configs")]
pub use configs::settings::{Settings, SettingsError};

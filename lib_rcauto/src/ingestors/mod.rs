//! # Periodic Tasks
//!
//! Long-running, self-scheduling tasks hosted by the service binary. Each one
//! owns its sleep interval and stops on the shared shutdown broadcast.
//!
//! ## Contained Modules:
//! - **`rc_polling`**: the RC monitor and delegator loop.
//! - **`price_feed`**: the witness price feed publisher.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Witness price feed publisher.
pub mod price_feed;
/// The RC polling service.
pub mod rc_polling;

pub use price_feed::PriceFeedPlugin;
pub use rc_polling::{CycleError, CycleSummary, RcPollingService};

//! # Utilities Module
//!
//! General-purpose helpers used across the crate: chain timestamp parsing and
//! formatting, and the number formatting used by the RC table.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Time and number helpers.
pub mod misc;

pub use misc::*;

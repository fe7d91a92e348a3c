//! # Configuration Modules
//!
//! The settings object every component receives. Loading (environment, `.env`,
//! command line, JSON file) is the binaries' business; the library only
//! validates and carries the result.

/// The immutable, validated settings shared by all components.
pub mod settings;

//! Command-line and runtime configuration
//!
//! Turns raw CLI arguments into a validated [`RunConfig`]. Invalid values
//! (negative job counts, empty paths) are rejected here, before any work
//! is started.

mod settings;

pub use settings::*;

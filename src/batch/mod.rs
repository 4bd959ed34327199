//! Batch feature extraction
//!
//! Selects the views that still need describing and feeds them to the
//! dispatcher.

mod engine;
mod selector;

pub use engine::*;
pub use selector::*;

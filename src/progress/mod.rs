//! Progress reporting module
//!
//! Shows how far the batch has walked through the scene's views.

mod reporter;

pub use reporter::*;

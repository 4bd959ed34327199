//! Scene and image describer collaborators
//!
//! Loads the list of views to process and describes single images with an
//! external describer program. Nothing here knows about concurrency.

mod describer;
mod sfm;

pub use describer::*;
pub use sfm::*;

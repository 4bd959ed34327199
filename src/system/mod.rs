//! System resource probing and capacity planning
//!
//! Reads live memory and CPU counters and turns them into the number of
//! worker processes the dispatcher may run at once.

mod capacity;
mod resources;

pub use capacity::*;
pub use resources::*;

//! Core dispatch module
//!
//! Provides the bounded process dispatcher, its completion barrier
//! ([`Dispatcher::drain`]) and the worker spawners it launches jobs with.

mod dispatcher;
mod executor;

pub use dispatcher::*;
pub use executor::*;

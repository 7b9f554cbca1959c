//! Shared types and utilities for opmeter
//!
//! This crate contains the data structures exchanged between the record
//! producer, the cost analyzer and downstream aggregation: captured call
//! records, metric tuples, and the numeric lookup tables used to score them.

pub mod types;
pub mod utils;

#[cfg(feature = "wire-protocol")]
pub mod protocol;

// Re-export commonly used types
pub use types::{metrics::*, record::*};

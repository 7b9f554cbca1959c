//! Record and metric type definitions

pub mod metrics;
pub mod record;

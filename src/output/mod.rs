//! Output module
//!
//! Serialized block output from concurrent tests and final summary formats.

mod aggregator;
mod formatter;

pub use aggregator::OutputAggregator;
pub use formatter::{OutputFormat, ResultFormatter};

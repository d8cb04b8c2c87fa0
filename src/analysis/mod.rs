//! Batch-to-batch analysis.

pub mod comparison;

pub use self::comparison::{compare, Comparison, ComparisonItem};

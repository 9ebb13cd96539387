//! Analysis modules.
//!
//! Pure functions over per-copy predictions and per-sample outcomes.

pub mod aggregator;

pub use aggregator::*;

//! Shared helpers for the entitrack benchmarks.

pub mod utils;

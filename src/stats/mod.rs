//! Result statistics
//!
//! Per-patient sample histograms, filled concurrently by the client's sink
//! threads and printed once the workload has finished.

pub mod histogram;

pub use histogram::{Histogram, HistogramCollection};

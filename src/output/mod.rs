//! Output module for operator-facing reports
//!
//! This module handles:
//! - Loading queue and document statistics from storage
//! - Printing them for the `--stats` command

pub mod stats;

pub use stats::{load_statistics, print_statistics, JobStatistics};

//! In-process state for jobs and rate windows
//!
//! # Components
//!
//! - `JobStatus`: the persisted job lifecycle state machine
//! - `RateWindow`: per-domain sliding window owned by the rate limiter

mod job_state;
mod rate_window;

pub use job_state::JobStatus;
pub use rate_window::{RateWindow, MIN_RETRY_AFTER};

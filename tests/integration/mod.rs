//! Integration tests for the conductor
//!
//! Scheduling tests drive the orchestrator with a scripted fetcher and an
//! explicit clock; fetch tests run the real HTTP fetcher against wiremock
//! servers. Both use a file-backed SQLite database in a temp directory.

mod fetch_tests;
mod scheduling_tests;
mod support;

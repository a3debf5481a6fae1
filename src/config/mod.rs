//! Configuration module for Scrape-Conductor
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use scrape_conductor::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("conductor.toml")).unwrap();
//! println!("Polling {} sources", config.sources.len());
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, ExtractionConfig, OrchestratorConfig, OutputConfig, RateLimitConfig, RetryConfig,
    SourceEntry, TierOverrides, TiersConfig, UserAgentConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
pub use validation::validate;

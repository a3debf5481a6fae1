//! URL handling module for Scrape-Conductor
//!
//! Canonical URL normalization, link resolution, host extraction and
//! wildcard domain matching.

mod domain;
mod matcher;
mod normalize;

pub use domain::{domain_of, extract_domain};
pub use matcher::matches_wildcard;
pub use normalize::{normalize_url, resolve_link};

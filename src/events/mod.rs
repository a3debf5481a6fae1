//! Scheduling and extraction events
//!
//! The orchestrator reports what it does through an [`EventSink`]. The
//! default [`TracingSink`] turns every event into a structured `tracing`
//! record; [`MemorySink`] keeps them for inspection.

use crate::registry::Tier;
use serde::Serialize;
use std::sync::{Mutex, PoisonError};

/// Target used for every event logged by [`TracingSink`]
pub const EVENT_TARGET: &str = "scrape_conductor::events";

/// Events emitted by the orchestrator and its workers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ScrapeEvent {
    JobStarted {
        job_id: i64,
        source: String,
        tier: Tier,
        attempt: u32,
    },

    JobSucceeded {
        job_id: i64,
        source: String,
        documents: u32,
        elapsed_ms: u64,
    },

    /// Failed attempt that will be retried after `delay_ms`
    JobRetrying {
        job_id: i64,
        source: String,
        attempt: u32,
        delay_ms: u64,
        reason_code: String,
    },

    JobFailed {
        job_id: i64,
        source: String,
        attempt: u32,
        reason_code: String,
        error: String,
    },

    /// Admission denied locally or by the server; the job was rescheduled
    RateLimited {
        job_id: i64,
        source: String,
        domain: String,
        retry_after_ms: u64,
    },

    ExtractionFallbackUsed { source: String, url: String },

    /// Data-quality signal: the page template no longer matches the rules
    ExtractionStructureMismatch {
        source: String,
        url: String,
        reason: String,
    },

    /// Consecutive failed jobs reached the tier's alert threshold
    SourceAlert {
        source: String,
        tier: Tier,
        consecutive_failures: u32,
    },
}

impl ScrapeEvent {
    /// Stable event name, as used in the `event` field when serialized
    pub fn name(&self) -> &'static str {
        match self {
            Self::JobStarted { .. } => "job_started",
            Self::JobSucceeded { .. } => "job_succeeded",
            Self::JobRetrying { .. } => "job_retrying",
            Self::JobFailed { .. } => "job_failed",
            Self::RateLimited { .. } => "rate_limited",
            Self::ExtractionFallbackUsed { .. } => "extraction_fallback_used",
            Self::ExtractionStructureMismatch { .. } => "extraction_structure_mismatch",
            Self::SourceAlert { .. } => "source_alert",
        }
    }

    /// Source the event concerns
    pub fn source(&self) -> &str {
        match self {
            Self::JobStarted { source, .. }
            | Self::JobSucceeded { source, .. }
            | Self::JobRetrying { source, .. }
            | Self::JobFailed { source, .. }
            | Self::RateLimited { source, .. }
            | Self::ExtractionFallbackUsed { source, .. }
            | Self::ExtractionStructureMismatch { source, .. }
            | Self::SourceAlert { source, .. } => source,
        }
    }
}

/// Consumer of scheduling and extraction events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ScrapeEvent);
}

/// Logs each event under [`EVENT_TARGET`]
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: ScrapeEvent) {
        let name = event.name();
        match &event {
            ScrapeEvent::JobStarted {
                job_id,
                source,
                tier,
                attempt,
            } => {
                tracing::debug!(target: EVENT_TARGET, event = name, job_id, %source, %tier, attempt)
            }
            ScrapeEvent::JobSucceeded {
                job_id,
                source,
                documents,
                elapsed_ms,
            } => {
                tracing::info!(target: EVENT_TARGET, event = name, job_id, %source, documents, elapsed_ms)
            }
            ScrapeEvent::JobRetrying {
                job_id,
                source,
                attempt,
                delay_ms,
                reason_code,
            } => {
                tracing::info!(target: EVENT_TARGET, event = name, job_id, %source, attempt, delay_ms, %reason_code)
            }
            ScrapeEvent::JobFailed {
                job_id,
                source,
                attempt,
                reason_code,
                error,
            } => {
                tracing::warn!(target: EVENT_TARGET, event = name, job_id, %source, attempt, %reason_code, %error)
            }
            ScrapeEvent::RateLimited {
                job_id,
                source,
                domain,
                retry_after_ms,
            } => {
                tracing::debug!(target: EVENT_TARGET, event = name, job_id, %source, %domain, retry_after_ms)
            }
            ScrapeEvent::ExtractionFallbackUsed { source, url } => {
                tracing::debug!(target: EVENT_TARGET, event = name, %source, %url)
            }
            ScrapeEvent::ExtractionStructureMismatch {
                source,
                url,
                reason,
            } => {
                tracing::warn!(target: EVENT_TARGET, event = name, %source, %url, %reason)
            }
            ScrapeEvent::SourceAlert {
                source,
                tier,
                consecutive_failures,
            } => {
                tracing::error!(target: EVENT_TARGET, event = name, %source, %tier, consecutive_failures)
            }
        }
    }
}

/// Collects events in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<ScrapeEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything emitted so far
    pub fn events(&self) -> Vec<ScrapeEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of events with the given name
    pub fn count(&self, name: &str) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.name() == name)
            .count()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: ScrapeEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

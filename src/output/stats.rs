//! Statistics generation from the conductor database
//!
//! This module provides functionality for extracting and displaying
//! queue and document statistics from the storage layer.

use crate::state::JobStatus;
use crate::storage::{DocumentStore, JobStore, SourceStateRecord};
use crate::ConductorError;
use std::collections::HashMap;

/// Queue and document statistics summary
#[derive(Debug, Clone)]
pub struct JobStatistics {
    /// Total number of jobs still in the database
    pub total_jobs: u64,

    /// Count of jobs by status
    pub jobs_by_status: HashMap<JobStatus, u64>,

    /// Total number of stored documents
    pub documents: u64,

    /// Sources currently flagged by the alert threshold
    pub flagged_sources: Vec<SourceStateRecord>,

    /// Sources with a non-zero failure streak, worst first
    pub failing_sources: Vec<SourceStateRecord>,
}

impl JobStatistics {
    pub fn count(&self, status: JobStatus) -> u64 {
        self.jobs_by_status.get(&status).copied().unwrap_or(0)
    }
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `jobs` - The job queue to query
/// * `documents` - The document store to query
///
/// # Returns
///
/// * `Ok(JobStatistics)` - Successfully loaded statistics
/// * `Err(ConductorError)` - Failed to query statistics
pub fn load_statistics(
    jobs: &dyn JobStore,
    documents: &dyn DocumentStore,
) -> Result<JobStatistics, ConductorError> {
    let jobs_by_status = jobs.count_by_status()?;
    let total_jobs = jobs_by_status.values().sum();

    let states = jobs.load_source_states()?;
    let flagged_sources = states.iter().filter(|s| s.flagged).cloned().collect();

    let mut failing_sources: Vec<SourceStateRecord> = states
        .into_iter()
        .filter(|s| s.consecutive_failures > 0)
        .collect();
    failing_sources.sort_by(|a, b| {
        b.consecutive_failures
            .cmp(&a.consecutive_failures)
            .then_with(|| a.source.cmp(&b.source))
    });

    Ok(JobStatistics {
        total_jobs,
        jobs_by_status,
        documents: documents.count_documents(None)?,
        flagged_sources,
        failing_sources,
    })
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &JobStatistics) {
    println!("=== Conductor Statistics ===\n");

    println!("Overview:");
    println!("  Jobs recorded: {}", stats.total_jobs);
    println!("  Documents stored: {}", stats.documents);
    println!();

    println!("Jobs by Status:");
    for status in [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Retrying,
        JobStatus::Succeeded,
        JobStatus::Failed,
    ] {
        let count = stats.count(status);
        let percentage = if stats.total_jobs > 0 {
            (count as f64 / stats.total_jobs as f64) * 100.0
        } else {
            0.0
        };
        println!("  {}: {} ({:.1}%)", status, count, percentage);
    }
    println!();

    if !stats.failing_sources.is_empty() {
        println!("Failing Sources ({}):", stats.failing_sources.len());
        for state in &stats.failing_sources {
            let marker = if state.flagged { " [flagged]" } else { "" };
            println!(
                "  - {}: {} consecutive failures{}",
                state.source, state.consecutive_failures, marker
            );
        }
        println!();
    }

    let finished = stats.count(JobStatus::Succeeded) + stats.count(JobStatus::Failed);
    let success_rate = if finished > 0 {
        (stats.count(JobStatus::Succeeded) as f64 / finished as f64) * 100.0
    } else {
        0.0
    };

    println!(
        "Success Rate: {:.1}% ({} / {} finished jobs succeeded)",
        success_rate,
        stats.count(JobStatus::Succeeded),
        finished
    );
}

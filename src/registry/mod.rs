//! Source catalog and polling schedule
//!
//! The registry is owned by the orchestrator behind a `RwLock`. Tier loops
//! take a read view for `list_due` and a short write lock to record when a
//! source was scheduled; admin updates land between passes.

mod source;
mod tier;

pub use source::{ExtractionRules, Source, SourceMode};
pub use tier::{Tier, TierSettings};

use crate::config::Config;
use crate::{ConductorError, ConfigError};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct SourceRegistry {
    /// Keyed by name so iteration order is stable
    sources: BTreeMap<String, Source>,
    tiers: HashMap<Tier, TierSettings>,
    last_scheduled: HashMap<String, DateTime<Utc>>,
}

impl SourceRegistry {
    /// Builds the registry from a validated configuration
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let sources = config
            .sources
            .iter()
            .map(|entry| Source::from_entry(entry, &config.tiers))
            .collect::<Result<Vec<_>, _>>()?;

        let tiers = Tier::all()
            .into_iter()
            .map(|tier| (tier, TierSettings::resolve(tier, &config.tiers)))
            .collect();

        Ok(Self::new(sources, tiers))
    }

    pub fn new(sources: Vec<Source>, tiers: HashMap<Tier, TierSettings>) -> Self {
        Self {
            sources: sources.into_iter().map(|s| (s.name.clone(), s)).collect(),
            tiers,
            last_scheduled: HashMap::new(),
        }
    }

    /// Sources whose `last_scheduled + interval <= now`, enabled only
    ///
    /// A source that has never been scheduled is due immediately.
    pub fn list_due(&self, now: DateTime<Utc>) -> Vec<Source> {
        self.sources
            .values()
            .filter(|source| self.is_due(source, now))
            .cloned()
            .collect()
    }

    /// [`list_due`](Self::list_due) restricted to one tier
    pub fn list_due_in_tier(&self, now: DateTime<Utc>, tier: Tier) -> Vec<Source> {
        self.sources
            .values()
            .filter(|source| source.tier == tier && self.is_due(source, now))
            .cloned()
            .collect()
    }

    fn is_due(&self, source: &Source, now: DateTime<Utc>) -> bool {
        if !source.enabled {
            return false;
        }

        match self.last_scheduled.get(&source.name) {
            // An interval reaching past the representable range never elapses
            Some(last) => next_due(*last, source.interval).map_or(false, |due| due <= now),
            None => true,
        }
    }

    /// Records that the source's interval was consumed at `at`
    pub fn mark_scheduled(&mut self, name: &str, at: DateTime<Utc>) {
        self.last_scheduled.insert(name.to_string(), at);
    }

    pub fn last_scheduled(&self, name: &str) -> Option<DateTime<Utc>> {
        self.last_scheduled.get(name).copied()
    }

    /// Restores persisted schedule state, ignoring names no longer configured
    pub fn seed_schedule<I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = (String, DateTime<Utc>)>,
    {
        for (name, at) in entries {
            if self.sources.contains_key(&name) {
                self.last_scheduled.insert(name, at);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Source> {
        self.sources.get(name)
    }

    pub fn sources(&self) -> impl Iterator<Item = &Source> {
        self.sources.values()
    }

    pub fn in_tier(&self, tier: Tier) -> impl Iterator<Item = &Source> {
        self.sources.values().filter(move |s| s.tier == tier)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn tier_settings(&self, tier: Tier) -> TierSettings {
        self.tiers
            .get(&tier)
            .copied()
            .unwrap_or_else(|| TierSettings::defaults(tier))
    }

    /// Enables or disables a source from the next scheduling pass on
    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> Result<(), ConductorError> {
        let source = self
            .sources
            .get_mut(name)
            .ok_or_else(|| ConductorError::UnknownSource(name.to_string()))?;
        source.enabled = enabled;
        info!(source = name, enabled, "source enablement changed");
        Ok(())
    }

    /// Changes a source's polling interval; measured from its last scheduling
    pub fn set_interval(&mut self, name: &str, interval: Duration) -> Result<(), ConductorError> {
        let source = self
            .sources
            .get_mut(name)
            .ok_or_else(|| ConductorError::UnknownSource(name.to_string()))?;
        source.interval = interval;
        info!(
            source = name,
            interval_secs = interval.as_secs(),
            "source interval changed"
        );
        Ok(())
    }

    /// Replaces the catalog, keeping the schedule of sources that survive
    pub fn reload(&mut self, other: SourceRegistry) {
        let mut last_scheduled = std::mem::take(&mut self.last_scheduled);
        last_scheduled.retain(|name, _| other.sources.contains_key(name));
        for (name, at) in other.last_scheduled {
            last_scheduled.entry(name).or_insert(at);
        }

        debug!(
            before = self.sources.len(),
            after = other.sources.len(),
            "reloading source registry"
        );

        self.sources = other.sources;
        self.tiers = other.tiers;
        self.last_scheduled = last_scheduled;
    }
}

fn next_due(last: DateTime<Utc>, interval: Duration) -> Option<DateTime<Utc>> {
    let interval = chrono::Duration::from_std(interval).ok()?;
    last.checked_add_signed(interval)
}

mod conflict;
mod error;
mod mutations;
mod queries;
mod slots;
#[cfg(test)]
mod tests;

pub use conflict::{filter_available, find_conflict, occupied_spans, resolve_duration, service_duration};
pub use error::EngineError;
pub use queries::AppointmentFilter;
pub use slots::{effective_hours, generate_slots};

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::catalog::Catalog;
use crate::store::AppointmentStore;

/// How an appointment's occupied interval gets its length.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DurationPolicy {
    /// Store the service duration on the appointment when it is created.
    #[default]
    Snapshot,
    /// Look the duration up in the current catalog every time.
    Live,
}

impl FromStr for DurationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "snapshot" => Ok(DurationPolicy::Snapshot),
            "live" => Ok(DurationPolicy::Live),
            other => Err(format!("expected 'snapshot' or 'live', got '{other}'")),
        }
    }
}

impl fmt::Display for DurationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DurationPolicy::Snapshot => "snapshot",
            DurationPolicy::Live => "live",
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EngineOptions {
    /// When the store fails during a slot read, log it and treat the day as empty.
    pub degraded_reads: bool,
    pub duration_policy: DurationPolicy,
}

type DayKey = (String, NaiveDate);

/// Scheduling engine: slot queries plus the single write path for appointments.
pub struct Engine {
    pub catalog: Arc<Catalog>,
    store: Arc<dyn AppointmentStore>,
    options: EngineOptions,
    /// Serializes mutations per (professional, date).
    day_locks: DashMap<DayKey, Arc<Mutex<()>>>,
    /// Mutations hold it shared; a bulk wipe holds it exclusively.
    gate: RwLock<()>,
}

impl Engine {
    pub fn new(catalog: Arc<Catalog>, store: Arc<dyn AppointmentStore>, options: EngineOptions) -> Self {
        Self {
            catalog,
            store,
            options,
            day_locks: DashMap::new(),
            gate: RwLock::new(()),
        }
    }

    pub fn store(&self) -> &Arc<dyn AppointmentStore> {
        &self.store
    }

    /// Serialize with every other mutation of the same professional and date.
    async fn lock_day(&self, professional_id: &str, date: NaiveDate) -> DayGuard<'_> {
        let key = (professional_id.to_string(), date);
        let lock = self.day_locks.entry(key.clone()).or_default().clone();
        DayGuard {
            locks: &self.day_locks,
            key,
            guard: Some(lock.lock_owned().await),
        }
    }
}

/// Held for the duration of one mutation. Dropping the last holder of a day's
/// mutex also removes it from the map.
struct DayGuard<'a> {
    locks: &'a DashMap<DayKey, Arc<Mutex<()>>>,
    key: DayKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for DayGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

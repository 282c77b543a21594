use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;
use tracing::{debug, warn};
use ulid::Ulid;

use crate::model::*;
use crate::observability::*;

use super::conflict::{filter_available, local_now};
use super::slots::generate_slots;
use super::{Engine, EngineError};

/// Optional predicates for listing appointments. Empty matches everything.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentFilter {
    pub professional_id: Option<String>,
    pub date: Option<NaiveDate>,
    pub status: Option<AppointmentStatus>,
}

impl AppointmentFilter {
    pub fn matches(&self, a: &Appointment) -> bool {
        self.professional_id.as_ref().is_none_or(|p| *p == a.professional_id)
            && self.date.is_none_or(|d| d == a.date)
            && self.status.is_none_or(|s| s == a.status)
    }
}

impl Engine {
    /// Free start times for a service, in the business's current local time.
    pub async fn get_available_slots(
        &self,
        date: NaiveDate,
        professional_id: &str,
        service_id: &str,
    ) -> Result<Vec<ClockTime>, EngineError> {
        let now = local_now(&self.catalog.business().await);
        self.get_available_slots_at(date, professional_id, service_id, now).await
    }

    /// Same as `get_available_slots` with an explicit local "now".
    pub async fn get_available_slots_at(
        &self,
        date: NaiveDate,
        professional_id: &str,
        service_id: &str,
        now: NaiveDateTime,
    ) -> Result<Vec<ClockTime>, EngineError> {
        let start = std::time::Instant::now();
        metrics::counter!(SLOT_QUERIES_TOTAL).increment(1);

        let catalog = self.catalog.snapshot().await;
        let candidates = generate_slots(&catalog, date, professional_id, service_id, now);
        if candidates.is_empty() {
            return Ok(candidates);
        }

        let existing = match self.store.list_day(professional_id, date).await {
            Ok(existing) => existing,
            Err(e) if self.options.degraded_reads => {
                metrics::counter!(DEGRADED_READS_TOTAL).increment(1);
                warn!("degraded read for {professional_id} on {date}, assuming no appointments: {e}");
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };

        let free = filter_available(&catalog, &candidates, professional_id, date, service_id, &existing);
        metrics::histogram!(SLOT_QUERY_DURATION_SECONDS).record(start.elapsed().as_secs_f64());
        debug!(
            "slots {professional_id} {date} {service_id}: {} of {} free",
            free.len(),
            candidates.len()
        );
        Ok(free)
    }

    /// Matching appointments in insertion order.
    pub async fn list_appointments(&self, filter: &AppointmentFilter) -> Result<Vec<Appointment>, EngineError> {
        let all = match (&filter.professional_id, filter.date) {
            (Some(p), Some(d)) => self.store.list_day(p, d).await?,
            _ => self.store.list().await?,
        };
        Ok(all.into_iter().filter(|a| filter.matches(a)).collect())
    }

    pub async fn get_appointment(&self, id: Ulid) -> Result<Appointment, EngineError> {
        self.store.get(id).await?.ok_or(EngineError::NotFound(id))
    }
}

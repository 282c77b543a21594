use chrono::{NaiveDate, NaiveDateTime, Timelike};

use crate::catalog::CatalogSnapshot;
use crate::limits::SATURDAY;
use crate::model::*;

// ── Slot Generation ───────────────────────────────────────────────

/// Working window for a professional on `date`.
///
/// Professional hours override the business default. On Saturdays the business
/// Saturday close wins over everything, including a later professional close.
pub fn effective_hours(
    catalog: &CatalogSnapshot,
    professional: &Professional,
    date: NaiveDate,
) -> (ClockTime, ClockTime) {
    let business = &catalog.business;
    let open = professional.open_time.unwrap_or(business.open_time);
    let mut close = professional.close_time.unwrap_or(business.close_time);
    if weekday_number(date) == SATURDAY
        && let Some(saturday_close) = business.saturday_close
    {
        close = saturday_close;
    }
    (open, close)
}

/// Candidate start times for a visible service, before conflict filtering.
///
/// `now` is the current wall-clock time in the business timezone. Slots on
/// today's date at or before `now` are dropped, and past dates produce nothing.
/// Unknown ids, ineligible professionals and closed weekdays yield an empty list.
pub fn generate_slots(
    catalog: &CatalogSnapshot,
    date: NaiveDate,
    professional_id: &str,
    service_id: &str,
    now: NaiveDateTime,
) -> Vec<ClockTime> {
    let business = &catalog.business;
    let (Some(professional), Some(service)) =
        (catalog.professional(professional_id), catalog.service(service_id))
    else {
        return Vec::new();
    };
    if !professional.performs(service_id) || !business.is_open_on(date) {
        return Vec::new();
    }
    if business.slot_interval == 0 || date < now.date() {
        return Vec::new();
    }

    let cutoff = (date == now.date()).then(|| now.hour() * 60 + now.minute());
    let (open, close) = effective_hours(catalog, professional, date);
    let duration = service.duration_minutes;

    let mut slots = Vec::new();
    let mut start = open.minutes();
    while start < close.minutes() {
        if start + duration > close.minutes() {
            break;
        }
        if cutoff.is_none_or(|c| start > c) {
            slots.push(ClockTime::from_minutes(start));
        }
        start += business.slot_interval;
    }
    slots
}

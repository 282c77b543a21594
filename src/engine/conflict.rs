use chrono::{NaiveDate, NaiveDateTime, Utc};
use ulid::Ulid;

use crate::catalog::CatalogSnapshot;
use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// Current wall-clock time in the business timezone.
pub(crate) fn local_now(business: &BusinessConfig) -> NaiveDateTime {
    Utc::now().with_timezone(&business.offset()).naive_local()
}

pub(crate) fn validate_new(new: &NewAppointment) -> Result<(), EngineError> {
    if new.professional_id.len() > MAX_ID_LEN || new.service_id.len() > MAX_ID_LEN {
        return Err(EngineError::LimitExceeded("id too long"));
    }
    if new.customer_name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("customer name too long"));
    }
    if new.customer_phone.len() > MAX_PHONE_LEN {
        return Err(EngineError::LimitExceeded("customer phone too long"));
    }
    if let Some(ref note) = new.customer_note
        && note.len() > MAX_NOTE_LEN
    {
        return Err(EngineError::LimitExceeded("customer note too long"));
    }
    Ok(())
}

/// Duration of a service id looked up in visible and hidden catalogs,
/// falling back to the default for deleted services.
pub fn service_duration(catalog: &CatalogSnapshot, service_id: &str) -> Minutes {
    catalog
        .any_service(service_id)
        .map(|s| s.duration_minutes)
        .filter(|d| *d > 0)
        .unwrap_or(DEFAULT_DURATION_MINUTES)
}

/// A snapshotted duration wins; otherwise the current catalog decides.
pub fn resolve_duration(catalog: &CatalogSnapshot, appointment: &Appointment) -> Minutes {
    match appointment.duration_minutes {
        Some(d) if d > 0 => d,
        _ => service_duration(catalog, &appointment.service_id),
    }
}

/// Intervals held by confirmed and blocked appointments of one professional on one date.
pub fn occupied_spans(
    catalog: &CatalogSnapshot,
    existing: &[Appointment],
    professional_id: &str,
    date: NaiveDate,
) -> Vec<(Ulid, Span)> {
    let mut spans: Vec<(Ulid, Span)> = existing
        .iter()
        .filter(|a| a.occupies(professional_id, date))
        .map(|a| (a.id, Span::starting_at(a.time, resolve_duration(catalog, a))))
        .collect();
    spans.sort_by_key(|(_, s)| s.start);
    spans
}

pub fn find_conflict(occupied: &[(Ulid, Span)], span: &Span) -> Option<Ulid> {
    occupied
        .iter()
        .find(|(_, existing)| existing.overlaps(span))
        .map(|(id, _)| *id)
}

/// Candidates whose interval overlaps none of the existing commitments.
pub fn filter_available(
    catalog: &CatalogSnapshot,
    candidates: &[ClockTime],
    professional_id: &str,
    date: NaiveDate,
    service_id: &str,
    existing: &[Appointment],
) -> Vec<ClockTime> {
    let occupied = occupied_spans(catalog, existing, professional_id, date);
    if occupied.is_empty() {
        return candidates.to_vec();
    }
    let duration = service_duration(catalog, service_id);
    candidates
        .iter()
        .copied()
        .filter(|start| find_conflict(&occupied, &Span::starting_at(*start, duration)).is_none())
        .collect()
}

pub(crate) fn check_no_conflict(
    catalog: &CatalogSnapshot,
    existing: &[Appointment],
    new: &NewAppointment,
    duration: Minutes,
) -> Result<(), EngineError> {
    let occupied = occupied_spans(catalog, existing, &new.professional_id, new.date);
    let span = Span::starting_at(new.time, duration);
    match find_conflict(&occupied, &span) {
        Some(id) => Err(EngineError::Conflict(id)),
        None => Ok(()),
    }
}

use chrono::Utc;
use tracing::{info, warn};
use ulid::Ulid;

use crate::model::*;
use crate::observability::*;

use super::conflict::{check_no_conflict, validate_new};
use super::{DurationPolicy, Engine, EngineError};

impl Engine {
    /// Validate and commit a new appointment.
    ///
    /// The overlap check runs against every confirmed or blocked appointment of the
    /// professional on that date while the day's lock is held, so two requests for
    /// the same slot in this process cannot both pass it.
    pub async fn create_appointment(&self, new: NewAppointment) -> Result<Appointment, EngineError> {
        validate_new(&new)?;
        let catalog = self.catalog.snapshot().await;

        let professional = catalog
            .professional(&new.professional_id)
            .ok_or_else(|| EngineError::UnknownProfessional(new.professional_id.clone()))?;
        let service = catalog
            .any_service(&new.service_id)
            .ok_or_else(|| EngineError::UnknownService(new.service_id.clone()))?;
        let hidden = catalog.is_hidden(&new.service_id);
        if !hidden && !professional.performs(&new.service_id) {
            return Err(EngineError::NotEligible {
                professional_id: new.professional_id.clone(),
                service_id: new.service_id.clone(),
            });
        }
        let duration = service.duration_minutes;
        let status = if hidden {
            AppointmentStatus::Blocked
        } else {
            AppointmentStatus::Confirmed
        };

        let _gate = self.gate.read().await;
        let _day = self.lock_day(&new.professional_id, new.date).await;

        let existing = self.store.list_day(&new.professional_id, new.date).await?;
        if let Err(e) = check_no_conflict(&catalog, &existing, &new, duration) {
            metrics::counter!(BOOKING_CONFLICTS_TOTAL).increment(1);
            warn!(
                "booking rejected: {} {} {} ({}): {e}",
                new.professional_id, new.date, new.time, new.service_id
            );
            return Err(e);
        }

        let appointment = Appointment {
            id: Ulid::new(),
            professional_id: new.professional_id,
            service_id: new.service_id,
            date: new.date,
            time: new.time,
            customer_name: new.customer_name,
            customer_phone: new.customer_phone,
            customer_note: new.customer_note,
            status,
            created_at: Utc::now(),
            duration_minutes: match self.options.duration_policy {
                DurationPolicy::Snapshot => Some(duration),
                DurationPolicy::Live => None,
            },
        };

        if let Err(e) = self.store.insert(&appointment).await {
            let e = EngineError::from(e);
            if e.is_conflict() {
                metrics::counter!(BOOKING_CONFLICTS_TOTAL).increment(1);
                warn!(
                    "booking rejected by store: {} {} {}",
                    appointment.professional_id, appointment.date, appointment.time
                );
            }
            return Err(e);
        }

        metrics::counter!(APPOINTMENTS_CREATED_TOTAL, "status" => status.as_str()).increment(1);
        info!(
            "appointment {} {status}: {} {} {} ({}, {} min)",
            appointment.id,
            appointment.professional_id,
            appointment.date,
            appointment.time,
            appointment.service_id,
            duration
        );
        Ok(appointment)
    }

    pub async fn cancel_appointment(&self, id: Ulid) -> Result<Appointment, EngineError> {
        self.transition(id, AppointmentStatus::Cancelled).await
    }

    pub async fn complete_appointment(&self, id: Ulid) -> Result<Appointment, EngineError> {
        self.transition(id, AppointmentStatus::Completed).await
    }

    /// Repeating the current status is a no-op that returns the record.
    async fn transition(&self, id: Ulid, to: AppointmentStatus) -> Result<Appointment, EngineError> {
        let _gate = self.gate.read().await;
        let located = self.store.get(id).await?.ok_or(EngineError::NotFound(id))?;
        let _day = self.lock_day(&located.professional_id, located.date).await;

        let current = self.store.get(id).await?.ok_or(EngineError::NotFound(id))?;
        if current.status == to {
            return Ok(current);
        }
        if !current.status.can_transition_to(to) {
            return Err(EngineError::InvalidTransition {
                id,
                from: current.status,
                to,
            });
        }

        let updated = self.store.set_status(id, to).await?;
        metrics::counter!(STATUS_CHANGES_TOTAL, "status" => to.as_str()).increment(1);
        info!("appointment {id}: {} -> {}", current.status, updated.status);
        Ok(updated)
    }

    /// Delete every appointment. Waits for in-flight mutations to finish first.
    pub async fn clear_appointments(&self) -> Result<(), EngineError> {
        let _gate = self.gate.write().await;
        self.store.clear_all().await?;
        self.day_locks.clear();
        warn!("all appointments cleared");
        Ok(())
    }
}

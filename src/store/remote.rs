use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{error, info};
use ulid::Ulid;

use crate::model::*;

use super::{AppointmentStore, StoreError};

/// Dates and times are stored as `YYYY-MM-DD` / `HH:MM` text, like the hosted table
/// the booking UI has always written to.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS appointments (
    seq              BIGSERIAL,
    id               TEXT PRIMARY KEY,
    professional_id  TEXT NOT NULL,
    service_id       TEXT NOT NULL,
    date             TEXT NOT NULL,
    time             TEXT NOT NULL,
    customer_name    TEXT NOT NULL,
    customer_phone   TEXT NOT NULL DEFAULT '',
    customer_note    TEXT,
    status           TEXT NOT NULL,
    created_at       TEXT NOT NULL,
    duration_minutes INTEGER
);
CREATE UNIQUE INDEX IF NOT EXISTS appointments_active_slot
    ON appointments (professional_id, date, time)
    WHERE status IN ('confirmed', 'blocked');
";

const COLUMNS: &str = "id, professional_id, service_id, date, time, customer_name, \
                       customer_phone, customer_note, status, created_at, duration_minutes";

/// Appointment store backed by a PostgreSQL table.
pub struct PgStore {
    client: Client,
}

fn pg_error(e: tokio_postgres::Error) -> StoreError {
    if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
        StoreError::Duplicate
    } else {
        StoreError::Unavailable(e.to_string())
    }
}

fn corrupt(field: &str, e: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt(format!("{field}: {e}"))
}

fn row_to_appointment(row: &Row) -> Result<Appointment, StoreError> {
    let text = |name: &str| row.try_get::<_, String>(name).map_err(|e| corrupt(name, e));

    let id = Ulid::from_string(&text("id")?).map_err(|e| corrupt("id", e))?;
    let created_at = DateTime::parse_from_rfc3339(&text("created_at")?)
        .map_err(|e| corrupt("created_at", e))?
        .with_timezone(&Utc);
    let duration: Option<i32> = row
        .try_get("duration_minutes")
        .map_err(|e| corrupt("duration_minutes", e))?;

    Ok(Appointment {
        id,
        professional_id: text("professional_id")?,
        service_id: text("service_id")?,
        date: parse_date(&text("date")?).map_err(|e| corrupt("date", e))?,
        time: text("time")?.parse().map_err(|e| corrupt("time", e))?,
        customer_name: text("customer_name")?,
        customer_phone: text("customer_phone")?,
        customer_note: row
            .try_get("customer_note")
            .map_err(|e| corrupt("customer_note", e))?,
        status: text("status")?.parse().map_err(|e| corrupt("status", e))?,
        created_at,
        duration_minutes: duration.and_then(|d| u32::try_from(d).ok()),
    })
}

fn rows_to_appointments(rows: &[Row]) -> Result<Vec<Appointment>, StoreError> {
    rows.iter().map(row_to_appointment).collect()
}

impl PgStore {
    /// Connect, spawn the connection driver, and create the table if missing.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let (client, connection) = tokio_postgres::connect(url, NoTls).await.map_err(pg_error)?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("postgres connection error: {e}");
            }
        });
        client.batch_execute(SCHEMA).await.map_err(pg_error)?;
        info!("postgres store ready");
        Ok(Self { client })
    }
}

#[async_trait]
impl AppointmentStore for PgStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn list(&self) -> Result<Vec<Appointment>, StoreError> {
        let sql = format!("SELECT {COLUMNS} FROM appointments ORDER BY seq");
        let rows = self.client.query(sql.as_str(), &[]).await.map_err(pg_error)?;
        rows_to_appointments(&rows)
    }

    async fn insert(&self, a: &Appointment) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO appointments ({COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"
        );
        let duration: Option<i32> = a.duration_minutes.and_then(|d| i32::try_from(d).ok());
        self.client
            .execute(
                sql.as_str(),
                &[
                    &a.id.to_string(),
                    &a.professional_id,
                    &a.service_id,
                    &a.date.format("%Y-%m-%d").to_string(),
                    &a.time.to_string(),
                    &a.customer_name,
                    &a.customer_phone,
                    &a.customer_note,
                    &a.status.as_str(),
                    &a.created_at.to_rfc3339(),
                    &duration,
                ],
            )
            .await
            .map_err(pg_error)?;
        Ok(())
    }

    async fn set_status(&self, id: Ulid, status: AppointmentStatus) -> Result<Appointment, StoreError> {
        let id_text = id.to_string();
        let sql = format!(
            "UPDATE appointments SET status = $2 \
             WHERE id = $1 AND status IN ('confirmed', 'blocked') \
             RETURNING {COLUMNS}"
        );
        let updated = self
            .client
            .query_opt(sql.as_str(), &[&id_text, &status.as_str()])
            .await
            .map_err(pg_error)?;
        if let Some(row) = updated {
            return row_to_appointment(&row);
        }
        // Terminal rows are left alone and reported as they are.
        self.get(id).await?.ok_or(StoreError::NotFound(id))
    }

    async fn clear_all(&self) -> Result<(), StoreError> {
        self.client
            .execute("DELETE FROM appointments", &[])
            .await
            .map_err(pg_error)?;
        Ok(())
    }

    async fn get(&self, id: Ulid) -> Result<Option<Appointment>, StoreError> {
        let sql = format!("SELECT {COLUMNS} FROM appointments WHERE id = $1");
        let row = self
            .client
            .query_opt(sql.as_str(), &[&id.to_string()])
            .await
            .map_err(pg_error)?;
        row.as_ref().map(row_to_appointment).transpose()
    }

    async fn list_day(&self, professional_id: &str, date: NaiveDate) -> Result<Vec<Appointment>, StoreError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM appointments WHERE professional_id = $1 AND date = $2 ORDER BY seq"
        );
        let rows = self
            .client
            .query(sql.as_str(), &[&professional_id, &date.format("%Y-%m-%d").to_string()])
            .await
            .map_err(pg_error)?;
        rows_to_appointments(&rows)
    }
}

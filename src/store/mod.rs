mod local;
mod remote;

pub use local::{LocalStore, WalStats};
pub use remote::PgStore;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::info;
use ulid::Ulid;

use crate::config::Config;
use crate::model::*;

#[derive(Debug)]
pub enum StoreError {
    /// Backend unreachable or failed the call.
    Unavailable(String),
    Timeout,
    /// An active appointment already holds this (professional, date, time).
    Duplicate,
    NotFound(Ulid),
    /// A persisted record could not be decoded.
    Corrupt(String),
    Wal(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Unavailable(e) => write!(f, "store unavailable: {e}"),
            StoreError::Timeout => write!(f, "store call timed out"),
            StoreError::Duplicate => write!(f, "slot already taken"),
            StoreError::NotFound(id) => write!(f, "appointment not found: {id}"),
            StoreError::Corrupt(e) => write!(f, "corrupt record: {e}"),
            StoreError::Wal(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Durable collection of appointments. No scheduling logic lives here.
#[async_trait]
pub trait AppointmentStore: Send + Sync {
    fn backend(&self) -> &'static str;

    /// All appointments in insertion order.
    async fn list(&self) -> Result<Vec<Appointment>, StoreError>;

    /// Rejects a second active appointment at the same professional, date and start time.
    async fn insert(&self, appointment: &Appointment) -> Result<(), StoreError>;

    /// Moves an active appointment to `status`. A terminal record is returned
    /// unchanged, so a vacated slot is never reoccupied.
    async fn set_status(&self, id: Ulid, status: AppointmentStatus) -> Result<Appointment, StoreError>;

    async fn clear_all(&self) -> Result<(), StoreError>;

    async fn get(&self, id: Ulid) -> Result<Option<Appointment>, StoreError> {
        Ok(self.list().await?.into_iter().find(|a| a.id == id))
    }

    /// Every appointment of one professional on one date, any status.
    async fn list_day(&self, professional_id: &str, date: NaiveDate) -> Result<Vec<Appointment>, StoreError> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|a| a.professional_id == professional_id && a.date == date)
            .collect())
    }
}

/// Bounds every call of the wrapped store by a fixed timeout.
pub struct TimedStore {
    inner: Arc<dyn AppointmentStore>,
    timeout: Duration,
}

impl TimedStore {
    pub fn new(inner: Arc<dyn AppointmentStore>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn bounded<T>(&self, fut: impl Future<Output = Result<T, StoreError>>) -> Result<T, StoreError> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| StoreError::Timeout)?
    }
}

#[async_trait]
impl AppointmentStore for TimedStore {
    fn backend(&self) -> &'static str {
        self.inner.backend()
    }

    async fn list(&self) -> Result<Vec<Appointment>, StoreError> {
        self.bounded(self.inner.list()).await
    }

    async fn insert(&self, appointment: &Appointment) -> Result<(), StoreError> {
        self.bounded(self.inner.insert(appointment)).await
    }

    async fn set_status(&self, id: Ulid, status: AppointmentStatus) -> Result<Appointment, StoreError> {
        self.bounded(self.inner.set_status(id, status)).await
    }

    async fn clear_all(&self) -> Result<(), StoreError> {
        self.bounded(self.inner.clear_all()).await
    }

    async fn get(&self, id: Ulid) -> Result<Option<Appointment>, StoreError> {
        self.bounded(self.inner.get(id)).await
    }

    async fn list_day(&self, professional_id: &str, date: NaiveDate) -> Result<Vec<Appointment>, StoreError> {
        self.bounded(self.inner.list_day(professional_id, date)).await
    }
}

pub struct OpenedStore {
    pub store: Arc<dyn AppointmentStore>,
    /// Present when the local WAL backend is in use, for the compactor.
    pub local: Option<Arc<LocalStore>>,
}

/// Pick the backend once at startup: PostgreSQL when a database URL is configured,
/// the local WAL otherwise.
pub async fn open(config: &Config) -> Result<OpenedStore, StoreError> {
    let (inner, local): (Arc<dyn AppointmentStore>, Option<Arc<LocalStore>>) =
        match config.database_url {
            Some(ref url) => {
                let pg = PgStore::connect(url).await?;
                info!("store: remote postgres");
                (Arc::new(pg), None)
            }
            None => {
                std::fs::create_dir_all(&config.data_dir)
                    .map_err(|e| StoreError::Wal(e.to_string()))?;
                let path = config.wal_path();
                let local = Arc::new(LocalStore::open(path.clone())?);
                info!("store: local WAL at {}", path.display());
                (local.clone(), Some(local))
            }
        };
    Ok(OpenedStore {
        store: Arc::new(TimedStore::new(inner, config.store_timeout)),
        local,
    })
}

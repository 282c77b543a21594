use std::collections::{HashMap, HashSet};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, info};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

use super::{AppointmentStore, StoreError};

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        response: oneshot::Sender<io::Result<usize>>,
    },
    Stats {
        response: oneshot::Sender<WalStats>,
    },
}

/// Counters of the writer task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalStats {
    pub appends_since_compact: u64,
    /// fsyncs issued for appends; fewer than appends means batches were grouped.
    pub commits: u64,
}

/// Owns the WAL file and is the only task that applies events to the records.
/// Appends that queue up while one flush is in progress are committed together
/// with a single fsync, then applied in log order.
async fn wal_writer_loop(mut wal: Wal, records: Arc<RwLock<Records>>, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }
                commit_batch(&mut wal, &records, &mut batch).await;
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, &records, other).await;
                }
            }
            other => handle_non_append(&mut wal, &records, other).await,
        }
    }
    debug!("WAL writer stopped");
}

async fn commit_batch(
    wal: &mut Wal,
    records: &RwLock<Records>,
    batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>,
) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());

    {
        let mut guard = records.write().await;
        for (event, _) in batch.iter() {
            if result.is_ok() {
                guard.apply(event);
            }
            guard.settle(event);
        }
    }

    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush regardless so a failed batch leaves nothing buffered for the next one.
    let flush_result = wal.flush_sync();
    match append_err {
        Some(e) => Err(e),
        None => flush_result,
    }
}

async fn handle_non_append(wal: &mut Wal, records: &RwLock<Records>, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { response } => {
            // Every earlier append is already applied, so the records match the log.
            let events: Vec<Event> = records
                .read()
                .await
                .list
                .iter()
                .map(|a| Event::Created { appointment: a.clone() })
                .collect();
            let count = events.len();
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file())
                .map(|()| count);
            let _ = response.send(result);
        }
        WalCommand::Stats { response } => {
            let _ = response.send(WalStats {
                appends_since_compact: wal.appends_since_compact(),
                commits: wal.commits(),
            });
        }
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            commit_batch(wal, records, &mut batch).await;
        }
    }
}

// ── Store ────────────────────────────────────────────────

type SlotKey = (String, NaiveDate, ClockTime);

fn slot_key(a: &Appointment) -> SlotKey {
    (a.professional_id.clone(), a.date, a.time)
}

#[derive(Default)]
struct Records {
    /// Insertion order.
    list: Vec<Appointment>,
    position: HashMap<Ulid, usize>,
    /// Inserts sent to the writer but not yet committed.
    pending_ids: HashSet<Ulid>,
    pending_slots: HashSet<SlotKey>,
}

impl Records {
    fn apply(&mut self, event: &Event) {
        match event {
            Event::Created { appointment } => {
                if !self.position.contains_key(&appointment.id) {
                    self.position.insert(appointment.id, self.list.len());
                    self.list.push(appointment.clone());
                }
            }
            Event::StatusChanged { id, status } => {
                if let Some(&pos) = self.position.get(id)
                    && !self.list[pos].status.is_terminal()
                {
                    self.list[pos].status = *status;
                }
            }
            Event::Cleared => {
                self.list.clear();
                self.position.clear();
            }
        }
    }

    /// Release the reservation an insert held while its event was in flight.
    fn settle(&mut self, event: &Event) {
        if let Event::Created { appointment } = event {
            self.pending_ids.remove(&appointment.id);
            self.pending_slots.remove(&slot_key(appointment));
        }
    }

    fn get(&self, id: &Ulid) -> Option<&Appointment> {
        self.position.get(id).and_then(|&pos| self.list.get(pos))
    }

    fn id_taken(&self, id: &Ulid) -> bool {
        self.position.contains_key(id) || self.pending_ids.contains(id)
    }

    fn slot_taken(&self, key: &SlotKey) -> bool {
        self.pending_slots.contains(key)
            || self.list.iter().any(|a| a.occupies(&key.0, key.1) && a.time == key.2)
    }
}

/// Appointments held in memory and made durable through the WAL before each
/// mutation is applied.
///
/// Mutations validate and enqueue their event under a short write lock, then
/// wait for the commit without holding it, so concurrent writers share fsyncs.
pub struct LocalStore {
    records: Arc<RwLock<Records>>,
    wal_tx: mpsc::Sender<WalCommand>,
}

fn writer_gone() -> StoreError {
    StoreError::Wal("WAL writer shut down".into())
}

async fn await_commit<T>(rx: oneshot::Receiver<io::Result<T>>) -> Result<T, StoreError> {
    rx.await
        .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
        .map_err(|e| StoreError::Wal(e.to_string()))
}

impl LocalStore {
    /// Replay the WAL at `wal_path` and start its writer task. Must run inside a tokio runtime.
    pub fn open(wal_path: PathBuf) -> Result<Self, StoreError> {
        let events = Wal::replay(&wal_path).map_err(|e| StoreError::Wal(e.to_string()))?;
        let wal = Wal::open(&wal_path).map_err(|e| StoreError::Wal(e.to_string()))?;

        let mut records = Records::default();
        for event in &events {
            records.apply(event);
        }
        info!(
            "local store: replayed {} events, {} appointments",
            events.len(),
            records.list.len()
        );

        let records = Arc::new(RwLock::new(records));
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, records.clone(), wal_rx));
        Ok(Self { records, wal_tx })
    }

    /// Rewrite the WAL as one `Created` event per surviving record, in insertion order.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { response: tx })
            .await
            .map_err(|_| writer_gone())?;
        let count = await_commit(rx).await?;
        info!("local store: compacted WAL to {count} records");
        Ok(())
    }

    pub async fn wal_stats(&self) -> WalStats {
        let (tx, rx) = oneshot::channel();
        if self.wal_tx.send(WalCommand::Stats { response: tx }).await.is_err() {
            return WalStats::default();
        }
        rx.await.unwrap_or_default()
    }

    pub async fn appends_since_compact(&self) -> u64 {
        self.wal_stats().await.appends_since_compact
    }
}

#[async_trait]
impl AppointmentStore for LocalStore {
    fn backend(&self) -> &'static str {
        "local"
    }

    async fn list(&self) -> Result<Vec<Appointment>, StoreError> {
        Ok(self.records.read().await.list.clone())
    }

    async fn insert(&self, appointment: &Appointment) -> Result<(), StoreError> {
        // The channel slot is taken first so the enqueue under the lock cannot wait.
        let permit = self.wal_tx.reserve().await.map_err(|_| writer_gone())?;
        let (tx, rx) = oneshot::channel();
        {
            let mut guard = self.records.write().await;
            if guard.id_taken(&appointment.id) {
                return Err(StoreError::Duplicate);
            }
            let key = slot_key(appointment);
            if appointment.status.is_active() {
                if guard.slot_taken(&key) {
                    return Err(StoreError::Duplicate);
                }
                guard.pending_slots.insert(key);
            }
            guard.pending_ids.insert(appointment.id);
            permit.send(WalCommand::Append {
                event: Event::Created {
                    appointment: appointment.clone(),
                },
                response: tx,
            });
        }
        await_commit(rx).await
    }

    async fn set_status(&self, id: Ulid, status: AppointmentStatus) -> Result<Appointment, StoreError> {
        let permit = self.wal_tx.reserve().await.map_err(|_| writer_gone())?;
        let (tx, rx) = oneshot::channel();
        {
            let guard = self.records.read().await;
            let current = guard.get(&id).ok_or(StoreError::NotFound(id))?;
            if current.status.is_terminal() || current.status == status {
                return Ok(current.clone());
            }
            permit.send(WalCommand::Append {
                event: Event::StatusChanged { id, status },
                response: tx,
            });
        }
        await_commit(rx).await?;
        self.get(id).await?.ok_or(StoreError::NotFound(id))
    }

    async fn clear_all(&self) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: Event::Cleared,
                response: tx,
            })
            .await
            .map_err(|_| writer_gone())?;
        await_commit(rx).await
    }

    async fn get(&self, id: Ulid) -> Result<Option<Appointment>, StoreError> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn list_day(&self, professional_id: &str, date: NaiveDate) -> Result<Vec<Appointment>, StoreError> {
        let guard = self.records.read().await;
        Ok(guard
            .list
            .iter()
            .filter(|a| a.professional_id == professional_id && a.date == date)
            .cloned()
            .collect())
    }
}

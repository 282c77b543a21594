use super::*;
use crate::catalog::{Catalog, CatalogSnapshot};
use crate::model::*;
use crate::store::{LocalStore, StoreError};

use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::path::PathBuf;
use ulid::Ulid;

const DAY: &str = "2099-06-01";

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("chairtime_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn engine_at(path: PathBuf, options: EngineOptions) -> Engine {
    let store = Arc::new(LocalStore::open(path).unwrap());
    Engine::new(Arc::new(Catalog::seeded()), store, options)
}

fn test_engine(name: &str) -> Engine {
    engine_at(test_wal_path(name), EngineOptions::default())
}

fn new_appt(pro: &str, service: &str, time: &str) -> NewAppointment {
    NewAppointment {
        professional_id: pro.into(),
        service_id: service.into(),
        date: parse_date(DAY).unwrap(),
        time: time.parse().unwrap(),
        customer_name: "Gabriel".into(),
        customer_phone: "79991234567".into(),
        customer_note: None,
    }
}

fn early() -> NaiveDateTime {
    parse_date("2000-01-01").unwrap().and_hms_opt(0, 0, 0).unwrap()
}

fn hhmm(slots: &[ClockTime]) -> Vec<String> {
    slots.iter().map(|s| s.to_string()).collect()
}

/// Pairwise non-overlap of active appointments per (professional, date).
async fn assert_no_double_booking(engine: &Engine) {
    let catalog = engine.catalog.snapshot().await;
    let all = engine.list_appointments(&AppointmentFilter::default()).await.unwrap();
    for a in all.iter().filter(|a| a.status.is_active()) {
        let spans = occupied_spans(&catalog, &all, &a.professional_id, a.date);
        for pair in spans.windows(2) {
            assert!(
                !pair[0].1.overlaps(&pair[1].1),
                "double booking: {:?} and {:?}",
                pair[0],
                pair[1]
            );
        }
    }
}

// ── Booking orchestration ────────────────────────────────

#[tokio::test]
async fn conflict_detection_end_to_end() {
    let engine = test_engine("e2e.wal");
    let a = engine.create_appointment(new_appt("barber1", "c1", "09:00")).await.unwrap();
    assert_eq!(a.status, AppointmentStatus::Confirmed);
    assert_eq!(a.duration_minutes, Some(30));

    let err = engine
        .create_appointment(new_appt("barber1", "b1", "09:15"))
        .await
        .unwrap_err();
    assert!(err.is_conflict());
    match err {
        EngineError::Conflict(id) => assert_eq!(id, a.id),
        other => panic!("expected conflict, got {other}"),
    }

    engine.create_appointment(new_appt("barber1", "c1", "09:30")).await.unwrap();
    assert_eq!(engine.list_appointments(&AppointmentFilter::default()).await.unwrap().len(), 2);
    assert_no_double_booking(&engine).await;
}

#[tokio::test]
async fn back_to_back_accepted() {
    let engine = test_engine("back_to_back.wal");
    engine.create_appointment(new_appt("barber1", "c1", "10:00")).await.unwrap();
    engine.create_appointment(new_appt("barber1", "cb2", "10:30")).await.unwrap();
    // 10:30 + 50 min ends 11:20.
    assert!(engine.create_appointment(new_appt("barber1", "s1", "11:15")).await.is_err());
    engine.create_appointment(new_appt("barber1", "s1", "11:20")).await.unwrap();
}

#[tokio::test]
async fn professionals_do_not_share_time() {
    let engine = test_engine("independent.wal");
    engine.create_appointment(new_appt("barber1", "c1", "10:00")).await.unwrap();
    engine.create_appointment(new_appt("barber3", "c1", "10:00")).await.unwrap();
    let mut next_day = new_appt("barber1", "c1", "10:00");
    next_day.date = parse_date("2099-06-02").unwrap();
    engine.create_appointment(next_day).await.unwrap();
}

#[tokio::test]
async fn hidden_service_creates_block() {
    let engine = test_engine("block.wal");
    // Blocks are allowed for any professional, even outside their service list.
    let block = engine
        .create_appointment(new_appt("barber4", "block-120", "12:00"))
        .await
        .unwrap();
    assert_eq!(block.status, AppointmentStatus::Blocked);
    assert_eq!(block.duration_minutes, Some(120));

    let err = engine
        .create_appointment(new_appt("barber4", "u1", "13:30"))
        .await
        .unwrap_err();
    assert!(err.is_conflict());
    engine.create_appointment(new_appt("barber4", "u1", "14:00")).await.unwrap();

    let slots = engine
        .get_available_slots_at(parse_date(DAY).unwrap(), "barber4", "u1", early())
        .await
        .unwrap();
    let slots = hhmm(&slots);
    assert!(slots.contains(&"11:30".to_string()));
    assert!(!slots.contains(&"12:00".to_string()));
    assert!(!slots.contains(&"13:30".to_string()));
    assert!(!slots.contains(&"14:00".to_string()));
    assert!(slots.contains(&"14:30".to_string()));
}

#[tokio::test]
async fn validation_failures() {
    let engine = test_engine("validation.wal");
    assert!(matches!(
        engine.create_appointment(new_appt("ghost", "c1", "10:00")).await,
        Err(EngineError::UnknownProfessional(_))
    ));
    assert!(matches!(
        engine.create_appointment(new_appt("barber1", "zz", "10:00")).await,
        Err(EngineError::UnknownService(_))
    ));
    assert!(matches!(
        engine.create_appointment(new_appt("barber1", "u1", "10:00")).await,
        Err(EngineError::NotEligible { .. })
    ));
    let mut long = new_appt("barber1", "c1", "10:00");
    long.customer_note = Some("x".repeat(crate::limits::MAX_NOTE_LEN + 1));
    assert!(matches!(
        engine.create_appointment(long).await,
        Err(EngineError::LimitExceeded(_))
    ));
    assert!(engine.list_appointments(&AppointmentFilter::default()).await.unwrap().is_empty());
}

#[tokio::test]
async fn payload_missing_fields_fail_loudly() {
    let payload = AppointmentPayload {
        professional_id: Some("barber1".into()),
        service_id: Some("c1".into()),
        time: Some("10:00".into()),
        customer_name: Some("Lia".into()),
        ..Default::default()
    };
    let err: EngineError = NewAppointment::try_from(payload).unwrap_err().into();
    assert!(err.is_validation());
    assert!(err.to_string().contains("date"));
}

// ── Status transitions ───────────────────────────────────

#[tokio::test]
async fn cancel_is_idempotent_and_frees_slot() {
    let engine = test_engine("cancel.wal");
    let a = engine.create_appointment(new_appt("barber1", "c1", "10:00")).await.unwrap();

    let cancelled = engine.cancel_appointment(a.id).await.unwrap();
    assert_eq!(cancelled.status, AppointmentStatus::Cancelled);
    let again = engine.cancel_appointment(a.id).await.unwrap();
    assert_eq!(again, cancelled);

    let b = engine.create_appointment(new_appt("barber1", "c1", "10:00")).await.unwrap();
    assert_ne!(a.id, b.id);
    assert_no_double_booking(&engine).await;
}

#[tokio::test]
async fn day_locks_released_after_mutations() {
    let engine = test_engine("day_locks.wal");
    let first = parse_date(DAY).unwrap();
    for offset in 0..60u64 {
        let mut new = new_appt("barber3", "c2", "11:00");
        new.date = first.checked_add_days(chrono::Days::new(offset)).unwrap();
        let a = engine.create_appointment(new).await.unwrap();
        engine.cancel_appointment(a.id).await.unwrap();
    }
    assert_eq!(engine.day_locks.len(), 0);

    // A rejected booking releases its day too.
    engine.create_appointment(new_appt("barber3", "c2", "11:00")).await.unwrap();
    assert!(engine.create_appointment(new_appt("barber3", "c2", "11:00")).await.is_err());
    assert_eq!(engine.day_locks.len(), 0);
}

#[tokio::test]
async fn terminal_states_never_resurrect() {
    let engine = test_engine("terminal.wal");
    let a = engine.create_appointment(new_appt("barber1", "c1", "10:00")).await.unwrap();
    let done = engine.complete_appointment(a.id).await.unwrap();
    assert_eq!(done.status, AppointmentStatus::Completed);
    assert_eq!(engine.complete_appointment(a.id).await.unwrap(), done);

    assert!(matches!(
        engine.cancel_appointment(a.id).await,
        Err(EngineError::InvalidTransition {
            from: AppointmentStatus::Completed,
            to: AppointmentStatus::Cancelled,
            ..
        })
    ));
    // The completed appointment no longer holds its slot.
    engine.create_appointment(new_appt("barber1", "c1", "10:00")).await.unwrap();
}

#[tokio::test]
async fn blocks_cannot_be_completed() {
    let engine = test_engine("block_complete.wal");
    let block = engine
        .create_appointment(new_appt("barber1", "block-30", "12:00"))
        .await
        .unwrap();
    assert!(matches!(
        engine.complete_appointment(block.id).await,
        Err(EngineError::InvalidTransition { .. })
    ));
    let freed = engine.cancel_appointment(block.id).await.unwrap();
    assert_eq!(freed.status, AppointmentStatus::Cancelled);
}

#[tokio::test]
async fn unknown_id_not_found() {
    let engine = test_engine("unknown.wal");
    assert!(matches!(
        engine.cancel_appointment(Ulid::new()).await,
        Err(EngineError::NotFound(_))
    ));
    assert!(matches!(
        engine.get_appointment(Ulid::new()).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn clear_wipes_everything() {
    let engine = test_engine("clear.wal");
    engine.create_appointment(new_appt("barber1", "c1", "10:00")).await.unwrap();
    engine.create_appointment(new_appt("barber2", "c1", "10:00")).await.unwrap();
    engine.clear_appointments().await.unwrap();
    assert!(engine.list_appointments(&AppointmentFilter::default()).await.unwrap().is_empty());
    engine.create_appointment(new_appt("barber1", "c1", "10:00")).await.unwrap();
}

// ── Queries ──────────────────────────────────────────────

#[tokio::test]
async fn listing_filters_and_keeps_insertion_order() {
    let engine = test_engine("listing.wal");
    let a = engine.create_appointment(new_appt("barber1", "c1", "15:00")).await.unwrap();
    let b = engine.create_appointment(new_appt("barber1", "c1", "09:00")).await.unwrap();
    let c = engine.create_appointment(new_appt("barber3", "c1", "09:00")).await.unwrap();
    engine.cancel_appointment(b.id).await.unwrap();

    let all = engine.list_appointments(&AppointmentFilter::default()).await.unwrap();
    assert_eq!(all.iter().map(|x| x.id).collect::<Vec<_>>(), vec![a.id, b.id, c.id]);

    let filter = AppointmentFilter {
        professional_id: Some("barber1".into()),
        date: Some(parse_date(DAY).unwrap()),
        status: None,
    };
    assert_eq!(engine.list_appointments(&filter).await.unwrap().len(), 2);

    let confirmed = AppointmentFilter {
        status: Some(AppointmentStatus::Confirmed),
        ..Default::default()
    };
    let ids: Vec<Ulid> = engine
        .list_appointments(&confirmed)
        .await
        .unwrap()
        .iter()
        .map(|x| x.id)
        .collect();
    assert_eq!(ids, vec![a.id, c.id]);
}

#[tokio::test]
async fn saturday_slots_stop_at_1630() {
    let engine = test_engine("saturday.wal");
    engine
        .catalog
        .update_professional_hours("barber1", None, Some(ClockTime::from_hm(20, 0)))
        .await
        .unwrap();
    let saturday = parse_date("2099-06-06").unwrap();
    let slots = engine
        .get_available_slots_at(saturday, "barber1", "c1", early())
        .await
        .unwrap();
    assert_eq!(slots.last().copied(), Some(ClockTime::from_hm(16, 30)));
}

#[tokio::test]
async fn todays_past_slots_excluded() {
    let engine = test_engine("today.wal");
    let today = parse_date("2024-06-10").unwrap();
    let now = today.and_hms_opt(14, 5, 0).unwrap();
    let slots = hhmm(&engine.get_available_slots_at(today, "barber1", "c1", now).await.unwrap());
    assert_eq!(slots.first().map(String::as_str), Some("14:30"));
}

fn resized(engine_catalog: &CatalogSnapshot, id: &str, duration_minutes: Minutes) -> Service {
    let mut service = engine_catalog.service(id).cloned().unwrap();
    service.duration_minutes = duration_minutes;
    service
}

#[tokio::test]
async fn live_policy_tracks_catalog_edits() {
    let options = EngineOptions {
        duration_policy: DurationPolicy::Live,
        ..Default::default()
    };
    let engine = engine_at(test_wal_path("live.wal"), options);
    let a = engine.create_appointment(new_appt("barber1", "c3", "10:00")).await.unwrap();
    assert_eq!(a.duration_minutes, None);
    let date = parse_date(DAY).unwrap();

    let longer = resized(&engine.catalog.snapshot().await, "c3", 90);
    engine.catalog.delete_service("c3").await.unwrap();
    engine.catalog.add_service(longer).await.unwrap();
    let slots = hhmm(&engine.get_available_slots_at(date, "barber1", "c1", early()).await.unwrap());
    assert!(!slots.contains(&"10:30".to_string()));
    assert!(!slots.contains(&"11:00".to_string()));
    assert!(slots.contains(&"11:30".to_string()));

    // Without the service the booking falls back to 30 minutes.
    engine.catalog.delete_service("c3").await.unwrap();
    let slots = hhmm(&engine.get_available_slots_at(date, "barber1", "c1", early()).await.unwrap());
    assert!(!slots.contains(&"10:00".to_string()));
    assert!(slots.contains(&"10:30".to_string()));
}

#[tokio::test]
async fn snapshot_policy_ignores_later_duration_edits() {
    let engine = test_engine("snapshot.wal");
    engine.create_appointment(new_appt("barber1", "c1", "10:00")).await.unwrap();

    let longer = resized(&engine.catalog.snapshot().await, "c1", 120);
    engine.catalog.delete_service("c1").await.unwrap();
    engine.catalog.add_service(longer).await.unwrap();

    // Still occupies exactly 10:00..10:30.
    engine.create_appointment(new_appt("barber1", "c2", "10:30")).await.unwrap();
}

#[tokio::test]
async fn restart_replays_bookings() {
    let path = test_wal_path("restart.wal");
    let id = {
        let engine = engine_at(path.clone(), EngineOptions::default());
        let a = engine.create_appointment(new_appt("barber2", "m1", "09:00")).await.unwrap();
        a.id
    };
    let engine = engine_at(path, EngineOptions::default());
    assert_eq!(engine.get_appointment(id).await.unwrap().service_id, "m1");
    let err = engine
        .create_appointment(new_appt("barber2", "c1", "10:30"))
        .await
        .unwrap_err();
    assert!(err.is_conflict());
}

// ── Store failures ───────────────────────────────────────

struct DownStore;

#[async_trait]
impl crate::store::AppointmentStore for DownStore {
    fn backend(&self) -> &'static str {
        "down"
    }
    async fn list(&self) -> Result<Vec<Appointment>, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
    async fn insert(&self, _: &Appointment) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
    async fn set_status(&self, _: Ulid, _: AppointmentStatus) -> Result<Appointment, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
    async fn clear_all(&self) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
}

fn down_engine(degraded_reads: bool) -> Engine {
    let options = EngineOptions {
        degraded_reads,
        ..Default::default()
    };
    Engine::new(Arc::new(Catalog::seeded()), Arc::new(DownStore), options)
}

#[tokio::test]
async fn store_failure_propagates_by_default() {
    let engine = down_engine(false);
    let date = parse_date(DAY).unwrap();
    assert!(matches!(
        engine.get_available_slots_at(date, "barber1", "c1", early()).await,
        Err(EngineError::Store(StoreError::Unavailable(_)))
    ));
}

#[tokio::test]
async fn degraded_reads_assume_empty_day_but_writes_fail() {
    let engine = down_engine(true);
    let date = parse_date(DAY).unwrap();
    let slots = engine.get_available_slots_at(date, "barber1", "c1", early()).await.unwrap();
    assert_eq!(slots.len(), 20);

    assert!(matches!(
        engine.create_appointment(new_appt("barber1", "c1", "10:00")).await,
        Err(EngineError::Store(_))
    ));
}

/// Lets every read through but rejects inserts at a slot that was already written,
/// like the remote partial unique index.
struct RacyStore {
    inner: LocalStore,
}

#[async_trait]
impl crate::store::AppointmentStore for RacyStore {
    fn backend(&self) -> &'static str {
        "racy"
    }
    async fn list(&self) -> Result<Vec<Appointment>, StoreError> {
        Ok(Vec::new())
    }
    async fn insert(&self, a: &Appointment) -> Result<(), StoreError> {
        self.inner.insert(a).await
    }
    async fn set_status(&self, id: Ulid, s: AppointmentStatus) -> Result<Appointment, StoreError> {
        self.inner.set_status(id, s).await
    }
    async fn clear_all(&self) -> Result<(), StoreError> {
        self.inner.clear_all().await
    }
}

#[tokio::test]
async fn storage_backstop_surfaces_as_conflict() {
    let inner = LocalStore::open(test_wal_path("racy.wal")).unwrap();
    let engine = Engine::new(
        Arc::new(Catalog::seeded()),
        Arc::new(RacyStore { inner }),
        EngineOptions::default(),
    );
    engine.create_appointment(new_appt("barber1", "c1", "10:00")).await.unwrap();
    let err = engine
        .create_appointment(new_appt("barber1", "b1", "10:00"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::SlotTaken));
    assert!(err.is_conflict());
}

// ── Concurrency ──────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_same_slot_exactly_one_wins() {
    let engine = Arc::new(test_engine("race.wal"));
    let mut handles = Vec::new();
    for i in 0..16 {
        let engine = engine.clone();
        // Mix of exact and partially overlapping starts.
        let time = if i % 2 == 0 { "10:00" } else { "10:15" };
        handles.push(tokio::spawn(async move {
            engine.create_appointment(new_appt("barber1", "b1", time)).await
        }));
    }
    let results = futures::future::join_all(handles).await;
    let ok = results.iter().filter(|r| matches!(r, Ok(Ok(_)))).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Ok(Err(e)) if e.is_conflict()))
        .count();
    // 10:00 (20 min) and 10:15 overlap, so only one start can win.
    assert_eq!(ok, 1);
    assert_eq!(conflicts, 15);
    assert_no_double_booking(&engine).await;
    // The last holder of the day's mutex evicted it.
    assert!(engine.day_locks.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn different_days_proceed_independently() {
    let engine = Arc::new(test_engine("parallel_days.wal"));
    let mut handles = Vec::new();
    for day in 1..=8u32 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let mut a = new_appt("barber3", "c1", "08:00");
            a.date = chrono::NaiveDate::from_ymd_opt(2099, 7, day).unwrap();
            engine.create_appointment(a).await
        }));
    }
    for r in futures::future::join_all(handles).await {
        r.unwrap().unwrap();
    }
    assert_eq!(engine.list_appointments(&AppointmentFilter::default()).await.unwrap().len(), 8);
}

#[test]
fn seed_has_no_overlapping_hidden_ids() {
    let seed = CatalogSnapshot::seed();
    for hidden in &seed.hidden_services {
        assert!(seed.service(&hidden.id).is_none());
        assert_eq!(hidden.price, 0.0);
    }
}

#[test]
fn duration_policy_parsing() {
    assert_eq!("snapshot".parse::<DurationPolicy>().unwrap(), DurationPolicy::Snapshot);
    assert_eq!(" LIVE ".parse::<DurationPolicy>().unwrap(), DurationPolicy::Live);
    assert!("sometimes".parse::<DurationPolicy>().is_err());
    assert_eq!(DurationPolicy::default().to_string(), "snapshot");
}

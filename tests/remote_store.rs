//! Runs against a real PostgreSQL only when `CHAIRTIME_TEST_DATABASE_URL` is set.
//! The table is wiped before and after, so point it at a scratch database.

use std::sync::Arc;

use chrono::Utc;
use ulid::Ulid;

use chairtime::catalog::Catalog;
use chairtime::engine::{Engine, EngineError, EngineOptions};
use chairtime::model::*;
use chairtime::store::{AppointmentStore, PgStore, StoreError};

async fn scratch_store() -> Option<PgStore> {
    let url = std::env::var("CHAIRTIME_TEST_DATABASE_URL").ok()?;
    let store = PgStore::connect(&url).await.unwrap();
    store.clear_all().await.unwrap();
    Some(store)
}

fn appointment(pro: &str, date: &str, time: &str) -> Appointment {
    Appointment {
        id: Ulid::new(),
        professional_id: pro.into(),
        service_id: "c1".into(),
        date: parse_date(date).unwrap(),
        time: time.parse().unwrap(),
        customer_name: "Mateus".into(),
        customer_phone: "79990009999".into(),
        customer_note: Some("primeira vez".into()),
        status: AppointmentStatus::Confirmed,
        created_at: Utc::now(),
        duration_minutes: Some(30),
    }
}

// Both scenarios share one table, so they run in a single test.
#[tokio::test]
async fn postgres_backend() {
    let Some(store) = scratch_store().await else {
        eprintln!("CHAIRTIME_TEST_DATABASE_URL not set, skipping");
        return;
    };
    assert_eq!(store.backend(), "postgres");

    // ── Raw store semantics ──────────────────────────────────
    let a = appointment("barber1", "2099-06-01", "09:00");
    store.insert(&a).await.unwrap();
    let fetched = store.get(a.id).await.unwrap().unwrap();
    assert_eq!(fetched.customer_note, a.customer_note);
    assert_eq!(fetched.time, a.time);
    assert_eq!(fetched.duration_minutes, Some(30));

    let twin = appointment("barber1", "2099-06-01", "09:00");
    assert!(matches!(store.insert(&twin).await, Err(StoreError::Duplicate)));

    let other_day = appointment("barber1", "2099-06-02", "09:00");
    store.insert(&other_day).await.unwrap();
    assert_eq!(store.list_day("barber1", parse_date("2099-06-01").unwrap()).await.unwrap().len(), 1);

    let cancelled = store.set_status(a.id, AppointmentStatus::Cancelled).await.unwrap();
    assert_eq!(cancelled.status, AppointmentStatus::Cancelled);
    // Terminal records stay put.
    let still = store.set_status(a.id, AppointmentStatus::Confirmed).await.unwrap();
    assert_eq!(still.status, AppointmentStatus::Cancelled);
    // The slot is free again once cancelled.
    store.insert(&twin).await.unwrap();

    assert!(matches!(
        store.set_status(Ulid::new(), AppointmentStatus::Cancelled).await,
        Err(StoreError::NotFound(_))
    ));

    let all = store.list().await.unwrap();
    let ids: Vec<Ulid> = all.iter().map(|x| x.id).collect();
    assert_eq!(ids, vec![a.id, other_day.id, twin.id]);

    store.clear_all().await.unwrap();
    assert!(store.list().await.unwrap().is_empty());

    // ── Through the engine ───────────────────────────────────
    let engine = Engine::new(Arc::new(Catalog::seeded()), Arc::new(store), EngineOptions::default());
    let booked = engine
        .create_appointment(NewAppointment {
            professional_id: "barber3".into(),
            service_id: "cb2".into(),
            date: parse_date("2099-06-03").unwrap(),
            time: "11:00".parse().unwrap(),
            customer_name: "Igor".into(),
            customer_phone: String::new(),
            customer_note: None,
        })
        .await
        .unwrap();
    let clash = engine
        .create_appointment(NewAppointment {
            professional_id: "barber3".into(),
            service_id: "c1".into(),
            date: parse_date("2099-06-03").unwrap(),
            time: "11:30".parse().unwrap(),
            customer_name: "Caio".into(),
            customer_phone: String::new(),
            customer_note: None,
        })
        .await;
    assert!(matches!(clash, Err(EngineError::Conflict(id)) if id == booked.id));

    engine.complete_appointment(booked.id).await.unwrap();
    engine.clear_appointments().await.unwrap();
}

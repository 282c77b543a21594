//! HTTP/JSON surface used by the booking UI and the admin panel.

pub mod error;

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::async_trait;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Path, Query, Request, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post, put};
use serde::Deserialize;
use serde_json::{Value, json};
use ulid::Ulid;

use crate::engine::{AppointmentFilter, Engine};
use crate::model::*;
use crate::observability::HTTP_REQUESTS_TOTAL;

pub use error::ApiError;

/// JSON body extractor whose rejection renders as an `ApiError`.
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}

type Shared = State<Arc<Engine>>;

/// Build the router. Path params use `:param` syntax (axum 0.7).
pub fn router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/services", get(list_services).post(add_service))
        .route("/services/hidden", get(list_hidden_services))
        .route("/services/:id", delete(delete_service))
        .route("/services/:id/price", put(update_service_price))
        .route("/professionals", get(list_professionals))
        .route("/professionals/:id/hours", put(update_professional_hours))
        .route("/professionals/:id/services", put(update_professional_services))
        .route("/business", get(get_business).put(update_business))
        .route("/slots", get(available_slots))
        .route(
            "/appointments",
            get(list_appointments)
                .post(create_appointment)
                .delete(clear_appointments),
        )
        .route("/appointments/:id/cancel", post(cancel_appointment))
        .route("/appointments/:id/complete", post(complete_appointment))
        .with_state(engine)
}

fn hit(route: &'static str) {
    metrics::counter!(HTTP_REQUESTS_TOTAL, "route" => route).increment(1);
}

fn parse_id(raw: &str) -> Result<Ulid, ApiError> {
    Ulid::from_string(raw).map_err(|_| ApiError::BadRequest(format!("invalid appointment id: {raw}")))
}

async fn health(State(engine): Shared) -> Json<Value> {
    hit("health");
    Json(json!({ "status": "ok", "store": engine.store().backend() }))
}

// ── Catalog ──────────────────────────────────────────────────────

async fn list_services(State(engine): Shared) -> Json<Vec<Service>> {
    hit("services");
    Json(engine.catalog.services().await)
}

async fn list_hidden_services(State(engine): Shared) -> Json<Vec<Service>> {
    hit("services_hidden");
    Json(engine.catalog.hidden_services().await)
}

async fn list_professionals(State(engine): Shared) -> Json<Vec<Professional>> {
    hit("professionals");
    Json(engine.catalog.professionals().await)
}

async fn get_business(State(engine): Shared) -> Json<BusinessConfig> {
    hit("business");
    Json(engine.catalog.business().await)
}

#[derive(Deserialize)]
struct PriceBody {
    price: f64,
}

async fn update_service_price(
    State(engine): Shared,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<PriceBody>,
) -> Result<Json<Service>, ApiError> {
    hit("service_price");
    Ok(Json(engine.catalog.update_service_price(&id, body.price).await?))
}

async fn add_service(
    State(engine): Shared,
    ApiJson(service): ApiJson<Service>,
) -> Result<(StatusCode, Json<Service>), ApiError> {
    hit("service_add");
    engine.catalog.add_service(service.clone()).await?;
    Ok((StatusCode::CREATED, Json(service)))
}

async fn delete_service(State(engine): Shared, Path(id): Path<String>) -> Result<Json<Service>, ApiError> {
    hit("service_delete");
    Ok(Json(engine.catalog.delete_service(&id).await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HoursBody {
    #[serde(default)]
    open_time: Option<ClockTime>,
    #[serde(default)]
    close_time: Option<ClockTime>,
}

async fn update_professional_hours(
    State(engine): Shared,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<HoursBody>,
) -> Result<Json<Professional>, ApiError> {
    hit("professional_hours");
    let pro = engine
        .catalog
        .update_professional_hours(&id, body.open_time, body.close_time)
        .await?;
    Ok(Json(pro))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServicesBody {
    #[serde(alias = "eligibleServiceIds")]
    service_ids: Vec<String>,
}

async fn update_professional_services(
    State(engine): Shared,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<ServicesBody>,
) -> Result<Json<Professional>, ApiError> {
    hit("professional_services");
    Ok(Json(engine.catalog.update_professional_services(&id, body.service_ids).await?))
}

async fn update_business(
    State(engine): Shared,
    ApiJson(business): ApiJson<BusinessConfig>,
) -> Result<Json<BusinessConfig>, ApiError> {
    hit("business_update");
    engine.catalog.update_business(business.clone()).await?;
    Ok(Json(business))
}

// ── Scheduling ───────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SlotsQuery {
    date: Option<String>,
    professional_id: Option<String>,
    service_id: Option<String>,
}

/// Unparseable dates and unknown ids yield an empty list; missing parameters are a 400.
async fn available_slots(
    State(engine): Shared,
    Query(q): Query<SlotsQuery>,
) -> Result<Json<Vec<ClockTime>>, ApiError> {
    hit("slots");
    let date = q.date.ok_or(ParseError::MissingField("date"))?;
    let professional_id = q.professional_id.ok_or(ParseError::MissingField("professionalId"))?;
    let service_id = q.service_id.ok_or(ParseError::MissingField("serviceId"))?;
    let Ok(date) = parse_date(&date) else {
        return Ok(Json(Vec::new()));
    };
    let slots = engine
        .get_available_slots(date, &professional_id, &service_id)
        .await?;
    Ok(Json(slots))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListQuery {
    professional_id: Option<String>,
    date: Option<String>,
    status: Option<String>,
}

async fn list_appointments(
    State(engine): Shared,
    Query(q): Query<ListQuery>,
) -> Result<Json<Vec<Appointment>>, ApiError> {
    hit("appointments_list");
    let filter = AppointmentFilter {
        professional_id: q.professional_id,
        date: q.date.as_deref().map(parse_date).transpose()?,
        status: q.status.as_deref().map(str::parse::<AppointmentStatus>).transpose()?,
    };
    Ok(Json(engine.list_appointments(&filter).await?))
}

async fn create_appointment(
    State(engine): Shared,
    ApiJson(payload): ApiJson<AppointmentPayload>,
) -> Result<(StatusCode, Json<Appointment>), ApiError> {
    hit("appointments_create");
    let new = NewAppointment::try_from(payload)?;
    let appointment = engine.create_appointment(new).await?;
    Ok((StatusCode::CREATED, Json(appointment)))
}

async fn cancel_appointment(State(engine): Shared, Path(id): Path<String>) -> Result<Json<Appointment>, ApiError> {
    hit("appointments_cancel");
    Ok(Json(engine.cancel_appointment(parse_id(&id)?).await?))
}

async fn complete_appointment(
    State(engine): Shared,
    Path(id): Path<String>,
) -> Result<Json<Appointment>, ApiError> {
    hit("appointments_complete");
    Ok(Json(engine.complete_appointment(parse_id(&id)?).await?))
}

async fn clear_appointments(State(engine): Shared) -> Result<StatusCode, ApiError> {
    hit("appointments_clear");
    engine.clear_appointments().await?;
    Ok(StatusCode::NO_CONTENT)
}

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use crate::limits::*;
use crate::model::*;

/// Everything the scheduling engine reads from the catalog, as one consistent copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSnapshot {
    #[serde(default)]
    pub business: BusinessConfig,
    pub services: Vec<Service>,
    /// Zero-price administrative blocks (lunch, day off). Never offered to customers.
    #[serde(default)]
    pub hidden_services: Vec<Service>,
    pub professionals: Vec<Professional>,
}

impl CatalogSnapshot {
    /// Customer-facing services only.
    pub fn service(&self, id: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.id == id)
    }

    pub fn hidden_service(&self, id: &str) -> Option<&Service> {
        self.hidden_services.iter().find(|s| s.id == id)
    }

    /// Visible or hidden.
    pub fn any_service(&self, id: &str) -> Option<&Service> {
        self.service(id).or_else(|| self.hidden_service(id))
    }

    pub fn is_hidden(&self, service_id: &str) -> bool {
        self.hidden_service(service_id).is_some()
    }

    pub fn professional(&self, id: &str) -> Option<&Professional> {
        self.professionals.iter().find(|p| p.id == id)
    }

    pub fn validate(&self) -> Result<(), CatalogError> {
        validate_business(&self.business)?;

        if self.services.len() + self.hidden_services.len() > MAX_SERVICES {
            return Err(CatalogError::Invalid("too many services".into()));
        }
        let mut seen = HashSet::new();
        for s in self.services.iter().chain(&self.hidden_services) {
            validate_service(s)?;
            if !seen.insert(s.id.as_str()) {
                return Err(CatalogError::DuplicateService(s.id.clone()));
            }
        }
        if let Some(s) = self.hidden_services.iter().find(|s| s.price != 0.0) {
            return Err(CatalogError::Invalid(format!(
                "hidden service {} must have price 0",
                s.id
            )));
        }

        let mut seen = HashSet::new();
        for p in &self.professionals {
            if p.id.is_empty() || p.id.len() > MAX_ID_LEN {
                return Err(CatalogError::Invalid(format!("bad professional id {:?}", p.id)));
            }
            if !seen.insert(p.id.as_str()) {
                return Err(CatalogError::Invalid(format!("duplicate professional {}", p.id)));
            }
            validate_hours(p.open_time, p.close_time)?;
        }
        Ok(())
    }

    /// The shop's built-in catalog.
    pub fn seed() -> Self {
        fn svc(id: &str, name: &str, duration_minutes: Minutes, price: f64) -> Service {
            Service {
                id: id.into(),
                name: name.into(),
                duration_minutes,
                price,
            }
        }

        let services = vec![
            svc("c1", "Corte Degradê", 30, 35.0),
            svc("c2", "Corte na Tesoura", 30, 35.0),
            svc("c3", "Corte Social", 30, 30.0),
            svc("c4", "Corte Simples", 25, 25.0),
            svc("b1", "Barba Simples", 20, 20.0),
            svc("b2", "Barba Modelada", 30, 20.0),
            svc("cb1", "Corte Simples + Barba", 30, 45.0),
            svc("cb2", "Corte + Barba + Sobrancelha", 50, 60.0),
            svc("s1", "Sobrancelhas Simples", 15, 20.0),
            svc("s2", "Sobrancelhas de Henna", 20, 30.0),
            svc("u1", "Unhas (Pé ou Mão)", 30, 25.0),
            svc("u2", "Unhas (Pé e Mão)", 60, 45.0),
            svc("m1", "Micropigmentação Fio a Fio", 120, 399.0),
            svc("m2", "Renovação Micropigmentação", 90, 250.0),
        ];
        let hidden_services = vec![
            svc("block-30", "Bloqueio (30 min)", 30, 0.0),
            svc("block-60", "Bloqueio (1 hora)", 60, 0.0),
            svc("block-90", "Bloqueio (1h 30m)", 90, 0.0),
            svc("block-120", "Bloqueio (2 horas)", 120, 0.0),
            svc("block-240", "Bloqueio (4 horas)", 240, 0.0),
        ];

        let nails = ["u1", "u2"];
        let micro = ["m1", "m2"];
        let barber: Vec<String> = services
            .iter()
            .map(|s| s.id.clone())
            .filter(|id| !nails.contains(&id.as_str()) && !micro.contains(&id.as_str()))
            .collect();
        let mut barber_micro = barber.clone();
        barber_micro.extend(micro.iter().map(|s| s.to_string()));

        let pro = |id: &str, name: &str, service_ids: Vec<String>, phone: &str| Professional {
            id: id.into(),
            name: name.into(),
            service_ids,
            phone: Some(phone.into()),
            open_time: None,
            close_time: None,
        };

        let mut marcio = pro("barber2", "Marcio", barber_micro, "79996604308");
        marcio.open_time = Some(ClockTime::from_hm(9, 0));

        Self {
            business: BusinessConfig::default(),
            services,
            hidden_services,
            professionals: vec![
                pro("barber1", "Luis", barber.clone(), "79999089296"),
                marcio,
                pro("barber3", "Junior", barber, "79996604308"),
                pro("barber4", "Aline", nails.iter().map(|s| s.to_string()).collect(), "79996124480"),
            ],
        }
    }
}

fn validate_business(b: &BusinessConfig) -> Result<(), CatalogError> {
    if b.slot_interval == 0 {
        return Err(CatalogError::Invalid("slot interval must be positive".into()));
    }
    if b.open_time >= b.close_time {
        return Err(CatalogError::Invalid("business must open before it closes".into()));
    }
    if b.days_open.iter().any(|d| *d > 6) {
        return Err(CatalogError::Invalid("weekdays are numbered 0..6".into()));
    }
    if b.utc_offset_minutes.abs() >= 24 * 60 {
        return Err(CatalogError::Invalid("utc offset out of range".into()));
    }
    Ok(())
}

fn validate_service(s: &Service) -> Result<(), CatalogError> {
    if s.id.is_empty() || s.id.len() > MAX_ID_LEN {
        return Err(CatalogError::Invalid(format!("bad service id {:?}", s.id)));
    }
    if s.name.len() > MAX_NAME_LEN {
        return Err(CatalogError::Invalid(format!("service {} name too long", s.id)));
    }
    if s.duration_minutes == 0 || s.duration_minutes > MAX_SERVICE_DURATION_MINUTES {
        return Err(CatalogError::Invalid(format!(
            "service {} duration must be 1..={MAX_SERVICE_DURATION_MINUTES} minutes",
            s.id
        )));
    }
    validate_price(s.price)
}

fn validate_price(price: f64) -> Result<(), CatalogError> {
    if !price.is_finite() || price < 0.0 {
        return Err(CatalogError::Invalid(format!("price must be non-negative, got {price}")));
    }
    Ok(())
}

fn validate_hours(open: Option<ClockTime>, close: Option<ClockTime>) -> Result<(), CatalogError> {
    if let (Some(open), Some(close)) = (open, close)
        && open >= close
    {
        return Err(CatalogError::Invalid(format!(
            "open time {open} must be before close time {close}"
        )));
    }
    Ok(())
}

#[derive(Debug)]
pub enum CatalogError {
    Io(String),
    Parse(String),
    Invalid(String),
    DuplicateService(String),
    UnknownService(String),
    UnknownProfessional(String),
}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogError::Io(e) => write!(f, "catalog io error: {e}"),
            CatalogError::Parse(e) => write!(f, "catalog parse error: {e}"),
            CatalogError::Invalid(e) => write!(f, "invalid catalog: {e}"),
            CatalogError::DuplicateService(id) => write!(f, "service already exists: {id}"),
            CatalogError::UnknownService(id) => write!(f, "unknown service: {id}"),
            CatalogError::UnknownProfessional(id) => write!(f, "unknown professional: {id}"),
        }
    }
}

impl std::error::Error for CatalogError {}

/// Process-wide, read-mostly catalog. Edits affect subsequent computations only.
pub struct Catalog {
    state: RwLock<CatalogSnapshot>,
}

impl Catalog {
    pub fn new(snapshot: CatalogSnapshot) -> Result<Self, CatalogError> {
        snapshot.validate()?;
        Ok(Self {
            state: RwLock::new(snapshot),
        })
    }

    pub fn seeded() -> Self {
        Self {
            state: RwLock::new(CatalogSnapshot::seed()),
        }
    }

    /// Load a JSON catalog from `path`, or fall back to the built-in seed.
    pub fn load(path: Option<&Path>) -> Result<Self, CatalogError> {
        let Some(path) = path else {
            info!("catalog: using built-in seed");
            return Ok(Self::seeded());
        };
        let raw = std::fs::read_to_string(path)
            .map_err(|e| CatalogError::Io(format!("{}: {e}", path.display())))?;
        let snapshot: CatalogSnapshot =
            serde_json::from_str(&raw).map_err(|e| CatalogError::Parse(e.to_string()))?;
        info!(
            services = snapshot.services.len(),
            hidden = snapshot.hidden_services.len(),
            professionals = snapshot.professionals.len(),
            "catalog: loaded {}",
            path.display()
        );
        Self::new(snapshot)
    }

    pub async fn snapshot(&self) -> CatalogSnapshot {
        self.state.read().await.clone()
    }

    pub async fn services(&self) -> Vec<Service> {
        self.state.read().await.services.clone()
    }

    pub async fn hidden_services(&self) -> Vec<Service> {
        self.state.read().await.hidden_services.clone()
    }

    pub async fn professionals(&self) -> Vec<Professional> {
        self.state.read().await.professionals.clone()
    }

    pub async fn business(&self) -> BusinessConfig {
        self.state.read().await.business.clone()
    }

    pub async fn update_service_price(&self, id: &str, price: f64) -> Result<Service, CatalogError> {
        validate_price(price)?;
        let mut guard = self.state.write().await;
        let service = guard
            .services
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| CatalogError::UnknownService(id.to_string()))?;
        service.price = price;
        info!("catalog: service {id} price set to {price}");
        Ok(service.clone())
    }

    pub async fn add_service(&self, service: Service) -> Result<(), CatalogError> {
        validate_service(&service)?;
        let mut guard = self.state.write().await;
        if guard.any_service(&service.id).is_some() {
            return Err(CatalogError::DuplicateService(service.id));
        }
        if guard.services.len() + guard.hidden_services.len() >= MAX_SERVICES {
            return Err(CatalogError::Invalid("too many services".into()));
        }
        info!("catalog: added service {}", service.id);
        guard.services.push(service);
        Ok(())
    }

    /// Appointments that still reference a deleted service keep their slot with the
    /// default duration (or their snapshotted one).
    pub async fn delete_service(&self, id: &str) -> Result<Service, CatalogError> {
        let mut guard = self.state.write().await;
        let pos = guard
            .services
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| CatalogError::UnknownService(id.to_string()))?;
        info!("catalog: deleted service {id}");
        Ok(guard.services.remove(pos))
    }

    pub async fn update_professional_hours(
        &self,
        id: &str,
        open_time: Option<ClockTime>,
        close_time: Option<ClockTime>,
    ) -> Result<Professional, CatalogError> {
        validate_hours(open_time, close_time)?;
        let mut guard = self.state.write().await;
        let pro = guard
            .professionals
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| CatalogError::UnknownProfessional(id.to_string()))?;
        pro.open_time = open_time;
        pro.close_time = close_time;
        info!("catalog: professional {id} hours set to {open_time:?}..{close_time:?}");
        Ok(pro.clone())
    }

    pub async fn update_professional_services(
        &self,
        id: &str,
        service_ids: Vec<String>,
    ) -> Result<Professional, CatalogError> {
        let mut guard = self.state.write().await;
        if let Some(unknown) = service_ids.iter().find(|s| guard.service(s).is_none()) {
            return Err(CatalogError::UnknownService(unknown.clone()));
        }
        let pro = guard
            .professionals
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| CatalogError::UnknownProfessional(id.to_string()))?;
        pro.service_ids = service_ids;
        Ok(pro.clone())
    }

    pub async fn update_business(&self, business: BusinessConfig) -> Result<(), CatalogError> {
        validate_business(&business)?;
        let mut guard = self.state.write().await;
        info!(
            "catalog: business hours {}..{} every {} min",
            business.open_time, business.close_time, business.slot_interval
        );
        guard.business = business;
        Ok(())
    }
}

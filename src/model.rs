use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Offset, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use ulid::Ulid;

use crate::limits::{DEFAULT_UTC_OFFSET_MINUTES, SATURDAY_CLOSE};

/// Minutes after local midnight. The only time-of-day unit.
pub type Minutes = u32;

/// Half-open interval `[start, end)` within one calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Minutes,
    pub end: Minutes,
}

impl Span {
    pub fn new(start: Minutes, end: Minutes) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Interval occupied by something starting at `start` and lasting `duration` minutes.
    pub fn starting_at(start: ClockTime, duration: Minutes) -> Self {
        Self::new(start.minutes(), start.minutes() + duration)
    }

    /// Touching endpoints do not overlap, so back-to-back spans are compatible.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// A wall-clock time of day, written `HH:MM` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClockTime(Minutes);

impl ClockTime {
    pub const fn from_hm(hour: u32, minute: u32) -> Self {
        Self(hour * 60 + minute)
    }

    pub const fn from_minutes(minutes: Minutes) -> Self {
        Self(minutes)
    }

    pub const fn minutes(self) -> Minutes {
        self.0
    }

    pub const fn hour(self) -> u32 {
        self.0 / 60
    }

    pub const fn minute(self) -> u32 {
        self.0 % 60
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

impl FromStr for ClockTime {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || ParseError::Time(s.to_string());
        let (h, m) = s.split_once(':').ok_or_else(bad)?;
        if h.len() != 2 || m.len() != 2 {
            return Err(bad());
        }
        let hour: u32 = h.parse().map_err(|_| bad())?;
        let minute: u32 = m.parse().map_err(|_| bad())?;
        if hour > 23 || minute > 59 {
            return Err(bad());
        }
        Ok(Self::from_hm(hour, minute))
    }
}

impl Serialize for ClockTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ClockTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Parse a `YYYY-MM-DD` calendar date.
pub fn parse_date(s: &str) -> Result<NaiveDate, ParseError> {
    if s.len() != 10 {
        return Err(ParseError::Date(s.to_string()));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| ParseError::Date(s.to_string()))
}

/// 0=Sunday .. 6=Saturday.
pub fn weekday_number(date: NaiveDate) -> u32 {
    date.weekday().num_days_from_sunday()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    Time(String),
    Date(String),
    Status(String),
    MissingField(&'static str),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Time(s) => write!(f, "invalid time {s:?}: expected HH:MM"),
            ParseError::Date(s) => write!(f, "invalid date {s:?}: expected YYYY-MM-DD"),
            ParseError::Status(s) => write!(f, "unknown appointment status {s:?}"),
            ParseError::MissingField(name) => write!(f, "missing required field: {name}"),
        }
    }
}

impl std::error::Error for ParseError {}

// ── Catalog ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: String,
    pub name: String,
    pub duration_minutes: Minutes,
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Professional {
    pub id: String,
    pub name: String,
    #[serde(alias = "eligibleServiceIds")]
    pub service_ids: Vec<String>,
    #[serde(default)]
    pub phone: Option<String>,
    /// Overrides the business default when present.
    #[serde(default)]
    pub open_time: Option<ClockTime>,
    #[serde(default)]
    pub close_time: Option<ClockTime>,
}

impl Professional {
    pub fn performs(&self, service_id: &str) -> bool {
        self.service_ids.iter().any(|s| s == service_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessConfig {
    pub name: String,
    pub city: String,
    pub phone: String,
    pub open_time: ClockTime,
    pub close_time: ClockTime,
    /// Weekdays the shop opens, 0=Sunday .. 6=Saturday.
    pub days_open: Vec<u32>,
    pub slot_interval: Minutes,
    pub currency: String,
    /// Saturday closing time; wins over any professional's own close time.
    #[serde(default = "default_saturday_close")]
    pub saturday_close: Option<ClockTime>,
    #[serde(default = "default_utc_offset")]
    pub utc_offset_minutes: i32,
}

fn default_saturday_close() -> Option<ClockTime> {
    Some(SATURDAY_CLOSE)
}

fn default_utc_offset() -> i32 {
    DEFAULT_UTC_OFFSET_MINUTES
}

impl Default for BusinessConfig {
    fn default() -> Self {
        Self {
            name: "Estudio 3M".into(),
            city: "Aracaju".into(),
            phone: "79996604308".into(),
            open_time: ClockTime::from_hm(8, 0),
            close_time: ClockTime::from_hm(18, 0),
            days_open: vec![1, 2, 3, 4, 5, 6],
            slot_interval: 30,
            currency: "BRL".into(),
            saturday_close: default_saturday_close(),
            utc_offset_minutes: DEFAULT_UTC_OFFSET_MINUTES,
        }
    }
}

impl BusinessConfig {
    pub fn is_open_on(&self, date: NaiveDate) -> bool {
        self.days_open.contains(&weekday_number(date))
    }

    /// Fixed offset of the business's civil calendar. Out-of-range offsets fall back to UTC.
    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60)
            .unwrap_or_else(|| Utc.fix())
    }
}

// ── Appointments ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    Confirmed,
    Blocked,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    /// Confirmed and blocked appointments occupy their interval.
    pub fn is_active(self) -> bool {
        matches!(self, AppointmentStatus::Confirmed | AppointmentStatus::Blocked)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }

    pub fn can_transition_to(self, next: AppointmentStatus) -> bool {
        use AppointmentStatus::*;
        matches!(
            (self, next),
            (Confirmed, Completed) | (Confirmed, Cancelled) | (Blocked, Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Blocked => "blocked",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppointmentStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "confirmed" => Ok(AppointmentStatus::Confirmed),
            "blocked" => Ok(AppointmentStatus::Blocked),
            "completed" => Ok(AppointmentStatus::Completed),
            "cancelled" => Ok(AppointmentStatus::Cancelled),
            other => Err(ParseError::Status(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    pub id: Ulid,
    pub professional_id: String,
    pub service_id: String,
    pub date: NaiveDate,
    pub time: ClockTime,
    pub customer_name: String,
    pub customer_phone: String,
    #[serde(default)]
    pub customer_note: Option<String>,
    pub status: AppointmentStatus,
    pub created_at: DateTime<Utc>,
    /// Service duration captured at booking time; `None` means resolve from the catalog.
    #[serde(default)]
    pub duration_minutes: Option<Minutes>,
}

impl Appointment {
    pub fn occupies(&self, professional_id: &str, date: NaiveDate) -> bool {
        self.status.is_active() && self.professional_id == professional_id && self.date == date
    }
}

/// Booking request: an appointment minus the fields the orchestrator assigns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAppointment {
    pub professional_id: String,
    pub service_id: String,
    pub date: NaiveDate,
    pub time: ClockTime,
    pub customer_name: String,
    pub customer_phone: String,
    pub customer_note: Option<String>,
}

/// Untyped booking payload as submitted by a client.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentPayload {
    pub professional_id: Option<String>,
    pub service_id: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub customer_note: Option<String>,
}

impl TryFrom<AppointmentPayload> for NewAppointment {
    type Error = ParseError;

    fn try_from(p: AppointmentPayload) -> Result<Self, Self::Error> {
        fn required(v: Option<String>, name: &'static str) -> Result<String, ParseError> {
            match v {
                Some(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
                _ => Err(ParseError::MissingField(name)),
            }
        }

        let date = parse_date(&required(p.date, "date")?)?;
        let time: ClockTime = required(p.time, "time")?.parse()?;
        Ok(NewAppointment {
            professional_id: required(p.professional_id, "professionalId")?,
            service_id: required(p.service_id, "serviceId")?,
            date,
            time,
            customer_name: required(p.customer_name, "customerName")?,
            customer_phone: p.customer_phone.unwrap_or_default().trim().to_string(),
            customer_note: p.customer_note.filter(|n| !n.trim().is_empty()),
        })
    }
}

/// WAL record format for the local appointment store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    Created { appointment: Appointment },
    StatusChanged { id: Ulid, status: AppointmentStatus },
    Cleared,
}

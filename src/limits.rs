use crate::model::{ClockTime, Minutes};

/// Duration assumed for an appointment whose service is no longer in the catalog.
pub const DEFAULT_DURATION_MINUTES: Minutes = 30;

/// Saturdays close at this time regardless of per-professional hours.
pub const SATURDAY_CLOSE: ClockTime = ClockTime::from_hm(17, 0);

pub const SATURDAY: u32 = 6;

/// America/Sao_Paulo, which has observed no DST since 2019.
pub const DEFAULT_UTC_OFFSET_MINUTES: i32 = -180;

pub const MAX_ID_LEN: usize = 64;
pub const MAX_NAME_LEN: usize = 200;
pub const MAX_PHONE_LEN: usize = 32;
pub const MAX_NOTE_LEN: usize = 1000;

pub const MAX_SERVICE_DURATION_MINUTES: Minutes = 24 * 60;
pub const MAX_SERVICES: usize = 500;

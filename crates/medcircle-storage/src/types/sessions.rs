//! Device-bound daily quota types (free tier).

use chrono::NaiveDate;

use super::DeviceId;

/// One row per (device, calendar day). Reset is implicit: a new
/// `access_date` each day, never an explicit mutation.
#[derive(Clone, Debug)]
pub struct AccessSession {
    pub device_id: DeviceId,
    pub access_date: NaiveDate,
    pub used: bool,
}

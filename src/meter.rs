use chrono::{DateTime, SecondsFormat, Utc};
use serde_derive::{Deserialize, Serialize};

use crate::normalize::to_snake_case;

/// Prefix of every entity and statistic id produced by this crate.
pub const SENSOR_DOMAIN: &str = "sensor";

/// Meter as returned by `GET /api/homeassistant/meters`.
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiMeter {
    #[serde(default)]
    pub address_meter_id: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub identifier: Option<String>,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub access_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub access_to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub meter_counter_type: Option<String>,
}

/// Canonical meter record, as persisted in the configuration record.
///
/// Access window instants are kept in their serialized textual form
/// (RFC 3339, second precision, `+00:00` offset).
#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meter {
    pub address_meter_id: Option<String>,
    pub address: Option<String>,
    pub identifier: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub access_from: Option<String>,
    pub access_to: Option<String>,
    pub meter_counter_type: Option<String>,
}

impl From<ApiMeter> for Meter {
    fn from(meter: ApiMeter) -> Self {
        Self {
            address_meter_id: meter.address_meter_id,
            address: meter.address,
            identifier: meter.identifier,
            manufacturer: meter.manufacturer,
            model: meter.model,
            access_from: meter.access_from.map(format_instant),
            access_to: meter.access_to.map(format_instant),
            meter_counter_type: meter.meter_counter_type,
        }
    }
}

pub fn format_instant(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Secs, false)
}

impl Meter {
    /// `identifier + address + address_meter_id`, or `None` if any part is missing.
    pub fn identity_key(&self) -> Option<String> {
        let identifier = self.identifier.as_deref()?;
        let address = self.address.as_deref()?;
        let address_meter_id = self.address_meter_id.as_deref()?;
        Some(format!("{identifier}{address}{address_meter_id}"))
    }

    /// Entity id doubling as the statistic id, e.g. `sensor.1234_testvej_1_42`.
    pub fn statistic_id(&self) -> Option<String> {
        self.identity_key()
            .map(|key| format!("{SENSOR_DOMAIN}.{}", to_snake_case(&key)))
    }

    pub fn unique_id(&self) -> String {
        format!("{}-statistics", display_or_none(&self.identifier))
    }

    pub fn display_name(&self) -> String {
        display_or_none(&self.address).to_string()
    }

    /// Label shown when picking meters: `(identifier) address`.
    pub fn label(&self) -> String {
        format!(
            "({}) {}",
            display_or_none(&self.identifier),
            display_or_none(&self.address)
        )
    }
}

fn display_or_none(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("None")
}

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::task;

use crate::{
    api::MeterApi,
    config::SyncSettings,
    meter::Meter,
    statistics::{StatisticMetadata, StatisticsStore, RECORDER_SOURCE, UNIT_CUBIC_METERS},
    sync::{plan_fetch, readings_to_points, FetchPlan},
    throttle::Throttle,
};

/// A polled entity feeding long-term statistics.
#[async_trait]
pub trait Sensor: Send {
    fn entity_id(&self) -> &str;

    fn unique_id(&self) -> &str;

    fn name(&self) -> &str;

    fn metadata(&self) -> &StatisticMetadata;

    /// Brings the entity's statistics up to date. Errors are left to the caller.
    async fn update(&mut self) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Skipped,
    NoNewReadings,
    Imported(usize),
}

/// Water meter statistics for one enrolled meter.
pub struct MeterSensor {
    meter: Meter,
    address_meter_id: String,
    unique_id: String,
    metadata: StatisticMetadata,
    api: Arc<dyn MeterApi>,
    store: Arc<dyn StatisticsStore>,
    throttle: Throttle,
    recent_guard: Duration,
}

impl MeterSensor {
    pub const DEVICE_CLASS: &'static str = "water";
    pub const STATE_CLASS: &'static str = "total_increasing";

    /// Returns `None` for meters lacking identifier, address or address meter id.
    pub fn new(
        meter: Meter,
        api: Arc<dyn MeterApi>,
        store: Arc<dyn StatisticsStore>,
        settings: &SyncSettings,
    ) -> Option<Self> {
        let statistic_id = meter.statistic_id()?;
        let address_meter_id = meter.address_meter_id.clone()?;
        let metadata = StatisticMetadata {
            name: meter.display_name(),
            source: RECORDER_SOURCE.to_string(),
            statistic_id,
            unit_of_measurement: UNIT_CUBIC_METERS.to_string(),
            has_mean: false,
            has_sum: true,
        };
        Some(Self {
            unique_id: meter.unique_id(),
            address_meter_id,
            meter,
            metadata,
            api,
            store,
            throttle: Throttle::new(settings.update_throttle),
            recent_guard: settings.recent_guard,
        })
    }

    pub fn meter(&self) -> &Meter {
        &self.meter
    }

    /// One sync cycle as of `now`, bypassing the throttle.
    pub async fn sync_at(&self, now: DateTime<Utc>) -> anyhow::Result<SyncOutcome> {
        let entity_id = self.entity_id();
        let last = {
            let store = self.store.clone();
            let statistic_id = entity_id.to_string();
            task::spawn_blocking(move || store.get_last_statistics(&statistic_id)).await??
        };

        let response = match plan_fetch(last.as_ref(), now, self.recent_guard) {
            FetchPlan::Skip => {
                tracing::debug!(
                    entity_id,
                    latest = ?last.map(|row| row.start),
                    "Skipping fetching new readings"
                );
                return Ok(SyncOutcome::Skipped);
            }
            FetchPlan::Full => {
                tracing::debug!(entity_id, "Fetching full history");
                self.api.fetch_full(&self.address_meter_id).await?
            }
            FetchPlan::Partial { since } => {
                tracing::debug!(entity_id, since, "Fetching new readings");
                self.api.fetch_partial(&self.address_meter_id, since).await?
            }
        };

        let points = readings_to_points(response.address_meter_readings);
        if points.is_empty() {
            tracing::debug!(entity_id, "No new readings found");
            return Ok(SyncOutcome::NoNewReadings);
        }

        let count = points.len();
        tracing::info!(entity_id, count, "Adding readings");
        // The store may rewrite a file snapshot, keep that off the runtime workers
        let store = self.store.clone();
        let metadata = self.metadata.clone();
        task::spawn_blocking(move || store.import_statistics(&metadata, &points)).await??;
        Ok(SyncOutcome::Imported(count))
    }
}

#[async_trait]
impl Sensor for MeterSensor {
    fn entity_id(&self) -> &str {
        &self.metadata.statistic_id
    }

    fn unique_id(&self) -> &str {
        &self.unique_id
    }

    fn name(&self) -> &str {
        &self.metadata.name
    }

    fn metadata(&self) -> &StatisticMetadata {
        &self.metadata
    }

    async fn update(&mut self) -> anyhow::Result<()> {
        if !self.throttle.try_acquire(Instant::now()) {
            tracing::trace!(entity_id = self.entity_id(), "Update throttled");
            return Ok(());
        }
        self.sync_at(Utc::now()).await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::{
        api::{AddressMeterReadings, ApiError, MeterApi, MeterReading, MeterReadingResponse},
        meter::{ApiMeter, Meter},
    };

    #[derive(Debug, Clone, PartialEq)]
    pub enum Call {
        Authenticate(String),
        ListMeters,
        Full(String),
        Partial(String, i64),
    }

    /// In-process stand-in for the vendor gateway that records every call.
    #[derive(Default)]
    pub struct FakeApi {
        pub calls: Mutex<Vec<Call>>,
        pub readings: Vec<MeterReading>,
        pub meters: Vec<ApiMeter>,
        pub api_key: Option<String>,
        pub fail_fetch: bool,
        pub fail_listing: bool,
    }

    impl FakeApi {
        pub fn with_readings(readings: Vec<MeterReading>) -> Self {
            Self {
                readings,
                ..Default::default()
            }
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: Call) {
            self.calls.lock().unwrap().push(call);
        }

        fn response(&self, address_meter_id: &str) -> Result<MeterReadingResponse, ApiError> {
            if self.fail_fetch {
                return Err(ApiError::Status(reqwest::StatusCode::BAD_GATEWAY));
            }
            Ok(MeterReadingResponse {
                address_meter_readings: vec![AddressMeterReadings {
                    address_meter_id: Some(address_meter_id.to_string()),
                    readings: self.readings.clone(),
                }],
            })
        }
    }

    #[async_trait]
    impl MeterApi for FakeApi {
        async fn authenticate(&self, email: &str, _password: &str) -> Result<String, ApiError> {
            self.record(Call::Authenticate(email.to_string()));
            self.api_key.clone().ok_or(ApiError::NotFound)
        }

        async fn list_meters(&self) -> Result<Vec<ApiMeter>, ApiError> {
            self.record(Call::ListMeters);
            if self.fail_listing {
                return Err(ApiError::NotFound);
            }
            Ok(self.meters.clone())
        }

        async fn fetch_full(
            &self,
            address_meter_id: &str,
        ) -> Result<MeterReadingResponse, ApiError> {
            self.record(Call::Full(address_meter_id.to_string()));
            self.response(address_meter_id)
        }

        async fn fetch_partial(
            &self,
            address_meter_id: &str,
            since: i64,
        ) -> Result<MeterReadingResponse, ApiError> {
            self.record(Call::Partial(address_meter_id.to_string(), since));
            self.response(address_meter_id)
        }
    }

    pub fn meter(identifier: &str, address: &str, address_meter_id: &str) -> Meter {
        Meter {
            address_meter_id: Some(address_meter_id.to_string()),
            address: Some(address.to_string()),
            identifier: Some(identifier.to_string()),
            manufacturer: Some("Kamstrup".to_string()),
            model: Some("Multical 21".to_string()),
            access_from: None,
            access_to: None,
            meter_counter_type: Some("ColdWater".to_string()),
        }
    }
}

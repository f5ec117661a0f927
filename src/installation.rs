//! Per-installation context: the shared client, the statistics store, and the
//! sensors built from one configuration record.

use std::sync::Arc;

use crate::{
    api::{MaalerportalClient, MeterApi},
    config::SyncSettings,
    config_entry::ConfigRecord,
    scheduler::PollScheduler,
    sensor::MeterSensor,
    statistics::StatisticsStore,
};

pub struct Installation {
    api: Arc<dyn MeterApi>,
    sync: SyncSettings,
    pending: Vec<MeterSensor>,
    scheduler: Option<PollScheduler>,
}

impl Installation {
    /// Builds a client authenticated with the record's API key and a sensor
    /// per usable meter.
    pub fn setup(
        record: &ConfigRecord,
        base_url: &str,
        store: Arc<dyn StatisticsStore>,
        sync: SyncSettings,
    ) -> Self {
        let client = MaalerportalClient::new(base_url).with_api_key(record.api_key.as_str());
        Self::with_api(record, Arc::new(client), store, sync)
    }

    pub fn with_api(
        record: &ConfigRecord,
        api: Arc<dyn MeterApi>,
        store: Arc<dyn StatisticsStore>,
        sync: SyncSettings,
    ) -> Self {
        let mut pending = Vec::with_capacity(record.meters.len());
        for meter in &record.meters {
            match MeterSensor::new(meter.clone(), api.clone(), store.clone(), &sync) {
                Some(sensor) => pending.push(sensor),
                None => tracing::warn!(
                    address_meter_id = ?meter.address_meter_id,
                    identifier = ?meter.identifier,
                    address = ?meter.address,
                    "Skipping meter without identifier, address or address meter id"
                ),
            }
        }
        tracing::info!(sensors = pending.len(), "Installation set up");
        Self {
            api,
            sync,
            pending,
            scheduler: None,
        }
    }

    pub fn api(&self) -> &Arc<dyn MeterApi> {
        &self.api
    }

    /// Sensors created but not yet handed to the scheduler.
    pub fn sensors(&self) -> &[MeterSensor] {
        &self.pending
    }

    /// Hands every sensor to a fresh scheduler and starts polling.
    pub fn start(&mut self) -> &PollScheduler {
        let scheduler = self.scheduler.get_or_insert_with(PollScheduler::new);
        for sensor in self.pending.drain(..) {
            scheduler.register(Box::new(sensor), self.sync.scan_interval);
        }
        scheduler
    }

    pub fn scheduler(&self) -> Option<&PollScheduler> {
        self.scheduler.as_ref()
    }

    /// Stops polling. Statistics are kept.
    pub fn unload(&mut self) {
        if let Some(mut scheduler) = self.scheduler.take() {
            scheduler.shutdown();
            tracing::info!("Installation unloaded");
        }
    }
}

/// Purges the statistics of every enrolled meter that has a statistic id.
///
/// Returns the ids that were cleared.
pub fn remove_installation(
    record: &ConfigRecord,
    store: &dyn StatisticsStore,
) -> anyhow::Result<Vec<String>> {
    let statistic_ids = record.statistic_ids();
    if !statistic_ids.is_empty() {
        store.clear_statistics(&statistic_ids)?;
    }
    tracing::info!(cleared = statistic_ids.len(), "Installation removed");
    Ok(statistic_ids)
}

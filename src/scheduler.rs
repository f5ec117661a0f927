use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::{
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};

use crate::sensor::Sensor;

type Availability = Arc<Mutex<HashMap<String, bool>>>;

/// Shortest accepted scan interval; `tokio::time::interval` rejects zero.
pub const MIN_SCAN_INTERVAL: Duration = Duration::from_millis(1);

/// Polls every registered sensor on its own task.
///
/// A sensor is owned by exactly one task, so its updates never overlap.
/// Different sensors run independently of each other.
pub struct PollScheduler {
    availability: Availability,
    tasks: Vec<JoinHandle<()>>,
}

impl PollScheduler {
    pub fn new() -> Self {
        Self {
            availability: Arc::new(Mutex::new(HashMap::new())),
            tasks: Vec::new(),
        }
    }

    /// Registers a sensor and starts polling it every `scan_interval`.
    pub fn register(&mut self, sensor: Box<dyn Sensor>, scan_interval: Duration) {
        let entity_id = sensor.entity_id().to_string();
        if scan_interval < MIN_SCAN_INTERVAL {
            tracing::warn!(entity_id = %entity_id, ?scan_interval, "Scan interval too short, clamping");
        }
        let scan_interval = scan_interval.max(MIN_SCAN_INTERVAL);
        tracing::info!(entity_id = %entity_id, ?scan_interval, "Registering sensor");
        lock(&self.availability).insert(entity_id, true);

        let availability = self.availability.clone();
        self.tasks.push(tokio::spawn(async move {
            Self::run(sensor, scan_interval, availability).await;
        }));
    }

    async fn run(mut sensor: Box<dyn Sensor>, scan_interval: Duration, availability: Availability) {
        let mut ticker = interval(scan_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let available = match sensor.update().await {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(
                        entity_id = sensor.entity_id(),
                        error = %format!("{e:#}"),
                        "Update failed, retrying next interval"
                    );
                    false
                }
            };

            let previous = lock(&availability).insert(sensor.entity_id().to_string(), available);
            if available && previous == Some(false) {
                tracing::info!(entity_id = sensor.entity_id(), "Sensor available again");
            }
        }
    }

    /// `None` for entities that were never registered.
    pub fn is_available(&self, entity_id: &str) -> Option<bool> {
        lock(&self.availability).get(entity_id).copied()
    }

    pub fn entity_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.availability).keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Stops all polling tasks.
    pub fn shutdown(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Default for PollScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PollScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn lock(availability: &Availability) -> std::sync::MutexGuard<'_, HashMap<String, bool>> {
    availability.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statistics::StatisticMetadata;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use tokio::time::sleep;

    struct MockSensor {
        metadata: StatisticMetadata,
        updates: Arc<AtomicU32>,
        in_flight: Arc<AtomicBool>,
        overlapped: Arc<AtomicBool>,
        should_fail: Arc<AtomicBool>,
    }

    impl MockSensor {
        fn new(entity_id: &str) -> Self {
            Self {
                metadata: StatisticMetadata {
                    name: entity_id.to_string(),
                    source: "recorder".to_string(),
                    statistic_id: entity_id.to_string(),
                    unit_of_measurement: "m³".to_string(),
                    has_mean: false,
                    has_sum: true,
                },
                updates: Arc::new(AtomicU32::new(0)),
                in_flight: Arc::new(AtomicBool::new(false)),
                overlapped: Arc::new(AtomicBool::new(false)),
                should_fail: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    #[async_trait]
    impl Sensor for MockSensor {
        fn entity_id(&self) -> &str {
            &self.metadata.statistic_id
        }

        fn unique_id(&self) -> &str {
            &self.metadata.statistic_id
        }

        fn name(&self) -> &str {
            &self.metadata.name
        }

        fn metadata(&self) -> &StatisticMetadata {
            &self.metadata
        }

        async fn update(&mut self) -> anyhow::Result<()> {
            if self.in_flight.swap(true, Ordering::SeqCst) {
                self.overlapped.store(true, Ordering::SeqCst);
            }
            self.updates.fetch_add(1, Ordering::SeqCst);
            // Slower than the scan interval
            sleep(Duration::from_millis(30)).await;
            self.in_flight.store(false, Ordering::SeqCst);
            if self.should_fail.load(Ordering::SeqCst) {
                anyhow::bail!("gateway unavailable");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_sensors_polled_without_overlap() {
        let sensor = MockSensor::new("sensor.a");
        let updates = sensor.updates.clone();
        let overlapped = sensor.overlapped.clone();

        let mut scheduler = PollScheduler::new();
        scheduler.register(Box::new(sensor), Duration::from_millis(10));
        sleep(Duration::from_millis(200)).await;
        scheduler.shutdown();

        assert!(updates.load(Ordering::SeqCst) >= 2);
        assert!(!overlapped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_failed_update_marks_unavailable_until_success() {
        let sensor = MockSensor::new("sensor.a");
        let should_fail = sensor.should_fail.clone();
        should_fail.store(true, Ordering::SeqCst);

        let mut scheduler = PollScheduler::new();
        scheduler.register(Box::new(sensor), Duration::from_millis(10));
        assert_eq!(scheduler.is_available("sensor.a"), Some(true));

        sleep(Duration::from_millis(100)).await;
        assert_eq!(scheduler.is_available("sensor.a"), Some(false));

        should_fail.store(false, Ordering::SeqCst);
        sleep(Duration::from_millis(150)).await;
        assert_eq!(scheduler.is_available("sensor.a"), Some(true));
        assert_eq!(scheduler.is_available("sensor.unknown"), None);
    }

    #[tokio::test]
    async fn test_zero_scan_interval_still_polls() {
        let sensor = MockSensor::new("sensor.a");
        let updates = sensor.updates.clone();

        let mut scheduler = PollScheduler::new();
        scheduler.register(Box::new(sensor), Duration::ZERO);
        sleep(Duration::from_millis(100)).await;
        scheduler.shutdown();

        assert!(updates.load(Ordering::SeqCst) >= 1);
        assert_eq!(scheduler.is_available("sensor.a"), Some(true));
    }

    #[tokio::test]
    async fn test_shutdown_stops_polling() {
        let sensor = MockSensor::new("sensor.a");
        let updates = sensor.updates.clone();

        let mut scheduler = PollScheduler::new();
        scheduler.register(Box::new(sensor), Duration::from_millis(10));
        sleep(Duration::from_millis(100)).await;
        scheduler.shutdown();
        sleep(Duration::from_millis(50)).await;

        let after_shutdown = updates.load(Ordering::SeqCst);
        sleep(Duration::from_millis(100)).await;
        assert_eq!(updates.load(Ordering::SeqCst), after_shutdown);
        assert_eq!(scheduler.entity_ids(), vec!["sensor.a".to_string()]);
    }
}

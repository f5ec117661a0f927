//! Long-term statistics store.
//!
//! Series are keyed by statistic id and hold cumulative `(start, sum)` rows.
//! `StatisticsDb` keeps everything in memory and, when opened on a path,
//! rewrites a JSON snapshot after each mutation. The snapshot covers every
//! series, so it suits a handful of meters; store calls are blocking and
//! async callers run them on the blocking pool.

use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde_derive::{Deserialize, Serialize};

/// Source tag of statistics imported by this crate.
pub const RECORDER_SOURCE: &str = "recorder";
pub const UNIT_CUBIC_METERS: &str = "m³";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticMetadata {
    pub name: String,
    pub source: String,
    pub statistic_id: String,
    pub unit_of_measurement: String,
    pub has_mean: bool,
    pub has_sum: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatisticPoint {
    pub start: DateTime<Utc>,
    pub sum: f64,
}

/// Row read back from the store.
pub type StatisticRow = StatisticPoint;

pub trait StatisticsStore: Send + Sync {
    fn get_last_statistics(&self, statistic_id: &str) -> anyhow::Result<Option<StatisticRow>>;

    fn import_statistics(
        &self,
        metadata: &StatisticMetadata,
        points: &[StatisticPoint],
    ) -> anyhow::Result<()>;

    fn clear_statistics(&self, statistic_ids: &[String]) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Series {
    metadata: StatisticMetadata,
    rows: BTreeMap<DateTime<Utc>, f64>,
}

#[derive(Debug)]
pub struct StatisticsDb {
    path: Option<PathBuf>,
    series: Mutex<HashMap<String, Series>>,
}

impl Default for StatisticsDb {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl StatisticsDb {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            series: Mutex::new(HashMap::new()),
        }
    }

    /// Opens a file-backed store, starting empty if the file does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let series = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("reading statistics from {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("parsing statistics in {}", path.display()))?
        } else {
            HashMap::new()
        };
        Ok(Self {
            path: Some(path),
            series: Mutex::new(series),
        })
    }

    /// All rows of a series in ascending order.
    pub fn rows(&self, statistic_id: &str) -> Vec<StatisticRow> {
        let series = self.lock();
        series
            .get(statistic_id)
            .map(|s| {
                s.rows
                    .iter()
                    .map(|(start, sum)| StatisticPoint {
                        start: *start,
                        sum: *sum,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn metadata(&self, statistic_id: &str) -> Option<StatisticMetadata> {
        self.lock().get(statistic_id).map(|s| s.metadata.clone())
    }

    pub fn statistic_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Series>> {
        // A poisoned map is still structurally valid; keep serving it.
        self.series.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn persist(&self, series: &HashMap<String, Series>) -> anyhow::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let contents = serde_json::to_string(series)?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, contents)
            .with_context(|| format!("writing statistics to {}", tmp.display()))?;
        fs::rename(&tmp, path)
            .with_context(|| format!("replacing statistics at {}", path.display()))?;
        Ok(())
    }
}

impl StatisticsStore for StatisticsDb {
    fn get_last_statistics(&self, statistic_id: &str) -> anyhow::Result<Option<StatisticRow>> {
        let series = self.lock();
        Ok(series
            .get(statistic_id)
            .and_then(|s| s.rows.iter().next_back())
            .map(|(start, sum)| StatisticPoint {
                start: *start,
                sum: *sum,
            }))
    }

    fn import_statistics(
        &self,
        metadata: &StatisticMetadata,
        points: &[StatisticPoint],
    ) -> anyhow::Result<()> {
        let mut series = self.lock();
        let entry = series
            .entry(metadata.statistic_id.clone())
            .or_insert_with(|| Series {
                metadata: metadata.clone(),
                rows: BTreeMap::new(),
            });
        entry.metadata = metadata.clone();
        for point in points {
            entry.rows.insert(point.start, point.sum);
        }
        tracing::debug!(
            statistic_id = %metadata.statistic_id,
            imported = points.len(),
            total = entry.rows.len(),
            "Imported statistics"
        );
        self.persist(&series)
    }

    fn clear_statistics(&self, statistic_ids: &[String]) -> anyhow::Result<()> {
        let mut series = self.lock();
        for id in statistic_ids {
            if series.remove(id).is_some() {
                tracing::info!(statistic_id = %id, "Cleared statistics");
            }
        }
        self.persist(&series)
    }
}

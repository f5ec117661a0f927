use std::{env, path::PathBuf, str::FromStr, time::Duration};

use anyhow::Context;

use crate::{
    api::DEFAULT_BASE_URL,
    sync::{RECENT_STATISTIC_GUARD, UPDATE_THROTTLE},
};

const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(60);

/// Timing knobs of the polling loop. The throttle and the recent-statistic
/// guard are tuned independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    /// How often the scheduler offers each sensor an update.
    pub scan_interval: Duration,
    /// Minimum interval between two updates of one sensor.
    pub update_throttle: Duration,
    /// Fetching is skipped while the newest statistic is younger than this.
    pub recent_guard: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            scan_interval: DEFAULT_SCAN_INTERVAL,
            update_throttle: UPDATE_THROTTLE,
            recent_guard: RECENT_STATISTIC_GUARD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub base_url: String,
    pub config_path: PathBuf,
    pub statistics_path: PathBuf,
    pub sync: SyncSettings,
}

impl Settings {
    /// Reads settings from `MAALERPORTAL_*` environment variables, falling
    /// back to defaults for anything unset or empty.
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = SyncSettings::default();
        let sync = SyncSettings {
            scan_interval: env_nonzero_duration(
                "MAALERPORTAL_SCAN_INTERVAL_SECS",
                1,
                defaults.scan_interval,
            )?,
            update_throttle: env_duration(
                "MAALERPORTAL_THROTTLE_MINUTES",
                60,
                defaults.update_throttle,
            )?,
            recent_guard: env_duration(
                "MAALERPORTAL_RECENT_GUARD_MINUTES",
                60,
                defaults.recent_guard,
            )?,
        };
        Ok(Self {
            base_url: env_string("MAALERPORTAL_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            config_path: env_string("MAALERPORTAL_CONFIG")
                .unwrap_or_else(|| "maalerportal.json".to_string())
                .into(),
            statistics_path: env_string("MAALERPORTAL_STATISTICS")
                .unwrap_or_else(|| "statistics.json".to_string())
                .into(),
            sync,
        })
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T>(key: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env_string(key)
        .map(|v| v.trim().parse::<T>().with_context(|| format!("invalid {key}: {v:?}")))
        .transpose()
}

fn env_duration(key: &str, unit_secs: u64, default: Duration) -> anyhow::Result<Duration> {
    Ok(env_parse::<u64>(key)?
        .map(|n| Duration::from_secs(n.saturating_mul(unit_secs)))
        .unwrap_or(default))
}

fn env_nonzero_duration(key: &str, unit_secs: u64, default: Duration) -> anyhow::Result<Duration> {
    let duration = env_duration(key, unit_secs, default)?;
    if duration.is_zero() {
        anyhow::bail!("invalid {key}: must be greater than zero");
    }
    Ok(duration)
}

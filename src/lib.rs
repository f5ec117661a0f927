//! Målerportal water meter sync
//!
//! Enrolls water meters from the Målerportal smart-home gateway and keeps
//! their cumulative readings imported as long-term statistics, fetching only
//! what is newer than the last stored point.

pub mod api;
pub mod config;
pub mod config_entry;
pub mod enrollment;
pub mod installation;
pub mod meter;
pub mod normalize;
pub mod scheduler;
pub mod sensor;
pub mod statistics;
pub mod sync;
pub mod throttle;

// Re-export commonly used types for easier access
pub use api::{MaalerportalClient, MeterApi};
pub use config::{Settings, SyncSettings};
pub use config_entry::{ConfigEntryStore, ConfigRecord};
pub use enrollment::{EnrollmentError, EnrollmentFlow, MeterOption};
pub use installation::{remove_installation, Installation};
pub use meter::Meter;
pub use scheduler::PollScheduler;
pub use sensor::{MeterSensor, Sensor};
pub use statistics::{StatisticsDb, StatisticsStore};

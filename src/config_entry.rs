use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use serde_derive::{Deserialize, Serialize};

use crate::meter::Meter;

pub const ENTRY_TITLE: &str = "Målere";

/// What enrollment persists: the API key and the chosen meters, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigRecord {
    pub api_key: String,
    pub meters: Vec<Meter>,
}

impl ConfigRecord {
    pub fn title(&self) -> &'static str {
        ENTRY_TITLE
    }

    /// Statistic ids of every meter complete enough to have one.
    pub fn statistic_ids(&self) -> Vec<String> {
        self.meters.iter().filter_map(Meter::statistic_id).collect()
    }
}

#[derive(Debug, Clone)]
pub struct ConfigEntryStore {
    path: PathBuf,
}

impl ConfigEntryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn load(&self) -> anyhow::Result<ConfigRecord> {
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("reading configuration from {}", self.path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("parsing configuration in {}", self.path.display()))
    }

    pub fn save(&self, record: &ConfigRecord) -> anyhow::Result<()> {
        let contents = serde_json::to_string_pretty(record)?;
        fs::write(&self.path, contents)
            .with_context(|| format!("writing configuration to {}", self.path.display()))
    }

    /// Deletes the record; a missing file is not an error.
    pub fn remove(&self) -> anyhow::Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e)
                .with_context(|| format!("removing configuration {}", self.path.display())),
        }
    }
}

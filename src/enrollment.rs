//! Two-step enrollment: trade credentials for an API key, then pick meters.

use std::sync::Arc;

use crate::{
    api::{ApiError, MaalerportalClient, MeterApi},
    config_entry::ConfigRecord,
    meter::Meter,
};

#[derive(Debug, thiserror::Error)]
pub enum EnrollmentError {
    #[error("invalid email or password")]
    InvalidAuth,
    #[error("cannot connect to Målerportal")]
    CannotConnect,
    #[error("unexpected error: {0:#}")]
    Unknown(anyhow::Error),
}

impl EnrollmentError {
    /// Stable code to show the user.
    pub fn code(&self) -> &'static str {
        match self {
            EnrollmentError::InvalidAuth => "invalid_auth",
            EnrollmentError::CannotConnect => "cannot_connect",
            EnrollmentError::Unknown(_) => "unknown",
        }
    }
}

impl From<ApiError> for EnrollmentError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::NotFound => EnrollmentError::InvalidAuth,
            ApiError::Connect(_) => EnrollmentError::CannotConnect,
            other => {
                tracing::error!(error = ?other, "Unexpected exception during enrollment");
                EnrollmentError::Unknown(other.into())
            }
        }
    }
}

/// A meter the user can pick, keyed by its address meter id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeterOption {
    pub key: String,
    pub label: String,
}

type Connector = Box<dyn Fn(Option<&str>) -> Arc<dyn MeterApi> + Send + Sync>;

pub struct EnrollmentFlow {
    connect: Connector,
    api_key: Option<String>,
    meters: Vec<Meter>,
}

impl EnrollmentFlow {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self::with_connector(move |api_key| -> Arc<dyn MeterApi> {
            let client = MaalerportalClient::new(base_url.as_str());
            Arc::new(match api_key {
                Some(key) => client.with_api_key(key),
                None => client,
            })
        })
    }

    /// `connect` builds an API handle, authenticated when given a key.
    pub fn with_connector<F>(connect: F) -> Self
    where
        F: Fn(Option<&str>) -> Arc<dyn MeterApi> + Send + Sync + 'static,
    {
        Self {
            connect: Box::new(connect),
            api_key: None,
            meters: Vec::new(),
        }
    }

    /// Step one: authenticate, then list the meters the new key can see.
    pub async fn submit_credentials(
        &mut self,
        email: &str,
        password: &str,
    ) -> Result<Vec<MeterOption>, EnrollmentError> {
        let api_key = (self.connect)(None).authenticate(email, password).await?;
        let meters = (self.connect)(Some(api_key.as_str()))
            .list_meters()
            .await
            .map_err(|err| match err {
                // The key was just issued; only authenticate reports bad credentials
                ApiError::NotFound => {
                    tracing::error!("Meter listing not found after authenticating");
                    EnrollmentError::Unknown(anyhow::anyhow!("meter listing not found"))
                }
                other => EnrollmentError::from(other),
            })?;

        self.meters = meters.into_iter().map(Meter::from).collect();
        self.api_key = Some(api_key);
        tracing::info!(meters = self.meters.len(), "Authenticated with Målerportal");
        Ok(self.options())
    }

    /// Meters offered for selection; those without an address meter id cannot be picked.
    pub fn options(&self) -> Vec<MeterOption> {
        self.meters
            .iter()
            .filter_map(|meter| {
                Some(MeterOption {
                    key: meter.address_meter_id.clone()?,
                    label: meter.label(),
                })
            })
            .collect()
    }

    /// Step two: build the record for the chosen address meter ids.
    pub fn select_meters<S: AsRef<str>>(&self, keys: &[S]) -> Result<ConfigRecord, EnrollmentError> {
        let api_key = self.api_key.clone().ok_or_else(|| {
            EnrollmentError::Unknown(anyhow::anyhow!("meters selected before authenticating"))
        })?;

        let mut selected: Vec<Meter> = Vec::new();
        for key in keys {
            let key = key.as_ref();
            if selected.iter().any(|m| m.address_meter_id.as_deref() == Some(key)) {
                continue;
            }
            match self
                .meters
                .iter()
                .find(|m| m.address_meter_id.as_deref() == Some(key))
            {
                Some(meter) => selected.push(meter.clone()),
                None => tracing::warn!(key, "Ignoring unknown meter selection"),
            }
        }

        Ok(ConfigRecord {
            api_key,
            meters: selected,
        })
    }
}

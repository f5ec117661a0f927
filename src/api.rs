use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, StatusCode};
use serde::de::DeserializeOwned;
use serde_derive::{Deserialize, Serialize};

use crate::meter::ApiMeter;

pub const DEFAULT_BASE_URL: &str = "http://gateway-smarthome:8080";
const API_KEY_HEADER: &str = "X-API-KEY";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("resource not found")]
    NotFound,
    #[error("cannot connect to Målerportal: {0}")]
    Connect(#[source] reqwest::Error),
    #[error("Målerportal returned unexpected status {0}")]
    Status(StatusCode),
    #[error("malformed response from Målerportal: {0}")]
    Decode(#[source] reqwest::Error),
    #[error("request to Målerportal failed: {0}")]
    Request(#[source] reqwest::Error),
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            ApiError::Connect(err)
        } else if err.is_decode() {
            ApiError::Decode(err)
        } else {
            ApiError::Request(err)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRequest {
    pub email_address: String,
    pub password: String,
}

#[derive(Default, Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FullRequest {
    pub address_meter_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialRequest {
    pub address_meter_id: String,
    /// Unix epoch seconds; only readings at or after this instant are returned.
    pub latest_measurement_time: i64,
}

#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterReading {
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub value: Option<f64>,
}

/// Readings of one physical meter at an address.
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressMeterReadings {
    #[serde(default)]
    pub address_meter_id: Option<String>,
    #[serde(default)]
    pub readings: Vec<MeterReading>,
}

#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterReadingResponse {
    #[serde(default)]
    pub address_meter_readings: Vec<AddressMeterReadings>,
}

/// Calls offered by the Målerportal smart-home gateway.
#[async_trait]
pub trait MeterApi: Send + Sync {
    /// Exchanges credentials for an API key.
    async fn authenticate(&self, email: &str, password: &str) -> Result<String, ApiError>;

    async fn list_meters(&self) -> Result<Vec<ApiMeter>, ApiError>;

    async fn fetch_full(&self, address_meter_id: &str) -> Result<MeterReadingResponse, ApiError>;

    async fn fetch_partial(
        &self,
        address_meter_id: &str,
        since: i64,
    ) -> Result<MeterReadingResponse, ApiError>;
}

#[derive(Debug, Clone)]
pub struct MaalerportalClient {
    endpoint_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl Default for MaalerportalClient {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

impl MaalerportalClient {
    /// Unauthenticated client, only good for [`MeterApi::authenticate`].
    pub fn new(endpoint_url: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn endpoint_url(&self) -> &str {
        &self.endpoint_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/homeassistant/{}", self.endpoint_url, path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header(API_KEY_HEADER, key),
            None => request,
        }
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: serde::Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = self
            .authorize(self.client.post(self.url(path)))
            .header(header::ACCEPT, "application/json")
            .json(body);
        Self::execute(request).await
    }

    async fn execute<T: DeserializeOwned>(request: reqwest::RequestBuilder) -> Result<T, ApiError> {
        let response = request.send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(ApiError::NotFound),
            status if !status.is_success() => Err(ApiError::Status(status)),
            _ => response.json().await.map_err(ApiError::Decode),
        }
    }
}

#[async_trait]
impl MeterApi for MaalerportalClient {
    async fn authenticate(&self, email: &str, password: &str) -> Result<String, ApiError> {
        let request = AuthRequest {
            email_address: email.to_string(),
            password: password.to_string(),
        };
        let response: AuthResponse = self.post("authenticate", &request).await?;
        response.api_key.ok_or(ApiError::NotFound)
    }

    async fn list_meters(&self) -> Result<Vec<ApiMeter>, ApiError> {
        let request = self
            .authorize(self.client.get(self.url("meters")))
            .header(header::ACCEPT, "application/json");
        Self::execute(request).await
    }

    async fn fetch_full(&self, address_meter_id: &str) -> Result<MeterReadingResponse, ApiError> {
        let request = [FullRequest {
            address_meter_id: address_meter_id.to_string(),
        }];
        self.post("full", &request).await
    }

    async fn fetch_partial(
        &self,
        address_meter_id: &str,
        since: i64,
    ) -> Result<MeterReadingResponse, ApiError> {
        let request = [PartialRequest {
            address_meter_id: address_meter_id.to_string(),
            latest_measurement_time: since,
        }];
        self.post("partial", &request).await
    }
}

#[cfg(test)]
mod test_maalerportal_client {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    #[tokio::test]
    async fn test_authenticate() {
        let mut server = mockito::Server::new_async().await;

        let mock = server
            .mock("POST", "/api/homeassistant/authenticate")
            .match_body(Matcher::Json(json!({
                "emailAddress": "user@example.com",
                "password": "hunter2"
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"apiKey": "secret-key"}"#)
            .create_async()
            .await;

        let api = MaalerportalClient::new(server.url());
        let key = api.authenticate("user@example.com", "hunter2").await.unwrap();

        assert_eq!(key, "secret-key");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_authenticate_unknown_user() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/homeassistant/authenticate")
            .with_status(404)
            .create_async()
            .await;

        let api = MaalerportalClient::new(server.url());
        let result = api.authenticate("nobody@example.com", "wrong").await;

        assert!(matches!(result, Err(ApiError::NotFound)));
    }

    #[tokio::test]
    async fn test_authenticate_without_key_is_rejected() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/homeassistant/authenticate")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"apiKey": null}"#)
            .create_async()
            .await;

        let api = MaalerportalClient::new(server.url());
        let result = api.authenticate("user@example.com", "hunter2").await;

        assert!(matches!(result, Err(ApiError::NotFound)));
    }

    #[tokio::test]
    async fn test_list_meters_sends_api_key() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/homeassistant/meters")
            .match_header("X-API-KEY", "secret-key")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"
                [
                    {
                        "addressMeterId": "42",
                        "address": "Testvej 1",
                        "identifier": "12345678",
                        "manufacturer": "Kamstrup",
                        "model": "Multical 21",
                        "accessFrom": "2023-01-01T00:00:00Z",
                        "accessTo": null,
                        "meterCounterType": "ColdWater"
                    },
                    {
                        "addressMeterId": "43"
                    }
                ]
            "#,
            )
            .create_async()
            .await;

        let api = MaalerportalClient::new(server.url()).with_api_key("secret-key");
        let meters = api.list_meters().await.unwrap();

        assert_eq!(meters.len(), 2);
        assert_eq!(meters[0].identifier.as_deref(), Some("12345678"));
        assert_eq!(meters[1].address, None);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_partial_request_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/homeassistant/partial")
            .match_header("X-API-KEY", "secret-key")
            .match_body(Matcher::Json(json!([
                { "addressMeterId": "42", "latestMeasurementTime": 1001 }
            ])))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"
                {
                    "addressMeterReadings": [
                        {
                            "addressMeterId": "42",
                            "readings": [
                                { "timestamp": "2023-01-01T02:00:00Z", "value": 12.5 },
                                { "timestamp": null, "value": 12.0 }
                            ]
                        }
                    ]
                }
            "#,
            )
            .create_async()
            .await;

        let api = MaalerportalClient::new(server.url()).with_api_key("secret-key");
        let response = api.fetch_partial("42", 1001).await.unwrap();

        let readings = &response.address_meter_readings[0].readings;
        assert_eq!(readings.len(), 2);
        assert_eq!(readings[0].value, Some(12.5));
        assert_eq!(readings[1].timestamp, None);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_full_server_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/homeassistant/full")
            .match_body(Matcher::Json(json!([{ "addressMeterId": "42" }])))
            .with_status(500)
            .create_async()
            .await;

        let api = MaalerportalClient::new(server.url()).with_api_key("secret-key");
        let result = api.fetch_full("42").await;

        assert!(matches!(
            result,
            Err(ApiError::Status(StatusCode::INTERNAL_SERVER_ERROR))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_gateway_is_connect_error() {
        // Port 9 (discard) on localhost is not expected to be listening.
        let api = MaalerportalClient::new("http://127.0.0.1:9");
        let result = api.authenticate("user@example.com", "hunter2").await;

        assert!(matches!(result, Err(ApiError::Connect(_))));
    }
}

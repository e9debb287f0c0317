use crate::error::{DeviceClientError, Result};
use crate::{DeviceClient, DeviceConfig, RawResponse};
use async_trait::async_trait;
use ixmon_common::types::Category;
use serde::Deserialize;
use std::time::Duration;

/// REST client for chassis appliances.
///
/// Each fetch opens a short-lived session (`POST /platform/api/v2/auth/session`
/// with username/password, returning an api key) and then GETs the category
/// resource with the key attached. Chassis ship self-signed certificates, so
/// certificate validation is disabled for this client.
pub struct RestDeviceClient {
    client: reqwest::Client,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    api_key: String,
}

fn resource_path(category: Category) -> &'static str {
    match category {
        Category::Ports => "chassis/api/v2/ixos/ports",
        Category::Sensors => "chassis/api/v2/ixos/sensors",
        Category::Performance => "chassis/api/v2/ixos/perfcounters",
    }
}

impl RestDeviceClient {
    /// `request_timeout` bounds each HTTP round-trip; the poller applies its
    /// own overall per-device timeout on top.
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(request_timeout)
            .build()?;
        Ok(Self { client })
    }

    async fn authenticate(&self, device: &DeviceConfig) -> Result<String> {
        let url = format!("https://{}/platform/api/v2/auth/session", device.address);
        let resp = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "username": device.username,
                "password": device.password,
            }))
            .send()
            .await?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(DeviceClientError::Auth {
                address: device.address.clone(),
            });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(DeviceClientError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let session: SessionResponse = resp
            .json()
            .await
            .map_err(|e| DeviceClientError::Protocol(format!("session response: {e}")))?;
        Ok(session.api_key)
    }
}

#[async_trait]
impl DeviceClient for RestDeviceClient {
    async fn fetch(&self, device: &DeviceConfig, category: Category) -> Result<RawResponse> {
        let api_key = self.authenticate(device).await?;

        let url = format!("https://{}/{}", device.address, resource_path(category));
        let resp = self
            .client
            .get(&url)
            .header("X-Api-Key", api_key)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(DeviceClientError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let value: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| DeviceClientError::Protocol(format!("{category} response: {e}")))?;

        // Port and sensor resources answer with an array of objects; the
        // perfcounter resource answers with a single object.
        let rows = match value {
            serde_json::Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    serde_json::Value::Object(map) => Ok(map),
                    other => Err(DeviceClientError::Protocol(format!(
                        "expected object row, got {other}"
                    ))),
                })
                .collect::<Result<Vec<_>>>()?,
            serde_json::Value::Object(map) => vec![map],
            other => {
                return Err(DeviceClientError::Protocol(format!(
                    "expected array or object, got {other}"
                )))
            }
        };

        Ok(RawResponse { rows })
    }
}

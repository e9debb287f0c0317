//! Device-side boundary of the fleet poller.
//!
//! A [`DeviceClient`] authenticates against one chassis and fetches one
//! category of data per call. The poller core only ever sees this trait;
//! [`rest::RestDeviceClient`] is the production implementation, tests supply
//! mocks.

pub mod error;
pub mod rest;

use async_trait::async_trait;
use ixmon_common::types::Category;
use serde::{Deserialize, Serialize};

pub use error::DeviceClientError;
pub use rest::RestDeviceClient;

/// Address and credentials for one chassis. Loaded once from configuration
/// and immutable for the process lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub address: String,
    pub username: String,
    pub password: String,
}

/// Raw category payload for one device: one JSON object per sub-resource,
/// in the order the device returned them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawResponse {
    pub rows: Vec<serde_json::Map<String, serde_json::Value>>,
}

/// One-category fetch against one chassis.
///
/// Implementations own their whole request/response lifecycle and share no
/// mutable state, so the poller can run one fetch per device concurrently
/// without locks.
#[async_trait]
pub trait DeviceClient: Send + Sync {
    /// Authenticates (or reuses a session) and fetches `category` data
    /// from `device`.
    async fn fetch(&self, device: &DeviceConfig, category: Category)
        -> error::Result<RawResponse>;
}

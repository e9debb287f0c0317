//! One poll cycle across the whole fleet.

use crate::normalize;
use chrono::{DateTime, SubsecRound, Utc};
use ixmon_client::{DeviceClient, DeviceClientError, DeviceConfig};
use ixmon_common::types::{Batch, Category, DeviceRecord, PollOutcome};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::timeout;

/// Orchestrates one poll cycle: one concurrent fetch task per configured
/// device, per-device fault isolation, and a single synchronized cycle
/// timestamp across every record in the resulting [`Batch`].
///
/// Parallelism is bounded by the fleet size itself: one task per device,
/// nothing queued behind a worker pool.
pub struct FleetPoller {
    category: Category,
    devices: Arc<Vec<DeviceConfig>>,
    client: Arc<dyn DeviceClient>,
    fetch_timeout: Duration,
}

impl FleetPoller {
    pub fn new(
        category: Category,
        devices: Vec<DeviceConfig>,
        client: Arc<dyn DeviceClient>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            category,
            devices: Arc::new(devices),
            client,
            fetch_timeout,
        }
    }

    pub fn category(&self) -> Category {
        self.category
    }

    /// Runs one complete cycle and returns the frozen batch.
    ///
    /// Returns only after every dispatched fetch has completed or been marked
    /// failed; there is no partial cycle emission. A failing device
    /// contributes exactly one sentinel record, so downstream consumers
    /// always see one outcome per configured device.
    pub async fn run_cycle(&self) -> Batch {
        // Whole-second timestamp shared by all records, taken before
        // dispatch so per-device latency cannot skew the snapshot.
        let cycle_timestamp = Utc::now().trunc_subsecs(0);
        let mut batch = Batch::new(cycle_timestamp);

        if self.devices.is_empty() {
            return batch;
        }

        // Addresses still owed an outcome. Drained as results arrive;
        // whatever remains after the join barrier (a panicked task) gets a
        // sentinel so the one-outcome-per-device guarantee survives bugs.
        let mut pending: HashMap<String, usize> = HashMap::new();
        for device in self.devices.iter() {
            *pending.entry(device.address.clone()).or_insert(0) += 1;
        }

        let mut tasks = JoinSet::new();
        for device in self.devices.iter().cloned() {
            let client = Arc::clone(&self.client);
            let category = self.category;
            let fetch_timeout = self.fetch_timeout;
            tasks.spawn(async move {
                let outcome =
                    poll_device(client.as_ref(), &device, category, cycle_timestamp, fetch_timeout)
                        .await;
                (device.address, outcome)
            });
        }

        // Join barrier, in completion order rather than dispatch order.
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((address, outcome)) => {
                    if let Some(count) = pending.get_mut(&address) {
                        *count -= 1;
                        if *count == 0 {
                            pending.remove(&address);
                        }
                    }
                    batch.absorb(outcome);
                }
                Err(e) => {
                    tracing::error!(category = %self.category, error = %e, "Device poll task panicked");
                }
            }
        }

        for (address, count) in pending {
            for _ in 0..count {
                tracing::warn!(
                    device = %address,
                    category = %self.category,
                    "Device task ended without reporting, substituting sentinel"
                );
                batch.absorb(PollOutcome::Failed(DeviceRecord::sentinel(
                    &address,
                    self.category,
                    cycle_timestamp,
                )));
            }
        }

        batch
    }
}

/// Fetches and normalizes one device, converting every failure mode into the
/// sentinel outcome so nothing raises past the orchestrator boundary.
async fn poll_device(
    client: &dyn DeviceClient,
    device: &DeviceConfig,
    category: Category,
    cycle_timestamp: DateTime<Utc>,
    fetch_timeout: Duration,
) -> PollOutcome {
    let raw = match timeout(fetch_timeout, client.fetch(device, category)).await {
        Ok(Ok(raw)) => raw,
        Ok(Err(e)) => {
            tracing::warn!(device = %device.address, category = %category, error = %e, "Device fetch failed");
            return PollOutcome::Failed(DeviceRecord::sentinel(
                &device.address,
                category,
                cycle_timestamp,
            ));
        }
        Err(_) => {
            let e = DeviceClientError::Timeout(fetch_timeout);
            tracing::warn!(device = %device.address, category = %category, error = %e, "Device fetch failed");
            return PollOutcome::Failed(DeviceRecord::sentinel(
                &device.address,
                category,
                cycle_timestamp,
            ));
        }
    };

    let records = normalize::normalize(&raw, device, category, cycle_timestamp);
    if records.is_empty() {
        PollOutcome::Empty
    } else {
        PollOutcome::Success(records)
    }
}

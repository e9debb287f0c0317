//! Poller self-observability on an injected prometheus registry.

use ixmon_common::types::{Batch, Category};
use prometheus::{GaugeVec, IntCounterVec, IntGaugeVec, Opts, Registry};
use std::time::Duration;

/// Counters and gauges describing the poll loop itself, registered on the
/// registry the daemon serves at `/metrics`. Owned explicitly and passed to
/// each scheduler at construction; there are no module-level singletons.
pub struct PollerMetrics {
    cycles_total: IntCounterVec,
    cycle_records: IntGaugeVec,
    cycle_sentinels: IntGaugeVec,
    cycle_duration_seconds: GaugeVec,
    sink_last_success: GaugeVec,
}

impl PollerMetrics {
    pub fn register(registry: &Registry) -> prometheus::Result<Self> {
        let cycles_total = IntCounterVec::new(
            Opts::new("ixmon_cycles_total", "Completed poll cycles"),
            &["category"],
        )?;
        let cycle_records = IntGaugeVec::new(
            Opts::new("ixmon_cycle_records", "Records produced by the last cycle"),
            &["category"],
        )?;
        let cycle_sentinels = IntGaugeVec::new(
            Opts::new(
                "ixmon_cycle_sentinels",
                "Failed devices (sentinel records) in the last cycle",
            ),
            &["category"],
        )?;
        let cycle_duration_seconds = GaugeVec::new(
            Opts::new("ixmon_cycle_duration_seconds", "Duration of the last cycle"),
            &["category"],
        )?;
        let sink_last_success = GaugeVec::new(
            Opts::new(
                "ixmon_sink_last_success_timestamp_seconds",
                "Unix time of the last successful write per sink",
            ),
            &["sink"],
        )?;

        registry.register(Box::new(cycles_total.clone()))?;
        registry.register(Box::new(cycle_records.clone()))?;
        registry.register(Box::new(cycle_sentinels.clone()))?;
        registry.register(Box::new(cycle_duration_seconds.clone()))?;
        registry.register(Box::new(sink_last_success.clone()))?;

        Ok(Self {
            cycles_total,
            cycle_records,
            cycle_sentinels,
            cycle_duration_seconds,
            sink_last_success,
        })
    }

    pub fn observe_cycle(&self, category: Category, batch: &Batch, elapsed: Duration) {
        let label = [category.as_str()];
        self.cycles_total.with_label_values(&label).inc();
        self.cycle_records
            .with_label_values(&label)
            .set(batch.records.len() as i64);
        self.cycle_sentinels
            .with_label_values(&label)
            .set(batch.stats.failed as i64);
        self.cycle_duration_seconds
            .with_label_values(&label)
            .set(elapsed.as_secs_f64());
    }

    pub fn record_sink_success(&self, sink: &str) {
        self.sink_last_success
            .with_label_values(&[sink])
            .set(chrono::Utc::now().timestamp() as f64);
    }
}

//! Fixed-interval drive loop around one [`FleetPoller`].

use crate::cycle::FleetPoller;
use crate::metrics::PollerMetrics;
use ixmon_sink::SinkWriter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, Instant, MissedTickBehavior};

/// Lifecycle of a scheduler: constructed idle, running once driven, stopped
/// after the cancellation signal is observed between cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Stopped,
}

/// Drives a poller on a fixed wall-clock interval forever, handing each
/// completed batch to the configured sinks sequentially.
///
/// The interval is not jitter-corrected: a cycle that overruns the interval
/// makes the next cycle start immediately after it (no overlap, no catch-up
/// burst). Cancellation is cooperative and observed between cycles only, so
/// an in-flight cycle always finishes and no half-populated batch is ever
/// emitted.
pub struct Scheduler {
    poller: FleetPoller,
    sinks: Vec<Arc<dyn SinkWriter>>,
    period: Duration,
    metrics: Arc<PollerMetrics>,
    state: SchedulerState,
}

impl Scheduler {
    pub fn new(
        poller: FleetPoller,
        sinks: Vec<Arc<dyn SinkWriter>>,
        period: Duration,
        metrics: Arc<PollerMetrics>,
    ) -> Self {
        Self {
            poller,
            sinks,
            period,
            metrics,
            state: SchedulerState::Idle,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Runs until `shutdown` flips to `true` (or its sender is dropped).
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        self.state = SchedulerState::Running;
        tracing::info!(
            category = %self.poller.category(),
            period_secs = self.period.as_secs(),
            sinks = self.sinks.len(),
            "Poll scheduler started"
        );

        let mut tick = interval(self.period);
        // A late tick fires immediately and the next one is rescheduled a
        // full period later: back-to-back cycles instead of a burst.
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                biased;
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = tick.tick() => {
                    self.run_once().await;
                }
            }
        }

        self.state = SchedulerState::Stopped;
        tracing::info!(category = %self.poller.category(), "Poll scheduler stopped");
    }

    /// Executes one cycle and fans the batch out to every sink.
    pub async fn run_once(&self) {
        let started = Instant::now();
        let batch = self.poller.run_cycle().await;
        let elapsed = started.elapsed();
        self.metrics
            .observe_cycle(self.poller.category(), &batch, elapsed);

        tracing::info!(
            category = %self.poller.category(),
            success_records = batch.records.len() - batch.stats.failed,
            devices_ok = batch.stats.success,
            devices_failed = batch.stats.failed,
            devices_empty = batch.stats.empty,
            elapsed_ms = elapsed.as_millis() as u64,
            "Poll cycle complete"
        );

        if batch.is_empty() {
            tracing::debug!(category = %self.poller.category(), "No records this cycle, skipping sink writes");
            return;
        }

        for sink in &self.sinks {
            match sink.write_batch(&batch).await {
                Ok(()) => {
                    self.metrics.record_sink_success(sink.name());
                    tracing::debug!(sink = sink.name(), "Batch delivered");
                }
                Err(e) => {
                    // Best-effort delivery: log and keep the loop alive.
                    tracing::error!(
                        sink = sink.name(),
                        category = %self.poller.category(),
                        error = %e,
                        "Sink write failed"
                    );
                }
            }
        }
    }
}

//! Fleet-polling core: per-cycle orchestration, response normalization, and
//! the interval scheduler that drives both.
//!
//! One cycle fans out one fetch task per configured device, isolates each
//! device's failures behind a sentinel record, stamps every record with the
//! same cycle timestamp, and hands the consolidated [`Batch`] to the
//! configured sinks.
//!
//! [`Batch`]: ixmon_common::types::Batch

pub mod cycle;
pub mod metrics;
pub mod normalize;
pub mod scheduler;

pub use cycle::FleetPoller;
pub use metrics::PollerMetrics;
pub use scheduler::{Scheduler, SchedulerState};

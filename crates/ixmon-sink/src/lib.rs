//! Batch sinks: where consolidated poll cycles end up.
//!
//! The poller is agnostic to which sink(s) receive a batch; it fans a frozen
//! [`Batch`] out to every configured [`SinkWriter`] sequentially. Records
//! arrive already normalized, so sinks never re-derive aggregates.

pub mod gauges;
pub mod influx;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use ixmon_common::types::Batch;

pub use gauges::GaugeSink;
pub use influx::InfluxSink;
pub use sqlite::SqliteSink;

/// A destination for one cycle's consolidated batch.
///
/// Implementations are long-lived shared handles, reused sequentially across
/// cycles (cycles never overlap, so concurrent batch writes are not a
/// requirement of this trait).
#[async_trait]
pub trait SinkWriter: Send + Sync {
    /// Sink name used in logs and the last-success metric label.
    fn name(&self) -> &str;

    /// Persists or exports the batch.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store rejects the write; the
    /// scheduler logs it and moves on (no retry within the cycle).
    async fn write_batch(&self, batch: &Batch) -> Result<()>;
}

//! Shared data model for the ixmon fleet poller.
//!
//! Every crate in the workspace speaks in terms of [`types::DeviceRecord`]
//! batches: the poller produces them, the sinks consume them.

pub mod types;

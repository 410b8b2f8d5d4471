//! Larder ingestion pipeline components.
//!
//! This crate provides the core pipeline for accepting uniquely-named recipe
//! records, buffering them durably, and committing them to an authoritative
//! remote dataset in batches.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   Submissions   │  (HTTP handlers, tests, tools)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │   DedupIndex    │  buffered names + staleness-bounded remote snapshot
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │  DurableBuffer  │  fsynced JSONL segments, seals on count/age threshold
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ CommitScheduler │  drains sealed segments to the RemoteStore as batches
//! └─────────────────┘
//! ```
//!
//! The buffer is the source of truth for acknowledged-but-uncommitted
//! records: a submission is acknowledged the moment it is durably buffered,
//! and the remote commit happens asynchronously. Once a batch is confirmed,
//! ownership of its records passes to the remote store and the local
//! segments are deleted.
//!
//! [`IngestPipeline`] assembles the components into a single service object
//! with a start/stop lifecycle.

pub mod buffer;
pub mod config;
pub mod dedupe;
pub mod error;
pub mod remote;
pub mod scheduler;
pub mod service;

// Re-export commonly used types at crate root
pub use error::{Error, Result};

pub use buffer::{
    BufferEntry, BufferStats, CommitBatch, DurableBuffer, EntryHandle, SegmentHandle,
};
pub use config::{BufferConfig, DedupConfig, PipelineConfig, RemoteConfig, SchedulerConfig};
pub use dedupe::{DedupIndex, DedupStats};
pub use remote::{HttpRemoteStore, RemoteStore};
pub use scheduler::{CommitScheduler, FlushOutcome, SchedulerStats};
pub use service::{IngestPipeline, PipelineStats};

//! The assembled ingestion pipeline.
//!
//! [`IngestPipeline`] wires the durable buffer, dedup index, and commit
//! scheduler into one explicitly constructed service object with a defined
//! start/stop lifecycle. Nothing here is process-global: multiple pipelines
//! (e.g., in tests) coexist without shared state.
//!
//! # Submission Path
//!
//! ```text
//! submit(recipe)
//!   validate ── reject invalid fields
//!   ensure_fresh ── remote snapshot refresh if stale (outside the lock)
//!   ┌─ submit lock ────────────────────┐
//!   │ exists?  ── reject DuplicateName │
//!   │ append   ── fail WriteFailure    │
//!   │ register                         │
//!   └──────────────────────────────────┘
//!   acknowledge (remote commit happens asynchronously)
//! ```
//!
//! The lock makes check → append → register atomic with respect to other
//! submissions, so two concurrent submissions of the same name can never
//! both pass the check. It is never held across a network call.

use crate::buffer::{BufferEntry, BufferStats, DurableBuffer, EntryHandle, SegmentHandle};
use crate::config::PipelineConfig;
use crate::dedupe::{DedupIndex, DedupStats};
use crate::error::{Error, Result};
use crate::remote::RemoteStore;
use crate::scheduler::{CommitScheduler, FlushOutcome, SchedulerStats};
use larder_core::Recipe;
use metrics::counter;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// The ingestion pipeline: buffer, dedup index, and commit scheduler.
pub struct IngestPipeline {
    buffer: Arc<DurableBuffer>,
    dedupe: Arc<DedupIndex>,
    scheduler: Arc<CommitScheduler>,
    /// Guards the check-append-register sequence. Plain mutex: the critical
    /// section does no I/O beyond the buffer's own synced append.
    submit_lock: Mutex<()>,
    seal_rx: Mutex<Option<UnboundedReceiver<SegmentHandle>>>,
    scheduler_task: Mutex<Option<JoinHandle<()>>>,
}

impl IngestPipeline {
    /// Open the pipeline, recovering buffered state from a previous run.
    ///
    /// Names found in the recovered buffer are registered with the dedup
    /// index so duplicates are rejected across restarts.
    pub fn open(config: PipelineConfig, store: Arc<dyn RemoteStore>) -> Result<Self> {
        let (seal_tx, seal_rx) = tokio::sync::mpsc::unbounded_channel();

        let buffer = Arc::new(DurableBuffer::open(config.buffer, Some(seal_tx))?);
        let dedupe = Arc::new(DedupIndex::new(config.dedup, Arc::clone(&store)));
        dedupe.seed(
            buffer
                .active_snapshot()
                .into_iter()
                .map(|e| e.recipe.name),
        );

        let scheduler = Arc::new(CommitScheduler::new(
            config.scheduler,
            Arc::clone(&buffer),
            Arc::clone(&dedupe),
            store,
        ));

        Ok(Self {
            buffer,
            dedupe,
            scheduler,
            submit_lock: Mutex::new(()),
            seal_rx: Mutex::new(Some(seal_rx)),
            scheduler_task: Mutex::new(None),
        })
    }

    /// Start the background commit scheduler.
    ///
    /// Calling `start` more than once is a no-op.
    pub fn start(&self) {
        let Some(seal_rx) = self.seal_rx.lock().take() else {
            warn!("Pipeline already started");
            return;
        };
        let handle = self.scheduler.start(seal_rx);
        *self.scheduler_task.lock() = Some(handle);
        info!("Ingestion pipeline started");
    }

    /// Stop the scheduler and attempt one final flush.
    ///
    /// Records that cannot be flushed stay durably buffered for the next
    /// run; shutdown never loses acknowledged submissions.
    pub async fn stop(&self) {
        self.scheduler.stop();
        let task = self.scheduler_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Scheduler task failed during shutdown: {}", e);
            }
        }

        match self.scheduler.flush_once().await {
            Ok(FlushOutcome::Committed(n)) => {
                info!("Final flush committed {} entries", n);
            }
            Ok(FlushOutcome::Idle) => {}
            Err(e) => {
                warn!(
                    "Final flush failed, entries remain buffered for next run: {}",
                    e
                );
            }
        }
        info!("Ingestion pipeline stopped");
    }

    /// Submit a recipe for ingestion.
    ///
    /// On success the record is durably buffered and acknowledged; the
    /// remote commit happens asynchronously.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRecipe`] - field validation failed
    /// - [`Error::DuplicateName`] - the name exists remotely or is buffered
    /// - [`Error::WriteFailure`] - local storage fault; not acknowledged
    /// - [`Error::StoreUnavailable`] - the remote view is too stale to
    ///   answer safely and could not be refreshed
    pub async fn submit(&self, recipe: Recipe) -> Result<EntryHandle> {
        recipe.validate().map_err(Error::InvalidRecipe)?;

        // May hit the network; must happen before the submit lock.
        self.dedupe.ensure_fresh().await?;

        let _guard = self.submit_lock.lock();

        if self.dedupe.exists(&recipe.name) {
            counter!("submit_duplicate_total").increment(1);
            return Err(Error::DuplicateName { name: recipe.name });
        }

        let name = recipe.name.clone();
        let handle = match self.buffer.append(recipe) {
            Ok(handle) => handle,
            Err(e) => {
                counter!("submit_failed_total").increment(1);
                return Err(e);
            }
        };
        self.dedupe.register(&name);

        counter!("submit_accepted_total").increment(1);
        debug!(
            "Accepted '{}' into segment {} at sequence {}",
            name, handle.segment.0, handle.sequence
        );
        Ok(handle)
    }

    /// Force a flush cycle outside the scheduler's cadence.
    pub async fn flush(&self) -> Result<FlushOutcome> {
        self.scheduler.flush_once().await
    }

    /// Point-in-time snapshot of all buffered entries.
    pub fn buffered(&self) -> Vec<BufferEntry> {
        self.buffer.active_snapshot()
    }

    /// Get statistics about all pipeline components.
    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            buffer: self.buffer.stats(),
            dedupe: self.dedupe.stats(),
            scheduler: self.scheduler.stats(),
        }
    }
}

/// Combined statistics from the pipeline components.
#[derive(Debug, Clone)]
pub struct PipelineStats {
    /// Durable buffer statistics.
    pub buffer: BufferStats,
    /// Dedup index statistics.
    pub dedupe: DedupStats,
    /// Commit scheduler statistics.
    pub scheduler: SchedulerStats,
}

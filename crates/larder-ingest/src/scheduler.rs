//! Background commit scheduler.
//!
//! This module provides the [`CommitScheduler`] which periodically drains the
//! durable buffer into the remote store. Each cycle seals the active segment,
//! builds one [`CommitBatch`](crate::buffer::CommitBatch) from every pending
//! sealed segment (oldest first), and submits it as a single all-or-nothing
//! operation.
//!
//! # Failure Semantics
//!
//! A commit failure is never fatal and never reaches submitters: their
//! records are already durably buffered. On `StoreUnavailable` the sealed
//! segments stay exactly where they are and the next attempt resubmits the
//! same batch, with exponential backoff up to a configured ceiling. On
//! `CommitRejected` the segments are likewise retained (for operator
//! inspection, never silently dropped) and retries continue at the ceiling
//! rate. The scheduler is the sole owner of segment lifecycle past sealing,
//! so repeating a retry with the same segment set is always safe.

use crate::buffer::{DurableBuffer, SegmentHandle};
use crate::config::SchedulerConfig;
use crate::dedupe::DedupIndex;
use crate::error::{Error, Result};
use crate::remote::RemoteStore;
use metrics::{counter, histogram};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Outcome of a single flush cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was pending.
    Idle,
    /// A batch with this many entries was committed.
    Committed(usize),
}

/// Periodically moves sealed buffer segments into the remote store.
pub struct CommitScheduler {
    config: SchedulerConfig,
    buffer: Arc<DurableBuffer>,
    dedupe: Arc<DedupIndex>,
    store: Arc<dyn RemoteStore>,
    running: AtomicBool,
    stop_notify: Notify,
    batches_committed: AtomicUsize,
    entries_committed: AtomicUsize,
    consecutive_failures: AtomicU32,
}

impl CommitScheduler {
    /// Create a scheduler over the given buffer, index, and store.
    pub fn new(
        config: SchedulerConfig,
        buffer: Arc<DurableBuffer>,
        dedupe: Arc<DedupIndex>,
        store: Arc<dyn RemoteStore>,
    ) -> Self {
        Self {
            config,
            buffer,
            dedupe,
            store,
            running: AtomicBool::new(false),
            stop_notify: Notify::new(),
            batches_committed: AtomicUsize::new(0),
            entries_committed: AtomicUsize::new(0),
            consecutive_failures: AtomicU32::new(0),
        }
    }

    /// Start the scheduler loop as a background task.
    ///
    /// `seal_rx` receives the buffer's seal notifications, so a segment
    /// sealed by the size threshold triggers a flush ahead of the next tick.
    pub fn start(
        self: &Arc<Self>,
        seal_rx: UnboundedReceiver<SegmentHandle>,
    ) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            scheduler.run(seal_rx).await;
        })
    }

    /// Signal the loop to stop after its current cycle.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.stop_notify.notify_waiters();
    }

    async fn run(&self, mut seal_rx: UnboundedReceiver<SegmentHandle>) {
        info!(
            "Commit scheduler started (interval: {:?}, backoff ceiling: {:?})",
            self.config.flush_interval, self.config.backoff_ceiling
        );

        let mut delay = self.config.flush_interval;
        let mut channel_open = true;

        while self.running.load(Ordering::SeqCst) {
            let backing_off = self.consecutive_failures.load(Ordering::SeqCst) > 0;
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.stop_notify.notified() => {}
                notified = seal_rx.recv(), if channel_open && !backing_off => {
                    match notified {
                        Some(handle) => {
                            debug!("Early flush: segment {} sealed", handle.0)
                        }
                        None => channel_open = false,
                    }
                }
            }
            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            match self.flush_once().await {
                Ok(FlushOutcome::Idle) | Ok(FlushOutcome::Committed(_)) => {
                    self.consecutive_failures.store(0, Ordering::SeqCst);
                    delay = self.config.flush_interval;
                }
                Err(Error::CommitRejected(reason)) => {
                    counter!("commit_failures_total", "kind" => "rejected").increment(1);
                    self.consecutive_failures.fetch_add(1, Ordering::SeqCst);
                    error!(
                        "Remote store rejected commit batch, segments retained \
                         for inspection: {}",
                        reason
                    );
                    delay = self.config.backoff_ceiling;
                }
                Err(e) => {
                    counter!("commit_failures_total", "kind" => "unavailable").increment(1);
                    let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                    delay = backoff_delay(
                        self.config.flush_interval,
                        self.config.backoff_ceiling,
                        failures,
                    );
                    warn!(
                        "Commit attempt failed ({} consecutive), retrying in {:?}: {}",
                        failures, delay, e
                    );
                }
            }

            // Seal notifications for segments this cycle already covered
            // must not trigger an immediate re-flush.
            while seal_rx.try_recv().is_ok() {}
        }

        info!("Commit scheduler stopped");
    }

    /// Run one seal-and-commit cycle.
    ///
    /// Exposed so the pipeline can force a final flush during shutdown.
    pub async fn flush_once(&self) -> Result<FlushOutcome> {
        self.buffer.seal_active_segment()?;

        let Some(batch) = self.buffer.take_batch() else {
            return Ok(FlushOutcome::Idle);
        };

        debug!(
            "Committing batch: {} entries from {} segments",
            batch.entries.len(),
            batch.segments.len()
        );

        let started = Instant::now();
        self.store.commit_batch(&batch).await?;
        histogram!("commit_duration_seconds").record(started.elapsed().as_secs_f64());

        let entry_count = batch.entries.len();
        counter!("commit_batches_total").increment(1);
        counter!("commit_entries_total").increment(entry_count as u64);
        self.batches_committed.fetch_add(1, Ordering::Relaxed);
        self.entries_committed
            .fetch_add(entry_count, Ordering::Relaxed);

        // Ownership of the data has passed to the remote store. Fold the
        // names into the snapshot first so they stay visible while the local
        // copies disappear.
        let names = batch.names();
        self.dedupe.note_committed(names.iter().map(String::as_str));

        for segment in &batch.segments {
            if let Err(e) = self.buffer.delete_segment(*segment) {
                // The leftover segment will be resubmitted next cycle; the
                // store tolerates the replay.
                warn!("Failed to delete committed segment {}: {}", segment.0, e);
            }
        }
        self.dedupe.retire(names.iter().map(String::as_str));

        if let Err(e) = self.dedupe.refresh().await {
            warn!("Post-commit snapshot refresh failed: {}", e);
        }

        info!(
            "Committed batch: {} entries from {} segments",
            entry_count,
            batch.segments.len()
        );
        Ok(FlushOutcome::Committed(entry_count))
    }

    /// Get statistics about the scheduler.
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            batches_committed: self.batches_committed.load(Ordering::Relaxed),
            entries_committed: self.entries_committed.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            is_running: self.running.load(Ordering::Relaxed),
        }
    }
}

/// Exponential backoff: interval doubled per failure, capped at the ceiling.
fn backoff_delay(base: Duration, ceiling: Duration, failures: u32) -> Duration {
    let shift = failures.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << shift).min(ceiling)
}

/// Statistics about the commit scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerStats {
    /// Batches durably accepted by the remote store.
    pub batches_committed: usize,

    /// Entries committed across those batches.
    pub entries_committed: usize,

    /// Failed attempts since the last success.
    pub consecutive_failures: u32,

    /// Whether the background loop is running.
    pub is_running: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BufferConfig, DedupConfig};
    use crate::remote::mock::{Fault, MockRemoteStore};
    use larder_core::Recipe;
    use tempfile::TempDir;

    fn test_recipe(name: &str) -> Recipe {
        Recipe {
            name: name.to_string(),
            ingredients: vec!["salt".to_string()],
            instructions: "mix".to_string(),
            created_at: None,
            creator: None,
        }
    }

    fn harness(tmp: &TempDir) -> (Arc<DurableBuffer>, Arc<DedupIndex>, Arc<MockRemoteStore>) {
        let buffer = Arc::new(
            DurableBuffer::open(
                BufferConfig {
                    data_dir: tmp.path().to_path_buf(),
                    ..Default::default()
                },
                None,
            )
            .unwrap(),
        );
        let store = Arc::new(MockRemoteStore::new());
        let dedupe = Arc::new(DedupIndex::new(
            DedupConfig::default(),
            Arc::clone(&store) as Arc<dyn RemoteStore>,
        ));
        (buffer, dedupe, store)
    }

    fn scheduler_over(
        buffer: &Arc<DurableBuffer>,
        dedupe: &Arc<DedupIndex>,
        store: &Arc<MockRemoteStore>,
    ) -> CommitScheduler {
        CommitScheduler::new(
            SchedulerConfig::default(),
            Arc::clone(buffer),
            Arc::clone(dedupe),
            Arc::clone(store) as Arc<dyn RemoteStore>,
        )
    }

    #[tokio::test]
    async fn test_flush_idle() {
        let tmp = TempDir::new().unwrap();
        let (buffer, dedupe, store) = harness(&tmp);
        let scheduler = scheduler_over(&buffer, &dedupe, &store);

        assert_eq!(scheduler.flush_once().await.unwrap(), FlushOutcome::Idle);
        assert_eq!(store.commit_calls(), 0);
    }

    #[tokio::test]
    async fn test_flush_commits_and_retires() {
        let tmp = TempDir::new().unwrap();
        let (buffer, dedupe, store) = harness(&tmp);
        let scheduler = scheduler_over(&buffer, &dedupe, &store);

        buffer.append(test_recipe("Pasta")).unwrap();
        dedupe.register("Pasta");
        buffer.append(test_recipe("Soup")).unwrap();
        dedupe.register("Soup");

        let outcome = scheduler.flush_once().await.unwrap();
        assert_eq!(outcome, FlushOutcome::Committed(2));

        // Remote has the names, local buffer is drained
        assert!(store.names().contains("Pasta"));
        assert!(store.names().contains("Soup"));
        assert_eq!(buffer.stats().pending_segments, 0);
        assert!(buffer.active_snapshot().is_empty());

        // Names remain visible through the refreshed snapshot
        assert!(dedupe.exists("Pasta"));
        assert_eq!(dedupe.stats().registered_names, 0);
    }

    #[tokio::test]
    async fn test_flush_failure_keeps_segments_intact() {
        let tmp = TempDir::new().unwrap();
        let (buffer, dedupe, store) = harness(&tmp);
        let scheduler = scheduler_over(&buffer, &dedupe, &store);

        buffer.append(test_recipe("Pasta")).unwrap();

        store.fail_next_commit(Fault::Unavailable);
        let err = scheduler.flush_once().await.unwrap_err();
        assert!(matches!(err, Error::StoreUnavailable(_)));

        // Sealed segments remain in place, untouched
        assert_eq!(buffer.stats().pending_segments, 1);
        assert!(store.batches().is_empty());

        // The retry resubmits the identical batch
        let outcome = scheduler.flush_once().await.unwrap();
        assert_eq!(outcome, FlushOutcome::Committed(1));
        assert_eq!(store.batches(), vec![vec!["Pasta"]]);
        assert_eq!(buffer.stats().pending_segments, 0);
    }

    #[tokio::test]
    async fn test_rejected_batch_retained() {
        let tmp = TempDir::new().unwrap();
        let (buffer, dedupe, store) = harness(&tmp);
        let scheduler = scheduler_over(&buffer, &dedupe, &store);

        buffer.append(test_recipe("Pasta")).unwrap();

        store.fail_next_commit(Fault::Rejected);
        let err = scheduler.flush_once().await.unwrap_err();
        assert!(matches!(err, Error::CommitRejected(_)));
        assert_eq!(buffer.stats().pending_segments, 1);
    }

    #[tokio::test]
    async fn test_accumulated_segments_flush_oldest_first() {
        let tmp = TempDir::new().unwrap();
        let (buffer, dedupe, store) = harness(&tmp);
        let scheduler = scheduler_over(&buffer, &dedupe, &store);

        buffer.append(test_recipe("a")).unwrap();
        store.fail_next_commit(Fault::Unavailable);
        scheduler.flush_once().await.unwrap_err();

        // More submissions land in a new segment while the old one waits
        buffer.append(test_recipe("b")).unwrap();

        let outcome = scheduler.flush_once().await.unwrap();
        assert_eq!(outcome, FlushOutcome::Committed(2));
        assert_eq!(store.batches(), vec![vec!["a", "b"]]);
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let tmp = TempDir::new().unwrap();
        let (buffer, dedupe, store) = harness(&tmp);
        let scheduler = Arc::new(CommitScheduler::new(
            SchedulerConfig {
                flush_interval: Duration::from_millis(20),
                ..Default::default()
            },
            Arc::clone(&buffer),
            Arc::clone(&dedupe),
            Arc::clone(&store) as Arc<dyn RemoteStore>,
        ));

        let (_tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = scheduler.start(rx);

        buffer.append(test_recipe("Pasta")).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(store.names().contains("Pasta"));
        assert!(scheduler.stats().is_running);

        scheduler.stop();
        handle.await.unwrap();
        assert!(!scheduler.stats().is_running);
    }

    #[test]
    fn test_backoff_doubles_to_ceiling() {
        let base = Duration::from_secs(30);
        let ceiling = Duration::from_secs(600);
        assert_eq!(backoff_delay(base, ceiling, 1), Duration::from_secs(30));
        assert_eq!(backoff_delay(base, ceiling, 2), Duration::from_secs(60));
        assert_eq!(backoff_delay(base, ceiling, 3), Duration::from_secs(120));
        assert_eq!(backoff_delay(base, ceiling, 10), ceiling);
        assert_eq!(backoff_delay(base, ceiling, 40), ceiling);
    }
}

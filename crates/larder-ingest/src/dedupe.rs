//! Name deduplication over the buffer and the remote store.
//!
//! This module provides the [`DedupIndex`] which decides whether a candidate
//! name is already taken, either by a record committed remotely or by one
//! buffered locally awaiting commit.
//!
//! # Freshness Model
//!
//! The remote side is consulted through a [`RemoteSnapshot`]: a cached name
//! set that may be stale by at most the configured staleness window. A stale
//! snapshot is refreshed by re-querying the store, never by assuming
//! freshness. When the store cannot be reached, the stale snapshot is still
//! trusted for a bounded grace period; beyond that, dedup checks fail with
//! `StoreUnavailable` rather than risk a false negative that lets a
//! duplicate through.
//!
//! The local side is a registered-name set maintained by the submission
//! path: [`register`](DedupIndex::register) makes a freshly-buffered name
//! visible immediately, without waiting for a remote round trip, and
//! [`retire`](DedupIndex::retire) releases it once its batch is committed
//! (at which point [`note_committed`](DedupIndex::note_committed) has already
//! moved it into the snapshot).

use crate::config::DedupConfig;
use crate::error::Result;
use crate::remote::RemoteStore;
use metrics::{counter, gauge};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// A cached, staleness-bounded view of the names known to the remote store.
struct RemoteSnapshot {
    names: HashSet<String>,
    refreshed_at: Instant,
}

/// Dedup oracle over the local buffer and the remote dataset.
///
/// Thread-safe; shared via `Arc`. Network refreshes are single-flight and
/// never run while a lock on the name sets is held.
pub struct DedupIndex {
    config: DedupConfig,
    store: Arc<dyn RemoteStore>,
    /// Names accepted into the buffer and not yet committed.
    registered: RwLock<HashSet<String>>,
    snapshot: RwLock<Option<RemoteSnapshot>>,
    /// Serializes refresh attempts so concurrent submissions trigger at most
    /// one network round trip.
    refresh_gate: tokio::sync::Mutex<()>,
}

impl DedupIndex {
    /// Create an index with an empty snapshot.
    pub fn new(config: DedupConfig, store: Arc<dyn RemoteStore>) -> Self {
        Self {
            config,
            store,
            registered: RwLock::new(HashSet::new()),
            snapshot: RwLock::new(None),
            refresh_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Bulk-register names recovered from the buffer at startup.
    pub fn seed<I: IntoIterator<Item = String>>(&self, names: I) {
        let mut registered = self.registered.write();
        for name in names {
            registered.insert(name);
        }
        debug!("Dedup index seeded with {} buffered names", registered.len());
    }

    /// Whether `name` is known, locally buffered or in the remote snapshot.
    ///
    /// Purely local; callers that need a freshness guarantee run
    /// [`ensure_fresh`](Self::ensure_fresh) first (outside any submission
    /// lock, since it may hit the network).
    pub fn exists(&self, name: &str) -> bool {
        if self.registered.read().contains(name) {
            return true;
        }
        self.snapshot
            .read()
            .as_ref()
            .is_some_and(|s| s.names.contains(name))
    }

    /// Make a name visible to subsequent [`exists`](Self::exists) calls.
    ///
    /// Called by the submission path immediately after a successful buffer
    /// append.
    pub fn register(&self, name: &str) {
        self.registered.write().insert(name.to_string());
    }

    /// Release names whose batch has been committed.
    pub fn retire<'a, I: IntoIterator<Item = &'a str>>(&self, names: I) {
        let mut registered = self.registered.write();
        for name in names {
            registered.remove(name);
        }
    }

    /// Fold freshly-committed names into the snapshot.
    ///
    /// Called by the scheduler on commit success, before the committed
    /// segments are deleted and retired, so the names never vanish from view
    /// between deletion and the next refresh.
    pub fn note_committed<'a, I: IntoIterator<Item = &'a str>>(&self, names: I) {
        let mut snapshot = self.snapshot.write();
        if let Some(snapshot) = snapshot.as_mut() {
            for name in names {
                snapshot.names.insert(name.to_string());
            }
        }
        // With no snapshot yet, the next ensure_fresh must query the store,
        // which already lists the committed names.
    }

    /// Ensure the remote snapshot is usable for a dedup decision.
    ///
    /// Refreshes when the snapshot is missing or older than the staleness
    /// window. A refresh failure degrades to the existing snapshot while it
    /// is within staleness + grace; beyond that the error propagates.
    pub async fn ensure_fresh(&self) -> Result<()> {
        if self.is_fresh() {
            return Ok(());
        }

        let _gate = self.refresh_gate.lock().await;
        // Another submission may have refreshed while we waited.
        if self.is_fresh() {
            return Ok(());
        }

        match self.store.list_names().await {
            Ok(names) => {
                counter!("snapshot_refresh_total").increment(1);
                gauge!("snapshot_names").set(names.len() as f64);
                debug!("Remote snapshot refreshed: {} names", names.len());
                *self.snapshot.write() = Some(RemoteSnapshot {
                    names,
                    refreshed_at: Instant::now(),
                });
                Ok(())
            }
            Err(e) => {
                counter!("snapshot_refresh_failures_total").increment(1);
                let within_grace = self.snapshot.read().as_ref().is_some_and(|s| {
                    s.refreshed_at.elapsed()
                        <= self.config.staleness_window + self.config.grace_period
                });
                if within_grace {
                    warn!(
                        "Remote snapshot refresh failed, trusting stale snapshot \
                         within grace period: {}",
                        e
                    );
                    Ok(())
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Refresh the snapshot now, regardless of staleness.
    ///
    /// Used by the scheduler after a commit to reconcile with the authority.
    pub async fn refresh(&self) -> Result<()> {
        let _gate = self.refresh_gate.lock().await;
        let names = self.store.list_names().await?;
        counter!("snapshot_refresh_total").increment(1);
        gauge!("snapshot_names").set(names.len() as f64);
        *self.snapshot.write() = Some(RemoteSnapshot {
            names,
            refreshed_at: Instant::now(),
        });
        Ok(())
    }

    fn is_fresh(&self) -> bool {
        self.snapshot
            .read()
            .as_ref()
            .is_some_and(|s| s.refreshed_at.elapsed() < self.config.staleness_window)
    }

    /// Get statistics about the index.
    pub fn stats(&self) -> DedupStats {
        let snapshot = self.snapshot.read();
        DedupStats {
            registered_names: self.registered.read().len(),
            snapshot_names: snapshot.as_ref().map(|s| s.names.len()),
            snapshot_age: snapshot.as_ref().map(|s| s.refreshed_at.elapsed()),
        }
    }
}

/// Statistics about the dedup index.
#[derive(Debug, Clone)]
pub struct DedupStats {
    /// Locally-buffered names currently registered.
    pub registered_names: usize,

    /// Size of the remote snapshot, if one has been fetched.
    pub snapshot_names: Option<usize>,

    /// Age of the remote snapshot, if one has been fetched.
    pub snapshot_age: Option<std::time::Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::remote::mock::{Fault, MockRemoteStore};
    use std::time::Duration;

    fn index_with(
        store: Arc<MockRemoteStore>,
        staleness: Duration,
        grace: Duration,
    ) -> DedupIndex {
        DedupIndex::new(
            DedupConfig {
                staleness_window: staleness,
                grace_period: grace,
            },
            store,
        )
    }

    #[test]
    fn test_register_and_exists() {
        let index = index_with(
            Arc::new(MockRemoteStore::new()),
            Duration::from_secs(60),
            Duration::from_secs(60),
        );

        assert!(!index.exists("Pasta"));
        index.register("Pasta");
        assert!(index.exists("Pasta"));

        index.retire(["Pasta"]);
        assert!(!index.exists("Pasta"));
    }

    #[tokio::test]
    async fn test_remote_names_visible_after_refresh() {
        let store = Arc::new(MockRemoteStore::with_names(["Pasta".to_string()]));
        let index = index_with(store, Duration::from_secs(60), Duration::from_secs(60));

        // Not visible until the snapshot is fetched
        assert!(!index.exists("Pasta"));
        index.ensure_fresh().await.unwrap();
        assert!(index.exists("Pasta"));
    }

    #[tokio::test]
    async fn test_fresh_snapshot_skips_network() {
        let store = Arc::new(MockRemoteStore::new());
        let index = index_with(
            Arc::clone(&store),
            Duration::from_secs(60),
            Duration::from_secs(60),
        );

        index.ensure_fresh().await.unwrap();
        index.ensure_fresh().await.unwrap();
        assert_eq!(store.list_calls(), 1);
    }

    #[tokio::test]
    async fn test_stale_snapshot_refreshes() {
        let store = Arc::new(MockRemoteStore::new());
        let index = index_with(
            Arc::clone(&store),
            Duration::ZERO,
            Duration::from_secs(60),
        );

        index.ensure_fresh().await.unwrap();
        index.ensure_fresh().await.unwrap();
        assert_eq!(store.list_calls(), 2);
    }

    #[tokio::test]
    async fn test_refresh_failure_within_grace_degrades() {
        let store = Arc::new(MockRemoteStore::with_names(["Pasta".to_string()]));
        let index = index_with(
            Arc::clone(&store),
            Duration::ZERO,
            Duration::from_secs(60),
        );

        index.ensure_fresh().await.unwrap();

        // Snapshot is instantly stale; the failed refresh degrades to it
        store.fail_next_list(Fault::Unavailable);
        index.ensure_fresh().await.unwrap();
        assert!(index.exists("Pasta"));
    }

    #[tokio::test]
    async fn test_refresh_failure_beyond_grace_fails() {
        let store = Arc::new(MockRemoteStore::new());
        let index = index_with(Arc::clone(&store), Duration::ZERO, Duration::ZERO);

        index.ensure_fresh().await.unwrap();

        store.fail_next_list(Fault::Unavailable);
        let err = index.ensure_fresh().await.unwrap_err();
        assert!(matches!(err, Error::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn test_refresh_failure_with_no_snapshot_fails() {
        let store = Arc::new(MockRemoteStore::new());
        let index = index_with(
            Arc::clone(&store),
            Duration::from_secs(60),
            Duration::from_secs(60),
        );

        store.fail_next_list(Fault::Unavailable);
        let err = index.ensure_fresh().await.unwrap_err();
        assert!(matches!(err, Error::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn test_note_committed_bridges_refresh_gap() {
        let store = Arc::new(MockRemoteStore::new());
        let index = index_with(
            Arc::clone(&store),
            Duration::from_secs(60),
            Duration::from_secs(60),
        );

        index.ensure_fresh().await.unwrap();
        index.register("Pasta");

        // Commit flow: snapshot learns the name before it is retired
        index.note_committed(["Pasta"]);
        index.retire(["Pasta"]);

        // Snapshot is still fresh, so no refresh happens, yet the name holds
        index.ensure_fresh().await.unwrap();
        assert!(index.exists("Pasta"));
        assert_eq!(store.list_calls(), 1);
    }
}

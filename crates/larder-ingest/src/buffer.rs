//! Durable buffer of accepted-but-uncommitted recipes.
//!
//! This module provides the [`DurableBuffer`] which appends accepted records
//! to segment files and handles sealing/rotation. No acknowledged submission
//! may be lost across a process crash: every append is synced to stable
//! storage before it returns.
//!
//! # Segment Format
//!
//! Each segment file is JSON Lines, one [`BufferEntry`] per line:
//! ```text
//! {"recipe":{...},"sequence":0,"accepted_at":"..."}
//! {"recipe":{...},"sequence":1,"accepted_at":"..."}
//! ...
//! ```
//!
//! Entries are independently parsable, so a crash mid-write corrupts at most
//! the trailing line, which recovery detects and drops.
//!
//! # Sealing
//!
//! Exactly one segment is active (open for appends) at a time. The active
//! segment seals itself when its entry count or age exceeds the configured
//! thresholds; the commit scheduler also seals it at every flush. On seal the
//! file is renamed from `.jsonl` to `.sealed.jsonl` and the segment becomes
//! immutable, pending commit. Sealed segments are deleted only after the
//! remote store confirms the batch that contained them.

use crate::config::BufferConfig;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use larder_core::Recipe;
use metrics::{counter, gauge};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

/// Identifies a sealed segment for commit and deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SegmentHandle(pub u64);

/// Position of an accepted entry within the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryHandle {
    /// The segment the entry was appended to.
    pub segment: SegmentHandle,
    /// Position within that segment.
    pub sequence: u64,
}

/// A buffered recipe plus its buffer-local metadata.
///
/// Owned exclusively by the buffer; exposed only as snapshot/commit data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferEntry {
    /// The accepted record.
    pub recipe: Recipe,

    /// Position within the segment. Fixed once appended.
    pub sequence: u64,

    /// When the buffer accepted the record.
    pub accepted_at: DateTime<Utc>,
}

/// An ordered batch of entries drawn from sealed segments, committed to the
/// remote store as a single all-or-nothing operation.
#[derive(Debug, Clone)]
pub struct CommitBatch {
    /// Entries in commit order: oldest segment first, sequence order within.
    pub entries: Vec<BufferEntry>,

    /// The sealed segments the batch was drawn from, oldest first.
    pub segments: Vec<SegmentHandle>,
}

impl CommitBatch {
    /// Names carried by this batch, in entry order.
    pub fn names(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|e| e.recipe.name.clone())
            .collect()
    }
}

/// The segment currently open for appends.
struct ActiveSegment {
    file: File,
    path: PathBuf,
    number: u64,
    opened_at: Instant,
    entries: Vec<BufferEntry>,
}

/// A sealed segment awaiting commit.
struct SealedSegment {
    path: PathBuf,
    entries: Vec<BufferEntry>,
}

/// Mutable buffer state, guarded by one lock.
struct BufferState {
    active: Option<ActiveSegment>,
    sealed: BTreeMap<u64, SealedSegment>,
    next_segment: u64,
}

/// Durable, append-only buffer of accepted records.
///
/// Thread-safe: uses internal locking for writes.
pub struct DurableBuffer {
    config: BufferConfig,
    state: Mutex<BufferState>,
    total_entries: AtomicUsize,
    total_sealed: AtomicUsize,
    seal_tx: Option<UnboundedSender<SegmentHandle>>,
}

impl DurableBuffer {
    /// Open the buffer, recovering any segments left by a previous process.
    ///
    /// Segment files already on disk are re-read (sealed files stay sealed;
    /// a leftover active file is adopted as sealed, since appends to it can
    /// no longer be ordered against the crash). Numbering resumes after the
    /// highest segment found.
    ///
    /// # Arguments
    ///
    /// * `config` - Buffer configuration
    /// * `seal_tx` - Optional channel notified whenever a segment seals
    pub fn open(
        config: BufferConfig,
        seal_tx: Option<UnboundedSender<SegmentHandle>>,
    ) -> Result<Self> {
        fs::create_dir_all(&config.data_dir)?;

        let (sealed, next_segment) = Self::recover_segments(&config)?;

        let recovered_entries: usize = sealed.values().map(|s| s.entries.len()).sum();
        info!(
            "Buffer opened: dir={}, {} pending segments, {} pending entries, next segment {}",
            config.data_dir.display(),
            sealed.len(),
            recovered_entries,
            next_segment
        );

        let buffer = Self {
            config,
            state: Mutex::new(BufferState {
                active: None,
                sealed,
                next_segment,
            }),
            total_entries: AtomicUsize::new(0),
            total_sealed: AtomicUsize::new(0),
            seal_tx,
        };
        buffer.update_gauges(&buffer.state.lock());
        Ok(buffer)
    }

    /// Scan the data directory for existing segment files.
    ///
    /// Returns the recovered sealed segments and the next segment number to
    /// use (one past the highest seen; 0 when the directory is empty).
    fn recover_segments(config: &BufferConfig) -> Result<(BTreeMap<u64, SealedSegment>, u64)> {
        let mut sealed = BTreeMap::new();
        let mut max_number: Option<u64> = None;

        for entry in fs::read_dir(&config.data_dir)? {
            let entry = entry?;
            let path = entry.path();
            let name = entry.file_name();
            let name_str = name.to_string_lossy();

            let Some(rest) = name_str.strip_prefix(&format!("{}-", config.segment_prefix)) else {
                continue;
            };

            // segment-NNNNNNNNN.sealed.jsonl or segment-NNNNNNNNN.jsonl
            let (num_str, was_active) = match rest.strip_suffix(".sealed.jsonl") {
                Some(n) => (n, false),
                None => match rest.strip_suffix(".jsonl") {
                    Some(n) => (n, true),
                    None => continue,
                },
            };

            let Ok(number) = num_str.parse::<u64>() else {
                warn!("Ignoring segment file with unparsable number: {}", name_str);
                continue;
            };
            max_number = Some(max_number.map_or(number, |m| m.max(number)));

            let entries = Self::read_segment_file(&path)?;
            if entries.is_empty() {
                debug!("Removing empty segment file {}", path.display());
                fs::remove_file(&path)?;
                continue;
            }

            // A leftover active file predates the restart; no further appends
            // can go to it, so it joins the sealed set.
            let final_path = if was_active {
                let sealed_path = path.with_extension("sealed.jsonl");
                fs::rename(&path, &sealed_path)?;
                info!(
                    "Adopted leftover active segment {} as sealed ({} entries)",
                    number,
                    entries.len()
                );
                sealed_path
            } else {
                path
            };

            sealed.insert(
                number,
                SealedSegment {
                    path: final_path,
                    entries,
                },
            );
        }

        Ok((sealed, max_number.map_or(0, |m| m + 1)))
    }

    /// Read a segment file, dropping a torn trailing line if present.
    ///
    /// A parse failure on the last line is the expected signature of a crash
    /// mid-write and is dropped with a warning. A parse failure anywhere else
    /// is logged and skipped rather than treated as fatal.
    fn read_segment_file(path: &Path) -> Result<Vec<BufferEntry>> {
        let contents = fs::read_to_string(path)?;
        let lines: Vec<&str> = contents.lines().collect();
        let mut entries = Vec::with_capacity(lines.len());

        for (idx, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<BufferEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(e) if idx == lines.len() - 1 => {
                    warn!(
                        "Dropping torn trailing entry in {}: {}",
                        path.display(),
                        e
                    );
                }
                Err(e) => {
                    warn!(
                        "Skipping unparsable entry at {}:{}: {}",
                        path.display(),
                        idx + 1,
                        e
                    );
                }
            }
        }

        Ok(entries)
    }

    /// Path of the active file for a segment number.
    ///
    /// 9-digit zero-padded numbering keeps directory listings in
    /// lexicographic = commit order.
    fn segment_path(&self, number: u64) -> PathBuf {
        self.config
            .data_dir
            .join(format!("{}-{:09}.jsonl", self.config.segment_prefix, number))
    }

    /// Append a record, persisting it to stable storage before returning.
    ///
    /// Seals the active segment first when the rotation policy (entry count
    /// or age) is exceeded, so a burst of submissions cannot grow one segment
    /// unboundedly between scheduled flushes.
    ///
    /// # Errors
    ///
    /// [`Error::WriteFailure`] if the underlying write or sync does not
    /// complete; the submission must then be reported as failed, not
    /// silently retried.
    pub fn append(&self, recipe: Recipe) -> Result<EntryHandle> {
        let mut state = self.state.lock();

        // Rotation policy check before the write.
        let should_rotate = state.active.as_ref().is_some_and(|a| {
            a.entries.len() >= self.config.max_segment_entries
                || a.opened_at.elapsed() >= self.config.max_segment_age
        });
        if should_rotate {
            self.seal_locked(&mut state)?;
        }

        if state.active.is_none() {
            let number = state.next_segment;
            state.next_segment += 1;
            let path = self.segment_path(number);
            debug!("Creating new segment: {}", path.display());
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(Error::WriteFailure)?;
            state.active = Some(ActiveSegment {
                file,
                path,
                number,
                opened_at: Instant::now(),
                entries: Vec::new(),
            });
        }

        let Some(active) = state.active.as_mut() else {
            return Err(Error::WriteFailure(std::io::Error::other(
                "no active segment",
            )));
        };

        let entry = BufferEntry {
            recipe,
            sequence: active.entries.len() as u64,
            accepted_at: Utc::now(),
        };

        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');
        active
            .file
            .write_all(&line)
            .and_then(|()| active.file.sync_data())
            .map_err(Error::WriteFailure)?;

        let handle = EntryHandle {
            segment: SegmentHandle(active.number),
            sequence: entry.sequence,
        };
        active.entries.push(entry);

        self.total_entries.fetch_add(1, Ordering::Relaxed);
        counter!("segment_entries_written_total").increment(1);
        self.update_gauges(&state);

        Ok(handle)
    }

    /// Point-in-time snapshot of all buffered entries.
    ///
    /// Sealed segments first (oldest first), then the active segment, each in
    /// sequence order. Does not mutate state; holds the lock only to clone.
    pub fn active_snapshot(&self) -> Vec<BufferEntry> {
        let state = self.state.lock();
        let mut entries: Vec<BufferEntry> = state
            .sealed
            .values()
            .flat_map(|s| s.entries.iter().cloned())
            .collect();
        if let Some(active) = &state.active {
            entries.extend(active.entries.iter().cloned());
        }
        entries
    }

    /// Atomically close the active segment and let the next append open a
    /// fresh one.
    ///
    /// Returns the handle of the sealed segment, or `None` when there was
    /// nothing to seal. Records appended after sealing can never leak into a
    /// batch built from the returned handle.
    pub fn seal_active_segment(&self) -> Result<Option<SegmentHandle>> {
        let mut state = self.state.lock();
        self.seal_locked(&mut state)
    }

    /// Seal the active segment while already holding the state lock.
    fn seal_locked(&self, state: &mut BufferState) -> Result<Option<SegmentHandle>> {
        let Some(active) = state.active.take() else {
            return Ok(None);
        };
        if active.entries.is_empty() {
            // Nothing written yet; keep using it rather than churning files.
            state.active = Some(active);
            return Ok(None);
        }

        let ActiveSegment {
            file,
            path,
            number,
            entries,
            ..
        } = active;

        file.sync_all().map_err(Error::WriteFailure)?;
        drop(file);

        let sealed_path = path.with_extension("sealed.jsonl");
        fs::rename(&path, &sealed_path)?;

        info!(
            "Sealed segment {}: {} entries at {}",
            number,
            entries.len(),
            sealed_path.display()
        );

        state.sealed.insert(
            number,
            SealedSegment {
                path: sealed_path,
                entries,
            },
        );

        self.total_sealed.fetch_add(1, Ordering::Relaxed);
        counter!("segment_sealed_total").increment(1);
        self.update_gauges(state);

        let handle = SegmentHandle(number);
        if let Some(tx) = &self.seal_tx {
            if tx.send(handle).is_err() {
                debug!("Seal notification dropped: receiver gone");
            }
        }

        Ok(Some(handle))
    }

    /// Handles of sealed-but-uncommitted segments, oldest first.
    pub fn pending_sealed(&self) -> Vec<SegmentHandle> {
        let state = self.state.lock();
        state.sealed.keys().copied().map(SegmentHandle).collect()
    }

    /// Build a commit batch from every pending sealed segment.
    ///
    /// Entries preserve their segment order (oldest first) and sequence order
    /// within each segment. Returns `None` when nothing is pending. The
    /// segments themselves are left in place; they are deleted only via
    /// [`delete_segment`](Self::delete_segment) after the remote store
    /// confirms the batch.
    pub fn take_batch(&self) -> Option<CommitBatch> {
        let state = self.state.lock();
        if state.sealed.is_empty() {
            return None;
        }

        let mut entries = Vec::new();
        let mut segments = Vec::with_capacity(state.sealed.len());
        for (number, segment) in &state.sealed {
            segments.push(SegmentHandle(*number));
            entries.extend(segment.entries.iter().cloned());
        }

        Some(CommitBatch { entries, segments })
    }

    /// Permanently remove a sealed segment after its batch was committed.
    ///
    /// Idempotent: deleting an unknown or already-deleted handle is a no-op,
    /// because scheduler retries may re-issue it.
    pub fn delete_segment(&self, handle: SegmentHandle) -> Result<()> {
        let mut state = self.state.lock();
        let Some(segment) = state.sealed.remove(&handle.0) else {
            debug!("delete_segment({}): already deleted", handle.0);
            return Ok(());
        };

        match fs::remove_file(&segment.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                // Put the bookkeeping back so a retry can finish the job.
                state.sealed.insert(handle.0, segment);
                return Err(Error::Io(e));
            }
        }

        debug!(
            "Deleted segment {} ({} entries committed)",
            handle.0,
            segment.entries.len()
        );
        counter!("segment_deleted_total").increment(1);
        self.update_gauges(&state);
        Ok(())
    }

    /// Get statistics about the buffer.
    pub fn stats(&self) -> BufferStats {
        let state = self.state.lock();
        BufferStats {
            active_entries: state.active.as_ref().map(|a| a.entries.len()).unwrap_or(0),
            pending_segments: state.sealed.len(),
            pending_entries: state.sealed.values().map(|s| s.entries.len()).sum(),
            total_entries: self.total_entries.load(Ordering::Relaxed),
            total_sealed: self.total_sealed.load(Ordering::Relaxed),
        }
    }

    fn update_gauges(&self, state: &BufferState) {
        let active = state.active.as_ref().map(|a| a.entries.len()).unwrap_or(0);
        let pending: usize = state.sealed.values().map(|s| s.entries.len()).sum();
        gauge!("buffer_active_entries").set(active as f64);
        gauge!("buffer_pending_segments").set(state.sealed.len() as f64);
        gauge!("buffer_pending_entries").set(pending as f64);
    }
}

/// Statistics about the durable buffer.
#[derive(Debug, Clone)]
pub struct BufferStats {
    /// Entries in the current active segment.
    pub active_entries: usize,

    /// Sealed segments awaiting commit.
    pub pending_segments: usize,

    /// Entries in sealed segments awaiting commit.
    pub pending_entries: usize,

    /// Entries appended since this buffer was opened.
    pub total_entries: usize,

    /// Segments sealed since this buffer was opened.
    pub total_sealed: usize,
}

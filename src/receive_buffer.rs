//! # Receive Buffer
//!
//! Per-stream assembly: tracks participating sources, accumulates tiles
//! into pending frames, detects frame completion across all sources, and
//! enforces the send-credit flag. This is the barrier-synchronization half
//! of the dispatcher; see [`crate::dispatcher`] for the per-URI registry
//! and stereo pairing built on top of it.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::StreamError;
use crate::tile::{SourceId, Tile};

/// Per-stream assembly state. One instance per (URI, channel-buffer) — see
/// [`crate::dispatcher::StreamEntry`] for how stereo streams use two.
pub struct ReceiveBuffer {
    sources: HashSet<SourceId>,
    per_source_queue: HashMap<SourceId, VecDeque<Vec<Tile>>>,
    pending: HashMap<SourceId, Vec<Tile>>,
    allowed_to_send: bool,
    /// Optional cap on queued batches per source; `None` = unbounded.
    max_backlog_per_source: Option<usize>,
}

impl ReceiveBuffer {
    pub fn new(max_backlog_per_source: Option<usize>) -> Self {
        Self {
            sources: HashSet::new(),
            per_source_queue: HashMap::new(),
            pending: HashMap::new(),
            allowed_to_send: true,
            max_backlog_per_source,
        }
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn has_source(&self, src: SourceId) -> bool {
        self.sources.contains(&src)
    }

    /// Iterate over currently registered sources, in no particular order.
    pub fn sources(&self) -> impl Iterator<Item = SourceId> + '_ {
        self.sources.iter().copied()
    }

    /// Register a new source. Re-adding a known id is a usage error.
    pub fn add_source(&mut self, src: SourceId) -> Result<(), StreamError> {
        if !self.sources.insert(src) {
            return Err(StreamError::usage(format!(
                "addSource called with already-known source {src}"
            )));
        }
        self.per_source_queue.entry(src).or_default();
        Ok(())
    }

    /// Remove a source, dropping its pending and queued batches. No-op if
    /// the source was never known (callers should check via `has_source`
    /// first where the distinction matters).
    pub fn remove_source(&mut self, src: SourceId) {
        self.sources.remove(&src);
        self.per_source_queue.remove(&src);
        self.pending.remove(&src);
    }

    /// Append a tile to the source's pending (not-yet-finished) batch.
    pub fn insert_tile(&mut self, tile: Tile, src: SourceId) -> Result<(), StreamError> {
        if !self.sources.contains(&src) {
            return Err(StreamError::stream_fatal(
                "",
                format!("tile from unknown source {src}"),
            ));
        }
        self.pending.entry(src).or_default().push(tile);
        Ok(())
    }

    /// Atomically move `pending[src]` into `per_source_queue[src]` as one
    /// batch. An empty batch (no tiles since the last marker) still counts —
    /// a source may legitimately contribute nothing to a given frame.
    pub fn finish_frame_for_source(&mut self, src: SourceId) -> Result<(), StreamError> {
        if !self.sources.contains(&src) {
            return Err(StreamError::stream_fatal(
                "",
                format!("frame_finished from unknown source {src}"),
            ));
        }
        let batch = self.pending.remove(&src).unwrap_or_default();
        let queue = self.per_source_queue.entry(src).or_default();
        if let Some(max) = self.max_backlog_per_source {
            if queue.len() >= max {
                return Err(StreamError::stream_fatal(
                    "",
                    format!("source {src} exceeded backlog cap of {max} frames"),
                ));
            }
        }
        queue.push_back(batch);
        Ok(())
    }

    /// True iff there is at least one source and every source has at least
    /// one queued batch.
    pub fn has_complete_frame(&self) -> bool {
        !self.sources.is_empty()
            && self
                .sources
                .iter()
                .all(|src| self.per_source_queue.get(src).is_some_and(|q| !q.is_empty()))
    }

    /// Dequeue one batch from each source (ascending source id) and
    /// concatenate them. Precondition: `has_complete_frame()`.
    pub fn pop_frame(&mut self) -> Result<Vec<Tile>, StreamError> {
        if !self.has_complete_frame() {
            return Err(StreamError::usage("popFrame called without a complete frame"));
        }
        let mut sources: Vec<SourceId> = self.sources.iter().copied().collect();
        sources.sort_unstable();

        let mut tiles = Vec::new();
        for src in sources {
            if let Some(queue) = self.per_source_queue.get_mut(&src) {
                if let Some(batch) = queue.pop_front() {
                    tiles.extend(batch);
                }
            }
        }
        Ok(tiles)
    }

    pub fn set_allowed_to_send(&mut self, allowed: bool) {
        self.allowed_to_send = allowed;
    }

    pub fn is_allowed_to_send(&self) -> bool {
        self.allowed_to_send
    }
}

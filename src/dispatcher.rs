//! # Frame Dispatcher
//!
//! The registry of streams: routes incoming tile/frame-finished messages to
//! the correct [`ReceiveBuffer`], emits lifecycle and frame-ready signals,
//! and merges stereo (left/right) channels into single frames. Runs as a
//! single-threaded-cooperative task — all stream state is owned exclusively
//! by this task and reached only through [`DispatcherHandle`] messages, so
//! there is no locking anywhere in this module.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::StreamError;
use crate::frame::Frame;
use crate::receive_buffer::ReceiveBuffer;
use crate::tile::{SourceId, Tile};

/// Messages a session sends into the dispatcher task. Ordered and lossless
/// per sender: the channel is the only thing shared across tasks.
#[derive(Debug)]
pub enum DispatcherMsg {
    AddSource { uri: String, src: SourceId },
    RemoveSource { uri: String, src: SourceId },
    AddObserver { uri: String },
    RemoveObserver { uri: String },
    ProcessTile { uri: String, src: SourceId, tile: Tile },
    ProcessFrameFinished { uri: String, src: SourceId },
    RequestFrame { uri: String },
}

/// Lifecycle and data signals emitted to the consumer.
#[derive(Debug)]
pub enum Signal {
    PixelStreamOpened(String),
    PixelStreamClosed(String),
    PixelStreamException { uri: String, message: String },
    ReceivedFrame(Frame),
}

/// Cloneable handle used by session tasks to talk to the dispatcher task.
#[derive(Clone)]
pub struct DispatcherHandle {
    tx: mpsc::Sender<DispatcherMsg>,
}

impl DispatcherHandle {
    pub async fn add_source(&self, uri: String, src: SourceId) {
        let _ = self.tx.send(DispatcherMsg::AddSource { uri, src }).await;
    }

    pub async fn remove_source(&self, uri: String, src: SourceId) {
        let _ = self.tx.send(DispatcherMsg::RemoveSource { uri, src }).await;
    }

    pub async fn add_observer(&self, uri: String) {
        let _ = self.tx.send(DispatcherMsg::AddObserver { uri }).await;
    }

    pub async fn remove_observer(&self, uri: String) {
        let _ = self.tx.send(DispatcherMsg::RemoveObserver { uri }).await;
    }

    pub async fn process_tile(&self, uri: String, src: SourceId, tile: Tile) {
        let _ = self.tx.send(DispatcherMsg::ProcessTile { uri, src, tile }).await;
    }

    pub async fn process_frame_finished(&self, uri: String, src: SourceId) {
        let _ = self.tx.send(DispatcherMsg::ProcessFrameFinished { uri, src }).await;
    }

    /// Consumer-invoked: grant credit for one more frame on `uri`.
    pub async fn request_frame(&self, uri: String) {
        let _ = self.tx.send(DispatcherMsg::RequestFrame { uri }).await;
    }
}

/// Per-URI state: a primary (mono/left) buffer and a lazily-created
/// secondary (right-eye) buffer. A stereo frame is released only once both
/// buffers report a complete frame, so the two eyes stay paired without
/// modeling them as two independent streams (see DESIGN.md).
struct StreamEntry {
    primary: ReceiveBuffer,
    secondary: Option<ReceiveBuffer>,
    max_backlog_per_source: Option<usize>,
}

impl StreamEntry {
    fn new(max_backlog_per_source: Option<usize>) -> Self {
        Self {
            primary: ReceiveBuffer::new(max_backlog_per_source),
            secondary: None,
            max_backlog_per_source,
        }
    }

    fn add_source(&mut self, src: SourceId) -> Result<(), StreamError> {
        self.primary.add_source(src)?;
        if let Some(sec) = &mut self.secondary {
            // Best-effort mirror; the source may already be registered if
            // it touched channel 1 before channel 0.
            let _ = sec.add_source(src);
        }
        Ok(())
    }

    fn remove_source(&mut self, src: SourceId) {
        self.primary.remove_source(src);
        if let Some(sec) = &mut self.secondary {
            sec.remove_source(src);
        }
    }

    fn insert_tile(&mut self, tile: Tile, src: SourceId) -> Result<(), StreamError> {
        if tile.is_right_channel() {
            if self.secondary.is_none() {
                let mut sec = ReceiveBuffer::new(self.max_backlog_per_source);
                for s in self.primary.sources() {
                    let _ = sec.add_source(s);
                }
                self.secondary = Some(sec);
            }
            self.secondary.as_mut().unwrap().insert_tile(tile, src)
        } else {
            self.primary.insert_tile(tile, src)
        }
    }

    fn finish_frame_for_source(&mut self, src: SourceId) -> Result<(), StreamError> {
        self.primary.finish_frame_for_source(src)?;
        if let Some(sec) = &mut self.secondary {
            if sec.has_source(src) {
                sec.finish_frame_for_source(src)?;
            }
        }
        Ok(())
    }

    fn has_complete_frame(&self) -> bool {
        self.primary.has_complete_frame()
            && self.secondary.as_ref().map_or(true, |s| s.has_complete_frame())
    }

    /// Drain all currently complete frames, keeping only the most recent —
    /// latest-wins lossy delivery under back-pressure.
    fn consume_latest_frame(&mut self) -> Result<Vec<Tile>, StreamError> {
        let mut tiles = Vec::new();
        while self.has_complete_frame() {
            let mut batch = self.primary.pop_frame()?;
            if let Some(sec) = &mut self.secondary {
                batch.extend(sec.pop_frame()?);
            }
            tiles = batch;
        }
        self.primary.set_allowed_to_send(false);
        Ok(tiles)
    }

    fn set_allowed_to_send(&mut self, allowed: bool) {
        self.primary.set_allowed_to_send(allowed);
    }

    fn is_allowed_to_send(&self) -> bool {
        self.primary.is_allowed_to_send()
    }

    fn source_count(&self) -> usize {
        self.primary.source_count()
    }
}

/// The dispatcher's owned state. Lives entirely inside the task spawned by
/// [`spawn`]; never shared or locked.
struct FrameDispatcher {
    streams: HashMap<String, StreamEntry>,
    observers: HashMap<String, usize>,
    max_backlog_per_source: Option<usize>,
    signals: mpsc::Sender<Signal>,
}

impl FrameDispatcher {
    async fn emit(&self, signal: Signal) {
        if self.signals.send(signal).await.is_err() {
            warn!("signal channel closed; consumer has gone away");
        }
    }

    async fn add_source(&mut self, uri: String, src: SourceId) {
        let entry = self
            .streams
            .entry(uri.clone())
            .or_insert_with(|| StreamEntry::new(self.max_backlog_per_source));
        let was_zero_sources = entry.source_count() == 0;

        if let Err(e) = entry.add_source(src) {
            self.emit(Signal::PixelStreamException { uri, message: e.to_string() }).await;
            return;
        }

        let observers_zero = *self.observers.get(&uri).unwrap_or(&0) == 0;
        if was_zero_sources && observers_zero {
            info!(%uri, "pixel stream opened (source)");
            self.emit(Signal::PixelStreamOpened(uri)).await;
        }
    }

    async fn remove_source(&mut self, uri: String, src: SourceId) {
        if let Some(entry) = self.streams.get_mut(&uri) {
            entry.remove_source(src);
        } else {
            return;
        }
        self.gc(uri).await;
    }

    async fn add_observer(&mut self, uri: String) {
        let first_reference = !self.streams.contains_key(&uri)
            || self.streams.get(&uri).is_some_and(|e| e.source_count() == 0);
        let count = self.observers.entry(uri.clone()).or_insert(0);
        *count += 1;
        if *count == 1 && first_reference {
            self.streams
                .entry(uri.clone())
                .or_insert_with(|| StreamEntry::new(self.max_backlog_per_source));
            info!(%uri, "pixel stream opened (observer)");
            self.emit(Signal::PixelStreamOpened(uri)).await;
        }
    }

    async fn remove_observer(&mut self, uri: String) {
        if let Some(count) = self.observers.get_mut(&uri) {
            if *count > 0 {
                *count -= 1;
            }
        }
        self.gc(uri).await;
    }

    /// Erase the stream and emit `closed` iff both sources and observers
    /// have returned to zero. A no-op if the stream never existed.
    async fn gc(&mut self, uri: String) {
        let sources_empty = self.streams.get(&uri).is_none_or(|e| e.source_count() == 0);
        let observers_empty = *self.observers.get(&uri).unwrap_or(&0) == 0;
        if sources_empty && observers_empty && self.streams.remove(&uri).is_some() {
            self.observers.remove(&uri);
            info!(%uri, "pixel stream closed");
            self.emit(Signal::PixelStreamClosed(uri)).await;
        }
    }

    async fn process_tile(&mut self, uri: String, src: SourceId, tile: Tile) {
        let Some(entry) = self.streams.get_mut(&uri) else {
            debug!(%uri, src, "tile for unknown/closed stream dropped (benign race)");
            return;
        };
        if let Err(e) = entry.insert_tile(tile, src) {
            self.emit(Signal::PixelStreamException { uri, message: e.to_string() }).await;
        }
    }

    async fn process_frame_finished(&mut self, uri: String, src: SourceId) {
        let Some(entry) = self.streams.get_mut(&uri) else {
            return;
        };
        if let Err(e) = entry.finish_frame_for_source(src) {
            entry.remove_source(src);
            self.emit(Signal::PixelStreamException { uri: uri.clone(), message: e.to_string() })
                .await;
            self.gc(uri).await;
            return;
        }
        if entry.is_allowed_to_send() && entry.has_complete_frame() {
            self.emit_frame(uri).await;
        }
    }

    async fn request_frame(&mut self, uri: String) {
        let Some(entry) = self.streams.get_mut(&uri) else {
            return;
        };
        entry.set_allowed_to_send(true);
        if entry.has_complete_frame() {
            self.emit_frame(uri).await;
        }
    }

    /// Build, normalize, and emit the latest complete frame for `uri`,
    /// clearing credit.
    async fn emit_frame(&mut self, uri: String) {
        let Some(entry) = self.streams.get_mut(&uri) else { return };
        let tiles = match entry.consume_latest_frame() {
            Ok(tiles) => tiles,
            Err(e) => {
                self.emit(Signal::PixelStreamException { uri: uri.clone(), message: e.to_string() })
                    .await;
                self.fail_stream(&uri).await;
                return;
            }
        };

        let mut frame = Frame { uri: uri.clone(), tiles };
        let row_order = match frame.row_order() {
            Ok(order) => order,
            Err(e) => {
                self.emit(Signal::PixelStreamException { uri: uri.clone(), message: e.to_string() })
                    .await;
                self.fail_stream(&uri).await;
                return;
            }
        };

        if matches!(row_order, crate::tile::RowOrder::BottomUp) {
            mirror_vertically(&mut frame);
        }

        debug_assert!(!frame.tiles.is_empty(), "consume_latest_frame must not yield an empty frame");
        if frame.tiles.is_empty() {
            self.emit(Signal::PixelStreamException {
                uri,
                message: "internal error: popped an empty frame".into(),
            })
            .await;
            return;
        }

        self.emit(Signal::ReceivedFrame(frame)).await;
    }

    /// A stream-fatal failure that can't be pinned on one specific source
    /// (e.g. tiles from different sources disagreeing on `row_order`) resets
    /// the whole stream rather than leaving it to raise the same exception
    /// on every later `frame_finished`/`requestFrame`: every currently
    /// registered source is removed and the usual GC rule runs, closing the
    /// stream if that was the last one (see DESIGN.md).
    async fn fail_stream(&mut self, uri: &str) {
        let Some(entry) = self.streams.get_mut(uri) else { return };
        let sources: Vec<SourceId> = entry.primary.sources().collect();
        for src in sources {
            entry.remove_source(src);
        }
        self.gc(uri.to_string()).await;
    }
}

/// Rewrite `bottom_up` tile `y` coordinates to top-down using one height for
/// the whole frame (the bounding box over every tile, regardless of
/// channel), matching how a single `bottom_up`/`top_down` flag applies to
/// the entire frame rather than to each channel independently.
fn mirror_vertically(frame: &mut Frame) {
    let height = frame
        .tiles
        .iter()
        .map(|t| t.y + t.height)
        .max()
        .unwrap_or(0);
    for tile in frame.tiles.iter_mut() {
        tile.y = height - tile.y - tile.height;
    }
}

/// Spawn the dispatcher task. Returns a cloneable handle for sessions and a
/// receiver the server façade drains to relay signals to the consumer.
pub fn spawn(max_backlog_per_source: Option<usize>) -> (DispatcherHandle, mpsc::Receiver<Signal>) {
    let (msg_tx, mut msg_rx) = mpsc::channel::<DispatcherMsg>(256);
    let (signal_tx, signal_rx) = mpsc::channel::<Signal>(256);

    tokio::spawn(async move {
        let mut dispatcher = FrameDispatcher {
            streams: HashMap::new(),
            observers: HashMap::new(),
            max_backlog_per_source,
            signals: signal_tx,
        };

        while let Some(msg) = msg_rx.recv().await {
            match msg {
                DispatcherMsg::AddSource { uri, src } => dispatcher.add_source(uri, src).await,
                DispatcherMsg::RemoveSource { uri, src } => dispatcher.remove_source(uri, src).await,
                DispatcherMsg::AddObserver { uri } => dispatcher.add_observer(uri).await,
                DispatcherMsg::RemoveObserver { uri } => dispatcher.remove_observer(uri).await,
                DispatcherMsg::ProcessTile { uri, src, tile } => {
                    dispatcher.process_tile(uri, src, tile).await
                }
                DispatcherMsg::ProcessFrameFinished { uri, src } => {
                    dispatcher.process_frame_finished(uri, src).await
                }
                DispatcherMsg::RequestFrame { uri } => dispatcher.request_frame(uri).await,
            }
        }
    });

    (DispatcherHandle { tx: msg_tx }, signal_rx)
}

//! # Frame Data Model
//!
//! A `Frame` is the unit delivered to the consumer: the set of tiles that
//! together represent one logical point in time for one stream, normalized
//! to top-down coordinates. See [`crate::dispatcher`] for how frames are
//! assembled and [`crate::receive_buffer`] for how per-source batches reach
//! completeness.

use crate::tile::{RowOrder, Tile};

/// A complete, deliverable set of tiles for one stream.
#[derive(Debug, Clone)]
pub struct Frame {
    pub uri: String,
    pub tiles: Vec<Tile>,
}

/// Raised when a frame's tiles disagree on `row_order`; this is a
/// stream-fatal condition (see [`crate::error::StreamError::StreamFatal`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("frame has incoherent row orders across its tiles")]
pub struct IncoherentRowOrder;

impl Frame {
    /// Width/height of the tiles belonging to the given channel, i.e. the
    /// bounding box of `(x + width, y + height)` over tiles with that
    /// channel. `(0, 0)` if the channel is empty.
    pub fn dimensions(&self, channel: u8) -> (u32, u32) {
        let mut w = 0u32;
        let mut h = 0u32;
        for tile in self.tiles.iter().filter(|t| t.channel == channel) {
            w = w.max(tile.x + tile.width);
            h = h.max(tile.y + tile.height);
        }
        (w, h)
    }

    /// The single `row_order` shared by every tile, or an error if the
    /// frame is empty or its tiles disagree.
    pub fn row_order(&self) -> Result<RowOrder, IncoherentRowOrder> {
        let first = self.tiles.first().ok_or(IncoherentRowOrder)?.row_order;
        if self.tiles.iter().all(|t| t.row_order == first) {
            Ok(first)
        } else {
            Err(IncoherentRowOrder)
        }
    }
}

//! # Tile Data Model
//!
//! The `Tile` is the smallest unit of work in the system: one rectangular
//! pixel region contributed by one source to one frame of one stream.
//! Tiles are immutable once constructed and move through the pipeline by
//! value — the payload is never copied after it arrives from the wire.

/// Identifies a producer contributing tiles to a stream. Opaque and assigned
/// by the producer; unique only within a single stream URI.
pub type SourceId = u64;

/// Pixel memory layout direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowOrder {
    /// `(0, 0)` is the top-left corner (standard image convention).
    TopDown,
    /// `(0, 0)` is the bottom-left corner (OpenGL convention).
    BottomUp,
}

/// Encoding of the tile's pixel payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileFormat {
    Rgba,
    Jpeg,
    Yuv444,
    Yuv422,
    Yuv420,
}

/// Which logical eye/view a tile belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileView {
    Mono,
    LeftEye,
    RightEye,
    SideBySide,
}

/// One contribution from one source to one frame.
///
/// Invariants enforced by the constructor: `width > 0`, `height > 0`.
/// Payload/format/dimension consistency is validated upstream (by the wire
/// codec) and is trusted here.
#[derive(Debug, Clone)]
pub struct Tile {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Selects a logical view; 0 = mono/left, 1 = right, others permitted.
    pub channel: u8,
    pub row_order: RowOrder,
    pub format: TileFormat,
    pub view: TileView,
    pub payload: Vec<u8>,
}

/// Error returned by [`Tile::new`] when a geometric invariant is violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TileError {
    #[error("tile width must be > 0")]
    ZeroWidth,
    #[error("tile height must be > 0")]
    ZeroHeight,
}

impl Tile {
    /// Construct a tile, rejecting degenerate (zero-area) geometry.
    pub fn new(
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        channel: u8,
        row_order: RowOrder,
        format: TileFormat,
        view: TileView,
        payload: Vec<u8>,
    ) -> Result<Self, TileError> {
        if width == 0 {
            return Err(TileError::ZeroWidth);
        }
        if height == 0 {
            return Err(TileError::ZeroHeight);
        }
        Ok(Self {
            x,
            y,
            width,
            height,
            channel,
            row_order,
            format,
            view,
            payload,
        })
    }

    /// Whether this tile belongs to the secondary (right-eye) stereo channel.
    pub fn is_right_channel(&self) -> bool {
        self.channel == 1 || matches!(self.view, TileView::RightEye)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tile(w: u32, h: u32) -> Result<Tile, TileError> {
        Tile::new(0, 0, w, h, 0, RowOrder::TopDown, TileFormat::Rgba, TileView::Mono, vec![])
    }

    #[test]
    fn rejects_zero_width() {
        assert_eq!(tile(0, 10).unwrap_err(), TileError::ZeroWidth);
    }

    #[test]
    fn rejects_zero_height() {
        assert_eq!(tile(10, 0).unwrap_err(), TileError::ZeroHeight);
    }

    #[test]
    fn accepts_valid_geometry() {
        assert!(tile(64, 64).is_ok());
    }

    #[test]
    fn right_channel_detection() {
        let t = Tile::new(0, 0, 1, 1, 1, RowOrder::TopDown, TileFormat::Rgba, TileView::Mono, vec![])
            .unwrap();
        assert!(t.is_right_channel());

        let t = Tile::new(0, 0, 1, 1, 0, RowOrder::TopDown, TileFormat::Rgba, TileView::RightEye, vec![])
            .unwrap();
        assert!(t.is_right_channel());

        let t = Tile::new(0, 0, 1, 1, 0, RowOrder::TopDown, TileFormat::Rgba, TileView::Mono, vec![])
            .unwrap();
        assert!(!t.is_right_channel());
    }
}

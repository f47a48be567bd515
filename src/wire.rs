//! # Wire Codec
//!
//! Binary, little-endian message framing over TCP. A fixed header precedes
//! every message; `PIXEL_STREAM` payloads carry a further fixed tile header
//! followed by the raw pixel bytes. Pure encode/decode — no I/O beyond the
//! `AsyncRead`/`AsyncWrite` helpers at the bottom, so this module is trivial
//! to unit test without a socket.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::StreamError;
use crate::tile::{RowOrder, Tile, TileFormat, TileView};

const URI_FIELD_LEN: usize = 64;
const MESSAGE_HEADER_LEN: usize = 4 + 4 + URI_FIELD_LEN;
const TILE_HEADER_LEN: usize = 4 * 4 + 8 + 1 + 1 + 1 + 1 + 4;

/// Wire message type tags. Auxiliary types carry opaque payloads the
/// session forwards untouched rather than interpreting them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    OpenStream,
    PixelStream,
    PixelStreamFinishFrame,
    CloseStream,
    RequestFrame,
    Quit,
    RegisterEvents,
    SizeHints,
    Data,
}

impl MessageType {
    fn from_u32(v: u32) -> Result<Self, StreamError> {
        Ok(match v {
            0 => Self::OpenStream,
            1 => Self::PixelStream,
            2 => Self::PixelStreamFinishFrame,
            3 => Self::CloseStream,
            4 => Self::RequestFrame,
            5 => Self::Quit,
            6 => Self::RegisterEvents,
            7 => Self::SizeHints,
            8 => Self::Data,
            other => return Err(StreamError::transport(format!("unknown message type {other}"))),
        })
    }

    fn to_u32(self) -> u32 {
        match self {
            Self::OpenStream => 0,
            Self::PixelStream => 1,
            Self::PixelStreamFinishFrame => 2,
            Self::CloseStream => 3,
            Self::RequestFrame => 4,
            Self::Quit => 5,
            Self::RegisterEvents => 6,
            Self::SizeHints => 7,
            Self::Data => 8,
        }
    }
}

/// One decoded wire message. `payload` is the tile bytes for `PixelStream`
/// and the opaque bytes for auxiliary types; empty for control messages.
#[derive(Debug, Clone)]
pub struct Message {
    pub kind: MessageType,
    pub uri: String,
    pub payload: Vec<u8>,
}

/// Encode the fixed `[type: u32][size: u32][uri: [u8; 64]]` header plus
/// `payload` into one buffer ready to write.
pub fn encode_message(kind: MessageType, uri: &str, payload: &[u8]) -> Result<Vec<u8>, StreamError> {
    if uri.len() >= URI_FIELD_LEN {
        return Err(StreamError::transport(format!(
            "uri '{uri}' exceeds the {URI_FIELD_LEN}-byte wire field"
        )));
    }
    let mut buf = Vec::with_capacity(MESSAGE_HEADER_LEN + payload.len());
    buf.extend_from_slice(&kind.to_u32().to_le_bytes());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    let mut uri_field = [0u8; URI_FIELD_LEN];
    uri_field[..uri.len()].copy_from_slice(uri.as_bytes());
    buf.extend_from_slice(&uri_field);
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Encode a tile into the `PIXEL_STREAM` payload layout.
pub fn encode_tile(tile: &Tile, source_id: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(TILE_HEADER_LEN + tile.payload.len());
    buf.extend_from_slice(&tile.x.to_le_bytes());
    buf.extend_from_slice(&tile.y.to_le_bytes());
    buf.extend_from_slice(&tile.width.to_le_bytes());
    buf.extend_from_slice(&tile.height.to_le_bytes());
    buf.extend_from_slice(&source_id.to_le_bytes());
    buf.push(view_to_u8(tile.view));
    buf.push(row_order_to_u8(tile.row_order));
    buf.push(tile.channel);
    buf.push(format_to_u8(tile.format));
    buf.extend_from_slice(&0u32.to_le_bytes()); // reserved
    buf.extend_from_slice(&tile.payload);
    buf
}

/// Decode a `PIXEL_STREAM` payload into a tile plus the source id it came
/// from. Malformed geometry or an unrecognized enum tag is a Transport
/// error (no stream identity is trusted yet at decode time).
pub fn decode_tile(bytes: &[u8]) -> Result<(Tile, u64), StreamError> {
    if bytes.len() < TILE_HEADER_LEN {
        return Err(StreamError::transport("tile payload shorter than the fixed header"));
    }
    let x = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
    let y = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
    let width = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
    let height = u32::from_le_bytes(bytes[12..16].try_into().unwrap());
    let source_id = u64::from_le_bytes(bytes[16..24].try_into().unwrap());
    let view = u8_to_view(bytes[24])?;
    let row_order = u8_to_row_order(bytes[25])?;
    let channel = bytes[26];
    let format = u8_to_format(bytes[27])?;
    let payload = bytes[TILE_HEADER_LEN..].to_vec();

    let tile = Tile::new(x, y, width, height, channel, row_order, format, view, payload)
        .map_err(|e| StreamError::transport(e.to_string()))?;
    Ok((tile, source_id))
}

fn view_to_u8(v: TileView) -> u8 {
    match v {
        TileView::Mono => 0,
        TileView::LeftEye => 1,
        TileView::RightEye => 2,
        TileView::SideBySide => 3,
    }
}

fn u8_to_view(v: u8) -> Result<TileView, StreamError> {
    Ok(match v {
        0 => TileView::Mono,
        1 => TileView::LeftEye,
        2 => TileView::RightEye,
        3 => TileView::SideBySide,
        other => return Err(StreamError::transport(format!("unknown tile view tag {other}"))),
    })
}

fn row_order_to_u8(r: RowOrder) -> u8 {
    match r {
        RowOrder::TopDown => 0,
        RowOrder::BottomUp => 1,
    }
}

fn u8_to_row_order(v: u8) -> Result<RowOrder, StreamError> {
    Ok(match v {
        0 => RowOrder::TopDown,
        1 => RowOrder::BottomUp,
        other => return Err(StreamError::transport(format!("unknown row order tag {other}"))),
    })
}

fn format_to_u8(f: TileFormat) -> u8 {
    match f {
        TileFormat::Rgba => 0,
        TileFormat::Jpeg => 1,
        TileFormat::Yuv444 => 2,
        TileFormat::Yuv422 => 3,
        TileFormat::Yuv420 => 4,
    }
}

fn u8_to_format(v: u8) -> Result<TileFormat, StreamError> {
    Ok(match v {
        0 => TileFormat::Rgba,
        1 => TileFormat::Jpeg,
        2 => TileFormat::Yuv444,
        3 => TileFormat::Yuv422,
        4 => TileFormat::Yuv420,
        other => return Err(StreamError::transport(format!("unknown tile format tag {other}"))),
    })
}

/// Read one full message off `reader`. `Ok(None)` on a clean EOF before any
/// bytes of a new header arrive; any other short read is a Transport error.
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Message>, StreamError> {
    let mut header = [0u8; MESSAGE_HEADER_LEN];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(StreamError::transport(format!("reading message header: {e}"))),
    }

    let kind = MessageType::from_u32(u32::from_le_bytes(header[0..4].try_into().unwrap()))?;
    let size = u32::from_le_bytes(header[4..8].try_into().unwrap()) as usize;
    let uri_field = &header[8..8 + URI_FIELD_LEN];
    let uri_end = uri_field.iter().position(|&b| b == 0).unwrap_or(URI_FIELD_LEN);
    let uri = std::str::from_utf8(&uri_field[..uri_end])
        .map_err(|e| StreamError::transport(format!("uri is not valid utf-8: {e}")))?
        .to_string();

    let mut payload = vec![0u8; size];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|e| StreamError::transport(format!("reading message payload: {e}")))?;

    Ok(Some(Message { kind, uri, payload }))
}

/// Write one full message to `writer`.
pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    kind: MessageType,
    uri: &str,
    payload: &[u8],
) -> Result<(), StreamError> {
    let buf = encode_message(kind, uri, payload)?;
    writer
        .write_all(&buf)
        .await
        .map_err(|e| StreamError::transport(format!("writing message: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::RowOrder;

    #[test]
    fn message_round_trips_through_encode_and_decode() {
        let encoded = encode_message(MessageType::OpenStream, "img://a", b"hello").unwrap();
        assert_eq!(encoded.len(), MESSAGE_HEADER_LEN + 5);
    }

    #[test]
    fn uri_too_long_is_rejected() {
        let long = "x".repeat(URI_FIELD_LEN);
        assert!(encode_message(MessageType::OpenStream, &long, b"").is_err());
    }

    #[test]
    fn tile_round_trips_through_encode_and_decode() {
        let tile = Tile::new(
            1,
            2,
            64,
            32,
            0,
            RowOrder::BottomUp,
            TileFormat::Jpeg,
            TileView::LeftEye,
            vec![9, 8, 7],
        )
        .unwrap();
        let encoded = encode_tile(&tile, 42);
        let (decoded, source_id) = decode_tile(&encoded).unwrap();
        assert_eq!(source_id, 42);
        assert_eq!(decoded.x, 1);
        assert_eq!(decoded.y, 2);
        assert_eq!(decoded.width, 64);
        assert_eq!(decoded.height, 32);
        assert_eq!(decoded.row_order, RowOrder::BottomUp);
        assert_eq!(decoded.format, TileFormat::Jpeg);
        assert_eq!(decoded.view, TileView::LeftEye);
        assert_eq!(decoded.payload, vec![9, 8, 7]);
    }

    #[test]
    fn decode_tile_rejects_short_payload() {
        assert!(decode_tile(&[0u8; 4]).is_err());
    }

    #[tokio::test]
    async fn read_message_round_trips_over_an_in_memory_pipe() {
        let buf = encode_message(MessageType::RequestFrame, "img://b", b"").unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let msg = read_message(&mut cursor).await.unwrap().unwrap();
        assert_eq!(msg.kind, MessageType::RequestFrame);
        assert_eq!(msg.uri, "img://b");
        assert!(msg.payload.is_empty());
    }

    #[tokio::test]
    async fn read_message_returns_none_on_clean_eof() {
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
        assert!(read_message(&mut cursor).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn write_then_read_message_round_trips() {
        let mut buf = Vec::new();
        write_message(&mut buf, MessageType::CloseStream, "img://c", b"").await.unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let msg = read_message(&mut cursor).await.unwrap().unwrap();
        assert_eq!(msg.kind, MessageType::CloseStream);
        assert_eq!(msg.uri, "img://c");
    }
}

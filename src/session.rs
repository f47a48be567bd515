//! # Session
//!
//! Per-connection state machine: negotiates a handshake, then translates
//! wire messages into [`DispatcherHandle`] calls and dispatcher-initiated
//! close requests into outbound wire messages. Runs as its own task; the
//! only state it owns is its socket and the set of `(uri, src)` pairs it is
//! responsible for.

use std::collections::HashSet;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::dispatcher::DispatcherHandle;
use crate::tile::SourceId;
use crate::wire::{self, Message, MessageType};

/// Wire protocol version this build speaks. Mismatched handshakes terminate
/// the session.
pub const PROTOCOL_VERSION: u32 = 1;

const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// A request from the server façade to close a stream this session may own
/// a source on. Delivered asynchronously; the session acts on it between
/// reads.
#[derive(Debug, Clone)]
pub struct CloseRequest {
    pub uri: String,
}

/// Drives one connection end to end. `close_rx` carries consumer-initiated
/// `close_pixel_stream` requests that name a URI this session might own.
pub async fn run<S>(
    mut stream: S,
    dispatcher: DispatcherHandle,
    mut close_rx: mpsc::Receiver<CloseRequest>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if !handshake(&mut stream).await {
        return;
    }

    let mut owned: HashSet<(String, SourceId)> = HashSet::new();

    loop {
        tokio::select! {
            biased;

            close = close_rx.recv() => {
                let Some(req) = close else { continue };
                close_owned_sources_on(&mut owned, &dispatcher, &req.uri).await;
                let _ = wire::write_message(&mut stream, MessageType::CloseStream, &req.uri, b"").await;
            }

            read = timeout(IDLE_TIMEOUT, wire::read_message(&mut stream)) => {
                let Ok(read) = read else {
                    warn!("session idle timeout; closing");
                    break;
                };
                match read {
                    Ok(Some(msg)) => {
                        if !handle_message(msg, &mut owned, &dispatcher).await {
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!("peer closed connection");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "transport error; closing session");
                        break;
                    }
                }
            }
        }
    }

    for (uri, src) in owned {
        dispatcher.remove_source(uri, src).await;
    }
}

/// Negotiate the protocol version. Returns `false` (and leaves the
/// connection to be dropped by the caller) on any transport failure or
/// version mismatch.
async fn handshake<S: AsyncRead + AsyncWrite + Unpin>(stream: &mut S) -> bool {
    let msg = match wire::read_message(stream).await {
        Ok(Some(msg)) => msg,
        Ok(None) => return false,
        Err(e) => {
            warn!(error = %e, "handshake failed: transport error");
            return false;
        }
    };
    if msg.kind != MessageType::OpenStream || msg.payload.len() != 4 {
        warn!("handshake failed: expected an OPEN_STREAM version handshake");
        return false;
    }
    let peer_version = u32::from_le_bytes(msg.payload[..4].try_into().unwrap());
    if peer_version != PROTOCOL_VERSION {
        warn!(peer_version, "handshake failed: protocol version mismatch");
        let _ = stream.write_all(&peer_version.to_le_bytes()).await;
        return false;
    }
    true
}

/// Dispatch one decoded message. Returns `false` if the session should
/// close (QUIT or an unrecoverable framing issue).
async fn handle_message(
    msg: Message,
    owned: &mut HashSet<(String, SourceId)>,
    dispatcher: &DispatcherHandle,
) -> bool {
    match msg.kind {
        MessageType::OpenStream => {
            if msg.payload.len() < 8 {
                warn!("OPEN_STREAM missing source id; dropping");
                return true;
            }
            let src = u64::from_le_bytes(msg.payload[..8].try_into().unwrap());
            owned.insert((msg.uri.clone(), src));
            dispatcher.add_source(msg.uri, src).await;
        }
        MessageType::PixelStream => match wire::decode_tile(&msg.payload) {
            Ok((tile, src)) => {
                dispatcher.process_tile(msg.uri, src, tile).await;
            }
            Err(e) => warn!(error = %e, "dropping malformed tile"),
        },
        MessageType::PixelStreamFinishFrame => {
            if msg.payload.len() < 8 {
                warn!("PIXEL_STREAM_FINISH_FRAME missing source id; dropping");
                return true;
            }
            let src = u64::from_le_bytes(msg.payload[..8].try_into().unwrap());
            dispatcher.process_frame_finished(msg.uri, src).await;
        }
        MessageType::CloseStream => {
            if msg.payload.len() < 8 {
                warn!("CLOSE_STREAM missing source id; dropping");
                return true;
            }
            let src = u64::from_le_bytes(msg.payload[..8].try_into().unwrap());
            owned.remove(&(msg.uri.clone(), src));
            dispatcher.remove_source(msg.uri, src).await;
        }
        MessageType::RequestFrame => {
            dispatcher.request_frame(msg.uri).await;
        }
        MessageType::Quit => {
            info!("peer sent QUIT");
            return false;
        }
        MessageType::RegisterEvents | MessageType::SizeHints | MessageType::Data => {
            debug!(kind = ?msg.kind, "forwarding auxiliary message outside the core");
        }
    }
    true
}

async fn close_owned_sources_on(
    owned: &mut HashSet<(String, SourceId)>,
    dispatcher: &DispatcherHandle,
    uri: &str,
) {
    let matching: Vec<(String, SourceId)> =
        owned.iter().filter(|(u, _)| u == uri).cloned().collect();
    for (uri, src) in matching {
        owned.remove(&(uri.clone(), src));
        dispatcher.remove_source(uri, src).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::{self, Signal};
    use tokio::io::duplex;

    fn open_stream_payload(version: u32) -> Vec<u8> {
        version.to_le_bytes().to_vec()
    }

    #[tokio::test]
    async fn rejects_mismatched_protocol_version() {
        let (mut client, server) = duplex(4096);
        let (handle, _signals) = dispatcher::spawn(None);

        let handshake = wire::encode_message(
            MessageType::OpenStream,
            "",
            &open_stream_payload(PROTOCOL_VERSION + 1),
        )
        .unwrap();
        client.write_all(&handshake).await.unwrap();

        let (_close_tx, close_rx) = mpsc::channel(1);
        run(server, handle, close_rx).await;

        let mut reply = [0u8; 4];
        tokio::io::AsyncReadExt::read_exact(&mut client, &mut reply).await.unwrap();
        assert_eq!(u32::from_le_bytes(reply), PROTOCOL_VERSION + 1);
    }

    #[tokio::test]
    async fn open_tile_and_finish_yields_a_frame() {
        let (mut client, server) = duplex(8192);
        let (handle, mut signals) = dispatcher::spawn(None);

        let handshake =
            wire::encode_message(MessageType::OpenStream, "", &open_stream_payload(PROTOCOL_VERSION))
                .unwrap();
        client.write_all(&handshake).await.unwrap();

        let src_payload = 7u64.to_le_bytes().to_vec();
        client
            .write_all(&wire::encode_message(MessageType::OpenStream, "img://z", &src_payload).unwrap())
            .await
            .unwrap();

        let tile = crate::tile::Tile::new(
            0,
            0,
            4,
            4,
            0,
            crate::tile::RowOrder::TopDown,
            crate::tile::TileFormat::Rgba,
            crate::tile::TileView::Mono,
            vec![1, 2, 3, 4],
        )
        .unwrap();
        let tile_bytes = wire::encode_tile(&tile, 7);
        client
            .write_all(&wire::encode_message(MessageType::PixelStream, "img://z", &tile_bytes).unwrap())
            .await
            .unwrap();

        client
            .write_all(
                &wire::encode_message(MessageType::PixelStreamFinishFrame, "img://z", &src_payload)
                    .unwrap(),
            )
            .await
            .unwrap();
        client
            .write_all(&wire::encode_message(MessageType::RequestFrame, "img://z", b"").unwrap())
            .await
            .unwrap();
        client
            .write_all(&wire::encode_message(MessageType::Quit, "", b"").unwrap())
            .await
            .unwrap();

        let (_close_tx, close_rx) = mpsc::channel(1);
        run(server, handle, close_rx).await;

        let _opened = tokio::time::timeout(Duration::from_secs(1), signals.recv())
            .await
            .unwrap()
            .unwrap();
        match tokio::time::timeout(Duration::from_secs(1), signals.recv()).await.unwrap().unwrap() {
            Signal::ReceivedFrame(frame) => assert_eq!(frame.tiles.len(), 1),
            other => panic!("expected ReceivedFrame, got {other:?}"),
        }
    }
}

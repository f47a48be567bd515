//! End-to-end loopback test: drives the real wire codec over a real
//! `TcpListener`/`TcpStream` pair, proving the networking ambient stack
//! (not just the in-process dispatcher/session logic already covered by
//! unit tests) is wired correctly.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use tileflow_server::{Server, ServerConfig, Signal};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

fn tile_bytes() -> Vec<u8> {
    let tile = tileflow_server::Tile::new(
        0,
        0,
        16,
        16,
        0,
        tileflow_server::RowOrder::TopDown,
        tileflow_server::TileFormat::Rgba,
        tileflow_server::TileView::Mono,
        vec![0u8; 16 * 16 * 4],
    )
    .unwrap();
    tileflow_server::wire::encode_tile(&tile, 1)
}

#[tokio::test]
async fn single_source_single_frame_over_real_tcp() {
    let config = ServerConfig {
        listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
        ..ServerConfig::default()
    };
    let (listener, server, mut signals) = Server::bind(&config).await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { server.serve(listener).await });

    let mut client = TcpStream::connect(addr).await.unwrap();

    // Handshake.
    let handshake = tileflow_server::wire::encode_message(
        tileflow_server::wire::MessageType::OpenStream,
        "",
        &1u32.to_le_bytes(),
    )
    .unwrap();
    client.write_all(&handshake).await.unwrap();

    // open_stream(uri, src=1).
    let src = 1u64.to_le_bytes();
    client
        .write_all(
            &tileflow_server::wire::encode_message(
                tileflow_server::wire::MessageType::OpenStream,
                "img://loopback",
                &src,
            )
            .unwrap(),
        )
        .await
        .unwrap();

    assert!(matches!(
        tokio::time::timeout(Duration::from_secs(2), signals.recv()).await.unwrap().unwrap(),
        Signal::PixelStreamOpened(uri) if uri == "img://loopback"
    ));

    // One tile, then frame_finished, then a credit grant.
    client
        .write_all(
            &tileflow_server::wire::encode_message(
                tileflow_server::wire::MessageType::PixelStream,
                "img://loopback",
                &tile_bytes(),
            )
            .unwrap(),
        )
        .await
        .unwrap();
    client
        .write_all(
            &tileflow_server::wire::encode_message(
                tileflow_server::wire::MessageType::PixelStreamFinishFrame,
                "img://loopback",
                &src,
            )
            .unwrap(),
        )
        .await
        .unwrap();
    client
        .write_all(
            &tileflow_server::wire::encode_message(
                tileflow_server::wire::MessageType::RequestFrame,
                "img://loopback",
                b"",
            )
            .unwrap(),
        )
        .await
        .unwrap();

    match tokio::time::timeout(Duration::from_secs(2), signals.recv()).await.unwrap().unwrap() {
        Signal::ReceivedFrame(frame) => {
            assert_eq!(frame.uri, "img://loopback");
            assert_eq!(frame.tiles.len(), 1);
            assert_eq!(frame.tiles[0].width, 16);
        }
        other => panic!("expected ReceivedFrame, got {other:?}"),
    }

    client
        .write_all(
            &tileflow_server::wire::encode_message(tileflow_server::wire::MessageType::Quit, "", b"")
                .unwrap(),
        )
        .await
        .unwrap();

    assert!(matches!(
        tokio::time::timeout(Duration::from_secs(2), signals.recv()).await.unwrap().unwrap(),
        Signal::PixelStreamClosed(uri) if uri == "img://loopback"
    ));
}

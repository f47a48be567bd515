use std::sync::Arc;

use clap::Parser;
use tileflow_server::{Server, ServerConfig, Signal};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Frame dispatcher daemon: accepts tiled pixel-stream connections and
/// relays assembled frames to whatever consumes this process's stdout log.
#[derive(Parser, Debug)]
#[command(name = "tileflowd", version, about)]
struct Args {
    /// Port to listen on.
    #[arg(short, long, default_value_t = 1701)]
    port: u16,

    /// Number of frames a source may have in flight before it must wait
    /// for a credit grant.
    #[arg(long, default_value_t = 1)]
    credit_window: u32,

    /// Maximum queued batches per source before a stream is failed as
    /// stream-fatal. Unbounded if omitted.
    #[arg(long)]
    max_backlog_per_source: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = ServerConfig::new(args.port, args.credit_window, args.max_backlog_per_source);
    config.validate()?;

    let (listener, server, mut signals) = Server::bind(&config).await?;
    let server = Arc::new(server);

    let serve = tokio::spawn({
        let server = Arc::clone(&server);
        async move { server.serve(listener).await }
    });

    // Stand in for the display application that would otherwise consume
    // these signals: log every one and immediately re-request the next
    // frame on a stream that just delivered one, keeping the credit loop
    // moving.
    while let Some(signal) = signals.recv().await {
        match signal {
            Signal::PixelStreamOpened(uri) => {
                info!(%uri, "stream opened");
                server.request_frame(uri).await;
            }
            Signal::PixelStreamClosed(uri) => info!(%uri, "stream closed"),
            Signal::PixelStreamException { uri, message } => {
                tracing::warn!(%uri, %message, "stream exception")
            }
            Signal::ReceivedFrame(frame) => {
                info!(uri = %frame.uri, tiles = frame.tiles.len(), "frame received");
                server.request_frame(frame.uri).await;
            }
        }
    }

    serve.await?;
    Ok(())
}

//! # Server Façade
//!
//! Binds a `TcpListener`, spawns the dispatcher task once, and spawns one
//! [`crate::session`] task per accepted connection — one task per connection,
//! each holding only its own socket and talking to the dispatcher task
//! through a cloned [`DispatcherHandle`] rather than any shared state.

use std::io;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::dispatcher::{self, DispatcherHandle, Signal};
use crate::session::{self, CloseRequest};

/// A bound, running server. Drop to stop accepting new connections;
/// in-flight sessions run to completion independently.
pub struct Server {
    dispatcher: DispatcherHandle,
    /// One close-request sender per live session. A session may own
    /// sources on any number of URIs over its lifetime, so
    /// `close_pixel_stream` broadcasts and lets each session no-op if it
    /// doesn't own a matching pair, rather than tracking URI ownership here
    /// redundantly with the session itself.
    close_senders: Mutex<Vec<mpsc::Sender<CloseRequest>>>,
}

impl Server {
    /// Bind `config.listen_addr` and spawn the dispatcher task. Returns the
    /// server handle plus the signal receiver the caller ("the consumer")
    /// should drain.
    pub async fn bind(config: &ServerConfig) -> io::Result<(TcpListener, Self, mpsc::Receiver<Signal>)> {
        config
            .validate()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;

        let listener = TcpListener::bind(config.listen_addr).await?;
        info!(addr = %config.listen_addr, "listening");

        let (dispatcher, signals) = dispatcher::spawn(config.max_backlog_per_source);
        let server = Server { dispatcher, close_senders: Mutex::new(Vec::new()) };
        Ok((listener, server, signals))
    }

    /// Accept loop: spawns one session task per connection. Runs until the
    /// listener errors (e.g. the process is shutting down).
    pub async fn serve(&self, listener: TcpListener) {
        loop {
            let (socket, peer) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "accept failed");
                    continue;
                }
            };
            info!(%peer, "connection accepted");

            let dispatcher = self.dispatcher.clone();
            let (close_tx, close_rx) = mpsc::channel(16);
            self.close_senders.lock().await.push(close_tx);

            socket.set_nodelay(true).ok();
            tokio::spawn(async move {
                session::run(socket, dispatcher, close_rx).await;
                info!(%peer, "session ended");
            });
        }
    }

    /// Grant one more frame of credit on `uri`.
    pub async fn request_frame(&self, uri: impl Into<String>) {
        self.dispatcher.request_frame(uri.into()).await;
    }

    /// Consumer-facing close: every session currently holding a source on
    /// `uri` is asked to synthesize `removeSource` and notify its peer.
    pub async fn close_pixel_stream(&self, uri: impl Into<String>) {
        let uri = uri.into();
        let senders = self.close_senders.lock().await;
        for tx in senders.iter() {
            let _ = tx.send(CloseRequest { uri: uri.clone() }).await;
        }
    }

    pub fn dispatcher_handle(&self) -> DispatcherHandle {
        self.dispatcher.clone()
    }
}

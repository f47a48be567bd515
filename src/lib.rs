//! Frame dispatcher and receive-buffer runtime for a tiled pixel-streaming
//! protocol: multiple sources contribute tile batches for a named stream,
//! a consumer pulls completed frames under credit-based back-pressure, and
//! observers can keep a stream alive without contributing tiles themselves.
//!
//! [`dispatcher`] owns all mutable stream state on a single task and is the
//! only place barrier synchronization and stereo pairing happen.
//! [`receive_buffer`] implements the per-channel completion barrier that
//! [`dispatcher`] builds on. [`wire`] and [`session`] carry tiles in over
//! TCP; [`server`] ties the accept loop and dispatcher together.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod frame;
pub mod receive_buffer;
pub mod server;
pub mod session;
pub mod tile;
pub mod wire;

pub use config::ServerConfig;
pub use dispatcher::Signal;
pub use error::StreamError;
pub use frame::Frame;
pub use server::Server;
pub use tile::{RowOrder, Tile, TileFormat, TileView};

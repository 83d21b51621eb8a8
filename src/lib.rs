//! chunkpause - HTTP/1.x server demonstrating chunked transfer encoding
//!
//! Every page is split into a first part that is flushed at once and a tail
//! that follows after a configurable pause, so a browser's handling of a
//! partially delivered document can be observed.
//!
//! # Request flow
//!
//! - **Inbound capture** - the head of each request is kept for the
//!   connection until its response completes
//! - **Dispatcher** - picks a response shape from a fixed route table and
//!   writes it, waiting out the pause before the tail
//! - **Outbound hygiene** - repairs framing headers, mirrors the request
//!   version and decides keep-alive or close after the final message
//!
//! # Response shapes
//!
//! - [`Immediate`](ResponseShape::Immediate) - head and whole body at once
//! - [`ChunkedWithDelayedTail`](ResponseShape::ChunkedWithDelayedTail) -
//!   head and first chunk, then the tail chunk after the pause
//! - [`BufferedWithDelayedTail`](ResponseShape::BufferedWithDelayedTail) -
//!   head with `Content-Length`, then the whole body after the pause
//!
//! # Examples
//!
//! ```no_run
//! use chunkpause::{AssetStore, Server, ServerConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> chunkpause::Result<()> {
//!     let config = ServerConfig::default();
//!     config.chunk_pause.set(Duration::from_millis(1500));
//!
//!     Server::builder()
//!         .listener(Server::bind(([127, 0, 0, 1], 7001).into(), config.server.backlog)?)
//!         .assets(AssetStore::load_dir("web")?)
//!         .config(config)
//!         .build()
//!         .launch()
//!         .await;
//!     Ok(())
//! }
//! ```

pub(crate) mod http {
    pub(crate) mod codec;
    pub(crate) mod request;
    pub(crate) mod response;
    pub(crate) mod types;
}
pub(crate) mod pipeline {
    pub(crate) mod chain;
    pub(crate) mod context;
    pub(crate) mod dispatcher;
    pub(crate) mod inbound;
    pub(crate) mod outbound;
    pub(crate) mod scheduler;
}
pub(crate) mod server {
    pub(crate) mod connection;
    pub(crate) mod server_impl;
}
pub mod assets;
pub mod config;
pub(crate) mod errors;
pub mod logging;

pub use crate::{
    assets::{content_type, AssetStore},
    config::{ChunkPause, ServerConfig},
    errors::{Error, ParseError, Result},
    http::{
        request::{Inbound, RequestHead},
        response::{Outbound, ResponseHead},
        types::{header, Headers, Method, StatusCode, Version},
    },
    pipeline::{
        dispatcher::{Dispatcher, ResponseShape},
        scheduler::DelayScheduler,
    },
    server::server_impl::{Server, ServerBuilder, ShutdownHandle},
};

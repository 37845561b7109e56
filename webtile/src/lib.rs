//! WebTile - per-consumer map-tile fetching over an inter-process channel.
//!
//! Each client instance bridges one textual request channel to a remote WMS
//! style tile service, backed by a disk cache and a priority work queue. The
//! host application creates and destroys instances through the
//! [`InstanceRegistry`]; consumers talk to an instance over its named channel
//! using the pipe-delimited wire grammar in [`protocol`].
//!
//! # Architecture
//!
//! ```text
//! channel ──► ProtocolGateway ──► cache probe ──► immediate <file> reply
//!                   │                   │ miss
//!                   │                   ▼
//!                   │             RequestQueue (priority + FIFO)
//!                   │                   │
//!                   ▼                   ▼
//!              terminate /       RequestProcessor ──► TileFetcher ──► disk
//!              removerequests          │ transient failure      cache
//!                                      └── demote + retry ──► back to queue
//! ```
//!
//! Both execution units of an instance share one cancellation token, so a
//! `terminate` message or a registry destroy stops them promptly and
//! [`ClientInstance::shutdown`] joins both before releasing the channel.

pub mod cache;
pub mod channel;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod fetch;
pub mod gateway;
pub mod protocol;
pub mod queue;
pub mod registry;
pub mod stats;
pub mod worker;

pub use cache::{TileCache, TileKey};
pub use channel::{ChannelFactory, ClientEnd, InMemoryChannels, ServerChannel};
pub use client::ClientInstance;
pub use config::ClientConfig;
pub use error::{ChannelError, ClientError, FetchError, ParseError};
pub use fetch::{FetchOutcome, HttpClient, ReqwestClient, TileFetcher};
pub use protocol::{Command, ImageRequest, Response, RETRY_PRIORITY};
pub use queue::RequestQueue;
pub use registry::InstanceRegistry;
pub use stats::StatsReporter;

//! # A multi-agent simulation platform
//!
//! This crate drives populations of **model agents** through repeated
//! four-phase iterations (partner search, main communication, state update,
//! cleanup), lets **observer agents** watch that population and promote
//! groups of it into **meta-agents** that subsume their children and
//! present a single aggregated agent in their place, and delivers messages
//! between all of them over a [`bus`] that can run either as a lossless
//! synchronous FIFO or as a bandwidth-limited, drop-tolerant asynchronous
//! substrate.
//!
//! ## Core components
//!
//! - **[`server`]** — the turn/phase driver (`Server`) that owns the bus and
//!   the meta-hierarchy and runs every registered agent through a turn.
//! - **[`agent`]** — `ModelAgent`, `MetaAgent`, `ObserverAgent`, the
//!   `SimulationAgent` trait they share, and the `AgentRegistry` the bus
//!   dispatches through.
//! - **[`bus`]** — message delivery, bandwidth admission, and subsumption
//!   rerouting.
//! - **[`meta`]** — the subsumption hierarchy, recursive per-meta state tree,
//!   and dissolution-verification predicate.
//! - **[`message`]**, **[`event`]**, **[`stats`]** — the wire message type,
//!   the fan-out subscriber primitive used at the few genuinely multi-
//!   subscriber hooks, and the communication/state bookkeeping agents query
//!   mid-iteration.
//! - **[`config`]** — validated `ServerConfig` plus its newtype fields.
//! - **[`error`]** — the `PlatformError`/`PlatformResult` taxonomy.
//! - **[`observability`]** — `tracing` subscriber setup.
//! - **[`rollback`]** (feature `rollback-alpha`) — the bounded-history
//!   rollback mechanism; not part of the core contract.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use bytes::Bytes;
//! use caxton_platform::agent::ModelAgent;
//! use caxton_platform::config::ServerConfig;
//! use caxton_platform::server::Server;
//!
//! #[tokio::main]
//! async fn main() {
//!     let server = Server::new(ServerConfig::development());
//!     server.spawn_model(ModelAgent::new(
//!         Arc::new(|_payload| true),
//!         Arc::new(|| Bytes::from_static(b"hello")),
//!     ));
//!     server.run().await.expect("run completes");
//! }
//! ```

pub mod agent;
pub mod bus;
pub mod config;
pub mod error;
pub mod event;
pub mod identifier;
pub mod message;
pub mod meta;
pub mod observability;
#[cfg(feature = "rollback-alpha")]
pub mod rollback;
pub mod server;
pub mod stats;

pub use crate::error::{PlatformError, PlatformResult};
pub use crate::identifier::Identifier;
pub use crate::message::Message;

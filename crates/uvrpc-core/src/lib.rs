//! Core machinery for uvrpc sessions.
//!
//! This crate holds everything the session façades in `uvrpc` are built
//! from:
//!
//! - [`Addr`] / [`Config`]: address URIs and the builder-validated session
//!   configuration, including the injected event loop handle.
//! - [`Transport`]: the uniform facade over the four transport families
//!   (TCP, Unix-domain, in-process, UDP), each in listener or client role.
//!   Transports frame outgoing payloads, reassemble incoming frames, track
//!   peers, and deliver complete frame bodies upward with a [`ReplyTarget`].
//! - [`Bus`]: the routing core: handler table, pending-call table, topic
//!   subscription table, and a statistics block.
//! - [`Error`]: the error taxonomy, each variant mapping onto a wire
//!   [`Status`](uvrpc_wire::Status) code.
//!
//! Nothing here owns the event loop: sessions receive a
//! `tokio::runtime::Handle`, acquire all I/O resources on it, and release
//! them on shutdown without ever stopping the runtime.

mod addr;
mod bus;
mod config;
mod error;
mod reply;
pub mod transport;

pub use addr::{Addr, TransportKind};
pub use bus::{Bus, BusStats, BusStatsSnapshot, HandlerFn, PublicationFn, Request, ResponseFn, SubscriptionId, TopicFilter};
pub use config::{CommType, Config, ConfigBuilder, PerfMode};
pub use error::Error;
pub use reply::{ReplySink, ReplyTarget};
pub use transport::{ErrorFn, RecvFn, Transport};

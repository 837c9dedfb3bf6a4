//! uvrpc: an embeddable, event-loop-driven RPC and pub/sub framework.
//!
//! The host supplies the event loop (a [`tokio::runtime::Handle`]); uvrpc
//! provides the sessions that live on it:
//!
//! - [`Server`] / [`Client`]: correlated request/response over TCP,
//!   Unix-domain, in-process, or UDP endpoints.
//! - [`Publisher`] / [`Subscriber`]: topic fan-out over the same transports.
//! - Async coordination primitives ([`Promise`], [`Semaphore`],
//!   [`WaitGroup`], the [`all`] / [`race`] / [`all_settled`] combinators and
//!   the [`Scheduler`]) for expressing concurrent request pipelines.
//!
//! Sessions never start, stop, or block the runtime they are given; teardown
//! releases their endpoints and reports `Cancelled` to anything still
//! pending.
//!
//! ```no_run
//! use uvrpc::prelude::*;
//!
//! # async fn demo() -> Result<(), uvrpc::Error> {
//! let server = Server::bind(Config::builder().address("tcp://127.0.0.1:5555").build()?).await?;
//! server.register("echo", |request, reply| {
//!     let _ = reply.send(Status::Ok, request.payload);
//! })?;
//!
//! let client = Client::connect(Config::builder().address("tcp://127.0.0.1:5555").build()?).await?;
//! client.call("echo", &b"hello"[..], |status, payload| {
//!     println!("{status}: {payload:?}");
//! })?;
//! # Ok(())
//! # }
//! ```

mod client;
mod publisher;
mod server;
mod subscriber;

pub use client::Client;
pub use publisher::Publisher;
pub use server::Server;
pub use subscriber::Subscriber;

// Core types
pub use uvrpc_core::{
    Addr, Bus, BusStatsSnapshot, CommType, Config, ConfigBuilder, Error, PerfMode, ReplySink,
    ReplyTarget, Request, SubscriptionId, Transport, TransportKind,
};

// Wire types
pub use uvrpc_wire::{Envelope, Kind, MAX_FRAME_LEN, MAX_NAME_LEN, Status};

// Async primitives
pub use uvrpc_sync::{
    Promise, Scheduler, Semaphore, SettledEntry, SettledList, Settlement, SyncError, WaitGroup,
    all, all_settled, race,
};

/// Convenient imports for typical use.
///
/// ```ignore
/// use uvrpc::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        Client, CommType, Config, Error, PerfMode, Promise, Publisher, ReplySink, Request,
        Scheduler, Semaphore, Server, Status, Subscriber, WaitGroup,
    };
}

//! Loop-local async coordination primitives.
//!
//! Every primitive here is bound to one injected [`tokio::runtime::Handle`]
//! at construction. Settlement callbacks are always deferred through
//! `handle.spawn` (the wake handle) so resolvers never invoke user code
//! re-entrantly and callback ordering never depends on the resolver's call
//! stack.
//!
//! - [`Promise`]: a value-or-error cell settled exactly once, with a single
//!   terminal callback.
//! - [`Semaphore`]: counted permits with a FIFO queue of waiter promises.
//! - [`WaitGroup`]: a non-negative counter whose completion promise resolves
//!   when the count returns to zero.
//! - [`all`] / [`race`] / [`all_settled`]: combinators over promise sets.
//! - [`Scheduler`]: a semaphore + wait-group bundle that runs a batch of
//!   tasks under a concurrency cap.

mod combinators;
mod error;
mod promise;
mod scheduler;
mod semaphore;
mod waitgroup;

pub use combinators::{SettledEntry, SettledList, all, all_settled, race};
pub use error::SyncError;
pub use promise::{Promise, Settlement};
pub use scheduler::Scheduler;
pub use semaphore::Semaphore;
pub use waitgroup::WaitGroup;

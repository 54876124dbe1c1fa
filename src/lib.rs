//! Tempo: a single-threaded asynchronous concurrency core written in Rust
//!
//! Tempo lets a cooperative program express long-running computations as
//! suspendable coroutines that await timers, I/O readiness, signals, and each
//! other, while one event loop multiplexes those suspensions onto a single
//! OS thread. There are no worker threads and no locks; concurrency comes
//! from the tick discipline, not from parallelism.
//!
//! # Features
//!
//! - **Deterministic ordering**: defers before timers before I/O within a
//!   tick; continuations always run on a later tick, never synchronously
//! - **Promises without combinators**: a single `when` registration with
//!   ordered continuation dispatch, plus a deferred write capability with
//!   explicit adoption
//! - **Backpressured streams**: single-consumer async iteration where every
//!   emit settles only when its value has been consumed
//! - **Swappable multiplexer**: the loop blocks in a `Poller` trait; a
//!   virtual-time poller makes whole-program tests deterministic
//!
//! # Quick Start
//!
//! ```
//! use tempo::accessor;
//!
//! fn main() -> tempo::Result<()> {
//!     accessor::defer(|_id, _data| {
//!         println!("runs on the next tick");
//!         Ok(())
//!     })?;
//!     accessor::run()
//! }
//! ```
//!
//! # Module Overview
//!
//! | Category | Modules |
//! |----------|---------|
//! | **Driver** | [`event_loop`] (watchers, tick loop, run/stop), [`event_loop::poller`], [`event_loop::watcher`] |
//! | **Access** | [`accessor`] (thread-local current driver, passthroughs) |
//! | **Primitives** | [`promise`] (promise, deferred, adoption), [`stream`] (producer, emitter, consumer) |
//! | **Errors** | [`Error`], [`Result`] |

pub mod event_loop;
pub mod promise;
pub mod stream;

mod error;

pub use error::{Error, Result};
pub use event_loop::accessor;
pub use event_loop::poller::{Interest, PollEvent, Poller, SleepPoller, VirtualPoller};
pub use event_loop::watcher::{
    KindCounts, LoopInfo, ReferenceCounts, WatcherData, WatcherId, WatcherKind,
};
pub use event_loop::{ErrorHandler, EventLoop};
pub use promise::{Deferred, Promise, PromiseLike, PromiseStatus, WhenHandler};
pub use stream::{AsyncIterator, Emitter, Producer};

/// Tempo version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

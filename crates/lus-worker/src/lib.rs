// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! The Lus worker pool.
//!
//! Workers run independent scripts in parallel, each inside its own
//! interpreter state, exchanging only values that survive the wire
//! format in [`wire`]. A process-global pool of OS threads executes
//! worker bodies; parent and worker communicate through two copying
//! mailboxes per worker.
//!
//! The script engine is injected: the interpreter crate registers a
//! [`WorkerEngine`] once at startup, and every worker body runs
//! through it.

pub mod message;
pub mod pool;
pub mod wire;
pub mod worker;

pub use message::Message;
pub use pool::{register_engine, shutdown_pool, WorkerContext, WorkerEngine};
pub use wire::{WireError, WireValue};
pub use worker::{receive, Worker, WorkerError, WorkerHandle, WorkerStatus};

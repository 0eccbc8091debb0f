// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! The Lus runtime core.
//!
//! Owns the pieces that drive detached coroutines:
//! - event backends — readiness multiplexing behind one trait, with
//!   the platform implementation selected at compile time
//! - thread pool — blocking work off the interpreter thread, with a
//!   pipe-based completion signal the backend can wait on
//! - scheduler — the pending set of suspended tasks and the poll
//!   cycle that resumes them
//!
//! The interpreter is a client: it hands the scheduler resumable
//! tasks (coroutines wrapped behind [`sched::DetachedTask`]) and
//! calls [`sched::Scheduler::poll`].

pub mod event;
pub mod pool;
pub mod sched;
pub mod time;

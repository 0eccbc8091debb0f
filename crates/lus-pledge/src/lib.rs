// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! The Lus pledge system.
//!
//! A pledge is a named capability held by an interpreter state and
//! checked at stdlib boundaries. Grants are validated by per-domain
//! granter callbacks; a store can be sealed, after which it accepts
//! no further modifications. Worker states inherit a deep copy of the
//! parent's store at creation time.

pub mod fs;
pub mod glob;
mod store;

pub use store::{
    Granter, PledgeError, PledgeRequest, PledgeStatus, PledgeStore,
};

// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Monotonic time in seconds.

use std::sync::OnceLock;
use std::time::Instant;

static START: OnceLock<Instant> = OnceLock::new();

/// Monotonic seconds since an arbitrary process-local epoch. Sleep
/// deadlines and poll timeouts are expressed against this clock.
pub fn now() -> f64 {
    START.get_or_init(Instant::now).elapsed().as_secs_f64()
}

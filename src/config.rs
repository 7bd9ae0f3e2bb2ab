//! Compile-time capacities.
//!
//! Every container inside the engine is fixed-size so a machine's memory
//! footprint is known once its topology is built. Tune these constants for
//! the target device.

use static_assertions::const_assert;

/// Number of built-in timeout slots available to every machine.
pub const MAX_TIMEOUTS: usize = 3;

/// Maximum nesting depth of a topology, counting the top state as depth 0.
pub const MAX_DEPTH: usize = 16;

/// Distinct signals a [`SignalBroker`](crate::broker::SignalBroker) can index.
pub const MAX_PS_SIGNALS: usize = 8;

/// Subscribers per signal in a [`SignalBroker`](crate::broker::SignalBroker).
pub const MAX_SUBSCRIBERS_PER_SIGNAL: usize = 4;

/// Inline storage for state names used in logs and snapshots.
pub const STATE_NAME_LEN: usize = 24;

const_assert!(MAX_TIMEOUTS > 0);
// Periodic flags for the slots are packed into a u32.
const_assert!(MAX_TIMEOUTS <= 32);
const_assert!(MAX_DEPTH >= 2);
const_assert!(MAX_PS_SIGNALS > 0);
const_assert!(MAX_SUBSCRIBERS_PER_SIGNAL > 0);
